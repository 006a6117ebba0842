//! End-to-end pipeline runs against the recording mock host.

mod common;

use archiso_zfs::error::{BuildError, RepositoryError, StageError};
use archiso_zfs::system::mock::{MockSystem, MOCK_ISO_NAME};
use archiso_zfs::{Pipeline, PipelineState};
use std::fs;

#[tokio::test]
async fn test_fresh_run_builds_repository_and_delivers_iso() {
    let (temp, config) = common::workspace();
    let system = MockSystem::new();
    let mut pipeline = Pipeline::new(&system, &config);

    let outcome = pipeline.run().await.unwrap();
    assert_eq!(pipeline.phase(), PipelineState::Done);
    assert_eq!(outcome.iso, temp.path().join(MOCK_ISO_NAME));
    assert!(!outcome.repository_reused);

    // zfs-utils and zfs-dkms, debug packages stay out of the repository
    assert_eq!(outcome.repository.packages.len(), 2);
    assert!(outcome
        .repository
        .packages
        .iter()
        .all(|p| !p.to_string_lossy().contains("-debug-")));

    // dependency built first and installed, module reused its tarball
    let makepkg = system.calls_to("makepkg");
    assert_eq!(makepkg.len(), 2);
    assert!(makepkg[0].args.contains(&"--install".to_string()));
    assert!(!makepkg[1].args.contains(&"--install".to_string()));
    assert_eq!(system.prefetched_sources(), vec!["zfs-dkms".to_string()]);

    // host left as found
    assert!(!system.installed().contains(&"zfs-utils".to_string()));
    assert!(system.installed().contains(&"archiso".to_string()));

    assert!(!config.profile_tree_root().exists());
    assert!(!config.build_dir().exists());
}

#[tokio::test]
async fn test_rerun_with_indexed_repository_builds_nothing() {
    let (_temp, config) = common::workspace();
    let first = MockSystem::new();
    Pipeline::new(&first, &config).run().await.unwrap();

    let second = MockSystem::new().with_installed(&["archiso", "base-devel"]);
    let outcome = Pipeline::new(&second, &config).run().await.unwrap();

    assert!(outcome.repository_reused);
    assert!(second.clones().is_empty());
    assert!(second.calls_to("makepkg").is_empty());
    assert!(second.calls_to("gpg").is_empty());
    assert!(second.calls_to("repo-add").is_empty());
    assert_eq!(second.calls_to("mkarchiso").len(), 1);
}

#[tokio::test]
async fn test_composition_failure_keeps_repository_and_removes_tree() {
    let (_temp, config) = common::workspace();
    let system = MockSystem::new().failing("mkarchiso");
    let mut pipeline = Pipeline::new(&system, &config);

    let err = pipeline.run().await.unwrap_err();
    assert_eq!(err.stage, PipelineState::Composed);
    assert!(matches!(err.source, StageError::Build(BuildError::CompositionFailed(_))));
    assert_eq!(pipeline.phase(), PipelineState::Failed);
    assert!(err.to_string().starts_with("stage 'compose' failed"));

    assert!(!config.profile_tree_root().exists());
    let index = config
        .repository_dir()
        .join(format!("{}.db.tar.gz", config.repository_name));
    assert!(index.is_file());
    let packages = fs::read_dir(config.repository_dir())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".pkg.tar.zst"))
        .count();
    assert_eq!(packages, 2);
}

#[tokio::test]
async fn test_failed_package_build_stops_before_profile() {
    let (_temp, config) = common::workspace();
    let system = MockSystem::new().failing("makepkg");
    let mut pipeline = Pipeline::new(&system, &config);

    let err = pipeline.run().await.unwrap_err();
    assert_eq!(err.stage, PipelineState::RepositoryReady);
    assert!(matches!(
        err.source,
        StageError::Repository(RepositoryError::PackageBuild { .. })
    ));
    assert!(!config.profile_tree_root().exists());
    assert!(system.calls_to("mkarchiso").is_empty());
}

#[tokio::test]
async fn test_unreachable_recipe_is_source_fetch_error() {
    let (_temp, config) = common::workspace();
    let system = MockSystem::new().failing_clones();

    let err = Pipeline::new(&system, &config).run().await.unwrap_err();
    assert!(matches!(
        err.source,
        StageError::Repository(RepositoryError::SourceFetch { .. })
    ));
}

#[tokio::test]
async fn test_running_as_root_is_refused() {
    let (_temp, config) = common::workspace();
    let system = MockSystem::new().as_root();

    let err = Pipeline::new(&system, &config).run().await.unwrap_err();
    assert_eq!(err.stage, PipelineState::Elevated);
    assert!(system.invocations().is_empty());
}
