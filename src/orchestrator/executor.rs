//! Image composition: mkarchiso, ISO hand-over, working tree reclamation.

use crate::error::BuildError;
use crate::models::{BuildConfiguration, ProfileTree};
use crate::system::{run_checked, Invocation, PrivilegeSession, SystemWrapper};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

/// Refuse to `rm -rf` anything that is not strictly inside the working root.
pub fn ensure_within_work_root(root: &Path, work_root: &Path) -> Result<(), BuildError> {
    let escapes = root
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir));
    if escapes || root == work_root || !root.starts_with(work_root) || !work_root.is_absolute() {
        return Err(BuildError::UnsafeCleanupPath(root.to_path_buf()));
    }
    Ok(())
}

/// The ISO mkarchiso wrote into `out`.
pub fn find_iso(out: &Path) -> Result<PathBuf, BuildError> {
    let mut images: Vec<PathBuf> = match fs::read_dir(out) {
        Ok(entries) => entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().map(|e| e == "iso").unwrap_or(false))
            .collect(),
        Err(_) => Vec::new(),
    };
    images.sort();

    match images.len() {
        0 => Err(BuildError::ArtifactMissing(out.to_path_buf())),
        1 => Ok(images.remove(0)),
        n => {
            log::warn!(
                "[Build] [ARTIFACT] {} images in {}, delivering the last one",
                n,
                out.display()
            );
            images.pop().ok_or_else(|| BuildError::ArtifactMissing(out.to_path_buf()))
        }
    }
}

async fn compose_image(
    system: &dyn SystemWrapper,
    session: &PrivilegeSession,
    config: &BuildConfiguration,
    tree: &ProfileTree,
) -> Result<PathBuf, BuildError> {
    session.refresh(system).await?;

    let invocation = Invocation::new("mkarchiso")
        .arg("-v")
        .arg("-w")
        .arg_path(&tree.work)
        .arg("-o")
        .arg_path(&tree.out)
        .arg_path(&tree.profile)
        .elevated();

    log::info!("[Build] [MKARCHISO] Composing image from {}", tree.profile.display());
    let started = Instant::now();
    run_checked(system, &invocation)
        .await
        .map_err(BuildError::CompositionFailed)?;
    log::info!(
        "[Build] [MKARCHISO] Finished in {}s",
        started.elapsed().as_secs()
    );

    let iso = find_iso(&tree.out)?;
    let file_name = iso
        .file_name()
        .ok_or_else(|| BuildError::ArtifactMissing(tree.out.clone()))?;
    fs::create_dir_all(&config.artifact_dir)?;
    let dest = config.artifact_dir.join(file_name);

    // out/ is root-owned: move and chown through sudo
    session.refresh(system).await?;
    let relocate = Invocation::new("mv")
        .arg("-f")
        .arg_path(&iso)
        .arg_path(&dest)
        .elevated();
    run_checked(system, &relocate)
        .await
        .map_err(BuildError::Relocation)?;

    session.refresh(system).await?;
    let (uid, gid) = system.invoking_user();
    let chown = Invocation::new("chown")
        .arg(format!("{}:{}", uid, gid))
        .arg_path(&dest)
        .elevated();
    run_checked(system, &chown)
        .await
        .map_err(BuildError::Relocation)?;

    log::info!("[Build] [ARTIFACT] {}", dest.display());
    Ok(dest)
}

/// Remove the whole profile tree, including mkarchiso's root-owned work dir.
pub async fn reclaim_tree(
    system: &dyn SystemWrapper,
    session: &PrivilegeSession,
    config: &BuildConfiguration,
    tree: &ProfileTree,
) -> Result<(), BuildError> {
    ensure_within_work_root(&tree.root, &config.work_root)?;
    if !tree.root.exists() {
        return Ok(());
    }

    session.refresh(system).await?;
    let invocation = Invocation::new("rm")
        .args(["-rf", "--"])
        .arg_path(&tree.root)
        .elevated();
    run_checked(system, &invocation)
        .await
        .map_err(BuildError::Cleanup)?;
    log::info!("[Build] [CLEANUP] Removed {}", tree.root.display());
    Ok(())
}

/// Compose the image and always reclaim the tree afterwards.
///
/// A cleanup failure never replaces a composition failure. After a
/// successful build it is only reported, since the ISO is already delivered.
///
/// # Returns
/// Path of the delivered ISO
pub async fn compose(
    system: &dyn SystemWrapper,
    session: &PrivilegeSession,
    config: &BuildConfiguration,
    tree: &ProfileTree,
) -> Result<PathBuf, BuildError> {
    ensure_within_work_root(&tree.root, &config.work_root)?;

    let result = compose_image(system, session, config, tree).await;
    let cleanup = reclaim_tree(system, session, config, tree).await;

    match (result, cleanup) {
        (Ok(iso), Ok(())) => Ok(iso),
        (Ok(iso), Err(e)) => {
            log::warn!("[Build] [CLEANUP] {} left behind: {}", tree.root.display(), e);
            Ok(iso)
        }
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup_err)) => {
            log::warn!("[Build] [CLEANUP] Also failed to remove {}: {}", tree.root.display(), cleanup_err);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults;
    use crate::system::mock::{MockSystem, MOCK_ISO_NAME};
    use crate::system::{privilege, Elevation};
    use tempfile::TempDir;

    fn tree_in(temp: &TempDir) -> ProfileTree {
        let tree = ProfileTree::new(&temp.path().join("archlive-zfs"));
        fs::create_dir_all(tree.profile.join("airootfs")).unwrap();
        tree
    }

    #[test]
    fn test_cleanup_path_must_be_inside_work_root() {
        let work = Path::new("/home/user/iso");
        assert!(ensure_within_work_root(Path::new("/home/user/iso/archlive-zfs"), work).is_ok());
        assert!(ensure_within_work_root(Path::new("/home/user/iso"), work).is_err());
        assert!(ensure_within_work_root(Path::new("/home/user"), work).is_err());
        assert!(ensure_within_work_root(Path::new("/home/user/iso/../../etc"), work).is_err());
        assert!(ensure_within_work_root(Path::new("/home/user/isolation"), work).is_err());
    }

    #[test]
    fn test_find_iso_missing() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            find_iso(&temp.path().join("out")),
            Err(BuildError::ArtifactMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_compose_delivers_iso_and_removes_tree() {
        let temp = TempDir::new().unwrap();
        let config = defaults(temp.path());
        let tree = tree_in(&temp);
        let system = MockSystem::new();
        let session = privilege::acquire(&system).await.unwrap();

        let iso = compose(&system, &session, &config, &tree).await.unwrap();
        assert_eq!(iso, temp.path().join(MOCK_ISO_NAME));
        assert!(iso.is_file());
        assert!(!tree.root.exists());

        let mkarchiso = system.calls_to("mkarchiso");
        assert_eq!(mkarchiso.len(), 1);
        let (program, args) = mkarchiso[0].resolved();
        assert_eq!(program, "sudo");
        assert_eq!(&args[..4], &["-n", "--", "mkarchiso", "-v"]);
        assert_eq!(system.calls_to("chown")[0].args[0], "1000:1000");
    }

    #[tokio::test]
    async fn test_every_elevated_step_follows_a_refresh() {
        let temp = TempDir::new().unwrap();
        let config = defaults(temp.path());
        let tree = tree_in(&temp);
        let system = MockSystem::new();
        let session = privilege::acquire(&system).await.unwrap();

        compose(&system, &session, &config, &tree).await.unwrap();
        let calls = system.invocations();
        for (i, inv) in calls.iter().enumerate() {
            if inv.elevation == Elevation::Root {
                let previous = &calls[i - 1];
                assert_eq!(previous.program, "sudo", "{} not preceded by refresh", inv.program);
                assert!(previous.args.contains(&"-v".to_string()));
            }
        }
        assert!(!system.calls_to("chown").is_empty());
    }

    #[tokio::test]
    async fn test_composition_failure_still_removes_tree() {
        let temp = TempDir::new().unwrap();
        let config = defaults(temp.path());
        let tree = tree_in(&temp);
        let system = MockSystem::new().failing("mkarchiso");
        let session = privilege::acquire(&system).await.unwrap();

        let result = compose(&system, &session, &config, &tree).await;
        assert!(matches!(result, Err(BuildError::CompositionFailed(_))));
        assert!(!tree.root.exists());
        assert!(system.calls_to("mv").is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_mask_composition_failure() {
        let temp = TempDir::new().unwrap();
        let config = defaults(temp.path());
        let tree = tree_in(&temp);
        let system = MockSystem::new().failing("mkarchiso").failing("rm");
        let session = privilege::acquire(&system).await.unwrap();

        let result = compose(&system, &session, &config, &tree).await;
        assert!(matches!(result, Err(BuildError::CompositionFailed(_))));
    }

    #[tokio::test]
    async fn test_cleanup_failure_after_success_is_a_warning() {
        let temp = TempDir::new().unwrap();
        let config = defaults(temp.path());
        let tree = tree_in(&temp);
        let system = MockSystem::new().failing("rm");
        let session = privilege::acquire(&system).await.unwrap();

        let iso = compose(&system, &session, &config, &tree).await.unwrap();
        assert!(iso.is_file());
        assert!(tree.root.exists());
    }

    #[tokio::test]
    async fn test_unsafe_tree_is_refused_before_composition() {
        let temp = TempDir::new().unwrap();
        let config = defaults(&temp.path().join("work"));
        let tree = tree_in(&temp);
        let system = MockSystem::new();
        let session = privilege::acquire(&system).await.unwrap();

        let result = compose(&system, &session, &config, &tree).await;
        assert!(matches!(result, Err(BuildError::UnsafeCleanupPath(_))));
        assert!(system.calls_to("mkarchiso").is_empty());
    }
}
