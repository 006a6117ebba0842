//! Local package repository builder.
//!
//! Builds the dependency recipe (`zfs-utils`) and the module recipe
//! (`zfs-dkms`) with makepkg and indexes both into a file-served pacman
//! repository. The repository index is the completion marker: when it exists
//! the whole stage is skipped.

pub mod git;
pub mod sources;

use crate::error::RepositoryError;
use crate::models::{BuildConfiguration, RepositoryArtifact, SourcePackage};
use crate::system::{run_checked, Invocation, PrivilegeSession, SystemWrapper};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Whether `package` is currently installed on the host.
pub async fn is_installed(system: &dyn SystemWrapper, package: &str) -> bool {
    let query = Invocation::new("pacman").args(["-Qi", package]);
    matches!(system.run(&query).await, Ok(output) if output.success())
}

/// Import the maintainer keys that sign the upstream tarballs.
pub async fn retrieve_signing_keys(
    system: &dyn SystemWrapper,
    config: &BuildConfiguration,
) -> Result<(), RepositoryError> {
    log::info!(
        "[Repository] [KEYS] Importing {} signing key(s) from {}",
        config.signing_keys.len(),
        config.keyserver
    );
    let invocation = Invocation::new("gpg")
        .args(["--keyserver", config.keyserver.as_str(), "--recv-keys"])
        .args(&config.signing_keys);
    run_checked(system, &invocation)
        .await
        .map_err(RepositoryError::KeyRetrieval)?;
    Ok(())
}

async fn fetch_recipe(
    system: &dyn SystemWrapper,
    package: &SourcePackage,
    dir: &Path,
) -> Result<(), RepositoryError> {
    let commit = system
        .clone_source(&package.git_url, dir)
        .await
        .map_err(|e| RepositoryError::SourceFetch {
            package: package.name.clone(),
            reason: e.to_string(),
        })?;
    log::info!(
        "[Repository] [FETCH] {} recipe at {}",
        package.name,
        &commit[..commit.len().min(12)]
    );
    Ok(())
}

/// Run makepkg in `dir`, leaving packages and downloaded sources there.
async fn build_package(
    system: &dyn SystemWrapper,
    session: &PrivilegeSession,
    package: &SourcePackage,
    dir: &Path,
    install: bool,
) -> Result<(), RepositoryError> {
    // makepkg calls sudo itself for --syncdeps/--install
    session.refresh(system).await?;

    let mut invocation = Invocation::new("makepkg").arg("--syncdeps");
    if install {
        invocation = invocation.arg("--install");
    }
    let invocation = invocation
        .args(["--noconfirm", "--cleanbuild", "--force"])
        .dir(dir)
        .env("PKGDEST", dir.to_string_lossy())
        .env("SRCDEST", dir.to_string_lossy());

    log::info!("[Repository] [BUILD] makepkg {}", package.name);
    let started = Instant::now();
    run_checked(system, &invocation)
        .await
        .map_err(|source| RepositoryError::PackageBuild {
            package: package.name.clone(),
            source,
        })?;
    log::info!(
        "[Repository] [BUILD] {} built in {}s",
        package.name,
        started.elapsed().as_secs()
    );
    Ok(())
}

/// Copy the package archives of a finished build into the repository.
///
/// # Returns
/// The archives as published in the repository
fn publish_artifacts(
    package: &SourcePackage,
    build_dir: &Path,
    repo_dir: &Path,
) -> Result<Vec<PathBuf>, RepositoryError> {
    let artifacts = sources::package_artifacts(build_dir)?;
    if artifacts.is_empty() {
        return Err(RepositoryError::NoArtifacts(package.name.clone()));
    }
    let copied = sources::copy_into(&artifacts, repo_dir)?;
    for published in &copied {
        log::info!("[Repository] [PUBLISH] {}", published.display());
    }
    Ok(copied)
}

fn remove_build_dir(dir: &Path) -> Result<(), RepositoryError> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    Ok(())
}

/// Drop archives an interrupted run left in an unindexed repository.
fn remove_stale_archives(repo_dir: &Path) -> Result<(), RepositoryError> {
    for stale in sources::package_artifacts(repo_dir)? {
        log::warn!("[Repository] [STALE] Removing unindexed {}", stale.display());
        fs::remove_file(&stale)?;
    }
    Ok(())
}

/// Build both recipes and index them, unless the repository already exists.
///
/// # Returns
/// The repository artifact and whether it was reused as-is
pub async fn build_repository(
    system: &dyn SystemWrapper,
    config: &BuildConfiguration,
    session: &PrivilegeSession,
) -> Result<(RepositoryArtifact, bool), RepositoryError> {
    let repo_dir = config.repository_dir();
    if let Some(existing) = RepositoryArtifact::locate(&repo_dir, &config.repository_name) {
        log::info!(
            "[Repository] [SKIP] {} already indexed ({} package(s)); delete {} to rebuild",
            config.repository_name,
            existing.packages.len(),
            repo_dir.display()
        );
        return Ok((existing, true));
    }

    fs::create_dir_all(&repo_dir)?;
    remove_stale_archives(&repo_dir)?;
    retrieve_signing_keys(system, config).await?;

    let dependency = &config.dependency_source;
    let dependency_was_installed = is_installed(system, &dependency.name).await;

    let built = build_and_index(system, config, session, &repo_dir).await;

    // Runs on failure too, the next run would otherwise see it as pre-existing
    if !dependency_was_installed && is_installed(system, &dependency.name).await {
        remove_host_dependency(system, session, dependency).await;
    }

    Ok((built?, false))
}

async fn build_and_index(
    system: &dyn SystemWrapper,
    config: &BuildConfiguration,
    session: &PrivilegeSession,
    repo_dir: &Path,
) -> Result<RepositoryArtifact, RepositoryError> {
    let dependency = &config.dependency_source;
    let module = &config.module_source;

    let build_root = config.build_dir();
    let dependency_dir = build_root.join(&dependency.name);
    let module_dir = build_root.join(&module.name);
    // Leftovers from an interrupted run
    remove_build_dir(&dependency_dir)?;
    remove_build_dir(&module_dir)?;
    fs::create_dir_all(&build_root)?;

    // ========================================================================
    // DEPENDENCY: built first and installed, the module build links against it
    // ========================================================================
    fetch_recipe(system, dependency, &dependency_dir).await?;
    build_package(system, session, dependency, &dependency_dir, true).await?;
    let mut packages = publish_artifacts(dependency, &dependency_dir, repo_dir)?;

    // ========================================================================
    // MODULE: reuses the upstream tarball the dependency already downloaded
    // ========================================================================
    fetch_recipe(system, module, &module_dir).await?;
    let shared = sources::copy_shared_sources(&dependency_dir, &module_dir)?;
    log::debug!(
        "[Repository] [SOURCES] Reused {} source bundle(s) for {}",
        shared.len(),
        module.name
    );
    remove_build_dir(&dependency_dir)?;

    build_package(system, session, module, &module_dir, false).await?;
    packages.extend(publish_artifacts(module, &module_dir, repo_dir)?);
    remove_build_dir(&module_dir)?;
    // Only succeeds when empty
    let _ = fs::remove_dir(&build_root);

    // ========================================================================
    // INDEX: only the archives published by this run
    // ========================================================================
    let index = RepositoryArtifact::index_path(repo_dir, &config.repository_name);
    let invocation = Invocation::new("repo-add").arg_path(&index).args(
        packages
            .iter()
            .map(|p| p.to_string_lossy().into_owned()),
    );
    run_checked(system, &invocation)
        .await
        .map_err(RepositoryError::Index)?;

    let artifact = RepositoryArtifact::locate(repo_dir, &config.repository_name)
        .ok_or_else(|| RepositoryError::IndexMissing(index.clone()))?;
    log::info!(
        "[Repository] [INDEX] {} indexed with {} package(s)",
        artifact.name,
        artifact.packages.len()
    );
    Ok(artifact)
}

/// Uninstall the dependency that `makepkg --install` put on the host.
///
/// Failure leaves an extra package installed and is only reported.
async fn remove_host_dependency(
    system: &dyn SystemWrapper,
    session: &PrivilegeSession,
    package: &SourcePackage,
) {
    if let Err(e) = session.refresh(system).await {
        log::warn!("[Repository] [CLEANUP] Could not refresh privileges to remove {}: {}", package.name, e);
        return;
    }
    let invocation = Invocation::new("pacman")
        .args(["-Rns", "--noconfirm", package.name.as_str()])
        .elevated();
    match run_checked(system, &invocation).await {
        Ok(_) => log::info!("[Repository] [CLEANUP] Removed host package {}", package.name),
        Err(e) => log::warn!(
            "[Repository] [CLEANUP] {} is still installed on the host: {}",
            package.name,
            e
        ),
    }
}
