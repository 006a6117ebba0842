//! Profile mutator.
//!
//! Clones the base archiso profile into a fresh `ProfileTree` and applies the
//! fixed sequence of edits: repository registration, package list, boot
//! mechanisms, branding and optional remote access.

pub mod boot;
pub mod branding;
pub mod packages;
pub mod remote_access;

use crate::error::MutationError;
use crate::models::{BuildConfiguration, ProfileTree};
use crate::patcher::append_text;
use crate::system::{run_checked, Invocation, PrivilegeSession, SystemWrapper};
use std::fs;
use std::io;
use std::path::Path;

/// Recursively copy `src` into `dest`, recreating symlinks as symlinks.
fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dest.join(entry.file_name());

        if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Remove a previous tree. mkarchiso leaves root-owned files in `work/`, so
/// a permission failure is retried through sudo.
pub async fn remove_previous_tree(
    system: &dyn SystemWrapper,
    session: &PrivilegeSession,
    root: &Path,
) -> Result<(), MutationError> {
    if !root.exists() {
        return Ok(());
    }
    log::info!("[Profile] [CLEAN] Removing previous tree {}", root.display());
    match fs::remove_dir_all(root) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            session.refresh(system).await?;
            let invocation = Invocation::new("rm").args(["-rf", "--"]).arg_path(root).elevated();
            run_checked(system, &invocation)
                .await
                .map_err(MutationError::Cleanup)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Create a fresh `ProfileTree` at `root` holding a copy of `base_profile`.
pub async fn materialize_profile(
    system: &dyn SystemWrapper,
    session: &PrivilegeSession,
    base_profile: &Path,
    root: &Path,
) -> Result<ProfileTree, MutationError> {
    if !base_profile.is_dir() {
        return Err(MutationError::BaseProfileMissing(base_profile.to_path_buf()));
    }
    remove_previous_tree(system, session, root).await?;

    let tree = ProfileTree::new(root);
    copy_tree(base_profile, &tree.profile)?;
    log::info!(
        "[Profile] [CLONE] {} -> {}",
        base_profile.display(),
        tree.profile.display()
    );
    Ok(tree)
}

/// Make the local repository available to mkarchiso's pacman.
pub fn register_repository(
    tree: &ProfileTree,
    config: &BuildConfiguration,
) -> Result<(), MutationError> {
    let section = format!(
        "\n[{}]\nSigLevel = Optional TrustAll\nServer = file://{}\n",
        config.repository_name,
        config.repository_dir().display()
    );
    append_text(&tree.pacman_conf(), &section)?;
    log::info!(
        "[Profile] [REPO] Registered [{}] in pacman.conf",
        config.repository_name
    );
    Ok(())
}

/// Clone the base profile and apply every edit in order.
pub async fn mutate_profile(
    system: &dyn SystemWrapper,
    session: &PrivilegeSession,
    config: &BuildConfiguration,
) -> Result<ProfileTree, MutationError> {
    let tree = materialize_profile(
        system,
        session,
        &config.base_profile,
        &config.profile_tree_root(),
    )
    .await?;

    register_repository(&tree, config)?;
    packages::edit_package_list(&tree, config)?;
    boot::patch_boot_mechanisms(&tree, config)?;
    branding::rebrand(&tree, config)?;
    remote_access::inject_remote_access(system, &tree, config).await?;

    Ok(tree)
}
