//! Host preflight: the tools every later stage shells out to.
//!
//! `archiso` provides mkarchiso and the base profile, `base-devel` provides
//! makepkg and repo-add. Recipes are cloned through libgit2, so no `git`
//! binary is required.

use crate::error::RepositoryError;
use crate::models::BuildConfiguration;
use crate::repository::is_installed;
use crate::system::{run_checked, Invocation, PrivilegeSession, SystemWrapper};

/// Host packages from `required` that `pacman -Qi` does not know.
pub async fn missing_host_packages(system: &dyn SystemWrapper, required: &[String]) -> Vec<String> {
    let mut missing = Vec::new();
    for package in required {
        if !is_installed(system, package).await {
            missing.push(package.clone());
        }
    }
    missing
}

/// Install whatever host packages are missing.
///
/// # Arguments
/// * `system` - Host operations
/// * `session` - Validated elevation session, refreshed before pacman runs
/// * `config` - Supplies the required package list
///
/// # Returns
/// The packages that had to be installed (empty when the host was ready)
pub async fn ensure_host_packages(
    system: &dyn SystemWrapper,
    session: &PrivilegeSession,
    config: &BuildConfiguration,
) -> Result<Vec<String>, RepositoryError> {
    let missing = missing_host_packages(system, &config.host_packages).await;
    if missing.is_empty() {
        log::info!(
            "[Prep] [HOST] Required packages present: {}",
            config.host_packages.join(", ")
        );
        return Ok(missing);
    }

    log::info!("[Prep] [HOST] Installing missing packages: {}", missing.join(", "));
    session.refresh(system).await?;
    let invocation = Invocation::new("pacman")
        .args(["-S", "--needed", "--noconfirm"])
        .args(&missing)
        .elevated();
    run_checked(system, &invocation)
        .await
        .map_err(RepositoryError::HostPackages)?;

    Ok(missing)
}
