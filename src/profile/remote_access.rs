//! Optional remote root access for the live system.
//!
//! The public key is installed as root's `authorized_keys` and the
//! profile's permission manifest gets matching entries, since mkarchiso
//! otherwise resets ownership and modes of everything under airootfs.

use crate::error::MutationError;
use crate::models::{BuildConfiguration, ProfileTree};
use crate::patcher::{append_text, apply_patch, PatchOperation};
use crate::system::{run_checked, Invocation, SystemWrapper};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

static ROOT_PERMISSION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^([ \t]*)\["/root"\]="\d+:\d+:\d+"[ \t]*$"#)
        .expect("Invalid root permission regex")
});

const SSH_DIR_MODE: u32 = 0o700;
const AUTHORIZED_KEYS_MODE: u32 = 0o600;

/// Write `key` byte-for-byte as root's authorized_keys inside airootfs.
pub fn install_authorized_key(tree: &ProfileTree, key: &str) -> Result<PathBuf, MutationError> {
    let ssh_dir = tree.airootfs().join("root/.ssh");
    fs::create_dir_all(&ssh_dir)?;
    fs::set_permissions(&ssh_dir, fs::Permissions::from_mode(SSH_DIR_MODE))?;

    let path = ssh_dir.join("authorized_keys");
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(AUTHORIZED_KEYS_MODE)
        .open(&path)?;
    file.write_all(key.as_bytes())?;
    fs::set_permissions(&path, fs::Permissions::from_mode(AUTHORIZED_KEYS_MODE))?;
    Ok(path)
}

/// Insert the `.ssh` permission entries right after the `/root` entry.
pub fn add_permission_entries(profiledef: &Path) -> Result<(), MutationError> {
    let content = fs::read_to_string(profiledef)?;
    let anchors: Vec<_> = ROOT_PERMISSION_LINE.captures_iter(&content).collect();
    let [anchor] = anchors.as_slice() else {
        return Err(MutationError::PermissionAnchorNotFound(profiledef.to_path_buf()));
    };

    let indent = anchor.get(1).map(|m| m.as_str()).unwrap_or("");
    let line = anchor.get(0).map(|m| m.as_str()).unwrap_or("");
    let entries = format!(
        "{indent}[\"/root/.ssh\"]=\"0:0:700\"\n{indent}[\"/root/.ssh/authorized_keys\"]=\"0:0:600\"",
        indent = indent
    );

    let inserted = apply_patch(&PatchOperation::insert_after_line(profiledef, line, &entries))?;
    if inserted != 1 {
        return Err(MutationError::PermissionAnchorNotFound(profiledef.to_path_buf()));
    }
    Ok(())
}

/// Enable key-based root login on the live system, if a key is configured.
///
/// # Returns
/// `true` if access was injected
pub async fn inject_remote_access(
    system: &dyn SystemWrapper,
    tree: &ProfileTree,
    config: &BuildConfiguration,
) -> Result<bool, MutationError> {
    let Some(key) = config.ssh_public_key.as_deref() else {
        log::info!("[Profile] [SSH] No public key configured, remote access not enabled");
        return Ok(false);
    };

    let keyfile = install_authorized_key(tree, key)?;
    add_permission_entries(&tree.profiledef())?;

    let output = run_checked(
        system,
        &Invocation::new("ssh-keygen").arg("-l").arg("-f").arg_path(&keyfile),
    )
    .await
    .map_err(MutationError::Fingerprint)?;
    let fingerprint = output.stdout.trim();

    append_text(
        &tree.motd(),
        &format!("\nRemote root login over SSH is enabled for:\n  {}\n", fingerprint),
    )?;
    log::info!("[Profile] [SSH] Remote root access enabled for {}", fingerprint);
    Ok(true)
}
