//! Boot mechanism patching.
//!
//! The kernel image and initramfs names of the stock kernel are spelled out in
//! four places: the mkinitcpio preset, syslinux, systemd-boot entries and
//! GRUB. All of them are rewritten to the replacement kernel and then checked
//! for leftovers.

use crate::error::{MutationError, PatchError};
use crate::models::{BootMechanism, BootMechanismReference, BuildConfiguration, ProfileTree};
use crate::patcher::{apply_patch, count_literal, PatchOperation};
use std::fs;
use std::path::{Path, PathBuf};

/// Files patched for one mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MechanismReport {
    pub mechanism: BootMechanism,
    pub files: Vec<PathBuf>,
    pub replacements: usize,
}

fn preset_comment(kernel: &str) -> String {
    format!("# mkinitcpio preset file for the '{}' package on archiso", kernel)
}

/// Occurrences of `old` in a file that are not part of an occurrence of `new`.
///
/// `vmlinuz-linux-lts` contains `vmlinuz-linux`, so the replacement names are
/// blanked out before counting.
pub fn stale_references(path: &Path, old: &str, new: &str) -> Result<usize, MutationError> {
    if !new.contains(old) {
        return Ok(count_literal(path, old)?);
    }
    let content = fs::read_to_string(path)?;
    Ok(content.replace(new, "").matches(old).count())
}

/// Rename `<default>.preset` to `<kernel>.preset` and rewrite its header.
fn rename_preset(dir: &Path, config: &BuildConfiguration) -> Result<PathBuf, MutationError> {
    let original = dir.join(format!("{}.preset", config.default_kernel));
    if !original.is_file() {
        return Err(PatchError::TargetMissing(original).into());
    }
    let renamed = dir.join(format!("{}.preset", config.kernel));
    fs::rename(&original, &renamed)?;

    let header = PatchOperation::replace_line(
        &renamed,
        &preset_comment(&config.default_kernel),
        &format!("{} (modified by archiso-zfs)", preset_comment(&config.kernel)),
    );
    if apply_patch(&header)? == 0 {
        log::warn!(
            "[Profile] [BOOT] Preset header not found in {}",
            renamed.display()
        );
    }
    Ok(renamed)
}

fn config_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, MutationError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map(|e| e == extension).unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Point one mechanism at the replacement kernel.
///
/// # Returns
/// `None` when the profile does not contain this mechanism
pub fn patch_mechanism(
    tree: &ProfileTree,
    config: &BuildConfiguration,
    mechanism: BootMechanism,
) -> Result<Option<MechanismReport>, MutationError> {
    let dir = tree.profile.join(mechanism.config_dir());
    if !dir.is_dir() {
        log::warn!(
            "[Profile] [BOOT] No {} configuration in this profile ({} missing), skipping",
            mechanism,
            dir.display()
        );
        return Ok(None);
    }

    let files = match mechanism {
        BootMechanism::Mkinitcpio => vec![rename_preset(&dir, config)?],
        _ => config_files(&dir, mechanism.config_extension())?,
    };

    let from = BootMechanismReference::for_kernel(&config.default_kernel);
    let to = BootMechanismReference::for_kernel(&config.kernel);
    let mut replacements = 0;

    for file in &files {
        for (old, new) in from.pairs(&to) {
            replacements += apply_patch(&PatchOperation::replace_substring(file, old, new))?;
        }
        for (old, new) in from.pairs(&to) {
            if stale_references(file, old, new)? > 0 {
                return Err(MutationError::StaleBootReference {
                    file: file.clone(),
                    reference: old.to_string(),
                });
            }
        }
    }

    log::info!(
        "[Profile] [BOOT] {}: {} reference(s) rewritten across {} file(s)",
        mechanism,
        replacements,
        files.len()
    );
    Ok(Some(MechanismReport {
        mechanism,
        files,
        replacements,
    }))
}

/// Patch all four boot mechanisms.
pub fn patch_boot_mechanisms(
    tree: &ProfileTree,
    config: &BuildConfiguration,
) -> Result<Vec<MechanismReport>, MutationError> {
    let mut reports = Vec::new();
    for mechanism in BootMechanism::ALL {
        if let Some(report) = patch_mechanism(tree, config, mechanism)? {
            reports.push(report);
        }
    }
    Ok(reports)
}
