//! Package list editing.

use crate::error::MutationError;
use crate::models::{BuildConfiguration, ProfileTree};
use crate::patcher::{apply_patch, PatchOperation};
use std::collections::BTreeSet;
use std::fs;

/// Append `add` to the list and return the sorted, de-duplicated result.
///
/// Ordering is byte-wise, matching `LC_ALL=C sort -u`. Blank lines are dropped.
pub fn merge_package_list(content: &str, add: &[String]) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .chain(add.iter().map(|p| p.trim()))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

/// Apply the package replacements and additions to `packages.x86_64`.
///
/// # Returns
/// The final package list
pub fn edit_package_list(
    tree: &ProfileTree,
    config: &BuildConfiguration,
) -> Result<Vec<String>, MutationError> {
    let list = tree.package_list();

    for replacement in &config.replacements {
        let op = PatchOperation::replace_line(&list, &replacement.old, &replacement.new);
        if apply_patch(&op)? == 0 {
            let missing = MutationError::ReplacementNotFound {
                old: replacement.old.clone(),
                file: list.clone(),
            };
            log::warn!("[Profile] [PACKAGES] {}", missing);
        } else {
            log::info!(
                "[Profile] [PACKAGES] {} -> {}",
                replacement.old,
                replacement.new
            );
        }
    }

    let content = fs::read_to_string(&list)?;
    let merged = merge_package_list(&content, &config.add_packages);
    let mut output = merged.join("\n");
    output.push('\n');
    fs::write(&list, output)?;

    log::info!(
        "[Profile] [PACKAGES] {} package(s) after adding {}",
        merged.len(),
        config.add_packages.join(", ")
    );
    Ok(merged)
}
