//! Image branding: ISO name, volume label and login banner.

use crate::error::MutationError;
use crate::models::{BuildConfiguration, ProfileTree};
use crate::patcher::{append_text, apply_patch, PatchOperation};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

static ISO_NAME_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^iso_name=.*$").expect("Invalid iso_name regex"));
static ISO_LABEL_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^iso_label=.*$").expect("Invalid iso_label regex"));

const LABEL_PREFIX: &str = "\"ARCH_";

fn find_line(content: &str, regex: &Regex, field: &str, file: &Path) -> Result<String, MutationError> {
    regex
        .find(content)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| MutationError::DefinitionFieldMissing {
            field: field.to_string(),
            file: file.to_path_buf(),
        })
}

/// New `iso_label=` line carrying the uppercase variant tag.
pub fn branded_label(line: &str, label_tag: &str) -> Option<String> {
    line.contains(LABEL_PREFIX)
        .then(|| line.replacen(LABEL_PREFIX, &format!("\"ARCH_{}_", label_tag), 1))
}

fn motd_banner(config: &BuildConfiguration) -> String {
    format!(
        "\nThis image was built by archiso-zfs.\n\
         It boots {} and carries ZFS from the local [{}] repository.\n\
         Load the module with: modprobe zfs\n",
        config.kernel, config.repository_name
    )
}

/// Rename the image after its variant and tag the login banner.
pub fn rebrand(tree: &ProfileTree, config: &BuildConfiguration) -> Result<(), MutationError> {
    let profiledef = tree.profiledef();
    let content = fs::read_to_string(&profiledef)?;

    let name_line = find_line(&content, &ISO_NAME_LINE, "iso_name", &profiledef)?;
    let label_line = find_line(&content, &ISO_LABEL_LINE, "iso_label", &profiledef)?;

    apply_patch(&PatchOperation::replace_line(
        &profiledef,
        &name_line,
        &format!("iso_name=\"{}\"", config.iso_name()),
    ))?;

    let label_tag = config.label_tag();
    let new_label = match branded_label(&label_line, &label_tag) {
        Some(line) => line,
        None => {
            log::warn!(
                "[Profile] [BRAND] iso_label has no \"ARCH_ prefix, replacing the whole value"
            );
            format!("iso_label=\"ARCH_{}_$(date +%Y%m)\"", label_tag)
        }
    };
    apply_patch(&PatchOperation::replace_line(&profiledef, &label_line, &new_label))?;

    append_text(&tree.motd(), &motd_banner(config))?;
    log::info!(
        "[Profile] [BRAND] iso_name={} label tag {}",
        config.iso_name(),
        label_tag
    );
    Ok(())
}
