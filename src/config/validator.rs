//! Config validation.

use crate::error::ConfigError;
use crate::models::BuildConfiguration;
use once_cell::sync::Lazy;
use regex::Regex;

static PACKAGE_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9@_+][a-z0-9@._+-]*$").expect("Invalid package name regex"));
static VARIANT_TAG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("Invalid variant tag regex"));
static REPOSITORY_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("Invalid repository name regex"));
static KEY_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(0x)?[0-9A-Fa-f]{8,40}$").expect("Invalid key id regex"));

/// Validate a pacman package name.
///
/// Package names end up as separate process arguments and as whole lines in
/// the package list, so only the characters pacman itself allows are accepted.
pub fn validate_package_name(name: &str) -> Result<(), ConfigError> {
    if !PACKAGE_NAME_REGEX.is_match(name) {
        return Err(ConfigError::ValidationFailed(format!(
            "Invalid package name '{}': only lowercase alphanumerics and @._+- are allowed",
            name
        )));
    }
    Ok(())
}

/// Validate an OpenSSH public key line.
pub fn validate_public_key(key: &str) -> Result<(), ConfigError> {
    let line = key.strip_suffix('\n').unwrap_or(key);
    if line.trim().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Public key cannot be empty".to_string(),
        ));
    }
    if line.contains('\n') || line.contains('\r') {
        return Err(ConfigError::ValidationFailed(
            "Public key must be a single line".to_string(),
        ));
    }
    let mut fields = line.split_whitespace();
    match (fields.next(), fields.next()) {
        (Some(kind), Some(_blob)) if kind.starts_with("ssh-") || kind.starts_with("ecdsa-") || kind.starts_with("sk-") => Ok(()),
        _ => Err(ConfigError::ValidationFailed(format!(
            "Public key does not look like an OpenSSH key: {}",
            line.chars().take(24).collect::<String>()
        ))),
    }
}

/// Validate the merged build configuration.
pub fn validate_build_configuration(config: &BuildConfiguration) -> Result<(), ConfigError> {
    validate_package_name(&config.kernel)?;
    validate_package_name(&config.default_kernel)?;

    if config.kernel == config.default_kernel {
        return Err(ConfigError::ValidationFailed(format!(
            "Replacement kernel '{}' is the kernel the base profile already ships",
            config.kernel
        )));
    }

    if !VARIANT_TAG_REGEX.is_match(&config.variant_tag) {
        return Err(ConfigError::ValidationFailed(format!(
            "Invalid image variant tag '{}': use lowercase alphanumerics and '-'",
            config.variant_tag
        )));
    }

    if !REPOSITORY_NAME_REGEX.is_match(&config.repository_name) {
        return Err(ConfigError::ValidationFailed(format!(
            "Invalid repository name '{}'",
            config.repository_name
        )));
    }

    for package in &config.add_packages {
        validate_package_name(package)?;
    }

    for replacement in &config.replacements {
        validate_package_name(&replacement.old)?;
        validate_package_name(&replacement.new)?;
    }
    // Boot entries point at the replacement kernel, the package list must too
    if !config
        .replacements
        .iter()
        .any(|r| r.old == config.default_kernel && r.new == config.kernel)
    {
        return Err(ConfigError::ValidationFailed(format!(
            "Package replacements must swap '{}' for '{}'",
            config.default_kernel, config.kernel
        )));
    }

    for source in [&config.dependency_source, &config.module_source] {
        validate_package_name(&source.name)?;
        if source.git_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(format!(
                "Source URL for '{}' cannot be empty",
                source.name
            )));
        }
    }

    if config.signing_keys.is_empty() {
        return Err(ConfigError::ValidationFailed(
            "At least one maintainer signing key is required".to_string(),
        ));
    }
    for key in &config.signing_keys {
        if !KEY_ID_REGEX.is_match(key) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid signing key id '{}'",
                key
            )));
        }
    }

    for package in &config.host_packages {
        validate_package_name(package)?;
    }

    if let Some(key) = &config.ssh_public_key {
        validate_public_key(key)?;
    }

    if !config.work_root.is_absolute() || !config.artifact_dir.is_absolute() {
        return Err(ConfigError::ValidationFailed(
            "Working root and artifact directory must be absolute paths".to_string(),
        ));
    }

    Ok(())
}
