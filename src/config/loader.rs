//! Optional override file loader.
//!
//! The override file is TOML. Every field is optional; fields that are set
//! replace the compiled-in default wholesale (lists are not merged).
//!
//! ```toml
//! kernel = "linux-zen"
//! variant_tag = "zfs-zen"
//! add_packages = ["linux-zen-headers", "zfs-dkms", "zfs-utils"]
//! ssh_public_key_file = "/home/admin/.ssh/id_ed25519.pub"
//!
//! [[replacements]]
//! old = "linux"
//! new = "linux-zen"
//! ```

use crate::config::{defaults, validate_build_configuration};
use crate::error::ConfigError;
use crate::models::{BuildConfiguration, PackageReplacement, SourcePackage};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit override file.
pub const CONFIG_ENV_VAR: &str = "ARCHISO_ZFS_CONFIG";

/// Override file contents.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub kernel: Option<String>,
    pub default_kernel: Option<String>,
    pub variant_tag: Option<String>,
    pub add_packages: Option<Vec<String>>,
    pub replacements: Option<Vec<PackageReplacement>>,
    pub ssh_public_key: Option<String>,
    /// Read the public key from this file instead of `ssh_public_key`
    pub ssh_public_key_file: Option<PathBuf>,
    pub base_profile: Option<PathBuf>,
    pub repository_name: Option<String>,
    pub dependency_source: Option<SourcePackage>,
    pub module_source: Option<SourcePackage>,
    pub signing_keys: Option<Vec<String>>,
    pub keyserver: Option<String>,
    pub host_packages: Option<Vec<String>>,
    pub artifact_dir: Option<PathBuf>,
}

impl ConfigFile {
    /// Overlay the set fields onto `base`.
    ///
    /// A kernel change carries over to the kernel replacement and the headers
    /// package unless the file sets `replacements` or `add_packages` itself.
    pub fn apply(self, mut base: BuildConfiguration) -> Result<BuildConfiguration, ConfigError> {
        let previous = PackageReplacement::new(&base.default_kernel, &base.kernel);
        if let Some(kernel) = self.kernel {
            base.kernel = kernel;
        }
        if let Some(default_kernel) = self.default_kernel {
            base.default_kernel = default_kernel;
        }
        let current = PackageReplacement::new(&base.default_kernel, &base.kernel);

        if let Some(tag) = self.variant_tag {
            base.variant_tag = tag;
        }
        match self.add_packages {
            Some(packages) => base.add_packages = packages,
            None => {
                let old_headers = format!("{}-headers", previous.new);
                for package in base.add_packages.iter_mut().filter(|p| **p == old_headers) {
                    *package = format!("{}-headers", current.new);
                }
            }
        }
        match self.replacements {
            Some(replacements) => base.replacements = replacements,
            None => {
                for replacement in base.replacements.iter_mut().filter(|r| **r == previous) {
                    *replacement = current.clone();
                }
            }
        }
        match (self.ssh_public_key, self.ssh_public_key_file) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::ValidationFailed(
                    "Set either ssh_public_key or ssh_public_key_file, not both".to_string(),
                ))
            }
            (Some(key), None) => base.ssh_public_key = Some(key),
            (None, Some(path)) => {
                let key = fs::read_to_string(&path).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        ConfigError::FileNotFound(format!(
                            "Public key file not found at: {}",
                            path.display()
                        ))
                    } else {
                        ConfigError::IoError(e)
                    }
                })?;
                base.ssh_public_key = Some(key);
            }
            (None, None) => {}
        }
        if let Some(profile) = self.base_profile {
            base.base_profile = profile;
        }
        if let Some(name) = self.repository_name {
            base.repository_name = name;
        }
        if let Some(source) = self.dependency_source {
            base.dependency_source = source;
        }
        if let Some(source) = self.module_source {
            base.module_source = source;
        }
        if let Some(keys) = self.signing_keys {
            base.signing_keys = keys;
        }
        if let Some(keyserver) = self.keyserver {
            base.keyserver = keyserver;
        }
        if let Some(packages) = self.host_packages {
            base.host_packages = packages;
        }
        if let Some(dir) = self.artifact_dir {
            base.artifact_dir = dir;
        }
        Ok(base)
    }
}

/// Path of the override file: `$ARCHISO_ZFS_CONFIG`, else
/// `~/.config/archiso-zfs/config.toml`.
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(explicit));
    }
    dirs::config_dir().map(|dir| dir.join("archiso-zfs").join("config.toml"))
}

/// Parse an override file.
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Configuration file not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let file: ConfigFile = toml::from_str(&content)?;
    Ok(file)
}

/// Build the configuration for a run rooted at `work_root`.
///
/// A missing override file is not an error; an explicitly named one
/// (`$ARCHISO_ZFS_CONFIG`) must exist.
pub fn load_build_configuration(work_root: &Path) -> Result<BuildConfiguration, ConfigError> {
    let explicit = std::env::var_os(CONFIG_ENV_VAR).is_some();
    let base = defaults(work_root);

    let config = match config_file_path() {
        Some(path) if path.exists() || explicit => {
            log::info!("[Config] Loading overrides from {}", path.display());
            load_config_file(&path)?.apply(base)?
        }
        _ => {
            log::debug!("[Config] No override file, using compiled-in defaults");
            base
        }
    };

    validate_build_configuration(&config)?;
    Ok(config)
}
