//! Configuration module for image builds.
//!
//! The build is fully described by compiled-in defaults. An optional TOML file
//! can override individual fields; nothing is read from ambient state after
//! `load_build_configuration` returns.
//!
//! # Module Structure
//!
//! - `loader`: locates and parses the optional override file
//! - `validator`: rejects values that would be unsafe to hand to external tools
//!
//! # Configuration Flow
//!
//! 1. `defaults` builds the compiled-in configuration for a working root
//! 2. `loader` overlays any fields set in the override file
//! 3. `validator` checks the merged configuration
//! 4. The resulting `BuildConfiguration` is passed by reference to every stage

pub mod loader;
pub mod validator;

pub use loader::{config_file_path, load_build_configuration, ConfigFile};
pub use validator::validate_build_configuration;

use crate::models::{BuildConfiguration, PackageReplacement, SourcePackage};
use std::path::{Path, PathBuf};

/// Kernel carried by the image instead of the stock one.
pub const DEFAULT_KERNEL: &str = "linux-lts";

/// Kernel package shipped by the upstream releng profile.
pub const STOCK_KERNEL: &str = "linux";

pub const DEFAULT_VARIANT_TAG: &str = "zfs";

pub const DEFAULT_REPOSITORY_NAME: &str = "zfsrepo";

pub const DEFAULT_BASE_PROFILE: &str = "/usr/share/archiso/configs/releng";

pub const DEFAULT_KEYSERVER: &str = "hkps://keyserver.ubuntu.com";

/// OpenZFS release signing keys (Tony Hutter, Brian Behlendorf).
pub const OPENZFS_SIGNING_KEYS: &[&str] = &[
    "4F3BA9AB6D1F8D683DC2DFB56AD860EED4598027",
    "C33DF142657ED1F7C328A2960AB9E991C6AF658B",
];

pub const HOST_PACKAGES: &[&str] = &["archiso", "base-devel"];

/// Compiled-in configuration rooted at `work_root`.
///
/// The ISO is delivered to `work_root` as well.
pub fn defaults(work_root: &Path) -> BuildConfiguration {
    BuildConfiguration {
        kernel: DEFAULT_KERNEL.to_string(),
        default_kernel: STOCK_KERNEL.to_string(),
        variant_tag: DEFAULT_VARIANT_TAG.to_string(),
        add_packages: vec![
            format!("{}-headers", DEFAULT_KERNEL),
            "zfs-dkms".to_string(),
            "zfs-utils".to_string(),
        ],
        replacements: vec![
            PackageReplacement::new(STOCK_KERNEL, DEFAULT_KERNEL),
            PackageReplacement::new("broadcom-wl", "broadcom-wl-dkms"),
        ],
        ssh_public_key: None,
        base_profile: PathBuf::from(DEFAULT_BASE_PROFILE),
        repository_name: DEFAULT_REPOSITORY_NAME.to_string(),
        dependency_source: SourcePackage::aur("zfs-utils"),
        module_source: SourcePackage::aur("zfs-dkms"),
        signing_keys: OPENZFS_SIGNING_KEYS.iter().map(|k| k.to_string()).collect(),
        keyserver: DEFAULT_KEYSERVER.to_string(),
        host_packages: HOST_PACKAGES.iter().map(|p| p.to_string()).collect(),
        work_root: work_root.to_path_buf(),
        artifact_dir: work_root.to_path_buf(),
    }
}
