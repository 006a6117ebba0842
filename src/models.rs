//! Core data types for archiso-zfs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A package built from an AUR source recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePackage {
    /// Package name, also the name of the per-package working directory
    pub name: String,
    /// Git URL of the recipe (PKGBUILD and friends)
    pub git_url: String,
}

impl SourcePackage {
    /// Recipe hosted on the AUR under its package name.
    pub fn aur(name: &str) -> Self {
        SourcePackage {
            name: name.to_string(),
            git_url: format!("https://aur.archlinux.org/{}.git", name),
        }
    }
}

/// Whole-line package list replacement (old -> new).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReplacement {
    pub old: String,
    pub new: String,
}

impl PackageReplacement {
    pub fn new(old: &str, new: &str) -> Self {
        PackageReplacement {
            old: old.to_string(),
            new: new.to_string(),
        }
    }
}

/// Immutable description of one image build.
///
/// Constructed once at startup (compiled-in defaults plus an optional
/// override file) and passed by reference to every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    /// Replacement kernel package, e.g. `linux-lts`
    pub kernel: String,
    /// Kernel package the base profile ships, e.g. `linux`
    pub default_kernel: String,
    /// Image variant tag, e.g. `zfs`
    pub variant_tag: String,
    /// Packages appended to the profile's package list
    pub add_packages: Vec<String>,
    /// Ordered package list replacements
    pub replacements: Vec<PackageReplacement>,
    /// Optional OpenSSH public key granting remote root access to the live system
    pub ssh_public_key: Option<String>,
    /// Upstream profile that gets cloned
    pub base_profile: PathBuf,
    /// Name of the local package repository
    pub repository_name: String,
    /// Recipe built first and installed on the host (`zfs-utils`)
    pub dependency_source: SourcePackage,
    /// Recipe built second, depends on the first (`zfs-dkms`)
    pub module_source: SourcePackage,
    /// Maintainer key IDs that sign the upstream source tarballs
    pub signing_keys: Vec<String>,
    pub keyserver: String,
    /// Host packages required before anything is built
    pub host_packages: Vec<String>,
    /// Directory holding the repository and the transient profile tree
    pub work_root: PathBuf,
    /// Directory receiving the finished ISO
    pub artifact_dir: PathBuf,
}

impl BuildConfiguration {
    /// `archlinux-<tag>`
    pub fn iso_name(&self) -> String {
        format!("archlinux-{}", self.variant_tag)
    }

    /// Uppercase variant of the tag, used in the volume label.
    pub fn label_tag(&self) -> String {
        self.variant_tag.to_uppercase().replace('-', "_")
    }

    pub fn repository_dir(&self) -> PathBuf {
        self.work_root.join(&self.repository_name)
    }

    /// Parent of the per-package build directories.
    pub fn build_dir(&self) -> PathBuf {
        self.work_root.join("build")
    }

    pub fn profile_tree_root(&self) -> PathBuf {
        self.work_root.join(format!("archlive-{}", self.variant_tag))
    }
}

/// Built packages plus the repository database indexing them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryArtifact {
    pub name: String,
    pub dir: PathBuf,
    pub index: PathBuf,
    pub packages: Vec<PathBuf>,
}

impl RepositoryArtifact {
    /// Path of the repository database for `name` inside `dir`.
    pub fn index_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.db.tar.gz", name))
    }

    /// Returns the repository if its index exists.
    ///
    /// Directory presence alone is not enough: an interrupted build leaves
    /// package archives behind without an index.
    pub fn locate(dir: &Path, name: &str) -> Option<Self> {
        let index = Self::index_path(dir, name);
        if !dir.is_dir() || !index.is_file() {
            return None;
        }

        let mut packages: Vec<PathBuf> = fs::read_dir(dir)
            .ok()?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .map(|n| n.to_string_lossy().ends_with(".pkg.tar.zst"))
                    .unwrap_or(false)
            })
            .collect();
        packages.sort();

        Some(RepositoryArtifact {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            index,
            packages,
        })
    }
}

/// Working copy of the archiso profile plus mkarchiso's scratch directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileTree {
    pub root: PathBuf,
    pub profile: PathBuf,
    pub work: PathBuf,
    pub out: PathBuf,
}

impl ProfileTree {
    pub fn new(root: &Path) -> Self {
        ProfileTree {
            root: root.to_path_buf(),
            profile: root.join("profile"),
            work: root.join("work"),
            out: root.join("out"),
        }
    }

    pub fn airootfs(&self) -> PathBuf {
        self.profile.join("airootfs")
    }

    pub fn package_list(&self) -> PathBuf {
        self.profile.join("packages.x86_64")
    }

    pub fn pacman_conf(&self) -> PathBuf {
        self.profile.join("pacman.conf")
    }

    pub fn profiledef(&self) -> PathBuf {
        self.profile.join("profiledef.sh")
    }

    pub fn motd(&self) -> PathBuf {
        self.airootfs().join("etc/motd")
    }
}

/// Subsystems that each need to be told which kernel and initramfs to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootMechanism {
    /// mkinitcpio preset generating the archiso initramfs
    Mkinitcpio,
    /// BIOS boot via syslinux
    Syslinux,
    /// UEFI boot via systemd-boot
    SystemdBoot,
    /// GRUB (UEFI and loopback boot)
    Grub,
}

impl BootMechanism {
    pub const ALL: [BootMechanism; 4] = [
        BootMechanism::Mkinitcpio,
        BootMechanism::Syslinux,
        BootMechanism::SystemdBoot,
        BootMechanism::Grub,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BootMechanism::Mkinitcpio => "mkinitcpio",
            BootMechanism::Syslinux => "syslinux",
            BootMechanism::SystemdBoot => "systemd-boot",
            BootMechanism::Grub => "grub",
        }
    }

    /// Directory (relative to the profile) holding this mechanism's files.
    pub fn config_dir(&self) -> &'static str {
        match self {
            BootMechanism::Mkinitcpio => "airootfs/etc/mkinitcpio.d",
            BootMechanism::Syslinux => "syslinux",
            BootMechanism::SystemdBoot => "efiboot/loader/entries",
            BootMechanism::Grub => "grub",
        }
    }

    /// File extension of the configuration files in `config_dir`.
    pub fn config_extension(&self) -> &'static str {
        match self {
            BootMechanism::Mkinitcpio => "preset",
            BootMechanism::Syslinux => "cfg",
            BootMechanism::SystemdBoot => "conf",
            BootMechanism::Grub => "cfg",
        }
    }
}

impl fmt::Display for BootMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kernel image / initramfs filename prefixes belonging to one kernel package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootMechanismReference {
    pub kernel_image: String,
    pub init_image: String,
}

impl BootMechanismReference {
    pub fn for_kernel(kernel: &str) -> Self {
        BootMechanismReference {
            kernel_image: format!("vmlinuz-{}", kernel),
            init_image: format!("initramfs-{}", kernel),
        }
    }

    pub fn pairs<'a>(&'a self, to: &'a BootMechanismReference) -> [(&'a str, &'a str); 2] {
        [
            (self.kernel_image.as_str(), to.kernel_image.as_str()),
            (self.init_image.as_str(), to.init_image.as_str()),
        ]
    }
}
