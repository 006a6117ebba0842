//! Profile mutation as a whole: one clone, every edit, checked from outside.

mod common;

use archiso_zfs::models::{BootMechanism, PackageReplacement, ProfileTree};
use archiso_zfs::profile::{mutate_profile, packages};
use archiso_zfs::system::mock::{MockSystem, MOCK_FINGERPRINT};
use archiso_zfs::system::privilege;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(files_under(&path));
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    files
}

async fn mutated(config: &archiso_zfs::BuildConfiguration) -> (MockSystem, ProfileTree) {
    let system = MockSystem::new();
    let session = privilege::acquire(&system).await.unwrap();
    let tree = mutate_profile(&system, &session, config).await.unwrap();
    (system, tree)
}

#[test]
fn test_package_list_example() {
    let temp = tempfile::TempDir::new().unwrap();
    let tree = ProfileTree::new(&temp.path().join("archlive-zfs"));
    fs::create_dir_all(&tree.profile).unwrap();
    fs::write(tree.package_list(), "a\nlinux\nz\n").unwrap();

    let mut config = archiso_zfs::config::defaults(temp.path());
    config.replacements = vec![PackageReplacement::new("linux", "linux-lts")];
    config.add_packages = vec!["dkms".to_string()];

    let list = packages::edit_package_list(&tree, &config).unwrap();
    assert_eq!(list, vec!["a", "dkms", "linux-lts", "z"]);
    assert_eq!(
        fs::read_to_string(tree.package_list()).unwrap(),
        "a\ndkms\nlinux-lts\nz\n"
    );
}

#[tokio::test]
async fn test_package_list_has_replacements_and_additions() {
    let (_temp, config) = common::workspace();
    let (_system, tree) = mutated(&config).await;

    let content = fs::read_to_string(tree.package_list()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert!(!lines.contains(&"linux"));
    for package in ["linux-lts", "linux-lts-headers", "zfs-dkms", "zfs-utils", "linux-firmware"] {
        assert!(lines.contains(&package), "{} missing", package);
    }
    let mut sorted = lines.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(lines, sorted);
}

#[tokio::test]
async fn test_every_boot_mechanism_points_at_replacement_kernel() {
    let (_temp, config) = common::workspace();
    let (_system, tree) = mutated(&config).await;

    assert!(!tree.airootfs().join("etc/mkinitcpio.d/linux.preset").exists());
    let preset =
        fs::read_to_string(tree.airootfs().join("etc/mkinitcpio.d/linux-lts.preset")).unwrap();
    assert!(preset.contains("'linux-lts' package on archiso (modified by archiso-zfs)"));

    for mechanism in BootMechanism::ALL {
        let dir = tree.profile.join(mechanism.config_dir());
        let files = files_under(&dir);
        assert!(!files.is_empty(), "{} has no files", mechanism);
        for file in files {
            let content = fs::read_to_string(&file).unwrap();
            let stale = content.replace("vmlinuz-linux-lts", "").replace("initramfs-linux-lts", "");
            assert!(!stale.contains("vmlinuz-linux"), "{}", file.display());
            assert!(!stale.contains("initramfs-linux"), "{}", file.display());
            assert!(content.contains("vmlinuz-linux-lts"), "{}", file.display());
        }
    }
}

#[tokio::test]
async fn test_repository_registered_and_image_rebranded() {
    let (_temp, config) = common::workspace();
    let (_system, tree) = mutated(&config).await;

    let pacman_conf = fs::read_to_string(tree.pacman_conf()).unwrap();
    assert!(pacman_conf.contains(&format!(
        "[zfsrepo]\nSigLevel = Optional TrustAll\nServer = file://{}\n",
        config.repository_dir().display()
    )));

    let profiledef = fs::read_to_string(tree.profiledef()).unwrap();
    assert!(profiledef.contains("iso_name=\"archlinux-zfs\""));
    assert!(profiledef.contains("iso_label=\"ARCH_ZFS_$(date +%Y%m)\""));
    assert!(!profiledef.contains("/root/.ssh"));
}

#[tokio::test]
async fn test_remote_access_injected_when_key_configured() {
    let (_temp, mut config) = common::workspace();
    config.ssh_public_key = Some(common::KEY.to_string());
    let (system, tree) = mutated(&config).await;

    let keyfile = tree.airootfs().join("root/.ssh/authorized_keys");
    assert_eq!(fs::read(&keyfile).unwrap(), common::KEY.as_bytes());
    assert_eq!(
        fs::metadata(&keyfile).unwrap().permissions().mode() & 0o777,
        0o600
    );

    let profiledef = fs::read_to_string(tree.profiledef()).unwrap();
    let lines: Vec<&str> = profiledef.lines().collect();
    let root = lines
        .iter()
        .position(|l| l.trim() == "[\"/root\"]=\"0:0:750\"")
        .unwrap();
    assert_eq!(lines[root + 1].trim(), "[\"/root/.ssh\"]=\"0:0:700\"");
    assert_eq!(lines[root + 2].trim(), "[\"/root/.ssh/authorized_keys\"]=\"0:0:600\"");

    let motd = fs::read_to_string(tree.motd()).unwrap();
    assert!(motd.contains(MOCK_FINGERPRINT));
    assert_eq!(system.calls_to("ssh-keygen").len(), 1);
}

#[tokio::test]
async fn test_previous_tree_is_replaced() {
    let (_temp, config) = common::workspace();
    let stale = config.profile_tree_root().join("work/leftover");
    fs::create_dir_all(&stale).unwrap();

    let (_system, tree) = mutated(&config).await;
    assert!(!stale.exists());
    assert!(tree.profiledef().is_file());
}
