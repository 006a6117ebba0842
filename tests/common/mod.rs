//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use archiso_zfs::config::defaults;
use archiso_zfs::BuildConfiguration;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

pub const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIIntegrationKey root@build\n";

fn put(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// releng-shaped profile carrying all four boot mechanisms.
pub fn write_releng(root: &Path) {
    put(root, "packages.x86_64", "amd-ucode\narch-install-scripts\nlinux\nlinux-firmware\nzsh\n");
    put(
        root,
        "pacman.conf",
        "[options]\nArchitecture = auto\n\n[core]\nInclude = /etc/pacman.d/mirrorlist\n",
    );
    put(
        root,
        "profiledef.sh",
        "#!/usr/bin/env bash\niso_name=\"archlinux\"\n\
         iso_label=\"ARCH_$(date +%Y%m)\"\n\
         file_permissions=(\n  [\"/etc/shadow\"]=\"0:0:400\"\n  [\"/root\"]=\"0:0:750\"\n)\n",
    );
    put(root, "airootfs/etc/motd", "Welcome to the live system.\n");
    put(
        root,
        "airootfs/etc/mkinitcpio.d/linux.preset",
        "# mkinitcpio preset file for the 'linux' package on archiso\n\
         ALL_kver='/boot/vmlinuz-linux'\n\
         archiso_image=\"/boot/initramfs-linux.img\"\n",
    );
    put(
        root,
        "syslinux/archiso_sys-linux.cfg",
        "LINUX /arch/boot/x86_64/vmlinuz-linux\nINITRD /arch/boot/x86_64/initramfs-linux.img\n",
    );
    put(
        root,
        "efiboot/loader/entries/01-archiso-x86_64-linux.conf",
        "linux /arch/boot/x86_64/vmlinuz-linux\ninitrd /arch/boot/x86_64/initramfs-linux.img\n",
    );
    put(
        root,
        "grub/grub.cfg",
        "linux /arch/boot/x86_64/vmlinuz-linux\ninitrd /arch/boot/x86_64/initramfs-linux.img\n",
    );
}

/// Working root with a base profile, plus a configuration pointing at both.
pub fn workspace() -> (TempDir, BuildConfiguration) {
    let temp = TempDir::new().unwrap();
    let mut config = defaults(temp.path());
    config.base_profile = temp.path().join("releng");
    write_releng(&config.base_profile);
    (temp, config)
}
