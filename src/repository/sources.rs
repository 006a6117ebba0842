//! Build directory inspection: package archives and downloaded source bundles.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const PACKAGE_SUFFIX: &str = ".pkg.tar.zst";

const BUNDLE_SUFFIXES: &[&str] = &[
    ".tar.gz", ".tar.xz", ".tar.zst", ".tar.bz2", ".tgz", ".zip", ".asc", ".sig", ".sign",
];

/// Whether `name` is a makepkg package archive worth publishing.
///
/// Debug-symbol split packages (`<name>-debug-<ver>`) are skipped.
pub fn is_package_archive(name: &str) -> bool {
    name.ends_with(PACKAGE_SUFFIX) && !name.contains("-debug-")
}

/// Whether `name` looks like a downloaded upstream source or its signature.
pub fn is_source_bundle(name: &str) -> bool {
    !name.contains(".pkg.tar") && BUNDLE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

fn files_matching(dir: &Path, keep: impl Fn(&str) -> bool) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(name) = path.file_name().map(|n| n.to_string_lossy()) {
            if keep(&*name) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Package archives makepkg left in `dir`, sorted by name.
pub fn package_artifacts(dir: &Path) -> io::Result<Vec<PathBuf>> {
    files_matching(dir, is_package_archive)
}

/// Source bundles present in `dir`, sorted by name.
pub fn source_bundles(dir: &Path) -> io::Result<Vec<PathBuf>> {
    files_matching(dir, is_source_bundle)
}

/// Copy every file from `files` into `dest`, keeping file names.
///
/// # Returns
/// Destination paths in the same order as `files`
pub fn copy_into(files: &[PathBuf], dest: &Path) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dest)?;
    let mut copied = Vec::with_capacity(files.len());
    for file in files {
        let Some(name) = file.file_name() else {
            continue;
        };
        let target = dest.join(name);
        fs::copy(file, &target)?;
        copied.push(target);
    }
    Ok(copied)
}

/// Copy the source bundles downloaded by one recipe into another recipe's
/// directory so makepkg finds them and skips the download.
///
/// Every bundle is offered; makepkg ignores the ones the second recipe does
/// not name. Bundles already present in `to` are left alone.
pub fn copy_shared_sources(from: &Path, to: &Path) -> io::Result<Vec<PathBuf>> {
    let missing: Vec<PathBuf> = source_bundles(from)?
        .into_iter()
        .filter(|bundle| {
            bundle
                .file_name()
                .map(|name| !to.join(name).exists())
                .unwrap_or(false)
        })
        .collect();
    copy_into(&missing, to)
}
