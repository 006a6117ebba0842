//! Literal text patching of externally owned configuration files.
//!
//! Every pattern is escaped before it is compiled, so `old` is always matched
//! literally, and every replacement is inserted with `NoExpand`, so `$` in
//! `new` is never treated as a capture reference. The engine does not make
//! patches idempotent: callers apply each operation once to a freshly cloned
//! file.

use crate::error::PatchError;
use regex::{NoExpand, Regex};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Result type for patching operations
pub type PatchResult<T> = std::result::Result<T, PatchError>;

/// Escape every regex metacharacter in `literal`.
///
/// The returned pattern matches exactly the occurrences of `literal` and
/// nothing else.
pub fn escape_for_literal_match(literal: &str) -> String {
    regex::escape(literal)
}

/// How `old` is located inside the target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// `old` must be a whole line; that line is replaced
    Line,
    /// Every occurrence of `old` is replaced
    Substring,
    /// `old` must be a whole line; `new` is inserted on the following line(s)
    InsertAfterLine,
}

/// One typed substitution against one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOperation {
    pub path: PathBuf,
    pub old: String,
    pub new: String,
    pub anchor: Anchor,
}

impl PatchOperation {
    pub fn replace_line(path: &Path, old: &str, new: &str) -> Self {
        Self::build(path, old, new, Anchor::Line)
    }

    pub fn replace_substring(path: &Path, old: &str, new: &str) -> Self {
        Self::build(path, old, new, Anchor::Substring)
    }

    pub fn insert_after_line(path: &Path, anchor_line: &str, new: &str) -> Self {
        Self::build(path, anchor_line, new, Anchor::InsertAfterLine)
    }

    fn build(path: &Path, old: &str, new: &str, anchor: Anchor) -> Self {
        PatchOperation {
            path: path.to_path_buf(),
            old: old.to_string(),
            new: new.to_string(),
            anchor,
        }
    }

    fn pattern(&self) -> PatchResult<Regex> {
        if self.old.is_empty() {
            return Err(PatchError::EmptyPattern(self.path.clone()));
        }
        let escaped = escape_for_literal_match(&self.old);
        let pattern = match self.anchor {
            Anchor::Substring => escaped,
            Anchor::Line | Anchor::InsertAfterLine => format!("(?m)^{}$", escaped),
        };
        Regex::new(&pattern).map_err(|e| PatchError::RegexInvalid(e.to_string()))
    }

    /// Apply the operation to in-memory content.
    ///
    /// # Returns
    /// The patched content and the number of replacements made
    pub fn apply_to(&self, content: &str) -> PatchResult<(String, usize)> {
        let regex = self.pattern()?;
        let count = regex.find_iter(content).count();
        if count == 0 {
            return Ok((content.to_string(), 0));
        }

        let replacement = match self.anchor {
            Anchor::Line | Anchor::Substring => self.new.clone(),
            Anchor::InsertAfterLine => format!("{}\n{}", self.old, self.new),
        };
        let patched = regex.replace_all(content, NoExpand(&replacement)).into_owned();
        Ok((patched, count))
    }
}

/// The target must be a regular file this process can open for writing.
///
/// Mode bits alone are not enough: a 0644 file owned by someone else has
/// write bits set but still refuses us.
fn ensure_writable(path: &Path) -> PatchResult<()> {
    let missing = || PatchError::TargetMissing(path.to_path_buf());
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && !meta.permissions().readonly() => {}
        _ => return Err(missing()),
    }
    OpenOptions::new()
        .write(true)
        .open(path)
        .map(drop)
        .map_err(|_| missing())
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PatchError + '_ {
    move |source| PatchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Apply a patch operation to its file.
///
/// The file is rewritten only when at least one replacement was made.
///
/// # Returns
/// Number of replacements made
pub fn apply_patch(op: &PatchOperation) -> PatchResult<usize> {
    ensure_writable(&op.path)?;
    let content = fs::read_to_string(&op.path).map_err(io_error(&op.path))?;
    let (patched, count) = op.apply_to(&content)?;

    if count > 0 {
        fs::write(&op.path, patched).map_err(io_error(&op.path))?;
    }
    log::debug!(
        "[Patcher] [{:?}] {} replacement(s) of '{}' in {}",
        op.anchor,
        count,
        op.old,
        op.path.display()
    );
    Ok(count)
}

/// Count the literal occurrences of `literal` in a file.
pub fn count_literal(path: &Path, literal: &str) -> PatchResult<usize> {
    if !path.is_file() {
        return Err(PatchError::TargetMissing(path.to_path_buf()));
    }
    if literal.is_empty() {
        return Err(PatchError::EmptyPattern(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(io_error(path))?;
    Ok(content.matches(literal).count())
}

/// Append `text` to a file, starting on a fresh line.
pub fn append_text(path: &Path, text: &str) -> PatchResult<()> {
    ensure_writable(path)?;
    let content = fs::read_to_string(path).map_err(io_error(path))?;

    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(io_error(path))?;
    if !content.is_empty() && !content.ends_with('\n') {
        file.write_all(b"\n").map_err(io_error(path))?;
    }
    file.write_all(text.as_bytes()).map_err(io_error(path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const METACHARACTERS: &str = r".^$*+?()[]{}|\-#&~";

    fn write(temp: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = temp.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_escaped_metacharacters_match_only_literal() {
        let pattern = Regex::new(&escape_for_literal_match(METACHARACTERS)).unwrap();
        let haystack = format!("a{}b .^$ x{}", METACHARACTERS, METACHARACTERS);
        let starts: Vec<usize> = pattern.find_iter(&haystack).map(|m| m.start()).collect();
        let expected: Vec<usize> = haystack.match_indices(METACHARACTERS).map(|(i, _)| i).collect();
        assert_eq!(starts, expected);
        assert_eq!(starts.len(), 2);
        assert!(!pattern.is_match("anything else"));
    }

    #[test]
    fn test_line_anchor_ignores_partial_lines() {
        let op = PatchOperation::replace_line(Path::new("packages"), "linux", "linux-lts");
        let (patched, count) = op.apply_to("linux\nlinux-firmware\nlinux-atm\n").unwrap();
        assert_eq!(count, 1);
        assert_eq!(patched, "linux-lts\nlinux-firmware\nlinux-atm\n");
    }

    #[test]
    fn test_substring_anchor_replaces_every_occurrence() {
        let op = PatchOperation::replace_substring(Path::new("x.cfg"), "vmlinuz-linux", "vmlinuz-linux-lts");
        let content = "LINUX /arch/boot/vmlinuz-linux\nAPPEND vmlinuz-linux\n";
        let (patched, count) = op.apply_to(content).unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            patched,
            "LINUX /arch/boot/vmlinuz-linux-lts\nAPPEND vmlinuz-linux-lts\n"
        );
    }

    #[test]
    fn test_replacement_is_not_expanded() {
        let op = PatchOperation::replace_substring(Path::new("f"), "X", "$1${name}$$");
        let (patched, _) = op.apply_to("aXb").unwrap();
        assert_eq!(patched, "a$1${name}$$b");
    }

    #[test]
    fn test_insert_after_line_keeps_anchor() {
        let op = PatchOperation::insert_after_line(
            Path::new("profiledef.sh"),
            "  [\"/root\"]=\"0:0:750\"",
            "  [\"/root/.ssh\"]=\"0:0:700\"",
        );
        let content = "file_permissions=(\n  [\"/root\"]=\"0:0:750\"\n)\n";
        let (patched, count) = op.apply_to(content).unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            patched,
            "file_permissions=(\n  [\"/root\"]=\"0:0:750\"\n  [\"/root/.ssh\"]=\"0:0:700\"\n)\n"
        );
    }

    #[test]
    fn test_apply_patch_missing_file() {
        let temp = TempDir::new().unwrap();
        let op = PatchOperation::replace_line(&temp.path().join("missing"), "a", "b");
        assert!(matches!(apply_patch(&op), Err(PatchError::TargetMissing(_))));
    }

    #[test]
    fn test_apply_patch_directory_is_not_a_target() {
        let temp = TempDir::new().unwrap();
        let op = PatchOperation::replace_line(temp.path(), "a", "b");
        assert!(matches!(apply_patch(&op), Err(PatchError::TargetMissing(_))));
    }

    #[test]
    fn test_apply_patch_readonly_file() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "ro.conf", "a\n");
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&path, perms).unwrap();

        let op = PatchOperation::replace_line(&path, "a", "b");
        assert!(matches!(apply_patch(&op), Err(PatchError::TargetMissing(_))));
    }

    #[test]
    fn test_apply_patch_file_without_owner_write() {
        // root ignores mode bits
        if nix::unistd::geteuid().is_root() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "grub.cfg", "a\n");
        // group and other may write, the owner may not
        fs::set_permissions(&path, fs::Permissions::from_mode(0o466)).unwrap();
        assert!(!fs::metadata(&path).unwrap().permissions().readonly());

        let op = PatchOperation::replace_line(&path, "a", "b");
        assert!(matches!(apply_patch(&op), Err(PatchError::TargetMissing(_))));
        assert!(matches!(
            append_text(&path, "c"),
            Err(PatchError::TargetMissing(_))
        ));
    }

    #[test]
    fn test_apply_patch_empty_pattern() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "f", "abc");
        let op = PatchOperation::replace_substring(&path, "", "x");
        assert!(matches!(apply_patch(&op), Err(PatchError::EmptyPattern(_))));
    }

    #[test]
    fn test_apply_patch_writes_and_counts() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "loader.conf", "initrd /initramfs-linux.img\n");
        let op = PatchOperation::replace_substring(&path, "initramfs-linux", "initramfs-linux-lts");
        assert_eq!(apply_patch(&op).unwrap(), 1);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "initrd /initramfs-linux-lts.img\n"
        );
        assert_eq!(count_literal(&path, "initramfs-linux-lts").unwrap(), 1);
    }

    #[test]
    fn test_append_text_adds_separator() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "pacman.conf", "[core]\nInclude = x");
        append_text(&path, "[zfsrepo]\n").unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "[core]\nInclude = x\n[zfsrepo]\n"
        );
    }

    proptest! {
        #[test]
        fn prop_escaped_pattern_matches_like_str_search(
            needle in "[ -~]{1,8}",
            prefix in "[ -~]{0,16}",
            suffix in "[ -~]{0,16}",
        ) {
            let haystack = format!("{}{}{}{}", prefix, needle, suffix, needle);
            let pattern = Regex::new(&escape_for_literal_match(&needle)).unwrap();
            let found: Vec<usize> = pattern.find_iter(&haystack).map(|m| m.start()).collect();
            let expected: Vec<usize> = haystack.match_indices(needle.as_str()).map(|(i, _)| i).collect();
            prop_assert_eq!(found, expected);
        }
    }
}
