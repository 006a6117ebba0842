//! Recording `SystemWrapper` for tests.
//!
//! Every invocation is recorded. The side effects the pipeline relies on are
//! simulated on the real filesystem (package archives from makepkg, the
//! repo-add index, the ISO from mkarchiso, mv and rm), so stages run
//! end-to-end inside a temporary directory without touching the host.

use super::{Invocation, ProcessOutput, Secret, SystemWrapper};
use crate::error::{PrivilegeError, ProcessError};
use crate::repository::git::{GitError, GitResult};
use futures::future::BoxFuture;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Upstream tarball every simulated recipe downloads.
pub const MOCK_SOURCE_BUNDLE: &str = "zfs-2.2.6.tar.gz";

pub const MOCK_ISO_NAME: &str = "archlinux-mock-x86_64.iso";

pub const MOCK_FINGERPRINT: &str = "256 SHA256:q1w2e3r4t5y6u7i8o9p0 admin@host (ED25519)";

pub const MOCK_COMMIT: &str = "3f1c2a9b8d7e6f5a4b3c2d1e0f9a8b7c6d5e4f3a";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
pub struct MockSystem {
    secret: String,
    root: bool,
    uid: u32,
    gid: u32,
    prompt_times_out: bool,
    failing: BTreeSet<String>,
    timing_out: BTreeSet<String>,
    failing_clones: bool,
    installed: Mutex<BTreeSet<String>>,
    invocations: Mutex<Vec<Invocation>>,
    clones: Mutex<Vec<(String, PathBuf)>>,
    prefetched_sources: Mutex<Vec<String>>,
}

impl Default for MockSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSystem {
    pub fn new() -> Self {
        MockSystem {
            secret: "mock-password".to_string(),
            root: false,
            uid: 1000,
            gid: 1000,
            prompt_times_out: false,
            failing: BTreeSet::new(),
            timing_out: BTreeSet::new(),
            failing_clones: false,
            installed: Mutex::new(BTreeSet::new()),
            invocations: Mutex::new(Vec::new()),
            clones: Mutex::new(Vec::new()),
            prefetched_sources: Mutex::new(Vec::new()),
        }
    }

    /// Secret returned by the prompt and accepted by `sudo -S`.
    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = secret.to_string();
        self
    }

    pub fn as_root(mut self) -> Self {
        self.root = true;
        self
    }

    pub fn with_prompt_timeout(mut self) -> Self {
        self.prompt_times_out = true;
        self
    }

    /// `program` exits with status 1 and no side effects.
    pub fn failing(mut self, program: &str) -> Self {
        self.failing.insert(program.to_string());
        self
    }

    /// `program` never finishes within its timeout.
    pub fn timing_out(mut self, program: &str) -> Self {
        self.timing_out.insert(program.to_string());
        self
    }

    pub fn failing_clones(mut self) -> Self {
        self.failing_clones = true;
        self
    }

    /// Host packages reported as installed by `pacman -Qi`.
    pub fn with_installed(self, packages: &[&str]) -> Self {
        lock(&self.installed).extend(packages.iter().map(|p| p.to_string()));
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        lock(&self.invocations).clone()
    }

    /// Recorded invocations of `program`, elevated or not.
    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        lock(&self.invocations)
            .iter()
            .filter(|inv| inv.program == program)
            .cloned()
            .collect()
    }

    pub fn clones(&self) -> Vec<(String, PathBuf)> {
        lock(&self.clones).clone()
    }

    pub fn installed(&self) -> Vec<String> {
        lock(&self.installed).iter().cloned().collect()
    }

    /// Packages whose build directory already held the upstream tarball when
    /// makepkg started.
    pub fn prefetched_sources(&self) -> Vec<String> {
        lock(&self.prefetched_sources).clone()
    }

    fn simulate(&self, inv: &Invocation) -> Result<ProcessOutput, ProcessError> {
        if self.timing_out.contains(&inv.program) {
            return Err(ProcessError::Timeout {
                program: inv.program.clone(),
                seconds: inv.timeout.map(|t| t.as_secs()).unwrap_or(0),
            });
        }
        if self.failing.contains(&inv.program) {
            return Ok(exit(1, "", "simulated failure"));
        }

        let io = |source: std::io::Error| ProcessError::Io {
            program: inv.program.clone(),
            source,
        };
        let args: Vec<&str> = inv.args.iter().map(String::as_str).collect();

        match inv.program.as_str() {
            "sudo" => {
                let accepted = inv
                    .stdin
                    .as_ref()
                    .map(|s| s.expose().trim_end_matches('\n') == self.secret)
                    .unwrap_or(false);
                Ok(if accepted { ok("") } else { exit(1, "", "Sorry, try again.") })
            }
            "pacman" => Ok(self.simulate_pacman(&args)),
            "makepkg" => {
                let dir = inv.current_dir.clone().unwrap_or_default();
                let name = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();

                let bundle = dir.join(MOCK_SOURCE_BUNDLE);
                if bundle.exists() {
                    lock(&self.prefetched_sources).push(name.clone());
                } else {
                    fs::write(&bundle, b"tarball").map_err(io)?;
                    fs::write(dir.join(format!("{}.asc", MOCK_SOURCE_BUNDLE)), b"sig").map_err(io)?;
                }
                fs::write(dir.join(format!("{}-2.2.6-1-x86_64.pkg.tar.zst", name)), b"pkg")
                    .map_err(io)?;
                fs::write(
                    dir.join(format!("{}-debug-2.2.6-1-x86_64.pkg.tar.zst", name)),
                    b"dbg",
                )
                .map_err(io)?;

                if args.contains(&"--install") {
                    lock(&self.installed).insert(name);
                }
                Ok(ok(""))
            }
            "repo-add" => {
                if let Some(db) = args.first() {
                    fs::write(db, b"index").map_err(io)?;
                }
                Ok(ok(""))
            }
            "mkarchiso" => {
                let value_of = |flag: &str| {
                    args.iter()
                        .position(|a| *a == flag)
                        .and_then(|i| args.get(i + 1))
                        .map(PathBuf::from)
                };
                if let Some(work) = value_of("-w") {
                    fs::create_dir_all(work).map_err(io)?;
                }
                if let Some(out) = value_of("-o") {
                    fs::create_dir_all(&out).map_err(io)?;
                    fs::write(out.join(MOCK_ISO_NAME), b"iso").map_err(io)?;
                }
                Ok(ok(""))
            }
            "rm" => {
                if let Some(target) = args.last().map(Path::new) {
                    if target.exists() {
                        fs::remove_dir_all(target).map_err(io)?;
                    }
                }
                Ok(ok(""))
            }
            "mv" => {
                let paths: Vec<&str> = args.iter().copied().filter(|a| !a.starts_with('-')).collect();
                if let [from, to] = paths.as_slice() {
                    fs::rename(from, to).map_err(io)?;
                }
                Ok(ok(""))
            }
            "ssh-keygen" => Ok(ok(&format!("{}\n", MOCK_FINGERPRINT))),
            _ => Ok(ok("")),
        }
    }

    fn simulate_pacman(&self, args: &[&str]) -> ProcessOutput {
        let mut installed = lock(&self.installed);
        let packages = args.iter().filter(|a| !a.starts_with('-'));
        match args.first() {
            Some(&"-Qi") => {
                if packages.into_iter().all(|p| installed.contains(*p)) {
                    ok("")
                } else {
                    exit(1, "", "error: package was not found")
                }
            }
            Some(&"-S") => {
                installed.extend(packages.map(|p| p.to_string()));
                ok("")
            }
            Some(&"-Rns") => {
                for package in packages {
                    installed.remove(*package);
                }
                ok("")
            }
            _ => ok(""),
        }
    }
}

fn ok(stdout: &str) -> ProcessOutput {
    exit(0, stdout, "")
}

fn exit(code: i32, stdout: &str, stderr: &str) -> ProcessOutput {
    ProcessOutput {
        code: Some(code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

impl SystemWrapper for MockSystem {
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
    ) -> BoxFuture<'a, Result<ProcessOutput, ProcessError>> {
        Box::pin(async move {
            lock(&self.invocations).push(invocation.clone());
            self.simulate(invocation)
        })
    }

    fn clone_source<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, GitResult<String>> {
        Box::pin(async move {
            lock(&self.clones).push((url.to_string(), dest.to_path_buf()));
            if self.failing_clones {
                return Err(GitError::Clone(format!("simulated clone failure for {}", url)));
            }
            fs::create_dir_all(dest)?;
            let name = dest
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            fs::write(
                dest.join("PKGBUILD"),
                format!("pkgname={}\nsource=(\"{}\" \"{}.asc\")\n", name, MOCK_SOURCE_BUNDLE, MOCK_SOURCE_BUNDLE),
            )?;
            Ok(MOCK_COMMIT.to_string())
        })
    }

    fn effective_uid_is_root(&self) -> bool {
        self.root
    }

    fn invoking_user(&self) -> (u32, u32) {
        (self.uid, self.gid)
    }

    fn prompt_secret<'a>(
        &'a self,
        _prompt: &'a str,
        limit: Duration,
    ) -> BoxFuture<'a, Result<Secret, PrivilegeError>> {
        Box::pin(async move {
            if self.prompt_times_out {
                Err(PrivilegeError::PromptTimeout(limit.as_secs()))
            } else {
                Ok(Secret::new(self.secret.clone()))
            }
        })
    }
}
