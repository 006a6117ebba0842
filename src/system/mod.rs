//! System module: external process execution, host identity and credential entry
//!
//! Every external tool the pipeline drives goes through the `SystemWrapper`
//! trait so stages can be exercised against `mock::MockSystem`.

#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod privilege;

pub use privilege::{PrivilegeSession, Secret};

use crate::error::{PrivilegeError, ProcessError};
use crate::repository::git::{GitError, GitManager, GitResult};
use futures::future::BoxFuture;
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// Number of trailing stderr lines kept in `ProcessError::Exit`.
const STDERR_TAIL_LINES: usize = 20;

/// Whether an invocation runs as the invoking user or through `sudo -n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    User,
    Root,
}

/// One external process invocation.
///
/// Built with chained setters, in the style of a command builder:
///
/// ```ignore
/// let inv = Invocation::new("mkarchiso")
///     .args(["-v", "-w"])
///     .arg_path(&tree.work)
///     .elevated();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub elevation: Elevation,
    /// Written to the child's stdin, then the pipe is closed
    pub stdin: Option<Secret>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl AsRef<str>) -> Self {
        Invocation {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
            elevation: Elevation::User,
            stdin: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.env.push((key.to_string(), value.as_ref().to_string()));
        self
    }

    /// Run through `sudo -n --`, which never prompts.
    pub fn elevated(mut self) -> Self {
        self.elevation = Elevation::Root;
        self
    }

    pub fn stdin(mut self, input: Secret) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Program actually spawned and its argument vector.
    pub fn resolved(&self) -> (&str, Vec<&str>) {
        match self.elevation {
            Elevation::User => (
                self.program.as_str(),
                self.args.iter().map(String::as_str).collect(),
            ),
            Elevation::Root => {
                let mut args = vec!["-n", "--", self.program.as_str()];
                args.extend(self.args.iter().map(String::as_str));
                ("sudo", args)
            }
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (program, args) = self.resolved();
        write!(f, "{}", program)?;
        for arg in args {
            if arg.is_empty() {
                write!(f, " ''")?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` if terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        lines[start..].join("\n")
    }
}

/// Host operations the pipeline depends on.
///
/// Implemented by `SystemImpl` for production and by `mock::MockSystem` in
/// tests.
pub trait SystemWrapper: Send + Sync {
    /// Run an invocation to completion. A non-zero exit is not an error here;
    /// see `run_checked`.
    fn run<'a>(&'a self, invocation: &'a Invocation)
        -> BoxFuture<'a, Result<ProcessOutput, ProcessError>>;

    /// Clone a source recipe, returning the checked out commit.
    fn clone_source<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, GitResult<String>>;

    fn effective_uid_is_root(&self) -> bool;

    /// UID and GID of the user running the pipeline.
    fn invoking_user(&self) -> (u32, u32);

    /// Read a secret from the controlling terminal with echo disabled.
    fn prompt_secret<'a>(
        &'a self,
        prompt: &'a str,
        limit: Duration,
    ) -> BoxFuture<'a, Result<Secret, PrivilegeError>>;
}

/// Run an invocation and turn a non-zero exit into `ProcessError::Exit`.
pub async fn run_checked(
    system: &dyn SystemWrapper,
    invocation: &Invocation,
) -> Result<ProcessOutput, ProcessError> {
    let output = system.run(invocation).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(ProcessError::Exit {
            program: invocation.program.clone(),
            code: output.code,
            stderr: output.stderr_tail(),
        })
    }
}

/// Default production implementation of SystemWrapper
pub struct SystemImpl;

impl SystemImpl {
    pub fn new() -> Self {
        SystemImpl
    }
}

impl Default for SystemImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemWrapper for SystemImpl {
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
    ) -> BoxFuture<'a, Result<ProcessOutput, ProcessError>> {
        Box::pin(run_process(invocation))
    }

    fn clone_source<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, GitResult<String>> {
        let url = url.to_string();
        let dest = dest.to_path_buf();
        Box::pin(async move {
            // libgit2 is blocking
            tokio::task::spawn_blocking(move || GitManager::clone(&url, &dest)?.get_head_commit())
                .await
                .map_err(|e| GitError::Clone(format!("Clone task aborted: {}", e)))?
        })
    }

    fn effective_uid_is_root(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn invoking_user(&self) -> (u32, u32) {
        (
            nix::unistd::getuid().as_raw(),
            nix::unistd::getgid().as_raw(),
        )
    }

    fn prompt_secret<'a>(
        &'a self,
        prompt: &'a str,
        limit: Duration,
    ) -> BoxFuture<'a, Result<Secret, PrivilegeError>> {
        Box::pin(async move {
            let echo = EchoGuard::disable();
            print!("{}", prompt);
            io::stdout()
                .flush()
                .map_err(|e| PrivilegeError::Terminal(e.to_string()))?;

            // A plain thread, not spawn_blocking: a reader still blocked on
            // stdin after the timeout must not hold up runtime shutdown.
            let (tx, rx) = tokio::sync::oneshot::channel();
            std::thread::spawn(move || {
                let mut line = String::new();
                let result = io::stdin().read_line(&mut line).map(|_| line);
                let _ = tx.send(result);
            });

            let result = tokio::time::timeout(limit, rx).await;
            drop(echo);
            println!();

            match result {
                Err(_) => Err(PrivilegeError::PromptTimeout(limit.as_secs())),
                Ok(Err(_)) => Err(PrivilegeError::Terminal(
                    "terminal reader stopped unexpectedly".to_string(),
                )),
                Ok(Ok(Err(e))) => Err(PrivilegeError::Terminal(e.to_string())),
                Ok(Ok(Ok(mut line))) => {
                    let len = line.trim_end_matches(['\n', '\r']).len();
                    line.truncate(len);
                    Ok(Secret::new(line))
                }
            }
        })
    }
}

/// Terminal echo switched off for as long as the guard lives.
struct EchoGuard {
    original: Termios,
}

impl EchoGuard {
    /// Returns `None` when stdin is not a terminal.
    fn disable() -> Option<Self> {
        let stdin = io::stdin();
        let original = termios::tcgetattr(&stdin).ok()?;
        let mut silent = original.clone();
        silent.local_flags.remove(LocalFlags::ECHO);
        termios::tcsetattr(&stdin, SetArg::TCSANOW, &silent).ok()?;
        Some(EchoGuard { original })
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        if let Err(e) = termios::tcsetattr(&io::stdin(), SetArg::TCSANOW, &self.original) {
            log::warn!("[System] [TTY] Failed to restore terminal echo: {}", e);
        }
    }
}

async fn run_process(invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
    let (program, args) = invocation.resolved();
    log::debug!("[System] [EXEC] {}", invocation);

    let mut command = Command::new(program);
    command.args(&args);
    if let Some(dir) = &invocation.current_dir {
        command.current_dir(dir);
    }
    for (key, value) in &invocation.env {
        command.env(key, value);
    }
    command.stdin(if invocation.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    // Dropping the future on timeout kills the child
    command.kill_on_drop(true);

    match invocation.timeout {
        Some(limit) => tokio::time::timeout(limit, execute(command, invocation))
            .await
            .map_err(|_| ProcessError::Timeout {
                program: invocation.program.clone(),
                seconds: limit.as_secs(),
            })?,
        None => execute(command, invocation).await,
    }
}

async fn execute(
    mut command: Command,
    invocation: &Invocation,
) -> Result<ProcessOutput, ProcessError> {
    let name = invocation.program.as_str();
    let io_error = |source: io::Error| ProcessError::Io {
        program: name.to_string(),
        source,
    };

    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: name.to_string(),
        source,
    })?;

    if let (Some(input), Some(mut stdin)) = (&invocation.stdin, child.stdin.take()) {
        if let Err(e) = stdin.write_all(input.expose().as_bytes()).await {
            // The child may exit before reading its input
            if e.kind() != io::ErrorKind::BrokenPipe {
                return Err(io_error(e));
            }
        }
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io_error(io::Error::new(io::ErrorKind::Other, "stdout not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io_error(io::Error::new(io::ErrorKind::Other, "stderr not captured")))?;

    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut captured_stdout = String::new();
    let mut captured_stderr = String::new();
    let mut stdout_closed = false;
    let mut stderr_closed = false;

    while !(stdout_closed && stderr_closed) {
        tokio::select! {
            line = stdout_lines.next_line(), if !stdout_closed => match line.map_err(io_error)? {
                Some(line) => {
                    log::debug!("[{}] {}", name, line);
                    captured_stdout.push_str(&line);
                    captured_stdout.push('\n');
                }
                None => stdout_closed = true,
            },
            line = stderr_lines.next_line(), if !stderr_closed => match line.map_err(io_error)? {
                Some(line) => {
                    log::debug!("[{}] [STDERR] {}", name, line);
                    captured_stderr.push_str(&line);
                    captured_stderr.push('\n');
                }
                None => stderr_closed = true,
            },
        }
    }

    let status = child.wait().await.map_err(io_error)?;
    log::debug!("[System] [EXIT] {} exited with {}", name, status);

    Ok(ProcessOutput {
        code: status.code(),
        stdout: captured_stdout,
        stderr: captured_stderr,
    })
}
