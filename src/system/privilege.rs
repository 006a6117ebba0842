//! Privilege session management.
//!
//! The credential is captured once, verified with `sudo -S -k -v`, and
//! re-validated with `sudo -S -v` right before every privileged invocation so
//! the sudo timestamp never lapses during a long package build. Privileged
//! invocations themselves go through `sudo -n` and never prompt.

use super::{Invocation, SystemWrapper};
use crate::error::{PrivilegeError, ProcessError};
use std::fmt;
use std::time::{Duration, Instant};

/// Time allowed for interactive password entry.
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Time allowed for sudo to accept or reject the credential.
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

const PROMPT: &str = "[archiso-zfs] sudo password: ";

/// Credential material. Never printed, cleared on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: String) -> Self {
        Secret(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Copy of the secret terminated by a newline, as `sudo -S` reads it.
    fn as_line(&self) -> Secret {
        let mut line = String::with_capacity(self.0.len() + 1);
        line.push_str(&self.0);
        line.push('\n');
        Secret(line)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        let mut bytes = std::mem::take(&mut self.0).into_bytes();
        bytes.iter_mut().for_each(|b| *b = 0);
        std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
    }
}

/// A validated elevation credential.
#[derive(Debug)]
pub struct PrivilegeSession {
    secret: Secret,
    validated_at: Instant,
}

impl PrivilegeSession {
    /// Extend the sudo lease. Call immediately before each privileged step.
    pub async fn refresh(&self, system: &dyn SystemWrapper) -> Result<(), PrivilegeError> {
        let invocation = Invocation::new("sudo")
            .args(["-S", "-v", "-p", ""])
            .stdin(self.secret.as_line())
            .timeout(VALIDATION_TIMEOUT);
        check_elevation(system, &invocation).await?;
        log::debug!(
            "[Privilege] [REFRESH] Lease extended ({}s since validation)",
            self.validated_at.elapsed().as_secs()
        );
        Ok(())
    }
}

/// Prompt for the credential and validate it.
pub async fn acquire(system: &dyn SystemWrapper) -> Result<PrivilegeSession, PrivilegeError> {
    if system.effective_uid_is_root() {
        return Err(PrivilegeError::Identity);
    }

    log::info!("[Privilege] [PROMPT] Elevated rights are needed for package installs and mkarchiso");
    let secret = system.prompt_secret(PROMPT, PROMPT_TIMEOUT).await?;
    validate(system, secret).await
}

/// Check `secret` against sudo, discarding any cached timestamp first.
pub async fn validate(
    system: &dyn SystemWrapper,
    secret: Secret,
) -> Result<PrivilegeSession, PrivilegeError> {
    let invocation = Invocation::new("sudo")
        .args(["-S", "-k", "-v", "-p", ""])
        .stdin(secret.as_line())
        .timeout(VALIDATION_TIMEOUT);
    check_elevation(system, &invocation).await?;

    log::info!("[Privilege] [VALIDATED] Credential accepted");
    Ok(PrivilegeSession {
        secret,
        validated_at: Instant::now(),
    })
}

async fn check_elevation(
    system: &dyn SystemWrapper,
    invocation: &Invocation,
) -> Result<(), PrivilegeError> {
    match system.run(invocation).await {
        Ok(output) if output.success() => Ok(()),
        Ok(output) => {
            log::debug!("[Privilege] [DENIED] sudo exited with {:?}", output.code);
            Err(PrivilegeError::Auth)
        }
        // A hanging sudo means it is waiting on something other than our input
        Err(ProcessError::Timeout { .. }) => Err(PrivilegeError::Auth),
        Err(e) => Err(PrivilegeError::Process(e)),
    }
}
