//! Unified error type hierarchy for archiso-zfs
//!
//! Provides structured error handling per pipeline component: PrivilegeError,
//! ProcessError, PatchError, RepositoryError, MutationError, BuildError and
//! ConfigError. `PipelineError` wraps whichever of them stopped the run together
//! with the stage that could not be reached.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::orchestrator::state::PipelineState;

/// External process execution errors.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while talking to '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Command '{program}' exited with status {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command '{program}' timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },
}

/// Credential and elevation errors.
#[derive(Error, Debug)]
pub enum PrivilegeError {
    #[error("Running as root is not supported: start archiso-zfs as a regular user, privileges are requested per operation")]
    Identity,

    #[error("No password entered within {0} seconds")]
    PromptTimeout(u64),

    #[error("Wrong password or insufficient sudo rights")]
    Auth,

    #[error("Password prompt failed: {0}")]
    Terminal(String),

    #[error("Could not run the elevation tool: {0}")]
    Process(#[from] ProcessError),
}

/// Text patch engine errors.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Patch target missing or not writable: {}", .0.display())]
    TargetMissing(PathBuf),

    #[error("Refusing to apply an empty pattern to {}", .0.display())]
    EmptyPattern(PathBuf),

    #[error("Invalid regex pattern: {0}")]
    RegexInvalid(String),

    #[error("I/O error patching {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Package repository builder errors.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Failed to retrieve maintainer signing keys: {0}")]
    KeyRetrieval(#[source] ProcessError),

    #[error("Failed to fetch source recipe for {package}: {reason}")]
    SourceFetch { package: String, reason: String },

    #[error("makepkg failed for {package}: {source}")]
    PackageBuild {
        package: String,
        #[source]
        source: ProcessError,
    },

    #[error("makepkg produced no package archive for {0}")]
    NoArtifacts(String),

    #[error("repo-add failed: {0}")]
    Index(#[source] ProcessError),

    #[error("Repository index missing after indexing: {}", .0.display())]
    IndexMissing(PathBuf),

    #[error("Failed to install host packages: {0}")]
    HostPackages(#[source] ProcessError),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error("I/O error in package repository: {0}")]
    Io(#[from] io::Error),
}

/// Profile mutation errors.
#[derive(Error, Debug)]
pub enum MutationError {
    #[error("Base profile not found: {}", .0.display())]
    BaseProfileMissing(PathBuf),

    /// Package list line to replace was absent. Reported as a warning only.
    #[error("Package '{old}' not found in {}", file.display())]
    ReplacementNotFound { old: String, file: PathBuf },

    #[error("Root home permission entry not found in {} (profiledef.sh format changed?)", .0.display())]
    PermissionAnchorNotFound(PathBuf),

    #[error("Field '{field}' not found in {}", file.display())]
    DefinitionFieldMissing { field: String, file: PathBuf },

    #[error("{} still references '{reference}' after boot patching", file.display())]
    StaleBootReference { file: PathBuf, reference: String },

    #[error("Failed to fingerprint the remote access key: {0}")]
    Fingerprint(#[source] ProcessError),

    #[error("Failed to remove previous profile tree: {0}")]
    Cleanup(#[source] ProcessError),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("I/O error mutating profile: {0}")]
    Io(#[from] io::Error),
}

/// Image composition errors.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("mkarchiso failed: {0}")]
    CompositionFailed(#[source] ProcessError),

    #[error("No ISO image found in {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Failed to hand the ISO over to the invoking user: {0}")]
    Relocation(#[source] ProcessError),

    #[error("Failed to remove the profile tree: {0}")]
    Cleanup(#[source] ProcessError),

    #[error("Refusing to remove {} outside the working root", .0.display())]
    UnsafeCleanupPath(PathBuf),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error("I/O error during composition: {0}")]
    Io(#[from] io::Error),
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid TOML in config: {0}")]
    InvalidToml(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Underlying cause of a pipeline failure.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("{0}")]
    Transition(String),
}

/// A failed pipeline run: the stage that could not be reached and why.
#[derive(Error, Debug)]
#[error("stage '{}' failed: {source}", stage.stage_name())]
pub struct PipelineError {
    pub stage: PipelineState,
    #[source]
    pub source: StageError,
}

impl PipelineError {
    pub fn new(stage: PipelineState, source: impl Into<StageError>) -> Self {
        PipelineError {
            stage,
            source: source.into(),
        }
    }
}

/// Top-level result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
