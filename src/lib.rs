//! archiso-zfs
//!
//! Builds an Arch Linux live ISO that boots a replacement kernel and ships
//! OpenZFS from a locally built package repository.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Configuration, repository and profile tree types
//! - **config**: Compiled-in defaults, TOML override file and validation
//! - **system**: Process execution, elevation session and the host abstraction
//! - **patcher**: Literal text patching of profile files
//! - **repository**: Local package repository builder (makepkg, repo-add)
//! - **profile**: archiso profile cloning and mutation
//! - **orchestrator**: Pipeline state machine and image composition
//! - **log_collector**: Console and per-run log file

pub mod config;
pub mod error;
pub mod log_collector;
pub mod models;
pub mod orchestrator;
pub mod patcher;
pub mod profile;
pub mod repository;
pub mod system;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{
    BuildError, ConfigError, MutationError, PatchError, PipelineError, PrivilegeError,
    ProcessError, RepositoryError, Result, StageError,
};

pub use models::{
    BootMechanism, BootMechanismReference, BuildConfiguration, PackageReplacement, ProfileTree,
    RepositoryArtifact, SourcePackage,
};

pub use orchestrator::{OrchestrationState, Pipeline, PipelineOutcome, PipelineState};

pub use system::{PrivilegeSession, Secret, SystemImpl, SystemWrapper};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
