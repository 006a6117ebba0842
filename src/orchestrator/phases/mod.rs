//! Orchestrator phases that are not owned by a single component.
//!
//! - **prep**: host preflight run before the repository stage

pub mod prep;

pub use prep::ensure_host_packages;
