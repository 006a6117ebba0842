//! Pipeline State Management
//!
//! **Architecture**:
//! - `PipelineState`: the states a run moves through, strictly in order
//! - `OrchestrationState`: current state, start time and recorded failure
//!
//! Each forward transition is only taken after the stage producing that state
//! succeeded. `Failed` is terminal and reachable from every non-terminal state.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Pipeline state enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    /// Nothing done yet
    Init,

    /// Credential validated, elevation available
    Elevated,

    /// Host prepared and local package repository indexed
    RepositoryReady,

    /// Profile cloned and every edit applied
    ProfileReady,

    /// mkarchiso finished and the ISO delivered
    Composed,

    /// Working tree reclaimed, run complete
    Done,

    /// A stage failed
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Init => "init",
            PipelineState::Elevated => "elevated",
            PipelineState::RepositoryReady => "repository-ready",
            PipelineState::ProfileReady => "profile-ready",
            PipelineState::Composed => "composed",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }

    /// Name of the stage whose success produces this state.
    pub fn stage_name(&self) -> &'static str {
        match self {
            PipelineState::Init => "startup",
            PipelineState::Elevated => "privilege",
            PipelineState::RepositoryReady => "repository",
            PipelineState::ProfileReady => "profile",
            PipelineState::Composed => "compose",
            PipelineState::Done => "finalize",
            PipelineState::Failed => "failed",
        }
    }

    /// Get all valid transitions FROM this state.
    pub fn valid_next_phases(&self) -> Vec<PipelineState> {
        match self {
            PipelineState::Init => vec![PipelineState::Elevated, PipelineState::Failed],
            PipelineState::Elevated => vec![PipelineState::RepositoryReady, PipelineState::Failed],
            PipelineState::RepositoryReady => vec![PipelineState::ProfileReady, PipelineState::Failed],
            PipelineState::ProfileReady => vec![PipelineState::Composed, PipelineState::Failed],
            PipelineState::Composed => vec![PipelineState::Done, PipelineState::Failed],
            PipelineState::Done => vec![],
            PipelineState::Failed => vec![],
        }
    }

    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        self.valid_next_phases().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run state snapshot.
#[derive(Debug, Clone)]
pub struct OrchestrationState {
    pub phase: PipelineState,

    pub start_time: Instant,

    /// Error message if a stage failed
    pub error: Option<String>,
}

impl Default for OrchestrationState {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestrationState {
    pub fn new() -> Self {
        OrchestrationState {
            phase: PipelineState::Init,
            start_time: Instant::now(),
            error: None,
        }
    }

    /// Attempt to transition to the next state.
    pub fn transition_to(&mut self, next: PipelineState) -> Result<(), String> {
        if !self.phase.can_transition_to(next) {
            return Err(format!(
                "Invalid state transition: {} -> {}",
                self.phase.as_str(),
                next.as_str()
            ));
        }
        self.phase = next;
        Ok(())
    }

    /// Record an error and mark the run as failed.
    pub fn record_error(&mut self, error: String) {
        self.error = Some(error);
        self.phase = PipelineState::Failed;
    }

    pub fn elapsed_since_start(&self) -> Duration {
        self.start_time.elapsed()
    }
}
