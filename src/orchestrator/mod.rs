//! Pipeline orchestration: privilege -> repository -> profile -> compose.
//!
//! Every stage runs strictly in sequence. A stage that succeeds advances the
//! state machine by exactly one state; a stage that fails moves it to
//! `Failed` and the run stops. There are no retries, recovery only exists as
//! the idempotency skips inside the stages themselves.

pub mod executor;
pub mod phases;
pub mod state;

use std::path::PathBuf;
use std::time::Duration;

pub use state::{OrchestrationState, PipelineState};

use crate::error::{PipelineError, Result, StageError};
use crate::models::{BuildConfiguration, ProfileTree, RepositoryArtifact};
use crate::system::{privilege, SystemWrapper};
use crate::{profile, repository};

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Delivered ISO in the artifact directory
    pub iso: PathBuf,
    pub repository: RepositoryArtifact,
    /// The repository was already indexed and nothing was built
    pub repository_reused: bool,
    pub elapsed: Duration,
}

/// Drives one image build through the pipeline states.
pub struct Pipeline<'a> {
    system: &'a dyn SystemWrapper,
    config: &'a BuildConfiguration,
    state: OrchestrationState,
}

impl<'a> Pipeline<'a> {
    pub fn new(system: &'a dyn SystemWrapper, config: &'a BuildConfiguration) -> Self {
        Pipeline {
            system,
            config,
            state: OrchestrationState::new(),
        }
    }

    pub fn phase(&self) -> PipelineState {
        self.state.phase
    }

    pub fn state_snapshot(&self) -> OrchestrationState {
        self.state.clone()
    }

    /// Move to `next` after its stage succeeded.
    fn advance(&mut self, next: PipelineState) -> Result<()> {
        self.state
            .transition_to(next)
            .map_err(|msg| self.fail(next, StageError::Transition(msg)))?;
        log::info!(
            "[Orchestrator] [STATE] {} reached after {}s",
            next,
            self.state.elapsed_since_start().as_secs()
        );
        Ok(())
    }

    /// Record a failure of the stage leading to `target`.
    fn fail(&mut self, target: PipelineState, source: impl Into<StageError>) -> PipelineError {
        let err = PipelineError::new(target, source);
        self.state.record_error(err.to_string());
        err
    }

    /// Run every stage in order.
    ///
    /// # Returns
    /// The delivered ISO and repository, or the stage that failed and why
    pub async fn run(&mut self) -> Result<PipelineOutcome> {
        let system = self.system;
        let config = self.config;

        // ====================================================================
        // PRIVILEGE
        // ====================================================================
        log::info!("[Orchestrator] [PRIVILEGE] Acquiring elevation");
        let session = match privilege::acquire(system).await {
            Ok(session) => session,
            Err(e) => return Err(self.fail(PipelineState::Elevated, e)),
        };
        self.advance(PipelineState::Elevated)?;

        // ====================================================================
        // REPOSITORY
        // ====================================================================
        log::info!("[Orchestrator] [REPOSITORY] Preparing host and package repository");
        if let Err(e) = phases::ensure_host_packages(system, &session, config).await {
            return Err(self.fail(PipelineState::RepositoryReady, e));
        }
        let (repository, repository_reused) =
            match repository::build_repository(system, config, &session).await {
                Ok(built) => built,
                Err(e) => return Err(self.fail(PipelineState::RepositoryReady, e)),
            };
        self.advance(PipelineState::RepositoryReady)?;

        // ====================================================================
        // PROFILE
        // ====================================================================
        log::info!("[Orchestrator] [PROFILE] Mutating {}", config.base_profile.display());
        let tree = match profile::mutate_profile(system, &session, config).await {
            Ok(tree) => tree,
            Err(e) => {
                // Leave no half-edited tree behind
                let partial = ProfileTree::new(&config.profile_tree_root());
                if let Err(cleanup) = executor::reclaim_tree(system, &session, config, &partial).await {
                    log::warn!(
                        "[Orchestrator] [PROFILE] Could not remove partial tree: {}",
                        cleanup
                    );
                }
                return Err(self.fail(PipelineState::ProfileReady, e));
            }
        };
        self.advance(PipelineState::ProfileReady)?;

        // ====================================================================
        // COMPOSE
        // ====================================================================
        let iso = match executor::compose(system, &session, config, &tree).await {
            Ok(iso) => iso,
            Err(e) => return Err(self.fail(PipelineState::Composed, e)),
        };
        self.advance(PipelineState::Composed)?;

        self.advance(PipelineState::Done)?;
        let elapsed = self.state.elapsed_since_start();
        log::info!(
            "[Orchestrator] [DONE] {} built in {}s",
            iso.display(),
            elapsed.as_secs()
        );

        Ok(PipelineOutcome {
            iso,
            repository,
            repository_reused,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults;
    use crate::error::{BuildError, PrivilegeError};
    use crate::profile::fixture;
    use crate::system::mock::{MockSystem, MOCK_ISO_NAME};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BuildConfiguration) {
        let temp = TempDir::new().unwrap();
        let mut config = defaults(temp.path());
        config.base_profile = temp.path().join("releng");
        fixture::write_base_profile(&config.base_profile);
        (temp, config)
    }

    #[tokio::test]
    async fn test_full_run_reaches_done() {
        let (temp, config) = setup();
        let system = MockSystem::new().with_installed(&["archiso", "base-devel"]);
        let mut pipeline = Pipeline::new(&system, &config);

        let outcome = pipeline.run().await.unwrap();
        assert_eq!(pipeline.phase(), PipelineState::Done);
        assert_eq!(outcome.iso, temp.path().join(MOCK_ISO_NAME));
        assert!(!outcome.repository_reused);
        assert!(outcome.repository.index.is_file());
        assert!(!config.profile_tree_root().exists());
    }

    #[tokio::test]
    async fn test_wrong_password_fails_privilege_stage() {
        let (_temp, config) = setup();
        let system = MockSystem::new().failing("sudo");
        let mut pipeline = Pipeline::new(&system, &config);

        let err = pipeline.run().await.unwrap_err();
        assert_eq!(err.stage, PipelineState::Elevated);
        assert!(matches!(err.source, StageError::Privilege(PrivilegeError::Auth)));
        assert_eq!(pipeline.phase(), PipelineState::Failed);
        assert!(pipeline.state_snapshot().error.unwrap().contains("privilege"));
        assert!(system.calls_to("pacman").is_empty());
    }

    #[tokio::test]
    async fn test_missing_base_profile_fails_profile_stage() {
        let (temp, mut config) = setup();
        config.base_profile = temp.path().join("absent");
        let system = MockSystem::new();
        let mut pipeline = Pipeline::new(&system, &config);

        let err = pipeline.run().await.unwrap_err();
        assert_eq!(err.stage, PipelineState::ProfileReady);
        assert!(system.calls_to("mkarchiso").is_empty());
    }

    #[tokio::test]
    async fn test_composition_failure_fails_compose_stage() {
        let (_temp, config) = setup();
        let system = MockSystem::new().failing("mkarchiso");
        let mut pipeline = Pipeline::new(&system, &config);

        let err = pipeline.run().await.unwrap_err();
        assert_eq!(err.stage, PipelineState::Composed);
        assert!(matches!(
            err.source,
            StageError::Build(BuildError::CompositionFailed(_))
        ));
        assert!(!config.profile_tree_root().exists());
        assert!(fs::read_dir(config.repository_dir()).unwrap().count() > 0);
    }
}
