//! Native git management using the `git2` crate.
//!
//! Source recipes (PKGBUILD plus auxiliary files) are fetched with libgit2
//! instead of an external `git` binary.

use git2::{build::RepoBuilder, Repository};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Clone error: {0}")]
    Clone(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git2 error: {0}")]
    Git2(#[from] git2::Error),
}

/// Result type for git operations
pub type GitResult<T> = Result<T, GitError>;

/// A cloned recipe repository.
pub struct GitManager {
    repo_path: PathBuf,
}

impl GitManager {
    /// Opens an existing repository
    pub fn open(repo_path: impl AsRef<Path>) -> GitResult<Self> {
        let repo_path = repo_path.as_ref().to_path_buf();
        Repository::open(&repo_path).map_err(|e| {
            GitError::Repository(format!(
                "Failed to open repository at {:?}: {}",
                repo_path, e
            ))
        })?;
        Ok(GitManager { repo_path })
    }

    /// Clones a repository from a URL to the target path
    ///
    /// Attempts a shallow clone (depth=1) first and falls back to a full clone
    /// for transports that do not support shallow fetches.
    ///
    /// # Arguments
    /// * `url` - The repository URL (HTTP/HTTPS/SSH or local path)
    /// * `target_path` - The local path where the repository will be cloned
    ///
    /// # Errors
    /// Returns `GitError::Clone` if both clone attempts fail
    pub fn clone(url: &str, target_path: impl AsRef<Path>) -> GitResult<Self> {
        let target_path = target_path.as_ref();
        log::info!("[Git] [CLONE] {} -> {}", url, target_path.display());

        if let Err(shallow_err) = Self::shallow_clone(url, target_path) {
            log::debug!("[Git] [CLONE] Shallow clone failed: {}", shallow_err);
            log::debug!("[Git] [CLONE] Falling back to standard (full) clone");

            // A failed shallow clone can leave a partial checkout behind
            if target_path.exists() {
                fs::remove_dir_all(target_path)?;
            }
            Repository::clone(url, target_path).map_err(|e| {
                GitError::Clone(format!(
                    "Failed to clone {} to {:?}: {}",
                    url, target_path, e
                ))
            })?;
        }

        GitManager::open(target_path)
    }

    fn shallow_clone(url: &str, target_path: &Path) -> GitResult<()> {
        let mut fetch_options = git2::FetchOptions::new();
        fetch_options.depth(1);

        let mut callbacks = git2::RemoteCallbacks::new();
        callbacks.transfer_progress(|progress| {
            let total = progress.total_objects();
            if total > 0 && progress.received_objects() == total {
                log::debug!(
                    "[Git] [SHALLOW-CLONE] {} objects received ({} indexed)",
                    total,
                    progress.indexed_objects()
                );
            }
            true
        });
        fetch_options.remote_callbacks(callbacks);

        RepoBuilder::new()
            .fetch_options(fetch_options)
            .clone(url, target_path)
            .map_err(|e| GitError::Clone(format!("Shallow clone failed for {}: {}", url, e)))?;
        Ok(())
    }

    /// Gets the current HEAD commit hash
    pub fn get_head_commit(&self) -> GitResult<String> {
        let repo = Repository::open(&self.repo_path)
            .map_err(|e| GitError::Repository(format!("Failed to open repository: {}", e)))?;

        let head = repo
            .head()
            .map_err(|e| GitError::Repository(format!("Failed to read HEAD: {}", e)))?;

        let commit_id = head
            .target()
            .ok_or_else(|| GitError::Repository("HEAD is not a direct reference".to_string()))?;

        Ok(commit_id.to_string())
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }
}
