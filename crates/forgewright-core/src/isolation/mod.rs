//! Workspace isolation abstraction.
//!
//! Decouples workspace creation from `WorktreeManager` so that different
//! backends (git worktrees, Docker containers) can be used interchangeably.

pub mod container;
pub mod worktree;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;

/// Information about a created workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceInfo {
    /// Path the coordinator/generator should work against (worktree dir, or
    /// `/workspace` inside a container).
    pub path: PathBuf,
    /// Host-side path backing the workspace, when it differs from `path`
    /// (container mode copies a host worktree in and back out).
    pub host_path: Option<PathBuf>,
    /// Git branch name, if applicable.
    pub branch: Option<String>,
    /// Docker container ID, if applicable.
    pub container_id: Option<String>,
}

/// Trait for workspace isolation backends.
#[async_trait]
pub trait Isolation: Send + Sync {
    /// Human-readable name of the isolation backend (e.g. "worktree", "container").
    fn name(&self) -> &str;

    /// Create an isolated workspace for a ticket's branch.
    async fn create_workspace(&self, branch_scope: &str, ticket_slug: &str) -> Result<WorkspaceInfo>;

    /// Copy results back to the host worktree. A no-op for backends that
    /// already write directly to the host filesystem (worktree mode).
    async fn extract_results(&self, info: &WorkspaceInfo) -> Result<()>;

    /// Remove a previously created workspace.
    async fn remove_workspace(&self, info: &WorkspaceInfo) -> Result<()>;
}

/// Factory function: create an isolation backend from a mode string.
pub fn create_isolation(mode: &str, repo_path: &Path) -> Result<Arc<dyn Isolation>> {
    match mode {
        "worktree" => {
            let mgr = crate::worktree::WorktreeManager::new(repo_path, None)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            Ok(Arc::new(worktree::WorktreeIsolation::new(mgr)))
        }
        "container" => {
            let mgr = crate::worktree::WorktreeManager::new(repo_path, None)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            let config = container::ContainerConfig {
                image: "ubuntu:24.04".to_string(),
                extra_flags: vec![],
            };
            Ok(Arc::new(container::ContainerIsolation::new(config, mgr)))
        }
        other => {
            bail!("unknown isolation mode: {other:?} (expected \"worktree\" or \"container\")")
        }
    }
}
