//! The `VcsHost` trait -- opening, checking, and merging pull requests on
//! an external code host.
//!
//! `reqwest` is the one dependency this crate adds beyond its existing
//! stack for talking to a VCS host's REST API (see `DESIGN.md`).

pub mod github;

use anyhow::Result;
use async_trait::async_trait;

pub use github::GitHubVcs;

/// A pull request opened against a project's repository.
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub url: String,
    pub number: u64,
    pub merged: bool,
}

/// Adapter interface for the code host a project's pull requests live on.
#[async_trait]
pub trait VcsHost: Send + Sync {
    /// Human-readable name for this host (e.g. "github").
    fn name(&self) -> &str;

    /// Open a pull request from `branch_name` onto `base_branch`.
    ///
    /// Idempotent: if a PR already exists for the branch, returns that PR
    /// rather than creating a duplicate.
    async fn open_pull_request(
        &self,
        repo_url: &str,
        base_branch: &str,
        branch_name: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest>;

    /// Fetch the current state of a previously opened pull request.
    async fn get_pull_request(&self, repo_url: &str, number: u64) -> Result<PullRequest>;

    /// Merge a pull request as a squash merge, deleting the source branch
    /// afterward. Idempotent: merging an already-merged PR succeeds
    /// without error.
    async fn merge_pull_request(&self, repo_url: &str, number: u64) -> Result<()>;

    /// Attach labels to a pull request (e.g. `swarm-generated`,
    /// `scope:small`). Best-effort: callers should not fail a merge over a
    /// label that didn't stick.
    async fn add_labels(&self, repo_url: &str, number: u64, labels: &[String]) -> Result<()>;
}
