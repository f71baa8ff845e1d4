//! GitHub implementation of [`VcsHost`](super::VcsHost), talking to the
//! REST API over `reqwest`.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;

use super::{PullRequest, VcsHost};

/// GitHub-backed VCS host. `token` is the out-of-band auth secret read from
/// the engine's configuration -- never logged, never stored on a ticket.
pub struct GitHubVcs {
    client: reqwest::Client,
    token: String,
    api_base: String,
}

impl GitHubVcs {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            api_base: "https://api.github.com".to_string(),
        }
    }

    /// Parse `owner/repo` out of a `repo_url` of the form
    /// `https://github.com/<owner>/<repo>` or `<owner>/<repo>`.
    fn owner_repo(repo_url: &str) -> Result<(String, String)> {
        let trimmed = repo_url
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .rsplit("github.com/")
            .next()
            .unwrap_or(repo_url);
        let mut parts = trimmed.rsplitn(2, '/');
        let repo = parts.next().context("repo_url missing repo segment")?;
        let owner = parts.next().context("repo_url missing owner segment")?;
        Ok((owner.to_string(), repo.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct GhPullRequest {
    html_url: String,
    number: u64,
    merged: Option<bool>,
}

impl From<GhPullRequest> for PullRequest {
    fn from(gh: GhPullRequest) -> Self {
        PullRequest {
            url: gh.html_url,
            number: gh.number,
            merged: gh.merged.unwrap_or(false),
        }
    }
}

#[async_trait]
impl VcsHost for GitHubVcs {
    fn name(&self) -> &str {
        "github"
    }

    async fn open_pull_request(
        &self,
        repo_url: &str,
        base_branch: &str,
        branch_name: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let (owner, repo) = Self::owner_repo(repo_url)?;

        // Idempotence: look for an existing open PR from this branch first.
        let list_url = format!("{}/repos/{owner}/{repo}/pulls", self.api_base);
        let existing: Vec<GhPullRequest> = self
            .client
            .get(&list_url)
            .bearer_auth(&self.token)
            .header("User-Agent", "forgewright")
            .query(&[("head", format!("{owner}:{branch_name}")), ("state", "open".into())])
            .send()
            .await
            .context("failed to list existing pull requests")?
            .json()
            .await
            .context("failed to parse pull request list")?;

        if let Some(found) = existing.into_iter().next() {
            return Ok(found.into());
        }

        let create_url = format!("{}/repos/{owner}/{repo}/pulls", self.api_base);
        let response = self
            .client
            .post(&create_url)
            .bearer_auth(&self.token)
            .header("User-Agent", "forgewright")
            .json(&serde_json::json!({
                "title": title,
                "body": body,
                "head": branch_name,
                "base": base_branch,
            }))
            .send()
            .await
            .context("failed to create pull request")?;

        if !response.status().is_success() {
            bail!(
                "GitHub rejected pull request creation for {owner}/{repo}: {}",
                response.status()
            );
        }

        let gh: GhPullRequest = response
            .json()
            .await
            .context("failed to parse created pull request")?;
        Ok(gh.into())
    }

    async fn get_pull_request(&self, repo_url: &str, number: u64) -> Result<PullRequest> {
        let (owner, repo) = Self::owner_repo(repo_url)?;
        let url = format!("{}/repos/{owner}/{repo}/pulls/{number}", self.api_base);
        let gh: GhPullRequest = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header("User-Agent", "forgewright")
            .send()
            .await
            .context("failed to fetch pull request")?
            .json()
            .await
            .context("failed to parse pull request")?;
        Ok(gh.into())
    }

    async fn merge_pull_request(&self, repo_url: &str, number: u64) -> Result<()> {
        let (owner, repo) = Self::owner_repo(repo_url)?;
        let url = format!("{}/repos/{owner}/{repo}/pulls/{number}/merge", self.api_base);
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .header("User-Agent", "forgewright")
            .json(&serde_json::json!({ "merge_method": "squash" }))
            .send()
            .await
            .context("failed to merge pull request")?;

        // 405/409 with "already merged" is treated as success for idempotence.
        let already_merged = if response.status().is_success() {
            false
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if body.contains("already been merged") {
                true
            } else {
                bail!("GitHub rejected pull request merge for {owner}/{repo}#{number}: {status} {body}");
            }
        };
        let _ = already_merged;

        let pr = self.get_pull_request(repo_url, number).await?;
        let branch = self.head_branch(&owner, &repo, number).await?;
        let ref_url = format!("{}/repos/{owner}/{repo}/git/refs/heads/{branch}", self.api_base);
        let delete = self
            .client
            .delete(&ref_url)
            .bearer_auth(&self.token)
            .header("User-Agent", "forgewright")
            .send()
            .await
            .context("failed to delete merged branch")?;
        // A 422 means the ref is already gone; not an error.
        if !delete.status().is_success() && delete.status().as_u16() != 422 {
            tracing::warn!(
                owner, repo, number, branch, status = %delete.status(),
                "failed to delete branch after merge"
            );
        }
        let _ = pr;

        Ok(())
    }

    async fn add_labels(&self, repo_url: &str, number: u64, labels: &[String]) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        let (owner, repo) = Self::owner_repo(repo_url)?;
        let url = format!("{}/repos/{owner}/{repo}/issues/{number}/labels", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("User-Agent", "forgewright")
            .json(&serde_json::json!({ "labels": labels }))
            .send()
            .await
            .context("failed to add labels to pull request")?;

        if !response.status().is_success() {
            tracing::warn!(
                owner, repo, number, status = %response.status(),
                "failed to attach labels to pull request"
            );
        }
        Ok(())
    }
}

impl GitHubVcs {
    /// Look up the head branch name for a pull request, needed to delete it
    /// post-merge since the merge response itself doesn't carry it.
    async fn head_branch(&self, owner: &str, repo: &str, number: u64) -> Result<String> {
        #[derive(Debug, Deserialize)]
        struct Head {
            #[serde(rename = "ref")]
            ref_name: String,
        }
        #[derive(Debug, Deserialize)]
        struct PrWithHead {
            head: Head,
        }
        let url = format!("{}/repos/{owner}/{repo}/pulls/{number}", self.api_base);
        let pr: PrWithHead = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header("User-Agent", "forgewright")
            .send()
            .await
            .context("failed to fetch pull request head")?
            .json()
            .await
            .context("failed to parse pull request head")?;
        Ok(pr.head.ref_name)
    }
}
