//! Sentinel review: the second, independent verification pass a ticket's
//! pull request goes through before it merges.
//!
//! The sentinel reuses the same [`VerifierClient`] adapter the coordinator
//! uses for its own verification pass -- operationally this is often a
//! stricter phase set or a different model/prompt on the same verifier
//! service, not a different trait.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use forgewright_db::queries::tickets as db;

use crate::cascade;
use crate::events::{EventBus, TicketEventMessage};
use crate::state::dispatch;
use crate::vcs::VcsHost;
use crate::verify::{VerificationRequest, VerifierClient};

pub struct Sentinel {
    pool: PgPool,
    worker_id: String,
    poll_interval: std::time::Duration,
    verifier: Arc<dyn VerifierClient>,
    vcs: Arc<dyn VcsHost>,
    events: Arc<dyn EventBus>,
}

impl Sentinel {
    pub fn new(
        pool: PgPool,
        worker_id: impl Into<String>,
        poll_interval: std::time::Duration,
        verifier: Arc<dyn VerifierClient>,
        vcs: Arc<dyn VcsHost>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            pool,
            worker_id: worker_id.into(),
            poll_interval,
            verifier,
            vcs,
            events,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            match db::claim_next_for_review(&self.pool, &self.worker_id).await {
                Ok(Some(ticket)) => {
                    let ticket_id = ticket.id;
                    if let Err(err) = self.review_one(&ticket).await {
                        tracing::error!(ticket_id = %ticket_id, error = %err, "sentinel review failed");
                    }
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(error = %err, "failed to claim next ticket for sentinel review");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => break,
            }
        }
    }

    async fn review_one(&self, ticket: &forgewright_db::models::Ticket) -> Result<()> {
        self.events.publish(
            ticket.design_session_id,
            TicketEventMessage {
                ticket_id: ticket.id,
                kind: "sentinel_started".to_string(),
                from_state: None,
                to_state: None,
                payload: json!({}),
            },
        );

        let request = VerificationRequest {
            ticket_id: ticket.id,
            acceptance_criteria: ticket.acceptance_criteria.clone(),
            branch_name: ticket.branch_name.clone(),
            attempt: ticket.rejection_count + 1,
            phases: vec!["sentinel".to_string()],
        };

        let outcome = match self.verifier.verify(&request).await {
            Ok(outcome) => outcome,
            Err((_, err)) => {
                dispatch::record_sentinel_fail(&self.pool, ticket.id, json!({ "error": err.to_string() })).await?;
                return Err(err);
            }
        };

        let project = forgewright_db::queries::projects::get_project(&self.pool, ticket.project_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("ticket {} references missing project {}", ticket.id, ticket.project_id))?;

        if outcome.passed {
            let pr_number = ticket
                .pr_url
                .as_deref()
                .and_then(pull_request_number)
                .ok_or_else(|| anyhow::anyhow!("ticket {} has no pull request to merge", ticket.id))?;

            self.vcs.merge_pull_request(&project.repo_url, pr_number).await?;

            dispatch::record_sentinel_pass(&self.pool, ticket.id).await?;

            self.events.publish(
                ticket.design_session_id,
                TicketEventMessage {
                    ticket_id: ticket.id,
                    kind: "merged".to_string(),
                    from_state: None,
                    to_state: Some(forgewright_db::models::TicketState::Merged),
                    payload: json!({}),
                },
            );

            cascade::promote_ready(&self.pool, self.events.as_ref(), ticket.design_session_id).await?;
        } else {
            dispatch::record_sentinel_fail(&self.pool, ticket.id, outcome.feedback.clone()).await?;

            self.events.publish(
                ticket.design_session_id,
                TicketEventMessage {
                    ticket_id: ticket.id,
                    kind: "sentinel_failed".to_string(),
                    from_state: None,
                    to_state: Some(forgewright_db::models::TicketState::SentinelFailed),
                    payload: outcome.feedback.clone(),
                },
            );
        }

        Ok(())
    }
}

/// Extract a pull request number from a stored PR URL
/// (`https://github.com/owner/repo/pull/123`). Hosts that shape URLs
/// differently will need their own extraction once they're supported.
fn pull_request_number(pr_url: &str) -> Option<u64> {
    pr_url.rsplit('/').next()?.parse().ok()
}
