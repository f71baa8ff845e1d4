//! Execution coordinator: runs one claimed ticket through generation,
//! verification, and pull request creation.
//!
//! This is the engine's busiest module. One [`Coordinator::execute`] call
//! covers the whole per-ticket pipeline: resolve the repo, create an
//! isolated workspace, generate a patch, apply it, commit and push, verify
//! (retrying with backoff, regenerating on content failure), open a pull
//! request, and transition the ticket. Every exit path ends in exactly one
//! state transition, so [`state::TicketStateMachine::transition`]'s
//! one-event-per-commit invariant holds no matter which branch is taken.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;

use forgewright_db::models::Ticket;
use forgewright_db::queries::{artifacts, projects};

use crate::config::EngineConfig;
use crate::dispatcher::TicketExecutor;
use crate::events::{EventBus, TicketEventMessage};
use crate::generator::{apply_generated_files, GenerationRequest, Generator, PatchOutcome};
use crate::heartbeat::HeldTickets;
use crate::isolation::Isolation;
use crate::state::dispatch;
use crate::vcs::VcsHost;
use crate::verify::backoff;
use crate::verify::{verify_with_retry, BackoffConfig, VerificationOutcome, VerificationRequest, VerifierClient};

/// How much of a hint file's content is kept on each side of an elision
/// marker when it's folded into generator context. Large files would
/// otherwise dominate the prompt budget for marginal benefit.
const CONTEXT_HEAD_LINES: usize = 60;
const CONTEXT_TAIL_LINES: usize = 40;

pub struct Coordinator {
    pool: PgPool,
    config: EngineConfig,
    worker_id: String,
    isolation: Arc<dyn Isolation>,
    generator: Arc<dyn Generator>,
    verifier: Arc<dyn VerifierClient>,
    vcs: Arc<dyn VcsHost>,
    events: Arc<dyn EventBus>,
    held: Arc<HeldTickets>,
}

impl Coordinator {
    pub fn new(
        pool: PgPool,
        config: EngineConfig,
        worker_id: impl Into<String>,
        isolation: Arc<dyn Isolation>,
        generator: Arc<dyn Generator>,
        verifier: Arc<dyn VerifierClient>,
        vcs: Arc<dyn VcsHost>,
        events: Arc<dyn EventBus>,
        held: Arc<HeldTickets>,
    ) -> Self {
        Self {
            pool,
            config,
            worker_id: worker_id.into(),
            isolation,
            generator,
            verifier,
            vcs,
            events,
            held,
        }
    }

    async fn run_ticket(&self, ticket: &Ticket) -> Result<()> {
        tracing::info!(ticket_id = %ticket.id, worker_id = %self.worker_id, "starting coordinator attempt");

        let project = projects::get_project(&self.pool, ticket.project_id)
            .await?
            .with_context(|| format!("ticket {} references missing project {}", ticket.id, ticket.project_id))?;
        let base_branch = if project.default_base_branch.is_empty() {
            self.config.default_base_branch.clone()
        } else {
            project.default_base_branch.clone()
        };

        let workspace = self
            .isolation
            .create_workspace(&ticket.design_session_id.to_string(), &ticket.id.to_string())
            .await
            .with_context(|| format!("failed to create workspace for ticket {}", ticket.id))?;
        let branch = workspace.branch.clone().unwrap_or_else(|| ticket.branch_name.clone());

        let outcome = self
            .run_generate_verify_loop(ticket, &workspace.path, &branch)
            .await;

        self.isolation
            .extract_results(&workspace)
            .await
            .with_context(|| format!("failed to extract results for ticket {}", ticket.id))?;

        let outcome = outcome?;

        if outcome.passed {
            let pr = self
                .vcs
                .open_pull_request(
                    &project.repo_url,
                    &base_branch,
                    &branch,
                    &ticket.title,
                    &pull_request_body(ticket, &outcome),
                )
                .await
                .with_context(|| format!("failed to open pull request for ticket {}", ticket.id))?;

            let scope_label = scope_label_for(ticket);
            self.vcs
                .add_labels(
                    &project.repo_url,
                    pr.number,
                    &["swarm-generated".to_string(), scope_label],
                )
                .await
                .with_context(|| format!("failed to label pull request for ticket {}", ticket.id))?;

            forgewright_db::queries::tickets::set_pr_metadata(&self.pool, ticket.id, &pr.url).await?;

            dispatch::record_verification_pass(&self.pool, ticket.id, outcome.feedback.clone())
                .await
                .with_context(|| format!("failed to record verification pass for ticket {}", ticket.id))?;

            self.events.publish(
                ticket.design_session_id,
                TicketEventMessage {
                    ticket_id: ticket.id,
                    kind: "pull_request_opened".to_string(),
                    from_state: None,
                    to_state: None,
                    payload: json!({ "pr_url": pr.url }),
                },
            );
        }

        let _ = self.isolation.remove_workspace(&workspace).await;

        Ok(())
    }

    /// The shared generate -> apply -> commit/push -> verify loop. A
    /// generation that produces nothing applicable is treated the same as a
    /// verifier rejection: both consume one attempt of the shared budget.
    async fn run_generate_verify_loop(
        &self,
        ticket: &Ticket,
        working_dir: &Path,
        branch: &str,
    ) -> Result<VerificationOutcome> {
        let mut attempt = ticket.rejection_count + 1;
        let mut previous_feedback: Option<serde_json::Value> = None;

        loop {
            let request = GenerationRequest {
                ticket_id: ticket.id,
                title: ticket.title.clone(),
                description: ticket.description.clone(),
                acceptance_criteria: ticket.acceptance_criteria.clone(),
                hint_files: ticket.hint_files.clone(),
                rag_context: ticket.rag_context.as_ref().map(truncate_for_context),
                previous_feedback: previous_feedback.clone(),
                attempt,
            };

            let response = self
                .generator
                .generate(&request, working_dir)
                .await
                .with_context(|| format!("generator failed for ticket {}", ticket.id))?;

            artifacts::insert_artifact(
                &self.pool,
                ticket.id,
                attempt,
                "generator_output",
                json!({ "summary": response.summary, "diagnostics": response.diagnostics }),
            )
            .await?;

            let patch_outcomes = apply_generated_files(working_dir, &response.files)
                .with_context(|| format!("failed to apply generated files for ticket {}", ticket.id))?;
            let refused: Vec<&PatchOutcome> = patch_outcomes
                .iter()
                .filter(|o| matches!(o, PatchOutcome::Refused { .. }))
                .collect();

            let committed = commit_and_push(working_dir, &ticket.title, attempt, branch)
                .with_context(|| format!("failed to commit/push attempt for ticket {}", ticket.id))?;

            if !response.completed || !refused.is_empty() || !committed {
                let reason = json!({
                    "generator_completed": response.completed,
                    "refused_patches": refused.iter().map(|o| match o {
                        PatchOutcome::Refused { path, reason } => json!({ "path": path, "reason": reason }),
                        _ => json!(null),
                    }).collect::<Vec<_>>(),
                    "committed": committed,
                });

                if attempt as u32 >= self.config.verify_max_retries {
                    dispatch::record_generation_exhausted(&self.pool, ticket.id, reason.clone()).await?;
                    return Ok(VerificationOutcome {
                        passed: false,
                        feedback: reason,
                        ready_for_pr: Some(false),
                        feedback_for_agent: None,
                        evidence: None,
                    });
                }

                previous_feedback = Some(reason);
                attempt += 1;
                continue;
            }

            dispatch::begin_verification(&self.pool, ticket.id)
                .await
                .with_context(|| format!("failed to begin verification for ticket {}", ticket.id))?;

            let verify_request = VerificationRequest {
                ticket_id: ticket.id,
                acceptance_criteria: ticket.acceptance_criteria.clone(),
                branch_name: branch.to_string(),
                attempt,
                phases: Vec::new(),
            };

            let remaining_transport_attempts = self.config.verify_max_retries.saturating_sub(attempt as u32).max(1);
            let verify_result = verify_with_retry(
                self.verifier.as_ref(),
                &verify_request,
                remaining_transport_attempts,
                BackoffConfig::from(&self.config),
            )
            .await;

            let outcome = match verify_result {
                Ok(outcome) => outcome,
                Err(err) => {
                    dispatch::record_verification_fail_exhausted(
                        &self.pool,
                        ticket.id,
                        json!({ "error": err.to_string() }),
                    )
                    .await?;
                    return Err(err);
                }
            };

            artifacts::insert_artifact(
                &self.pool,
                ticket.id,
                attempt,
                "verifier_feedback",
                outcome.feedback.clone(),
            )
            .await?;

            if outcome.passed {
                return Ok(outcome);
            }

            if attempt as u32 >= self.config.verify_max_retries {
                dispatch::record_verification_fail_exhausted(&self.pool, ticket.id, outcome.feedback.clone()).await?;
                return Ok(outcome);
            }

            dispatch::record_verification_fail_retry(&self.pool, ticket.id, outcome.feedback.clone()).await?;

            let delay = backoff::delay_for(attempt as u32, BackoffConfig::from(&self.config));
            tracing::info!(
                ticket_id = %ticket.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "verification failed, backing off before regenerating"
            );
            tokio::time::sleep(delay).await;

            previous_feedback = outcome
                .feedback_for_agent
                .clone()
                .map(|lines| json!({ "feedback_for_agent": lines }))
                .or_else(|| Some(outcome.feedback.clone()));
            attempt += 1;
        }
    }
}

#[async_trait]
impl TicketExecutor for Coordinator {
    async fn execute(&self, ticket: Ticket) {
        let ticket_id = ticket.id;
        self.held.add(ticket_id);
        if let Err(err) = self.run_ticket(&ticket).await {
            tracing::error!(ticket_id = %ticket_id, error = %err, "coordinator attempt failed");
        }
        self.held.remove(ticket_id);
    }
}

fn scope_label_for(ticket: &Ticket) -> String {
    let files = ticket
        .rag_context
        .as_ref()
        .and_then(|ctx| ctx.get("files_to_modify"))
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0);
    let size = match files {
        0..=2 => "small",
        3..=8 => "medium",
        _ => "large",
    };
    format!("scope:{size}")
}

fn pull_request_body(ticket: &Ticket, outcome: &VerificationOutcome) -> String {
    format!(
        "{}\n\n---\nGenerated from ticket `{}`. Verification feedback:\n```json\n{}\n```",
        ticket.description,
        ticket.id,
        serde_json::to_string_pretty(&outcome.feedback).unwrap_or_default()
    )
}

/// Truncate each `files_to_modify` entry's `content` field to head+tail with
/// an elision marker, bounding how much of a large file's text reaches the
/// generator's prompt.
fn truncate_for_context(rag_context: &serde_json::Value) -> serde_json::Value {
    let mut value = rag_context.clone();
    if let Some(files) = value.get_mut("files_to_modify").and_then(|v| v.as_array_mut()) {
        for file in files.iter_mut() {
            if let Some(content) = file.get("content").and_then(|v| v.as_str()).map(str::to_string) {
                let truncated = truncate_lines(&content, CONTEXT_HEAD_LINES, CONTEXT_TAIL_LINES);
                if let Some(obj) = file.as_object_mut() {
                    obj.insert("content".to_string(), json!(truncated));
                }
            }
        }
    }
    value
}

fn truncate_lines(content: &str, head: usize, tail: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= head + tail {
        return content.to_string();
    }
    let elided = lines.len() - head - tail;
    let mut out = lines[..head].join("\n");
    out.push_str(&format!("\n... [{elided} lines elided] ...\n"));
    out.push_str(&lines[lines.len() - tail..].join("\n"));
    out
}

/// Stage all changes, commit if there's anything to commit, and push the
/// branch. Returns `Ok(false)` when there was nothing to commit (the
/// generator made no effective change) rather than treating it as an error.
fn commit_and_push(working_dir: &Path, title: &str, attempt: i32, branch: &str) -> Result<bool> {
    let _ = Command::new("git")
        .args(["config", "user.email", "forgewright@localhost"])
        .current_dir(working_dir)
        .output();
    let _ = Command::new("git")
        .args(["config", "user.name", "forgewright"])
        .current_dir(working_dir)
        .output();

    let add = Command::new("git")
        .args(["add", "-A"])
        .current_dir(working_dir)
        .output()
        .context("failed to run git add")?;
    if !add.status.success() {
        anyhow::bail!("git add failed: {}", String::from_utf8_lossy(&add.stderr));
    }

    let status = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(working_dir)
        .output()
        .context("failed to run git status")?;
    if status.stdout.is_empty() {
        return Ok(false);
    }

    let commit = Command::new("git")
        .args(["commit", "-m", &format!("{title} (attempt {attempt})")])
        .current_dir(working_dir)
        .output()
        .context("failed to run git commit")?;
    if !commit.status.success() {
        anyhow::bail!("git commit failed: {}", String::from_utf8_lossy(&commit.stderr));
    }

    let push = Command::new("git")
        .args(["push", "-u", "origin", branch])
        .current_dir(working_dir)
        .output()
        .context("failed to run git push")?;
    if !push.status.success() {
        anyhow::bail!("git push failed: {}", String::from_utf8_lossy(&push.stderr));
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_lines_leaves_short_content_untouched() {
        let content = "a\nb\nc";
        assert_eq!(truncate_lines(content, 60, 40), content);
    }

    #[test]
    fn truncate_lines_elides_middle_of_long_content() {
        let lines: Vec<String> = (0..200).map(|i| format!("line-{i}")).collect();
        let content = lines.join("\n");
        let truncated = truncate_lines(&content, 5, 5);
        assert!(truncated.contains("line-0"));
        assert!(truncated.contains("line-199"));
        assert!(truncated.contains("elided"));
        assert!(!truncated.contains("line-100"));
    }

    #[test]
    fn scope_label_small_for_few_files() {
        let ticket = sample_ticket(json!({ "files_to_modify": [{"path": "a.rs"}] }));
        assert_eq!(scope_label_for(&ticket), "scope:small");
    }

    #[test]
    fn scope_label_large_for_many_files() {
        let files: Vec<_> = (0..12).map(|i| json!({ "path": format!("f{i}.rs") })).collect();
        let ticket = sample_ticket(json!({ "files_to_modify": files }));
        assert_eq!(scope_label_for(&ticket), "scope:large");
    }

    fn sample_ticket(rag_context: serde_json::Value) -> Ticket {
        use chrono::Utc;
        use forgewright_db::models::{AssigneeKind, TicketState, VerificationStatus};
        use uuid::Uuid;

        Ticket {
            id: Uuid::new_v4(),
            design_session_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            title: "test".to_string(),
            description: "test".to_string(),
            acceptance_criteria: json!([]),
            hint_files: vec![],
            rag_context: Some(rag_context),
            assignee_kind: AssigneeKind::Agent,
            assignee_id: None,
            worker_id: None,
            state: TicketState::InProgress,
            verification_status: VerificationStatus::Unverified,
            rejection_count: 0,
            depends_on: vec![],
            branch_name: "forgewright/test/test".to_string(),
            pr_url: None,
            merged_at: None,
            started_at: None,
            last_heartbeat: None,
            heartbeat_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            unblocked_at: None,
        }
    }
}
