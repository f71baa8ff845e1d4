//! Named semantic wrappers over [`super::TicketStateMachine::transition`].
//!
//! Each function names the transition by what it means rather than by its
//! `(from, to)` pair, so callers in `coordinator`/`sentinel`/`cascade` read
//! as a sequence of domain events.

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use forgewright_db::models::{TicketState, VerificationStatus};

use super::TicketStateMachine as Sm;

/// `draft -> ready`: the ticket has no unmet dependencies at creation time.
pub async fn activate_ticket(pool: &PgPool, ticket_id: Uuid) -> Result<()> {
    Sm::transition(
        pool,
        ticket_id,
        TicketState::Draft,
        TicketState::Ready,
        "activated",
        json!({}),
    )
    .await
}

/// `draft -> blocked`: the ticket has unmet dependencies at creation time.
pub async fn block_ticket(pool: &PgPool, ticket_id: Uuid) -> Result<()> {
    Sm::transition(
        pool,
        ticket_id,
        TicketState::Draft,
        TicketState::Blocked,
        "blocked",
        json!({}),
    )
    .await
}

/// `in_progress -> needs_review`: the generator could not produce an
/// applicable change (declined, or every proposed patch was refused) and
/// the ticket has exhausted its retries without ever reaching a verifier.
pub async fn record_generation_exhausted(
    pool: &PgPool,
    ticket_id: Uuid,
    reason: serde_json::Value,
) -> Result<()> {
    Sm::transition(
        pool,
        ticket_id,
        TicketState::InProgress,
        TicketState::NeedsReview,
        "generation_exhausted",
        reason,
    )
    .await
}

/// `in_progress -> verifying`: the generator has produced a patch and the
/// coordinator is handing it to the verifier.
pub async fn begin_verification(pool: &PgPool, ticket_id: Uuid) -> Result<()> {
    Sm::transition(
        pool,
        ticket_id,
        TicketState::InProgress,
        TicketState::Verifying,
        "verification_started",
        json!({}),
    )
    .await
}

/// `verifying -> in_review`: the verifier passed the attempt; it now waits
/// on the sentinel reviewer.
pub async fn record_verification_pass(
    pool: &PgPool,
    ticket_id: Uuid,
    summary: serde_json::Value,
) -> Result<()> {
    Sm::transition_with_verification(
        pool,
        ticket_id,
        TicketState::Verifying,
        TicketState::InReview,
        "verification_passed",
        summary,
        Some((VerificationStatus::Passed, false)),
    )
    .await
}

/// `verifying -> in_progress`: the verifier rejected the attempt and the
/// ticket still has retries left, so the coordinator tries again.
pub async fn record_verification_fail_retry(
    pool: &PgPool,
    ticket_id: Uuid,
    feedback: serde_json::Value,
) -> Result<()> {
    Sm::transition_with_verification(
        pool,
        ticket_id,
        TicketState::Verifying,
        TicketState::InProgress,
        "verification_failed_retrying",
        feedback,
        Some((VerificationStatus::Failed, true)),
    )
    .await
}

/// `verifying -> needs_review`: the verifier rejected the attempt and the
/// ticket has exhausted its retries, so an operator has to look at it.
pub async fn record_verification_fail_exhausted(
    pool: &PgPool,
    ticket_id: Uuid,
    feedback: serde_json::Value,
) -> Result<()> {
    Sm::transition_with_verification(
        pool,
        ticket_id,
        TicketState::Verifying,
        TicketState::NeedsReview,
        "verification_exhausted",
        feedback,
        Some((VerificationStatus::Failed, true)),
    )
    .await
}

/// `reviewing -> merged`: the sentinel reviewer approved the ticket's PR.
pub async fn record_sentinel_pass(pool: &PgPool, ticket_id: Uuid) -> Result<()> {
    Sm::transition_with_verification(
        pool,
        ticket_id,
        TicketState::Reviewing,
        TicketState::Merged,
        "sentinel_approved",
        json!({}),
        Some((VerificationStatus::Passed, false)),
    )
    .await
}

/// `reviewing -> sentinel_failed`: the sentinel reviewer rejected the
/// ticket's PR.
pub async fn record_sentinel_fail(
    pool: &PgPool,
    ticket_id: Uuid,
    reason: serde_json::Value,
) -> Result<()> {
    Sm::transition_with_verification(
        pool,
        ticket_id,
        TicketState::Reviewing,
        TicketState::SentinelFailed,
        "sentinel_rejected",
        reason,
        Some((VerificationStatus::SentinelRejected, true)),
    )
    .await
}

/// `sentinel_failed -> in_progress`: the coordinator re-dispatches a
/// sentinel-rejected ticket for another attempt.
pub async fn retry_after_sentinel_rejection(
    pool: &PgPool,
    ticket_id: Uuid,
    worker_id: &str,
) -> Result<()> {
    Sm::transition(
        pool,
        ticket_id,
        TicketState::SentinelFailed,
        TicketState::InProgress,
        "retrying_after_sentinel_rejection",
        json!({ "worker_id": worker_id }),
    )
    .await
}

/// `merged -> done`: an external deploy collaborator observed the merged
/// change actually ship and the ticket's lifecycle is complete. Optional --
/// the sentinel itself only ever drives a ticket as far as `merged`; no
/// in-core caller invokes this transition.
pub async fn mark_done(pool: &PgPool, ticket_id: Uuid) -> Result<()> {
    Sm::transition(
        pool,
        ticket_id,
        TicketState::Merged,
        TicketState::Done,
        "done",
        json!({}),
    )
    .await
}

/// `needs_review -> in_progress`: an operator dispatches a needs-review
/// ticket for another attempt.
pub async fn operator_retry(pool: &PgPool, ticket_id: Uuid, worker_id: &str) -> Result<()> {
    Sm::transition(
        pool,
        ticket_id,
        TicketState::NeedsReview,
        TicketState::InProgress,
        "operator_retry",
        json!({ "worker_id": worker_id }),
    )
    .await
}

/// Cancel a ticket from whichever cancellable state it currently holds.
pub async fn cancel_ticket(
    pool: &PgPool,
    ticket_id: Uuid,
    reason: serde_json::Value,
) -> Result<()> {
    let ticket = Sm::require_ticket(pool, ticket_id).await?;
    Sm::transition(
        pool,
        ticket_id,
        ticket.state,
        TicketState::Cancelled,
        "cancelled",
        reason,
    )
    .await
}
