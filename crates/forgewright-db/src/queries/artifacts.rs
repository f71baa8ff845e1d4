//! Database query functions for the `ticket_artifacts` table.
//!
//! Artifacts hold the evidence trail for a ticket's attempts: generator
//! output, verifier feedback, sentinel review notes. They are keyed by
//! `(ticket_id, attempt, kind)` so a retried ticket keeps every prior
//! attempt's record rather than overwriting it.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::TicketArtifact;

/// Record a new artifact for a ticket attempt.
pub async fn insert_artifact<'e>(
    executor: impl PgExecutor<'e>,
    ticket_id: Uuid,
    attempt: i32,
    kind: &str,
    content: serde_json::Value,
) -> Result<TicketArtifact> {
    let artifact = sqlx::query_as::<_, TicketArtifact>(
        "INSERT INTO ticket_artifacts (ticket_id, attempt, kind, content) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(ticket_id)
    .bind(attempt)
    .bind(kind)
    .bind(content)
    .fetch_one(executor)
    .await
    .context("failed to insert ticket artifact")?;

    Ok(artifact)
}

/// List every artifact recorded for a ticket, in attempt then creation order.
pub async fn list_artifacts_for_ticket<'e>(
    executor: impl PgExecutor<'e>,
    ticket_id: Uuid,
) -> Result<Vec<TicketArtifact>> {
    let artifacts = sqlx::query_as::<_, TicketArtifact>(
        "SELECT * FROM ticket_artifacts WHERE ticket_id = $1 \
         ORDER BY attempt ASC, created_at ASC",
    )
    .bind(ticket_id)
    .fetch_all(executor)
    .await
    .context("failed to list artifacts for ticket")?;

    Ok(artifacts)
}

/// List artifacts of a specific kind (e.g. `"verifier_feedback"`) for a
/// ticket's most recent attempt.
pub async fn list_artifacts_for_attempt<'e>(
    executor: impl PgExecutor<'e>,
    ticket_id: Uuid,
    attempt: i32,
    kind: &str,
) -> Result<Vec<TicketArtifact>> {
    let artifacts = sqlx::query_as::<_, TicketArtifact>(
        "SELECT * FROM ticket_artifacts \
         WHERE ticket_id = $1 AND attempt = $2 AND kind = $3 \
         ORDER BY created_at ASC",
    )
    .bind(ticket_id)
    .bind(attempt)
    .bind(kind)
    .fetch_all(executor)
    .await
    .context("failed to list artifacts for attempt")?;

    Ok(artifacts)
}
