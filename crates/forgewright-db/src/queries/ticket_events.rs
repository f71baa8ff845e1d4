//! Database query functions for the append-only `ticket_events` log.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{TicketEvent, TicketState};

/// Append a new event row for a ticket. Events are never updated or deleted.
pub async fn insert_event<'e>(
    executor: impl PgExecutor<'e>,
    ticket_id: Uuid,
    kind: &str,
    from_state: Option<TicketState>,
    to_state: Option<TicketState>,
    payload: serde_json::Value,
) -> Result<TicketEvent> {
    let event = sqlx::query_as::<_, TicketEvent>(
        "INSERT INTO ticket_events (ticket_id, kind, from_state, to_state, payload) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(ticket_id)
    .bind(kind)
    .bind(from_state)
    .bind(to_state)
    .bind(payload)
    .fetch_one(executor)
    .await
    .context("failed to insert ticket event")?;

    Ok(event)
}

/// List every event recorded for a ticket, oldest first.
pub async fn list_events_for_ticket<'e>(
    executor: impl PgExecutor<'e>,
    ticket_id: Uuid,
) -> Result<Vec<TicketEvent>> {
    let events = sqlx::query_as::<_, TicketEvent>(
        "SELECT * FROM ticket_events WHERE ticket_id = $1 ORDER BY recorded_at ASC, id ASC",
    )
    .bind(ticket_id)
    .fetch_all(executor)
    .await
    .context("failed to list events for ticket")?;

    Ok(events)
}

/// List the most recent events across a design session's tickets, useful
/// for the `forgewright events` CLI stream / room-addressed event bus
/// backfill.
pub async fn list_recent_events_for_session(
    pool: &sqlx::PgPool,
    design_session_id: Uuid,
    limit: i64,
) -> Result<Vec<TicketEvent>> {
    let events = sqlx::query_as::<_, TicketEvent>(
        "SELECT e.* FROM ticket_events e \
         JOIN tickets t ON t.id = e.ticket_id \
         WHERE t.design_session_id = $1 \
         ORDER BY e.recorded_at DESC, e.id DESC \
         LIMIT $2",
    )
    .bind(design_session_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list recent events for session")?;

    Ok(events)
}
