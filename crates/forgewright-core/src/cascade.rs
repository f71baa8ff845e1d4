//! Dependency cascade: activating a design session's tickets and promoting
//! `blocked` tickets to `ready` as their dependencies complete.

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use forgewright_db::queries::tickets as db;

use crate::events::{EventBus, TicketEventMessage};
use crate::state::dispatch;

/// Activate every ticket in a freshly-approved design session: a ticket
/// with no dependencies goes straight to `ready`, everything else starts
/// `blocked` until [`promote_ready`] clears it.
pub async fn activate_session_tickets(
    pool: &PgPool,
    events: &dyn EventBus,
    design_session_id: Uuid,
) -> Result<()> {
    let tickets = db::list_tickets_for_session(pool, design_session_id).await?;

    for ticket in tickets {
        if ticket.depends_on.is_empty() {
            dispatch::activate_ticket(pool, ticket.id).await?;
            events.publish(
                design_session_id,
                TicketEventMessage {
                    ticket_id: ticket.id,
                    kind: "activated".to_string(),
                    from_state: None,
                    to_state: None,
                    payload: json!({}),
                },
            );
        } else {
            dispatch::block_ticket(pool, ticket.id).await?;
            events.publish(
                design_session_id,
                TicketEventMessage {
                    ticket_id: ticket.id,
                    kind: "blocked".to_string(),
                    from_state: None,
                    to_state: None,
                    payload: json!({ "depends_on": ticket.depends_on }),
                },
            );
        }
    }

    Ok(())
}

/// Promote every `blocked` ticket in a design session whose dependencies
/// have all reached a terminal success state. Called after any ticket
/// reaches `done` or `merged`, from whichever coordinator/sentinel instance
/// observed it -- the `NOT EXISTS` check in the underlying query makes this
/// safe to call redundantly from multiple replicas.
pub async fn promote_ready(pool: &PgPool, events: &dyn EventBus, design_session_id: Uuid) -> Result<usize> {
    let promoted = db::promote_blocked_to_ready(pool, design_session_id).await?;

    for ticket in &promoted {
        events.publish(
            design_session_id,
            TicketEventMessage {
                ticket_id: ticket.id,
                kind: "unblocked".to_string(),
                from_state: Some(forgewright_db::models::TicketState::Blocked),
                to_state: Some(forgewright_db::models::TicketState::Ready),
                payload: json!({}),
            },
        );
    }

    Ok(promoted.len())
}
