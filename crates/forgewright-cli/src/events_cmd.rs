//! `forgewright events <ticket-id>` command: print a ticket's event log.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use forgewright_db::queries::{ticket_events, tickets};

/// Run the events command.
pub async fn run_events(pool: &PgPool, ticket_id_str: &str) -> Result<()> {
    let ticket_id =
        Uuid::parse_str(ticket_id_str).with_context(|| format!("invalid ticket ID: {ticket_id_str}"))?;

    let ticket = tickets::get_ticket(pool, ticket_id)
        .await?
        .with_context(|| format!("ticket {ticket_id} not found"))?;

    println!("Ticket: {} ({})", ticket.title, ticket.id);
    println!("State: {} (attempt {})", ticket.state, ticket.rejection_count + 1);
    println!();

    let events = ticket_events::list_events_for_ticket(pool, ticket_id).await?;
    if events.is_empty() {
        println!("No events recorded.");
        return Ok(());
    }

    println!("Events ({}):", events.len());
    for event in &events {
        let time = event.recorded_at.format("%H:%M:%S%.3f");
        let transition = match (event.from_state, event.to_state) {
            (Some(from), Some(to)) => format!("{from} -> {to}"),
            (None, Some(to)) => format!("-> {to}"),
            (Some(from), None) => format!("{from} ->"),
            (None, None) => "-".to_string(),
        };
        println!("  [{time}] {} ({transition}) {}", event.kind, event.payload);
    }

    Ok(())
}
