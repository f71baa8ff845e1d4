//! Periodic scan for tickets whose claim has gone stale, reclaiming them
//! back to `ready` so a live dispatcher can pick them up again.
//!
//! [`forgewright_db::queries::tickets::reclaim_stale`] does all the work
//! of the reclaim itself, including the `ticket_events` row -- this module
//! is just the interval timer and the fan-out of each reclaim to the
//! session's event room.

use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use forgewright_db::queries::tickets as db;

use crate::events::{EventBus, TicketEventMessage};

pub struct Reaper {
    pool: PgPool,
    interval: std::time::Duration,
    stale_threshold_secs: i64,
    events: Arc<dyn EventBus>,
}

impl Reaper {
    pub fn new(
        pool: PgPool,
        interval: std::time::Duration,
        stale_threshold: std::time::Duration,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            pool,
            interval,
            stale_threshold_secs: stale_threshold.as_secs() as i64,
            events,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => break,
            }

            match db::reclaim_stale(&self.pool, self.stale_threshold_secs).await {
                Ok(reclaimed) => {
                    for ticket in &reclaimed {
                        tracing::warn!(ticket_id = %ticket.id, "reclaimed stale ticket");
                        self.events.publish(
                            ticket.design_session_id,
                            TicketEventMessage {
                                ticket_id: ticket.id,
                                kind: "reclaimed".to_string(),
                                from_state: None,
                                to_state: Some(forgewright_db::models::TicketState::Ready),
                                payload: serde_json::json!({ "reason": "stale_heartbeat" }),
                            },
                        );
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to scan for stale tickets");
                }
            }
        }
    }
}
