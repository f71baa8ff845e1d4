//! Periodic heartbeat sender: keeps an in-flight worker's claimed tickets
//! alive so the reaper does not reclaim them out from under it.
//!
//! The coordinator does not send heartbeats itself -- generation and
//! verification calls can each run for minutes, so a single background
//! loop per worker process covers every ticket that worker currently holds,
//! independent of how many coordinator tasks are running.

use std::sync::{Arc, Mutex};

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Tracks which tickets a worker currently holds, so [`Heartbeat::run`] can
/// send one bulk heartbeat per tick instead of querying the claim table.
#[derive(Default)]
pub struct HeldTickets {
    ids: Mutex<Vec<Uuid>>,
}

impl HeldTickets {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, ticket_id: Uuid) {
        self.ids.lock().expect("held tickets mutex poisoned").push(ticket_id);
    }

    pub fn remove(&self, ticket_id: Uuid) {
        self.ids
            .lock()
            .expect("held tickets mutex poisoned")
            .retain(|id| *id != ticket_id);
    }

    fn snapshot(&self) -> Vec<Uuid> {
        self.ids.lock().expect("held tickets mutex poisoned").clone()
    }
}

pub struct Heartbeat {
    pool: PgPool,
    worker_id: String,
    interval: std::time::Duration,
    held: Arc<HeldTickets>,
}

impl Heartbeat {
    pub fn new(pool: PgPool, worker_id: impl Into<String>, interval: std::time::Duration, held: Arc<HeldTickets>) -> Self {
        Self {
            pool,
            worker_id: worker_id.into(),
            interval,
            held,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => break,
            }

            let ids = self.held.snapshot();
            if ids.is_empty() {
                continue;
            }

            match forgewright_db::queries::tickets::record_heartbeats_bulk(&self.pool, &ids, &self.worker_id).await {
                Ok(updated) => {
                    tracing::debug!(worker_id = %self.worker_id, held = ids.len(), updated, "sent bulk heartbeat");
                }
                Err(err) => {
                    tracing::error!(worker_id = %self.worker_id, error = %err, "failed to send bulk heartbeat");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_tickets_add_and_remove() {
        let held = HeldTickets::new();
        let id = Uuid::new_v4();
        held.add(id);
        assert_eq!(held.snapshot(), vec![id]);
        held.remove(id);
        assert!(held.snapshot().is_empty());
    }
}
