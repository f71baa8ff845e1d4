//! The per-tick claim-and-spawn loop that hands `ready` tickets to the
//! execution coordinator.
//!
//! One dispatcher runs per orchestrator replica. Multiple replicas can run
//! against the same database concurrently: [`claim_next_ready`]'s
//! `FOR UPDATE SKIP LOCKED` claim is what keeps them from double-claiming a
//! ticket, not anything in this loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use forgewright_db::models::{AssigneeKind, Ticket};
use forgewright_db::queries::tickets as db;

use crate::config::EngineConfig;

/// Executes one claimed ticket to completion. Implemented by
/// [`crate::coordinator::Coordinator`]; kept as a trait here so the
/// dispatcher loop can be tested without a real coordinator.
#[async_trait]
pub trait TicketExecutor: Send + Sync {
    async fn execute(&self, ticket: Ticket);
}

/// Runs the claim-and-spawn loop until `cancel` fires.
pub struct Dispatcher<E: TicketExecutor + 'static> {
    pool: PgPool,
    worker_id: String,
    max_concurrent: usize,
    poll_interval: std::time::Duration,
    executor: Arc<E>,
}

impl<E: TicketExecutor + 'static> Dispatcher<E> {
    pub fn new(pool: PgPool, worker_id: impl Into<String>, config: &EngineConfig, executor: Arc<E>) -> Self {
        Self {
            pool,
            worker_id: worker_id.into(),
            max_concurrent: config.max_concurrent,
            poll_interval: config.poll_interval,
            executor,
        }
    }

    /// Run the loop until `cancel` is triggered. Does not force-transition
    /// tickets still in flight on shutdown; it simply stops claiming new
    /// work and returns once the in-flight set drains or the caller decides
    /// not to wait.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut in_flight: HashMap<Uuid, JoinHandle<()>> = HashMap::new();

        loop {
            in_flight.retain(|_, handle| !handle.is_finished());

            if cancel.is_cancelled() {
                break;
            }

            let free = self.max_concurrent.saturating_sub(in_flight.len());
            for _ in 0..free {
                match db::claim_next_ready(&self.pool, AssigneeKind::Agent, &self.worker_id).await {
                    Ok(Some(ticket)) => {
                        let ticket_id = ticket.id;
                        let executor = Arc::clone(&self.executor);
                        let handle = tokio::spawn(async move {
                            executor.execute(ticket).await;
                        });
                        in_flight.insert(ticket_id, handle);
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to claim next ready ticket");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        tracing::info!(
            worker_id = %self.worker_id,
            in_flight = in_flight.len(),
            "dispatcher stopping; in-flight tickets are left for the reaper to reclaim"
        );
    }
}
