//! Top-level composition: wires the dispatcher, coordinator, heartbeat,
//! reaper, and sentinel into one engine handle.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
use crate::dispatcher::Dispatcher;
use crate::events::EventBus;
use crate::generator::Generator;
use crate::heartbeat::{Heartbeat, HeldTickets};
use crate::isolation::Isolation;
use crate::reaper::Reaper;
use crate::sentinel::Sentinel;
use crate::vcs::VcsHost;
use crate::verify::VerifierClient;

/// Everything the engine needs to run against a real environment. Each
/// field is a trait object so tests can substitute fakes without touching
/// `Engine` itself.
pub struct EngineDeps {
    pub pool: PgPool,
    pub isolation: Arc<dyn Isolation>,
    pub generator: Arc<dyn Generator>,
    pub verifier: Arc<dyn VerifierClient>,
    pub vcs: Arc<dyn VcsHost>,
    pub events: Arc<dyn EventBus>,
}

/// A running engine instance: the dispatcher, heartbeat, reaper, and
/// sentinel loops, each on their own task under a shared cancellation
/// token.
pub struct EngineHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Signal every loop to stop claiming new work. Returns once all loops
    /// have exited. In-flight coordinator attempts are not aborted -- they
    /// finish on their own, or are picked up by the reaper once their
    /// heartbeat goes stale after this process exits.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

/// Start every background loop for one orchestrator replica.
///
/// `worker_id` should be stable for the lifetime of the process and unique
/// across replicas (e.g. hostname + pid) -- it is the value stored in
/// `tickets.worker_id` for every ticket this replica claims.
pub fn start(config: EngineConfig, worker_id: impl Into<String>, deps: EngineDeps) -> EngineHandle {
    let worker_id = worker_id.into();
    let cancel = CancellationToken::new();
    let held = HeldTickets::new();

    let coordinator = Arc::new(Coordinator::new(
        deps.pool.clone(),
        config.clone(),
        worker_id.clone(),
        Arc::clone(&deps.isolation),
        Arc::clone(&deps.generator),
        Arc::clone(&deps.verifier),
        Arc::clone(&deps.vcs),
        Arc::clone(&deps.events),
        Arc::clone(&held),
    ));

    let dispatcher = Dispatcher::new(deps.pool.clone(), worker_id.clone(), &config, coordinator);
    let heartbeat = Heartbeat::new(deps.pool.clone(), worker_id.clone(), config.heartbeat_interval, held);
    let reaper = Reaper::new(
        deps.pool.clone(),
        config.reaper_interval,
        config.stale_threshold,
        Arc::clone(&deps.events),
    );
    let sentinel = Sentinel::new(
        deps.pool.clone(),
        worker_id.clone(),
        config.poll_interval,
        Arc::clone(&deps.verifier),
        Arc::clone(&deps.vcs),
        Arc::clone(&deps.events),
    );

    let tasks = vec![
        tokio::spawn({
            let cancel = cancel.clone();
            async move { dispatcher.run(cancel).await }
        }),
        tokio::spawn({
            let cancel = cancel.clone();
            async move { heartbeat.run(cancel).await }
        }),
        tokio::spawn({
            let cancel = cancel.clone();
            async move { reaper.run(cancel).await }
        }),
        tokio::spawn({
            let cancel = cancel.clone();
            async move { sentinel.run(cancel).await }
        }),
    ];

    tracing::info!(worker_id = %worker_id, "engine started");

    EngineHandle { cancel, tasks }
}
