//! Database query functions for the `tickets` table.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{AssigneeKind, Ticket, TicketState};

/// Fields required to insert a new ticket in `draft` state.
pub struct NewTicket<'a> {
    pub design_session_id: Uuid,
    pub project_id: Uuid,
    pub tenant_id: Uuid,
    pub title: &'a str,
    pub description: &'a str,
    pub acceptance_criteria: serde_json::Value,
    pub hint_files: Vec<String>,
    pub rag_context: Option<serde_json::Value>,
    pub depends_on: Vec<Uuid>,
    pub branch_name: &'a str,
}

/// Insert a new ticket row in `draft` state with `unverified` verification
/// status and zero rejections. Returns the inserted row with server-generated
/// defaults (id, created_at, updated_at).
pub async fn insert_ticket<'e>(
    executor: impl PgExecutor<'e>,
    new: NewTicket<'_>,
) -> Result<Ticket> {
    let ticket = sqlx::query_as::<_, Ticket>(
        "INSERT INTO tickets \
            (design_session_id, project_id, tenant_id, title, description, \
             acceptance_criteria, hint_files, rag_context, depends_on, branch_name) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING *",
    )
    .bind(new.design_session_id)
    .bind(new.project_id)
    .bind(new.tenant_id)
    .bind(new.title)
    .bind(new.description)
    .bind(new.acceptance_criteria)
    .bind(&new.hint_files)
    .bind(new.rag_context)
    .bind(&new.depends_on)
    .bind(new.branch_name)
    .fetch_one(executor)
    .await
    .context("failed to insert ticket")?;

    Ok(ticket)
}

/// Fetch a single ticket by ID.
pub async fn get_ticket<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> Result<Option<Ticket>> {
    let ticket = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch ticket")?;

    Ok(ticket)
}

/// List all tickets belonging to a design session, ordered by creation time.
pub async fn list_tickets_for_session<'e>(
    executor: impl PgExecutor<'e>,
    session_id: Uuid,
) -> Result<Vec<Ticket>> {
    let tickets = sqlx::query_as::<_, Ticket>(
        "SELECT * FROM tickets WHERE design_session_id = $1 ORDER BY created_at ASC",
    )
    .bind(session_id)
    .fetch_all(executor)
    .await
    .context("failed to list tickets for session")?;

    Ok(tickets)
}

/// List all tickets belonging to a project, most recent first.
pub async fn list_tickets_for_project<'e>(
    executor: impl PgExecutor<'e>,
    project_id: Uuid,
) -> Result<Vec<Ticket>> {
    let tickets = sqlx::query_as::<_, Ticket>(
        "SELECT * FROM tickets WHERE project_id = $1 ORDER BY created_at DESC",
    )
    .bind(project_id)
    .fetch_all(executor)
    .await
    .context("failed to list tickets for project")?;

    Ok(tickets)
}

/// Atomically claim the oldest `ready` ticket assigned to `kind` and move it
/// to `in_progress`, recording `worker_id` and resetting heartbeat counters.
///
/// Uses `SELECT ... FOR UPDATE SKIP LOCKED` so that multiple dispatcher
/// replicas racing on the same row never block on or double-claim each
/// other's candidate -- the loser simply sees no row to claim and tries
/// again next tick.
pub async fn claim_next_ready(
    pool: &sqlx::PgPool,
    kind: AssigneeKind,
    worker_id: &str,
) -> Result<Option<Ticket>> {
    let ticket = sqlx::query_as::<_, Ticket>(
        "WITH candidate AS ( \
            SELECT id FROM tickets \
            WHERE state = 'ready' AND assignee_kind = $1 \
            ORDER BY created_at ASC \
            FOR UPDATE SKIP LOCKED \
            LIMIT 1 \
         ) \
         UPDATE tickets \
         SET state = 'in_progress', \
             worker_id = $2, \
             started_at = NOW(), \
             last_heartbeat = NOW(), \
             heartbeat_count = 0, \
             updated_at = NOW() \
         FROM candidate \
         WHERE tickets.id = candidate.id \
         RETURNING tickets.*",
    )
    .bind(kind)
    .bind(worker_id)
    .fetch_optional(pool)
    .await
    .context("failed to claim next ready ticket")?;

    Ok(ticket)
}

/// Atomically claim the oldest `in_review` ticket for the sentinel reviewer
/// partition and move it to `reviewing`. Same skip-locked shape as
/// [`claim_next_ready`] but scoped to the sentinel's disjoint partition of
/// the ready set.
pub async fn claim_next_for_review(
    pool: &sqlx::PgPool,
    worker_id: &str,
) -> Result<Option<Ticket>> {
    let ticket = sqlx::query_as::<_, Ticket>(
        "WITH candidate AS ( \
            SELECT id FROM tickets \
            WHERE state = 'in_review' \
            ORDER BY created_at ASC \
            FOR UPDATE SKIP LOCKED \
            LIMIT 1 \
         ) \
         UPDATE tickets \
         SET state = 'reviewing', \
             worker_id = $1, \
             last_heartbeat = NOW(), \
             updated_at = NOW() \
         FROM candidate \
         WHERE tickets.id = candidate.id \
         RETURNING tickets.*",
    )
    .bind(worker_id)
    .fetch_optional(pool)
    .await
    .context("failed to claim next ticket for review")?;

    Ok(ticket)
}

/// Optimistically transition a ticket's state, guarded by the current state.
/// Returns the number of rows affected (0 means `from` no longer matches).
///
/// Does not itself touch `verification_status`, `worker_id`, or any other
/// column -- callers compose this with the other setters below inside a
/// single transaction so that every transition commits alongside its
/// `ticket_events` row (see `forgewright_core::state`).
pub async fn transition_state<'e>(
    executor: impl PgExecutor<'e>,
    ticket_id: Uuid,
    from: TicketState,
    to: TicketState,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tickets SET state = $1, updated_at = NOW() WHERE id = $2 AND state = $3",
    )
    .bind(to)
    .bind(ticket_id)
    .bind(from)
    .execute(executor)
    .await
    .context("failed to transition ticket state")?;

    Ok(result.rows_affected())
}

/// Set the verification status and bump `rejection_count` when the outcome
/// is `failed` or `sentinel_rejected`.
pub async fn set_verification_status<'e>(
    executor: impl PgExecutor<'e>,
    ticket_id: Uuid,
    status: crate::models::VerificationStatus,
    bump_rejection_count: bool,
) -> Result<()> {
    sqlx::query(
        "UPDATE tickets \
         SET verification_status = $1, \
             rejection_count = rejection_count + CASE WHEN $2 THEN 1 ELSE 0 END, \
             updated_at = NOW() \
         WHERE id = $3",
    )
    .bind(status)
    .bind(bump_rejection_count)
    .bind(ticket_id)
    .execute(executor)
    .await
    .context("failed to set verification status")?;

    Ok(())
}

/// Reset attempt bookkeeping when a ticket re-enters `in_progress` from a
/// retry path (`sentinel_failed -> in_progress`, `needs_review ->
/// in_progress`) rather than a fresh dispatcher claim.
pub async fn restart_attempt<'e>(
    executor: impl PgExecutor<'e>,
    ticket_id: Uuid,
    worker_id: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE tickets \
         SET worker_id = $1, \
             started_at = NOW(), \
             last_heartbeat = NOW(), \
             heartbeat_count = 0, \
             updated_at = NOW() \
         WHERE id = $2",
    )
    .bind(worker_id)
    .bind(ticket_id)
    .execute(executor)
    .await
    .context("failed to restart ticket attempt")?;

    Ok(())
}

/// Clear the worker assignment on a ticket (used when handing a ticket back
/// to the ready pool, e.g. on reclaim or operator retry).
pub async fn clear_worker<'e>(executor: impl PgExecutor<'e>, ticket_id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE tickets SET worker_id = NULL, updated_at = NOW() WHERE id = $1",
    )
    .bind(ticket_id)
    .execute(executor)
    .await
    .context("failed to clear ticket worker")?;

    Ok(())
}

/// Record the branch/PR metadata for a ticket once the coordinator has
/// pushed a branch and opened a pull request.
pub async fn set_pr_metadata<'e>(
    executor: impl PgExecutor<'e>,
    ticket_id: Uuid,
    pr_url: &str,
) -> Result<()> {
    sqlx::query("UPDATE tickets SET pr_url = $1, updated_at = NOW() WHERE id = $2")
        .bind(pr_url)
        .bind(ticket_id)
        .execute(executor)
        .await
        .context("failed to set ticket PR metadata")?;

    Ok(())
}

/// Record that a ticket's pull request has merged.
pub async fn set_merged<'e>(executor: impl PgExecutor<'e>, ticket_id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE tickets SET merged_at = NOW(), updated_at = NOW() WHERE id = $1",
    )
    .bind(ticket_id)
    .execute(executor)
    .await
    .context("failed to set ticket merged")?;

    Ok(())
}

/// Record a heartbeat from the worker currently holding a ticket.
///
/// Optimistically guarded on `worker_id` matching: a worker that lost its
/// claim (e.g. reclaimed by the reaper) cannot resurrect it with a stray
/// heartbeat.
pub async fn record_heartbeat(pool: &sqlx::PgPool, ticket_id: Uuid, worker_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tickets \
         SET last_heartbeat = NOW(), heartbeat_count = heartbeat_count + 1 \
         WHERE id = $1 AND worker_id = $2 AND state IN ('in_progress', 'reviewing')",
    )
    .bind(ticket_id)
    .bind(worker_id)
    .execute(pool)
    .await
    .context("failed to record ticket heartbeat")?;

    Ok(result.rows_affected())
}

/// Record a heartbeat for every ticket a worker currently holds, in one
/// bulk statement rather than one round trip per ticket. A no-op row count
/// for a given id simply means that ticket is no longer ours -- advisory,
/// not an error.
pub async fn record_heartbeats_bulk(
    pool: &sqlx::PgPool,
    ticket_ids: &[Uuid],
    worker_id: &str,
) -> Result<u64> {
    if ticket_ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        "UPDATE tickets \
         SET last_heartbeat = NOW(), heartbeat_count = heartbeat_count + 1 \
         WHERE id = ANY($1) AND worker_id = $2 AND state IN ('in_progress', 'reviewing')",
    )
    .bind(ticket_ids)
    .bind(worker_id)
    .execute(pool)
    .await
    .context("failed to record bulk ticket heartbeats")?;

    Ok(result.rows_affected())
}

/// Reclaim tickets whose heartbeat has gone stale: `in_progress` or
/// `reviewing` tickets whose `last_heartbeat` is strictly older than
/// `stale_threshold` are moved back to `ready`, clearing `worker_id`,
/// `started_at`, `last_heartbeat`, and `heartbeat_count` -- a stalled
/// worker's claim is released, not escalated to a human, so the next
/// dispatcher tick anywhere in the fleet can re-claim it. Returns the
/// reclaimed tickets.
///
/// Uses the same skip-locked discipline as [`claim_next_ready`] so that
/// every replica's reaper can run this query concurrently: at most one
/// replica's statement touches a given stale row.
///
/// Each reclaim is committed alongside its `ticket_events` row (kind
/// `"reclaimed"`) in the same transaction as the state reset, so the
/// one-event-per-transition invariant holds even if the process crashes
/// immediately after.
pub async fn reclaim_stale(
    pool: &sqlx::PgPool,
    stale_threshold_secs: i64,
) -> Result<Vec<Ticket>> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start reclaim transaction")?;

    let stale: Vec<(Uuid, TicketState)> = sqlx::query_as(
        "SELECT id, state FROM tickets \
         WHERE state IN ('in_progress', 'reviewing') \
           AND last_heartbeat < NOW() - make_interval(secs => $1) \
         FOR UPDATE SKIP LOCKED",
    )
    .bind(stale_threshold_secs as f64)
    .fetch_all(&mut *tx)
    .await
    .context("failed to select stale tickets")?;

    let mut reclaimed = Vec::with_capacity(stale.len());
    for (id, old_state) in stale {
        let ticket = sqlx::query_as::<_, Ticket>(
            "UPDATE tickets \
             SET state = 'ready', \
                 worker_id = NULL, \
                 started_at = NULL, \
                 last_heartbeat = NULL, \
                 heartbeat_count = 0, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING *",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to reclaim ticket {id}"))?;

        crate::queries::ticket_events::insert_event(
            &mut *tx,
            id,
            "reclaimed",
            Some(old_state),
            Some(TicketState::Ready),
            serde_json::json!({ "reason": "stale_heartbeat" }),
        )
        .await
        .with_context(|| format!("failed to record reclaim event for ticket {id}"))?;

        reclaimed.push(ticket);
    }

    tx.commit()
        .await
        .context("failed to commit reclaim transaction")?;

    Ok(reclaimed)
}

/// Promote `blocked` tickets in a design session to `ready` once every
/// dependency has reached a terminal success state (`done` or `merged`).
/// Returns the promoted tickets.
///
/// The `NOT EXISTS` correlated subquery is a DAG-readiness check triggered
/// by a completion event from any dispatcher replica, not polled by a
/// single in-process loop. Each promotion commits alongside an `"unblocked"`
/// `ticket_events` row in the same transaction as the state flip, the same
/// one-event-per-transition discipline [`reclaim_stale`] and
/// `forgewright_core::state::TicketStateMachine::transition` use.
pub async fn promote_blocked_to_ready(
    pool: &sqlx::PgPool,
    design_session_id: Uuid,
) -> Result<Vec<Ticket>> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start cascade promotion transaction")?;

    let tickets = sqlx::query_as::<_, Ticket>(
        "UPDATE tickets t \
         SET state = 'ready', unblocked_at = NOW(), updated_at = NOW() \
         WHERE t.design_session_id = $1 \
           AND t.state = 'blocked' \
           AND NOT EXISTS ( \
               SELECT 1 FROM unnest(t.depends_on) AS dep_id \
               JOIN tickets dep ON dep.id = dep_id \
               WHERE dep.state NOT IN ('done', 'merged') \
           ) \
         RETURNING t.*",
    )
    .bind(design_session_id)
    .fetch_all(&mut *tx)
    .await
    .context("failed to promote blocked tickets")?;

    for ticket in &tickets {
        crate::queries::ticket_events::insert_event(
            &mut *tx,
            ticket.id,
            "unblocked",
            Some(TicketState::Blocked),
            Some(TicketState::Ready),
            serde_json::json!({}),
        )
        .await
        .with_context(|| format!("failed to record unblock event for ticket {}", ticket.id))?;
    }

    tx.commit()
        .await
        .context("failed to commit cascade promotion transaction")?;

    Ok(tickets)
}

/// Per-state ticket counts within a design session.
#[derive(Debug, Clone, Default)]
pub struct SessionProgress {
    pub draft: i64,
    pub ready: i64,
    pub blocked: i64,
    pub in_progress: i64,
    pub verifying: i64,
    pub in_review: i64,
    pub reviewing: i64,
    pub needs_review: i64,
    pub merged: i64,
    pub done: i64,
    pub cancelled: i64,
    pub sentinel_failed: i64,
    pub total: i64,
}

/// Summarize ticket counts by state for a design session.
pub async fn get_session_progress(
    pool: &sqlx::PgPool,
    design_session_id: Uuid,
) -> Result<SessionProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT state::text, COUNT(*) as cnt \
         FROM tickets \
         WHERE design_session_id = $1 \
         GROUP BY state",
    )
    .bind(design_session_id)
    .fetch_all(pool)
    .await
    .context("failed to get session progress")?;

    let mut progress = SessionProgress::default();
    for (state, count) in &rows {
        match state.as_str() {
            "draft" => progress.draft = *count,
            "ready" => progress.ready = *count,
            "blocked" => progress.blocked = *count,
            "in_progress" => progress.in_progress = *count,
            "verifying" => progress.verifying = *count,
            "in_review" => progress.in_review = *count,
            "reviewing" => progress.reviewing = *count,
            "needs_review" => progress.needs_review = *count,
            "merged" => progress.merged = *count,
            "done" => progress.done = *count,
            "cancelled" => progress.cancelled = *count,
            "sentinel_failed" => progress.sentinel_failed = *count,
            _ => {}
        }
        progress.total += count;
    }
    Ok(progress)
}

/// Check whether every ticket in a design session has reached a terminal
/// state (`done` or `cancelled`).
pub async fn is_session_complete(pool: &sqlx::PgPool, design_session_id: Uuid) -> Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tickets \
         WHERE design_session_id = $1 AND state NOT IN ('done', 'cancelled')",
    )
    .bind(design_session_id)
    .fetch_one(pool)
    .await
    .context("failed to check session completion")?;

    Ok(row.0 == 0)
}

/// Fetch the ids of a ticket's unmet dependencies (those not in `done`).
pub async fn unmet_dependencies<'e>(
    executor: impl PgExecutor<'e>,
    ticket_id: Uuid,
) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT dep.id FROM tickets t \
         JOIN unnest(t.depends_on) AS dep_id ON true \
         JOIN tickets dep ON dep.id = dep_id \
         WHERE t.id = $1 AND dep.state NOT IN ('done', 'merged')",
    )
    .bind(ticket_id)
    .fetch_all(executor)
    .await
    .context("failed to fetch unmet dependencies")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

