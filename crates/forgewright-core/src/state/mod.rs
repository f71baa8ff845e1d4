//! Ticket state machine transitions.
//!
//! Validates and executes state transitions for tickets, enforcing the
//! allowed transition graph, optimistic locking, and the invariant that
//! every committed transition writes exactly one [`TicketEvent`] row in the
//! same database transaction.

pub mod dispatch;
pub mod queries;

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use forgewright_db::models::{Ticket, TicketState, VerificationStatus};
use forgewright_db::queries::ticket_events;
use forgewright_db::queries::tickets as db;

/// The ticket state machine.
///
/// Enforces the valid transition graph (see [`TicketState`]'s doc comment
/// for the full diagram):
///
/// ```text
/// draft           -> ready | blocked | cancelled
/// blocked         -> ready | cancelled
/// ready           -> in_progress | cancelled
/// in_progress     -> verifying | needs_review | cancelled
/// verifying       -> in_progress | in_review | needs_review
/// in_review       -> reviewing | cancelled
/// reviewing       -> merged | sentinel_failed
/// sentinel_failed -> in_progress | needs_review
/// merged          -> done
/// needs_review    -> in_progress | cancelled
/// ```
///
/// `done` and `cancelled` are terminal: no outgoing edge exists from either.
pub struct TicketStateMachine;

impl TicketStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge in the
    /// state graph.
    pub fn is_valid_transition(from: TicketState, to: TicketState) -> bool {
        use TicketState::*;
        matches!(
            (from, to),
            (Draft, Ready)
                | (Draft, Blocked)
                | (Draft, Cancelled)
                | (Blocked, Ready)
                | (Blocked, Cancelled)
                | (Ready, InProgress)
                | (Ready, Cancelled)
                | (InProgress, Verifying)
                | (InProgress, NeedsReview)
                | (InProgress, Cancelled)
                | (Verifying, InProgress)
                | (Verifying, InReview)
                | (Verifying, NeedsReview)
                | (InReview, Reviewing)
                | (InReview, Cancelled)
                | (Reviewing, Merged)
                | (Reviewing, SentinelFailed)
                | (SentinelFailed, InProgress)
                | (SentinelFailed, NeedsReview)
                | (Merged, Done)
                | (NeedsReview, InProgress)
                | (NeedsReview, Cancelled)
        )
    }

    /// Execute a state transition with optimistic locking, recording a
    /// matching [`TicketEvent`] row in the same transaction.
    ///
    /// `kind` names the event for the log (e.g. `"verification_passed"`,
    /// `"sentinel_rejected"`); `payload` carries any structured detail worth
    /// keeping (verifier summaries, rejection reasons).
    ///
    /// Returns an error if the transition is not a valid edge, the ticket
    /// does not exist, or the ticket's current state no longer matches
    /// `from` (optimistic lock failure -- another replica got there first).
    pub async fn transition(
        pool: &PgPool,
        ticket_id: Uuid,
        from: TicketState,
        to: TicketState,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        Self::transition_with_verification(pool, ticket_id, from, to, kind, payload, None).await
    }

    /// Same as [`Self::transition`], additionally setting
    /// `verification_status` (and bumping `rejection_count` when the second
    /// tuple element is `true`) inside the same transaction as the state
    /// flip -- used by callers that observe a verification or sentinel
    /// outcome in the same breath as the transition it causes (spec.md's
    /// invariant 4: `verification_status` must have reached `passed` or
    /// `sentinel_rejected` before a ticket is ever `merged`/`done`).
    pub async fn transition_with_verification(
        pool: &PgPool,
        ticket_id: Uuid,
        from: TicketState,
        to: TicketState,
        kind: &str,
        payload: serde_json::Value,
        verification: Option<(VerificationStatus, bool)>,
    ) -> Result<()> {
        if !Self::is_valid_transition(from, to) {
            bail!(
                "invalid ticket state transition: {} -> {} for ticket {}",
                from,
                to,
                ticket_id
            );
        }

        let mut tx = pool
            .begin()
            .await
            .context("failed to start transition transaction")?;

        let rows = db::transition_state(&mut *tx, ticket_id, from, to)
            .await
            .with_context(|| {
                format!(
                    "failed to transition ticket {} from {} to {}",
                    ticket_id, from, to
                )
            })?;

        if rows == 0 {
            drop(tx);
            let ticket = db::get_ticket(pool, ticket_id).await?;
            return match ticket {
                None => bail!("ticket {} not found", ticket_id),
                Some(t) => bail!(
                    "optimistic lock failed: ticket {} has state {}, expected {}",
                    ticket_id,
                    t.state,
                    from
                ),
            };
        }

        // Retry paths re-enter in_progress from a non-claim edge: reset the
        // attempt bookkeeping the dispatcher's claim would otherwise set.
        if to == TicketState::InProgress
            && matches!(from, TicketState::SentinelFailed | TicketState::NeedsReview)
        {
            let worker_id = payload
                .get("worker_id")
                .and_then(|v| v.as_str())
                .unwrap_or("operator-retry");
            db::restart_attempt(&mut *tx, ticket_id, worker_id).await?;
        }

        if to == TicketState::Merged {
            db::set_merged(&mut *tx, ticket_id).await?;
        }

        if let Some((status, bump_rejection_count)) = verification {
            db::set_verification_status(&mut *tx, ticket_id, status, bump_rejection_count).await?;
        }

        ticket_events::insert_event(&mut *tx, ticket_id, kind, Some(from), Some(to), payload)
            .await
            .context("failed to record ticket event")?;

        tx.commit().await.context("failed to commit transition")?;

        Ok(())
    }

    /// Validate that every dependency of a ticket has reached a terminal
    /// success state (`done` or `merged`).
    pub async fn check_dependencies(pool: &PgPool, ticket_id: Uuid) -> Result<()> {
        let unmet = db::unmet_dependencies(pool, ticket_id).await?;
        if !unmet.is_empty() {
            bail!(
                "ticket {} has {} unmet dependencies: {:?}",
                ticket_id,
                unmet.len(),
                unmet
            );
        }
        Ok(())
    }

    /// Fetch a ticket, failing loudly if it does not exist.
    pub async fn require_ticket(pool: &PgPool, ticket_id: Uuid) -> Result<Ticket> {
        db::get_ticket(pool, ticket_id)
            .await?
            .with_context(|| format!("ticket {} not found", ticket_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TicketState::*;

    #[test]
    fn valid_edges_accepted() {
        assert!(TicketStateMachine::is_valid_transition(Draft, Ready));
        assert!(TicketStateMachine::is_valid_transition(Ready, InProgress));
        assert!(TicketStateMachine::is_valid_transition(InProgress, Verifying));
        assert!(TicketStateMachine::is_valid_transition(Verifying, InReview));
        assert!(TicketStateMachine::is_valid_transition(InReview, Reviewing));
        assert!(TicketStateMachine::is_valid_transition(Reviewing, Merged));
        assert!(TicketStateMachine::is_valid_transition(Merged, Done));
        assert!(TicketStateMachine::is_valid_transition(
            SentinelFailed,
            InProgress
        ));
        assert!(TicketStateMachine::is_valid_transition(Blocked, Ready));
        assert!(TicketStateMachine::is_valid_transition(
            NeedsReview,
            InProgress
        ));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for to in [
            Draft, Ready, Blocked, InProgress, Verifying, InReview, Reviewing, NeedsReview,
            Merged, Done, Cancelled, SentinelFailed,
        ] {
            assert!(!TicketStateMachine::is_valid_transition(Done, to));
            assert!(!TicketStateMachine::is_valid_transition(Cancelled, to));
        }
    }

    #[test]
    fn invalid_edges_rejected() {
        assert!(!TicketStateMachine::is_valid_transition(Draft, InProgress));
        assert!(!TicketStateMachine::is_valid_transition(Ready, Merged));
        assert!(!TicketStateMachine::is_valid_transition(Verifying, Merged));
        assert!(!TicketStateMachine::is_valid_transition(Reviewing, Ready));
        assert!(!TicketStateMachine::is_valid_transition(
            NeedsReview,
            Merged
        ));
    }
}
