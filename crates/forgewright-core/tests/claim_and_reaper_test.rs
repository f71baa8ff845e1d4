//! Concurrency tests for the dispatcher's claim primitive and the reaper's
//! stale-heartbeat reclaim, both against a real database.

use uuid::Uuid;

use forgewright_db::models::{AssigneeKind, ProjectKind, TicketState};
use forgewright_db::queries::{projects, sessions, tickets};
use forgewright_test_utils::{create_test_db, drop_test_db};

async fn seed_ready_ticket(pool: &sqlx::PgPool) -> (forgewright_db::models::Ticket, Uuid) {
    let tenant_id = Uuid::new_v4();
    let project = projects::insert_project(
        pool,
        tenant_id,
        "https://github.com/acme/widgets",
        "main",
        ProjectKind::Generic,
    )
    .await
    .unwrap();
    let session = sessions::insert_session(pool, project.id, tenant_id)
        .await
        .unwrap();

    let ticket = tickets::insert_ticket(
        pool,
        tickets::NewTicket {
            design_session_id: session.id,
            project_id: project.id,
            tenant_id,
            title: "race target",
            description: "test ticket",
            acceptance_criteria: serde_json::json!([]),
            hint_files: vec![],
            rag_context: None,
            depends_on: vec![],
            branch_name: "t/race",
        },
    )
    .await
    .unwrap();

    tickets::transition_state(pool, ticket.id, TicketState::Draft, TicketState::Ready)
        .await
        .unwrap();

    (ticket, session.id)
}

#[tokio::test]
async fn two_replicas_racing_on_one_ready_ticket_only_one_wins() {
    let (pool, db_name) = create_test_db().await;
    let (ticket, _session_id) = seed_ready_ticket(&pool).await;

    let pool_a = pool.clone();
    let pool_b = pool.clone();
    let (a, b) = tokio::join!(
        tickets::claim_next_ready(&pool_a, AssigneeKind::Agent, "replica-a"),
        tickets::claim_next_ready(&pool_b, AssigneeKind::Agent, "replica-b"),
    );

    let a = a.unwrap();
    let b = b.unwrap();

    // Exactly one of the two concurrent claims should have won the row.
    let winners = [&a, &b].iter().filter(|r| r.is_some()).count();
    assert_eq!(winners, 1, "exactly one replica should claim the ticket");

    let winning_worker = a.or(b).unwrap().worker_id.unwrap();
    assert!(winning_worker == "replica-a" || winning_worker == "replica-b");

    let after = tickets::get_ticket(&pool, ticket.id).await.unwrap().unwrap();
    assert_eq!(after.state, TicketState::InProgress);
    assert_eq!(after.worker_id.as_deref(), Some(winning_worker.as_str()));

    // No ready tickets remain for a third replica to claim.
    let third = tickets::claim_next_ready(&pool, AssigneeKind::Agent, "replica-c")
        .await
        .unwrap();
    assert!(third.is_none());

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reaper_reclaims_stale_in_progress_ticket_to_ready() {
    let (pool, db_name) = create_test_db().await;
    let (ticket, _session_id) = seed_ready_ticket(&pool).await;

    let claimed = tickets::claim_next_ready(&pool, AssigneeKind::Agent, "dead-replica")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, ticket.id);

    // Simulate a replica that crashed an hour ago: its heartbeat stopped
    // advancing, but nothing else (reclaim_stale) has noticed yet.
    sqlx::query("UPDATE tickets SET last_heartbeat = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(ticket.id)
        .execute(&pool)
        .await
        .unwrap();

    let reclaimed = tickets::reclaim_stale(&pool, 90).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, ticket.id);
    assert_eq!(reclaimed[0].state, TicketState::Ready);
    assert!(reclaimed[0].worker_id.is_none());

    let after = tickets::get_ticket(&pool, ticket.id).await.unwrap().unwrap();
    assert_eq!(after.state, TicketState::Ready);
    assert!(after.last_heartbeat.is_none());

    // Idempotent: a second pass finds nothing left to reclaim.
    let second_pass = tickets::reclaim_stale(&pool, 90).await.unwrap();
    assert!(second_pass.is_empty());

    let events = forgewright_db::queries::ticket_events::list_events_for_ticket(&pool, ticket.id)
        .await
        .unwrap();
    assert!(
        events.iter().any(|e| e.kind == "reclaimed"),
        "reclaim should leave an audit trail event"
    );

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reaper_leaves_fresh_heartbeats_alone() {
    let (pool, db_name) = create_test_db().await;
    let (ticket, _session_id) = seed_ready_ticket(&pool).await;

    tickets::claim_next_ready(&pool, AssigneeKind::Agent, "live-replica")
        .await
        .unwrap();

    let reclaimed = tickets::reclaim_stale(&pool, 90).await.unwrap();
    assert!(reclaimed.is_empty());

    let after = tickets::get_ticket(&pool, ticket.id).await.unwrap().unwrap();
    assert_eq!(after.state, TicketState::InProgress);

    drop_test_db(&db_name).await;
}
