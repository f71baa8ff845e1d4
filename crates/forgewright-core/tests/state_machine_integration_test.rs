//! End-to-end tests for `TicketStateMachine::transition` against a real
//! database: valid edges commit a state change and an audit event in the
//! same transaction, invalid edges and stale optimistic locks are rejected
//! without touching the row.

use uuid::Uuid;

use forgewright_core::state::TicketStateMachine;
use forgewright_db::models::{ProjectKind, TicketState};
use forgewright_db::queries::{projects, sessions, ticket_events, tickets};
use forgewright_test_utils::{create_test_db, drop_test_db};

async fn seed_draft_ticket(pool: &sqlx::PgPool) -> forgewright_db::models::Ticket {
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

    tickets::insert_ticket(
        pool,
        tickets::NewTicket {
            design_session_id: session.id,
            project_id: project.id,
            tenant_id,
            title: "state machine target",
            description: "test ticket",
            acceptance_criteria: serde_json::json!([]),
            hint_files: vec![],
            rag_context: None,
            depends_on: vec![],
            branch_name: "t/sm",
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn valid_transition_commits_state_and_event_together() {
    let (pool, db_name) = create_test_db().await;
    let ticket = seed_draft_ticket(&pool).await;

    TicketStateMachine::transition(
        &pool,
        ticket.id,
        TicketState::Draft,
        TicketState::Ready,
        "activated",
        serde_json::json!({ "reason": "no dependencies" }),
    )
    .await
    .unwrap();

    let after = tickets::get_ticket(&pool, ticket.id).await.unwrap().unwrap();
    assert_eq!(after.state, TicketState::Ready);

    let events = ticket_events::list_events_for_ticket(&pool, ticket.id)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "activated");
    assert_eq!(events[0].from_state, Some(TicketState::Draft));
    assert_eq!(events[0].to_state, Some(TicketState::Ready));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn invalid_edge_is_rejected_and_leaves_state_untouched() {
    let (pool, db_name) = create_test_db().await;
    let ticket = seed_draft_ticket(&pool).await;

    // draft -> merged is not an edge in the graph at all.
    let result = TicketStateMachine::transition(
        &pool,
        ticket.id,
        TicketState::Draft,
        TicketState::Merged,
        "bogus",
        serde_json::json!({}),
    )
    .await;
    assert!(result.is_err());

    let after = tickets::get_ticket(&pool, ticket.id).await.unwrap().unwrap();
    assert_eq!(after.state, TicketState::Draft, "rejected transition must not mutate state");

    let events = ticket_events::list_events_for_ticket(&pool, ticket.id)
        .await
        .unwrap();
    assert!(events.is_empty(), "rejected transition must not record an event");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn stale_from_state_is_rejected_as_optimistic_lock_failure() {
    let (pool, db_name) = create_test_db().await;
    let ticket = seed_draft_ticket(&pool).await;

    TicketStateMachine::transition(
        &pool,
        ticket.id,
        TicketState::Draft,
        TicketState::Ready,
        "activated",
        serde_json::json!({}),
    )
    .await
    .unwrap();

    // A second caller still believes the ticket is in `draft` (e.g. it read
    // a stale copy before the first transition landed) and tries to apply
    // an edge that was legal from that stale state.
    let result = TicketStateMachine::transition(
        &pool,
        ticket.id,
        TicketState::Draft,
        TicketState::Blocked,
        "blocked_by_stale_caller",
        serde_json::json!({}),
    )
    .await;
    assert!(result.is_err());
    let message = result.unwrap_err().to_string();
    assert!(
        message.contains("optimistic lock failed"),
        "expected optimistic lock error, got: {message}"
    );

    let after = tickets::get_ticket(&pool, ticket.id).await.unwrap().unwrap();
    assert_eq!(after.state, TicketState::Ready, "ticket should still carry the first transition's result");

    let events = ticket_events::list_events_for_ticket(&pool, ticket.id)
        .await
        .unwrap();
    assert_eq!(events.len(), 1, "the rejected second attempt must not add an event");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reaching_merged_stamps_merged_at_inside_the_same_transition() {
    let (pool, db_name) = create_test_db().await;
    let ticket = seed_draft_ticket(&pool).await;

    for (from, to, kind) in [
        (TicketState::Draft, TicketState::Ready, "activated"),
        (TicketState::Ready, TicketState::InProgress, "claimed"),
        (TicketState::InProgress, TicketState::Verifying, "verification_started"),
        (TicketState::Verifying, TicketState::InReview, "verification_passed"),
        (TicketState::InReview, TicketState::Reviewing, "sentinel_claimed"),
    ] {
        TicketStateMachine::transition(&pool, ticket.id, from, to, kind, serde_json::json!({}))
            .await
            .unwrap();
    }

    let before_merge = tickets::get_ticket(&pool, ticket.id).await.unwrap().unwrap();
    assert!(before_merge.merged_at.is_none());

    TicketStateMachine::transition(
        &pool,
        ticket.id,
        TicketState::Reviewing,
        TicketState::Merged,
        "sentinel_approved",
        serde_json::json!({}),
    )
    .await
    .unwrap();

    let after = tickets::get_ticket(&pool, ticket.id).await.unwrap().unwrap();
    assert_eq!(after.state, TicketState::Merged);
    assert!(after.merged_at.is_some());

    drop_test_db(&db_name).await;
}
