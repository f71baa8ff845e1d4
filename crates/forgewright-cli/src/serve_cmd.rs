//! `forgewright serve`: a read-only HTTP API over projects, design sessions,
//! and tickets, for a dashboard or other operator tooling to poll.

use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use forgewright_db::models::{Project, Ticket, TicketArtifact, TicketEvent};
use forgewright_db::queries::tickets::SessionProgress;
use forgewright_db::queries::{artifacts, projects, sessions, ticket_events, tickets as ticket_db};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
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

impl From<SessionProgress> for ProgressResponse {
    fn from(p: SessionProgress) -> Self {
        Self {
            draft: p.draft,
            ready: p.ready,
            blocked: p.blocked,
            in_progress: p.in_progress,
            verifying: p.verifying,
            in_review: p.in_review,
            reviewing: p.reviewing,
            needs_review: p.needs_review,
            merged: p.merged,
            done: p.done,
            cancelled: p.cancelled,
            sentinel_failed: p.sentinel_failed,
            total: p.total,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionSummaryResponse {
    pub session_id: Uuid,
    pub project_id: Uuid,
    pub progress: ProgressResponse,
}

#[derive(Debug, Serialize)]
pub struct SessionDetailResponse {
    pub session_id: Uuid,
    pub project_id: Uuid,
    pub progress: ProgressResponse,
    pub tickets: Vec<Ticket>,
}

#[derive(Debug, Serialize)]
pub struct TicketDetailResponse {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub events: Vec<TicketEvent>,
    pub artifacts: Vec<TicketArtifact>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pool: PgPool) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/projects", get(list_projects))
        .route("/api/projects/{id}/sessions", get(list_project_sessions))
        .route("/api/sessions/{id}", get(get_session_detail))
        .route("/api/tickets/{id}", get(get_ticket_detail))
        .layer(CorsLayer::permissive())
        .with_state(pool)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, bind: &str, port: u16) -> Result<()> {
    let app = build_router(pool);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("forgewright serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("forgewright serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Every project belongs to a tenant; the dashboard has no multi-tenant
/// login yet, so the index page lists whatever the caller's tenant query
/// param resolves to, defaulting to an empty placeholder page.
async fn index() -> axum::response::Response {
    let html = "<!DOCTYPE html>\
<html><head><title>forgewright</title></head><body>\
<h1>forgewright</h1>\
<p><a href=\"/api/projects\">/api/projects</a> (requires ?tenant_id=&lt;uuid&gt;)</p>\
</body></html>";
    Html(html).into_response()
}

#[derive(serde::Deserialize)]
struct TenantQuery {
    tenant_id: Uuid,
}

async fn list_projects(
    State(pool): State<PgPool>,
    axum::extract::Query(q): axum::extract::Query<TenantQuery>,
) -> Result<axum::response::Response, AppError> {
    let rows: Vec<Project> = projects::list_projects_for_tenant(&pool, q.tenant_id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(rows).into_response())
}

async fn list_project_sessions(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    projects::get_project(&pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("project {id} not found")))?;

    let session_rows = sessions::list_sessions_for_project(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let mut results = Vec::with_capacity(session_rows.len());
    for session in session_rows {
        let progress = ticket_db::get_session_progress(&pool, session.id)
            .await
            .map_err(AppError::internal)?;
        results.push(SessionSummaryResponse {
            session_id: session.id,
            project_id: session.project_id,
            progress: progress.into(),
        });
    }

    Ok(Json(results).into_response())
}

async fn get_session_detail(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let session = sessions::get_session(&pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("design session {id} not found")))?;

    let progress = ticket_db::get_session_progress(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let ticket_rows = ticket_db::list_tickets_for_session(&pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(SessionDetailResponse {
        session_id: session.id,
        project_id: session.project_id,
        progress: progress.into(),
        tickets: ticket_rows,
    })
    .into_response())
}

async fn get_ticket_detail(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let ticket = ticket_db::get_ticket(&pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("ticket {id} not found")))?;

    let events = ticket_events::list_events_for_ticket(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let artifact_rows = artifacts::list_artifacts_for_ticket(&pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(TicketDetailResponse {
        ticket,
        events,
        artifacts: artifact_rows,
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::PgPool;
    use tower::ServiceExt;
    use uuid::Uuid;

    use forgewright_db::models::{ProjectKind, TicketState, VerificationStatus};
    use forgewright_db::queries::{projects, sessions, tickets};
    use forgewright_test_utils::{create_test_db, drop_test_db};

    async fn send_request(pool: PgPool, uri: &str) -> axum::response::Response {
        let app = super::build_router(pool);
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_projects_returns_tenant_scoped_rows() {
        let (pool, db_name) = create_test_db().await;
        let tenant_id = Uuid::new_v4();
        let other_tenant = Uuid::new_v4();

        projects::insert_project(
            &pool,
            tenant_id,
            "https://github.com/acme/widgets",
            "main",
            ProjectKind::Generic,
        )
        .await
        .unwrap();
        projects::insert_project(
            &pool,
            other_tenant,
            "https://github.com/acme/other",
            "main",
            ProjectKind::Generic,
        )
        .await
        .unwrap();

        let response = send_request(
            pool.clone(),
            &format!("/api/projects?tenant_id={tenant_id}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["repo_url"], "https://github.com/acme/widgets");

        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn get_session_detail_includes_tickets() {
        let (pool, db_name) = create_test_db().await;
        let tenant_id = Uuid::new_v4();
        let project = projects::insert_project(
            &pool,
            tenant_id,
            "https://github.com/acme/widgets",
            "main",
            ProjectKind::Generic,
        )
        .await
        .unwrap();
        let session = sessions::insert_session(&pool, project.id, tenant_id)
            .await
            .unwrap();

        let new_ticket = tickets::NewTicket {
            design_session_id: session.id,
            project_id: project.id,
            tenant_id,
            title: "add retry loop",
            description: "wrap the call in a backoff loop",
            acceptance_criteria: serde_json::json!([]),
            hint_files: vec![],
            rag_context: None,
            depends_on: vec![],
            branch_name: "ticket/add-retry-loop",
        };
        tickets::insert_ticket(&pool, new_ticket).await.unwrap();

        let response = send_request(pool.clone(), &format!("/api/sessions/{}", session.id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["tickets"].as_array().unwrap().len(), 1);
        assert_eq!(body["progress"]["total"], 1);
        assert_eq!(body["progress"]["draft"], 1);

        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn get_ticket_detail_404s_for_unknown_ticket() {
        let (pool, db_name) = create_test_db().await;
        let response = send_request(pool.clone(), &format!("/api/tickets/{}", Uuid::new_v4())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn get_ticket_detail_includes_events_and_artifacts() {
        let (pool, db_name) = create_test_db().await;
        let tenant_id = Uuid::new_v4();
        let project = projects::insert_project(
            &pool,
            tenant_id,
            "https://github.com/acme/widgets",
            "main",
            ProjectKind::Generic,
        )
        .await
        .unwrap();
        let session = sessions::insert_session(&pool, project.id, tenant_id)
            .await
            .unwrap();
        let ticket = tickets::insert_ticket(
            &pool,
            tickets::NewTicket {
                design_session_id: session.id,
                project_id: project.id,
                tenant_id,
                title: "add retry loop",
                description: "wrap the call in a backoff loop",
                acceptance_criteria: serde_json::json!([]),
                hint_files: vec![],
                rag_context: None,
                depends_on: vec![],
                branch_name: "ticket/add-retry-loop",
            },
        )
        .await
        .unwrap();

        let response = send_request(pool.clone(), &format!("/api/tickets/{}", ticket.id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["state"], serde_json::json!(TicketState::Draft));
        assert_eq!(body["verification_status"], serde_json::json!(VerificationStatus::Unverified));
        assert!(body["events"].as_array().unwrap().is_empty());
        assert!(body["artifacts"].as_array().unwrap().is_empty());

        drop_test_db(&db_name).await;
    }
}
