//! Database query functions for the `design_sessions` table.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::DesignSession;

/// Insert a new design session scoped to a project.
pub async fn insert_session<'e>(
    executor: impl PgExecutor<'e>,
    project_id: Uuid,
    tenant_id: Uuid,
) -> Result<DesignSession> {
    let session = sqlx::query_as::<_, DesignSession>(
        "INSERT INTO design_sessions (project_id, tenant_id) VALUES ($1, $2) RETURNING *",
    )
    .bind(project_id)
    .bind(tenant_id)
    .fetch_one(executor)
    .await
    .context("failed to insert design session")?;

    Ok(session)
}

/// Fetch a design session by ID.
pub async fn get_session<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> Result<Option<DesignSession>> {
    let session = sqlx::query_as::<_, DesignSession>(
        "SELECT * FROM design_sessions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
    .context("failed to fetch design session")?;

    Ok(session)
}

/// List every design session for a project, most recently created first.
pub async fn list_sessions_for_project<'e>(
    executor: impl PgExecutor<'e>,
    project_id: Uuid,
) -> Result<Vec<DesignSession>> {
    let sessions = sqlx::query_as::<_, DesignSession>(
        "SELECT * FROM design_sessions WHERE project_id = $1 ORDER BY created_at DESC",
    )
    .bind(project_id)
    .fetch_all(executor)
    .await
    .context("failed to list design sessions for project")?;

    Ok(sessions)
}
