//! Database query functions for the `projects` table.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{Project, ProjectKind};

/// Insert a new project row.
pub async fn insert_project<'e>(
    executor: impl PgExecutor<'e>,
    tenant_id: Uuid,
    repo_url: &str,
    default_base_branch: &str,
    kind: ProjectKind,
) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (tenant_id, repo_url, default_base_branch, kind) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(tenant_id)
    .bind(repo_url)
    .bind(default_base_branch)
    .bind(kind)
    .fetch_one(executor)
    .await
    .context("failed to insert project")?;

    Ok(project)
}

/// Fetch a project by ID.
pub async fn get_project<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch project")?;

    Ok(project)
}

/// List every project for a tenant, most recently created first.
pub async fn list_projects_for_tenant<'e>(
    executor: impl PgExecutor<'e>,
    tenant_id: Uuid,
) -> Result<Vec<Project>> {
    let projects = sqlx::query_as::<_, Project>(
        "SELECT * FROM projects WHERE tenant_id = $1 ORDER BY created_at DESC",
    )
    .bind(tenant_id)
    .fetch_all(executor)
    .await
    .context("failed to list projects for tenant")?;

    Ok(projects)
}
