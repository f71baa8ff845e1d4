//! `forgewright status` command: show per-session ticket progress.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use forgewright_db::queries::{projects, sessions, tickets};

/// Run the status command. With `project_id`, lists every design session
/// under that project; otherwise lists every project's sessions.
pub async fn run_status(pool: &PgPool, project_id_str: Option<&str>) -> Result<()> {
    match project_id_str {
        Some(id_str) => {
            let project_id =
                Uuid::parse_str(id_str).with_context(|| format!("invalid project ID: {id_str}"))?;
            let project = projects::get_project(pool, project_id)
                .await?
                .with_context(|| format!("project {project_id} not found"))?;

            println!("Project: {} ({})", project.repo_url, project.id);
            let session_rows = sessions::list_sessions_for_project(pool, project_id).await?;
            for session in &session_rows {
                print_session(pool, session.id).await?;
            }
        }
        None => {
            anyhow::bail!(
                "status across every tenant's projects is not supported; pass --project <id> \
                 (projects are listed per-tenant, and this CLI has no tenant-scoping flag yet)"
            );
        }
    }

    Ok(())
}

async fn print_session(pool: &PgPool, design_session_id: Uuid) -> Result<()> {
    let progress = tickets::get_session_progress(pool, design_session_id).await?;
    println!(
        "  Session {}: {}/{} done (draft={} ready={} blocked={} in_progress={} verifying={} in_review={} reviewing={} needs_review={} merged={} cancelled={} sentinel_failed={})",
        design_session_id,
        progress.done,
        progress.total,
        progress.draft,
        progress.ready,
        progress.blocked,
        progress.in_progress,
        progress.verifying,
        progress.in_review,
        progress.reviewing,
        progress.needs_review,
        progress.merged,
        progress.cancelled,
        progress.sentinel_failed,
    );

    let ticket_rows = tickets::list_tickets_for_session(pool, design_session_id).await?;
    for ticket in &ticket_rows {
        println!(
            "    [{}] {} ({}, attempt {})",
            ticket.state,
            ticket.title,
            ticket.id,
            ticket.rejection_count + 1,
        );
    }

    Ok(())
}
