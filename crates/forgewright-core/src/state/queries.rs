//! Query helpers for ticket/session progress tracking.
//!
//! These re-export and wrap the lower-level DB queries from
//! [`forgewright_db::queries::tickets`] for use in the orchestration layer.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

pub use forgewright_db::queries::tickets::SessionProgress;

/// Get a progress summary (counts by state) for a design session.
pub async fn get_session_progress(pool: &PgPool, design_session_id: Uuid) -> Result<SessionProgress> {
    forgewright_db::queries::tickets::get_session_progress(pool, design_session_id).await
}

/// Check whether every ticket in a design session has reached a terminal
/// state (`done` or `cancelled`).
pub async fn is_session_complete(pool: &PgPool, design_session_id: Uuid) -> Result<bool> {
    forgewright_db::queries::tickets::is_session_complete(pool, design_session_id).await
}
