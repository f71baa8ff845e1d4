use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle state of a ticket.
///
/// ```text
/// draft          -> ready | blocked | cancelled
/// blocked        -> ready | cancelled                  (dependency cascade)
/// ready          -> in_progress | cancelled             (dispatcher claim)
/// in_progress    -> verifying | needs_review | cancelled
/// verifying      -> in_progress | in_review | needs_review
/// in_review      -> reviewing | cancelled               (sentinel claim)
/// reviewing      -> merged | sentinel_failed
/// sentinel_failed -> in_progress | needs_review
/// merged         -> done
/// needs_review   -> in_progress | cancelled             (operator override)
/// done, cancelled: terminal
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    Draft,
    Ready,
    Blocked,
    InProgress,
    Verifying,
    InReview,
    Reviewing,
    NeedsReview,
    Merged,
    Done,
    Cancelled,
    SentinelFailed,
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Ready => "ready",
            Self::Blocked => "blocked",
            Self::InProgress => "in_progress",
            Self::Verifying => "verifying",
            Self::InReview => "in_review",
            Self::Reviewing => "reviewing",
            Self::NeedsReview => "needs_review",
            Self::Merged => "merged",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::SentinelFailed => "sentinel_failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TicketState {
    type Err = TicketStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "ready" => Ok(Self::Ready),
            "blocked" => Ok(Self::Blocked),
            "in_progress" => Ok(Self::InProgress),
            "verifying" => Ok(Self::Verifying),
            "in_review" => Ok(Self::InReview),
            "reviewing" => Ok(Self::Reviewing),
            "needs_review" => Ok(Self::NeedsReview),
            "merged" => Ok(Self::Merged),
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            "sentinel_failed" => Ok(Self::SentinelFailed),
            other => Err(TicketStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TicketState`] string.
#[derive(Debug, Clone)]
pub struct TicketStateParseError(pub String);

impl fmt::Display for TicketStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid ticket state: {:?}", self.0)
    }
}

impl std::error::Error for TicketStateParseError {}

// ---------------------------------------------------------------------------

/// Outcome of the most recent verification attempt for a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Verifying,
    Passed,
    Failed,
    SentinelRejected,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unverified => "unverified",
            Self::Verifying => "verifying",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::SentinelRejected => "sentinel_rejected",
        };
        f.write_str(s)
    }
}

impl FromStr for VerificationStatus {
    type Err = VerificationStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unverified" => Ok(Self::Unverified),
            "verifying" => Ok(Self::Verifying),
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "sentinel_rejected" => Ok(Self::SentinelRejected),
            other => Err(VerificationStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`VerificationStatus`] string.
#[derive(Debug, Clone)]
pub struct VerificationStatusParseError(pub String);

impl fmt::Display for VerificationStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid verification status: {:?}", self.0)
    }
}

impl std::error::Error for VerificationStatusParseError {}

// ---------------------------------------------------------------------------

/// Who (or what role) a ticket is assigned to. A role tag, not an identity --
/// two tickets with `assignee_kind = Agent` may be worked by different
/// worker processes over their lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssigneeKind {
    Human,
    Agent,
}

impl fmt::Display for AssigneeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Human => "human",
            Self::Agent => "agent",
        };
        f.write_str(s)
    }
}

impl FromStr for AssigneeKind {
    type Err = AssigneeKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(Self::Human),
            "agent" => Ok(Self::Agent),
            other => Err(AssigneeKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`AssigneeKind`] string.
#[derive(Debug, Clone)]
pub struct AssigneeKindParseError(pub String);

impl fmt::Display for AssigneeKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid assignee kind: {:?}", self.0)
    }
}

impl std::error::Error for AssigneeKindParseError {}

// ---------------------------------------------------------------------------

/// Kind of project a ticket's repo belongs to. `BuildFeature` projects get
/// the full generator/verifier/PR pipeline; `Generic` projects are a stub
/// for non-code work and skip verification (see `coordinator`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectKind {
    Generic,
    BuildFeature,
}

impl fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Generic => "generic",
            Self::BuildFeature => "build_feature",
        };
        f.write_str(s)
    }
}

impl FromStr for ProjectKind {
    type Err = ProjectKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generic" => Ok(Self::Generic),
            "build_feature" => Ok(Self::BuildFeature),
            other => Err(ProjectKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ProjectKind`] string.
#[derive(Debug, Clone)]
pub struct ProjectKindParseError(pub String);

impl fmt::Display for ProjectKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid project kind: {:?}", self.0)
    }
}

impl std::error::Error for ProjectKindParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A tenant-scoped code repository that tickets are worked against.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub repo_url: String,
    pub default_base_branch: String,
    pub kind: ProjectKind,
    pub created_at: DateTime<Utc>,
}

/// A design session -- the scope within which the dependency cascade
/// promotes `blocked` tickets to `ready`. Created once per approved spec,
/// before the generator is invoked.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DesignSession {
    pub id: Uuid,
    pub project_id: Uuid,
    pub tenant_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A ticket -- a single unit of agent- or human-assignable work.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub design_session_id: Uuid,
    pub project_id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub description: String,
    /// Ordered list of `{sub_id, text}` objects with stable sub-ids.
    pub acceptance_criteria: serde_json::Value,
    pub hint_files: Vec<String>,
    /// `{files_to_create: [...], files_to_modify: [...]}`, populated by the
    /// generator when it has enough context to narrow the agent's search.
    pub rag_context: Option<serde_json::Value>,
    pub assignee_kind: AssigneeKind,
    pub assignee_id: Option<String>,
    pub worker_id: Option<String>,
    pub state: TicketState,
    pub verification_status: VerificationStatus,
    pub rejection_count: i32,
    /// Immutable once the session is activated (see `cascade`).
    pub depends_on: Vec<Uuid>,
    pub branch_name: String,
    pub pr_url: Option<String>,
    pub merged_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub heartbeat_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub unblocked_at: Option<DateTime<Utc>>,
}

/// An append-only record of a committed ticket state transition or other
/// notable occurrence (verifier feedback received, heartbeat recorded).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketEvent {
    pub id: i64,
    pub ticket_id: Uuid,
    pub kind: String,
    pub from_state: Option<TicketState>,
    pub to_state: Option<TicketState>,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// An attempt-scoped artifact attached to a ticket: verifier feedback,
/// evidence bundles, or generator diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketArtifact {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub attempt: i32,
    pub kind: String,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
