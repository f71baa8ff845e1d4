//! The `Generator` trait -- the adapter interface for turning a ticket into
//! a code change.
//!
//! A generator's contract is request/response: given a ticket and its
//! working directory, produce one patch attempt and return. Long-running
//! agent runtimes are expected to wrap their own session management inside
//! a single `generate` call.

pub mod patch;
pub mod subprocess;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use patch::{apply_generated_files, PatchOutcome};
pub use subprocess::SubprocessGenerator;

/// Everything a generator needs to attempt a ticket.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub ticket_id: Uuid,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: serde_json::Value,
    pub hint_files: Vec<String>,
    pub rag_context: Option<serde_json::Value>,
    /// Verifier feedback from the previous attempt, if this is a retry.
    pub previous_feedback: Option<serde_json::Value>,
    pub attempt: i32,
}

/// The outcome of a single generation attempt.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationResponse {
    /// Whether the generator believes it made a complete attempt. `false`
    /// means it gave up without producing a usable change (the coordinator
    /// treats this the same as a verification failure).
    pub completed: bool,
    /// Free-form summary of what changed, stored as a ticket artifact.
    pub summary: String,
    /// The file-level changes to apply to the working directory.
    #[serde(default)]
    pub files: Vec<GeneratedFile>,
    /// Diagnostic detail (tool calls, token usage) kept for the evidence
    /// trail but not otherwise interpreted.
    pub diagnostics: serde_json::Value,
}

/// A single file-level change proposed by a generator.
///
/// `create` carries full file content; `modify` carries an ordered list of
/// search/replace patches applied against the file's current content. The
/// tag lets a generator mix brand-new files and edits to existing ones in
/// one response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratedFile {
    Create { path: String, content: String },
    Modify { path: String, patches: Vec<SearchReplace> },
}

/// One exact-text search/replace patch, applied in order against a file's
/// existing content.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchReplace {
    pub search: String,
    pub replace: String,
}

/// Adapter interface for turning a ticket into a code change written to a
/// working directory.
///
/// Object-safe so implementations can be stored as `Box<dyn Generator>`.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Human-readable name for this generator (e.g. "claude-code-subprocess").
    fn name(&self) -> &str;

    /// Attempt the ticket, writing any code changes into `working_dir`.
    /// Returns once the attempt is complete -- this call does not stream
    /// intermediate events.
    async fn generate(
        &self,
        request: &GenerationRequest,
        working_dir: &Path,
    ) -> Result<GenerationResponse>;
}
