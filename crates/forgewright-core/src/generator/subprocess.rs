//! Default [`Generator`](super::Generator) implementation: shells out to a
//! configured command, writes the request as JSON to its stdin, and parses
//! a single JSON object from its stdout.

use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::{GenerationRequest, GenerationResponse, Generator};

/// Generator that spawns `command` with `args`, writes the request as JSON
/// to its stdin, and parses a [`GenerationResponse`] from its stdout.
#[derive(Debug, Clone)]
pub struct SubprocessGenerator {
    name: String,
    command: String,
    args: Vec<String>,
    timeout: std::time::Duration,
}

impl SubprocessGenerator {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            timeout: std::time::Duration::from_secs(900),
        }
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Generator for SubprocessGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        working_dir: &std::path::Path,
    ) -> Result<GenerationResponse> {
        let request_json = serde_json::to_vec(request).context("failed to serialize request")?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn generator command {:?}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&request_json)
                .await
                .context("failed to write request to generator stdin")?;
        }

        let output = tokio::time::timeout(self.timeout, async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stdout.take() {
                let _ = pipe.read_to_string(&mut stdout).await;
            }
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            let status = child.wait().await;
            (status, stdout, stderr)
        })
        .await;

        let (status, stdout, stderr) = match output {
            Ok(result) => result,
            Err(_) => {
                let _ = child.kill().await;
                bail!(
                    "generator {:?} timed out after {:?} for ticket {}",
                    self.name,
                    self.timeout,
                    request.ticket_id
                );
            }
        };

        let status = status.context("failed to wait on generator process")?;
        if !status.success() {
            bail!(
                "generator {:?} exited with {:?} for ticket {}: {}",
                self.name,
                status.code(),
                request.ticket_id,
                stderr
            );
        }

        serde_json::from_str(&stdout).with_context(|| {
            format!(
                "failed to parse generator {:?} response as JSON: {}",
                self.name, stdout
            )
        })
    }
}
