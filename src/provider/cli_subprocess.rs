//! `cli-subprocess` provider variant: drives an external CLI agent (Claude
//! CLI, Cursor agent) as a child process and diffs the working tree around it.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{EngineError, PermissionErrorKind, ProviderErrorKind, TimeoutKind};
use crate::vcs::VersionControl;

use super::{ExecutionResult, Provider, ProviderOptions, detect_completion_signal};

pub struct CliSubprocessProvider {
    pub binary: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub vcs: Box<dyn VersionControl>,
}

impl CliSubprocessProvider {
    pub fn new(binary: impl Into<String>, cwd: PathBuf, vcs: Box<dyn VersionControl>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            cwd,
            vcs,
        }
    }
}

#[async_trait]
impl Provider for CliSubprocessProvider {
    fn name(&self) -> &str {
        &self.binary
    }

    async fn is_available(&self) -> bool {
        debug!(binary = %self.binary, "CliSubprocessProvider::is_available: called");
        tokio::process::Command::new("which")
            .arg(&self.binary)
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn execute(&self, prompt: &str, options: &ProviderOptions) -> Result<ExecutionResult, EngineError> {
        debug!(binary = %self.binary, "CliSubprocessProvider::execute: called");

        let files_before = self.vcs.dirty_files().await.unwrap_or_default();

        let mut command = tokio::process::Command::new(&self.binary);
        command.args(&self.args).arg(prompt).current_dir(&self.cwd).stdout(Stdio::piped()).stderr(Stdio::piped());
        if options.dangerously_skip_permissions {
            command.arg("--dangerously-skip-permissions");
        }

        let child = command.spawn().map_err(|e| EngineError::Provider {
            kind: ProviderErrorKind::Crash,
            message: format!("failed to spawn {}: {e}", self.binary),
            retryable: true,
        })?;

        let wait = tokio::time::timeout(options.timeout, child.wait_with_output()).await;

        let output = match wait {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return Err(EngineError::Provider {
                    kind: ProviderErrorKind::Crash,
                    message: e.to_string(),
                    retryable: true,
                });
            }
            Err(_) => {
                debug!("CliSubprocessProvider::execute: timed out");
                return Err(EngineError::Timeout { kind: TimeoutKind::Iteration });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() && !stderr.is_empty() {
            // A subprocess exit code carries no HTTP-style status, so the
            // auth/server-fault split is read off stderr text instead of the
            // code: an authentication rejection is not retryable, anything
            // else (an unknown-cause crash, a transient backend error) is.
            let lower = stderr.to_lowercase();
            let looks_like_auth_failure =
                lower.contains("unauthorized") || lower.contains("authentication") || lower.contains("401") || lower.contains("403");
            return Err(if looks_like_auth_failure {
                EngineError::Permission {
                    kind: PermissionErrorKind::ApiAuth,
                }
            } else {
                // No HTTP status to read here, only a POSIX exit code: §4.3
                // treats an unknown-cause process failure as retryable.
                EngineError::Provider {
                    kind: ProviderErrorKind::ApiError,
                    message: stderr,
                    retryable: true,
                }
            });
        }

        let files_after = self.vcs.dirty_files().await.unwrap_or_default();
        let files_changed: Vec<String> = files_after.into_iter().filter(|f| !files_before.contains(f)).collect();

        let completion_signal = detect_completion_signal(&stdout).map(str::to_string);

        Ok(ExecutionResult {
            success: true,
            output: stdout,
            files_changed,
            iteration_complete: completion_signal.is_some(),
            completion_signal,
            error: None,
            error_category: None,
            error_code: None,
            token_usage: None,
            conversation_state: None,
            conversation_metrics: None,
        })
    }
}
