//! Validator (§4.7): runs shell validation commands and collects results.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValidationPhase {
    PreCommit,
    PrePush,
    PrePr,
}

impl ValidationPhase {
    /// Whether this phase stops on first failure, or continues through the
    /// remaining commands and reports all of them.
    pub fn stop_on_first_failure(&self) -> bool {
        !matches!(self, Self::PrePr)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub command: String,
    pub passed: bool,
    pub output: String,
    pub duration_ms: u64,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub phase: ValidationPhase,
    pub results: Vec<ValidationResult>,
}

impl ValidationSummary {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// Interleaved output from all commands, used to embed into a retry
    /// prompt's `previousValidationError` marker.
    pub fn combined_output(&self) -> String {
        self.results
            .iter()
            .map(|r| format!("$ {}\n{}", r.command, r.output))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Run a single validation command with a per-command timeout. Never retried
/// here — the executor owns retry policy.
pub async fn run_validation_command(command: &str, cwd: &std::path::Path, timeout_secs: Option<u64>) -> ValidationResult {
    debug!(command, ?cwd, "run_validation_command: called");
    let started = Instant::now();
    let timeout = Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match child {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "run_validation_command: spawn failed");
            return ValidationResult {
                command: command.to_string(),
                passed: false,
                output: format!("failed to spawn: {e}"),
                duration_ms: started.elapsed().as_millis() as u64,
                exit_code: -1,
            };
        }
    };

    let wait = tokio::time::timeout(timeout, child.wait_with_output()).await;

    match wait {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let combined = if stderr.is_empty() {
                stdout.to_string()
            } else {
                format!("{stdout}\n--- stderr ---\n{stderr}")
            };
            ValidationResult {
                command: command.to_string(),
                passed: output.status.success(),
                output: combined,
                duration_ms: started.elapsed().as_millis() as u64,
                exit_code: output.status.code().unwrap_or(-1),
            }
        }
        Ok(Err(e)) => ValidationResult {
            command: command.to_string(),
            passed: false,
            output: format!("process error: {e}"),
            duration_ms: started.elapsed().as_millis() as u64,
            exit_code: -1,
        },
        Err(_) => {
            debug!(command, "run_validation_command: timed out, killing");
            ValidationResult {
                command: command.to_string(),
                passed: false,
                output: format!("timed out after {}s", timeout.as_secs()),
                duration_ms: started.elapsed().as_millis() as u64,
                exit_code: -1,
            }
        }
    }
}

/// Run a streaming validation command, forwarding output line-by-line to
/// `on_output` as it is produced.
pub async fn run_validation_command_streaming(
    command: &str,
    cwd: &std::path::Path,
    timeout_secs: Option<u64>,
    mut on_output: impl FnMut(&str) + Send,
) -> ValidationResult {
    debug!(command, ?cwd, "run_validation_command_streaming: called");
    let started = Instant::now();
    let timeout = Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match child {
        Ok(c) => c,
        Err(e) => {
            return ValidationResult {
                command: command.to_string(),
                passed: false,
                output: format!("failed to spawn: {e}"),
                duration_ms: started.elapsed().as_millis() as u64,
                exit_code: -1,
            };
        }
    };

    let stdout = child.stdout.take();
    let mut collected = String::new();

    let read_fut = async {
        if let Some(stdout) = stdout {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                on_output(&line);
                collected.push_str(&line);
                collected.push('\n');
            }
        }
    };

    let result = tokio::time::timeout(timeout, async {
        read_fut.await;
        child.wait().await
    })
    .await;

    match result {
        Ok(Ok(status)) => ValidationResult {
            command: command.to_string(),
            passed: status.success(),
            output: collected,
            duration_ms: started.elapsed().as_millis() as u64,
            exit_code: status.code().unwrap_or(-1),
        },
        Ok(Err(e)) => ValidationResult {
            command: command.to_string(),
            passed: false,
            output: format!("process error: {e}"),
            duration_ms: started.elapsed().as_millis() as u64,
            exit_code: -1,
        },
        Err(_) => {
            let _ = child.start_kill();
            ValidationResult {
                command: command.to_string(),
                passed: false,
                output: format!("timed out after {}s", timeout.as_secs()),
                duration_ms: started.elapsed().as_millis() as u64,
                exit_code: -1,
            }
        }
    }
}

/// Run a full phase of validation commands per the stop-on-first-failure
/// policy for the phase.
pub async fn run_validation(
    phase: ValidationPhase,
    commands: &[String],
    cwd: &std::path::Path,
    timeout_secs: Option<u64>,
) -> ValidationSummary {
    debug!(?phase, count = commands.len(), "run_validation: called");
    let mut results = Vec::new();
    for command in commands {
        let result = run_validation_command(command, cwd, timeout_secs).await;
        let failed = !result.passed;
        results.push(result);
        if failed && phase.stop_on_first_failure() {
            debug!("run_validation: stopping after first failure");
            break;
        }
    }
    ValidationSummary { phase, results }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn passing_command_reports_exit_zero() {
        let dir = tempdir().unwrap();
        let result = run_validation_command("exit 0", dir.path(), Some(5)).await;
        assert!(result.passed);
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn failing_command_captures_stderr() {
        let dir = tempdir().unwrap();
        let result = run_validation_command("echo error TS2345 >&2; exit 1", dir.path(), Some(5)).await;
        assert!(!result.passed);
        assert!(result.output.contains("error TS2345"));
    }

    #[tokio::test]
    async fn empty_command_list_trivially_passes() {
        let dir = tempdir().unwrap();
        let summary = run_validation(ValidationPhase::PreCommit, &[], dir.path(), None).await;
        assert!(summary.all_passed());
    }

    #[tokio::test]
    async fn pre_commit_stops_on_first_failure() {
        let dir = tempdir().unwrap();
        let commands = vec!["exit 1".to_string(), "exit 0".to_string()];
        let summary = run_validation(ValidationPhase::PreCommit, &commands, dir.path(), Some(5)).await;
        assert_eq!(summary.results.len(), 1);
        assert!(!summary.all_passed());
    }

    #[tokio::test]
    async fn pre_pr_runs_all_commands_even_after_failure() {
        let dir = tempdir().unwrap();
        let commands = vec!["exit 1".to_string(), "exit 0".to_string()];
        let summary = run_validation(ValidationPhase::PrePr, &commands, dir.path(), Some(5)).await;
        assert_eq!(summary.results.len(), 2);
        assert!(!summary.all_passed());
    }

    #[tokio::test]
    async fn timeout_yields_exit_code_negative_one() {
        let dir = tempdir().unwrap();
        let result = run_validation_command("sleep 5", dir.path(), Some(1)).await;
        assert!(!result.passed);
        assert_eq!(result.exit_code, -1);
    }
}
