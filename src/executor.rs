//! Executor (§4.5): the iteration-loop state machine that drives one task
//! from `idle` to a terminal status, the hardest part of the engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{Config, PermissionsConfig, ScopeEnforcement};
use crate::context::{estimate_context_size, load_context};
use crate::domain::state::{ExecutorState, ScopeDecision, Status};
use crate::domain::{LoadedContext, Skill, Task};
use crate::error::{ConfigErrorKind, EngineError, ScopeErrorKind};
use crate::metrics::{FileChangeKind, MetricsCollector};
use crate::provider::{ExecutionResult, Provider, ProviderOptions};
use crate::report_writer::ReportWriter;
use crate::scope::{self, ScopeGuard, ScopeMode};
use crate::validator::{self, ValidationPhase};
use crate::vcs::VersionControl;

const TAIL_CHARS: usize = 2_000;

/// Fire-and-forget callbacks the caller may supply. Failures inside an
/// observer must never affect run outcome — only the logged warning.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_iteration(&self, _state: &ExecutorState) {}
    async fn on_phase(&self, _phase: &str, _iteration: u32) {}
    async fn on_output(&self, _chunk: &str) {}
    async fn on_ask_user(&self, _files: &[String], _reason: &str) -> bool {
        false
    }
}

pub struct NullObserver;

#[async_trait]
impl Observer for NullObserver {}

fn scope_mode_for(enforcement: ScopeEnforcement) -> ScopeMode {
    match enforcement {
        ScopeEnforcement::Strict => ScopeMode::Strict,
        ScopeEnforcement::Ask => ScopeMode::Ask,
        ScopeEnforcement::Permissive => ScopeMode::Permissive,
    }
}

pub struct ExecutorOptions {
    pub project_root: PathBuf,
    pub task_path: PathBuf,
    pub config: Config,
    pub provider: Arc<dyn Provider>,
    pub vcs: Arc<dyn VersionControl>,
    pub observer: Arc<dyn Observer>,
    pub resume: bool,
    pub discovered_skills: Option<Vec<Skill>>,
    pub plan: Option<Vec<crate::domain::PlanTask>>,
    /// Optional secret-leak detector over the assembled context text;
    /// returning `true` means a plaintext secret was found (hard fail).
    pub secret_detector: Option<Arc<dyn Fn(&str) -> bool + Send + Sync>>,
    pub cost_rates: Option<crate::provider::CostRates>,
}

pub struct ExecutorRun {
    pub state: ExecutorState,
    pub report_path: Option<PathBuf>,
}

pub struct Executor {
    options: ExecutorOptions,
    state: ExecutorState,
    metrics: MetricsCollector,
    guard: ScopeGuard,
    context: Option<LoadedContext>,
}

impl Executor {
    pub fn new(options: ExecutorOptions) -> Self {
        let provider_info = crate::domain::report::ProviderInfo {
            provider_type: options.config.provider.provider_type.clone(),
            model: options.config.provider.model.clone(),
        };
        let metrics = MetricsCollector::new(
            options.task_path.to_string_lossy().to_string(),
            provider_info,
            options.config.execution.max_iterations,
        );
        Self {
            options,
            state: ExecutorState::default(),
            metrics,
            guard: ScopeGuard::new(),
            context: None,
        }
    }

    /// Record start time, load context, estimate tokens, validate against
    /// secret leakage, and handle resume prepopulation.
    async fn pre_flight(&mut self) -> Result<(), EngineError> {
        debug!("Executor::pre_flight: called");
        self.state.started_at = Some(chrono::Utc::now());

        if let Some(rates) = self.options.cost_rates.clone() {
            self.metrics.set_cost_rates(rates);
        }

        let ctx = load_context(
            &self.options.project_root,
            &self.options.task_path,
            self.options.discovered_skills.clone(),
            self.options.plan.clone(),
        )
        .map_err(|e| EngineError::Config {
            kind: ConfigErrorKind::Invalid,
            message: e.to_string(),
        })?;

        self.metrics.set_task_metadata(
            Some(ctx.task.goal.clone()),
            Some(format!("{:?}", ctx.task.task_type).to_lowercase()),
            Some(ctx.role.identity.clone()).filter(|s| !s.is_empty()),
        );

        let (total_tokens, breakdown) = estimate_context_size(&ctx);
        self.state.context_tokens = Some(total_tokens);
        self.state.context_breakdown = Some(breakdown.clone());
        self.metrics.set_context_tokens(total_tokens, breakdown);

        if let Some(detector) = &self.options.secret_detector {
            let full_text = format!("{}\n{}\n{}", ctx.agents.project_overview, ctx.task.goal, ctx.task.requirements);
            if detector(&full_text) {
                return Err(EngineError::Config {
                    kind: ConfigErrorKind::Invalid,
                    message: "context contains a plaintext secret".to_string(),
                });
            }
        }

        if self.options.resume {
            let blocked = ctx.task.blocked_status.clone().ok_or_else(|| EngineError::Config {
                kind: ConfigErrorKind::Invalid,
                message: "Task is not blocked".to_string(),
            })?;
            self.state.iteration = blocked.previous_iteration;
            self.state.merge_files_modified(blocked.files_modified);
        }

        self.context = Some(ctx);
        Ok(())
    }

    /// `iterations_this_run` counts iterations since this `run()` call started
    /// (1-based), distinct from `state.iteration` which also carries a
    /// resumed task's prior iteration count. Continuation only kicks in once
    /// there is a previous iteration's output *within this run* to continue
    /// from — the first iteration after a resume still needs the full
    /// context plus the "Resuming Blocked Task" block.
    fn build_prompt(&self, previous_output: &str, previous_validation_error: Option<&str>, iterations_this_run: u32) -> String {
        let ctx = self.context.as_ref().expect("context loaded in pre_flight");
        let continuation_active = self.options.config.execution.session_continuation && iterations_this_run > 1;

        if !continuation_active {
            let mut prompt = String::new();
            prompt.push_str(&ctx.agents.project_overview);
            prompt.push_str("\n\n");
            prompt.push_str(&ctx.role.identity);
            prompt.push_str("\n\n## Task\n");
            prompt.push_str(&ctx.task.goal);
            prompt.push_str("\n\n");
            prompt.push_str(&ctx.task.requirements);
            if let Some(plan) = &ctx.plan {
                prompt.push_str("\n\n## Plan\n");
                for task in plan {
                    prompt.push_str(&format!("- {}\n", task.description));
                }
            }
            if let Some(skills) = &ctx.skills {
                prompt.push_str(&crate::skills::render_skills_prompt(skills));
            }
            if let Some(blocked) = &ctx.task.blocked_status {
                prompt.push_str(&format!(
                    "\n\n## Resuming Blocked Task\nPreviously blocked at iteration {}.\n{}\n",
                    blocked.previous_iteration, blocked.blocking_issue
                ));
            }
            if let Some(err) = previous_validation_error {
                prompt.push_str(&format!("\n\n## Previous Validation Error\npreviousValidationError: true\n{err}\n"));
            }
            prompt
        } else {
            let tail: String = previous_output.chars().rev().take(TAIL_CHARS).collect::<Vec<_>>().into_iter().rev().collect();
            let mut prompt = format!("## Iteration {}\n\n{}", self.state.iteration, tail);
            if let Some(err) = previous_validation_error {
                prompt.push_str(&format!("\n\n## Previous Validation Error\npreviousValidationError: true\n{err}\n"));
            }
            prompt
        }
    }

    async fn run_scope_check(&mut self, result: &ExecutionResult) -> Result<ScopeStepOutcome, EngineError> {
        let ctx = self.context.as_ref().expect("context loaded");
        let mode = scope_mode_for(self.options.config.permissions.scope_enforcement);
        let decision = scope::check_file_changes(&self.state.files_modified, &ctx.task.scope, mode);

        match &decision {
            ScopeDecision::Block { files, reason } => {
                if result.completion_signal.is_some() {
                    debug!("Executor::run_scope_check: completion overrides scope block");
                    Ok(ScopeStepOutcome::Proceed)
                } else {
                    self.metrics.record_scope_violation(files.join(","));
                    let report = self.guard.generate_violation_report(&decision, &ctx.task.scope);
                    warn!(reason, "Executor::run_scope_check: scope violation");
                    Ok(ScopeStepOutcome::Retry { feedback: report })
                }
            }
            ScopeDecision::AskUser { files, reason } => {
                if self.options.observer.on_ask_user(files, reason).await {
                    for f in files {
                        self.guard.approve(f.clone());
                        self.metrics.record_scope_approval(f.clone());
                    }
                    Ok(ScopeStepOutcome::Proceed)
                } else {
                    Ok(ScopeStepOutcome::Blocked {
                        reason: format!("user denied scope approval: {reason}"),
                    })
                }
            }
            ScopeDecision::Allow => Ok(ScopeStepOutcome::Proceed),
        }
    }

    /// Run the full iteration loop until a terminal status or exhaustion.
    pub async fn run(mut self) -> Result<ExecutorRun, EngineError> {
        debug!("Executor::run: called");
        if !self.state.transition(Status::Running) {
            return Err(EngineError::Config {
                kind: ConfigErrorKind::Invalid,
                message: "executor already in a terminal state".to_string(),
            });
        }

        self.metrics.start_phase("PreFlight");
        let pre_flight_result = self.pre_flight().await;
        self.metrics.end_phase("PreFlight");
        if let Err(e) = pre_flight_result {
            self.metrics.record_error(&e);
            self.state.transition(Status::Failed);
            return self.post_flight(Err(e)).await;
        }

        let max_iterations = self.options.config.execution.max_iterations;
        let max_consecutive_failures = self.options.config.execution.max_consecutive_failures;
        let mut consecutive_failures = 0u32;
        let mut previous_output = String::new();
        let mut previous_validation_error: Option<String> = None;
        let mut conversation_state = None;
        let mut warned_skip_permissions = false;
        let mut iterations_this_run = 0u32;

        let run_result: Result<(), EngineError> = loop {
            if self.state.status.is_terminal() {
                break Ok(());
            }
            if self.state.iteration >= max_iterations {
                self.state.transition(Status::Blocked);
                self.metrics.set_blocked_reason("Max iterations reached");
                break Ok(());
            }
            if consecutive_failures >= max_consecutive_failures {
                self.state.transition(Status::Blocked);
                self.metrics.set_blocked_reason("Max consecutive failures reached");
                break Ok(());
            }

            self.state.iteration += 1;
            iterations_this_run += 1;
            self.metrics.set_consecutive_failures(consecutive_failures);
            self.options.observer.on_phase("Starting iteration", self.state.iteration).await;
            self.options.observer.on_iteration(&self.state).await;

            let prompt = self.build_prompt(&previous_output, previous_validation_error.as_deref(), iterations_this_run);

            self.options.observer.on_phase("Executing AI", self.state.iteration).await;
            let skip_permissions = self.options.config.security.skip_permissions;
            if skip_permissions && self.options.config.security.warn_on_skip && !warned_skip_permissions {
                warn!("Executor::run: dangerouslySkipPermissions is enabled for this run");
                warned_skip_permissions = true;
            }

            let provider_options = ProviderOptions {
                model: self.options.config.provider.model.clone(),
                timeout: iteration_timeout(&self.options.config),
                max_tokens: None,
                dangerously_skip_permissions: skip_permissions,
                session_continuation: conversation_state.clone(),
                conversation_config: Some((&self.options.config.conversation).into()),
            };

            let iteration_started = std::time::Instant::now();
            let call = self.options.provider.execute(&prompt, &provider_options);
            let outcome = tokio::time::timeout(provider_options.timeout, call).await;

            let result = match outcome {
                Err(_) => {
                    debug!("Executor::run: iteration timed out");
                    consecutive_failures += 1;
                    self.metrics.record_iteration(self.state.iteration, iteration_started.elapsed().as_millis() as u64);
                    continue;
                }
                Ok(Err(e)) => {
                    if !e.retryable() {
                        self.metrics.record_error(&e);
                        self.state.transition(Status::Failed);
                        break Err(e);
                    }
                    consecutive_failures += 1;
                    continue;
                }
                Ok(Ok(result)) => result,
            };

            self.metrics.record_iteration(self.state.iteration, iteration_started.elapsed().as_millis() as u64);
            if let Some(usage) = &result.token_usage {
                self.metrics.record_token_usage(self.state.iteration, usage.input_tokens, usage.output_tokens);
            }
            conversation_state = result.conversation_state.clone();
            previous_output = result.output.clone();
            self.options.observer.on_output(&result.output).await;

            let blocked_signal = !result.success
                && (result.output.contains("BLOCKED:") || result.completion_signal.as_deref() == Some("task_blocked"));
            if blocked_signal {
                self.state.transition(Status::Blocked);
                self.metrics.set_blocked_reason(result.error.clone().unwrap_or_else(|| result.output.clone()));
                break Ok(());
            }

            self.state.merge_files_modified(result.files_changed.iter().cloned());
            for f in &result.files_changed {
                self.metrics.record_file_change(f.clone(), FileChangeKind::Modified);
            }

            self.options.observer.on_phase("Checking scope", self.state.iteration).await;
            match self.run_scope_check(&result).await? {
                ScopeStepOutcome::Proceed => {}
                ScopeStepOutcome::Retry { feedback } => {
                    self.options.observer.on_phase("Scope violation", self.state.iteration).await;
                    consecutive_failures += 1;
                    previous_validation_error = Some(feedback);
                    continue;
                }
                ScopeStepOutcome::Blocked { reason } => {
                    self.state.transition(Status::Blocked);
                    self.metrics.set_blocked_reason(reason);
                    break Ok(());
                }
            }

            if result.completion_signal.is_none() {
                if result.success {
                    consecutive_failures = 0;
                }
                previous_validation_error = None;
                continue;
            }

            self.options.observer.on_phase("Validating", self.state.iteration).await;
            let commands = self.options.config.validation.pre_commit.clone();
            let summary = validator::run_validation(ValidationPhase::PreCommit, &commands, &self.options.project_root, None).await;
            let passed = summary.all_passed();
            self.metrics.record_validation(summary.clone());
            self.state.validation_results.extend(summary.results.clone());

            if !passed {
                consecutive_failures += 1;
                previous_validation_error = Some(summary.combined_output());
                continue;
            }

            self.state.transition(Status::Completed);
            break Ok(());
        };

        self.post_flight(run_result).await
    }

    async fn post_flight(mut self, run_result: Result<(), EngineError>) -> Result<ExecutorRun, EngineError> {
        debug!("Executor::post_flight: called");
        self.metrics.start_phase("PostFlight");
        self.state.completed_at = Some(chrono::Utc::now());

        let success = matches!(self.state.status, Status::Completed);
        self.metrics.set_status(status_label(self.state.status));

        let target_dir = if success { "completed" } else { "blocked" };
        if self.state.status == Status::Blocked {
            if let Err(e) = self.write_blocked_block().await {
                warn!("Executor::post_flight: failed to write blocked status block: {e}");
            }
        }
        if let Some(parent) = self.options.task_path.parent().and_then(Path::parent) {
            let dest_dir = parent.join(target_dir);
            if let Some(file_name) = self.options.task_path.file_name() {
                let dest = dest_dir.join(file_name);
                if tokio::fs::create_dir_all(&dest_dir).await.is_ok() {
                    if tokio::fs::rename(&self.options.task_path, &dest).await.is_ok() {
                        let _ = self.options.vcs.stage(&[dest.to_string_lossy().to_string()]).await;
                        let _ = self
                            .options
                            .vcs
                            .unstage(&[self.options.task_path.to_string_lossy().to_string()])
                            .await;
                    } else {
                        warn!("Executor::post_flight: failed to move task file, leaving in place");
                    }
                }
            }
        }

        let report = self.metrics.to_report();
        let writer = ReportWriter::new(self.options.project_root.join(".ai").join("reports"));
        let report_path = writer.write(&report).await.ok();

        let webhook = &self.options.config.notifications.webhook;
        if webhook.enabled {
            let webhook_config: crate::report_writer::WebhookConfig = webhook.into();
            writer.deliver_webhook(&webhook_config, status_label(self.state.status), &report).await;
        }

        if success && self.options.config.permissions.auto_commit {
            let _ = self.options.vcs.commit(&format!("aidf: complete {}", self.options.task_path.display())).await;
            if self.options.config.permissions.auto_push {
                let _ = self.options.vcs.push().await;
            }
        }

        self.metrics.end_phase("PostFlight");

        run_result?;
        Ok(ExecutorRun {
            state: self.state,
            report_path,
        })
    }

    /// Append a `## Status: BLOCKED` block to the task file in place, in the
    /// exact shape `context::parse_blocked_status` expects, so a later
    /// `--resume` run can pick the thread back up.
    async fn write_blocked_block(&self) -> Result<(), EngineError> {
        let content = tokio::fs::read_to_string(&self.options.task_path)
            .await
            .map_err(|e| EngineError::Config {
                kind: ConfigErrorKind::Missing,
                message: format!("failed to read task file for blocked write-back: {e}"),
            })?;

        let started_at = self.metrics.to_report().timing.started_at.to_rfc3339();
        let blocked_at = chrono::Utc::now().to_rfc3339();
        let reason = self.metrics.blocked_reason().unwrap_or("unknown").to_string();

        let files_section = if self.state.files_modified.is_empty() {
            "_None_".to_string()
        } else {
            self.state.files_modified.iter().map(|f| format!("- `{f}`")).collect::<Vec<_>>().join("\n")
        };

        let block = format!(
            "\n## Status: BLOCKED\n\n\
             ### Execution Log\n\
             **Started:** {started_at}\n\
             **Iterations:** {}\n\
             **Blocked at:** {blocked_at}\n\n\
             ### Blocking Issue\n```\n{reason}\n```\n\n\
             ### Files Modified\n{files_section}\n",
            self.state.iteration
        );

        tokio::fs::write(&self.options.task_path, content + &block)
            .await
            .map_err(|e| EngineError::Config {
                kind: ConfigErrorKind::Missing,
                message: format!("failed to write blocked status block: {e}"),
            })
    }
}

enum ScopeStepOutcome {
    Proceed,
    Retry { feedback: String },
    Blocked { reason: String },
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Idle => "idle",
        Status::Running => "running",
        Status::Paused => "paused",
        Status::Completed => "completed",
        Status::Blocked => "blocked",
        Status::Failed => "failed",
    }
}

fn iteration_timeout(config: &Config) -> Duration {
    let secs = config.execution.timeout_per_iteration;
    if secs == 0 {
        Duration::from_secs(u64::MAX / 4)
    } else {
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::report::ProviderInfo;
    use crate::provider::ExecutionResult;

    struct StubProvider {
        responses: std::sync::Mutex<Vec<ExecutionResult>>,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn execute(&self, _prompt: &str, _options: &ProviderOptions) -> Result<ExecutionResult, EngineError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(ExecutionResult::default());
            }
            Ok(responses.remove(0))
        }
    }

    struct NoopVcs;

    #[async_trait]
    impl VersionControl for NoopVcs {
        async fn dirty_files(&self) -> Result<Vec<String>, EngineError> {
            Ok(vec![])
        }
        async fn stage(&self, _paths: &[String]) -> Result<(), EngineError> {
            Ok(())
        }
        async fn unstage(&self, _paths: &[String]) -> Result<(), EngineError> {
            Ok(())
        }
        async fn commit(&self, _message: &str) -> Result<(), EngineError> {
            Ok(())
        }
        async fn push(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    async fn write_scaffold(dir: &Path) -> PathBuf {
        tokio::fs::create_dir_all(dir.join(".ai").join("tasks").join("pending")).await.unwrap();
        tokio::fs::write(dir.join(".ai").join("AGENTS.md"), "# Project\nOverview text.\n").await.unwrap();
        let task_path = dir.join(".ai").join("tasks").join("pending").join("t1.md");
        tokio::fs::write(
            &task_path,
            "# Task\n\n## Goal\nDo the thing.\n\n## Task Type\nComponent\n\n## Requirements\nBe correct.\n",
        )
        .await
        .unwrap();
        task_path
    }

    fn base_options(dir: &Path, task_path: PathBuf, provider: Arc<dyn Provider>) -> ExecutorOptions {
        ExecutorOptions {
            project_root: dir.to_path_buf(),
            task_path,
            config: Config::default(),
            provider,
            vcs: Arc::new(NoopVcs),
            observer: Arc::new(NullObserver),
            resume: false,
            discovered_skills: None,
            plan: None,
            secret_detector: None,
            cost_rates: None,
        }
    }

    #[tokio::test]
    async fn exhausting_max_iterations_yields_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let task_path = write_scaffold(dir.path()).await;
        let mut config = Config::default();
        config.execution.max_iterations = 1;
        config.execution.max_consecutive_failures = 100;

        let provider: Arc<dyn Provider> = Arc::new(StubProvider {
            responses: std::sync::Mutex::new(vec![]),
        });
        let mut options = base_options(dir.path(), task_path, provider);
        options.config = config;

        let executor = Executor::new(options);
        let run = executor.run().await.unwrap();
        assert_eq!(run.state.status, Status::Blocked);
    }

    #[tokio::test]
    async fn completion_signal_with_passing_validation_completes() {
        let dir = tempfile::tempdir().unwrap();
        let task_path = write_scaffold(dir.path()).await;

        let provider: Arc<dyn Provider> = Arc::new(StubProvider {
            responses: std::sync::Mutex::new(vec![ExecutionResult {
                success: true,
                output: "<TASK_COMPLETE>".to_string(),
                completion_signal: Some("task_complete".to_string()),
                iteration_complete: true,
                ..Default::default()
            }]),
        });
        let options = base_options(dir.path(), task_path, provider);
        let executor = Executor::new(options);
        let run = executor.run().await.unwrap();
        assert_eq!(run.state.status, Status::Completed);
    }

    #[tokio::test]
    async fn scope_block_without_completion_retries_instead_of_terminating() {
        let dir = tempfile::tempdir().unwrap();
        let task_path = write_scaffold(dir.path()).await;
        tokio::fs::write(
            &task_path,
            "# Task\n\n## Goal\nDo the thing.\n\n## Task Type\nComponent\n\n## Requirements\nBe correct.\n\n## Scope\n### Forbidden\n- node_modules/**\n",
        )
        .await
        .unwrap();

        let mut config = Config::default();
        config.execution.max_iterations = 2;
        config.execution.max_consecutive_failures = 10;

        let provider: Arc<dyn Provider> = Arc::new(StubProvider {
            responses: std::sync::Mutex::new(vec![ExecutionResult {
                success: true,
                output: "working".to_string(),
                files_changed: vec!["node_modules/evil.js".to_string()],
                ..Default::default()
            }]),
        });
        let mut options = base_options(dir.path(), task_path, provider);
        options.config = config;
        let executor = Executor::new(options);
        let run = executor.run().await.unwrap();
        assert_eq!(run.state.status, Status::Blocked);
        assert_eq!(run.state.iteration, 2);
    }
}
