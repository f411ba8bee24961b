//! Metrics collector (§4.8): a passive accumulator fed by the executor.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::report::{
    CostRecord, EnvironmentRecord, ErrorRecord, ExecutionReport, FileChanges, IterationTokens, ProviderInfo, ScopeRecord, TimingRecord,
    TokenBreakdown,
};
use crate::error::EngineError;
use crate::provider::CostRates;
use crate::validator::ValidationSummary;

/// Accumulates timings, tokens, costs, and files across one executor run.
/// Does no I/O; `toReport()` snapshots everything into an `ExecutionReport`.
pub struct MetricsCollector {
    run_id: Uuid,
    task_path: String,
    task_goal: Option<String>,
    task_type: Option<String>,
    role_name: Option<String>,
    provider: ProviderInfo,
    max_iterations: u32,

    started_at: chrono::DateTime<Utc>,
    completed_at: Option<chrono::DateTime<Utc>>,
    phase_starts: HashMap<String, Instant>,
    phase_totals_ms: HashMap<String, u64>,

    iterations: u32,
    per_iteration_tokens: Vec<IterationTokens>,
    per_iteration_ms: Vec<u64>,
    total_input: u64,
    total_output: u64,
    context_tokens: Option<u64>,
    context_breakdown: Option<HashMap<String, u64>>,

    files_modified: Vec<String>,
    files_created: Vec<String>,
    files_deleted: Vec<String>,

    validation: Option<ValidationSummary>,
    scope_violations: Vec<String>,
    scope_approvals: Vec<String>,

    status: String,
    blocked_reason: Option<String>,
    consecutive_failures: u32,
    error: Option<ErrorRecord>,

    cost_rates: Option<CostRates>,
}

impl MetricsCollector {
    pub fn new(task_path: impl Into<String>, provider: ProviderInfo, max_iterations: u32) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            task_path: task_path.into(),
            task_goal: None,
            task_type: None,
            role_name: None,
            provider,
            max_iterations,
            started_at: Utc::now(),
            completed_at: None,
            phase_starts: HashMap::new(),
            phase_totals_ms: HashMap::new(),
            iterations: 0,
            per_iteration_tokens: Vec::new(),
            per_iteration_ms: Vec::new(),
            total_input: 0,
            total_output: 0,
            context_tokens: None,
            context_breakdown: None,
            files_modified: Vec::new(),
            files_created: Vec::new(),
            files_deleted: Vec::new(),
            validation: None,
            scope_violations: Vec::new(),
            scope_approvals: Vec::new(),
            status: "running".to_string(),
            blocked_reason: None,
            consecutive_failures: 0,
            error: None,
            cost_rates: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn set_task_metadata(&mut self, goal: Option<String>, task_type: Option<String>, role_name: Option<String>) {
        self.task_goal = goal;
        self.task_type = task_type;
        self.role_name = role_name;
    }

    pub fn set_cost_rates(&mut self, rates: CostRates) {
        self.cost_rates = Some(rates);
    }

    /// Start timing a named phase. Accumulation across multiple start/end
    /// pairs with the same name sums.
    pub fn start_phase(&mut self, name: &str) {
        self.phase_starts.insert(name.to_string(), Instant::now());
    }

    pub fn end_phase(&mut self, name: &str) {
        if let Some(start) = self.phase_starts.remove(name) {
            let elapsed = start.elapsed().as_millis() as u64;
            *self.phase_totals_ms.entry(name.to_string()).or_insert(0) += elapsed;
        }
    }

    pub fn record_iteration(&mut self, iteration: u32, duration_ms: u64) {
        self.iterations = self.iterations.max(iteration);
        self.per_iteration_ms.push(duration_ms);
    }

    pub fn record_token_usage(&mut self, iteration: u32, input: u64, output: u64) {
        self.total_input += input;
        self.total_output += output;
        self.per_iteration_tokens.push(IterationTokens { iteration, input, output });
    }

    pub fn record_validation(&mut self, summary: ValidationSummary) {
        self.validation = Some(summary);
    }

    pub fn record_scope_violation(&mut self, file: impl Into<String>) {
        self.scope_violations.push(file.into());
    }

    pub fn record_scope_approval(&mut self, file: impl Into<String>) {
        self.scope_approvals.push(file.into());
    }

    pub fn record_file_change(&mut self, file: impl Into<String>, kind: FileChangeKind) {
        let file = file.into();
        match kind {
            FileChangeKind::Modified => {
                if !self.files_modified.contains(&file) {
                    self.files_modified.push(file);
                }
            }
            FileChangeKind::Created => {
                if !self.files_created.contains(&file) {
                    self.files_created.push(file);
                }
            }
            FileChangeKind::Deleted => {
                if !self.files_deleted.contains(&file) {
                    self.files_deleted.push(file);
                }
            }
        }
    }

    pub fn record_error(&mut self, error: &EngineError) {
        self.error = Some(ErrorRecord {
            category: error.category().to_string(),
            message: error.to_string(),
            retryable: error.retryable(),
        });
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        if self.status != "running" {
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn set_blocked_reason(&mut self, reason: impl Into<String>) {
        self.blocked_reason = Some(reason.into());
    }

    pub fn blocked_reason(&self) -> Option<&str> {
        self.blocked_reason.as_deref()
    }

    pub fn set_context_tokens(&mut self, total: u64, breakdown: HashMap<String, u64>) {
        self.context_tokens = Some(total);
        self.context_breakdown = Some(breakdown);
    }

    pub fn set_consecutive_failures(&mut self, n: u32) {
        self.consecutive_failures = n;
    }

    fn compute_cost(&self) -> Option<CostRecord> {
        let rates = self.cost_rates.as_ref()?;
        let input_rate = *rates.get("input_per_1m").unwrap_or(&0.0);
        let output_rate = *rates.get("output_per_1m").unwrap_or(&0.0);
        let input_cost = (self.total_input as f64 / 1_000_000.0) * input_rate;
        let output_cost = (self.total_output as f64 / 1_000_000.0) * output_rate;
        Some(CostRecord {
            estimated_total: input_cost + output_cost,
            currency: "USD".to_string(),
            rates: rates.clone(),
            per_iteration: Vec::new(),
        })
    }

    /// Snapshot all accumulators into an immutable `ExecutionReport`.
    pub fn to_report(&self) -> ExecutionReport {
        let mut files = FileChanges {
            modified: self.files_modified.clone(),
            created: self.files_created.clone(),
            deleted: self.files_deleted.clone(),
            total_count: 0,
        };
        files.recompute_total();

        let total_duration_ms = self
            .completed_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        ExecutionReport {
            run_id: self.run_id,
            timestamp: self.started_at,
            task_path: self.task_path.clone(),
            task_goal: self.task_goal.clone(),
            task_type: self.task_type.clone(),
            role_name: self.role_name.clone(),
            provider: self.provider.clone(),
            status: self.status.clone(),
            iterations: self.iterations,
            max_iterations: self.max_iterations,
            consecutive_failures: Some(self.consecutive_failures),
            error: self.error.clone(),
            blocked_reason: self.blocked_reason.clone(),
            tokens: TokenBreakdown {
                context_tokens: self.context_tokens,
                total_input: self.total_input,
                total_output: self.total_output,
                total_tokens: self.total_input + self.total_output,
                estimated: None,
                per_iteration: self.per_iteration_tokens.clone(),
                breakdown: self.context_breakdown.clone(),
            },
            cost: self.compute_cost(),
            timing: TimingRecord {
                started_at: self.started_at,
                completed_at: self.completed_at,
                total_duration_ms,
                phases: self.phase_totals_ms.clone(),
                per_iteration: self.per_iteration_ms.clone(),
            },
            files,
            validation: self.validation.clone(),
            scope: if self.scope_violations.is_empty() && self.scope_approvals.is_empty() {
                None
            } else {
                Some(ScopeRecord {
                    violations: self.scope_violations.clone(),
                    approvals: self.scope_approvals.clone(),
                })
            },
            environment: EnvironmentRecord {
                node_version: None,
                os: std::env::consts::OS.to_string(),
                ci: std::env::var("CI").is_ok(),
                ci_provider: std::env::var("GITHUB_ACTIONS").ok().map(|_| "github".to_string()),
                ci_build_id: None,
                ci_branch: None,
                ci_commit: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Modified,
    Created,
    Deleted,
}

/// Look up per-model cost rates from a config table; absent entries mean
/// "no cost record in the report" rather than zero-cost.
pub fn lookup_cost_rates(model: &str, cost_config: &HashMap<String, CostRates>) -> Option<CostRates> {
    cost_config.get(model).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ProviderInfo {
        ProviderInfo {
            provider_type: "cli-subprocess".to_string(),
            model: None,
        }
    }

    #[test]
    fn report_invariants_hold_after_recording() {
        let mut collector = MetricsCollector::new("pending/x.md", provider(), 50);
        collector.record_iteration(1, 1000);
        collector.record_token_usage(1, 100, 50);
        collector.record_file_change("src/a.ts", FileChangeKind::Modified);
        collector.set_status("completed");
        let report = collector.to_report();
        assert!(report.check_invariants());
        assert_eq!(report.tokens.total_tokens, 150);
        assert_eq!(report.files.total_count, 1);
    }

    #[test]
    fn cost_omitted_without_rates() {
        let collector = MetricsCollector::new("pending/x.md", provider(), 50);
        assert!(collector.to_report().cost.is_none());
    }

    #[test]
    fn cost_computed_when_rates_present() {
        let mut collector = MetricsCollector::new("pending/x.md", provider(), 50);
        collector.record_token_usage(1, 1_000_000, 1_000_000);
        let mut rates = CostRates::new();
        rates.insert("input_per_1m".to_string(), 3.0);
        rates.insert("output_per_1m".to_string(), 15.0);
        collector.set_cost_rates(rates);
        let cost = collector.to_report().cost.unwrap();
        assert_eq!(cost.estimated_total, 18.0);
    }

    #[test]
    fn phase_timing_sums_across_multiple_start_end_pairs() {
        let mut collector = MetricsCollector::new("pending/x.md", provider(), 50);
        collector.start_phase("Validating");
        std::thread::sleep(std::time::Duration::from_millis(5));
        collector.end_phase("Validating");
        collector.start_phase("Validating");
        std::thread::sleep(std::time::Duration::from_millis(5));
        collector.end_phase("Validating");
        let report = collector.to_report();
        assert!(report.timing.phases.get("Validating").copied().unwrap_or(0) >= 10);
    }

    #[test]
    fn files_are_deduplicated_on_path() {
        let mut collector = MetricsCollector::new("pending/x.md", provider(), 50);
        collector.record_file_change("a.ts", FileChangeKind::Modified);
        collector.record_file_change("a.ts", FileChangeKind::Modified);
        let report = collector.to_report();
        assert_eq!(report.files.modified.len(), 1);
    }
}
