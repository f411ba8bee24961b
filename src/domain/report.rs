//! `ExecutionReport`: the append-only, write-once record of one executor run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validator::ValidationSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenBreakdown {
    pub context_tokens: Option<u64>,
    pub total_input: u64,
    pub total_output: u64,
    pub total_tokens: u64,
    pub estimated: Option<bool>,
    pub per_iteration: Vec<IterationTokens>,
    pub breakdown: Option<std::collections::HashMap<String, u64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationTokens {
    pub iteration: u32,
    pub input: u64,
    pub output: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub estimated_total: f64,
    pub currency: String,
    pub rates: std::collections::HashMap<String, f64>,
    pub per_iteration: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingRecord {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_duration_ms: u64,
    pub phases: std::collections::HashMap<String, u64>,
    pub per_iteration: Vec<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileChanges {
    pub modified: Vec<String>,
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    pub total_count: usize,
}

impl FileChanges {
    pub fn recompute_total(&mut self) {
        self.total_count = self.modified.len() + self.created.len() + self.deleted.len();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeRecord {
    pub violations: Vec<String>,
    pub approvals: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub node_version: Option<String>,
    pub os: String,
    pub ci: bool,
    pub ci_provider: Option<String>,
    pub ci_build_id: Option<String>,
    pub ci_branch: Option<String>,
    pub ci_commit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub category: String,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub task_path: String,
    pub task_goal: Option<String>,
    pub task_type: Option<String>,
    pub role_name: Option<String>,
    pub provider: ProviderInfo,
    pub status: String,
    pub iterations: u32,
    pub max_iterations: u32,
    pub consecutive_failures: Option<u32>,
    pub error: Option<ErrorRecord>,
    pub blocked_reason: Option<String>,
    pub tokens: TokenBreakdown,
    pub cost: Option<CostRecord>,
    pub timing: TimingRecord,
    pub files: FileChanges,
    pub validation: Option<ValidationSummary>,
    pub scope: Option<ScopeRecord>,
    pub environment: EnvironmentRecord,
}

impl ExecutionReport {
    /// Validate the two cross-field invariants the spec calls out.
    pub fn check_invariants(&self) -> bool {
        let files_ok = self.files.total_count == self.files.modified.len() + self.files.created.len() + self.files.deleted.len();
        let tokens_ok = self.tokens.total_tokens == self.tokens.total_input + self.tokens.total_output;
        files_ok && tokens_ok
    }

    /// First 8 hex characters of `run_id`, used as the report filename stem.
    pub fn short_id(&self) -> String {
        self.run_id.simple().to_string()[..8].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> ExecutionReport {
        ExecutionReport {
            run_id: Uuid::now_v7(),
            timestamp: Utc::now(),
            task_path: "pending/x.md".into(),
            task_goal: None,
            task_type: None,
            role_name: None,
            provider: ProviderInfo {
                provider_type: "cli-subprocess".into(),
                model: None,
            },
            status: "completed".into(),
            iterations: 1,
            max_iterations: 50,
            consecutive_failures: None,
            error: None,
            blocked_reason: None,
            tokens: TokenBreakdown {
                total_input: 100,
                total_output: 50,
                total_tokens: 150,
                ..Default::default()
            },
            cost: None,
            timing: TimingRecord::default(),
            files: FileChanges {
                modified: vec!["a.ts".into()],
                created: vec![],
                deleted: vec![],
                total_count: 1,
            },
            validation: None,
            scope: None,
            environment: EnvironmentRecord {
                node_version: None,
                os: "linux".into(),
                ci: false,
                ci_provider: None,
                ci_build_id: None,
                ci_branch: None,
                ci_commit: None,
            },
        }
    }

    #[test]
    fn invariants_hold_for_consistent_report() {
        assert!(sample_report().check_invariants());
    }

    #[test]
    fn invariants_catch_mismatched_token_total() {
        let mut report = sample_report();
        report.tokens.total_tokens = 999;
        assert!(!report.check_invariants());
    }

    #[test]
    fn invariants_catch_mismatched_file_count() {
        let mut report = sample_report();
        report.files.total_count = 5;
        assert!(!report.check_invariants());
    }

    #[test]
    fn short_id_is_eight_hex_chars() {
        let report = sample_report();
        assert_eq!(report.short_id().len(), 8);
    }
}
