//! Report writer (§4.8): persists `ExecutionReport`s to a dated directory
//! tree, answers list/read/aggregate queries, and delivers webhooks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use rand::Rng;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::report::ExecutionReport;

pub struct ReportWriter {
    pub base_dir: PathBuf,
    http: Client,
}

impl ReportWriter {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            http: Client::new(),
        }
    }

    fn dated_dir(&self, timestamp: &DateTime<Utc>) -> PathBuf {
        self.base_dir.join(timestamp.format("%Y-%m-%d").to_string())
    }

    fn report_path(&self, report: &ExecutionReport) -> PathBuf {
        self.dated_dir(&report.timestamp).join(format!("run-{}.json", report.short_id()))
    }

    /// Write a pretty-printed report with a trailing newline to
    /// `<baseDir>/YYYY-MM-DD/run-<first-8-hex>.json`.
    pub async fn write(&self, report: &ExecutionReport) -> Result<PathBuf> {
        debug!(run_id = %report.run_id, "ReportWriter::write: called");
        let dir = self.dated_dir(&report.timestamp);
        tokio::fs::create_dir_all(&dir).await.context("creating report directory")?;
        let path = self.report_path(report);
        let mut body = serde_json::to_string_pretty(report).context("serializing execution report")?;
        body.push('\n');
        tokio::fs::write(&path, body).await.context("writing execution report")?;
        Ok(path)
    }

    /// Read back every report under `base_dir`, most recent directories
    /// first; individual file parse failures are skipped, not fatal.
    async fn read_all(&self) -> Result<Vec<ExecutionReport>> {
        let mut reports = Vec::new();
        let mut day_dirs = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(rd) => rd,
            Err(_) => return Ok(reports),
        };
        let mut entries = Vec::new();
        while let Some(entry) = day_dirs.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                entries.push(entry.path());
            }
        }
        for day_dir in entries {
            let mut files = tokio::fs::read_dir(&day_dir).await?;
            while let Some(entry) = files.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Ok(text) = tokio::fs::read_to_string(&path).await {
                    if let Ok(report) = serde_json::from_str::<ExecutionReport>(&text) {
                        reports.push(report);
                    }
                }
            }
        }
        Ok(reports)
    }

    /// List reports filtered by the given criteria, newest first.
    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<ExecutionReport>> {
        let mut reports = self.read_all().await?;
        reports.retain(|r| {
            filter.since.map(|since| r.timestamp >= since).unwrap_or(true)
                && filter.until.map(|until| r.timestamp <= until).unwrap_or(true)
                && filter.status.as_ref().map(|s| &r.status == s).unwrap_or(true)
                && filter.task.as_ref().map(|t| &r.task_path == t).unwrap_or(true)
        });
        reports.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(reports)
    }

    /// Resolve a run by ID prefix (minimum 4 hex characters).
    pub async fn read(&self, run_id_prefix: &str) -> Result<Option<ExecutionReport>> {
        if run_id_prefix.len() < 4 {
            eyre::bail!("run id prefix must be at least 4 characters");
        }
        let reports = self.read_all().await?;
        Ok(reports.into_iter().find(|r| r.run_id.simple().to_string().starts_with(run_id_prefix)))
    }

    /// Aggregate statistics across a set of reports (usually pre-filtered
    /// via `list`).
    pub fn aggregate(&self, reports: &[ExecutionReport]) -> Aggregate {
        let total_runs = reports.len();
        let successes = reports.iter().filter(|r| r.status == "completed").count();
        let total_input: u64 = reports.iter().map(|r| r.tokens.total_input).sum();
        let total_output: u64 = reports.iter().map(|r| r.tokens.total_output).sum();
        let total_cost: f64 = reports.iter().filter_map(|r| r.cost.as_ref()).map(|c| c.estimated_total).sum();
        let total_iterations: u64 = reports.iter().map(|r| r.iterations as u64).sum();
        let total_duration_ms: u64 = reports.iter().map(|r| r.timing.total_duration_ms).sum();

        let mut by_status: HashMap<String, u64> = HashMap::new();
        for r in reports {
            *by_status.entry(r.status.clone()).or_insert(0) += 1;
        }

        let mut file_counts: HashMap<String, u64> = HashMap::new();
        for r in reports {
            for f in r.files.modified.iter().chain(r.files.created.iter()).chain(r.files.deleted.iter()) {
                *file_counts.entry(f.clone()).or_insert(0) += 1;
            }
        }
        let mut most_modified: Vec<(String, u64)> = file_counts.into_iter().collect();
        most_modified.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_modified.truncate(10);

        Aggregate {
            total_runs,
            success_rate: if total_runs == 0 { 0.0 } else { successes as f64 / total_runs as f64 },
            total_tokens: total_input + total_output,
            total_cost,
            average_iterations: if total_runs == 0 { 0.0 } else { total_iterations as f64 / total_runs as f64 },
            average_duration_ms: if total_runs == 0 { 0.0 } else { total_duration_ms as f64 / total_runs as f64 },
            by_status,
            most_modified_files: most_modified,
        }
    }

    /// Deliver a webhook notification for `event`, retrying transient
    /// failures with exponential backoff plus jitter. Failures are logged
    /// and never propagate to the caller.
    pub async fn deliver_webhook(&self, config: &WebhookConfig, event: &str, report: &ExecutionReport) {
        if !config.events.is_empty() && !config.events.iter().any(|e| e == event) {
            return;
        }
        debug!(url = %config.url, event, "ReportWriter::deliver_webhook: called");

        let slimmed;
        let report = if config.include_iterations {
            report
        } else {
            let mut r = report.clone();
            r.tokens.per_iteration.clear();
            r.timing.per_iteration.clear();
            slimmed = r;
            &slimmed
        };
        let payload = WebhookPayload { event, report };
        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(10_000));

        for attempt in 0..=config.max_retries {
            let mut request = self.http.post(&config.url).json(&payload).timeout(timeout);
            for (key, value) in &config.headers {
                request = request.header(key, expand_env(value));
            }
            request = request.header("X-AIDF-Event", event);
            request = request.header("X-AIDF-Run-ID", report.run_id.to_string());

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return;
                }
                Ok(response) => {
                    warn!(status = %response.status(), attempt, "webhook delivery returned non-success status");
                }
                Err(e) => {
                    warn!(error = %e, attempt, "webhook delivery failed");
                }
            }

            if attempt < config.max_retries {
                let base_delay = (100u64 * 2u64.pow(attempt)).min(10_000);
                let jitter = rand::rng().random_range(0..=(base_delay / 10).max(1));
                tokio::time::sleep(Duration::from_millis(base_delay + jitter)).await;
            }
        }
        warn!(url = %config.url, event, "webhook delivery exhausted retries");
    }
}

fn expand_env(value: &str) -> String {
    let mut result = String::new();
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            result.push_str(&std::env::var(&name).unwrap_or_default());
        } else {
            result.push(c);
        }
    }
    result
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub task: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub total_runs: usize,
    pub success_rate: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub average_iterations: f64,
    pub average_duration_ms: f64,
    pub by_status: HashMap<String, u64>,
    pub most_modified_files: Vec<(String, u64)>,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    /// Empty means "deliver for every event" (Open Question c).
    pub events: Vec<String>,
    pub headers: HashMap<String, String>,
    pub max_retries: u32,
    pub timeout_ms: Option<u64>,
    pub include_iterations: bool,
}

impl From<&crate::config::WebhookSubConfig> for WebhookConfig {
    fn from(c: &crate::config::WebhookSubConfig) -> Self {
        Self {
            url: c.url.clone(),
            events: c.events.clone(),
            headers: c.headers.clone(),
            max_retries: c.retry,
            timeout_ms: Some(c.timeout),
            include_iterations: c.include_iterations,
        }
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    event: &'a str,
    report: &'a ExecutionReport,
}
