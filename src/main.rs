//! aidf - autonomous task execution engine
//!
//! CLI entry point: wires configuration, provider selection, and the
//! executor/plan-runner/report-writer into the `exec`/`plan`/`report`
//! subcommands.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use aidf::cli::{Cli, Command, ReportCommand};
use aidf::config::Config;
use aidf::domain::{ExecutionReport, ExecutorState, Skill, Status};
use aidf::error::EngineError;
use aidf::executor::{Executor, ExecutorOptions, Observer};
use aidf::plan::{self, PlanRunOptions, TaskOutcome, TaskRunner};
use aidf::provider::{CliSubprocessProvider, CostRates, Provider};
use aidf::report_writer::{Aggregate, ListFilter, ReportWriter};
use aidf::skills::{self, SkillLoaderOptions};
use aidf::vcs::{GitVersionControl, VersionControl};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("aidf").join("logs");
    fs::create_dir_all(&log_dir).context("failed to create log directory")?;

    let level_str = cli_log_level.or(config_log_level);
    let level = if let Some(s) = level_str {
        debug!(level_str = %s, "setup_logging: level_str is Some");
        match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{s}', defaulting to INFO");
                tracing::Level::INFO
            }
        }
    } else {
        tracing::Level::INFO
    };

    let log_file = fs::File::create(log_dir.join("aidf.log")).context("failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

/// Forwards iteration milestones to `info!`/`warn!`, matching the teacher's
/// preference for user-visible progress lines over a silent observer.
struct TracingObserver;

#[async_trait]
impl Observer for TracingObserver {
    async fn on_phase(&self, phase: &str, iteration: u32) {
        info!(iteration, phase, "executor phase");
    }

    async fn on_output(&self, chunk: &str) {
        let preview: String = chunk.chars().take(200).collect();
        debug!(preview = %preview, "executor output");
    }

    async fn on_ask_user(&self, files: &[String], reason: &str) -> bool {
        warn!(?files, reason, "scope approval requested, denying non-interactively");
        false
    }
}

struct ExecutorTaskRunner {
    project_root: PathBuf,
    config: Config,
    provider: Arc<dyn Provider>,
    vcs: Arc<dyn VersionControl>,
    observer: Arc<dyn Observer>,
    discovered_skills: Option<Vec<Skill>>,
    cost_rates: Option<CostRates>,
}

#[async_trait]
impl TaskRunner for ExecutorTaskRunner {
    async fn run_task(&self, task: &aidf::domain::PlanTask) -> Result<TaskOutcome, EngineError> {
        let options = ExecutorOptions {
            project_root: self.project_root.clone(),
            task_path: PathBuf::from(&task.task_path),
            config: self.config.clone(),
            provider: self.provider.clone(),
            vcs: self.vcs.clone(),
            observer: self.observer.clone(),
            resume: false,
            discovered_skills: self.discovered_skills.clone(),
            plan: None,
            secret_detector: None,
            cost_rates: self.cost_rates.clone(),
        };
        let run = Executor::new(options).run().await?;
        Ok(match run.state.status {
            Status::Completed => TaskOutcome::Completed,
            Status::Blocked => TaskOutcome::Blocked,
            _ => TaskOutcome::Failed,
        })
    }
}

fn build_provider(provider_type: &str, project_root: &PathBuf) -> Result<Arc<dyn Provider>> {
    match provider_type {
        "cli-subprocess" => {
            let vcs_box: Box<dyn VersionControl> = Box::new(GitVersionControl::new(project_root.clone()));
            Ok(Arc::new(CliSubprocessProvider::new("claude", project_root.clone(), vcs_box)))
        }
        "api-tool-use" => {
            eyre::bail!("api-tool-use provider requires a concrete LlmClient (Anthropic/OpenAI HTTP client), none is wired into this build")
        }
        other => eyre::bail!("unknown provider type: {other}"),
    }
}

async fn load_skills_for(config: &Config, project_root: &PathBuf) -> Option<Vec<Skill>> {
    if !config.skills.enabled {
        return None;
    }
    let options = SkillLoaderOptions {
        project_root: project_root.clone(),
        home_dir: dirs::home_dir(),
        extra_roots: config.skills.directories.clone(),
        block_suspicious: config.skills.block_suspicious,
    };
    let loaded = skills::load_skills(&options).await;
    if loaded.is_empty() { None } else { Some(loaded) }
}

fn status_exit_code(status: Status) -> i32 {
    match status {
        Status::Completed => 0,
        Status::Blocked => 1,
        _ => 2,
    }
}

fn print_report(report: &ExecutionReport, format: &aidf::cli::OutputFormat) {
    match format {
        aidf::cli::OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
        }
        aidf::cli::OutputFormat::Text => {
            println!(
                "{}  {}  {}  iterations={}  tokens={}",
                report.short_id(),
                report.status,
                report.task_path,
                report.iterations,
                report.tokens.total_tokens
            );
        }
    }
}

fn print_aggregate(agg: &Aggregate, format: &aidf::cli::OutputFormat) {
    match format {
        aidf::cli::OutputFormat::Json => {
            let value = serde_json::json!({
                "total_runs": agg.total_runs,
                "success_rate": agg.success_rate,
                "total_tokens": agg.total_tokens,
                "total_cost": agg.total_cost,
                "average_iterations": agg.average_iterations,
                "average_duration_ms": agg.average_duration_ms,
                "by_status": agg.by_status,
                "most_modified_files": agg.most_modified_files,
            });
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        }
        aidf::cli::OutputFormat::Text => {
            println!("total runs:        {}", agg.total_runs);
            println!("success rate:      {:.1}%", agg.success_rate * 100.0);
            println!("total tokens:      {}", agg.total_tokens);
            println!("total cost:        {:.4}", agg.total_cost);
            println!("avg iterations:    {:.1}", agg.average_iterations);
            println!("avg duration (ms): {:.0}", agg.average_duration_ms);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), None)?;

    let project_root = std::env::current_dir().context("failed to resolve current directory")?;
    let project_root = aidf::context::find_project_root(&project_root).unwrap_or(project_root);

    let exit_code = match cli.command {
        Command::Exec { task_path, resume, dry_run, provider, model } => {
            cmd_exec(&config, &project_root, task_path, resume, dry_run, provider, model).await?
        }
        Command::Plan { plan_path, concurrency, continue_on_error, dry_run } => {
            cmd_plan(&config, &project_root, plan_path, concurrency, continue_on_error, dry_run).await?
        }
        Command::Report { command } => cmd_report(&project_root, command).await?,
    };

    std::process::exit(exit_code);
}

async fn cmd_exec(
    config: &Config,
    project_root: &PathBuf,
    task_path: PathBuf,
    resume: bool,
    dry_run: bool,
    provider_override: Option<String>,
    model_override: Option<String>,
) -> Result<i32> {
    let mut config = config.clone();
    if let Some(model) = model_override {
        config.provider.model = Some(model);
    }
    let provider_type = provider_override.unwrap_or_else(|| config.provider.provider_type.clone());

    if dry_run {
        let discovered_skills = load_skills_for(&config, project_root).await;
        let ctx = aidf::context::load_context(project_root, &task_path, discovered_skills, None)
            .context("failed to load task context")?;
        println!("goal: {}", ctx.task.goal);
        println!("role: {}", ctx.role.name);
        println!("requirements: {} chars", ctx.task.requirements.len());
        return Ok(0);
    }

    let vcs: Arc<dyn VersionControl> = Arc::new(GitVersionControl::new(project_root.clone()));
    let provider = build_provider(&provider_type, project_root)?;
    let discovered_skills = load_skills_for(&config, project_root).await;
    let cost_rates = config.provider.model.as_deref().and_then(|m| aidf::metrics::lookup_cost_rates(m, &config.cost.rates));

    let options = ExecutorOptions {
        project_root: project_root.clone(),
        task_path,
        config,
        provider,
        vcs,
        observer: Arc::new(TracingObserver),
        resume,
        discovered_skills,
        plan: None,
        secret_detector: None,
        cost_rates,
    };

    let run = Executor::new(options).run().await?;
    report_run_outcome(&run.state);
    Ok(status_exit_code(run.state.status))
}

fn report_run_outcome(state: &ExecutorState) {
    match state.status {
        Status::Completed => info!(iterations = state.iteration, "task completed"),
        Status::Blocked => warn!(iterations = state.iteration, "task blocked"),
        other => warn!(?other, iterations = state.iteration, "task ended in non-terminal status"),
    }
}

async fn cmd_plan(
    config: &Config,
    project_root: &PathBuf,
    plan_path: PathBuf,
    concurrency: Option<usize>,
    continue_on_error: bool,
    dry_run: bool,
) -> Result<i32> {
    let vcs: Arc<dyn VersionControl> = Arc::new(GitVersionControl::new(project_root.clone()));
    let provider = build_provider(&config.provider.provider_type, project_root)?;
    let discovered_skills = load_skills_for(config, project_root).await;
    let cost_rates = config.provider.model.as_deref().and_then(|m| aidf::metrics::lookup_cost_rates(m, &config.cost.rates));

    let runner = ExecutorTaskRunner {
        project_root: project_root.clone(),
        config: config.clone(),
        provider,
        vcs,
        observer: Arc::new(TracingObserver),
        discovered_skills,
        cost_rates,
    };

    let options = PlanRunOptions {
        dry_run,
        continue_on_error,
        max_concurrency: concurrency.unwrap_or(3),
    };

    let result = plan::run_plan(project_root, &plan_path, &runner, &options).await?;
    info!(
        completed = result.completed.len(),
        blocked = result.blocked.len(),
        failed = result.failed.len(),
        skipped = result.skipped.len(),
        "plan run finished"
    );

    Ok(if !result.failed.is_empty() {
        2
    } else if !result.blocked.is_empty() {
        1
    } else {
        0
    })
}

async fn cmd_report(project_root: &PathBuf, command: ReportCommand) -> Result<i32> {
    let writer = ReportWriter::new(project_root.join(".ai").join("reports"));
    match command {
        ReportCommand::List { status, task, format } => {
            let filter = ListFilter { status, task, ..Default::default() };
            let reports = writer.list(&filter).await?;
            for report in &reports {
                print_report(report, &format);
            }
        }
        ReportCommand::Read { run_id_prefix, format } => match writer.read(&run_id_prefix).await? {
            Some(report) => print_report(&report, &format),
            None => {
                eprintln!("no report found matching prefix {run_id_prefix}");
                return Ok(2);
            }
        },
        ReportCommand::Aggregate { status, format } => {
            let filter = ListFilter { status, ..Default::default() };
            let reports = writer.list(&filter).await?;
            print_aggregate(&writer.aggregate(&reports), &format);
        }
    }
    Ok(0)
}
