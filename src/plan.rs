//! Plan parser and runner (§4.6): parses an implementation plan Markdown
//! file into waves of tasks, detects dependency cycles, and runs the
//! resulting DAG with bounded intra-wave parallelism.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::domain::plan::{PlanTask, PlanWave};
use crate::error::{ConfigErrorKind, EngineError};

/// `- [ ] \`<filename>.md\` — <description> (wave: N, depends: a.md, b.md)`
/// The dash separator is one of em dash (U+2014), en dash (U+2013), or a
/// plain hyphen-minus, per §4.6.
fn task_line_pattern() -> Regex {
    Regex::new(
        r"^- \[( |x|X)\] `([^`]+\.md)`\s*[—–-]\s*(.+?)(?:\s*\(wave:\s*(\d+)(?:,\s*depends:\s*([^)]+))?\))?\s*$",
    )
    .expect("static pattern")
}

/// Parse every task checkbox line out of a plan Markdown document.
pub fn parse_plan(text: &str) -> Vec<PlanTask> {
    let pattern = task_line_pattern();
    let mut tasks = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let Some(captures) = pattern.captures(line.trim_end()) else {
            continue;
        };
        let completed = matches!(&captures[1], "x" | "X");
        let filename = captures[2].to_string();
        let description = captures[3].trim().to_string();
        let wave = captures.get(4).and_then(|m| m.as_str().parse::<u32>().ok()).unwrap_or(0);
        let depends_on = captures
            .get(5)
            .map(|m| m.as_str().split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        tasks.push(PlanTask {
            filename,
            task_path: String::new(),
            description,
            wave,
            depends_on,
            completed,
            line_number: idx + 1,
        });
    }
    tasks
}

/// Resolve each task's bare filename to an absolute path, searching
/// `.ai/tasks/{pending,blocked,completed}` and `.ai/tasks` in that order.
pub fn resolve_task_paths(project_root: &Path, tasks: &mut [PlanTask]) {
    let search_dirs = [
        project_root.join(".ai").join("tasks").join("pending"),
        project_root.join(".ai").join("tasks").join("blocked"),
        project_root.join(".ai").join("tasks").join("completed"),
        project_root.join(".ai").join("tasks"),
    ];
    for task in tasks.iter_mut() {
        for dir in &search_dirs {
            let candidate = dir.join(&task.filename);
            if candidate.exists() {
                task.task_path = candidate.to_string_lossy().to_string();
                break;
            }
        }
        if task.task_path.is_empty() {
            task.task_path = search_dirs[0].join(&task.filename).to_string_lossy().to_string();
        }
    }
}

/// Detect a dependency cycle among plan tasks, keyed by filename. Missing
/// dependencies (a `depends:` entry naming a file not in the plan) are
/// ignored rather than treated as an error (Open Question b).
pub fn detect_cycle(tasks: &[PlanTask]) -> Option<Vec<String>> {
    let index: HashMap<&str, usize> = tasks.iter().enumerate().map(|(i, t)| (t.filename.as_str(), i)).collect();
    let mut visited = vec![false; tasks.len()];
    let mut rec_stack = vec![false; tasks.len()];
    let mut path = Vec::new();

    for start in 0..tasks.len() {
        if !visited[start] {
            if let Some(cycle) = dfs_cycle(start, tasks, &index, &mut visited, &mut rec_stack, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs_cycle(
    idx: usize,
    tasks: &[PlanTask],
    index: &HashMap<&str, usize>,
    visited: &mut [bool],
    rec_stack: &mut [bool],
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    visited[idx] = true;
    rec_stack[idx] = true;
    path.push(tasks[idx].filename.clone());

    for dep in &tasks[idx].depends_on {
        let Some(&dep_idx) = index.get(dep.as_str()) else {
            continue;
        };
        if rec_stack[dep_idx] {
            let cycle_start = path.iter().position(|f| f == &tasks[dep_idx].filename).unwrap_or(0);
            return Some(path[cycle_start..].to_vec());
        }
        if !visited[dep_idx] {
            if let Some(cycle) = dfs_cycle(dep_idx, tasks, index, visited, rec_stack, path) {
                return Some(cycle);
            }
        }
    }

    path.pop();
    rec_stack[idx] = false;
    None
}

/// Assign each task to a wave: explicit `wave:` annotations are respected,
/// then a two-pass resolution bumps any task whose dependencies land in a
/// later or equal wave, iterating until fixed point or a bound on passes
/// is hit (a stuck task keeps its prior wave rather than looping forever).
/// The parser defaults an unannotated task to wave 0, which is not a valid
/// wave (§3 invariant: `PlanTask.wave` is always >= 1). Every task still at
/// 0 is normalized up to wave 1 before dependency propagation runs,
/// otherwise a dependent bumped past its zero-wave dependency would land in
/// the dependency's final wave of 1 instead of strictly after it.
pub fn assign_waves(tasks: &mut [PlanTask]) {
    for task in tasks.iter_mut() {
        if task.wave == 0 {
            task.wave = 1;
        }
    }

    let index: HashMap<String, usize> = tasks.iter().enumerate().map(|(i, t)| (t.filename.clone(), i)).collect();
    for _pass in 0..tasks.len() + 1 {
        let mut changed = false;
        for i in 0..tasks.len() {
            let mut required = tasks[i].wave;
            for dep in tasks[i].depends_on.clone() {
                if let Some(&dep_idx) = index.get(&dep) {
                    required = required.max(tasks[dep_idx].wave + 1);
                }
            }
            if required != tasks[i].wave {
                tasks[i].wave = required;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

/// Group tasks into ordered `PlanWave`s by their (already assigned) wave
/// number.
pub fn group_waves(tasks: Vec<PlanTask>) -> Vec<PlanWave> {
    let mut by_wave: HashMap<u32, Vec<PlanTask>> = HashMap::new();
    for task in tasks {
        by_wave.entry(task.wave).or_default().push(task);
    }
    let mut numbers: Vec<u32> = by_wave.keys().copied().collect();
    numbers.sort();
    numbers
        .into_iter()
        .map(|number| PlanWave {
            tasks: by_wave.remove(&number).unwrap_or_default(),
            number,
        })
        .collect()
}

/// Rewrite a task's checkbox (`[ ]` -> `[x]`) in place at its recorded
/// line number, leaving every other line untouched.
pub fn mark_task_complete(text: &str, line_number: usize) -> String {
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    if let Some(line) = lines.get_mut(line_number.saturating_sub(1)) {
        *line = line.replacen("[ ]", "[x]", 1);
    }
    lines.join("\n") + if text.ends_with('\n') { "\n" } else { "" }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Blocked,
    Failed,
}

#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, task: &PlanTask) -> Result<TaskOutcome, EngineError>;
}

#[derive(Debug, Clone)]
pub struct PlanRunOptions {
    pub dry_run: bool,
    pub continue_on_error: bool,
    pub max_concurrency: usize,
}

impl Default for PlanRunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            continue_on_error: false,
            max_concurrency: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanRunResult {
    pub completed: Vec<String>,
    pub blocked: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

/// Parse, order, and run a plan file end to end. Waves run sequentially;
/// tasks within a wave run with up to `max_concurrency` in flight at once.
/// A failure inside a wave stops subsequent waves unless `continue_on_error`
/// is set, in which case the remaining tasks of later waves still run but
/// are marked `skipped` if their dependency chain failed.
pub async fn run_plan(
    project_root: &Path,
    plan_path: &Path,
    runner: &dyn TaskRunner,
    options: &PlanRunOptions,
) -> Result<PlanRunResult, EngineError> {
    debug!(plan = %plan_path.display(), "run_plan: called");
    let text = tokio::fs::read_to_string(plan_path).await.map_err(|e| EngineError::Config {
        kind: ConfigErrorKind::Missing,
        message: format!("reading plan file {}: {e}", plan_path.display()),
    })?;

    let mut tasks = parse_plan(&text);
    resolve_task_paths(project_root, &mut tasks);
    let mut plan_text = text;

    if let Some(cycle) = detect_cycle(&tasks) {
        return Err(EngineError::Config {
            kind: ConfigErrorKind::Invalid,
            message: format!("dependency cycle detected: {}", cycle.join(" -> ")),
        });
    }

    assign_waves(&mut tasks);
    let waves = group_waves(tasks);

    let mut result = PlanRunResult {
        completed: Vec::new(),
        blocked: Vec::new(),
        failed: Vec::new(),
        skipped: Vec::new(),
    };
    let mut failed_deps: HashSet<String> = HashSet::new();

    for wave in waves {
        debug!(wave = wave.number, count = wave.tasks.len(), "run_plan: entering wave");
        if options.dry_run {
            result.completed.extend(wave.tasks.iter().map(|t| t.filename.clone()));
            continue;
        }

        let mut runnable = Vec::new();
        for task in wave.tasks {
            if task.completed {
                result.completed.push(task.filename.clone());
                continue;
            }
            if task.depends_on.iter().any(|d| failed_deps.contains(d)) {
                result.skipped.push(task.filename.clone());
                failed_deps.insert(task.filename.clone());
                continue;
            }
            runnable.push(task);
        }

        let mut outcomes = Vec::with_capacity(runnable.len());
        for chunk in runnable.chunks(options.max_concurrency.max(1)) {
            let futures = chunk.iter().map(|task| runner.run_task(task));
            let chunk_results = futures::future::join_all(futures).await;
            outcomes.extend(chunk.iter().cloned().zip(chunk_results));
        }

        for (task, outcome) in outcomes {
            match outcome {
                Ok(TaskOutcome::Completed) => {
                    result.completed.push(task.filename.clone());
                    plan_text = mark_task_complete(&plan_text, task.line_number);
                    if tokio::fs::write(plan_path, &plan_text).await.is_err() {
                        warn!(task = %task.filename, "run_plan: failed to persist checkbox update");
                    }
                }
                Ok(TaskOutcome::Blocked) => {
                    result.blocked.push(task.filename.clone());
                    failed_deps.insert(task.filename.clone());
                }
                Ok(TaskOutcome::Failed) | Err(_) => {
                    result.failed.push(task.filename.clone());
                    failed_deps.insert(task.filename.clone());
                    if !options.continue_on_error {
                        return Ok(result);
                    }
                }
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> &'static str {
        "# Plan\n\n\
         - [ ] `a.md` — set up scaffolding (wave: 1)\n\
         - [ ] `b.md` — add feature (wave: 2, depends: a.md)\n\
         - [x] `c.md` — already done (wave: 1)\n"
    }

    #[test]
    fn parses_task_lines_with_wave_and_depends() {
        let tasks = parse_plan(sample_plan());
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[1].depends_on, vec!["a.md".to_string()]);
        assert!(tasks[2].completed);
    }

    #[test]
    fn parses_task_line_with_en_dash_separator() {
        let tasks = parse_plan("- [ ] `a.md` \u{2013} set up scaffolding\n");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].description, "set up scaffolding");
    }

    #[test]
    fn detects_no_cycle_in_acyclic_plan() {
        let tasks = parse_plan(sample_plan());
        assert!(detect_cycle(&tasks).is_none());
    }

    #[test]
    fn detects_cycle_in_mutually_dependent_tasks() {
        let mut tasks = parse_plan(sample_plan());
        tasks[0].depends_on.push("b.md".to_string());
        let cycle = detect_cycle(&tasks);
        assert!(cycle.is_some());
    }

    #[test]
    fn missing_dependency_is_ignored_not_an_error() {
        let mut tasks = parse_plan(sample_plan());
        tasks[0].depends_on.push("nonexistent.md".to_string());
        assert!(detect_cycle(&tasks).is_none());
    }

    #[test]
    fn assign_waves_bumps_dependents_past_dependencies() {
        let mut tasks = parse_plan("- [ ] `a.md` — x (wave: 1)\n- [ ] `b.md` — y (wave: 1, depends: a.md)\n");
        assign_waves(&mut tasks);
        assert_eq!(tasks[0].wave, 1);
        assert_eq!(tasks[1].wave, 2);
    }

    #[test]
    fn assign_waves_defaults_unannotated_task_to_one() {
        let mut tasks = parse_plan("- [ ] `a.md` — do the thing\n");
        assert_eq!(tasks[0].wave, 0);
        assign_waves(&mut tasks);
        assert_eq!(tasks[0].wave, 1);
    }

    #[test]
    fn assign_waves_bumps_dependent_past_unannotated_dependency() {
        let mut tasks = parse_plan("- [ ] `a.md` — x\n- [ ] `b.md` — y (depends: a.md)\n");
        assign_waves(&mut tasks);
        assert_eq!(tasks[0].wave, 1);
        assert_eq!(tasks[1].wave, 2);
    }

    #[test]
    fn group_waves_orders_numerically() {
        let mut tasks = parse_plan(sample_plan());
        assign_waves(&mut tasks);
        let waves = group_waves(tasks);
        let numbers: Vec<u32> = waves.iter().map(|w| w.number).collect();
        let mut sorted = numbers.clone();
        sorted.sort();
        assert_eq!(numbers, sorted);
    }

    #[test]
    fn mark_task_complete_rewrites_only_target_line() {
        let text = "- [ ] `a.md` — x\n- [ ] `b.md` — y\n";
        let updated = mark_task_complete(text, 1);
        assert!(updated.lines().next().unwrap().contains("[x]"));
        assert!(updated.lines().nth(1).unwrap().contains("[ ]"));
    }

    struct StubRunner;

    #[async_trait]
    impl TaskRunner for StubRunner {
        async fn run_task(&self, _task: &PlanTask) -> Result<TaskOutcome, EngineError> {
            Ok(TaskOutcome::Completed)
        }
    }

    #[tokio::test]
    async fn run_plan_runs_waves_in_order() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join(".ai").join("tasks").join("pending")).await.unwrap();
        let plan_path = dir.path().join("plan.md");
        tokio::fs::write(&plan_path, sample_plan()).await.unwrap();
        let runner = StubRunner;
        let result = run_plan(dir.path(), &plan_path, &runner, &PlanRunOptions::default()).await.unwrap();
        assert_eq!(result.completed.len(), 3);
        assert!(result.failed.is_empty());

        let updated = tokio::fs::read_to_string(&plan_path).await.unwrap();
        assert!(updated.lines().all(|l| !l.starts_with("- [ ]")));
    }
}
