//! Context loader: Markdown → typed records (§4.1).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::{Agents, BlockedStatus, ChecklistItem, LoadedContext, PlanTask, Role, Scope, Skill, Task, TaskType};
use crate::error::{ConfigErrorKind, EngineError};

type Result<T> = std::result::Result<T, EngineError>;

fn config_missing(message: impl Into<String>) -> EngineError {
    EngineError::Config {
        kind: ConfigErrorKind::Missing,
        message: message.into(),
    }
}

/// Normalize line endings to LF, matching the parser's tolerant-input contract.
fn normalize(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

/// Walk parents of `start_dir` until `<dir>/.ai/AGENTS.md` exists. Fails by
/// returning `None`, never an exception.
pub fn find_project_root(start_dir: &Path) -> Option<PathBuf> {
    debug!(?start_dir, "find_project_root: called");
    let mut dir = Some(start_dir.to_path_buf());
    while let Some(d) = dir {
        if d.join(".ai").join("AGENTS.md").is_file() {
            debug!(?d, "find_project_root: found");
            return Some(d);
        }
        dir = d.parent().map(Path::to_path_buf);
    }
    debug!("find_project_root: not found");
    None
}

/// Extract all `## <name>` sections (case-insensitive heading match) up to
/// the next `## ` boundary.
fn extract_sections(content: &str) -> HashMap<String, String> {
    let mut sections = HashMap::new();
    let lines: Vec<&str> = content.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim_start();
        if let Some(rest) = line.strip_prefix("## ") {
            let name = rest.trim().trim_end_matches(':').to_lowercase();
            let mut body = String::new();
            i += 1;
            while i < lines.len() && !lines[i].trim_start().starts_with("## ") {
                body.push_str(lines[i]);
                body.push('\n');
                i += 1;
            }
            sections.insert(name, body.trim().to_string());
        } else {
            i += 1;
        }
    }
    sections
}

/// Extract `### <name>` subsections within a single section's body.
fn extract_subsections(body: &str) -> HashMap<String, String> {
    let mut subsections = HashMap::new();
    let lines: Vec<&str> = body.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim_start();
        if let Some(rest) = line.strip_prefix("### ") {
            let name = rest.trim().trim_end_matches(':').to_lowercase();
            let mut sub_body = String::new();
            i += 1;
            while i < lines.len() && !lines[i].trim_start().starts_with("### ") {
                sub_body.push_str(lines[i]);
                sub_body.push('\n');
                i += 1;
            }
            subsections.insert(name, sub_body.trim().to_string());
        } else {
            i += 1;
        }
    }
    subsections
}

/// Parse a bulleted list, stripping `- `/`* ` markers and surrounding backticks.
fn parse_bullet_list(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let stripped = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* "))?;
            Some(stripped.trim().trim_matches('`').to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse Definition-of-Done checklist lines: `- [ ]`/`- [x]` at indentation 0.
fn parse_checklist(body: &str) -> Vec<ChecklistItem> {
    body.lines()
        .filter_map(|line| {
            if line.starts_with("- [ ]") {
                Some(ChecklistItem {
                    text: line[5..].trim().to_string(),
                    checked: false,
                })
            } else if line.starts_with("- [x]") || line.starts_with("- [X]") {
                Some(ChecklistItem {
                    text: line[5..].trim().to_string(),
                    checked: true,
                })
            } else {
                None
            }
        })
        .collect()
}

/// Parse `## Status: BLOCKED` block. Triggered only when the line contains
/// the literal substring `BLOCKED`.
pub fn parse_blocked_status(content: &str) -> Option<BlockedStatus> {
    debug!("parse_blocked_status: called");
    let is_blocked = content
        .lines()
        .any(|l| l.trim_start().to_lowercase().starts_with("## status:") && l.to_uppercase().contains("BLOCKED"));
    if !is_blocked {
        debug!("parse_blocked_status: no BLOCKED status line found");
        return None;
    }

    let sections = extract_sections(content);
    let exec_log = sections.get("execution log").cloned().unwrap_or_default();

    let started_at = extract_field(&exec_log, "**Started:**").unwrap_or_default();
    let blocked_at = extract_field(&exec_log, "**Blocked at:**").unwrap_or_default();
    let previous_iteration = extract_field(&exec_log, "**Iterations:**")
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(0);

    let blocking_issue = sections.get("blocking issue").cloned().unwrap_or_default();
    let blocking_issue = strip_fence(&blocking_issue);

    let files_section = sections.get("files modified").cloned().unwrap_or_default();
    let files_modified = if files_section.trim() == "_None_" {
        Vec::new()
    } else {
        parse_bullet_list(&files_section)
    };

    Some(BlockedStatus {
        previous_iteration,
        files_modified,
        blocking_issue,
        started_at,
        blocked_at,
    })
}

fn extract_field(body: &str, marker: &str) -> Option<String> {
    body.lines().find_map(|l| {
        let trimmed = l.trim_start();
        trimmed.strip_prefix(marker).map(|rest| rest.trim().to_string())
    })
}

fn strip_fence(body: &str) -> String {
    let trimmed = body.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.trim_start_matches(|c: char| c.is_alphanumeric());
        let rest = rest.trim_start_matches('\n');
        rest.trim_end().trim_end_matches("```").trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse a task Markdown file into a `Task`. Fails with `ConfigMissing` when
/// the file does not exist.
pub fn parse_task(task_path: &Path) -> Result<Task> {
    debug!(?task_path, "parse_task: called");
    if !task_path.is_file() {
        return Err(config_missing(format!("Task file not found: {}", task_path.display())));
    }
    let raw = std::fs::read_to_string(task_path)
        .map_err(|e| config_missing(format!("Failed to read task file {}: {e}", task_path.display())))?;
    let content = normalize(&raw);
    let sections = extract_sections(&content);

    let goal = sections.get("goal").cloned().unwrap_or_default();
    let task_type = sections
        .get("task type")
        .map(|s| TaskType::parse_lenient(s))
        .unwrap_or_default();
    let suggested_roles = sections
        .get("suggested roles")
        .map(|s| parse_bullet_list(s))
        .unwrap_or_default();
    let requirements = sections.get("requirements").cloned().unwrap_or_default();
    let definition_of_done = sections.get("definition of done").map(|s| parse_checklist(s)).unwrap_or_default();

    let scope_body = sections.get("scope").cloned().unwrap_or_default();
    let scope_subsections = extract_subsections(&scope_body);
    let scope = Scope {
        allowed: scope_subsections.get("allowed").map(|s| parse_bullet_list(s)).unwrap_or_default(),
        forbidden: scope_subsections.get("forbidden").map(|s| parse_bullet_list(s)).unwrap_or_default(),
        ask_before: scope_subsections.get("ask before").map(|s| parse_bullet_list(s)).unwrap_or_default(),
    };

    let blocked_status = parse_blocked_status(&content);

    Ok(Task {
        file_path: task_path.to_string_lossy().to_string(),
        goal,
        task_type,
        suggested_roles,
        scope,
        requirements,
        definition_of_done,
        blocked_status,
    })
}

/// Parse `.ai/roles/<name>.md`. Fails with `ConfigMissing` if absent.
pub fn parse_role(project_root: &Path, name: &str) -> Result<Role> {
    debug!(?project_root, name, "parse_role: called");
    let path = project_root.join(".ai").join("roles").join(format!("{name}.md"));
    if !path.is_file() {
        return Err(config_missing(format!("Role file not found: {}", path.display())));
    }
    let raw = std::fs::read_to_string(&path).map_err(|e| config_missing(format!("Failed to read role file: {e}")))?;
    let content = normalize(&raw);
    let sections = extract_sections(&content);

    Ok(Role {
        name: name.to_string(),
        identity: sections.get("identity").cloned().unwrap_or_default(),
        expertise: sections.get("expertise").map(|s| parse_bullet_list(s)).unwrap_or_default(),
        responsibilities: sections.get("responsibilities").map(|s| parse_bullet_list(s)).unwrap_or_default(),
        constraints: sections.get("constraints").map(|s| parse_bullet_list(s)).unwrap_or_default(),
        quality_criteria: sections.get("quality criteria").map(|s| parse_bullet_list(s)).unwrap_or_default(),
        output_format: sections.get("output format").cloned(),
    })
}

/// Parse a fenced command block: each line matches `<cmd>  #<desc>` with a
/// two-space separator.
fn parse_command_block(body: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut in_fence = false;
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence || trimmed.is_empty() {
            continue;
        }
        if let Some(idx) = trimmed.find("  #") {
            let (cmd, desc) = trimmed.split_at(idx);
            out.insert(cmd.trim().to_string(), desc.trim_start_matches("  #").trim().to_string());
        } else {
            out.insert(trimmed.to_string(), String::new());
        }
    }
    out
}

/// Parse `.ai/AGENTS.md`. Fails with `ConfigMissing` if absent.
pub fn parse_agents(project_root: &Path) -> Result<Agents> {
    debug!(?project_root, "parse_agents: called");
    let path = project_root.join(".ai").join("AGENTS.md");
    if !path.is_file() {
        return Err(config_missing(format!("AGENTS.md not found: {}", path.display())));
    }
    let raw = std::fs::read_to_string(&path).map_err(|e| config_missing(format!("Failed to read AGENTS.md: {e}")))?;
    let content = normalize(&raw);
    let sections = extract_sections(&content);

    let boundaries_body = sections.get("boundaries").cloned().unwrap_or_default();
    let boundaries_sub = extract_subsections(&boundaries_body);
    let boundaries = crate::domain::agents::Boundaries {
        never_modify: boundaries_sub.get("never modify").map(|s| parse_bullet_list(s)).unwrap_or_default(),
        never_do: boundaries_sub.get("never do").map(|s| parse_bullet_list(s)).unwrap_or_default(),
        requires_discussion: boundaries_sub
            .get("requires discussion")
            .map(|s| parse_bullet_list(s))
            .unwrap_or_default(),
    };

    let commands_body = sections.get("commands").cloned().unwrap_or_default();
    let commands_sub = extract_subsections(&commands_body);
    let commands = crate::domain::agents::Commands {
        development: crate::domain::agents::CommandGroup {
            commands: commands_sub.get("development").map(|s| parse_command_block(s)).unwrap_or_default(),
        },
        quality: crate::domain::agents::CommandGroup {
            commands: commands_sub.get("quality").map(|s| parse_command_block(s)).unwrap_or_default(),
        },
        build: crate::domain::agents::CommandGroup {
            commands: commands_sub.get("build").map(|s| parse_command_block(s)).unwrap_or_default(),
        },
    };

    Ok(Agents {
        project_overview: sections.get("project overview").cloned().unwrap_or_default(),
        architecture: sections.get("architecture").cloned().unwrap_or_default(),
        technology_stack: sections.get("technology stack").cloned().unwrap_or_default(),
        conventions: sections.get("conventions").cloned().unwrap_or_default(),
        quality_standards: sections.get("quality standards").cloned().unwrap_or_default(),
        boundaries,
        commands,
    })
}

/// Deterministic token estimate: `ceil(|text| / 4)`.
pub fn estimate_tokens(text: &str) -> u64 {
    ((text.len() as u64) + 3) / 4
}

/// Sum raw texts of every loaded layer; returns the total plus a per-layer
/// breakdown.
pub fn estimate_context_size(ctx: &LoadedContext) -> (u64, HashMap<String, u64>) {
    debug!("estimate_context_size: called");
    let mut breakdown = HashMap::new();
    let agents_tokens = estimate_tokens(&ctx.agents.project_overview)
        + estimate_tokens(&ctx.agents.architecture)
        + estimate_tokens(&ctx.agents.technology_stack)
        + estimate_tokens(&ctx.agents.conventions)
        + estimate_tokens(&ctx.agents.quality_standards);
    breakdown.insert("agents".to_string(), agents_tokens);

    let role_tokens = estimate_tokens(&ctx.role.identity);
    breakdown.insert("role".to_string(), role_tokens);

    let task_tokens = estimate_tokens(&ctx.task.goal) + estimate_tokens(&ctx.task.requirements);
    breakdown.insert("task".to_string(), task_tokens);

    let mut total = agents_tokens + role_tokens + task_tokens;

    if let Some(plan) = &ctx.plan {
        let plan_tokens: u64 = plan.iter().map(|t| estimate_tokens(&t.description)).sum();
        breakdown.insert("plan".to_string(), plan_tokens);
        total += plan_tokens;
    }

    if let Some(skills) = &ctx.skills {
        let skill_tokens: u64 = skills.iter().map(|s| estimate_tokens(&s.body)).sum();
        breakdown.insert("skills".to_string(), skill_tokens);
        total += skill_tokens;
    }

    (total, breakdown)
}

/// Compose the context loader's outputs into a `LoadedContext`.
pub fn load_context(
    project_root: &Path,
    task_path: &Path,
    discovered_skills: Option<Vec<Skill>>,
    plan: Option<Vec<PlanTask>>,
) -> Result<LoadedContext> {
    debug!(?project_root, ?task_path, "load_context: called");
    let agents = parse_agents(project_root)?;
    let task = parse_task(task_path)?;
    let role_name = task.suggested_roles.first().cloned().unwrap_or_else(|| "developer".to_string());
    let role = parse_role(project_root, &role_name)?;

    let skills = discovered_skills.and_then(|skills| {
        let suffix = format!("-{role_name}");
        let filtered: Vec<Skill> = skills.into_iter().filter(|s| s.name.ends_with(&suffix)).collect();
        if filtered.is_empty() {
            debug!("load_context: no skills matched role suffix");
            None
        } else {
            Some(filtered)
        }
    });

    Ok(LoadedContext {
        agents,
        role,
        task,
        plan,
        skills,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn find_project_root_walks_parents() {
        let dir = tempdir().unwrap();
        write(&dir.path().join(".ai/AGENTS.md"), "# Agents");
        let nested = dir.path().join("src/deep/nested");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_project_root(&nested), Some(dir.path().to_path_buf()));
    }

    #[test]
    fn find_project_root_returns_none_when_absent() {
        let dir = tempdir().unwrap();
        assert_eq!(find_project_root(dir.path()), None);
    }

    #[test]
    fn parse_task_missing_file_is_config_missing() {
        let dir = tempdir().unwrap();
        let err = parse_task(&dir.path().join("nope.md")).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn parse_task_unknown_type_defaults_to_component() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("task.md");
        write(
            &path,
            "## Goal\nDo the thing\n\n## Task Type\nwibble\n\n## Scope\n### Allowed\n- `src/**`\n### Forbidden\n- `node_modules/**`\n",
        );
        let task = parse_task(&path).unwrap();
        assert_eq!(task.task_type, TaskType::Component);
        assert_eq!(task.scope.allowed, vec!["src/**"]);
        assert_eq!(task.scope.forbidden, vec!["node_modules/**"]);
    }

    #[test]
    fn parse_blocked_status_requires_blocked_marker() {
        let content = "## Goal\nfix it\n";
        assert!(parse_blocked_status(content).is_none());
    }

    #[test]
    fn parse_blocked_status_extracts_fields() {
        let content = "## Status: BLOCKED\n\n### Execution Log\n**Started:** 2026-01-01\n**Iterations:** 5\n**Blocked at:** 2026-01-02\n\n### Blocking Issue\n```\nMissing API key\n```\n\n### Files Modified\n- `src/api/client.ts`\n- `src/config/settings.ts`\n";
        let status = parse_blocked_status(content).unwrap();
        assert_eq!(status.previous_iteration, 5);
        assert_eq!(status.blocking_issue, "Missing API key");
        assert_eq!(status.files_modified, vec!["src/api/client.ts", "src/config/settings.ts"]);
    }

    #[test]
    fn parse_blocked_status_none_marker_yields_empty_files() {
        let content = "## Status: BLOCKED\n\n### Execution Log\n**Started:** x\n**Iterations:** 1\n**Blocked at:** y\n\n### Blocking Issue\n```\nfoo\n```\n\n### Files Modified\n_None_\n";
        let status = parse_blocked_status(content).unwrap();
        assert!(status.files_modified.is_empty());
    }

    #[test]
    fn estimate_tokens_is_ceil_div_four() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("ab"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn parse_role_missing_is_config_missing() {
        let dir = tempdir().unwrap();
        let err = parse_role(dir.path(), "developer").unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn parse_agents_extracts_boundaries_and_commands() {
        let dir = tempdir().unwrap();
        write(
            &dir.path().join(".ai/AGENTS.md"),
            "## Project Overview\nA thing.\n\n## Boundaries\n### Never Modify\n- `migrations/**`\n### Never Do\n- Delete prod data\n### Requires Discussion\n- Schema changes\n\n## Commands\n### Development\n```\nnpm run dev  #starts dev server\n```\n",
        );
        let agents = parse_agents(dir.path()).unwrap();
        assert_eq!(agents.project_overview, "A thing.");
        assert_eq!(agents.boundaries.never_modify, vec!["migrations/**"]);
        assert_eq!(
            agents.commands.development.commands.get("npm run dev").cloned(),
            Some("starts dev server".to_string())
        );
    }
}
