//! The six provider tools (§6) and their sandboxed execution context.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

/// One message in the API tool-use conversation, as threaded back through
/// `ConversationState`. Content is opaque text to the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
}

/// Sandboxed execution context shared by every tool call within one
/// executor run.
pub struct ToolContext {
    pub project_root: PathBuf,
    pub exec_id: String,
}

impl ToolContext {
    pub fn new(project_root: PathBuf, exec_id: String) -> Self {
        Self { project_root, exec_id }
    }

    /// Resolve `path` under `project_root`, rejecting any escape via `..`
    /// or an absolute path outside the root.
    pub fn validate_path(&self, path: &str) -> Result<PathBuf, String> {
        debug!(path, "ToolContext::validate_path: called");
        let candidate = self.project_root.join(path);
        let canon_root = self
            .project_root
            .canonicalize()
            .unwrap_or_else(|_| self.project_root.clone());

        let parent = candidate.parent().unwrap_or(&candidate);
        let canon_parent = parent
            .canonicalize()
            .unwrap_or_else(|_| parent.to_path_buf());

        if !canon_parent.starts_with(&canon_root) && canon_parent != canon_root {
            return Err(format!("Path traversal blocked: \"{path}\" resolves outside project root"));
        }

        Ok(candidate)
    }
}

#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// A tool the model may invoke in API tool-use mode.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult;
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read the contents of a file within the project root"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string", "description": "File path relative to project root" } },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("Missing required parameter: path");
        };
        let resolved = match ctx.validate_path(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => ToolResult::success(content),
            Err(e) => ToolResult::error(format!("Failed to read {path}: {e}")),
        }
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write content to a file within the project root, creating parent directories as needed"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("Missing required parameter: path");
        };
        let Some(content) = input.get("content").and_then(|v| v.as_str()) else {
            return ToolResult::error("Missing required parameter: content");
        };
        let resolved = match ctx.validate_path(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error(format!("Failed to create parent directories: {e}"));
            }
        }
        match tokio::fs::write(&resolved, content).await {
            Ok(()) => ToolResult::success(format!("Wrote {} bytes to {path}", content.len())),
            Err(e) => ToolResult::error(format!("Failed to write {path}: {e}")),
        }
    }
}

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn description(&self) -> &'static str {
        "List files under a directory, optionally filtered by a glob pattern"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "pattern": { "type": "string" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("Missing required parameter: path");
        };
        let resolved = match ctx.validate_path(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let pattern = input.get("pattern").and_then(|v| v.as_str());

        let mut entries = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&resolved).await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Failed to list {path}: {e}")),
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(pat) = pattern {
                if let Ok(glob) = glob::Pattern::new(pat) {
                    if !glob.matches(&name) {
                        continue;
                    }
                }
            }
            entries.push(name);
        }
        entries.sort();
        ToolResult::success(entries.join("\n"))
    }
}

/// Commands rejected outright regardless of the project's command policy.
const BLOCKED_COMMANDS: &[&str] = &["rm -rf /", "mkfs", "dd if=", ":(){ :|:& };:"];

pub struct RunCommandTool;

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &'static str {
        "run_command"
    }

    fn description(&self) -> &'static str {
        "Run a shell command in the project root, subject to the command policy"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "command": { "type": "string" } },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(command) = input.get("command").and_then(|v| v.as_str()) else {
            return ToolResult::error("Missing required parameter: command");
        };
        if BLOCKED_COMMANDS.iter().any(|b| command.contains(b)) {
            return ToolResult::error(format!("Command blocked by policy: {command}"));
        }
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.project_root)
            .output()
            .await;
        match output {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout);
                let stderr = String::from_utf8_lossy(&out.stderr);
                let combined = format!("{stdout}{stderr}");
                if out.status.success() {
                    ToolResult::success(combined)
                } else {
                    ToolResult::error(combined)
                }
            }
            Err(e) => ToolResult::error(format!("Failed to run command: {e}")),
        }
    }
}

pub struct TaskCompleteTool;

#[async_trait]
impl Tool for TaskCompleteTool {
    fn name(&self) -> &'static str {
        "task_complete"
    }

    fn description(&self) -> &'static str {
        "Signal that the current task is complete"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "summary": { "type": "string" } },
            "required": ["summary"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(summary) = input.get("summary").and_then(|v| v.as_str()) else {
            return ToolResult::error("Missing required parameter: summary");
        };
        tracing::info!(exec_id = %ctx.exec_id, summary, "task_complete signaled");
        ToolResult::success(format!("Task completed: {summary}"))
    }
}

pub struct TaskBlockedTool;

#[async_trait]
impl Tool for TaskBlockedTool {
    fn name(&self) -> &'static str {
        "task_blocked"
    }

    fn description(&self) -> &'static str {
        "Signal that the current task cannot proceed"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": { "type": "string" },
                "attempted": { "type": "string" },
                "suggestion": { "type": "string" }
            },
            "required": ["reason"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(reason) = input.get("reason").and_then(|v| v.as_str()) else {
            return ToolResult::error("Missing required parameter: reason");
        };
        tracing::info!(exec_id = %ctx.exec_id, reason, "task_blocked signaled");
        ToolResult::success(format!("Task blocked: {reason}"))
    }
}

/// The fixed, closed set of six tools exposed in API tool-use mode.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn standard() -> Self {
        debug!("ToolRegistry::standard: called");
        let mut tools: HashMap<&'static str, Box<dyn Tool>> = HashMap::new();
        for tool in standard_tools() {
            tools.insert(tool.name(), tool);
        }
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|b| b.as_ref())
    }

    pub fn definitions(&self) -> Vec<(&'static str, &'static str, Value)> {
        self.tools.values().map(|t| (t.name(), t.description(), t.input_schema())).collect()
    }

    pub async fn execute(&self, name: &str, input: Value, ctx: &ToolContext) -> ToolResult {
        match self.get(name) {
            Some(tool) => tool.execute(input, ctx).await,
            None => ToolResult::error(format!("Unknown tool: {name}")),
        }
    }
}

fn standard_tools() -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(ReadFileTool),
        Box::new(WriteFileTool),
        Box::new(ListFilesTool),
        Box::new(RunCommandTool),
        Box::new(TaskCompleteTool),
        Box::new(TaskBlockedTool),
    ]
}
