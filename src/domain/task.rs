//! Task record: the parsed shape of a task Markdown file.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Classification of a task's nature. Unknown values on disk fall back to
/// `Component` rather than failing parse — this tolerance is deliberate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Component,
    Refactor,
    Test,
    Docs,
    Architecture,
    Bugfix,
}

impl Default for TaskType {
    fn default() -> Self {
        Self::Component
    }
}

impl TaskType {
    /// Parse a free-text `Task Type` value, defaulting unknown values to
    /// `Component` instead of failing.
    pub fn parse_lenient(raw: &str) -> Self {
        debug!(raw, "TaskType::parse_lenient: called");
        match raw.trim().to_lowercase().as_str() {
            "component" => Self::Component,
            "refactor" => Self::Refactor,
            "test" => Self::Test,
            "docs" => Self::Docs,
            "architecture" => Self::Architecture,
            "bugfix" => Self::Bugfix,
            other => {
                debug!(other, "TaskType::parse_lenient: unknown value, defaulting to component");
                Self::Component
            }
        }
    }
}

/// The triple of glob sequences that classify which files a task may touch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scope {
    pub allowed: Vec<String>,
    pub forbidden: Vec<String>,
    pub ask_before: Vec<String>,
}

/// State recorded in a task file's `## Status: BLOCKED` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockedStatus {
    pub previous_iteration: u32,
    pub files_modified: Vec<String>,
    pub blocking_issue: String,
    pub started_at: String,
    pub blocked_at: String,
}

/// A unit of work loaded from a task Markdown file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub file_path: String,
    pub goal: String,
    pub task_type: TaskType,
    pub suggested_roles: Vec<String>,
    pub scope: Scope,
    pub requirements: String,
    pub definition_of_done: Vec<ChecklistItem>,
    pub blocked_status: Option<BlockedStatus>,
}

/// A single Definition-of-Done checklist line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecklistItem {
    pub text: String,
    pub checked: bool,
}

impl Task {
    pub fn is_blocked(&self) -> bool {
        debug!(file_path = %self.file_path, "Task::is_blocked: called");
        self.blocked_status.is_some()
    }

    /// Default role when `suggested_roles` is empty.
    pub fn primary_role(&self) -> &str {
        debug!(file_path = %self.file_path, "Task::primary_role: called");
        self.suggested_roles.first().map(String::as_str).unwrap_or("developer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_task_type_defaults_to_component() {
        assert_eq!(TaskType::parse_lenient("spelunking"), TaskType::Component);
    }

    #[test]
    fn known_task_types_roundtrip() {
        assert_eq!(TaskType::parse_lenient("Refactor"), TaskType::Refactor);
        assert_eq!(TaskType::parse_lenient("  bugfix  "), TaskType::Bugfix);
    }

    #[test]
    fn primary_role_defaults_to_developer() {
        let task = Task {
            file_path: "x.md".into(),
            goal: "g".into(),
            task_type: TaskType::Component,
            suggested_roles: vec![],
            scope: Scope::default(),
            requirements: String::new(),
            definition_of_done: vec![],
            blocked_status: None,
        };
        assert_eq!(task.primary_role(), "developer");
    }

    #[test]
    fn is_blocked_reflects_blocked_status() {
        let mut task = Task {
            file_path: "x.md".into(),
            goal: "g".into(),
            task_type: TaskType::Component,
            suggested_roles: vec![],
            scope: Scope::default(),
            requirements: String::new(),
            definition_of_done: vec![],
            blocked_status: None,
        };
        assert!(!task.is_blocked());
        task.blocked_status = Some(BlockedStatus::default());
        assert!(task.is_blocked());
    }
}
