//! Executor state machine: `ExecutorState` and `ScopeDecision`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::validator::ValidationResult;

/// Lifecycle status of one executor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Running,
    Paused,
    Completed,
    Blocked,
    Failed,
}

impl Status {
    /// Terminal states are absorbing: no transition is permitted out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Blocked | Self::Failed)
    }
}

/// Mutable state threaded through a single executor run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorState {
    pub status: Status,
    pub iteration: u32,
    pub files_modified: Vec<String>,
    pub validation_results: Vec<ValidationResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub context_tokens: Option<u64>,
    pub context_breakdown: Option<std::collections::HashMap<String, u64>>,
}

impl Default for ExecutorState {
    fn default() -> Self {
        Self {
            status: Status::Idle,
            iteration: 0,
            files_modified: Vec::new(),
            validation_results: Vec::new(),
            started_at: None,
            completed_at: None,
            last_error: None,
            context_tokens: None,
            context_breakdown: None,
        }
    }
}

impl ExecutorState {
    /// Attempt a status transition. Returns `false` (no-op) if the current
    /// status is terminal — terminal states are absorbing per the state
    /// machine's invariant.
    pub fn transition(&mut self, next: Status) -> bool {
        debug!(?self.status, ?next, "ExecutorState::transition: called");
        if self.status.is_terminal() {
            debug!(?self.status, "ExecutorState::transition: current status is terminal, refusing");
            return false;
        }
        self.status = next;
        true
    }

    /// Merge newly-reported files into `files_modified`, preserving
    /// insertion order and deduplicating on path.
    pub fn merge_files_modified(&mut self, files: impl IntoIterator<Item = String>) {
        debug!("ExecutorState::merge_files_modified: called");
        for f in files {
            if !self.files_modified.contains(&f) {
                self.files_modified.push(f);
            }
        }
    }
}

/// Outcome of a scope check over a batch of file changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScopeDecision {
    Allow,
    AskUser { files: Vec<String>, reason: String },
    Block { files: Vec<String>, reason: String },
}

impl ScopeDecision {
    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block { .. })
    }

    pub fn is_ask_user(&self) -> bool {
        matches!(self, Self::AskUser { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_absorbing() {
        let mut state = ExecutorState {
            status: Status::Completed,
            ..Default::default()
        };
        assert!(!state.transition(Status::Running));
        assert_eq!(state.status, Status::Completed);
    }

    #[test]
    fn non_terminal_transition_succeeds() {
        let mut state = ExecutorState::default();
        assert!(state.transition(Status::Running));
        assert_eq!(state.status, Status::Running);
    }

    #[test]
    fn merge_files_modified_dedupes_and_preserves_order() {
        let mut state = ExecutorState::default();
        state.merge_files_modified(vec!["a.ts".to_string(), "b.ts".to_string()]);
        state.merge_files_modified(vec!["a.ts".to_string(), "c.ts".to_string()]);
        assert_eq!(state.files_modified, vec!["a.ts", "b.ts", "c.ts"]);
    }

    #[test]
    fn scope_decision_predicates() {
        assert!(ScopeDecision::Block { files: vec![], reason: String::new() }.is_block());
        assert!(ScopeDecision::AskUser { files: vec![], reason: String::new() }.is_ask_user());
        assert!(!ScopeDecision::Allow.is_block());
    }
}
