//! Core data model: the typed records every other module operates on.

pub mod agents;
pub mod plan;
pub mod report;
pub mod role;
pub mod skill;
pub mod state;
pub mod task;

pub use agents::Agents;
pub use plan::{PlanTask, PlanWave};
pub use report::ExecutionReport;
pub use role::Role;
pub use skill::Skill;
pub use state::{ExecutorState, ScopeDecision, Status};
pub use task::{BlockedStatus, ChecklistItem, Scope, Task, TaskType};

/// Immutable bundle produced once by PreFlight and read for the rest of a run.
#[derive(Debug, Clone)]
pub struct LoadedContext {
    pub agents: Agents,
    pub role: Role,
    pub task: Task,
    pub plan: Option<Vec<PlanTask>>,
    pub skills: Option<Vec<Skill>>,
}

impl LoadedContext {
    /// Sum of raw text length across every layer, used for token estimation.
    pub fn raw_text_len(&self) -> usize {
        let mut total = self.agents.raw_text_len() + self.task.goal.len() + self.task.requirements.len();
        if let Some(skills) = &self.skills {
            total += skills.iter().map(|s| s.body.len()).sum::<usize>();
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loaded_context_sums_layers() {
        let ctx = LoadedContext {
            agents: Agents::default(),
            role: Role::default(),
            task: Task {
                file_path: "x.md".into(),
                goal: "abcd".into(),
                task_type: TaskType::Component,
                suggested_roles: vec![],
                scope: Scope::default(),
                requirements: "ef".into(),
                definition_of_done: vec![],
                blocked_status: None,
            },
            plan: None,
            skills: None,
        };
        assert_eq!(ctx.raw_text_len(), 6);
    }
}
