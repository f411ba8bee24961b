//! Plan record: parsed task lines from an implementation plan Markdown file.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTask {
    pub filename: String,
    pub task_path: String,
    pub description: String,
    pub wave: u32,
    pub depends_on: Vec<String>,
    pub completed: bool,
    pub line_number: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanWave {
    pub number: u32,
    pub tasks: Vec<PlanTask>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_task_carries_one_based_line_number() {
        let task = PlanTask {
            filename: "a.md".into(),
            task_path: ".ai/tasks/pending/a.md".into(),
            description: "do thing".into(),
            wave: 1,
            depends_on: vec![],
            completed: false,
            line_number: 3,
        };
        assert_eq!(task.line_number, 3);
    }
}
