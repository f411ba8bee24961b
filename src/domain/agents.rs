//! Agents record: project-wide context shared across all tasks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Boundaries {
    pub never_modify: Vec<String>,
    pub never_do: Vec<String>,
    pub requires_discussion: Vec<String>,
}

/// A single labeled shell command block, e.g. under `### Development`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandGroup {
    /// command -> trailing `#description` (possibly empty)
    pub commands: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Commands {
    pub development: CommandGroup,
    pub quality: CommandGroup,
    pub build: CommandGroup,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Agents {
    pub project_overview: String,
    pub architecture: String,
    pub technology_stack: String,
    pub conventions: String,
    pub quality_standards: String,
    pub boundaries: Boundaries,
    pub commands: Commands,
}

impl Agents {
    pub fn raw_text_len(&self) -> usize {
        debug!("Agents::raw_text_len: called");
        self.project_overview.len()
            + self.architecture.len()
            + self.technology_stack.len()
            + self.conventions.len()
            + self.quality_standards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_text_len_sums_sections() {
        let agents = Agents {
            project_overview: "abc".into(),
            architecture: "de".into(),
            ..Default::default()
        };
        assert_eq!(agents.raw_text_len(), 5);
    }
}
