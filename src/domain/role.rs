//! Role record: identity, expertise, and constraints for a suggested role.

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub identity: String,
    pub expertise: Vec<String>,
    pub responsibilities: Vec<String>,
    pub constraints: Vec<String>,
    pub quality_criteria: Vec<String>,
    pub output_format: Option<String>,
}

impl Role {
    pub fn is_empty(&self) -> bool {
        debug!(name = %self.name, "Role::is_empty: called");
        self.identity.is_empty() && self.expertise.is_empty() && self.responsibilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_role_is_empty() {
        let role = Role::default();
        assert!(role.is_empty());
    }

    #[test]
    fn role_with_expertise_not_empty() {
        let role = Role {
            name: "developer".into(),
            expertise: vec!["rust".into()],
            ..Default::default()
        };
        assert!(!role.is_empty());
    }
}
