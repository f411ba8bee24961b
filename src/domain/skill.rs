//! Skill record: a discovered, frontmatter-described prompt fragment.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningSeverity {
    Danger,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillWarning {
    pub severity: WarningSeverity,
    pub pattern: String,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub version: Option<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub globs: Vec<String>,
    pub body: String,
    pub warnings: Vec<SkillWarning>,
}

impl Skill {
    /// A skill is only usable with non-empty name, description, and body.
    pub fn is_usable(&self) -> bool {
        !self.name.is_empty() && !self.description.is_empty() && !self.body.is_empty()
    }

    pub fn has_danger_warning(&self) -> bool {
        self.warnings.iter().any(|w| w.severity == WarningSeverity::Danger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(name: &str, desc: &str, body: &str) -> Skill {
        Skill {
            name: name.into(),
            description: desc.into(),
            version: None,
            author: None,
            tags: vec![],
            globs: vec![],
            body: body.into(),
            warnings: vec![],
        }
    }

    #[test]
    fn usable_requires_all_three_fields() {
        assert!(skill("a", "b", "c").is_usable());
        assert!(!skill("", "b", "c").is_usable());
        assert!(!skill("a", "", "c").is_usable());
        assert!(!skill("a", "b", "").is_usable());
    }

    #[test]
    fn has_danger_warning_detects_danger_severity() {
        let mut s = skill("a", "b", "c");
        s.warnings.push(SkillWarning {
            severity: WarningSeverity::Warning,
            pattern: "sudo".into(),
            line: 1,
        });
        assert!(!s.has_danger_warning());
        s.warnings.push(SkillWarning {
            severity: WarningSeverity::Danger,
            pattern: "ignore previous instructions".into(),
            line: 2,
        });
        assert!(s.has_danger_warning());
    }
}
