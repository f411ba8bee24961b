//! Scope guard (§4.2): classifies file changes against a task's scope.

use std::collections::HashSet;

use glob::Pattern;
use tracing::debug;

use crate::domain::{Scope, ScopeDecision};

/// Enforcement strictness for files outside `allowed` / inside `ask_before`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    Strict,
    Ask,
    Permissive,
}

/// Per-file verdict before aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileVerdict {
    Allow,
    AskUser,
    Block,
}

fn strip_leading_dot_slash(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

/// Path-matching algorithm (§4.2): direct glob match, then `<pattern>/**`
/// fallback for wildcard-less or `**`-terminated patterns, then a directory
/// prefix check.
fn matches_pattern(file: &str, pattern: &str) -> bool {
    let file = strip_leading_dot_slash(file);
    let pattern = strip_leading_dot_slash(pattern);

    if let Ok(glob) = Pattern::new(pattern) {
        let opts = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        if glob.matches_with(file, opts) {
            return true;
        }
    }

    let has_wildcard = pattern.contains('*') || pattern.contains('?') || pattern.contains('[');
    if !has_wildcard || pattern.ends_with("**") {
        let base = pattern.trim_end_matches("/**").trim_end_matches("**").trim_end_matches('/');
        if let Ok(glob) = Pattern::new(&format!("{base}/**")) {
            let opts = glob::MatchOptions {
                case_sensitive: true,
                require_literal_separator: false,
                require_literal_leading_dot: false,
            };
            if glob.matches_with(file, opts) {
                return true;
            }
        }
    }

    if !pattern.contains('.') || !has_wildcard {
        let base_dir = pattern.trim_end_matches('/');
        if file == base_dir || file.starts_with(&format!("{base_dir}/")) {
            return true;
        }
    }

    false
}

fn matches_any(file: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| matches_pattern(file, p))
}

/// Per-file decision (§4.2 step list).
pub fn check_file_change(file: &str, scope: &Scope, mode: ScopeMode) -> FileVerdict {
    debug!(file, ?mode, "check_file_change: called");
    if matches_any(file, &scope.forbidden) {
        debug!(file, "check_file_change: forbidden match, BLOCK");
        return FileVerdict::Block;
    }

    if matches_any(file, &scope.ask_before) {
        return match mode {
            ScopeMode::Permissive => FileVerdict::Allow,
            _ => FileVerdict::AskUser,
        };
    }

    if !scope.allowed.is_empty() && !matches_any(file, &scope.allowed) {
        return match mode {
            ScopeMode::Strict => FileVerdict::Block,
            ScopeMode::Ask => FileVerdict::AskUser,
            ScopeMode::Permissive => FileVerdict::Allow,
        };
    }

    FileVerdict::Allow
}

/// Batch decision (§4.2): BLOCKs take precedence over ASK_USERs; offenders
/// are deduplicated on path, preserving input order.
pub fn check_file_changes(changes: &[String], scope: &Scope, mode: ScopeMode) -> ScopeDecision {
    debug!(count = changes.len(), ?mode, "check_file_changes: called");
    let mut blocked = Vec::new();
    let mut ask = Vec::new();
    let mut seen = HashSet::new();

    for file in changes {
        if !seen.insert(file.clone()) {
            continue;
        }
        match check_file_change(file, scope, mode) {
            FileVerdict::Block => blocked.push(file.clone()),
            FileVerdict::AskUser => ask.push(file.clone()),
            FileVerdict::Allow => {}
        }
    }

    if !blocked.is_empty() {
        ScopeDecision::Block {
            files: blocked,
            reason: "in forbidden scope".to_string(),
        }
    } else if !ask.is_empty() {
        ScopeDecision::AskUser {
            files: ask,
            reason: "requires approval before proceeding".to_string(),
        }
    } else {
        ScopeDecision::Allow
    }
}

/// Tracks user-approved paths across an executor run's scope checks.
#[derive(Debug, Default)]
pub struct ScopeGuard {
    approved: HashSet<String>,
}

impl ScopeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approve(&mut self, file: impl Into<String>) {
        let file = file.into();
        debug!(file, "ScopeGuard::approve: called");
        self.approved.insert(file);
    }

    pub fn is_approved(&self, file: &str) -> bool {
        self.approved.contains(file)
    }

    /// Files currently BLOCK and not approved — the revert candidate set.
    pub fn get_changes_to_revert(&self, changes: &[String], scope: &Scope, mode: ScopeMode) -> Vec<String> {
        debug!("ScopeGuard::get_changes_to_revert: called");
        changes
            .iter()
            .filter(|f| !self.approved.contains(*f))
            .filter(|f| check_file_change(f, scope, mode) == FileVerdict::Block)
            .cloned()
            .collect()
    }

    /// Human-readable Markdown listing action/reason/scope config, injected
    /// into the next iteration's prompt as remediation feedback.
    pub fn generate_violation_report(&self, decision: &ScopeDecision, scope: &Scope) -> String {
        debug!("ScopeGuard::generate_violation_report: called");
        match decision {
            ScopeDecision::Block { files, reason } => {
                let mut out = String::from("## Scope Violation\n\n");
                out.push_str(&format!("**Action:** BLOCK\n**Reason:** {reason}\n\n**Files:**\n"));
                for f in files {
                    out.push_str(&format!("- `{f}`\n"));
                }
                out.push_str("\n**Allowed:**\n");
                for p in &scope.allowed {
                    out.push_str(&format!("- `{p}`\n"));
                }
                out.push_str("\n**Forbidden:**\n");
                for p in &scope.forbidden {
                    out.push_str(&format!("- `{p}`\n"));
                }
                out
            }
            ScopeDecision::AskUser { files, reason } => {
                let mut out = String::from("## Scope Approval Required\n\n");
                out.push_str(&format!("**Reason:** {reason}\n\n**Files:**\n"));
                for f in files {
                    out.push_str(&format!("- `{f}`\n"));
                }
                out
            }
            ScopeDecision::Allow => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        Scope {
            allowed: vec!["src/**".to_string()],
            forbidden: vec!["node_modules/**".to_string()],
            ask_before: vec!["config/**".to_string()],
        }
    }

    #[test]
    fn forbidden_always_blocks_even_permissive() {
        let s = scope();
        assert_eq!(check_file_change("node_modules/x.js", &s, ScopeMode::Permissive), FileVerdict::Block);
    }

    #[test]
    fn ask_before_permissive_allows() {
        let s = scope();
        assert_eq!(check_file_change("config/a.yml", &s, ScopeMode::Permissive), FileVerdict::Allow);
    }

    #[test]
    fn ask_before_strict_asks() {
        let s = scope();
        assert_eq!(check_file_change("config/a.yml", &s, ScopeMode::Strict), FileVerdict::AskUser);
    }

    #[test]
    fn outside_allowed_strict_blocks() {
        let s = scope();
        assert_eq!(check_file_change("docs/readme.md", &s, ScopeMode::Strict), FileVerdict::Block);
    }

    #[test]
    fn outside_allowed_ask_asks() {
        let s = scope();
        assert_eq!(check_file_change("docs/readme.md", &s, ScopeMode::Ask), FileVerdict::AskUser);
    }

    #[test]
    fn outside_allowed_permissive_allows() {
        let s = scope();
        assert_eq!(check_file_change("docs/readme.md", &s, ScopeMode::Permissive), FileVerdict::Allow);
    }

    #[test]
    fn inside_allowed_always_allows() {
        let s = scope();
        assert_eq!(check_file_change("src/a.ts", &s, ScopeMode::Strict), FileVerdict::Allow);
    }

    #[test]
    fn empty_allowed_defaults_to_allow() {
        let s = Scope::default();
        assert_eq!(check_file_change("anything.txt", &s, ScopeMode::Strict), FileVerdict::Allow);
    }

    #[test]
    fn batch_blocks_take_precedence_over_ask() {
        let s = scope();
        let decision = check_file_changes(
            &["config/a.yml".to_string(), "node_modules/x.js".to_string()],
            &s,
            ScopeMode::Strict,
        );
        assert!(decision.is_block());
    }

    #[test]
    fn batch_dedupes_offenders_preserving_order() {
        let s = scope();
        let decision = check_file_changes(
            &["node_modules/a.js".to_string(), "node_modules/a.js".to_string(), "node_modules/b.js".to_string()],
            &s,
            ScopeMode::Strict,
        );
        match decision {
            ScopeDecision::Block { files, .. } => assert_eq!(files, vec!["node_modules/a.js", "node_modules/b.js"]),
            _ => panic!("expected block"),
        }
    }

    #[test]
    fn scope_guard_revert_excludes_approved() {
        let mut guard = ScopeGuard::new();
        let s = scope();
        guard.approve("node_modules/a.js");
        let to_revert = guard.get_changes_to_revert(
            &["node_modules/a.js".to_string(), "node_modules/b.js".to_string()],
            &s,
            ScopeMode::Strict,
        );
        assert_eq!(to_revert, vec!["node_modules/b.js"]);
    }

    #[test]
    fn directory_pattern_matches_prefix() {
        let s = Scope {
            allowed: vec!["src".to_string()],
            ..Default::default()
        };
        assert_eq!(check_file_change("src/nested/a.ts", &s, ScopeMode::Strict), FileVerdict::Allow);
    }
}
