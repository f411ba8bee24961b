//! Skill loader (§4.9): discovers, parses, and security-scans skill files
//! from the three configured roots, then renders them for prompt injection.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::domain::skill::{Skill, SkillWarning, WarningSeverity};

/// Patterns that mark a skill body as dangerous or merely worth a warning.
/// Checked against the body with fenced code blocks blanked out first, so a
/// skill that merely *documents* one of these in a code sample isn't flagged.
///
/// DANGER: prompt-injection phrases, code-execution primitives outside
/// fences, and long base64/hex blobs that could smuggle encoded payloads.
const DANGER_PATTERNS: &[&str] = &[
    r"(?i)ignore\s+(previous|above)\s+instructions",
    r"(?i)disregard\s+\S+(\s+\S+){0,5}\s+instructions",
    r"(?i)you\s+are\s+now\b",
    r"(?i)system:",
    r"(?i)<system>",
    r"\beval\s*\(",
    r"\bexec\s*\(",
    r"\bnew\s+Function\s*\(",
    r"[A-Za-z0-9+/]{40,}={0,2}",
    r"\b[0-9a-fA-F]{32,}\b",
];

/// WARNING: commands and paths that are legitimate but worth a human glance.
const WARNING_PATTERNS: &[&str] = &[
    r"\bsudo\b",
    r"\bchmod\b",
    r"\bchown\b",
    r"https?://",
    r"\.env\b",
    r"/etc/",
    r"~/\.ssh",
    r"--dangerously",
    r"rm\s+-rf",
];

pub struct SkillLoaderOptions {
    pub project_root: PathBuf,
    pub home_dir: Option<PathBuf>,
    pub extra_roots: Vec<PathBuf>,
    /// When true, skills with a DANGER-severity finding are excluded from
    /// the loaded set instead of merely warned about.
    pub block_suspicious: bool,
}

fn discovery_roots(options: &SkillLoaderOptions) -> Vec<PathBuf> {
    let mut roots = vec![options.project_root.join(".ai").join("skills")];
    if let Some(home) = &options.home_dir {
        roots.push(home.join(".aidf").join("skills"));
    }
    roots.extend(options.extra_roots.iter().cloned());
    roots
}

/// Load every skill under the configured roots: each immediate subdirectory
/// contributing a `SKILL.md` becomes one skill, scanned for dangerous
/// patterns before being returned.
pub async fn load_skills(options: &SkillLoaderOptions) -> Vec<Skill> {
    debug!("load_skills: called");
    let mut skills = Vec::new();
    for root in discovery_roots(options) {
        let mut entries = match tokio::fs::read_dir(&root).await {
            Ok(rd) => rd,
            Err(_) => continue,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let skill_file = path.join("SKILL.md");
            if let Some(skill) = load_skill_file(&skill_file).await {
                if options.block_suspicious && skill.has_danger_warning() {
                    warn!(path = %skill_file.display(), "load_skills: skipping skill with danger-severity finding");
                    continue;
                }
                skills.push(skill);
            }
        }
    }
    skills
}

async fn load_skill_file(path: &Path) -> Option<Skill> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    let (frontmatter, body) = split_frontmatter(&text);
    let name = frontmatter.get("name").cloned().unwrap_or_else(|| {
        path.parent()
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str())
            .unwrap_or("unnamed")
            .to_string()
    });
    let description = frontmatter.get("description").cloned().unwrap_or_default();
    let version = frontmatter.get("version").cloned();
    let author = frontmatter.get("author").cloned();
    let tags = frontmatter.get("tags").map(|v| split_csv(v)).unwrap_or_default();
    let globs = frontmatter.get("globs").map(|v| split_csv(v)).unwrap_or_default();
    let warnings = scan_body(&body);
    Some(Skill {
        name,
        description,
        version,
        author,
        tags,
        globs,
        body,
        warnings,
    })
}

fn split_csv(value: &str) -> Vec<String> {
    let trimmed = value.trim().trim_start_matches('[').trim_end_matches(']');
    trimmed.split(',').map(|s| s.trim().trim_matches('"').to_string()).filter(|s| !s.is_empty()).collect()
}

/// Parse a `---\nkey: value\n---` frontmatter block preceding the body.
/// Not a full YAML parser: only flat `key: value` scalars are recognized,
/// matching what skill authors actually write.
fn split_frontmatter(text: &str) -> (std::collections::HashMap<String, String>, String) {
    let mut map = std::collections::HashMap::new();
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    if let Some(rest) = text.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---") {
            let block = &rest[..end];
            for line in block.lines() {
                if let Some((key, value)) = line.split_once(':') {
                    map.insert(key.trim().to_string(), value.trim().trim_matches('"').to_string());
                }
            }
            let body_start = end + 4;
            let body = rest[body_start..].trim_start_matches('\n').to_string();
            return (map, body);
        }
    }
    (map, text.to_string())
}

/// Replace fenced code blocks (``` ... ```) with blank lines before pattern
/// scanning, so documented examples don't trigger false positives while line
/// numbers in the stripped copy still line up with the original body.
fn strip_fenced_code(body: &str) -> String {
    let mut result = String::new();
    let mut in_fence = false;
    for line in body.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        } else if !in_fence {
            result.push_str(line);
        }
        result.push('\n');
    }
    result
}

fn scan_body(body: &str) -> Vec<SkillWarning> {
    let scanned = strip_fenced_code(body);
    let mut warnings = Vec::new();
    for pattern in DANGER_PATTERNS {
        if let Ok(re) = regex::Regex::new(pattern) {
            if let Some(m) = re.find(&scanned) {
                warnings.push(SkillWarning {
                    severity: WarningSeverity::Danger,
                    pattern: (*pattern).to_string(),
                    line: line_of(&scanned, m.start()),
                });
            }
        }
    }
    for pattern in WARNING_PATTERNS {
        if let Ok(re) = regex::Regex::new(pattern) {
            if let Some(m) = re.find(&scanned) {
                warnings.push(SkillWarning {
                    severity: WarningSeverity::Warning,
                    pattern: (*pattern).to_string(),
                    line: line_of(&scanned, m.start()),
                });
            }
        }
    }
    warnings
}

fn line_of(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset].matches('\n').count() + 1
}

/// Render the loaded, usable skill set as an XML-escaped
/// `<available_skills>` block for embedding in the system prompt.
pub fn render_skills_prompt(skills: &[Skill]) -> String {
    let usable: Vec<&Skill> = skills.iter().filter(|s| s.is_usable()).collect();
    if usable.is_empty() {
        return String::new();
    }
    let mut out = String::from("<available_skills>\n");
    for skill in usable {
        out.push_str(&format!(
            "  <skill name=\"{}\">{}</skill>\n",
            xml_escape(&skill.name),
            xml_escape(&skill.description)
        ));
    }
    out.push_str("</available_skills>");
    out
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}
