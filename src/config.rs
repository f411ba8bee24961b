//! Engine configuration types and the fallback-chain loader (§D).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Root configuration, deserialized with kebab-case field renames so
/// `.aidf.yml` reads naturally as YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub execution: ExecutionConfig,
    pub permissions: PermissionsConfig,
    pub security: SecurityConfig,
    pub validation: ValidationConfig,
    pub provider: ProviderSelectionConfig,
    pub conversation: ConversationWindowConfig,
    pub skills: SkillsConfig,
    pub cost: CostConfig,
    pub notifications: NotificationsConfig,
}

impl Config {
    /// Load with the fallback chain: explicit path (fatal on parse error)
    /// → project-local `.aidf.yml` → `dirs::config_dir()/aidf/aidf.yml`
    /// (both logged and skipped on parse error) → built-in defaults.
    pub fn load(explicit_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load_from_file(path).context(format!("failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".aidf.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!("failed to load config from {}: {e}", local_config.display()),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("aidf").join("aidf.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!("failed to load config from {}: {e}", user_config.display()),
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("failed to parse config file")?;
        tracing::info!("loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,
    #[serde(rename = "max-consecutive-failures")]
    pub max_consecutive_failures: u32,
    /// Seconds per iteration; 0 disables the per-iteration timeout.
    #[serde(rename = "timeout-per-iteration")]
    pub timeout_per_iteration: u64,
    #[serde(rename = "session-continuation")]
    pub session_continuation: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_consecutive_failures: 3,
            timeout_per_iteration: 600,
            session_continuation: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeEnforcement {
    Strict,
    Ask,
    Permissive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    #[serde(rename = "scope-enforcement")]
    pub scope_enforcement: ScopeEnforcement,
    #[serde(rename = "auto-commit")]
    pub auto_commit: bool,
    #[serde(rename = "auto-push")]
    pub auto_push: bool,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            scope_enforcement: ScopeEnforcement::Ask,
            auto_commit: false,
            auto_push: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    #[serde(rename = "skip-permissions")]
    pub skip_permissions: bool,
    #[serde(rename = "warn-on-skip")]
    pub warn_on_skip: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            skip_permissions: true,
            warn_on_skip: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    #[serde(rename = "pre-commit")]
    pub pre_commit: Vec<String>,
    #[serde(rename = "pre-push")]
    pub pre_push: Vec<String>,
    #[serde(rename = "pre-pr")]
    pub pre_pr: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSelectionConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub model: Option<String>,
}

impl Default for ProviderSelectionConfig {
    fn default() -> Self {
        Self {
            provider_type: "cli-subprocess".to_string(),
            model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationWindowConfig {
    #[serde(rename = "max-messages")]
    pub max_messages: usize,
    #[serde(rename = "preserve-first-n")]
    pub preserve_first_n: usize,
    #[serde(rename = "preserve-last-n")]
    pub preserve_last_n: usize,
    #[serde(rename = "summarize-on-trim")]
    pub summarize_on_trim: bool,
}

impl Default for ConversationWindowConfig {
    fn default() -> Self {
        Self {
            max_messages: 100,
            preserve_first_n: 1,
            preserve_last_n: 20,
            summarize_on_trim: false,
        }
    }
}

impl From<&ConversationWindowConfig> for crate::conversation::ConversationConfig {
    fn from(c: &ConversationWindowConfig) -> Self {
        Self {
            max_messages: c.max_messages,
            preserve_first_n: c.preserve_first_n,
            preserve_last_n: c.preserve_last_n,
            summarize_on_trim: c.summarize_on_trim,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillsConfig {
    pub enabled: bool,
    pub directories: Vec<PathBuf>,
    #[serde(rename = "block-suspicious")]
    pub block_suspicious: bool,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directories: Vec::new(),
            block_suspicious: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Per-model `{input_per_1m, output_per_1m}` rate tables.
    pub rates: HashMap<String, HashMap<String, f64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub webhook: WebhookSubConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSubConfig {
    pub enabled: bool,
    pub url: String,
    /// Empty means "all events" (Open Question c).
    pub events: Vec<String>,
    pub headers: HashMap<String, String>,
    pub retry: u32,
    /// Milliseconds.
    pub timeout: u64,
    #[serde(rename = "include-iterations")]
    pub include_iterations: bool,
}

impl Default for WebhookSubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            events: Vec::new(),
            headers: HashMap::new(),
            retry: 2,
            timeout: 10_000,
            include_iterations: false,
        }
    }
}
