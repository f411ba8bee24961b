//! Provider contract (§4.3): a uniform interface over CLI and HTTP agents.

pub mod api_tool_use;
pub mod cli_subprocess;
pub mod tools;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use api_tool_use::ApiToolUseProvider;
pub use cli_subprocess::CliSubprocessProvider;

use crate::error::EngineError;

/// Opaque conversation handle: only the provider that produced it knows how
/// to interpret it. The executor passes it back unmodified for continuation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<tools::ConversationMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMetrics {
    pub rounds: u32,
    pub tool_calls: u32,
}

/// Mandatory result fields of one `provider.execute` call (§4.3).
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub files_changed: Vec<String>,
    pub iteration_complete: bool,
    pub completion_signal: Option<String>,
    pub error: Option<String>,
    pub error_category: Option<String>,
    pub error_code: Option<String>,
    pub token_usage: Option<TokenUsage>,
    pub conversation_state: Option<ConversationState>,
    pub conversation_metrics: Option<ConversationMetrics>,
}

#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub model: Option<String>,
    pub timeout: Duration,
    pub max_tokens: Option<u32>,
    pub dangerously_skip_permissions: bool,
    pub session_continuation: Option<ConversationState>,
    pub conversation_config: Option<crate::conversation::ConversationConfig>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            model: None,
            timeout: Duration::from_millis(600_000),
            max_tokens: None,
            dangerously_skip_permissions: true,
            session_continuation: None,
            conversation_config: None,
        }
    }
}

/// The closed ordered list of completion markers CLI providers scan for.
/// First substring match wins.
pub const COMPLETION_SIGNALS: &[&str] = &[
    "<TASK_COMPLETE>",
    "<DONE>",
    "## Task Complete",
    "\u{2705} All done",
    "Definition of Done: All criteria met",
];

/// Scan raw CLI output for the first matching completion marker.
pub fn detect_completion_signal(output: &str) -> Option<&'static str> {
    COMPLETION_SIGNALS.iter().find(|marker| output.contains(*marker)).copied()
}

/// A polymorphic execution backend: a CLI subprocess agent or an HTTP
/// tool-calling API.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn is_available(&self) -> bool;
    async fn execute(&self, prompt: &str, options: &ProviderOptions) -> Result<ExecutionResult, EngineError>;
}

/// Categorize an HTTP status code per §4.3's API tool-use error mapping.
pub fn categorize_http_status(status: u16) -> (crate::error::ProviderErrorKind, bool) {
    use crate::error::ProviderErrorKind;
    match status {
        429 => (ProviderErrorKind::RateLimit, true),
        401 | 403 => (ProviderErrorKind::ApiError, false),
        500..=599 => (ProviderErrorKind::ApiError, true),
        _ => (ProviderErrorKind::ApiError, false),
    }
}

pub type CostRates = HashMap<String, f64>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_first_matching_signal() {
        assert_eq!(detect_completion_signal("work done <TASK_COMPLETE> trailing"), Some("<TASK_COMPLETE>"));
        assert_eq!(detect_completion_signal("## Task Complete\nsummary"), Some("## Task Complete"));
    }

    #[test]
    fn no_signal_present_returns_none() {
        assert_eq!(detect_completion_signal("still working"), None);
    }

    #[test]
    fn http_status_categorization() {
        assert_eq!(categorize_http_status(429).1, true);
        assert_eq!(categorize_http_status(401).1, false);
        assert_eq!(categorize_http_status(503).1, true);
        assert_eq!(categorize_http_status(400).1, false);
    }
}
