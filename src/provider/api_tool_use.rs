//! `api-tool-use` provider variant: drives an HTTP LLM API (Anthropic,
//! OpenAI) through the fixed six-tool contract until completion.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{EngineError, PermissionErrorKind, ProviderErrorKind};

use super::tools::{ConversationMessage, ToolContext, ToolRegistry};
use super::{ConversationMetrics, ConversationState, ExecutionResult, Provider, ProviderOptions, TokenUsage, categorize_http_status};

/// Minimal wire-format request for a single completion round.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub messages: Vec<ConversationMessage>,
    pub max_tokens: u32,
    pub tools: Vec<ToolDefinitionWire>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinitionWire {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallWire>,
    pub stop_reason: String,
    pub usage: UsageWire,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallWire {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageWire {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Abstraction over the wire client so the round-trip loop below is provider
/// agnostic (Anthropic vs OpenAI differ only in request/response shape,
/// handled by the concrete `LlmClient` implementation, not here).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, EngineError>;
}

pub struct ApiToolUseProvider {
    pub client: Arc<dyn LlmClient>,
    pub project_root: PathBuf,
    pub exec_id: String,
    pub tools: ToolRegistry,
    pub max_rounds: u32,
}

impl ApiToolUseProvider {
    pub fn new(client: Arc<dyn LlmClient>, project_root: PathBuf, exec_id: String) -> Self {
        Self {
            client,
            project_root,
            exec_id,
            tools: ToolRegistry::standard(),
            max_rounds: 50,
        }
    }

    fn tool_definitions(&self) -> Vec<ToolDefinitionWire> {
        self.tools
            .definitions()
            .into_iter()
            .map(|(name, description, schema)| ToolDefinitionWire {
                name: name.to_string(),
                description: description.to_string(),
                input_schema: schema,
            })
            .collect()
    }
}

#[async_trait]
impl Provider for ApiToolUseProvider {
    fn name(&self) -> &str {
        "api-tool-use"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn execute(&self, prompt: &str, options: &ProviderOptions) -> Result<ExecutionResult, EngineError> {
        debug!(exec_id = %self.exec_id, "ApiToolUseProvider::execute: called");
        let ctx = ToolContext::new(self.project_root.clone(), self.exec_id.clone());

        let mut messages = options
            .session_continuation
            .as_ref()
            .map(|s| s.messages.clone())
            .unwrap_or_default();
        messages.push(ConversationMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let mut files_changed = Vec::new();
        let mut total_input = 0u64;
        let mut total_output = 0u64;
        let mut rounds = 0u32;
        let mut tool_call_count = 0u32;
        let mut accumulated_output = String::new();
        let mut completion_signal = None;
        let mut success = true;
        let mut blocked_output = None;

        loop {
            if rounds >= self.max_rounds {
                break;
            }
            rounds += 1;

            let request = CompletionRequest {
                system_prompt: String::new(),
                messages: messages.clone(),
                max_tokens: options.max_tokens.unwrap_or(4096),
                tools: self.tool_definitions(),
            };

            let response = self.client.complete(request).await?;
            total_input += response.usage.input_tokens;
            total_output += response.usage.output_tokens;

            if let Some(text) = &response.content {
                accumulated_output.push_str(text);
                accumulated_output.push('\n');
            }

            if response.tool_calls.is_empty() {
                break;
            }

            for call in &response.tool_calls {
                tool_call_count += 1;
                if call.name == "write_file" {
                    if let Some(path) = call.input.get("path").and_then(|v| v.as_str()) {
                        files_changed.push(path.to_string());
                    }
                }
                let result = self.tools.execute(&call.name, call.input.clone(), &ctx).await;
                messages.push(ConversationMessage {
                    role: "assistant".to_string(),
                    content: format!("[tool_use:{}] {}", call.name, call.input),
                });
                messages.push(ConversationMessage {
                    role: "tool".to_string(),
                    content: result.content.clone(),
                });

                if call.name == "task_complete" {
                    completion_signal = Some("task_complete".to_string());
                }
                if call.name == "task_blocked" {
                    let reason = call.input.get("reason").and_then(|v| v.as_str()).unwrap_or("blocked").to_string();
                    success = false;
                    blocked_output = Some(format!("BLOCKED: {reason}"));
                }
            }

            if completion_signal.is_some() || blocked_output.is_some() {
                break;
            }

            if let Some(config) = &options.conversation_config {
                let trimmed = crate::conversation::trim(
                    messages
                        .iter()
                        .map(|m| crate::conversation::WindowMessage {
                            role: m.role.clone(),
                            content: m.content.clone(),
                        })
                        .collect(),
                    config,
                    None,
                );
                messages = trimmed.into_iter().map(|m| ConversationMessage { role: m.role, content: m.content }).collect();
            }
        }

        let output = blocked_output.unwrap_or(accumulated_output);
        let signal = completion_signal;

        Ok(ExecutionResult {
            success,
            output,
            files_changed,
            iteration_complete: signal.is_some(),
            completion_signal: signal,
            error: None,
            error_category: None,
            error_code: None,
            token_usage: Some(TokenUsage {
                input_tokens: total_input,
                output_tokens: total_output,
                estimated: Some(false),
            }),
            conversation_state: Some(ConversationState { messages }),
            conversation_metrics: Some(ConversationMetrics {
                rounds,
                tool_calls: tool_call_count,
            }),
        })
    }
}

/// Map an HTTP status + body into an `EngineError::Provider`, per §4.3.
pub fn http_error(status: u16, body: impl Into<String>) -> EngineError {
    let (kind, retryable) = categorize_http_status(status);
    if status == 401 || status == 403 {
        return EngineError::Permission {
            kind: PermissionErrorKind::ApiAuth,
        };
    }
    EngineError::Provider {
        kind,
        message: body.into(),
        retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubClient {
        responses: std::sync::Mutex<Vec<CompletionResponse>>,
    }

    #[async_trait]
    impl LlmClient for StubClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, EngineError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(CompletionResponse {
                    content: Some("idle".to_string()),
                    tool_calls: vec![],
                    stop_reason: "end_turn".to_string(),
                    usage: UsageWire::default(),
                });
            }
            Ok(responses.remove(0))
        }
    }

    #[tokio::test]
    async fn stops_when_model_returns_no_tool_calls() {
        let client = Arc::new(StubClient {
            responses: std::sync::Mutex::new(vec![]),
        });
        let dir = tempfile::tempdir().unwrap();
        let provider = ApiToolUseProvider::new(client, dir.path().to_path_buf(), "t".to_string());
        let result = provider.execute("do the thing", &ProviderOptions::default()).await.unwrap();
        assert!(result.success);
        assert!(!result.iteration_complete);
    }

    #[tokio::test]
    async fn task_complete_tool_call_sets_completion_signal() {
        let client = Arc::new(StubClient {
            responses: std::sync::Mutex::new(vec![CompletionResponse {
                content: None,
                tool_calls: vec![ToolCallWire {
                    id: "1".into(),
                    name: "task_complete".into(),
                    input: json!({"summary": "done"}),
                }],
                stop_reason: "tool_use".into(),
                usage: UsageWire { input_tokens: 10, output_tokens: 5 },
            }]),
        });
        let dir = tempfile::tempdir().unwrap();
        let provider = ApiToolUseProvider::new(client, dir.path().to_path_buf(), "t".to_string());
        let result = provider.execute("do the thing", &ProviderOptions::default()).await.unwrap();
        assert!(result.iteration_complete);
        assert_eq!(result.completion_signal, Some("task_complete".to_string()));
    }

    #[tokio::test]
    async fn task_blocked_tool_call_yields_unsuccessful_result() {
        let client = Arc::new(StubClient {
            responses: std::sync::Mutex::new(vec![CompletionResponse {
                content: None,
                tool_calls: vec![ToolCallWire {
                    id: "1".into(),
                    name: "task_blocked".into(),
                    input: json!({"reason": "Missing API key"}),
                }],
                stop_reason: "tool_use".into(),
                usage: UsageWire::default(),
            }]),
        });
        let dir = tempfile::tempdir().unwrap();
        let provider = ApiToolUseProvider::new(client, dir.path().to_path_buf(), "t".to_string());
        let result = provider.execute("do the thing", &ProviderOptions::default()).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("BLOCKED"));
    }

    #[test]
    fn http_error_5xx_is_retryable() {
        let err = http_error(503, "upstream unavailable");
        assert!(err.retryable());
        assert_eq!(err.category(), "provider");
    }

    #[test]
    fn http_error_4xx_is_not_retryable() {
        let err = http_error(422, "unprocessable entity");
        assert!(!err.retryable());
        assert_eq!(err.category(), "provider");
    }

    #[test]
    fn http_error_401_is_permission_not_provider() {
        let err = http_error(401, "nope");
        assert_eq!(err.category(), "permission");
        assert!(!err.retryable());
    }
}
