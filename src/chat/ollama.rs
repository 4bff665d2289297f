//! Ollama chat adapter for locally served models.
//!
//! Ollama has no tool-call identifiers, so tool results cannot be
//! echoed back against a call id. Results are flattened into user
//! messages instead, phrased as `Result of {tool} tool call:` followed
//! by the output, and call ids are synthesized for the orchestrator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::chat::provider::{Message, ModelTurn, Provider, Role, ToolCallRequest, TurnBlock};
use crate::chat::retry::{is_retryable_status, retry_backoff_delay};
use crate::config::ChatConfig;
use crate::error::ProviderError;
use crate::registry::ToolDescriptor;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama provider. No credentials; the HTTP client is built on first
/// use.
pub struct OllamaProvider {
    client: OnceCell<reqwest::Client>,
    max_retries: u32,
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self {
            client: OnceCell::new(),
            max_retries: 2,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    async fn client(&self) -> Result<&reqwest::Client, ProviderError> {
        self.client
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .timeout(std::time::Duration::from_secs(300))
                    .build()
                    .map_err(ProviderError::Http)
            })
            .await
    }

    fn api_url(config: &ChatConfig) -> String {
        let base = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}/api/chat", base.trim_end_matches('/'))
    }
}

/// Translate tool descriptors into Ollama (OpenAI-style) declarations.
fn normalize_tools(tools: &[ToolDescriptor]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|tool| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect()
}

/// Translate the neutral history into Ollama wire messages, flattening
/// tool results into user messages.
fn normalize_messages(config: &ChatConfig, messages: &[Message]) -> Vec<serde_json::Value> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    wire.push(serde_json::json!({"role": "system", "content": config.system}));

    for message in messages {
        match message.role {
            Role::System => {
                wire.push(serde_json::json!({"role": "system", "content": message.content}));
            }
            Role::User => {
                wire.push(serde_json::json!({"role": "user", "content": message.content}));
            }
            Role::Assistant => {
                if !message.content.is_empty() {
                    wire.push(
                        serde_json::json!({"role": "assistant", "content": message.content}),
                    );
                }
            }
            Role::Tool => {
                let tool = message.tool_name.as_deref().unwrap_or("unknown");
                wire.push(serde_json::json!({
                    "role": "user",
                    "content": format!("Result of {} tool call:\n{}", tool, message.content),
                }));
            }
        }
    }

    wire
}

#[derive(Debug, Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    /// Already a JSON object on this wire, unlike OpenAI's string.
    arguments: serde_json::Value,
}

fn into_turn(response: ChatResponse) -> ModelTurn {
    let mut blocks = Vec::new();
    if !response.message.content.is_empty() {
        blocks.push(TurnBlock::Text(response.message.content));
    }
    for (index, call) in response.message.tool_calls.into_iter().enumerate() {
        blocks.push(TurnBlock::ToolCall(ToolCallRequest {
            id: format!("ollama-call-{}", index),
            name: call.function.name,
            arguments: call.function.arguments,
        }));
    }
    ModelTurn { blocks }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn complete(
        &self,
        config: &ChatConfig,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ModelTurn, ProviderError> {
        let url = Self::api_url(config);
        let body = ChatBody {
            model: config.model.clone(),
            messages: normalize_messages(config, messages),
            tools: normalize_tools(tools),
            stream: false,
        };

        for attempt in 0..=self.max_retries {
            tracing::debug!(url = %url, attempt = attempt + 1, "Sending Ollama chat request");

            let response = match self.client().await?.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    if attempt < self.max_retries {
                        let delay = retry_backoff_delay(attempt);
                        tracing::warn!(error = %e, ?delay, "Ollama request error, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(ProviderError::RequestFailed {
                        provider: "ollama".to_string(),
                        reason: e.to_string(),
                    });
                }
            };

            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            if !status.is_success() {
                let code = status.as_u16();
                if is_retryable_status(code) && attempt < self.max_retries {
                    let delay = retry_backoff_delay(attempt);
                    tracing::warn!(status = code, ?delay, "Ollama returned retryable status");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(ProviderError::RequestFailed {
                    provider: "ollama".to_string(),
                    reason: format!("HTTP {}: {}", status, text),
                });
            }

            let parsed: ChatResponse =
                serde_json::from_str(&text).map_err(|e| ProviderError::InvalidResponse {
                    provider: "ollama".to_string(),
                    reason: format!("JSON parse error: {}", e),
                })?;
            return Ok(into_turn(parsed));
        }

        Err(ProviderError::RequestFailed {
            provider: "ollama".to_string(),
            reason: "retry loop exited unexpectedly".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_flattens_tool_results() {
        let config = ChatConfig::new("qwen2.5");
        let wire = normalize_messages(&config, &[Message::tool("eval", "call-1", "4")]);
        assert_eq!(wire[1]["role"], "user");
        assert_eq!(wire[1]["content"], "Result of eval tool call:\n4");
    }

    #[test]
    fn test_normalize_drops_empty_assistant_turns() {
        let config = ChatConfig::new("qwen2.5");
        let assistant = Message::assistant_with_calls(
            "",
            vec![ToolCallRequest {
                id: "x".to_string(),
                name: "eval".to_string(),
                arguments: serde_json::json!({}),
            }],
        );
        let wire = normalize_messages(&config, &[assistant]);
        // Only the system prompt remains.
        assert_eq!(wire.len(), 1);
    }

    #[test]
    fn test_into_turn_synthesizes_call_ids() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "eval", "arguments": {"code": "2+2"}}},
                    {"function": {"name": "fetch", "arguments": {}}}
                ]
            }
        }))
        .unwrap();

        let turn = into_turn(response);
        let calls = turn.tool_calls();
        assert_eq!(calls[0].id, "ollama-call-0");
        assert_eq!(calls[0].arguments, serde_json::json!({"code": "2+2"}));
        assert_eq!(calls[1].id, "ollama-call-1");
    }

    #[tokio::test]
    async fn test_complete_against_mock_server() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "hello"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OllamaProvider::new();
        let config = ChatConfig::new("qwen2.5").with_base_url(server.uri());
        let turn = provider
            .complete(&config, &[Message::user("hi")], &[])
            .await
            .unwrap();
        assert_eq!(turn.text(), "hello");
    }
}
