//! Anthropic messages API adapter.
//!
//! Assistant turns are block lists, so text and tool_use interleaving
//! survives normalization as-is. Tool results travel as `tool_result`
//! blocks in a user message; consecutive results are merged into one
//! message as the API requires.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::chat::provider::{Message, ModelTurn, Provider, Role, ToolCallRequest, TurnBlock};
use crate::chat::retry::{is_retryable_status, retry_backoff_delay};
use crate::config::ChatConfig;
use crate::error::ProviderError;
use crate::registry::ToolDescriptor;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const API_VERSION: &str = "2023-06-01";

/// Anthropic messages provider. HTTP client is built on first use.
pub struct AnthropicProvider {
    api_key: SecretString,
    client: OnceCell<reqwest::Client>,
    max_retries: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
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
                    .timeout(std::time::Duration::from_secs(120))
                    .build()
                    .map_err(ProviderError::Http)
            })
            .await
    }

    fn api_url(config: &ChatConfig) -> String {
        let base = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}/v1/messages", base.trim_end_matches('/'))
    }
}

/// Translate tool descriptors into Anthropic tool declarations.
fn normalize_tools(tools: &[ToolDescriptor]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|tool| {
            serde_json::json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema,
            })
        })
        .collect()
}

/// Translate the neutral history into Anthropic wire messages.
///
/// System content is a top-level request field, not a message, so
/// system entries are skipped here.
fn normalize_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    let mut wire: Vec<serde_json::Value> = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            Role::System => {}
            Role::User => {
                wire.push(serde_json::json!({"role": "user", "content": message.content}));
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(serde_json::json!({"type": "text", "text": message.content}));
                }
                for call in &message.tool_calls {
                    blocks.push(serde_json::json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                wire.push(serde_json::json!({"role": "assistant", "content": blocks}));
            }
            Role::Tool => {
                let block = serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content,
                });
                // Results for sibling calls share one user message.
                let mut merged = false;
                if let Some(last) = wire.last_mut() {
                    if last["role"] == "user" {
                        if let Some(content) = last["content"].as_array_mut() {
                            content.push(block.clone());
                            merged = true;
                        }
                    }
                }
                if !merged {
                    wire.push(serde_json::json!({"role": "user", "content": [block]}));
                }
            }
        }
    }

    wire
}

#[derive(Debug, Serialize)]
struct MessagesBody {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<WireBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

fn into_turn(response: MessagesResponse) -> ModelTurn {
    let mut blocks = Vec::with_capacity(response.content.len());
    for block in response.content {
        match block {
            WireBlock::Text { text } => blocks.push(TurnBlock::Text(text)),
            WireBlock::ToolUse { id, name, input } => {
                blocks.push(TurnBlock::ToolCall(ToolCallRequest {
                    id,
                    name,
                    arguments: input,
                }));
            }
            WireBlock::Other => {}
        }
    }
    ModelTurn { blocks }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(
        &self,
        config: &ChatConfig,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ModelTurn, ProviderError> {
        let url = Self::api_url(config);
        let body = MessagesBody {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system: config.system.clone(),
            messages: normalize_messages(messages),
            tools: normalize_tools(tools),
        };

        for attempt in 0..=self.max_retries {
            tracing::debug!(url = %url, attempt = attempt + 1, "Sending Anthropic completion request");

            let response = self
                .client()
                .await?
                .post(&url)
                .header("x-api-key", self.api_key.expose_secret())
                .header("anthropic-version", API_VERSION)
                .json(&body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    if attempt < self.max_retries {
                        let delay = retry_backoff_delay(attempt);
                        tracing::warn!(error = %e, ?delay, "Anthropic request error, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(ProviderError::RequestFailed {
                        provider: "anthropic".to_string(),
                        reason: e.to_string(),
                    });
                }
            };

            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            if !status.is_success() {
                let code = status.as_u16();
                if code == 401 {
                    return Err(ProviderError::AuthFailed {
                        provider: "anthropic".to_string(),
                    });
                }
                if is_retryable_status(code) && attempt < self.max_retries {
                    let delay = retry_backoff_delay(attempt);
                    tracing::warn!(status = code, ?delay, "Anthropic returned retryable status");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(ProviderError::RequestFailed {
                    provider: "anthropic".to_string(),
                    reason: format!("HTTP {}: {}", status, text),
                });
            }

            let parsed: MessagesResponse =
                serde_json::from_str(&text).map_err(|e| ProviderError::InvalidResponse {
                    provider: "anthropic".to_string(),
                    reason: format!("JSON parse error: {}", e),
                })?;
            return Ok(into_turn(parsed));
        }

        Err(ProviderError::RequestFailed {
            provider: "anthropic".to_string(),
            reason: "retry loop exited unexpectedly".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tools_uses_input_schema() {
        let tools = vec![ToolDescriptor {
            name: "eval".to_string(),
            description: "Evaluate js".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        let wire = normalize_tools(&tools);
        assert_eq!(wire[0]["name"], "eval");
        assert_eq!(wire[0]["input_schema"]["type"], "object");
    }

    #[test]
    fn test_normalize_skips_system_messages() {
        let wire = normalize_messages(&[Message::system("rules"), Message::user("hi")]);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
    }

    #[test]
    fn test_normalize_assistant_with_calls() {
        let message = Message::assistant_with_calls(
            "checking",
            vec![ToolCallRequest {
                id: "toolu_1".to_string(),
                name: "eval".to_string(),
                arguments: serde_json::json!({"code": "2+2"}),
            }],
        );
        let wire = normalize_messages(&[message]);
        let blocks = wire[0]["content"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "text");
        assert_eq!(blocks[1]["type"], "tool_use");
        assert_eq!(blocks[1]["input"]["code"], "2+2");
    }

    #[test]
    fn test_normalize_merges_sibling_tool_results() {
        let assistant = Message::assistant_with_calls(
            "",
            vec![
                ToolCallRequest {
                    id: "toolu_1".to_string(),
                    name: "eval".to_string(),
                    arguments: serde_json::json!({}),
                },
                ToolCallRequest {
                    id: "toolu_2".to_string(),
                    name: "fetch".to_string(),
                    arguments: serde_json::json!({}),
                },
            ],
        );
        let wire = normalize_messages(&[
            assistant,
            Message::tool("eval", "toolu_1", "4"),
            Message::tool("fetch", "toolu_2", "ok"),
        ]);

        // One assistant turn, one user turn carrying both results.
        assert_eq!(wire.len(), 2);
        let results = wire[1]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "toolu_1");
        assert_eq!(results[1]["tool_use_id"], "toolu_2");
    }

    #[test]
    fn test_into_turn_preserves_interleaving() {
        let response: MessagesResponse = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "tool_use", "id": "toolu_1", "name": "eval", "input": {"code": "2+2"}},
                {"type": "text", "text": "second"}
            ]
        }))
        .unwrap();

        let turn = into_turn(response);
        assert_eq!(turn.blocks.len(), 3);
        assert!(matches!(&turn.blocks[0], TurnBlock::Text(t) if t == "first"));
        assert!(matches!(&turn.blocks[1], TurnBlock::ToolCall(c) if c.name == "eval"));
        assert!(matches!(&turn.blocks[2], TurnBlock::Text(t) if t == "second"));
    }

    #[test]
    fn test_into_turn_ignores_unknown_blocks() {
        let response: MessagesResponse = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "answer"}
            ]
        }))
        .unwrap();
        let turn = into_turn(response);
        assert_eq!(turn.text(), "answer");
    }

    #[tokio::test]
    async fn test_complete_against_mock_server() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "hello"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new(SecretString::from("sk-ant-test".to_string()));
        let config = ChatConfig::new("claude-sonnet-4-0").with_base_url(server.uri());
        let turn = provider
            .complete(&config, &[Message::user("hi")], &[])
            .await
            .unwrap();
        assert_eq!(turn.text(), "hello");
    }
}
