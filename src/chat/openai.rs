//! OpenAI chat completions adapter.
//!
//! Tool results travel as native `tool`-role messages carrying the
//! originating `tool_call_id`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::chat::provider::{Message, ModelTurn, Provider, Role, ToolCallRequest, TurnBlock};
use crate::chat::retry::{is_retryable_status, retry_backoff_delay};
use crate::config::ChatConfig;
use crate::error::ProviderError;
use crate::registry::ToolDescriptor;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI chat completions provider.
///
/// The HTTP client is built on first use, not at construction; an
/// adapter that never completes never allocates one.
pub struct OpenAiProvider {
    api_key: SecretString,
    client: OnceCell<reqwest::Client>,
    max_retries: u32,
}

impl OpenAiProvider {
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
        format!("{}/v1/chat/completions", base.trim_end_matches('/'))
    }
}

/// Translate tool descriptors into OpenAI function declarations.
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

/// Translate the neutral history into OpenAI wire messages.
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
                let mut entry = serde_json::json!({
                    "role": "assistant",
                    "content": message.content,
                });
                if !message.tool_calls.is_empty() {
                    entry["tool_calls"] = message
                        .tool_calls
                        .iter()
                        .map(|call| {
                            serde_json::json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                }
                wire.push(entry);
            }
            Role::Tool => {
                wire.push(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content,
                }));
            }
        }
    }

    wire
}

#[derive(Debug, Serialize)]
struct CompletionBody {
    model: String,
    messages: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON object serialized as a string on the wire.
    arguments: String,
}

fn into_turn(response: CompletionResponse) -> Result<ModelTurn, ProviderError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse {
            provider: "openai".to_string(),
            reason: "no choices in response".to_string(),
        })?;

    let mut blocks = Vec::new();
    if let Some(content) = choice.message.content {
        if !content.is_empty() {
            blocks.push(TurnBlock::Text(content));
        }
    }
    for call in choice.message.tool_calls {
        let arguments = serde_json::from_str(&call.function.arguments).map_err(|e| {
            ProviderError::InvalidResponse {
                provider: "openai".to_string(),
                reason: format!("bad tool call arguments: {}", e),
            }
        })?;
        blocks.push(TurnBlock::ToolCall(ToolCallRequest {
            id: call.id,
            name: call.function.name,
            arguments,
        }));
    }

    Ok(ModelTurn { blocks })
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        config: &ChatConfig,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ModelTurn, ProviderError> {
        let url = Self::api_url(config);
        let body = CompletionBody {
            model: config.model.clone(),
            messages: normalize_messages(config, messages),
            tools: normalize_tools(tools),
        };

        for attempt in 0..=self.max_retries {
            tracing::debug!(url = %url, attempt = attempt + 1, "Sending OpenAI completion request");

            let response = self
                .client()
                .await?
                .post(&url)
                .header(
                    "Authorization",
                    format!("Bearer {}", self.api_key.expose_secret()),
                )
                .json(&body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    if attempt < self.max_retries {
                        let delay = retry_backoff_delay(attempt);
                        tracing::warn!(error = %e, ?delay, "OpenAI request error, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(ProviderError::RequestFailed {
                        provider: "openai".to_string(),
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
                        provider: "openai".to_string(),
                    });
                }
                if is_retryable_status(code) && attempt < self.max_retries {
                    let delay = retry_backoff_delay(attempt);
                    tracing::warn!(status = code, ?delay, "OpenAI returned retryable status");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(ProviderError::RequestFailed {
                    provider: "openai".to_string(),
                    reason: format!("HTTP {}: {}", status, text),
                });
            }

            let parsed: CompletionResponse =
                serde_json::from_str(&text).map_err(|e| ProviderError::InvalidResponse {
                    provider: "openai".to_string(),
                    reason: format!("JSON parse error: {}", e),
                })?;
            return into_turn(parsed);
        }

        Err(ProviderError::RequestFailed {
            provider: "openai".to_string(),
            reason: "retry loop exited unexpectedly".to_string(),
        })
    }
}
