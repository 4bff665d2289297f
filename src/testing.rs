//! Test doubles for the chat loop and tool dispatch.
//!
//! Used by unit tests and the integration suite; compiled into the
//! crate so downstream tests can script conversations without a
//! network or a sandbox.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::chat::provider::{Message, ModelTurn, Provider};
use crate::config::ChatConfig;
use crate::error::{ProviderError, ToolError};
use crate::invoke::{ToolDispatch, ToolResponse};
use crate::registry::ToolDescriptor;

/// A provider that replays scripted turns and records every request.
pub struct ScriptedProvider {
    turns: Mutex<std::vec::IntoIter<ModelTurn>>,
    requests: Mutex<Vec<Vec<Message>>>,
    fail: bool,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter()),
            requests: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A provider whose every completion fails.
    pub fn failing() -> Self {
        Self {
            turns: Mutex::new(Vec::new().into_iter()),
            requests: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Number of completions served so far.
    pub fn completions(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The message history the n-th completion request saw.
    pub fn request_history(&self, index: usize) -> Vec<Message> {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(
        &self,
        _config: &ChatConfig,
        messages: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<ModelTurn, ProviderError> {
        self.requests.lock().unwrap().push(messages.to_vec());

        if self.fail {
            return Err(ProviderError::RequestFailed {
                provider: "scripted".to_string(),
                reason: "scripted failure".to_string(),
            });
        }

        self.turns
            .lock()
            .unwrap()
            .next()
            .ok_or_else(|| ProviderError::RequestFailed {
                provider: "scripted".to_string(),
                reason: "script exhausted".to_string(),
            })
    }
}

/// A tool dispatch with canned text results, recording call order.
/// Tools without a canned result resolve as not found.
pub struct StubDispatch {
    results: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl StubDispatch {
    pub fn new() -> Self {
        Self {
            results: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_result(mut self, tool: impl Into<String>, text: impl Into<String>) -> Self {
        self.results.insert(tool.into(), text.into());
        self
    }

    /// Tool names in the order they were called.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for StubDispatch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolDispatch for StubDispatch {
    async fn list_tools(&self) -> Result<HashMap<String, ToolDescriptor>, ToolError> {
        Ok(self
            .results
            .keys()
            .map(|name| {
                (
                    name.clone(),
                    ToolDescriptor {
                        name: name.clone(),
                        description: format!("stub {}", name),
                        input_schema: serde_json::json!({"type": "object"}),
                    },
                )
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: serde_json::Value,
    ) -> Result<ToolResponse, ToolError> {
        self.calls.lock().unwrap().push(name.to_string());

        match self.results.get(name) {
            Some(text) => Ok(ToolResponse::text(text.clone())),
            None => Err(ToolError::NotFound {
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_provider_replays_in_order() {
        use crate::chat::provider::TurnBlock;

        let provider = ScriptedProvider::new(vec![
            ModelTurn {
                blocks: vec![TurnBlock::Text("one".to_string())],
            },
            ModelTurn {
                blocks: vec![TurnBlock::Text("two".to_string())],
            },
        ]);
        let config = ChatConfig::new("test-model");

        let first = provider.complete(&config, &[], &[]).await.unwrap();
        let second = provider.complete(&config, &[], &[]).await.unwrap();
        assert_eq!(first.text(), "one");
        assert_eq!(second.text(), "two");
        assert_eq!(provider.completions(), 2);

        // Script exhausted.
        assert!(provider.complete(&config, &[], &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_stub_dispatch_unknown_tool() {
        let dispatch = StubDispatch::new().with_result("eval", "4");

        assert!(dispatch.call_tool("eval", serde_json::json!({})).await.is_ok());
        let err = dispatch
            .call_tool("other", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { .. }));
        assert_eq!(dispatch.calls(), vec!["eval", "other"]);
    }
}
