//! Tool-calling chat session.
//!
//! One `send_message` drives the loop: complete over the history, run
//! the turn's tool calls in the order the model produced them, feed the
//! results back, and complete again until a turn arrives with no tool
//! calls. The loop is a work queue, not recursion, so deep tool chains
//! cost no stack.
//!
//! Tool failures never abort the loop; they go back to the model as
//! tool-role messages so it can react. Provider failures end the turn
//! but leave the session usable.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;

use crate::chat::provider::{Message, Provider, ToolCallRequest};
use crate::config::ChatConfig;
use crate::error::{Error, ToolError};
use crate::invoke::ToolDispatch;
use crate::registry::ToolDescriptor;

/// An observable step of a chat turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Assistant text.
    Text(String),
    /// The model requested a tool call.
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    /// A tool call succeeded.
    ToolResult { name: String, content: String },
    /// A tool call failed; the error was fed back to the model.
    ToolError { name: String, message: String },
}

/// A stateful conversation bound to one provider and one tool dispatch.
pub struct ChatSession {
    provider: Arc<dyn Provider>,
    dispatch: Arc<dyn ToolDispatch>,
    config: ChatConfig,
    history: Vec<Message>,
}

impl ChatSession {
    pub fn new(
        provider: Arc<dyn Provider>,
        dispatch: Arc<dyn ToolDispatch>,
        config: ChatConfig,
    ) -> Self {
        Self {
            provider,
            dispatch,
            config,
            history: Vec::new(),
        }
    }

    /// The conversation so far.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Drop the conversation, keeping provider and tools.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Send a user message and collect every event of the turn.
    pub async fn send_message(&mut self, text: impl Into<String>) -> Result<Vec<ChatEvent>, Error> {
        use futures::StreamExt;

        let mut events = Vec::new();
        let mut stream = std::pin::pin!(self.stream_message(text));
        while let Some(event) = stream.next().await {
            events.push(event?);
        }
        Ok(events)
    }

    /// Send a user message, yielding events as the turn progresses.
    ///
    /// The stream is lazy: nothing happens until it is polled.
    pub fn stream_message(
        &mut self,
        text: impl Into<String>,
    ) -> impl Stream<Item = Result<ChatEvent, Error>> + '_ {
        let text = text.into();
        async_stream::try_stream! {
            self.history.push(Message::user(text));

            let tools = self.list_tools_vec().await?;

            loop {
                tracing::debug!(
                    provider = self.provider.name(),
                    history_len = self.history.len(),
                    "Requesting completion"
                );
                let turn = self
                    .provider
                    .complete(&self.config, &self.history, &tools)
                    .await
                    .map_err(Error::Provider)?;

                let turn_text = turn.text();
                let calls: VecDeque<ToolCallRequest> =
                    turn.tool_calls().into_iter().cloned().collect();

                self.history.push(Message::assistant_with_calls(
                    turn_text.clone(),
                    calls.iter().cloned().collect(),
                ));

                if !turn_text.is_empty() {
                    yield ChatEvent::Text(turn_text);
                }

                if calls.is_empty() {
                    break;
                }

                // Results go back in the model's own call order.
                for call in calls {
                    yield ChatEvent::ToolCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    };

                    match self.run_tool(&call).await {
                        Ok(content) => {
                            self.history.push(Message::tool(
                                call.name.as_str(),
                                call.id.as_str(),
                                content.as_str(),
                            ));
                            yield ChatEvent::ToolResult {
                                name: call.name.clone(),
                                content,
                            };
                        }
                        Err(e) => {
                            let message = format!(
                                "Encountered an error when calling tool {}: {}",
                                call.name, e
                            );
                            tracing::warn!(tool = %call.name, error = %e, "Tool call failed; feeding error back");
                            self.history.push(Message::tool(
                                call.name.as_str(),
                                call.id.as_str(),
                                message.as_str(),
                            ));
                            yield ChatEvent::ToolError {
                                name: call.name.clone(),
                                message,
                            };
                        }
                    }
                }
            }
        }
    }

    async fn run_tool(&self, call: &ToolCallRequest) -> Result<String, ToolError> {
        let response = self
            .dispatch
            .call_tool(&call.name, call.arguments.clone())
            .await?;
        Ok(response.flatten())
    }

    async fn list_tools_vec(&self) -> Result<Vec<ToolDescriptor>, Error> {
        let mut tools: Vec<ToolDescriptor> = self
            .dispatch
            .list_tools()
            .await
            .map_err(Error::Tool)?
            .into_values()
            .collect();
        // Stable order keeps requests reproducible.
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("provider", &self.provider.name())
            .field("history_len", &self.history.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::provider::{ModelTurn, Role, TurnBlock};
    use crate::testing::{ScriptedProvider, StubDispatch};

    fn turn_with_call(text: &str, id: &str, name: &str) -> ModelTurn {
        let mut blocks = Vec::new();
        if !text.is_empty() {
            blocks.push(TurnBlock::Text(text.to_string()));
        }
        blocks.push(TurnBlock::ToolCall(ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments: serde_json::json!({"code": "2+2"}),
        }));
        ModelTurn { blocks }
    }

    fn text_turn(text: &str) -> ModelTurn {
        ModelTurn {
            blocks: vec![TurnBlock::Text(text.to_string())],
        }
    }

    #[tokio::test]
    async fn test_plain_text_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_turn("hello there")]));
        let dispatch = Arc::new(StubDispatch::new());
        let mut session = ChatSession::new(provider, dispatch, ChatConfig::new("test-model"));

        let events = session.send_message("hi").await.unwrap();
        assert_eq!(events, vec![ChatEvent::Text("hello there".to_string())]);
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[0].role, Role::User);
        assert_eq!(session.history()[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_tool_call_feeds_result_back() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            turn_with_call("let me compute", "call-1", "eval"),
            text_turn("the answer is 4"),
        ]));
        let dispatch = Arc::new(StubDispatch::new().with_result("eval", "4"));
        let mut session =
            ChatSession::new(provider.clone(), dispatch.clone(), ChatConfig::new("test-model"));

        let events = session.send_message("what is 2+2?").await.unwrap();
        assert_eq!(
            events,
            vec![
                ChatEvent::Text("let me compute".to_string()),
                ChatEvent::ToolCall {
                    name: "eval".to_string(),
                    arguments: serde_json::json!({"code": "2+2"}),
                },
                ChatEvent::ToolResult {
                    name: "eval".to_string(),
                    content: "4".to_string(),
                },
                ChatEvent::Text("the answer is 4".to_string()),
            ]
        );

        // Second completion saw the tool-role message.
        let second_request = provider.request_history(1);
        let tool_msg = second_request
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(tool_msg.content, "4");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(dispatch.calls(), vec!["eval".to_string()]);
    }

    #[tokio::test]
    async fn test_tool_error_fed_back_not_raised() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            turn_with_call("", "call-1", "missing"),
            text_turn("that tool does not exist"),
        ]));
        let dispatch = Arc::new(StubDispatch::new());
        let mut session =
            ChatSession::new(provider.clone(), dispatch, ChatConfig::new("test-model"));

        let events = session.send_message("try it").await.unwrap();

        let error_event = events
            .iter()
            .find_map(|e| match e {
                ChatEvent::ToolError { message, .. } => Some(message.clone()),
                _ => None,
            })
            .unwrap();
        assert!(error_event.starts_with("Encountered an error when calling tool missing:"));

        // The error text landed in the history as a tool message.
        let second_request = provider.request_history(1);
        let tool_msg = second_request
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert!(tool_msg
            .content
            .starts_with("Encountered an error when calling tool missing:"));
    }

    #[tokio::test]
    async fn test_multiple_calls_run_in_model_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ModelTurn {
                blocks: vec![
                    TurnBlock::ToolCall(ToolCallRequest {
                        id: "call-1".to_string(),
                        name: "eval".to_string(),
                        arguments: serde_json::json!({}),
                    }),
                    TurnBlock::ToolCall(ToolCallRequest {
                        id: "call-2".to_string(),
                        name: "fetch".to_string(),
                        arguments: serde_json::json!({}),
                    }),
                ],
            },
            text_turn("done"),
        ]));
        let dispatch = Arc::new(
            StubDispatch::new()
                .with_result("eval", "4")
                .with_result("fetch", "body"),
        );
        let mut session =
            ChatSession::new(provider, dispatch.clone(), ChatConfig::new("test-model"));

        session.send_message("go").await.unwrap();
        assert_eq!(dispatch.calls(), vec!["eval".to_string(), "fetch".to_string()]);
    }

    #[tokio::test]
    async fn test_provider_error_terminates_turn_keeps_session() {
        let provider = Arc::new(ScriptedProvider::failing());
        let dispatch = Arc::new(StubDispatch::new());
        let mut session = ChatSession::new(provider, dispatch, ChatConfig::new("test-model"));

        let err = session.send_message("hi").await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));

        // The user message is retained; the session stays usable.
        assert_eq!(session.history().len(), 1);
        session.clear_history();
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_turn("hello")]));
        let dispatch = Arc::new(StubDispatch::new());
        let mut session =
            ChatSession::new(provider.clone(), dispatch, ChatConfig::new("test-model"));

        let stream = session.stream_message("hi");
        // Not polled yet: no completion happened.
        assert_eq!(provider.completions(), 0);
        drop(stream);
        assert_eq!(provider.completions(), 0);
    }
}
