//! Provider-neutral chat types.
//!
//! Every vendor adapter normalizes its wire format into [`ModelTurn`]:
//! an ordered list of text and tool-call blocks, in the order the model
//! produced them. The orchestrator only ever sees these types.

use async_trait::async_trait;

use crate::config::ChatConfig;
use crate::error::ProviderError;
use crate::registry::ToolDescriptor;

/// Message roles in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry in the conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool calls issued in this turn (assistant messages only).
    pub tool_calls: Vec<ToolCallRequest>,
    /// Identifier of the call this message answers (tool messages only).
    pub tool_call_id: Option<String>,
    /// Name of the tool that produced this message (tool messages only).
    pub tool_name: Option<String>,
}

impl Message {
    fn bare(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::bare(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::bare(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::bare(Role::Assistant, content)
    }

    pub fn assistant_with_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::bare(Role::Assistant, content)
        }
    }

    /// A tool-result message answering one tool call.
    pub fn tool(
        name: impl Into<String>,
        call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            tool_name: Some(name.into()),
            ..Self::bare(Role::Tool, content)
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    /// Vendor-assigned call identifier, echoed back with the result.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One block of a model turn, in production order.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnBlock {
    Text(String),
    ToolCall(ToolCallRequest),
}

/// A normalized model turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    pub blocks: Vec<TurnBlock>,
}

impl ModelTurn {
    /// All text blocks concatenated.
    pub fn text(&self) -> String {
        let mut parts = Vec::new();
        for block in &self.blocks {
            if let TurnBlock::Text(text) = block {
                parts.push(text.as_str());
            }
        }
        parts.join("\n")
    }

    /// Tool calls in the order the model produced them.
    pub fn tool_calls(&self) -> Vec<&ToolCallRequest> {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                TurnBlock::ToolCall(call) => Some(call),
                TurnBlock::Text(_) => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.blocks
            .iter()
            .any(|block| matches!(block, TurnBlock::ToolCall(_)))
    }
}

/// A chat completion backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short vendor name, used in logs and errors.
    fn name(&self) -> &'static str;

    /// Request one completion over the full history.
    async fn complete(
        &self,
        config: &ChatConfig,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ModelTurn, ProviderError>;
}
