//! Conversation data model shared by every component in the loop.
//!
//! Mirrors the shape of the teacher's `client_wrapper` module (`Message`,
//! `Role`, `NativeToolCall`, `ToolDefinition`) but generalizes `Role::Tool`'s
//! single `call_id` field into the full tool-call/tool-result pairing the
//! agent loop needs: an assistant message carries zero or more [`ToolCall`]s,
//! and a `role = tool` message carries the `name`/`toolCallId` that
//! correlates it back to one of them (invariant I2 in the core spec).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Who authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A structured request, by the model, to invoke a named tool.
///
/// `id` is provider-assigned and unique within the assistant message that
/// carries it; `arguments` is forwarded to [`crate::agentcore::tool::Tool::execute`]
/// verbatim, with the empty JSON value normalized to `{}` by the dispatcher
/// rather than here (the raw value as the provider sent it is preserved on
/// the struct).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One entry in a conversation history.
///
/// `content` is stored as `Arc<str>` so that trimmed/cloned histories
/// (see [`crate::agentcore::context`]) don't copy message bodies — the same
/// choice the teacher's `Message::content` makes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Arc<str>,
    /// Non-empty only when `role == Role::Assistant` and the provider
    /// selected one or more tools.
    pub tool_calls: Vec<ToolCall>,
    /// Set only when `role == Role::Tool`: the tool name that produced this
    /// result.
    pub name: Option<String>,
    /// Set only when `role == Role::Tool`: the [`ToolCall::id`] this result
    /// answers.
    pub tool_call_id: Option<String>,
    /// Opaque provider-side reasoning/thinking text, when the provider
    /// surfaces it. Never sent back upstream by the core; carried for
    /// observability only.
    pub reasoning: Option<Arc<str>>,
}

impl Message {
    pub fn user(content: impl Into<Arc<str>>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            name: None,
            tool_call_id: None,
            reasoning: None,
        }
    }

    pub fn system(content: impl Into<Arc<str>>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            name: None,
            tool_call_id: None,
            reasoning: None,
        }
    }

    pub fn assistant(content: impl Into<Arc<str>>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            name: None,
            tool_call_id: None,
            reasoning: None,
        }
    }

    pub fn tool_result(
        name: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            name: Some(name.into()),
            tool_call_id: Some(tool_call_id.into()),
            reasoning: None,
        }
    }

    /// `true` when this is an assistant turn with neither content nor tool
    /// calls — the condition the empty-response recovery in §4.1 step 7
    /// watches for.
    pub fn is_empty_assistant_turn(&self) -> bool {
        self.role == Role::Assistant && self.content.is_empty() && self.tool_calls.is_empty()
    }
}

/// Provider-agnostic tool schema handed to the model alongside a [`Request`].
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// One outbound generation call.
#[derive(Debug, Clone)]
pub struct Request {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_output_tokens: usize,
    pub response_schema: Option<serde_json::Value>,
}

/// How many tokens were spent on one generation call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One inbound generation result.
#[derive(Debug, Clone)]
pub struct Response {
    pub message: Message,
    pub usage: Option<Usage>,
}
