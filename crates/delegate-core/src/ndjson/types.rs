//! Event types for the subagent stream-json protocol.

use serde::{Deserialize, Serialize};

/// Canonical events emitted by a subagent child on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// `init` or `system:init`.
    Init(InitEvent),
    /// Tool call fragments from a `tool_call_message`.
    ToolCall(Vec<ToolCallDelta>),
    /// Tool call fragments awaiting an allow/deny decision.
    ApprovalRequest(Vec<ToolCallDelta>),
    /// A tool call that policy pre-authorized.
    AutoApproval(ToolCallDelta),
    /// Terminal result.
    Result(ResultEvent),
    /// Terminal error.
    Error(ErrorEvent),
    /// Anything else (assistant text, reasoning, unknown types).
    Other { msg_type: String },
}

/// Identity announcement sent once the child has an agent and conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitEvent {
    pub agent_id: Option<String>,
    pub conversation_id: Option<String>,
    pub model: Option<String>,
}

/// One streamed chunk of a tool call.
///
/// Any field may be missing: names usually arrive with the first chunk only,
/// and continuation chunks sometimes omit the id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Token usage statistics reported with the terminal result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

impl Usage {
    /// Total tokens, derived from prompt + completion when not reported.
    pub fn total(&self) -> Option<u64> {
        self.total_tokens.or_else(|| match (self.prompt_tokens, self.completion_tokens) {
            (None, None) => None,
            (p, c) => Some(p.unwrap_or(0).saturating_add(c.unwrap_or(0))),
        })
    }
}

/// Terminal result event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultEvent {
    pub subtype: ResultSubtype,
    pub is_error: bool,
    pub result: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub usage: Usage,
    pub agent_id: Option<String>,
    pub conversation_id: Option<String>,
}

/// Result subtype.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResultSubtype {
    #[default]
    Success,
    Error,
    Unknown(String),
}

/// Terminal error event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub message: String,
}
