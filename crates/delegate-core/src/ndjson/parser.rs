//! NDJSON parser for the subagent stream-json protocol.
//!
//! Implements tolerant reader pattern: unknown fields ignored, unknown types
//! surfaced as [`StreamMessage::Other`].

use serde_json::Value;

use super::types::*;
use crate::error::{Error, Result};

/// Envelope type that wraps another event under `event`.
const ENVELOPE_TYPE: &str = "stream_event";

/// Nested envelopes deeper than this are rejected.
const MAX_ENVELOPE_DEPTH: usize = 4;

/// Parse a single NDJSON line from a child's stdout.
pub fn parse_line(line: &str) -> Result<StreamMessage> {
    let raw: Value = serde_json::from_str(line)?;
    parse_value(&raw)
}

/// Strip `stream_event` envelopes, returning the innermost event.
pub fn unwrap_envelope(raw: &Value) -> Result<&Value> {
    let mut current = raw;
    for _ in 0..MAX_ENVELOPE_DEPTH {
        if current.get("type").and_then(Value::as_str) != Some(ENVELOPE_TYPE) {
            return Ok(current);
        }
        current = current
            .get("event")
            .ok_or_else(|| Error::NdjsonParse("Envelope without 'event' field".into()))?;
    }
    Err(Error::NdjsonParse("Envelope nesting too deep".into()))
}

/// Parse a JSON value into a canonical event.
pub fn parse_value(raw: &Value) -> Result<StreamMessage> {
    let event = unwrap_envelope(raw)?;
    let msg_type = event
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::NdjsonParse("Missing 'type' field".into()))?;

    match msg_type {
        "init" => Ok(StreamMessage::Init(parse_init(event))),
        "system" => match event.get("subtype").and_then(Value::as_str) {
            Some("init") => Ok(StreamMessage::Init(parse_init(event))),
            _ => Ok(StreamMessage::Other {
                msg_type: "system".to_string(),
            }),
        },
        "message" => Ok(parse_message(event)),
        "auto_approval" => Ok(StreamMessage::AutoApproval(parse_auto_approval(event))),
        "result" => Ok(StreamMessage::Result(parse_result(event))),
        "error" => Ok(StreamMessage::Error(parse_error(event))),
        _ => Ok(StreamMessage::Other {
            msg_type: msg_type.to_string(),
        }),
    }
}

fn str_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn parse_init(raw: &Value) -> InitEvent {
    InitEvent {
        agent_id: str_field(raw, "agent_id"),
        conversation_id: str_field(raw, "conversation_id"),
        model: str_field(raw, "model"),
    }
}

fn parse_message(raw: &Value) -> StreamMessage {
    let message_type = raw
        .get("message_type")
        .and_then(Value::as_str)
        .unwrap_or("");

    match message_type {
        "tool_call_message" => StreamMessage::ToolCall(parse_tool_calls(raw)),
        "approval_request_message" => StreamMessage::ApprovalRequest(parse_tool_calls(raw)),
        other => StreamMessage::Other {
            msg_type: if other.is_empty() {
                "message".to_string()
            } else {
                other.to_string()
            },
        },
    }
}

/// Collect tool call chunks from either `tool_calls: [...]` or `tool_call: {...}`.
fn parse_tool_calls(raw: &Value) -> Vec<ToolCallDelta> {
    if let Some(arr) = raw.get("tool_calls").and_then(Value::as_array) {
        return arr.iter().map(parse_tool_call_delta).collect();
    }
    raw.get("tool_call")
        .map(parse_tool_call_delta)
        .into_iter()
        .collect()
}

fn parse_tool_call_delta(raw: &Value) -> ToolCallDelta {
    let arguments = match raw.get("arguments") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };
    ToolCallDelta {
        id: str_field(raw, "tool_call_id").or_else(|| str_field(raw, "id")),
        name: str_field(raw, "name").or_else(|| str_field(raw, "tool_name")),
        arguments,
    }
}

fn parse_auto_approval(raw: &Value) -> ToolCallDelta {
    let mut delta = raw
        .get("tool_call")
        .map(parse_tool_call_delta)
        .unwrap_or_default();
    if delta.id.is_none() {
        delta.id = str_field(raw, "tool_call_id");
    }
    if delta.name.is_none() {
        delta.name = str_field(raw, "tool_name");
    }
    delta
}

pub(crate) fn parse_usage(val: Option<&Value>) -> Usage {
    val.and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn parse_result(raw: &Value) -> ResultEvent {
    let subtype = match raw.get("subtype").and_then(Value::as_str) {
        Some("success") | None => ResultSubtype::Success,
        Some("error") => ResultSubtype::Error,
        Some(other) => ResultSubtype::Unknown(other.to_string()),
    };
    let is_error = raw
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || subtype == ResultSubtype::Error;

    ResultEvent {
        subtype,
        is_error,
        result: raw.get("result").and_then(Value::as_str).map(String::from),
        error: error_text(raw),
        duration_ms: raw.get("duration_ms").and_then(Value::as_u64).unwrap_or(0),
        usage: parse_usage(raw.get("usage")),
        agent_id: str_field(raw, "agent_id"),
        conversation_id: str_field(raw, "conversation_id"),
    }
}

/// Error text may be a string, an object with `message`, or a top-level `message`.
fn error_text(raw: &Value) -> Option<String> {
    match raw.get("error") {
        Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
        Some(obj @ Value::Object(_)) => {
            if let Some(msg) = str_field(obj, "message") {
                return Some(msg);
            }
        }
        _ => {}
    }
    None
}

fn parse_error(raw: &Value) -> ErrorEvent {
    let message = error_text(raw)
        .or_else(|| str_field(raw, "message"))
        .or_else(|| str_field(raw, "detail"))
        .unwrap_or_else(|| "Unknown error".to_string());
    ErrorEvent { message }
}
