//! Stored transcript conversion
//!
//! Sessions are stored as an array of agent messages whose `content` is
//! either a plain string or a list of typed parts (`text`, `thinking`,
//! `toolRequest`, `toolResponse`). Tool responses are folded into the tool
//! call they answer; messages that only carry tool responses disappear.

use parley_protocol::{new_id, Message, Role, ToolCallInfo};
use serde_json::Value;
use tracing::debug;

use crate::ConnectorError;

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        _ => None,
    }
}

fn push_paragraph(buffer: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !buffer.is_empty() {
        buffer.push('\n');
    }
    buffer.push_str(text);
}

fn tool_name(part: &Value) -> String {
    let call = part.get("toolCall");
    call.and_then(|c| c.pointer("/value/name"))
        .or_else(|| call.and_then(|c| c.get("name")))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// `(success, output)` of a `toolResponse` part.
fn tool_outcome(part: &Value) -> (bool, String) {
    let Some(result) = part.get("toolResult") else {
        return (false, String::new());
    };
    if let Some(error) = result.get("error") {
        let message = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return (false, message);
    }
    let success = result
        .get("status")
        .and_then(Value::as_str)
        .map_or(true, |s| s.eq_ignore_ascii_case("success"));
    let output = result.get("value").and_then(text_of).unwrap_or_default();
    (success, output)
}

fn attach_tool_response(messages: &mut [Message], id: &str, success: bool, output: String) {
    let target = messages
        .iter_mut()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .find_map(|m| m.tool_call_mut(id));
    match target {
        Some(call) => {
            call.success = Some(success);
            call.result = Some(output);
        }
        None => debug!(
            component = "transcript",
            event = "transcript.tool_response.unmatched",
            tool_call_id = %id,
            "Dropping stored tool response without a matching request"
        ),
    }
}

/// Convert a stored `messages_json` array into transcript messages.
pub fn messages_from_json(raw: &str) -> Result<Vec<Message>, ConnectorError> {
    let stored: Vec<Value> = serde_json::from_str(raw)?;
    let mut messages: Vec<Message> = Vec::with_capacity(stored.len());

    for entry in &stored {
        let role = match entry.get("role").and_then(Value::as_str) {
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            _ => continue,
        };

        let mut content = String::new();
        let mut thinking = String::new();
        let mut tool_calls = Vec::new();

        match entry.get("content") {
            Some(Value::String(s)) => content.push_str(s),
            Some(Value::Array(parts)) => {
                for part in parts {
                    match part.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            if let Some(text) = part.get("text").and_then(Value::as_str) {
                                push_paragraph(&mut content, text);
                            }
                        }
                        Some("thinking") => {
                            if let Some(text) = part.get("thinking").and_then(Value::as_str) {
                                push_paragraph(&mut thinking, text);
                            }
                        }
                        Some("toolRequest") => {
                            if let Some(id) = part.get("id").and_then(Value::as_str) {
                                tool_calls.push(ToolCallInfo::pending(id, tool_name(part)));
                            }
                        }
                        Some("toolResponse") => {
                            if let Some(id) = part.get("id").and_then(Value::as_str) {
                                let (success, output) = tool_outcome(part);
                                attach_tool_response(&mut messages, id, success, output);
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        if content.is_empty() && thinking.is_empty() && tool_calls.is_empty() {
            continue;
        }

        let id = entry
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(new_id);
        let timestamp = entry
            .get("created")
            .and_then(Value::as_i64)
            .map(|secs| format!("{secs}Z"))
            .unwrap_or_else(|| "0Z".to_string());

        messages.push(Message {
            id,
            role,
            content,
            thinking: (!thinking.is_empty()).then_some(thinking),
            tool_calls,
            turn: None,
            compaction: None,
            is_streaming: false,
            timestamp,
        });
    }

    Ok(messages)
}
