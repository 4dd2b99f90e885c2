// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Inner wire types: the line-delimited JSON dialect spoken by the agent
//! subprocess (`spec.md` §4.6, §6).
//!
//! Inbound lines are either a command response (`{type:"response", id,
//! command, success, data?, error?}`) or a typed event. Outbound lines are
//! commands (`{id, type, ...}`). The event taxonomy is loosely typed on the
//! wire — this module defines tagged variants over it and treats unknown
//! kinds as benign, per the "dynamic JSON payloads" design note.
//!
//! Grounded on `sven_core::events::AgentEvent`'s tagged-enum shape, widened
//! to the inner dialect's event and sub-kind set, and on
//! `sven_node::control::protocol::ControlCommand`'s `{id, type, ...}`
//! outbound command framing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One content block inside a message's accumulated `content` array.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Usage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default, rename = "cacheRead")]
    pub cache_read: u64,
    #[serde(default, rename = "cacheWrite")]
    pub cache_write: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl ToolResult {
    /// Concatenated text of every text content block, the raw material the
    /// translator classifies and diffs.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// The `kind` discriminant of a `message_update` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageUpdate {
    TextDelta {
        delta: String,
    },
    ThinkingStart {},
    ThinkingDelta {
        delta: String,
    },
    ThinkingEnd {
        #[serde(default)]
        content: Option<String>,
    },
    ToolcallEnd {
        id: String,
        name: String,
        #[serde(default)]
        args: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolExecutionStart {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolExecutionUpdate {
    pub id: String,
    #[serde(default)]
    pub delta: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolExecutionEnd {
    pub id: String,
    #[serde(default)]
    pub result: Option<ToolResult>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
    /// Present when the agent itself computed a unified-diff body for an
    /// edit; absent for a fresh `create`, which the translator synthesizes.
    #[serde(default)]
    pub diff: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoRetryStart {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoRetryEnd {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HookError {
    #[serde(default)]
    pub hook: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEnd {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// A typed inner event, tagged on `type`. Unknown kinds decode to `Unknown`
/// rather than failing the whole line — the translator logs and drops them.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InnerEvent {
    AgentStart,
    AgentEnd,
    MessageStart {
        #[serde(default)]
        role: Option<String>,
    },
    MessageUpdate(MessageUpdate),
    MessageEnd(MessageEnd),
    ToolExecutionStart(ToolExecutionStart),
    ToolExecutionUpdate(ToolExecutionUpdate),
    ToolExecutionEnd(ToolExecutionEnd),
    AutoRetryStart(AutoRetryStart),
    AutoRetryEnd(AutoRetryEnd),
    HookError(HookError),
    #[serde(other)]
    Unknown,
}

/// `{type:"response", id, command, success, data?, error?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct InnerResponse {
    pub id: String,
    #[serde(default)]
    pub command: String,
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One decoded inbound agent line.
#[derive(Debug, Clone)]
pub enum InnerLine {
    Response(InnerResponse),
    Event(InnerEvent),
}

pub fn decode_line(line: &str) -> Result<Option<InnerLine>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
    let is_response = value
        .get("type")
        .and_then(|v| v.as_str())
        .map(|t| t == "response")
        .unwrap_or(false);
    if is_response {
        let resp: InnerResponse = serde_json::from_value(value).map_err(|e| e.to_string())?;
        Ok(Some(InnerLine::Response(resp)))
    } else {
        let event: InnerEvent = serde_json::from_value(value).map_err(|e| e.to_string())?;
        Ok(Some(InnerLine::Event(event)))
    }
}

/// Outbound commands to the agent (§6: `set_model`, `new_session`, `prompt`,
/// `abort`, `get_available_models`). Framed on the wire as `{id, type, ...}`;
/// `id` is added by the caller at send time, not carried here, since the
/// correlator is what mints it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InnerCommand {
    SetModel {
        provider: String,
        #[serde(rename = "modelId")]
        model_id: String,
    },
    NewSession,
    Prompt {
        message: String,
    },
    Abort,
    GetAvailableModels,
}

impl InnerCommand {
    /// The method tag the correlator records alongside the pending sink.
    pub fn tag(&self) -> &'static str {
        match self {
            InnerCommand::SetModel { .. } => "set_model",
            InnerCommand::NewSession => "new_session",
            InnerCommand::Prompt { .. } => "prompt",
            InnerCommand::Abort => "abort",
            InnerCommand::GetAvailableModels => "get_available_models",
        }
    }

    /// Renders the full wire line, stamping in the correlator-assigned id.
    pub fn to_wire_line(&self, id: &str) -> String {
        let mut value = serde_json::to_value(self).expect("inner commands always serialize");
        if let Value::Object(map) = &mut value {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
        let mut line = serde_json::to_string(&value).expect("inner commands always serialize");
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_agent_start_and_end() {
        assert!(matches!(
            decode_line(r#"{"type":"agent_start"}"#).unwrap().unwrap(),
            InnerLine::Event(InnerEvent::AgentStart)
        ));
        assert!(matches!(
            decode_line(r#"{"type":"agent_end"}"#).unwrap().unwrap(),
            InnerLine::Event(InnerEvent::AgentEnd)
        ));
    }

    #[test]
    fn decodes_message_update_text_delta() {
        let line = r#"{"type":"message_update","kind":"text_delta","delta":"Hi"}"#;
        match decode_line(line).unwrap().unwrap() {
            InnerLine::Event(InnerEvent::MessageUpdate(MessageUpdate::TextDelta { delta })) => {
                assert_eq!(delta, "Hi");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decodes_message_update_toolcall_end() {
        let line = r#"{"type":"message_update","kind":"toolcall_end","id":"t1","name":"bash","args":{"command":"ls"}}"#;
        match decode_line(line).unwrap().unwrap() {
            InnerLine::Event(InnerEvent::MessageUpdate(MessageUpdate::ToolcallEnd { id, name, .. })) => {
                assert_eq!(id, "t1");
                assert_eq!(name, "bash");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decodes_message_end_with_usage() {
        let line = r#"{"type":"message_end","role":"assistant","content":[{"type":"text","text":"Hi"}],"usage":{"input":10,"output":1}}"#;
        match decode_line(line).unwrap().unwrap() {
            InnerLine::Event(InnerEvent::MessageEnd(end)) => {
                assert_eq!(end.content.len(), 1);
                assert_eq!(end.usage.unwrap().input, 10);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decodes_tool_execution_lifecycle() {
        let start = decode_line(r#"{"type":"tool_execution_start","id":"t1","name":"write","args":{"path":"/f.txt"}}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(start, InnerLine::Event(InnerEvent::ToolExecutionStart(_))));

        let end = decode_line(
            r#"{"type":"tool_execution_end","id":"t1","result":{"content":[{"type":"text","text":"hello\nworld"}]},"isError":false}"#,
        )
        .unwrap()
        .unwrap();
        match end {
            InnerLine::Event(InnerEvent::ToolExecutionEnd(e)) => {
                assert!(!e.is_error);
                assert_eq!(e.result.unwrap().text(), "hello\nworld");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decodes_response_line() {
        let line = r#"{"type":"response","id":"abc","command":"set_model","success":true,"data":{}}"#;
        match decode_line(line).unwrap().unwrap() {
            InnerLine::Response(r) => {
                assert_eq!(r.id, "abc");
                assert!(r.success);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_kind_does_not_fail_the_line() {
        let line = r#"{"type":"something_new","foo":"bar"}"#;
        assert!(matches!(
            decode_line(line).unwrap().unwrap(),
            InnerLine::Event(InnerEvent::Unknown)
        ));
    }

    #[test]
    fn set_model_command_renders_camel_case_model_id() {
        let cmd = InnerCommand::SetModel {
            provider: "openai".into(),
            model_id: "gpt-5".into(),
        };
        let wire = cmd.to_wire_line("cmd-1");
        assert!(wire.contains(r#""modelId":"gpt-5""#));
        assert!(wire.contains(r#""id":"cmd-1""#));
        assert!(wire.contains(r#""type":"set_model""#));
        assert_eq!(cmd.tag(), "set_model");
    }

    #[test]
    fn prompt_command_carries_message() {
        let cmd = InnerCommand::Prompt { message: "hi".into() };
        assert_eq!(cmd.tag(), "prompt");
        assert!(cmd.to_wire_line("x").contains(r#""message":"hi""#));
    }
}
