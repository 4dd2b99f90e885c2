// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Event translator (`spec.md` §4.6) — the core of the bridge.
//!
//! A synchronous, table-driven transform from one inner event to zero or
//! more outer notifications. Never suspends (§5: "event translation never
//! suspends"); all the state it needs — live item ids, the tool-args
//! cache, the diff accumulator — is threaded in as `&mut` arguments rather
//! than captured, so the transform stays a plain function the way
//! `sven_node::control::service::agent_event_to_control` is a plain
//! function over `&AgentEvent`.
//!
//! Grounded on `sven_node::control::service::agent_event_to_control`'s
//! per-variant match returning `Option<ControlEvent>`, widened here to
//! `Vec<OuterNotification>` because several inner events fan out into more
//! than one outer notification (e.g. a file-change tool end also emits
//! `turn/diff/updated`).

use crate::diff::{build_fragment, DiffAccumulator};
use crate::inner::{ContentBlock, InnerEvent, MessageUpdate, ToolExecutionEnd, ToolExecutionStart, ToolExecutionUpdate, Usage};
use crate::turn::TurnState;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct OuterNotification {
    pub method: String,
    pub params: Value,
}

impl OuterNotification {
    fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolKind {
    Command,
    FileChange { kind: &'static str },
    ReadLike,
}

fn classify_tool(name: &str) -> ToolKind {
    match name {
        "bash" => ToolKind::Command,
        "write" => ToolKind::FileChange { kind: "create" },
        "edit" => ToolKind::FileChange { kind: "edit" },
        _ => ToolKind::ReadLike,
    }
}

/// Synthesizes a display string for a read-like tool call. Always produces
/// a syntactically valid string even when path-like arguments are absent
/// (§8 #11).
fn synthesize_display(name: &str, args: &Value) -> String {
    let path = args.get("path").and_then(Value::as_str);
    match name {
        "read" => format!("read {}", path.unwrap_or("")),
        "ls" => format!("ls {}", path.unwrap_or(".")),
        "find" => {
            let pattern = args.get("pattern").and_then(Value::as_str).unwrap_or("");
            format!("find \"{pattern}\" in {}", path.unwrap_or("."))
        }
        "grep" => {
            let pattern = args.get("pattern").and_then(Value::as_str).unwrap_or("");
            format!("grep /{pattern}/ in {}", path.unwrap_or("."))
        }
        other => match path {
            Some(p) => format!("{other} {p}"),
            None => other.to_string(),
        },
    }
}

fn thread_turn_ids(state: &TurnState) -> (Value, Value) {
    let thread_id = state
        .current_thread
        .as_ref()
        .map(|t| Value::String(t.id.as_str().to_string()))
        .unwrap_or(Value::Null);
    let turn_id = state
        .current_turn
        .as_ref()
        .map(|t| Value::String(t.as_str().to_string()))
        .unwrap_or(Value::Null);
    (thread_id, turn_id)
}

fn content_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

fn usage_params(usage: &Usage, thread_id: &Value) -> Value {
    json!({
        "threadId": thread_id,
        "input": usage.input,
        "output": usage.output,
        "cacheRead": usage.cache_read,
        "cacheWrite": usage.cache_write,
    })
}

/// Translates one inner event into the outer notifications it produces.
/// Takes `&mut TurnState` and `&mut DiffAccumulator` so item-id bookkeeping
/// and diff aggregation stay consistent call to call.
pub fn translate(event: InnerEvent, state: &mut TurnState, diffs: &mut DiffAccumulator) -> Vec<OuterNotification> {
    let (thread_id, turn_id) = thread_turn_ids(state);

    match event {
        InnerEvent::AgentStart => {
            diffs.reset();
            state.mark_in_progress();
            vec![OuterNotification::new(
                "turn/started",
                json!({"threadId": thread_id, "turnId": turn_id}),
            )]
        }

        InnerEvent::AgentEnd => {
            let out = vec![OuterNotification::new(
                "turn/completed",
                json!({"threadId": thread_id, "turnId": turn_id}),
            )];
            state.complete_turn();
            out
        }

        InnerEvent::MessageStart { role } if role.as_deref() == Some("assistant") || role.is_none() => {
            let id = state.begin_assistant_message();
            vec![OuterNotification::new(
                "item/started",
                json!({
                    "threadId": thread_id,
                    "turnId": turn_id,
                    "item": {"id": id.as_str(), "type": "agentMessage", "phase": "inProgress"},
                }),
            )]
        }
        InnerEvent::MessageStart { .. } => vec![],

        InnerEvent::MessageUpdate(update) => translate_message_update(update, state, &thread_id, &turn_id),

        InnerEvent::MessageEnd(end) => {
            let id = state.take_or_synthesize_message_id();
            let text = content_text(&end.content);
            let mut out = vec![OuterNotification::new(
                "item/completed",
                json!({
                    "threadId": thread_id,
                    "turnId": turn_id,
                    "item": {"id": id.as_str(), "type": "agentMessage", "phase": "completed", "text": text},
                }),
            )];
            if let Some(usage) = &end.usage {
                out.push(OuterNotification::new(
                    "thread/tokenUsage/updated",
                    usage_params(usage, &thread_id),
                ));
            }
            out
        }

        InnerEvent::ToolExecutionStart(start) => translate_tool_start(start, state, &thread_id, &turn_id),

        InnerEvent::ToolExecutionUpdate(update) => translate_tool_update(update, state, &thread_id, &turn_id),

        InnerEvent::ToolExecutionEnd(end) => translate_tool_end(end, state, diffs, &thread_id, &turn_id),

        InnerEvent::AutoRetryStart(retry) => vec![OuterNotification::new(
            "error",
            json!({
                "threadId": thread_id,
                "turnId": turn_id,
                "message": retry.reason.unwrap_or_else(|| "retrying after a transient failure".to_string()),
                "willRetry": true,
            }),
        )],

        InnerEvent::AutoRetryEnd(retry) if !retry.success => vec![OuterNotification::new(
            "error",
            json!({
                "threadId": thread_id,
                "turnId": turn_id,
                "message": retry.reason.unwrap_or_else(|| "retry attempts exhausted".to_string()),
                "willRetry": false,
            }),
        )],
        InnerEvent::AutoRetryEnd(_) => vec![],

        InnerEvent::HookError(hook) => vec![OuterNotification::new(
            "error",
            json!({
                "threadId": thread_id,
                "turnId": turn_id,
                "message": hook.message,
                "hook": hook.hook,
                "willRetry": false,
            }),
        )],

        InnerEvent::Unknown => {
            tracing::debug!("dropping unrecognized inner event kind");
            vec![]
        }
    }
}

fn translate_message_update(update: MessageUpdate, state: &mut TurnState, thread_id: &Value, turn_id: &Value) -> Vec<OuterNotification> {
    match update {
        MessageUpdate::TextDelta { delta } => {
            let id = state.live_message_id.clone().unwrap_or_else(|| state.begin_assistant_message());
            vec![OuterNotification::new(
                "item/agentMessage/delta",
                json!({"threadId": thread_id, "turnId": turn_id, "itemId": id.as_str(), "delta": delta}),
            )]
        }
        MessageUpdate::ThinkingStart {} => {
            let id = state.reasoning_id();
            vec![OuterNotification::new(
                "item/started",
                json!({
                    "threadId": thread_id,
                    "turnId": turn_id,
                    "item": {"id": id.as_str(), "type": "reasoning", "phase": "inProgress"},
                }),
            )]
        }
        MessageUpdate::ThinkingDelta { delta } => {
            let id = state.reasoning_id();
            vec![OuterNotification::new(
                "item/reasoning/delta",
                json!({"threadId": thread_id, "turnId": turn_id, "itemId": id.as_str(), "delta": delta}),
            )]
        }
        MessageUpdate::ThinkingEnd { content } => {
            let id = state.reasoning_id();
            vec![OuterNotification::new(
                "item/completed",
                json!({
                    "threadId": thread_id,
                    "turnId": turn_id,
                    "item": {"id": id.as_str(), "type": "reasoning", "phase": "completed", "text": content.unwrap_or_default()},
                }),
            )]
        }
        MessageUpdate::ToolcallEnd { id, name, args } => {
            vec![OuterNotification::new(
                "item/started",
                json!({
                    "threadId": thread_id,
                    "turnId": turn_id,
                    "item": {"id": id, "type": "commandExecution", "phase": "inProgress", "name": name, "args": args},
                }),
            )]
        }
        MessageUpdate::Unknown => vec![],
    }
}

/// The outer item `type` a tool kind renders as in `item/started` and
/// `item/completed` — the same correspondence `translate_tool_start` and
/// `translate_tool_end` use, so a streaming delta is tagged with a type the
/// client will actually see on those events.
fn outer_item_type(kind: ToolKind) -> &'static str {
    match kind {
        ToolKind::FileChange { .. } => "fileChange",
        ToolKind::Command | ToolKind::ReadLike => "commandExecution",
    }
}

fn translate_tool_update(update: ToolExecutionUpdate, state: &TurnState, thread_id: &Value, turn_id: &Value) -> Vec<OuterNotification> {
    let kind = state
        .peek_cached_tool_args(&update.id)
        .map(|cached| classify_tool(&cached.name))
        .unwrap_or(ToolKind::ReadLike);

    vec![OuterNotification::new(
        format!("item/{}/delta", outer_item_type(kind)),
        json!({"threadId": thread_id, "turnId": turn_id, "itemId": update.id, "delta": update.delta}),
    )]
}

fn translate_tool_start(start: ToolExecutionStart, state: &mut TurnState, thread_id: &Value, turn_id: &Value) -> Vec<OuterNotification> {
    let kind = classify_tool(&start.name);
    state.cache_tool_args(start.id.clone(), start.name.clone(), start.args.clone());

    let item = match kind {
        ToolKind::Command => json!({
            "id": start.id,
            "type": "commandExecution",
            "phase": "inProgress",
            "command": start.args.get("command").and_then(Value::as_str).unwrap_or_default(),
        }),
        ToolKind::FileChange { kind } => {
            let path = start.args.get("path").and_then(Value::as_str).unwrap_or_default();
            json!({
                "id": start.id,
                "type": "fileChange",
                "phase": "inProgress",
                "changes": [{"path": path, "kind": kind}],
            })
        }
        ToolKind::ReadLike => json!({
            "id": start.id,
            "type": "commandExecution",
            "phase": "inProgress",
            "command": synthesize_display(&start.name, &start.args),
        }),
    };

    vec![OuterNotification::new(
        "item/started",
        json!({"threadId": thread_id, "turnId": turn_id, "item": item}),
    )]
}

fn translate_tool_end(
    end: ToolExecutionEnd,
    state: &mut TurnState,
    diffs: &mut DiffAccumulator,
    thread_id: &Value,
    turn_id: &Value,
) -> Vec<OuterNotification> {
    let cached = state.take_cached_tool_args(&end.id);
    let (name, args) = match &cached {
        Some(c) => (c.name.clone(), c.args.clone()),
        None => (String::new(), Value::Null),
    };
    let kind = classify_tool(&name);
    let exit_code = if end.is_error { 1 } else { 0 };
    let output_text = end.result.as_ref().map(|r| r.text()).unwrap_or_default();

    let mut notifications = Vec::new();

    match kind {
        ToolKind::FileChange { kind: change_kind } => {
            let path = args.get("path").and_then(Value::as_str).unwrap_or_default();
            let is_create = change_kind == "create";
            let fragment = build_fragment(path, end.diff.as_deref(), is_create, Some(output_text.as_str()).filter(|t| !t.is_empty()));

            let change = json!({
                "path": path,
                "kind": change_kind,
                "diff": fragment.clone(),
            });
            notifications.push(OuterNotification::new(
                "item/completed",
                json!({
                    "threadId": thread_id,
                    "turnId": turn_id,
                    "item": {
                        "id": end.id,
                        "type": "fileChange",
                        "phase": "completed",
                        "exitCode": exit_code,
                        "changes": [change],
                    },
                }),
            ));
            if let Some(fragment) = fragment {
                diffs.push(fragment);
                notifications.push(OuterNotification::new(
                    "turn/diff/updated",
                    json!({"threadId": thread_id, "turnId": turn_id, "diff": diffs.joined()}),
                ));
            }
        }
        _ => {
            notifications.push(OuterNotification::new(
                "item/completed",
                json!({
                    "threadId": thread_id,
                    "turnId": turn_id,
                    "item": {
                        "id": end.id,
                        "type": "commandExecution",
                        "phase": "completed",
                        "output": output_text,
                        "exitCode": exit_code,
                    },
                }),
            ));
        }
    }

    notifications
}
