// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Request router (`spec.md` §4.7).
//!
//! Dispatches an outer request by method name to a handler that drives the
//! agent and/or synthesizes a response directly. Handlers return the
//! `result` payload for a successful response; the caller (the session run
//! loop) is responsible for writing it back with the request's id.
//!
//! Grounded on `sven_node::control::service::ControlService::handle_command`'s
//! per-variant `match` dispatch, widened from an internal operator command
//! set to the outer client's method-name-keyed requests.

use crate::error::BridgeError;
use crate::inner::InnerCommand;
use crate::registry::ModelEntry;
use crate::session::BridgeSession;
use serde_json::{json, Value};
use std::time::SystemTime;

const KNOWN_PROVIDERS: &[&str] = &["anthropic", "openai", "google", "mistral", "opencode"];

pub async fn dispatch(method: &str, params: Value, session: &mut BridgeSession) -> Result<Value, BridgeError> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": crate::wire::PROTOCOL_VERSION,
            "capabilities": {"threads": true, "turns": true, "models": true},
        })),

        "thread/start" => thread_start(params, session).await,
        "thread/resume" => thread_resume(params, session),
        "thread/list" => thread_list(session),
        "thread/archive" => thread_archive(session),

        "turn/start" => turn_start(params, session).await,
        "turn/interrupt" | "thread/interrupt" => turn_interrupt(session).await,

        "model/list" => model_list(session).await,
        "skills/list" => Ok(json!({"skills": []})),

        "account/rateLimits" | "account/rateLimits/read" => {
            let limits = crate::ratelimit::probe(&session.http).await;
            Ok(serde_json::to_value(limits).expect("rate limit shape always serializes"))
        }

        "codex/respondToRequest" => Ok(json!({"success": true})),

        "auth/status" => Ok(auth_status()),
        "auth/login" => Ok(json!({
            "success": false,
            "message": "interactive OAuth is not performed by the bridge; run the agent's CLI directly to authenticate",
        })),

        other => Err(BridgeError::MethodNotFound(other.to_string())),
    }
}

async fn thread_start(params: Value, session: &mut BridgeSession) -> Result<Value, BridgeError> {
    if let Some(cwd) = params.get("cwd").and_then(Value::as_str) {
        session.turn.cwd = std::path::PathBuf::from(cwd);
        session.supervisor.set_cwd(session.turn.cwd.clone());
    }
    let id = session.turn.start_thread(None, SystemTime::now());

    // Best-effort: errors from `new_session` are swallowed, matching the
    // source's behavior (spec.md §9 open question).
    let _ = session.send_command_fire_and_forget(InnerCommand::NewSession).await;

    Ok(json!({
        "thread": {
            "id": id.as_str(),
            "name": Value::Null,
            "createdAt": chrono::DateTime::<chrono::Utc>::from(SystemTime::now()).to_rfc3339(),
        }
    }))
}

fn thread_resume(params: Value, session: &mut BridgeSession) -> Result<Value, BridgeError> {
    if let Some(id) = params.get("threadId").and_then(Value::as_str) {
        session.turn.current_thread = Some(crate::turn::Thread {
            id: id.into(),
            name: None,
            created_at: SystemTime::now(),
        });
    }
    Ok(json!({"items": [], "status": "ready"}))
}

fn thread_list(session: &mut BridgeSession) -> Result<Value, BridgeError> {
    let threads = match &session.turn.current_thread {
        Some(t) => vec![json!({"id": t.id.as_str(), "name": t.name})],
        None => vec![],
    };
    Ok(json!({"threads": threads}))
}

fn thread_archive(session: &mut BridgeSession) -> Result<Value, BridgeError> {
    session.turn.archive_thread();
    Ok(json!({"success": true}))
}

async fn turn_start(params: Value, session: &mut BridgeSession) -> Result<Value, BridgeError> {
    let text = params
        .get("input")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(BridgeError::InvalidParams("turn/start requires non-empty text input".to_string()));
    }

    if let Some(model) = params.get("model").and_then(Value::as_str) {
        if model != session.turn.current_model_composite {
            let (provider, model_id) = session.registry.resolve(model);
            session
                .send_command(InnerCommand::SetModel {
                    provider: provider.clone(),
                    model_id: model_id.clone(),
                })
                .await?;
            session.turn.current_provider = provider;
            session.turn.current_model_composite = format!("{}/{}", session.turn.current_provider, model_id);
        }
    }

    let turn_id = session.turn.start_turn();
    session.diffs.reset();

    session.send_command_fire_and_forget(InnerCommand::Prompt { message: text }).await?;

    Ok(json!({"turnId": turn_id.as_str(), "status": "inProgress"}))
}

async fn turn_interrupt(session: &mut BridgeSession) -> Result<Value, BridgeError> {
    if session.turn.is_idle() {
        return Ok(json!({"success": true}));
    }
    let _ = session.send_command_fire_and_forget(InnerCommand::Abort).await;
    session.turn.interrupt_turn();
    Ok(json!({"success": true}))
}

async fn model_list(session: &mut BridgeSession) -> Result<Value, BridgeError> {
    let entries = match session.send_command(InnerCommand::GetAvailableModels).await {
        Ok(data) => {
            let parsed = parse_model_entries(&data);
            session.registry.populate(parsed);
            session.registry.entries().cloned().collect::<Vec<_>>()
        }
        Err(_) => fallback_models(),
    };

    let models: Vec<Value> = entries
        .iter()
        .map(|entry| {
            let efforts: Vec<&str> = if entry.reasoning_capable {
                vec!["low", "medium", "high"]
            } else {
                vec!["default"]
            };
            json!({
                "id": entry.composite(),
                "displayName": entry.display_name,
                "provider": entry.provider,
                "supportedReasoningEfforts": efforts,
                "defaultReasoningEffort": entry.default_reasoning,
                "isDefault": entry.composite() == session.turn.current_model_composite,
            })
        })
        .collect();

    Ok(json!({"models": models}))
}

fn parse_model_entries(data: &Value) -> Vec<ModelEntry> {
    data.get("models")
        .or(Some(data))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let provider = item.get("provider").and_then(Value::as_str)?.to_string();
                    let model_id = item.get("modelId").and_then(Value::as_str)?.to_string();
                    Some(ModelEntry {
                        display_name: item
                            .get("displayName")
                            .and_then(Value::as_str)
                            .unwrap_or(&model_id)
                            .to_string(),
                        reasoning_capable: item.get("reasoningCapable").and_then(Value::as_bool).unwrap_or(false),
                        default_reasoning: item
                            .get("defaultReasoning")
                            .and_then(Value::as_str)
                            .unwrap_or("default")
                            .to_string(),
                        provider,
                        model_id,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn fallback_models() -> Vec<ModelEntry> {
    vec![
        ModelEntry {
            provider: "anthropic".into(),
            model_id: "claude-sonnet-4-20250514".into(),
            display_name: "Claude Sonnet 4".into(),
            reasoning_capable: true,
            default_reasoning: "medium".into(),
        },
        ModelEntry {
            provider: "openai".into(),
            model_id: "gpt-5".into(),
            display_name: "GPT-5".into(),
            reasoning_capable: true,
            default_reasoning: "medium".into(),
        },
    ]
}

fn auth_status() -> Value {
    let present = crate::ratelimit::credential_status();
    let mut entries: Vec<Value> = present
        .iter()
        .map(|(provider, expired)| json!({"provider": provider, "authenticated": true, "expired": expired}))
        .collect();

    let seen: Vec<&str> = present.iter().map(|(provider, _)| provider.as_str()).collect();
    for provider in KNOWN_PROVIDERS {
        if !seen.contains(provider) {
            entries.push(json!({"provider": provider, "authenticated": false}));
        }
    }
    json!({"providers": entries})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_models_includes_the_session_default_composite() {
        // `model_list` computes `isDefault` by comparing against
        // `session.turn.current_model_composite`, so the fallback set must
        // contain exactly that composite for one entry to ever report it.
        let models = fallback_models();
        assert_eq!(models.iter().filter(|m| m.composite() == "anthropic/claude-sonnet-4-20250514").count(), 1);
    }

    #[test]
    fn parse_model_entries_skips_malformed_items() {
        let data = json!({"models": [{"provider": "anthropic"}, {"provider": "openai", "modelId": "gpt-5"}]});
        let parsed = parse_model_entries(&data);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].model_id, "gpt-5");
    }

    fn new_session() -> BridgeSession {
        let (session, _rx) = BridgeSession::new(std::path::PathBuf::from("."));
        session
    }

    #[tokio::test]
    async fn initialize_reports_protocol_version_and_capabilities() {
        let mut session = new_session();
        let result = dispatch("initialize", Value::Null, &mut session).await.unwrap();
        assert_eq!(result["protocolVersion"], crate::wire::PROTOCOL_VERSION);
        assert_eq!(result["capabilities"]["threads"], true);
    }

    #[tokio::test]
    async fn thread_start_yields_a_thread_with_rfc3339_created_at() {
        let mut session = new_session();
        let result = dispatch("thread/start", json!({}), &mut session).await.unwrap();
        let created_at = result["thread"]["createdAt"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(created_at).is_ok());
        assert!(session.turn.current_thread.is_some());
    }

    #[tokio::test]
    async fn thread_archive_is_idempotent() {
        let mut session = new_session();
        dispatch("thread/start", json!({}), &mut session).await.unwrap();
        let first = dispatch("thread/archive", Value::Null, &mut session).await.unwrap();
        let second = dispatch("thread/archive", Value::Null, &mut session).await.unwrap();
        assert_eq!(first, second);
        assert!(session.turn.current_thread.is_none());
    }

    #[tokio::test]
    async fn turn_interrupt_on_idle_thread_is_a_no_op() {
        let mut session = new_session();
        assert!(session.turn.is_idle());
        let result = dispatch("turn/interrupt", Value::Null, &mut session).await.unwrap();
        assert_eq!(result["success"], true);
        assert!(session.turn.is_idle());
        assert!(session.agent.is_none());
    }

    #[tokio::test]
    async fn turn_start_with_blank_text_is_invalid_params_and_touches_no_agent() {
        let mut session = new_session();
        let err = dispatch("turn/start", json!({"input": [{"type": "text", "text": "   "}]}), &mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidParams(_)));
        assert!(session.agent.is_none());
    }

    #[tokio::test]
    async fn model_list_falls_back_to_defaults_when_agent_is_unavailable() {
        std::env::remove_var("TURNBRIDGE_AGENT_BIN");
        std::env::remove_var("TURNBRIDGE_AGENT_MONOREPO_BUILD");
        std::env::set_var("PATH", "/nonexistent/bin-for-router-tests");
        let mut session = new_session();
        let result = dispatch("model/list", Value::Null, &mut session).await.unwrap();
        let models = result["models"].as_array().unwrap();
        assert!(!models.is_empty());
        assert_eq!(models.iter().filter(|m| m["isDefault"] == true).count(), 1);
    }

    #[tokio::test]
    async fn rate_limits_with_no_credential_file_yields_null_buckets() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("HOME", dir.path());
        let mut session = new_session();
        let result = dispatch("account/rateLimits", Value::Null, &mut session).await.unwrap();
        assert_eq!(result, json!({"primary": null, "secondary": null, "credits": null}));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let mut session = new_session();
        let err = dispatch("not/a/real/method", Value::Null, &mut session).await.unwrap_err();
        assert!(matches!(err, BridgeError::MethodNotFound(_)));
    }
}
