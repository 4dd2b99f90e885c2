// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Turn and thread state machine (`spec.md` §3, §4.5).
//!
//! Tracks which thread is current, which turn (if any) is in flight, and
//! the per-turn item bookkeeping the translator needs: the live assistant
//! message id, the fixed reasoning sentinel, and the tool-args cache.
//! Exists as a plain struct with `&mut self` transitions rather than a
//! trait object or a state-per-type encoding — matches the single owning
//! session value the design notes (`spec.md` §9) call for: no
//! implicit process-wide globals, one struct holding everything a handler
//! needs to mutate.
//!
//! Grounded on `sven_core::session::Session`'s plain-struct-with-methods
//! shape (token accounting mutated through `&mut self` methods, not a
//! typestate or actor).

use crate::ids::{ItemId, ThreadId, TurnId};
use serde_json::Value;
use std::collections::HashMap;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    TurnStarting,
    InProgress,
    Completed,
    Errored,
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct Thread {
    pub id: ThreadId,
    pub name: Option<String>,
    pub created_at: SystemTime,
}

/// Cached (tool name, raw arguments) captured at `tool_execution_start`, so
/// `tool_execution_end` can be translated even when the agent doesn't echo
/// its arguments back (`spec.md` §3 "Tool-argument cache entry").
#[derive(Debug, Clone)]
pub struct CachedToolArgs {
    pub name: String,
    pub args: Value,
}

pub struct TurnState {
    pub current_thread: Option<Thread>,
    pub current_turn: Option<TurnId>,
    pub phase: TurnPhase,
    pub cwd: std::path::PathBuf,
    pub current_model_composite: String,
    pub current_provider: String,

    /// Live assistant-message item id, set at `message_start` and cleared
    /// at `message_end`.
    pub live_message_id: Option<ItemId>,
    /// Fixed per-turn sentinel for the reasoning item (§4.6 "Identifier
    /// discipline": reasoning does not interleave with itself).
    pub reasoning_item_id: Option<ItemId>,
    pub tool_args_cache: HashMap<String, CachedToolArgs>,
}

impl TurnState {
    pub fn new(cwd: std::path::PathBuf, default_model_composite: impl Into<String>, default_provider: impl Into<String>) -> Self {
        Self {
            current_thread: None,
            current_turn: None,
            phase: TurnPhase::Idle,
            cwd,
            current_model_composite: default_model_composite.into(),
            current_provider: default_provider.into(),
            live_message_id: None,
            reasoning_item_id: None,
            tool_args_cache: HashMap::new(),
        }
    }

    pub fn start_thread(&mut self, name: Option<String>, created_at: SystemTime) -> ThreadId {
        let id = ThreadId::new();
        self.current_thread = Some(Thread {
            id: id.clone(),
            name,
            created_at,
        });
        id
    }

    pub fn archive_thread(&mut self) {
        self.current_thread = None;
    }

    /// Begins a new turn: allocates its id, clears per-turn item state. The
    /// diff accumulator is reset by the caller (it is owned separately —
    /// see `diff::DiffAccumulator`).
    pub fn start_turn(&mut self) -> TurnId {
        let id = TurnId::new();
        self.current_turn = Some(id.clone());
        self.phase = TurnPhase::TurnStarting;
        self.live_message_id = None;
        self.reasoning_item_id = None;
        self.tool_args_cache.clear();
        id
    }

    pub fn mark_in_progress(&mut self) {
        if self.phase == TurnPhase::TurnStarting {
            self.phase = TurnPhase::InProgress;
        }
    }

    pub fn complete_turn(&mut self) {
        self.phase = TurnPhase::Completed;
        self.current_turn = None;
        self.live_message_id = None;
        self.reasoning_item_id = None;
    }

    pub fn error_turn(&mut self) {
        self.phase = TurnPhase::Errored;
        self.current_turn = None;
    }

    pub fn interrupt_turn(&mut self) {
        self.phase = TurnPhase::Interrupted;
        self.current_turn = None;
    }

    pub fn is_idle(&self) -> bool {
        self.current_turn.is_none()
    }

    pub fn begin_assistant_message(&mut self) -> ItemId {
        let id = ItemId::new();
        self.live_message_id = Some(id.clone());
        id
    }

    /// Returns the live message id, or synthesizes a fresh one if
    /// `message_end` arrives with no prior `message_start` (§4.6, §8 #10).
    pub fn take_or_synthesize_message_id(&mut self) -> ItemId {
        self.live_message_id.take().unwrap_or_else(ItemId::new)
    }

    pub fn reasoning_id(&mut self) -> ItemId {
        if self.reasoning_item_id.is_none() {
            self.reasoning_item_id = Some(ItemId::new());
        }
        self.reasoning_item_id.clone().unwrap()
    }

    pub fn cache_tool_args(&mut self, tool_call_id: String, name: String, args: Value) {
        self.tool_args_cache.insert(tool_call_id, CachedToolArgs { name, args });
    }

    pub fn take_cached_tool_args(&mut self, tool_call_id: &str) -> Option<CachedToolArgs> {
        self.tool_args_cache.remove(tool_call_id)
    }

    /// Non-consuming lookup for mid-stream events (`tool_execution_update`)
    /// that need the cached tool's name without retiring the entry
    /// `tool_execution_end` still needs.
    pub fn peek_cached_tool_args(&self, tool_call_id: &str) -> Option<&CachedToolArgs> {
        self.tool_args_cache.get(tool_call_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> TurnState {
        TurnState::new(std::path::PathBuf::from("/tmp"), "anthropic/claude-sonnet-4-20250514", "anthropic")
    }

    #[test]
    fn start_turn_resets_per_turn_item_state() {
        let mut s = state();
        s.begin_assistant_message();
        s.cache_tool_args("t1".into(), "bash".into(), Value::Null);
        s.start_turn();
        assert!(s.live_message_id.is_none());
        assert!(s.tool_args_cache.is_empty());
        assert_eq!(s.phase, TurnPhase::TurnStarting);
    }

    #[test]
    fn message_end_without_start_synthesizes_fresh_id() {
        let mut s = state();
        let id = s.take_or_synthesize_message_id();
        assert!(!id.as_str().is_empty());
        assert!(s.live_message_id.is_none());
    }

    #[test]
    fn reasoning_id_is_stable_across_calls_within_a_turn() {
        let mut s = state();
        s.start_turn();
        let first = s.reasoning_id();
        let second = s.reasoning_id();
        assert_eq!(first, second);
    }

    #[test]
    fn tool_args_cache_round_trips() {
        let mut s = state();
        s.cache_tool_args("t1".into(), "write".into(), serde_json::json!({"path": "/f.txt"}));
        let cached = s.take_cached_tool_args("t1").unwrap();
        assert_eq!(cached.name, "write");
        assert!(s.take_cached_tool_args("t1").is_none());
    }

    #[test]
    fn peek_cached_tool_args_does_not_consume_the_entry() {
        let mut s = state();
        s.cache_tool_args("t1".into(), "write".into(), serde_json::json!({"path": "/f.txt"}));
        assert_eq!(s.peek_cached_tool_args("t1").unwrap().name, "write");
        assert_eq!(s.peek_cached_tool_args("t1").unwrap().name, "write");
        let taken = s.take_cached_tool_args("t1").unwrap();
        assert_eq!(taken.name, "write");
    }

    #[test]
    fn complete_turn_clears_current_turn() {
        let mut s = state();
        s.start_turn();
        assert!(!s.is_idle());
        s.complete_turn();
        assert!(s.is_idle());
    }
}
