// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Command correlator (`spec.md` §4.3, §9).
//!
//! Every command sent to the agent gets a freshly generated id and a method
//! tag; the correlator holds a completion sink keyed by that id until a
//! matching response arrives. Re-architects the source's callback-driven
//! futures into a plain map awaited by `oneshot::Receiver`s — the reader
//! task only routes, it never blocks, matching the design note in
//! `spec.md` §9.
//!
//! Grounded on `sven_node::control::service::ControlService`'s
//! `completion_tx`/`completion_rx` pending-request bookkeeping, narrowed
//! from a broadcast-based session map to a plain id-keyed oneshot map.

use std::collections::HashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

pub type CommandOutcome = Result<serde_json::Value, String>;

#[derive(Default)]
pub struct Correlator {
    pending: HashMap<String, (&'static str, oneshot::Sender<CommandOutcome>)>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a fresh id for a command tagged `tag`, returning it alongside
    /// the receiver the caller should await.
    pub fn register(&mut self, tag: &'static str) -> (String, oneshot::Receiver<CommandOutcome>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), (tag, tx));
        (id, rx)
    }

    /// Resolves the sink for `id` against an inner response. Returns `false`
    /// if no sink is pending for that id — the response is unmatched and the
    /// caller should log and discard it (§4.3).
    pub fn fulfil(&mut self, id: &str, success: bool, data: Option<serde_json::Value>, error: Option<String>) -> bool {
        match self.pending.remove(id) {
            Some((_, tx)) => {
                let outcome = if success {
                    Ok(data.unwrap_or(serde_json::Value::Null))
                } else {
                    Err(error.unwrap_or_else(|| "agent reported failure".to_string()))
                };
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Rejects every pending sink, e.g. when the supervisor tears the
    /// subprocess down. Receivers that are no longer awaited (already
    /// dropped) are silently skipped.
    pub fn reject_all(&mut self, message: &str) {
        for (_, (_, tx)) in self.pending.drain() {
            let _ = tx.send(Err(message.to_string()));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fulfil_resolves_the_matching_receiver() {
        let mut correlator = Correlator::new();
        let (id, rx) = correlator.register("set_model");
        assert_eq!(correlator.pending_count(), 1);

        assert!(correlator.fulfil(&id, true, Some(serde_json::json!({"ok": true})), None));
        assert_eq!(correlator.pending_count(), 0);

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap(), serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn fulfil_with_failure_rejects_the_receiver() {
        let mut correlator = Correlator::new();
        let (id, rx) = correlator.register("prompt");
        correlator.fulfil(&id, false, None, Some("boom".to_string()));
        assert_eq!(rx.await.unwrap().unwrap_err(), "boom");
    }

    #[test]
    fn fulfil_on_unknown_id_is_a_no_op() {
        let mut correlator = Correlator::new();
        assert!(!correlator.fulfil("nonexistent", true, None, None));
    }

    #[tokio::test]
    async fn reject_all_rejects_every_pending_sink() {
        let mut correlator = Correlator::new();
        let (_, rx1) = correlator.register("prompt");
        let (_, rx2) = correlator.register("abort");
        correlator.reject_all("agent exited");
        assert_eq!(rx1.await.unwrap().unwrap_err(), "agent exited");
        assert_eq!(rx2.await.unwrap().unwrap_err(), "agent exited");
        assert_eq!(correlator.pending_count(), 0);
    }
}
