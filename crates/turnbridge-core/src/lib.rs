// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Protocol bridge core (`spec.md` §1-§9).
//!
//! Translates an outer client's thread/turn/item request-response and
//! notification dialect, carried as newline-delimited JSON over stdio, to
//! an inner agent's line-delimited JSON command/event dialect carried over
//! a spawned subprocess's pipes.
//!
//! Module layout mirrors the pieces the design notes call out as
//! independently named and testable (§3, §9): wire codec, inner protocol
//! types, diff accumulator, model registry, command correlator, agent
//! supervisor, turn/thread state machine, event translator, request
//! router, and rate-limit probe. `session` wires all of them into the
//! run loop that `main.rs` calls.

mod correlator;
mod diff;
mod error;
mod ids;
mod inner;
mod ratelimit;
mod registry;
mod router;
mod session;
mod supervisor;
mod translator;
mod turn;
mod wire;

pub use error::BridgeError;
pub use session::{run_stdio, BridgeSession};
