// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bridge error taxonomy (`spec.md` §7).
//!
//! Library code returns `BridgeError`; only `main` deals in `anyhow::Result`.
//! Every variant maps to exactly one row of the taxonomy table so the
//! request router can turn it into either a response error (for a specific
//! request id) or a thread/turn-scoped `error` notification without
//! re-deriving the mapping at each call site.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed inbound line or missing required field.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Outer method name not recognized by the router.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// A command was sent to the agent while it was absent or exited, and
    /// the one respawn attempt also failed.
    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),

    /// The agent's response lacked correlation or reported `success: false`.
    #[error("agent protocol error: {0}")]
    AgentProtocol(String),

    /// Invalid request parameters (e.g. empty `turn/start` text).
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Rate-limit probe failure (absent credentials, expired token, non-2xx).
    #[error("rate limit probe error: {0}")]
    Probe(String),

    /// stdin closed or a stdout write failed — caller should terminate.
    #[error("fatal i/o error: {0}")]
    FatalIo(#[from] std::io::Error),
}

impl BridgeError {
    /// JSON-RPC-style numeric code for the outer wire's `error.code` field.
    pub fn code(&self) -> i64 {
        match self {
            BridgeError::Protocol(_) => -32700,
            BridgeError::MethodNotFound(_) => -32601,
            BridgeError::InvalidParams(_) => -32602,
            BridgeError::AgentUnavailable(_) => -32001,
            BridgeError::AgentProtocol(_) => -32002,
            BridgeError::Probe(_) => -32003,
            BridgeError::FatalIo(_) => -32000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_not_found_has_standard_code() {
        let e = BridgeError::MethodNotFound("foo/bar".into());
        assert_eq!(e.code(), -32601);
        assert!(e.to_string().contains("foo/bar"));
    }

    #[test]
    fn invalid_params_has_standard_code() {
        let e = BridgeError::InvalidParams("text is empty".into());
        assert_eq!(e.code(), -32602);
    }
}
