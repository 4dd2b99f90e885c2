// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Outer wire codec (`spec.md` §4.1, §6).
//!
//! Line-oriented JSON, one value per line. A line is a request (`id` +
//! `method`), a response (`id` + `result` or `error`), or a notification
//! (`method`, no `id`). Decode tolerates a missing protocol-version marker
//! by backfilling it; encode always stamps one. Lines that fail to decode
//! are logged and dropped — never fatal — mirroring the "never crash" rule
//! `sven_node::control::service` applies to malformed operator commands.
//!
//! Grounded on `sven_node::control::protocol`'s tagged-enum encode/decode
//! pair, adapted from CBOR-over-P2P to newline-JSON-over-stdio and from a
//! single tagged enum to the three-shape (request/response/notification)
//! classification the outer dialect needs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

pub const PROTOCOL_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OuterError {
    pub code: i64,
    pub message: String,
}

/// One decoded inbound line, classified by the fields present.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Response {
        id: Value,
        result: Option<Value>,
        error: Option<OuterError>,
    },
    Notification {
        method: String,
        params: Value,
    },
}

/// Decode one line of inbound text.
///
/// Returns `Ok(None)` for a blank line (ignored per §4.1). Returns
/// `Err` only for lines that fail to parse as JSON at all or that match
/// none of the three outer shapes; callers should log and drop on `Err`,
/// never treat it as fatal.
pub fn decode_line(line: &str) -> Result<Option<InboundMessage>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let mut value: Value = serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
    if let Value::Object(map) = &mut value {
        map.entry("protocolVersion")
            .or_insert_with(|| Value::String(PROTOCOL_VERSION.to_string()));
    } else {
        return Err("top-level JSON value must be an object".to_string());
    }

    classify(value).map(Some)
}

fn classify(value: Value) -> Result<InboundMessage, String> {
    let obj = value.as_object().ok_or("not a JSON object")?;
    let has_id = obj.contains_key("id");
    let has_method = obj.contains_key("method");
    let has_result_or_error = obj.contains_key("result") || obj.contains_key("error");

    if has_id && has_method {
        let id = obj.get("id").cloned().unwrap_or(Value::Null);
        let method = obj
            .get("method")
            .and_then(|v| v.as_str())
            .ok_or("method must be a string")?
            .to_string();
        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        Ok(InboundMessage::Request { id, method, params })
    } else if has_id && has_result_or_error {
        let id = obj.get("id").cloned().unwrap_or(Value::Null);
        let result = obj.get("result").cloned();
        let error = obj
            .get("error")
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e: serde_json::Error| e.to_string())?;
        Ok(InboundMessage::Response { id, result, error })
    } else if has_method {
        let method = obj
            .get("method")
            .and_then(|v| v.as_str())
            .ok_or("method must be a string")?
            .to_string();
        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        Ok(InboundMessage::Notification { method, params })
    } else {
        Err("line matches no outer shape (request/response/notification)".to_string())
    }
}

/// Writes outer wire values to an async sink, flushing after every line.
pub struct WireWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> WireWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_response_ok(&mut self, id: Value, result: Value) -> std::io::Result<()> {
        self.write_value(serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "id": id,
            "result": result,
        }))
        .await
    }

    pub async fn write_response_err(&mut self, id: Value, error: OuterError) -> std::io::Result<()> {
        self.write_value(serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "id": id,
            "error": error,
        }))
        .await
    }

    pub async fn write_notification(&mut self, method: &str, params: Value) -> std::io::Result<()> {
        self.write_value(serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "method": method,
            "params": params,
        }))
        .await
    }

    async fn write_value(&mut self, value: Value) -> std::io::Result<()> {
        let mut line = serde_json::to_string(&value).expect("wire values always serialize");
        line.push('\n');
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await
    }
}

/// Logs and drops a line that failed to decode. Kept as a free function so
/// the reader task's `match` arm reads as one line, matching the
/// `sven_node::control::service` style of "ignore with a `warn!` and move on".
pub fn log_decode_failure(line: &str, err: &str) {
    warn!(line, error = err, "dropping malformed outer line");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_is_ignored() {
        assert!(decode_line("").unwrap().is_none());
        assert!(decode_line("   \n").unwrap().is_none());
    }

    #[test]
    fn request_is_classified() {
        let msg = decode_line(r#"{"id":1,"method":"initialize"}"#).unwrap().unwrap();
        match msg {
            InboundMessage::Request { id, method, .. } => {
                assert_eq!(id, Value::from(1));
                assert_eq!(method, "initialize");
            }
            other => panic!("expected Request, got {other:?}"),
        }
    }

    #[test]
    fn response_is_classified() {
        let msg = decode_line(r#"{"id":5,"result":{"ok":true}}"#).unwrap().unwrap();
        assert!(matches!(msg, InboundMessage::Response { result: Some(_), error: None, .. }));
    }

    #[test]
    fn response_with_error_is_classified() {
        let msg = decode_line(r#"{"id":5,"error":{"code":-1,"message":"boom"}}"#)
            .unwrap()
            .unwrap();
        match msg {
            InboundMessage::Response { error: Some(e), .. } => {
                assert_eq!(e.code, -1);
                assert_eq!(e.message, "boom");
            }
            other => panic!("expected Response with error, got {other:?}"),
        }
    }

    #[test]
    fn notification_is_classified() {
        let msg = decode_line(r#"{"method":"turn/started","params":{}}"#).unwrap().unwrap();
        assert!(matches!(msg, InboundMessage::Notification { .. }));
    }

    #[test]
    fn missing_protocol_version_is_backfilled_without_changing_shape() {
        // No protocolVersion field present — must still classify correctly.
        let msg = decode_line(r#"{"id":1,"method":"initialize","params":{}}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(msg, InboundMessage::Request { .. }));
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        assert!(decode_line("{not json").is_err());
    }

    #[test]
    fn non_object_top_level_is_an_error() {
        assert!(decode_line("[1,2,3]").is_err());
    }

    #[test]
    fn shapeless_object_is_an_error() {
        assert!(decode_line(r#"{"foo":"bar"}"#).is_err());
    }

    #[tokio::test]
    async fn writer_emits_newline_terminated_protocol_stamped_lines() {
        let mut buf = Vec::new();
        {
            let mut w = WireWriter::new(&mut buf);
            w.write_response_ok(Value::from(1), serde_json::json!({"ok": true}))
                .await
                .unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert!(text.ends_with('\n'));
        let value: Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(value["id"], 1);
    }
}
