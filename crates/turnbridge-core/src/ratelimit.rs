// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Rate-limit probe (`spec.md` §4.8).
//!
//! Reads the first present OAuth credential file from a fixed search list,
//! rejects an expired token, and performs an HTTPS usage query, mapping the
//! response onto the outer rate-limit shape. Any failure anywhere in this
//! path — missing file, expired token, non-2xx response, malformed body —
//! collapses to the same null-valued shape (`spec.md` §7 "Probe error").
//!
//! Grounded on `sven_node::crypto::token`'s on-disk credential file
//! load/verify pattern (`anyhow::Context`-chained I/O, `serde` structs
//! mirroring the file's JSON/YAML shape), adapted from a locally-generated
//! bearer token to a foreign OAuth provider's access/refresh/expiry triple.

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

const USAGE_ENDPOINT: &str = "https://api.anthropic.com/api/oauth/usage";
const BETA_HEADER_VALUE: &str = "oauth-2025-04-20";
const BRIDGE_USER_AGENT: &str = concat!("turnbridge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Deserialize)]
struct PiAgentAuthFile {
    anthropic: PiAgentAnthropicBlock,
}

#[derive(Debug, Clone, Deserialize)]
struct PiAgentAnthropicBlock {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
    expires: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct ClaudeCredentialsFile {
    #[serde(rename = "claudeAiOauth")]
    claude_ai_oauth: ClaudeOauthBlock,
}

#[derive(Debug, Clone, Deserialize)]
struct ClaudeOauthBlock {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(default, rename = "refreshToken")]
    refresh_token: Option<String>,
    #[serde(rename = "expiresAt")]
    expires_at: i64,
}

#[derive(Debug, Clone)]
struct Credentials {
    access_token: String,
    expires_at_ms: i64,
}

fn credential_search_paths(home: &std::path::Path) -> Vec<PathBuf> {
    vec![home.join(".pi/agent/auth.json"), home.join(".claude/.credentials.json")]
}

fn parse_credentials(path: &std::path::Path, raw: &str) -> Result<Credentials, BridgeError> {
    if path.ends_with(".pi/agent/auth.json") || path.to_string_lossy().ends_with("auth.json") {
        if let Ok(file) = serde_json::from_str::<PiAgentAuthFile>(raw) {
            return Ok(Credentials {
                access_token: file.anthropic.access,
                expires_at_ms: file.anthropic.expires,
            });
        }
    }
    if let Ok(file) = serde_json::from_str::<ClaudeCredentialsFile>(raw) {
        return Ok(Credentials {
            access_token: file.claude_ai_oauth.access_token,
            expires_at_ms: file.claude_ai_oauth.expires_at,
        });
    }
    Err(BridgeError::Probe(format!("unrecognized credential file shape at {}", path.display())))
}

fn load_credentials() -> Result<Credentials, BridgeError> {
    let home = dirs::home_dir().ok_or_else(|| BridgeError::Probe("no home directory".to_string()))?;
    for path in credential_search_paths(&home) {
        if let Ok(raw) = std::fs::read_to_string(&path) {
            return parse_credentials(&path, &raw);
        }
    }
    Err(BridgeError::Probe("no credential file present".to_string()))
}

fn is_expired(expires_at_ms: i64, now_ms: i64) -> bool {
    expires_at_ms <= now_ms
}

#[derive(Debug, Clone, Deserialize)]
struct WindowUsageResponse {
    utilization: f64,
    #[serde(rename = "resetsAt")]
    resets_at: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ExtraUsageResponse {
    #[serde(rename = "hasCredits")]
    has_credits: bool,
    #[serde(rename = "monthlyLimit")]
    monthly_limit: Option<f64>,
    #[serde(rename = "usedCredits")]
    used_credits: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct UsageResponse {
    #[serde(rename = "fiveHour")]
    five_hour: Option<WindowUsageResponse>,
    #[serde(rename = "sevenDay")]
    seven_day: Option<WindowUsageResponse>,
    #[serde(rename = "extraUsage")]
    extra_usage: Option<ExtraUsageResponse>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct RateLimitBucket {
    pub utilization: f64,
    #[serde(rename = "resetsAt")]
    pub resets_at: String,
    #[serde(rename = "windowMinutes")]
    pub window_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CreditsBucket {
    #[serde(rename = "hasCredits")]
    pub has_credits: bool,
    pub unlimited: bool,
    pub balance: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct RateLimits {
    pub primary: Option<RateLimitBucket>,
    pub secondary: Option<RateLimitBucket>,
    pub credits: Option<CreditsBucket>,
}

impl RateLimits {
    pub fn empty() -> Self {
        Self::default()
    }
}

fn map_usage(body: UsageResponse) -> RateLimits {
    let primary = body.five_hour.map(|w| RateLimitBucket {
        utilization: w.utilization,
        resets_at: w.resets_at,
        window_minutes: 300,
    });
    let secondary = body.seven_day.map(|w| RateLimitBucket {
        utilization: w.utilization,
        resets_at: w.resets_at,
        window_minutes: 10_080,
    });
    let credits = body.extra_usage.map(|extra| {
        let balance = match (extra.monthly_limit, extra.used_credits) {
            (Some(limit), Some(used)) => Some(format!("{:.2}", (limit - used) / 100.0)),
            _ => None,
        };
        CreditsBucket {
            has_credits: extra.has_credits,
            unlimited: false,
            balance,
        }
    });
    RateLimits { primary, secondary, credits }
}

/// Reports which provider(s) have a usable credential file on disk, and
/// whether each one's token is expired, for `auth/status` (§4.7). Only
/// `anthropic` is ever discoverable this way — both credential file shapes
/// on the search list carry Anthropic OAuth tokens.
pub fn credential_status() -> Vec<(String, bool)> {
    let home = match dirs::home_dir() {
        Some(h) => h,
        None => return vec![],
    };
    for path in credential_search_paths(&home) {
        if let Ok(raw) = std::fs::read_to_string(&path) {
            if let Ok(creds) = parse_credentials(&path, &raw) {
                let now_ms = chrono::Utc::now().timestamp_millis();
                return vec![("anthropic".to_string(), is_expired(creds.expires_at_ms, now_ms))];
            }
        }
    }
    vec![]
}

/// Runs the full probe, collapsing any failure to the null-valued shape —
/// callers never see an error from this function (§4.8, §7).
pub async fn probe(client: &reqwest::Client) -> RateLimits {
    match probe_inner(client).await {
        Ok(limits) => limits,
        Err(e) => {
            warn!(error = %e, "rate limit probe failed, returning null-valued shape");
            RateLimits::empty()
        }
    }
}

async fn probe_inner(client: &reqwest::Client) -> Result<RateLimits, BridgeError> {
    let creds = load_credentials()?;
    let now_ms = chrono::Utc::now().timestamp_millis();
    if is_expired(creds.expires_at_ms, now_ms) {
        return Err(BridgeError::Probe("credential token expired".to_string()));
    }

    let response = client
        .get(USAGE_ENDPOINT)
        .bearer_auth(&creds.access_token)
        .header("anthropic-beta", BETA_HEADER_VALUE)
        .header(reqwest::header::USER_AGENT, BRIDGE_USER_AGENT)
        .send()
        .await
        .map_err(|e| BridgeError::Probe(e.to_string()))?;

    if !response.status().is_success() {
        return Err(BridgeError::Probe(format!("usage endpoint returned {}", response.status())));
    }

    let body: UsageResponse = response.json().await.map_err(|e| BridgeError::Probe(e.to_string()))?;
    Ok(map_usage(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pi_agent_auth_file() {
        let raw = r#"{"anthropic":{"access":"tok","refresh":"ref","expires":1999999999999}}"#;
        let creds = parse_credentials(std::path::Path::new("/home/u/.pi/agent/auth.json"), raw).unwrap();
        assert_eq!(creds.access_token, "tok");
        assert_eq!(creds.expires_at_ms, 1999999999999);
    }

    #[test]
    fn parses_claude_credentials_file() {
        let raw = r#"{"claudeAiOauth":{"accessToken":"tok","refreshToken":"ref","expiresAt":1999999999999}}"#;
        let creds = parse_credentials(std::path::Path::new("/home/u/.claude/.credentials.json"), raw).unwrap();
        assert_eq!(creds.access_token, "tok");
    }

    #[test]
    fn unrecognized_shape_is_a_probe_error() {
        let raw = r#"{"nonsense":true}"#;
        assert!(parse_credentials(std::path::Path::new("/tmp/x.json"), raw).is_err());
    }

    #[test]
    fn expiry_check_is_inclusive_of_now() {
        assert!(is_expired(1000, 1000));
        assert!(is_expired(999, 1000));
        assert!(!is_expired(1001, 1000));
    }

    #[test]
    fn no_credential_files_present_yields_probe_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = credential_search_paths(dir.path());
        assert!(paths.iter().all(|p| !p.exists()));
    }

    #[test]
    fn maps_full_usage_response_to_buckets() {
        let body: UsageResponse = serde_json::from_str(
            r#"{
                "fiveHour": {"utilization": 0.42, "resetsAt": "2026-07-27T12:00:00Z"},
                "sevenDay": {"utilization": 0.10, "resetsAt": "2026-08-01T00:00:00Z"},
                "extraUsage": {"hasCredits": true, "monthlyLimit": 5000.0, "usedCredits": 1234.0}
            }"#,
        )
        .unwrap();
        let limits = map_usage(body);
        let primary = limits.primary.unwrap();
        assert_eq!(primary.window_minutes, 300);
        let secondary = limits.secondary.unwrap();
        assert_eq!(secondary.window_minutes, 10_080);
        let credits = limits.credits.unwrap();
        assert_eq!(credits.balance.as_deref(), Some("37.66"));
    }

    #[test]
    fn missing_extra_usage_fields_yields_no_balance() {
        let body: UsageResponse = serde_json::from_str(r#"{"extraUsage": {"hasCredits": false}}"#).unwrap();
        let limits = map_usage(body);
        assert_eq!(limits.credits.unwrap().balance, None);
    }

    #[test]
    fn empty_shape_serializes_with_null_buckets() {
        let limits = RateLimits::empty();
        let json = serde_json::to_value(&limits).unwrap();
        assert_eq!(json, serde_json::json!({"primary": null, "secondary": null, "credits": null}));
    }
}
