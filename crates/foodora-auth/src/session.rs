//! Session record and the in-memory handle the orchestrator mutates
//!
//! The record is the only state that survives between CLI invocations. Core
//! code never touches the filesystem: it edits a [`SessionState`] and the
//! caller persists it through [`crate::SessionStore`] when
//! [`SessionState::is_dirty`] says so.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::constants::{DEFAULT_MARKET_KEY, EXPIRY_GRACE};
use crate::error::{Error, Result};
use crate::jwt;

/// Current time as unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// An MFA challenge that survived process exit.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChallenge {
    pub mfa_token: String,
    pub channel: String,
    pub email: String,
    /// Unix milliseconds.
    pub created_at: u64,
}

impl fmt::Debug for PendingChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingChallenge")
            .field("mfa_token", &"[REDACTED]")
            .field("channel", &self.channel)
            .field("email", &self.email)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Persisted foodora session.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    /// Absolute expiry, unix milliseconds. Derived from the access token when
    /// absent.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_millis"
    )]
    pub expires_at: Option<u64>,
    /// Client id the token pair (and cached secret) belongs to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oauth_client_id: String,
    /// Last-known-good secret for `oauth_client_id`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_challenge: Option<PendingChallenge>,
    /// Lower-cased host -> raw `Cookie` header.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies_by_host: BTreeMap<String, String>,
    #[serde(default)]
    pub device_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http_user_agent: String,
}

/// Older session files stored a timestamp string here; anything that is not
/// a positive integer is dropped and re-derived from the access token.
fn lenient_millis<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<u64>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_u64()).filter(|ms| *ms > 0))
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |s: &str| if s.is_empty() { "" } else { "[REDACTED]" };
        f.debug_struct("SessionRecord")
            .field("access_token", &mask(&self.access_token))
            .field("refresh_token", &mask(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .field("oauth_client_id", &self.oauth_client_id)
            .field("client_secret", &mask(&self.client_secret))
            .field("pending_challenge", &self.pending_challenge)
            .field("cookie_hosts", &self.cookies_by_host.keys().collect::<Vec<_>>())
            .field("device_id", &self.device_id)
            .field("http_user_agent", &self.http_user_agent)
            .finish()
    }
}

impl SessionRecord {
    /// Both tokens present.
    pub fn has_session(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }

    /// Stored expiry, or the access token's `exp` claim when none is stored.
    pub fn effective_expiry(&self) -> Option<u64> {
        self.expires_at.or_else(|| jwt::expiry_millis(&self.access_token))
    }

    /// True when the access token is missing, expired, or expires within the
    /// grace window. A token with no known expiry is assumed valid.
    pub fn token_likely_expired(&self, now_ms: u64) -> bool {
        if self.access_token.is_empty() {
            return true;
        }
        match self.effective_expiry() {
            Some(expires_at) => {
                now_ms.saturating_add(EXPIRY_GRACE.as_millis() as u64) >= expires_at
            }
            None => false,
        }
    }

    /// Stored cookie header for `host`, if any.
    pub fn cookie_header_for(&self, host: &str) -> Option<&str> {
        self.cookies_by_host
            .get(&host.to_ascii_lowercase())
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
    }

    pub fn store_cookies(&mut self, host: &str, cookie_header: &str) {
        self.cookies_by_host
            .insert(host.to_ascii_lowercase(), cookie_header.trim().to_string());
    }

    /// Forget tokens and expiry. Client binding, secret cache and cookies stay.
    pub fn clear_tokens(&mut self) {
        self.access_token.clear();
        self.refresh_token.clear();
        self.expires_at = None;
    }

    pub fn clear_pending(&mut self) {
        self.pending_challenge = None;
    }
}

/// Non-secret provider settings from `ordercli.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSettings {
    pub base_url: String,
    pub target_country_iso: String,
    pub global_entity_id: String,
}

impl ProviderSettings {
    /// The configured base URL, or a configuration error naming the fix.
    pub fn require_base_url(&self) -> Result<&str> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(Error::MissingConfig {
                field: "base_url",
                remedy: "set [foodora] base_url in ordercli.toml",
            });
        }
        Ok(base)
    }

    /// Lower-cased host of the base URL.
    pub fn cookie_host(&self) -> Option<String> {
        let url = Url::parse(self.base_url.trim()).ok()?;
        url.host_str()
            .map(str::to_ascii_lowercase)
            .filter(|h| !h.is_empty())
    }

    /// Austrian market, served by the mjam app and its own Firebase project.
    pub fn is_mjam_market(&self) -> bool {
        self.target_country_iso.trim().eq_ignore_ascii_case("AT")
            || self
                .global_entity_id
                .trim()
                .to_ascii_uppercase()
                .starts_with("MJM_")
            || self.base_url.to_ascii_lowercase().contains("mj.fd-api.com")
    }

    /// Upper-case keys to try in the remote `client_secrets` map, in order.
    pub fn market_key_candidates(&self) -> Vec<String> {
        let mut keys = Vec::new();

        if let Some(host) = self.cookie_host().filter(|h| h.ends_with(".fd-api.com")) {
            let sub = host.split('.').next().unwrap_or_default();
            if !sub.is_empty() {
                keys.push(sub.to_ascii_uppercase());
            }
        }

        let iso = self.target_country_iso.trim().to_ascii_uppercase();
        if !iso.is_empty() {
            keys.push(iso);
        }

        let mut out: Vec<String> = Vec::with_capacity(keys.len());
        for key in keys {
            if !out.contains(&key) {
                out.push(key);
            }
        }
        if out.is_empty() {
            out.push(DEFAULT_MARKET_KEY.to_string());
        }
        out
    }
}

/// Mutable handle over the session record with a single change signal.
#[derive(Debug, Default)]
pub struct SessionState {
    record: SessionRecord,
    dirty: bool,
}

impl SessionState {
    pub fn new(record: SessionRecord) -> Self {
        Self {
            record,
            dirty: false,
        }
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    /// Mutable access; marks the state as changed.
    pub fn edit(&mut self) -> &mut SessionRecord {
        self.dirty = true;
        &mut self.record
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Call after the record has been persisted.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn into_record(self) -> SessionRecord {
        self.record
    }
}
