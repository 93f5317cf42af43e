//! Browser login fallback
//!
//! When the token endpoint rejects direct HTTP clients at the TLS or bot
//! protection layer, the same password grant can be replayed from inside a
//! real browser by an external helper. The helper reports the raw token
//! endpoint response, which is classified exactly like a direct response,
//! plus the cookies and user agent the browser ended up with.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::constants::DEFAULT_OTP_TIMEOUT;
use crate::error::{Error, Result};
use crate::subprocess::{HelperCommand, run_helper};
use crate::transport::{Outcome, PasswordGrant, classify_response, token_endpoint};

const HELPER: &str = "browser login";

/// Cookies and user agent learned by the browser, to be reused by direct
/// requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowserSession {
    pub host: String,
    pub cookie_header: String,
    pub user_agent: String,
}

#[derive(Serialize)]
struct BrowserRequest<'a> {
    base_url: &'a str,
    device_id: &'a str,
    email: &'a str,
    password: &'a str,
    client_secret: &'a str,
    client_id: &'a str,
    otp_method: &'a str,
    otp_code: &'a str,
    mfa_token: &'a str,
    timeout_millis: u64,
    profile_dir: String,
}

#[derive(Deserialize)]
struct BrowserOutput {
    status: u16,
    #[serde(default)]
    body: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    cookie_header: String,
    #[serde(default)]
    user_agent: String,
}

/// Runs password grants through the browser helper.
#[derive(Debug, Clone)]
pub struct BrowserFallback {
    command: HelperCommand,
    profile_dir: Option<PathBuf>,
    timeout: Duration,
}

impl BrowserFallback {
    pub fn new(command: HelperCommand, profile_dir: Option<PathBuf>) -> Self {
        Self {
            command,
            profile_dir,
            timeout: DEFAULT_OTP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn password_grant(
        &self,
        base_url: &str,
        device_id: &str,
        grant: &PasswordGrant,
    ) -> Result<(Outcome, BrowserSession)> {
        let token_url = token_endpoint(base_url)?;
        let host = token_url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Config(format!("base_url {base_url:?} has no host")))?
            .to_string();
        if device_id.trim().is_empty() {
            return Err(Error::helper(HELPER, "device id missing"));
        }

        let request = BrowserRequest {
            base_url,
            device_id,
            email: &grant.username,
            password: grant.password.expose(),
            client_secret: grant.client_secret.expose(),
            client_id: &grant.client_id,
            otp_method: &grant.otp_method,
            otp_code: grant.otp_code.as_deref().unwrap_or_default(),
            mfa_token: grant.mfa_token.as_deref().unwrap_or_default(),
            timeout_millis: self.timeout.as_millis() as u64,
            profile_dir: self
                .profile_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        };

        // Leave the helper a little room to report its own timeout.
        let run = run_helper(HELPER, &self.command, &request, self.timeout + Duration::from_secs(30))
            .await?;
        if !run.status.success() {
            return Err(Error::helper(HELPER, format!("helper exited with {}", run.status)));
        }
        let raw = run
            .output
            .ok_or_else(|| Error::helper(HELPER, "helper wrote no output"))?;
        let output: BrowserOutput = serde_json::from_slice(&raw)
            .map_err(|e| Error::helper(HELPER, format!("decoding output: {e}")))?;

        let session = BrowserSession {
            host: host.to_ascii_lowercase(),
            cookie_header: output.cookie_header.trim().to_string(),
            user_agent: output.user_agent.trim().to_string(),
        };

        let rate_limit_reset = output
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("ratelimit-reset"))
            .map(|(_, v)| v.as_str());

        let outcome = classify_response(
            "POST",
            token_url.as_str(),
            output.status,
            rate_limit_reset,
            output.body.into_bytes(),
        );
        info!(status = output.status, "browser login finished");
        Ok((outcome, session))
    }
}
