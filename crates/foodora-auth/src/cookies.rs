//! Chrome cookie import
//!
//! An external helper reads (and decrypts) the local Chrome cookie store for
//! a URL and reports a ready-made `Cookie` header. Used to replay bot
//! protection cookies and to lift a web session (`refresh_token`,
//! `device_token`) out of a logged-in browser.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::subprocess::{HelperCommand, run_helper};

const HELPER: &str = "chrome cookies";

/// Extra time granted beyond the helper's own read timeout.
const HELPER_GRACE: Duration = Duration::from_secs(5);

/// What to read from Chrome.
#[derive(Debug, Clone, Serialize)]
pub struct CookieRequest {
    pub target_url: String,
    /// Profile name (`Default`, `Profile 1`) or profile directory.
    pub chrome_profile: String,
    /// Cookies database path; overrides `chrome_profile`.
    pub explicit_cookie_path: String,
    /// Only these cookie names; empty means all cookies for the URL.
    pub filter_names: Vec<String>,
    #[serde(rename = "timeout_millis", serialize_with = "as_millis")]
    pub timeout: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieImport {
    pub cookie_header: String,
    pub cookie_count: usize,
}

#[derive(Deserialize)]
struct CookieOutput {
    #[serde(default)]
    cookie_header: String,
    #[serde(default)]
    cookie_count: usize,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Clone)]
pub struct ChromeCookies {
    command: HelperCommand,
}

impl ChromeCookies {
    pub fn new(command: HelperCommand) -> Self {
        Self { command }
    }

    pub async fn load_cookie_header(&self, request: &CookieRequest) -> Result<CookieImport> {
        if request.target_url.trim().is_empty() {
            return Err(Error::helper(HELPER, "target URL missing"));
        }

        let run = run_helper(HELPER, &self.command, request, request.timeout + HELPER_GRACE).await?;
        let output = run
            .output
            .as_deref()
            .and_then(|raw| serde_json::from_slice::<CookieOutput>(raw).ok());

        // The helper may report a structured error and still exit non-zero.
        if let Some(error) = output.as_ref().map(|o| o.error.trim()).filter(|e| !e.is_empty()) {
            return Err(Error::helper(HELPER, error));
        }
        if !run.status.success() {
            return Err(Error::helper(HELPER, format!("helper exited with {}", run.status)));
        }

        let output = match (run.output, output) {
            (None, _) => return Err(Error::helper(HELPER, "helper wrote no output")),
            (Some(_), None) => return Err(Error::helper(HELPER, "undecodable helper output")),
            (Some(_), Some(output)) => output,
        };

        Ok(CookieImport {
            cookie_header: output.cookie_header.trim().to_string(),
            cookie_count: output.cookie_count,
        })
    }
}

/// Split a `Cookie` header into name/value pairs. Later duplicates win.
pub fn parse_cookie_header(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}
