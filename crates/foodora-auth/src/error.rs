//! Error types for authentication operations

use std::fmt;

use serde::Deserialize;

use crate::constants::INVALID_CLIENT_ERROR;
use crate::redact::render_body;

/// Errors from the auth transport, secret resolution and session storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{field} is not set (run `{remedy}`)")]
    MissingConfig {
        field: &'static str,
        remedy: &'static str,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error(transparent)]
    Auth(#[from] HttpError),

    #[error("invalid token response: {0}")]
    TokenResponse(String),

    #[error("client secret unavailable: {0}")]
    SecretFetch(String),

    #[error("remote config fetch failed: {0}")]
    RemoteConfig(String),

    #[error("{helper}: {message}")]
    Helper {
        helper: &'static str,
        message: String,
    },

    #[error("session file parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    pub(crate) fn helper(helper: &'static str, message: impl Into<String>) -> Self {
        Self::Helper {
            helper,
            message: message.into(),
        }
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A non-success HTTP response.
///
/// Keeps the raw body so callers can classify it (`invalid_client`), but
/// `Display` only ever renders the redacted, length-capped form.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpError {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpError {
    /// True when the server rejected the client id/secret pair: a 400 or 401
    /// whose JSON `error` is `invalid_client`.
    pub fn is_invalid_client(&self) -> bool {
        if self.status != 400 && self.status != 401 {
            return false;
        }

        #[derive(Deserialize)]
        struct OAuthErrorBody {
            #[serde(default)]
            error: Option<String>,
        }

        serde_json::from_slice::<OAuthErrorBody>(&self.body)
            .ok()
            .and_then(|b| b.error)
            .is_some_and(|e| e.trim().eq_ignore_ascii_case(INVALID_CLIENT_ERROR))
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: HTTP {}: {}",
            self.method,
            self.url,
            self.status,
            render_body(&self.body)
        )
    }
}

impl fmt::Debug for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpError")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("status", &self.status)
            .field("body", &render_body(&self.body))
            .finish()
    }
}

impl std::error::Error for HttpError {}
