//! Error types for session operations

use foodora_auth::HttpError;

/// Errors from login, refresh and session imports.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] foodora_auth::Error),

    #[error("not logged in (run `ordercli-auth login --email <EMAIL>` or `ordercli-auth session-chrome`)")]
    NotLoggedIn,

    #[error("client secret rejected after refetch: {0}")]
    InvalidClient(HttpError),

    #[error("refresh token rejected, log in again: {0}")]
    RefreshRejected(HttpError),

    #[error("timed out waiting for the OTP code sent via {channel}")]
    OtpTimeout { channel: String },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("missing {0}")]
    MissingInput(String),

    #[error("reading OTP code: {0}")]
    Prompt(#[from] std::io::Error),

    #[error("token endpoint returned an unexpected MFA challenge; log in again")]
    UnexpectedChallenge,
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
