//! Foodora session engine
//!
//! Login, MFA and refresh policy on top of the `foodora-auth` building
//! blocks. The caller owns the `SessionState` and persists it when dirty.
//!
//! Login flow:
//! 1. Resolve the client id (explicit > stored > `android`) and its secret
//! 2. Password grant; on `invalid_client` refetch the secret and retry once
//! 3. On an MFA challenge persist it, then prompt for a code or defer
//! 4. On a token clear the challenge and store tokens, expiry and client binding
//!
//! `ensure_fresh_session()` refreshes when the access token expires within
//! 30 seconds and hands back an authenticated `ApiClient`.

pub mod cancel;
pub mod error;
pub mod mfa;
pub mod orchestrator;
pub mod prompt;

pub use cancel::CancelSignal;
pub use error::{Error, Result};
pub use mfa::{ChallengeAction, ChallengeEvent, ChallengeState, ResumedChallenge, handle_event, resume_pending};
pub use orchestrator::{
    ChromeImportOptions, ChromeSessionImport, CookieImportSummary, DeferredLogin, LoginOptions,
    LoginOutcome, RefreshOutcome, SessionManager,
};
pub use prompt::{NoPrompt, OtpPrompt, wait_for_code};
