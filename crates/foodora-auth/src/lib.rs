//! Foodora OAuth building blocks
//!
//! Leaf components of the `ordercli` session engine: everything that talks to
//! the token endpoint, Remote Config, the session file or a helper process.
//! Control flow that ties them together (login, MFA, refresh policy) lives in
//! `foodora-session`.
//!
//! Credential flow:
//! 1. `SessionStore::load()` yields a `SessionState`
//! 2. `SecretResolver::resolve()` picks the client secret (cache, env, Remote Config)
//! 3. `AuthClient::password_grant()` / `refresh_grant()` return a classified `Outcome`
//! 4. The caller applies the outcome to the `SessionState`
//! 5. `SessionStore::save_if_dirty()` persists it

pub mod api;
pub mod browser;
pub mod constants;
pub mod cookies;
pub mod error;
pub mod headers;
pub mod jwt;
pub mod redact;
pub mod remote_config;
pub mod secrets;
pub mod session;
pub mod store;
pub mod subprocess;
pub mod transport;

pub use api::ApiClient;
pub use browser::{BrowserFallback, BrowserSession};
pub use constants::*;
pub use cookies::{ChromeCookies, CookieImport, CookieRequest, parse_cookie_header};
pub use error::{Error, HttpError, Result};
pub use headers::AppIdentity;
pub use remote_config::{FirebaseProject, FirebaseRemoteConfig};
pub use secrets::{
    RemoteConfigEntries, RemoteConfigFetch, ResolvedSecret, SecretResolver, SecretSource,
};
pub use session::{PendingChallenge, ProviderSettings, SessionRecord, SessionState, now_millis};
pub use store::SessionStore;
pub use subprocess::HelperCommand;
pub use transport::{AuthClient, MfaChallenge, Outcome, PasswordGrant, TokenResponse};
