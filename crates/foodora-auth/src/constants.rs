//! Foodora OAuth constants
//!
//! Values shipped in the mobile apps. Client identifiers are public; client
//! secrets are never compiled in and always come from the cache, the
//! environment, or Remote Config.

use std::time::Duration;

/// Default OAuth client identifier used by the Android app.
pub const DEFAULT_CLIENT_ID: &str = "android";

/// Secondary client identifier present in newer `client_secrets` blobs.
pub const CORP_CLIENT_ID: &str = "corp_android";

/// Scope requested by every grant.
pub const SCOPE: &str = "API_CUSTOMER";

/// Token endpoint, relative to the configured base URL.
pub const TOKEN_PATH: &str = "oauth2/token";

/// Environment variable that overrides the client secret.
pub const CLIENT_SECRET_ENV: &str = "FOODORA_CLIENT_SECRET";

/// Remote Config entry holding the per-market secret map.
pub const CLIENT_SECRETS_KEY: &str = "client_secrets";

/// Market key used when neither the base URL nor the country ISO yields one.
pub const DEFAULT_MARKET_KEY: &str = "HU";

/// Access tokens expiring within this window are refreshed proactively.
pub const EXPIRY_GRACE: Duration = Duration::from_secs(30);

/// How long a login may wait for an interactive OTP, measured from the start
/// of the login attempt.
pub const DEFAULT_OTP_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Per-request timeout for token and API calls.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(20);

/// OTP channel sent when neither the caller nor a stored challenge picks one.
pub const DEFAULT_OTP_METHOD: &str = "sms";

/// Error `code` the token endpoint uses to announce an MFA challenge.
pub const MFA_TRIGGERED_CODE: &str = "mfa_triggered";

/// OAuth `error` value returned when the client id/secret pair is rejected.
pub const INVALID_CLIENT_ERROR: &str = "invalid_client";

/// Fallback for `ratelimit-reset` when the header is missing or malformed.
pub const DEFAULT_RATE_LIMIT_RESET_SECS: u64 = 30;

/// Max token endpoint body read into memory.
pub const TOKEN_BODY_LIMIT: usize = 2 << 20;

/// Max API body read into memory.
pub const API_BODY_LIMIT: usize = 4 << 20;

/// Max characters of a (redacted) error body rendered into error text.
pub const ERROR_BODY_DISPLAY_LIMIT: usize = 300;

/// `X-FP-API-KEY` value sent by the Android apps.
pub const FP_API_KEY: &str = "android";

/// `App-Name` of the Austrian (mjam) app.
pub const MJAM_APP_NAME: &str = "at.mjam";

/// User agent of the mjam Android app (v25.3.0, build 250300134).
pub const MJAM_USER_AGENT: &str = "Android-app-25.3.0(250300134)";

/// Prefix that marks an app user agent; these are mirrored into
/// `X-Original-User-Agent`.
pub const ANDROID_APP_UA_PREFIX: &str = "Android-app-";

/// Environment variable through which helper scripts receive their output path.
pub const HELPER_OUTPUT_ENV: &str = "ORDERCLI_OUTPUT_PATH";

/// Fallback user agent, `ordercli/<version>`.
pub fn default_user_agent() -> String {
    format!("ordercli/{}", env!("CARGO_PKG_VERSION"))
}
