//! Session orchestrator
//!
//! Drives login (with the MFA state machine), refresh, logout and the Chrome
//! imports against a `SessionState`. Nothing here touches the session file:
//! every change goes through `SessionState::edit()` and the caller persists
//! the dirty state afterwards.
//!
//! Invalid-client policy: when the token endpoint rejects the client
//! id/secret pair, the secret is refetched from Remote Config (bypassing the
//! cache) and the grant retried once. A second rejection in the same call is
//! fatal.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use foodora_auth::{
    ApiClient, AppIdentity, AuthClient, BrowserFallback, ChromeCookies, CookieRequest,
    DEFAULT_CLIENT_ID, DEFAULT_HTTP_TIMEOUT, DEFAULT_OTP_METHOD, DEFAULT_OTP_TIMEOUT, HttpError,
    MfaChallenge, Outcome, PasswordGrant, PendingChallenge, ProviderSettings, SecretResolver,
    SessionRecord, SessionState, TokenResponse, jwt, now_millis, parse_cookie_header,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::cancel::CancelSignal;
use crate::error::{Error, Result};
use crate::mfa::{ChallengeAction, ChallengeEvent, ChallengeState, handle_event, resume_pending};
use crate::prompt::{NoPrompt, OtpPrompt, wait_for_code};

/// Site holding the web session cookies for the Austrian market.
const MJAM_SITE_URL: &str = "https://www.foodora.at/";

const SESSION_COOKIES: [&str; 3] = ["token", "refresh_token", "device_token"];

/// Inputs of [`SessionManager::login`].
#[derive(Debug, Clone)]
pub struct LoginOptions {
    pub email: String,
    pub password: Secret<String>,
    /// Overrides the stored client id.
    pub client_id: Option<String>,
    /// Skips secret resolution and the invalid-client refetch.
    pub client_secret: Option<Secret<String>>,
    /// Cache `client_secret` on the session for later runs.
    pub store_client_secret: bool,
    /// Channel chosen by the caller; otherwise the stored one, then `sms`.
    pub otp_method: Option<String>,
    pub otp_code: Option<String>,
    pub mfa_token: Option<String>,
    /// Prompt for a code when a challenge arrives and a prompt is available.
    pub wait_for_otp: bool,
    /// Measured from the start of the login call.
    pub otp_timeout: Duration,
    /// Send the grant through the browser helper.
    pub use_browser: bool,
}

impl LoginOptions {
    pub fn new(email: impl Into<String>, password: Secret<String>) -> Self {
        Self {
            email: email.into(),
            password,
            client_id: None,
            client_secret: None,
            store_client_secret: false,
            otp_method: None,
            otp_code: None,
            mfa_token: None,
            wait_for_otp: true,
            otp_timeout: DEFAULT_OTP_TIMEOUT,
            use_browser: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    LoggedIn {
        client_id: String,
        expires_at: Option<u64>,
    },
    /// A challenge nobody could answer now. It stays on the session record.
    MfaPending(DeferredLogin),
}

/// How to finish a deferred MFA login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredLogin {
    pub channel: String,
    pub email: String,
    pub rate_limit_reset_secs: u64,
    pub retry_command: String,
}

impl DeferredLogin {
    fn new(challenge: &MfaChallenge, email: &str) -> Self {
        let channel = match challenge.channel.trim() {
            "" => DEFAULT_OTP_METHOD.to_string(),
            channel => channel.to_string(),
        };
        let retry_command =
            format!("ordercli-auth login --email {email} --otp-method {channel} --otp <CODE>");
        Self {
            channel,
            email: email.to_string(),
            rate_limit_reset_secs: challenge.rate_limit_reset_secs,
            retry_command,
        }
    }
}

impl fmt::Display for DeferredLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MFA triggered ({}). Finish the login with:", self.channel)?;
        writeln!(f, "  {}", self.retry_command)?;
        write!(
            f,
            "A new code can be requested in {}s.",
            self.rate_limit_reset_secs
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub client_id: String,
    pub expires_at: Option<u64>,
}

/// Where to read Chrome cookies from.
#[derive(Debug, Clone, Default)]
pub struct ChromeImportOptions {
    /// Site to read cookies for; only its origin is used.
    pub url: Option<String>,
    pub chrome_profile: String,
    pub cookie_path: String,
    /// Session import only: overrides the token's `client_id` claim.
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieImportSummary {
    pub host: String,
    pub cookie_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromeSessionImport {
    pub client_id: String,
    pub has_access_token: bool,
    pub expires_at: Option<u64>,
}

pub struct SessionManager {
    settings: ProviderSettings,
    secrets: SecretResolver,
    prompt: Arc<dyn OtpPrompt>,
    browser: Option<BrowserFallback>,
    cancel: CancelSignal,
    http_timeout: Duration,
}

impl SessionManager {
    pub fn new(settings: ProviderSettings, secrets: SecretResolver) -> Self {
        Self {
            settings,
            secrets,
            prompt: Arc::new(NoPrompt),
            browser: None,
            cancel: CancelSignal::new(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn OtpPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_browser(mut self, browser: BrowserFallback) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Password login, resolving MFA challenges along the way.
    pub async fn login(
        &self,
        state: &mut SessionState,
        options: LoginOptions,
    ) -> Result<LoginOutcome> {
        let started = Instant::now();
        let base_url = self.settings.require_base_url()?.to_string();

        let email = options.email.trim().to_string();
        if email.is_empty() {
            return Err(Error::MissingInput("email (--email)".into()));
        }
        if options.password.is_blank() {
            return Err(Error::MissingInput("password".into()));
        }

        let client_id = login_client_id(options.client_id.as_deref(), state.record());
        let resumed = resume_pending(state.record(), &email, options.otp_method.as_deref());
        if resumed.mfa_token.is_some() {
            debug!(channel = %resumed.otp_method, "resuming stored MFA challenge");
        }

        let explicit_secret = options.client_secret.filter(|s| !s.is_blank());
        let explicit = explicit_secret.is_some();
        let client_secret = match explicit_secret {
            Some(secret) => {
                if options.store_client_secret {
                    let record = state.edit();
                    record.client_secret = secret.expose().trim().to_string();
                    record.oauth_client_id = client_id.clone();
                }
                secret
            }
            None => {
                self.cancel
                    .run(self.secrets.resolve(state, &client_id))
                    .await??
                    .secret
            }
        };

        let mut grant = PasswordGrant {
            username: email.clone(),
            password: options.password,
            client_id: client_id.clone(),
            client_secret,
            otp_method: resumed.otp_method,
            otp_code: non_empty(options.otp_code.as_deref()),
            mfa_token: non_empty(options.mfa_token.as_deref()).or(resumed.mfa_token),
        };

        let deadline = started + options.otp_timeout;
        let mut challenge = ChallengeState::NoChallenge;
        let mut retried_secret = false;

        loop {
            let outcome = self
                .submit_password_grant(state, &base_url, &grant, options.use_browser)
                .await?;

            match outcome {
                Outcome::Token(token) => {
                    let (_, action) = handle_event(challenge, ChallengeEvent::TokenIssued);
                    if action == ChallengeAction::ClearChallenge {
                        state.edit().clear_pending();
                    }
                    let expires_at = apply_token(state, &token, &client_id, false);
                    record_login("success");
                    info!(client_id = %client_id, ?expires_at, "logged in");
                    return Ok(LoginOutcome::LoggedIn {
                        client_id,
                        expires_at,
                    });
                }

                Outcome::AuthError(err) if err.is_invalid_client() => {
                    if explicit || retried_secret {
                        record_login("invalid_client");
                        return Err(Error::InvalidClient(err));
                    }
                    retried_secret = true;
                    warn!(client_id = %client_id, "client secret rejected, refetching");
                    grant.client_secret = self.refetch_secret(state, &client_id, err).await?;
                }

                Outcome::AuthError(err) => {
                    record_login("rejected");
                    return Err(foodora_auth::Error::from(err).into());
                }

                Outcome::MfaChallenge(issued) => {
                    let channel = match issued.channel.trim() {
                        "" => DEFAULT_OTP_METHOD.to_string(),
                        channel => channel.to_string(),
                    };
                    info!(channel = %channel, "MFA challenge issued");

                    let (next, action) =
                        handle_event(challenge, ChallengeEvent::ChallengeIssued(issued));
                    challenge = next;
                    if let ChallengeAction::PersistChallenge(issued) = &action {
                        persist_challenge(state, issued, &email);
                    }

                    let mut event = if options.wait_for_otp && self.prompt.is_interactive() {
                        self.next_code_event(&channel, deadline).await?
                    } else {
                        ChallengeEvent::PromptUnavailable
                    };

                    let action = loop {
                        let (next, action) = handle_event(challenge, event);
                        challenge = next;
                        match action {
                            ChallengeAction::PromptForCode { channel } => {
                                event = self.next_code_event(&channel, deadline).await?;
                            }
                            action => break action,
                        }
                    };

                    match action {
                        ChallengeAction::Resubmit {
                            mfa_token,
                            otp_method,
                            otp_code,
                        } => {
                            grant.mfa_token = Some(mfa_token);
                            grant.otp_method = otp_method;
                            grant.otp_code = Some(otp_code);
                        }
                        ChallengeAction::ReportDeferred(pending) => {
                            record_login("mfa_pending");
                            return Ok(LoginOutcome::MfaPending(DeferredLogin::new(
                                &pending, &email,
                            )));
                        }
                        ChallengeAction::FailTimeout { channel } => {
                            record_login("otp_timeout");
                            return Err(Error::OtpTimeout { channel });
                        }
                        other => {
                            debug!(state = challenge.label(), ?other, "unexpected challenge action");
                            return Err(Error::UnexpectedChallenge);
                        }
                    }
                }
            }
        }
    }

    /// An API client with a fresh access token, refreshing first when the
    /// token is expired or about to be.
    pub async fn ensure_fresh_session(&self, state: &mut SessionState) -> Result<ApiClient> {
        if !state.record().has_session() {
            return Err(Error::NotLoggedIn);
        }

        if state.record().token_likely_expired(now_millis()) {
            debug!("access token expired or expiring, refreshing");
            self.refresh(state, None).await?;
        }

        let record = state.record();
        let client = ApiClient::new(
            &self.settings,
            AppIdentity::for_session(&self.settings, record),
            Secret::new(record.access_token.clone()),
            self.http_timeout,
        )?;
        Ok(client)
    }

    /// Refresh grant regardless of the current expiry.
    ///
    /// Client id precedence: `client_id_override`, stored binding, the access
    /// token's `client_id` claim, `android`.
    pub async fn refresh(
        &self,
        state: &mut SessionState,
        client_id_override: Option<&str>,
    ) -> Result<RefreshOutcome> {
        let base_url = self.settings.require_base_url()?.to_string();

        let refresh_token = state.record().refresh_token.trim().to_string();
        if refresh_token.is_empty() {
            return Err(Error::NotLoggedIn);
        }
        let refresh_token = Secret::new(refresh_token);

        let client_id = refresh_client_id(client_id_override, state.record());
        let client = self.auth_client(state.record(), &base_url)?;
        let mut client_secret = self
            .cancel
            .run(self.secrets.resolve(state, &client_id))
            .await??
            .secret;
        let mut retried_secret = false;

        loop {
            let outcome = self
                .cancel
                .run(client.refresh_grant(&refresh_token, &client_secret, &client_id))
                .await??;

            match outcome {
                Outcome::Token(token) => {
                    let expires_at = apply_token(state, &token, &client_id, true);
                    record_refresh("success");
                    info!(client_id = %client_id, ?expires_at, "access token refreshed");
                    return Ok(RefreshOutcome {
                        client_id,
                        expires_at,
                    });
                }
                Outcome::AuthError(err) if err.is_invalid_client() => {
                    if retried_secret {
                        record_refresh("invalid_client");
                        return Err(Error::InvalidClient(err));
                    }
                    retried_secret = true;
                    warn!(client_id = %client_id, "client secret rejected during refresh, refetching");
                    client_secret = self.refetch_secret(state, &client_id, err).await?;
                }
                Outcome::AuthError(err) if matches!(err.status, 400 | 401 | 403) => {
                    record_refresh("rejected");
                    return Err(Error::RefreshRejected(err));
                }
                Outcome::AuthError(err) => {
                    record_refresh("error");
                    return Err(foodora_auth::Error::from(err).into());
                }
                Outcome::MfaChallenge(_) => {
                    record_refresh("mfa");
                    return Err(Error::UnexpectedChallenge);
                }
            }
        }
    }

    /// Forget tokens and any pending challenge. Device id, cookies and the
    /// cached client secret stay.
    pub fn logout(&self, state: &mut SessionState) {
        let record = state.edit();
        record.clear_tokens();
        record.clear_pending();
        info!("logged out");
    }

    /// Copy Chrome's cookies for the site into the session, stored under the
    /// base URL host.
    pub async fn import_cookies(
        &self,
        state: &mut SessionState,
        cookies: &ChromeCookies,
        options: &ChromeImportOptions,
    ) -> Result<CookieImportSummary> {
        let base_url = self.settings.require_base_url()?;
        let host = self.settings.cookie_host().ok_or_else(|| {
            foodora_auth::Error::Config(format!("base_url {base_url:?} has no host"))
        })?;
        let site = non_empty(options.url.as_deref()).unwrap_or_else(|| base_url.to_string());
        let target_url = site_origin(&site)?;

        let request = self.cookie_request(&target_url, options, Vec::new());
        let import = self
            .cancel
            .run(cookies.load_cookie_header(&request))
            .await??;
        if import.cookie_header.is_empty() {
            return Err(Error::MissingInput(format!(
                "Chrome cookies for {target_url} (open the site in Chrome first)"
            )));
        }

        state.edit().store_cookies(&host, &import.cookie_header);
        info!(host = %host, cookies = import.cookie_count, "imported Chrome cookies");
        Ok(CookieImportSummary {
            host,
            cookie_count: import.cookie_count,
        })
    }

    /// Lift a logged-in web session (`token`, `refresh_token`,
    /// `device_token` cookies) out of Chrome.
    pub async fn import_chrome_session(
        &self,
        state: &mut SessionState,
        cookies: &ChromeCookies,
        options: &ChromeImportOptions,
    ) -> Result<ChromeSessionImport> {
        self.settings.require_base_url()?;
        let site = non_empty(options.url.as_deref())
            .or_else(|| {
                self.settings
                    .is_mjam_market()
                    .then(|| MJAM_SITE_URL.to_string())
            })
            .ok_or_else(|| {
                Error::MissingInput(
                    "site URL (--url, the site you are logged in to in Chrome)".into(),
                )
            })?;
        let target_url = site_origin(&site)?;

        let names = SESSION_COOKIES.iter().map(|n| n.to_string()).collect();
        let request = self.cookie_request(&target_url, options, names);
        let import = self
            .cancel
            .run(cookies.load_cookie_header(&request))
            .await??;

        let values = parse_cookie_header(&import.cookie_header);
        let cookie = |name: &str| {
            values
                .get(name)
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        let access_token = cookie("token");
        let refresh_token = cookie("refresh_token");
        let device_token = cookie("device_token");

        if refresh_token.is_empty() {
            return Err(Error::MissingInput(format!(
                "refresh_token cookie for {target_url} (log in on the site in Chrome first)"
            )));
        }
        if device_token.is_empty() {
            return Err(Error::MissingInput(format!(
                "device_token cookie for {target_url} (reload the site in Chrome and retry)"
            )));
        }

        let client_id = non_empty(options.client_id.as_deref())
            .or_else(|| jwt::client_id(&access_token))
            .unwrap_or_else(|| match state.record().oauth_client_id.trim() {
                "" => DEFAULT_CLIENT_ID.to_string(),
                stored => stored.to_string(),
            });
        let expires_at = jwt::expiry_millis(&access_token);
        let has_access_token = !access_token.is_empty();

        let record = state.edit();
        record.access_token = access_token;
        record.refresh_token = refresh_token;
        record.expires_at = expires_at;
        record.device_id = device_token;
        bind_client_id(record, &client_id);

        info!(client_id = %client_id, has_access_token, "imported Chrome session");
        Ok(ChromeSessionImport {
            client_id,
            has_access_token,
            expires_at,
        })
    }

    fn cookie_request(
        &self,
        target_url: &str,
        options: &ChromeImportOptions,
        filter_names: Vec<String>,
    ) -> CookieRequest {
        CookieRequest {
            target_url: target_url.to_string(),
            chrome_profile: options.chrome_profile.trim().to_string(),
            explicit_cookie_path: options.cookie_path.trim().to_string(),
            filter_names,
            timeout: self.http_timeout,
        }
    }

    fn auth_client(&self, record: &SessionRecord, base_url: &str) -> Result<AuthClient> {
        let identity = AppIdentity::for_session(&self.settings, record);
        Ok(AuthClient::new(base_url, identity, self.http_timeout)?)
    }

    async fn submit_password_grant(
        &self,
        state: &mut SessionState,
        base_url: &str,
        grant: &PasswordGrant,
        use_browser: bool,
    ) -> Result<Outcome> {
        if !use_browser {
            let client = self.auth_client(state.record(), base_url)?;
            return Ok(self.cancel.run(client.password_grant(grant)).await??);
        }

        let browser = self
            .browser
            .as_ref()
            .ok_or(foodora_auth::Error::MissingConfig {
                field: "browser.program",
                remedy: "set [browser] program in ordercli.toml",
            })?;
        let device_id = state.record().device_id.clone();
        let (outcome, session) = self
            .cancel
            .run(browser.password_grant(base_url, &device_id, grant))
            .await??;

        if !session.cookie_header.is_empty() {
            state
                .edit()
                .store_cookies(&session.host, &session.cookie_header);
        }
        if !session.user_agent.is_empty() {
            state.edit().http_user_agent = session.user_agent;
        }
        Ok(outcome)
    }

    /// Force a Remote Config fetch after an invalid-client rejection. A
    /// failed fetch surfaces the original rejection.
    async fn refetch_secret(
        &self,
        state: &mut SessionState,
        client_id: &str,
        rejected: HttpError,
    ) -> Result<Secret<String>> {
        metrics::counter!("auth_secret_refetch_total").increment(1);
        match self
            .cancel
            .run(self.secrets.force_refetch(state, client_id))
            .await?
        {
            Ok(resolved) => Ok(resolved.secret),
            Err(e) => {
                warn!(client_id, error = %e, "client secret refetch failed");
                Err(Error::InvalidClient(rejected))
            }
        }
    }

    async fn next_code_event(&self, channel: &str, deadline: Instant) -> Result<ChallengeEvent> {
        match wait_for_code(self.prompt.as_ref(), channel, deadline, &self.cancel).await {
            Ok(code) => Ok(ChallengeEvent::CodeEntered(code)),
            Err(Error::OtpTimeout { .. }) => Ok(ChallengeEvent::DeadlineElapsed),
            Err(e) => Err(e),
        }
    }
}

/// Explicit id, then the stored binding, then `android`.
fn login_client_id(explicit: Option<&str>, record: &SessionRecord) -> String {
    non_empty(explicit)
        .or_else(|| non_empty(Some(record.oauth_client_id.as_str())))
        .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string())
}

fn refresh_client_id(explicit: Option<&str>, record: &SessionRecord) -> String {
    non_empty(explicit)
        .or_else(|| non_empty(Some(record.oauth_client_id.as_str())))
        .or_else(|| jwt::client_id(&record.access_token))
        .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn persist_challenge(state: &mut SessionState, challenge: &MfaChallenge, email: &str) {
    state.edit().pending_challenge = Some(PendingChallenge {
        mfa_token: challenge.mfa_token.clone(),
        channel: challenge.channel.clone(),
        email: email.to_string(),
        created_at: now_millis(),
    });
}

/// Store a granted token. Expiry comes from `expires_in`, else the token's
/// `exp` claim. A refresh keeps the old refresh token when none is returned.
fn apply_token(
    state: &mut SessionState,
    token: &TokenResponse,
    client_id: &str,
    keep_refresh_token: bool,
) -> Option<u64> {
    let expires_at = token
        .expires_at(now_millis())
        .or_else(|| jwt::expiry_millis(&token.access_token));

    let record = state.edit();
    record.access_token = token.access_token.clone();
    if !(keep_refresh_token && token.refresh_token.trim().is_empty()) {
        record.refresh_token = token.refresh_token.clone();
    }
    record.expires_at = expires_at;
    bind_client_id(record, client_id);
    expires_at
}

/// Tag the session with `client_id`. A cached secret belonging to another
/// client is dropped so it is never sent for this one.
fn bind_client_id(record: &mut SessionRecord, client_id: &str) {
    let cached = record.oauth_client_id.trim();
    let same_client = cached.eq_ignore_ascii_case(client_id)
        || (cached.is_empty() && client_id == DEFAULT_CLIENT_ID);
    if !same_client && !record.client_secret.is_empty() {
        debug!(from = cached, to = client_id, "dropping client secret of previous client");
        record.client_secret.clear();
    }
    record.oauth_client_id = client_id.to_string();
}

/// `scheme://host[:port]/` of a site URL; bare hosts get `https`.
fn site_origin(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let url = Url::parse(raw)
        .ok()
        .filter(|u| u.has_host())
        .or_else(|| Url::parse(&format!("https://{raw}")).ok())
        .filter(|u| u.has_host() && matches!(u.scheme(), "http" | "https"))
        .ok_or_else(|| foodora_auth::Error::Config(format!("invalid site URL {raw:?}")))?;
    Ok(format!("{}/", url.origin().ascii_serialization()))
}

fn record_login(outcome: &'static str) {
    metrics::counter!("auth_login_total", "outcome" => outcome).increment(1);
}

fn record_refresh(outcome: &'static str) {
    metrics::counter!("auth_token_refresh_total", "outcome" => outcome).increment(1);
}
