//! OAuth token endpoint client
//!
//! Two exchanges against `<base_url>/oauth2/token`, both form-encoded with a
//! fixed scope:
//! 1. Password grant (login, optionally carrying an OTP and MFA token)
//! 2. Refresh grant
//!
//! Every response is classified into an [`Outcome`]. An MFA challenge is not
//! an error here; it is a normal result the caller drives to completion.
//! Nothing in this module touches the session record.

use std::fmt;
use std::time::Duration;

use common::Secret;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::constants::{
    DEFAULT_CLIENT_ID, DEFAULT_RATE_LIMIT_RESET_SECS, MFA_TRIGGERED_CODE, SCOPE, TOKEN_BODY_LIMIT,
    TOKEN_PATH,
};
use crate::error::{Error, HttpError, Result};
use crate::headers::AppIdentity;

/// Successful token endpoint body. `null` and missing fields read as empty.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub access_token: String,
    /// Empty when the server did not rotate the refresh token.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub refresh_token: String,
    /// Lifetime in seconds, when the server declares one.
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub token_type: Option<String>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Integer, float or numeric string; anything else means "not declared".
fn lenient_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<i64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

impl TokenResponse {
    /// Absolute expiry in unix milliseconds, if the server declared a
    /// positive lifetime.
    pub fn expires_at(&self, now_ms: u64) -> Option<u64> {
        let secs = u64::try_from(self.expires_in?).ok().filter(|s| *s > 0)?;
        Some(now_ms.saturating_add(secs.saturating_mul(1000)))
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Server-issued MFA interrupt.
#[derive(Clone, PartialEq, Eq)]
pub struct MfaChallenge {
    pub channel: String,
    pub email: String,
    pub mfa_token: String,
    /// Seconds until another code may be requested.
    pub rate_limit_reset_secs: u64,
}

impl fmt::Debug for MfaChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MfaChallenge")
            .field("channel", &self.channel)
            .field("email", &self.email)
            .field("mfa_token", &"[REDACTED]")
            .field("rate_limit_reset_secs", &self.rate_limit_reset_secs)
            .finish()
    }
}

/// Classified token endpoint response.
#[derive(Debug)]
pub enum Outcome {
    Token(TokenResponse),
    MfaChallenge(MfaChallenge),
    AuthError(HttpError),
}

/// Inputs of a password grant.
#[derive(Debug, Clone)]
pub struct PasswordGrant {
    pub username: String,
    pub password: Secret<String>,
    pub client_id: String,
    pub client_secret: Secret<String>,
    /// Sent as `X-OTP-Method` on every attempt.
    pub otp_method: String,
    pub otp_code: Option<String>,
    pub mfa_token: Option<String>,
}

impl PasswordGrant {
    fn effective_client_id(&self) -> &str {
        effective_client_id(&self.client_id)
    }
}

fn effective_client_id(client_id: &str) -> &str {
    match client_id.trim() {
        "" => DEFAULT_CLIENT_ID,
        id => id,
    }
}

/// `<base_url>/oauth2/token`, treating the base URL as a directory.
pub fn token_endpoint(base_url: &str) -> Result<Url> {
    let mut base = Url::parse(base_url.trim())
        .map_err(|e| Error::Config(format!("invalid base_url {base_url:?}: {e}")))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(TOKEN_PATH)
        .map_err(|e| Error::Config(format!("invalid token endpoint: {e}")))
}

/// HTTP client for the token endpoint.
pub struct AuthClient {
    http: reqwest::Client,
    token_url: Url,
    identity: AppIdentity,
}

impl AuthClient {
    pub fn new(base_url: &str, identity: AppIdentity, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            token_url: token_endpoint(base_url)?,
            identity,
        })
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Exchange credentials (and optionally an OTP) for tokens.
    pub async fn password_grant(&self, grant: &PasswordGrant) -> Result<Outcome> {
        let form = [
            ("grant_type", "password"),
            ("username", grant.username.as_str()),
            ("password", grant.password.expose().as_str()),
            ("client_secret", grant.client_secret.expose().as_str()),
            ("scope", SCOPE),
            ("client_id", grant.effective_client_id()),
        ];

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "x-otp-method", &grant.otp_method)?;
        if let Some(code) = grant.otp_code.as_deref().filter(|c| !c.is_empty()) {
            insert_header(&mut headers, "x-otp", code)?;
        }
        if let Some(token) = grant.mfa_token.as_deref().filter(|t| !t.is_empty()) {
            insert_header(&mut headers, "x-mfa-token", token)?;
        }

        debug!(
            client_id = grant.effective_client_id(),
            otp_method = %grant.otp_method,
            with_otp = grant.otp_code.is_some(),
            "password grant"
        );
        self.post_token(&form, headers).await
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh_grant(
        &self,
        refresh_token: &Secret<String>,
        client_secret: &Secret<String>,
        client_id: &str,
    ) -> Result<Outcome> {
        let client_id = effective_client_id(client_id);
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose().as_str()),
            ("client_secret", client_secret.expose().as_str()),
            ("scope", SCOPE),
            ("client_id", client_id),
        ];

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "x-otp-method", "")?;

        debug!(client_id, "refresh grant");
        self.post_token(&form, headers).await
    }

    async fn post_token(&self, form: &[(&str, &str)], extra: HeaderMap) -> Result<Outcome> {
        let mut headers = self.identity.to_header_map();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.extend(extra);

        let response = self
            .http
            .post(self.token_url.clone())
            .headers(headers)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Http(format!("POST {}: {e}", self.token_url)))?;

        let status = response.status().as_u16();
        let rate_limit_reset = response
            .headers()
            .get("ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = read_capped(response, TOKEN_BODY_LIMIT).await?;

        Ok(classify_response(
            "POST",
            self.token_url.as_str(),
            status,
            rate_limit_reset.as_deref(),
            body,
        ))
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| Error::Config(format!("{name} contains characters not allowed in a header")))?;
    headers.insert(name, value);
    Ok(())
}

/// Read a response body, keeping at most `limit` bytes.
pub(crate) async fn read_capped(mut response: reqwest::Response, limit: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| Error::Http(format!("reading response body: {e}")))?
    {
        let room = limit.saturating_sub(body.len());
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= limit {
            break;
        }
    }
    Ok(body)
}

/// Classify a token endpoint response.
///
/// Shared by the direct HTTP path and the browser fallback, which reports the
/// same status/body/headers from inside a real browser.
pub fn classify_response(
    method: &str,
    url: &str,
    status: u16,
    rate_limit_reset: Option<&str>,
    body: Vec<u8>,
) -> Outcome {
    if (200..300).contains(&status) {
        let token = serde_json::from_slice::<TokenResponse>(&body)
            .ok()
            .filter(|t| !t.access_token.is_empty());
        if let Some(token) = token {
            return Outcome::Token(token);
        }
    } else if let Some(challenge) = parse_mfa_triggered(&body, rate_limit_reset) {
        return Outcome::MfaChallenge(challenge);
    }

    Outcome::AuthError(HttpError {
        method: method.to_string(),
        url: url.to_string(),
        status,
        body,
    })
}

/// Recognize an `mfa_triggered` body. A body carrying the code but no MFA
/// token is not a usable challenge.
pub fn parse_mfa_triggered(body: &[u8], rate_limit_reset: Option<&str>) -> Option<MfaChallenge> {
    #[derive(Deserialize)]
    struct Raw {
        #[serde(default)]
        code: String,
        #[serde(default)]
        metadata: Metadata,
    }
    #[derive(Deserialize, Default)]
    struct Metadata {
        #[serde(default)]
        more_information: MoreInformation,
    }
    #[derive(Deserialize, Default)]
    struct MoreInformation {
        #[serde(default)]
        channel: String,
        #[serde(default)]
        email: String,
        #[serde(default)]
        mfa_token: String,
    }

    let raw: Raw = serde_json::from_slice(body).ok()?;
    if raw.code != MFA_TRIGGERED_CODE {
        return None;
    }
    let info = raw.metadata.more_information;
    if info.mfa_token.is_empty() {
        return None;
    }

    let rate_limit_reset_secs = rate_limit_reset
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RATE_LIMIT_RESET_SECS);

    Some(MfaChallenge {
        channel: info.channel,
        email: info.email,
        mfa_token: info.mfa_token,
        rate_limit_reset_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN_URL: &str = "https://hu.fd-api.com/api/v5/oauth2/token";

    fn mfa_body(token: &str) -> Vec<u8> {
        json!({
            "code": "mfa_triggered",
            "metadata": {"more_information": {
                "channel": "sms", "email": "me@example.com", "mfa_token": token
            }}
        })
        .to_string()
        .into_bytes()
    }

    fn grant() -> PasswordGrant {
        PasswordGrant {
            username: "me@example.com".into(),
            password: Secret::from("pw"),
            client_id: String::new(),
            client_secret: Secret::from("cs-1"),
            otp_method: "sms".into(),
            otp_code: None,
            mfa_token: None,
        }
    }

    async fn client_for(server: &MockServer) -> AuthClient {
        AuthClient::new(
            &format!("{}/api/v5", server.uri()),
            AppIdentity {
                user_agent: "ordercli/test".into(),
                fp_api_key: "android".into(),
                ..Default::default()
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn token_endpoint_treats_base_as_directory() {
        let with_slash = token_endpoint("https://hu.fd-api.com/api/v5/").unwrap();
        let without = token_endpoint("https://hu.fd-api.com/api/v5").unwrap();
        assert_eq!(with_slash.as_str(), TOKEN_URL);
        assert_eq!(without.as_str(), TOKEN_URL);
    }

    #[test]
    fn token_endpoint_rejects_garbage() {
        assert!(matches!(token_endpoint("not a url"), Err(Error::Config(_))));
    }

    #[test]
    fn success_with_access_token_is_token() {
        let body = br#"{"access_token":"AT1","refresh_token":"RT1","expires_in":3600}"#.to_vec();
        match classify_response("POST", TOKEN_URL, 200, None, body) {
            Outcome::Token(t) => {
                assert_eq!(t.access_token, "AT1");
                assert_eq!(t.refresh_token, "RT1");
                assert_eq!(t.expires_at(1_000), Some(3_601_000));
            }
            other => panic!("expected token, got {other:?}"),
        }
    }

    #[test]
    fn success_without_access_token_is_auth_error() {
        for body in [&br#"{"access_token":""}"#[..], b"not json", b"{}"] {
            let outcome = classify_response("POST", TOKEN_URL, 200, None, body.to_vec());
            assert!(matches!(outcome, Outcome::AuthError(e) if e.status == 200));
        }
    }

    #[test]
    fn null_fields_on_success_still_yield_token() {
        let body =
            br#"{"access_token":"AT2","refresh_token":null,"expires_in":3600,"token_type":null}"#
                .to_vec();
        match classify_response("POST", TOKEN_URL, 200, None, body) {
            Outcome::Token(t) => {
                assert_eq!(t.access_token, "AT2");
                assert!(t.refresh_token.is_empty());
                assert_eq!(t.token_type, None);
                assert_eq!(t.expires_at(0), Some(3_600_000));
            }
            other => panic!("expected token, got {other:?}"),
        }
    }

    #[test]
    fn expires_in_is_read_leniently() {
        let parse = |raw: &str| {
            let body = format!(r#"{{"access_token":"AT","expires_in":{raw}}}"#);
            match classify_response("POST", TOKEN_URL, 200, None, body.into_bytes()) {
                Outcome::Token(t) => t.expires_in,
                other => panic!("expected token, got {other:?}"),
            }
        };
        assert_eq!(parse("3600"), Some(3600));
        assert_eq!(parse("3600.0"), Some(3600));
        assert_eq!(parse(r#""1800""#), Some(1800));
        assert_eq!(parse(r#""soon""#), None);
        assert_eq!(parse("null"), None);
        assert_eq!(parse("{}"), None);
    }

    #[test]
    fn null_access_token_is_auth_error() {
        let body = br#"{"access_token":null,"refresh_token":"RT"}"#.to_vec();
        let outcome = classify_response("POST", TOKEN_URL, 200, None, body);
        assert!(matches!(outcome, Outcome::AuthError(e) if e.status == 200));
    }

    #[test]
    fn mfa_triggered_is_challenge_with_rate_limit() {
        match classify_response("POST", TOKEN_URL, 403, Some("45"), mfa_body("M1")) {
            Outcome::MfaChallenge(ch) => {
                assert_eq!(ch.mfa_token, "M1");
                assert_eq!(ch.channel, "sms");
                assert_eq!(ch.email, "me@example.com");
                assert_eq!(ch.rate_limit_reset_secs, 45);
            }
            other => panic!("expected challenge, got {other:?}"),
        }
    }

    #[test]
    fn rate_limit_defaults_to_thirty_seconds() {
        let ch = parse_mfa_triggered(&mfa_body("M1"), None).unwrap();
        assert_eq!(ch.rate_limit_reset_secs, 30);
        let ch = parse_mfa_triggered(&mfa_body("M1"), Some("soon")).unwrap();
        assert_eq!(ch.rate_limit_reset_secs, 30);
    }

    #[test]
    fn mfa_triggered_with_empty_token_is_auth_error() {
        let outcome = classify_response("POST", TOKEN_URL, 403, None, mfa_body(""));
        assert!(matches!(outcome, Outcome::AuthError(e) if e.status == 403));

        let no_metadata = br#"{"code":"mfa_triggered"}"#.to_vec();
        let outcome = classify_response("POST", TOKEN_URL, 403, None, no_metadata);
        assert!(matches!(outcome, Outcome::AuthError(_)));
    }

    #[test]
    fn mfa_body_on_success_status_is_not_a_challenge() {
        let outcome = classify_response("POST", TOKEN_URL, 200, None, mfa_body("M1"));
        assert!(matches!(outcome, Outcome::AuthError(_)));
    }

    #[test]
    fn debug_output_hides_tokens() {
        let token = TokenResponse {
            access_token: "at-live".into(),
            refresh_token: "rt-live".into(),
            expires_in: None,
            token_type: None,
        };
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("at-live") && !rendered.contains("rt-live"));
        assert_eq!(token.expires_at(5), None);
    }

    #[tokio::test]
    async fn password_grant_sends_form_and_otp_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v5/oauth2/token"))
            .and(header("x-otp-method", "sms"))
            .and(header("x-otp", "123456"))
            .and(header("x-mfa-token", "M1"))
            .and(header("x-fp-api-key", "android"))
            .and(header("accept", "application/json"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=me%40example.com"))
            .and(body_string_contains("client_id=android"))
            .and(body_string_contains("scope=API_CUSTOMER"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "AT1", "refresh_token": "RT1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let mut grant = grant();
        grant.otp_code = Some("123456".into());
        grant.mfa_token = Some("M1".into());

        let outcome = client.password_grant(&grant).await.unwrap();
        assert!(matches!(outcome, Outcome::Token(t) if t.access_token == "AT1"));
    }

    #[tokio::test]
    async fn password_grant_returns_challenge_from_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v5/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(401)
                    .insert_header("ratelimit-reset", "60")
                    .set_body_bytes(mfa_body("M2")),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        match client.password_grant(&grant()).await.unwrap() {
            Outcome::MfaChallenge(ch) => {
                assert_eq!(ch.mfa_token, "M2");
                assert_eq!(ch.rate_limit_reset_secs, 60);
            }
            other => panic!("expected challenge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_grant_reports_invalid_client() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v5/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=RT1"))
            .and(body_string_contains("client_id=corp_android"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": "invalid_client"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let outcome = client
            .refresh_grant(&Secret::from("RT1"), &Secret::from("stale"), "corp_android")
            .await
            .unwrap();
        match outcome {
            Outcome::AuthError(err) => {
                assert!(err.is_invalid_client());
                assert!(err.url.ends_with("/api/v5/oauth2/token"));
            }
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_failure_is_http_error() {
        let client = AuthClient::new(
            "http://127.0.0.1:9/api/v5/",
            AppIdentity::default(),
            Duration::from_millis(500),
        )
        .unwrap();
        let err = client.password_grant(&grant()).await.unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got {err:?}");
    }
}
