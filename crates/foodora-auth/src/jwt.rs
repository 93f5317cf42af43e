//! Unverified JWT payload inspection
//!
//! The token endpoint does not always declare `expires_in`, and Chrome cookie
//! imports carry no client id. Both can be recovered from the access token's
//! payload. Signatures are not checked: the token is opaque to this client and
//! verified server-side. Anything malformed simply yields `None`.

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use serde_json::Value;

/// Decode the payload (second segment) of a JWT into a JSON object.
fn payload(token: &str) -> Option<serde_json::Map<String, Value>> {
    let mut segments = token.trim().split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    // A bare "header.payload" is not a JWT.
    segments.next()?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .ok()?;

    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn positive_seconds(value: Option<&Value>) -> Option<u64> {
    let value = value?;
    let secs = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))?;
    u64::try_from(secs).ok().filter(|s| *s > 0)
}

/// Expiry of `token` as a unix timestamp in milliseconds.
///
/// Reads `exp`, falling back to the non-standard `expires` claim some tokens
/// carry.
pub fn expiry_millis(token: &str) -> Option<u64> {
    let claims = payload(token)?;
    let secs =
        positive_seconds(claims.get("exp")).or_else(|| positive_seconds(claims.get("expires")))?;
    secs.checked_mul(1000)
}

/// OAuth client id the token was issued to.
pub fn client_id(token: &str) -> Option<String> {
    let claims = payload(token)?;
    let id = claims.get("client_id")?.as_str()?.trim();
    (!id.is_empty()).then(|| id.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Build an unsigned token around the given claims.
    pub fn unsigned_token(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{body}.sig")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::unsigned_token;
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_exp_claim_as_millis() {
        let token = unsigned_token(&json!({"exp": 1_900_000_000}));
        assert_eq!(expiry_millis(&token), Some(1_900_000_000_000));
    }

    #[test]
    fn falls_back_to_expires_claim() {
        let token = unsigned_token(&json!({"expires": 1_800_000_000}));
        assert_eq!(expiry_millis(&token), Some(1_800_000_000_000));
    }

    #[test]
    fn non_positive_exp_uses_expires() {
        let token = unsigned_token(&json!({"exp": 0, "expires": 1_700_000_000}));
        assert_eq!(expiry_millis(&token), Some(1_700_000_000_000));
    }

    #[test]
    fn missing_claims_yield_none() {
        let token = unsigned_token(&json!({"sub": "user-1"}));
        assert_eq!(expiry_millis(&token), None);
        assert_eq!(client_id(&token), None);
    }

    #[test]
    fn malformed_tokens_yield_none() {
        for token in ["", "opaque-token", "a.b", "a.!!!.c", "a.bm90LWpzb24.c"] {
            assert_eq!(expiry_millis(token), None, "token {token:?}");
            assert_eq!(client_id(token), None, "token {token:?}");
        }
    }

    #[test]
    fn padded_payload_is_accepted() {
        let body = URL_SAFE.encode(br#"{"exp":1900000000,"client_id":"corp_android"}"#);
        let token = format!("h.{body}.s");
        assert_eq!(expiry_millis(&token), Some(1_900_000_000_000));
        assert_eq!(client_id(&token).as_deref(), Some("corp_android"));
    }

    #[test]
    fn client_id_is_trimmed_and_non_empty() {
        let token = unsigned_token(&json!({"client_id": "  android "}));
        assert_eq!(client_id(&token).as_deref(), Some("android"));

        let blank = unsigned_token(&json!({"client_id": "   "}));
        assert_eq!(client_id(&blank), None);
    }
}
