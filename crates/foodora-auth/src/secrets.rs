//! OAuth client secret resolution
//!
//! Secrets rotate server-side and are published per market through Remote
//! Config. A resolved secret is cached in the session record together with
//! the client id it belongs to; the cache is only trusted for that same id.
//!
//! Resolution order for [`SecretResolver::resolve`]:
//! 1. Cached secret whose `oauth_client_id` matches (plus records written
//!    before the client id was tracked, for `android` only)
//! 2. `FOODORA_CLIENT_SECRET`
//! 3. Remote fetch, cached on success

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::Secret;
use serde_json::Value;
use tracing::{debug, info};

use crate::constants::{CLIENT_SECRET_ENV, CLIENT_SECRETS_KEY, CORP_CLIENT_ID, DEFAULT_CLIENT_ID};
use crate::error::{Error, Result};
use crate::session::SessionState;

/// Result of a Remote Config fetch.
#[derive(Debug, Clone, Default)]
pub struct RemoteConfigEntries {
    pub entries: HashMap<String, String>,
}

/// Source of Remote Config entries.
pub trait RemoteConfigFetch: Send + Sync {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<RemoteConfigEntries>> + Send + '_>>;
}

/// Where a resolved secret came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    Cache,
    Env,
    Remote,
    Explicit,
}

impl SecretSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Env => "env",
            Self::Remote => "remote",
            Self::Explicit => "explicit",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedSecret {
    pub secret: Secret<String>,
    pub source: SecretSource,
}

/// Resolves the client secret for a client id.
pub struct SecretResolver {
    fetcher: Arc<dyn RemoteConfigFetch>,
    market_keys: Vec<String>,
    env_override: Option<String>,
}

impl SecretResolver {
    pub fn new(
        fetcher: Arc<dyn RemoteConfigFetch>,
        market_keys: Vec<String>,
        env_override: Option<String>,
    ) -> Self {
        Self {
            fetcher,
            market_keys,
            env_override: env_override.filter(|s| !s.trim().is_empty()),
        }
    }

    /// Like [`SecretResolver::new`], reading the override from
    /// `FOODORA_CLIENT_SECRET`.
    pub fn from_env(fetcher: Arc<dyn RemoteConfigFetch>, market_keys: Vec<String>) -> Self {
        Self::new(fetcher, market_keys, std::env::var(CLIENT_SECRET_ENV).ok())
    }

    pub fn market_keys(&self) -> &[String] {
        &self.market_keys
    }

    /// Secret for `client_id`: cache, then environment, then Remote Config.
    pub async fn resolve(
        &self,
        state: &mut SessionState,
        client_id: &str,
    ) -> Result<ResolvedSecret> {
        let client_id = normalize_client_id(client_id);

        if let Some(secret) = cached_secret(state, client_id) {
            debug!(client_id, source = "cache", "resolved client secret");
            return Ok(ResolvedSecret {
                secret: Secret::new(secret),
                source: SecretSource::Cache,
            });
        }

        if let Some(secret) = &self.env_override {
            debug!(client_id, source = "env", "resolved client secret");
            return Ok(ResolvedSecret {
                secret: Secret::new(secret.clone()),
                source: SecretSource::Env,
            });
        }

        self.fetch_and_cache(state, client_id).await
    }

    /// Bypass cache and environment; fetch and overwrite the cached secret.
    pub async fn force_refetch(
        &self,
        state: &mut SessionState,
        client_id: &str,
    ) -> Result<ResolvedSecret> {
        self.fetch_and_cache(state, normalize_client_id(client_id))
            .await
    }

    async fn fetch_and_cache(
        &self,
        state: &mut SessionState,
        client_id: &str,
    ) -> Result<ResolvedSecret> {
        let remote = self.fetcher.fetch().await?;
        let secret = select_client_secret(&remote.entries, &self.market_keys, client_id)?;

        let record = state.edit();
        record.client_secret = secret.clone();
        record.oauth_client_id = client_id.to_string();

        info!(client_id, markets = ?self.market_keys, "fetched client secret from remote config");
        Ok(ResolvedSecret {
            secret: Secret::new(secret),
            source: SecretSource::Remote,
        })
    }
}

fn normalize_client_id(client_id: &str) -> &str {
    match client_id.trim() {
        "" => DEFAULT_CLIENT_ID,
        id => id,
    }
}

fn cached_secret(state: &SessionState, client_id: &str) -> Option<String> {
    let record = state.record();
    let secret = record.client_secret.trim();
    if secret.is_empty() {
        return None;
    }

    let cached_id = record.oauth_client_id.trim();
    let matches = cached_id.eq_ignore_ascii_case(client_id)
        || (cached_id.is_empty() && client_id == DEFAULT_CLIENT_ID);
    matches.then(|| secret.to_string())
}

/// Pick the secret for `client_id` out of the `client_secrets` entry.
///
/// The entry is a JSON object keyed by upper-case market code. The first
/// market key with a non-empty value wins. That value is either the secret
/// itself or an object keyed by client id (possibly JSON-encoded as a
/// string), in which case the requested id is preferred, then `android`, then
/// `corp_android`.
pub fn select_client_secret(
    entries: &HashMap<String, String>,
    market_keys: &[String],
    client_id: &str,
) -> Result<String> {
    let raw = entries
        .get(CLIENT_SECRETS_KEY)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::SecretFetch(format!(
                "remote config entry {CLIENT_SECRETS_KEY} is missing or empty"
            ))
        })?;

    let by_market: HashMap<String, Value> = serde_json::from_str(raw).map_err(|e| {
        Error::SecretFetch(format!("{CLIENT_SECRETS_KEY} is not a JSON object: {e}"))
    })?;

    let value = market_keys
        .iter()
        .filter_map(|key| by_market.get(&key.to_ascii_uppercase()))
        .find(|v| !is_blank(v))
        .ok_or_else(|| {
            Error::SecretFetch(format!(
                "{CLIENT_SECRETS_KEY} has no value for markets {}",
                market_keys.join(",")
            ))
        })?;

    let per_client: HashMap<String, Value> = match value {
        Value::String(s) if s.trim_start().starts_with('{') => serde_json::from_str(s.trim())
            .map_err(|e| {
                Error::SecretFetch(format!("{CLIENT_SECRETS_KEY} market entry is not a JSON object: {e}"))
            })?,
        Value::String(s) => return Ok(s.trim().to_string()),
        Value::Object(map) => map.clone().into_iter().collect(),
        _ => {
            return Err(Error::SecretFetch(format!(
                "{CLIENT_SECRETS_KEY} market entry has an unexpected shape"
            )));
        }
    };

    [client_id, DEFAULT_CLIENT_ID, CORP_CLIENT_ID]
        .into_iter()
        .filter(|id| !id.is_empty())
        .filter_map(|id| per_client.get(id).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::SecretFetch(format!(
                "{CLIENT_SECRETS_KEY} market entry has no secret for {client_id}, \
                 {DEFAULT_CLIENT_ID} or {CORP_CLIENT_ID}"
            ))
        })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Remote Config stub returning queued `client_secrets` blobs in order;
    /// the last one repeats.
    pub struct StaticRemoteConfig {
        blobs: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl StaticRemoteConfig {
        pub fn new(blobs: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                blobs: Mutex::new(blobs.iter().rev().map(|b| b.to_string()).collect()),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RemoteConfigFetch for StaticRemoteConfig {
        fn fetch(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<RemoteConfigEntries>> + Send + '_>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut blobs = self.blobs.lock().unwrap();
            let blob = if blobs.len() > 1 {
                blobs.pop().unwrap_or_default()
            } else {
                blobs.last().cloned().unwrap_or_default()
            };
            let entries = HashMap::from([(CLIENT_SECRETS_KEY.to_string(), blob)]);
            Box::pin(async move { Ok(RemoteConfigEntries { entries }) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StaticRemoteConfig;
    use super::*;
    use crate::session::SessionRecord;

    fn keys(k: &[&str]) -> Vec<String> {
        k.iter().map(|s| s.to_string()).collect()
    }

    fn entries(blob: &str) -> HashMap<String, String> {
        HashMap::from([(CLIENT_SECRETS_KEY.to_string(), blob.to_string())])
    }

    fn state_with_cache(client_id: &str, secret: &str) -> SessionState {
        SessionState::new(SessionRecord {
            oauth_client_id: client_id.into(),
            client_secret: secret.into(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn cached_secret_reused_for_same_client_id() {
        let remote = StaticRemoteConfig::new(&[r#"{"HU":"cs-remote"}"#]);
        let resolver = SecretResolver::new(remote.clone(), keys(&["HU"]), None);
        let mut state = state_with_cache("Android", "cs-cached");

        let resolved = resolver.resolve(&mut state, "android").await.unwrap();
        assert_eq!(resolved.secret.expose(), "cs-cached");
        assert_eq!(resolved.source, SecretSource::Cache);
        assert_eq!(remote.calls(), 0);
        assert!(!state.is_dirty());
    }

    #[tokio::test]
    async fn android_secret_never_used_for_other_client() {
        let remote = StaticRemoteConfig::new(&[r#"{"HU":{"android":"cs-android","web":"cs-web"}}"#]);
        let resolver = SecretResolver::new(remote.clone(), keys(&["HU"]), None);
        let mut state = state_with_cache("android", "cs-android-cached");

        let resolved = resolver.resolve(&mut state, "web").await.unwrap();
        assert_eq!(resolved.secret.expose(), "cs-web");
        assert_eq!(resolved.source, SecretSource::Remote);
        assert_eq!(remote.calls(), 1);
        assert_eq!(state.record().oauth_client_id, "web");
        assert_eq!(state.record().client_secret, "cs-web");
        assert!(state.is_dirty());
    }

    #[tokio::test]
    async fn legacy_untagged_cache_only_serves_android() {
        let remote = StaticRemoteConfig::new(&[r#"{"HU":{"corp_android":"cs-corp"}}"#]);
        let resolver = SecretResolver::new(remote.clone(), keys(&["HU"]), None);

        let mut state = state_with_cache("", "cs-legacy");
        let resolved = resolver.resolve(&mut state, "android").await.unwrap();
        assert_eq!(resolved.secret.expose(), "cs-legacy");
        assert_eq!(remote.calls(), 0);

        let resolved = resolver.resolve(&mut state, "corp_android").await.unwrap();
        assert_eq!(resolved.secret.expose(), "cs-corp");
        assert_eq!(remote.calls(), 1);
    }

    #[tokio::test]
    async fn env_override_beats_remote_but_not_cache() {
        let remote = StaticRemoteConfig::new(&[r#"{"HU":"cs-remote"}"#]);
        let resolver =
            SecretResolver::new(remote.clone(), keys(&["HU"]), Some("cs-env".to_string()));

        let mut empty = SessionState::default();
        let resolved = resolver.resolve(&mut empty, "android").await.unwrap();
        assert_eq!(resolved.secret.expose(), "cs-env");
        assert_eq!(resolved.source, SecretSource::Env);
        assert!(!empty.is_dirty());

        let mut cached = state_with_cache("android", "cs-cached");
        let resolved = resolver.resolve(&mut cached, "android").await.unwrap();
        assert_eq!(resolved.source, SecretSource::Cache);
        assert_eq!(remote.calls(), 0);
    }

    #[tokio::test]
    async fn blank_env_override_is_ignored() {
        let remote = StaticRemoteConfig::new(&[r#"{"HU":"cs-remote"}"#]);
        let resolver = SecretResolver::new(remote, keys(&["HU"]), Some("  ".to_string()));
        let mut state = SessionState::default();
        let resolved = resolver.resolve(&mut state, "android").await.unwrap();
        assert_eq!(resolved.source, SecretSource::Remote);
    }

    #[tokio::test]
    async fn force_refetch_bypasses_cache_and_env() {
        let remote = StaticRemoteConfig::new(&[r#"{"HU":"cs-rotated"}"#]);
        let resolver =
            SecretResolver::new(remote.clone(), keys(&["HU"]), Some("cs-env".to_string()));
        let mut state = state_with_cache("android", "cs-stale");

        let resolved = resolver.force_refetch(&mut state, "android").await.unwrap();
        assert_eq!(resolved.secret.expose(), "cs-rotated");
        assert_eq!(state.record().client_secret, "cs-rotated");
        assert_eq!(state.record().oauth_client_id, "android");
        assert_eq!(remote.calls(), 1);
    }

    #[tokio::test]
    async fn empty_remote_secret_is_error_and_not_cached() {
        let remote = StaticRemoteConfig::new(&[r#"{"HU":""}"#]);
        let resolver = SecretResolver::new(remote, keys(&["HU"]), None);
        let mut state = state_with_cache("web", "cs-web");

        let err = resolver.resolve(&mut state, "android").await.unwrap_err();
        assert!(matches!(err, Error::SecretFetch(_)), "got {err:?}");
        assert_eq!(state.record().client_secret, "cs-web");
        assert!(!state.is_dirty());
    }

    #[test]
    fn bare_string_shape() {
        let out = select_client_secret(&entries(r#"{"HU":" cs-bare "}"#), &keys(&["HU"]), "web");
        assert_eq!(out.unwrap(), "cs-bare");
    }

    #[test]
    fn nested_object_shape_prefers_requested_then_android_then_corp() {
        let blob = r#"{"AT":{"android":"cs-a","corp_android":"cs-c","web":"cs-w"}}"#;
        let e = entries(blob);
        assert_eq!(select_client_secret(&e, &keys(&["AT"]), "web").unwrap(), "cs-w");
        assert_eq!(select_client_secret(&e, &keys(&["AT"]), "ios").unwrap(), "cs-a");

        let corp_only = entries(r#"{"AT":{"corp_android":"cs-c"}}"#);
        assert_eq!(select_client_secret(&corp_only, &keys(&["AT"]), "android").unwrap(), "cs-c");
    }

    #[test]
    fn nested_shape_encoded_as_string() {
        let blob = r#"{"HU":"{\"android\":\"cs-a\",\"corp_android\":\"cs-c\"}"}"#;
        let out = select_client_secret(&entries(blob), &keys(&["HU"]), "corp_android");
        assert_eq!(out.unwrap(), "cs-c");
    }

    #[test]
    fn nested_shape_without_known_ids_fails() {
        let out = select_client_secret(&entries(r#"{"HU":{"ios":"cs-i"}}"#), &keys(&["HU"]), "web");
        assert!(matches!(out, Err(Error::SecretFetch(_))));
    }

    #[test]
    fn first_non_empty_market_wins() {
        let blob = r#"{"MJ":"","AT":"cs-at","HU":"cs-hu"}"#;
        let out = select_client_secret(&entries(blob), &keys(&["MJ", "AT", "HU"]), "android");
        assert_eq!(out.unwrap(), "cs-at");
    }

    #[test]
    fn missing_or_malformed_entry_fails() {
        let none = HashMap::new();
        assert!(matches!(
            select_client_secret(&none, &keys(&["HU"]), "android"),
            Err(Error::SecretFetch(_))
        ));
        assert!(matches!(
            select_client_secret(&entries("not-json"), &keys(&["HU"]), "android"),
            Err(Error::SecretFetch(_))
        ));
        assert!(matches!(
            select_client_secret(&entries(r#"{"SE":"cs"}"#), &keys(&["HU"]), "android"),
            Err(Error::SecretFetch(_))
        ));
    }
}
