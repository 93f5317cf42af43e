//! Authenticated customer API client
//!
//! Handed out by the session orchestrator once the access token is known to
//! be fresh. Carries the same app identity headers as the token endpoint plus
//! the bearer token and market headers.

use std::time::Duration;

use common::Secret;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::warn;
use url::Url;

use crate::constants::API_BODY_LIMIT;
use crate::error::{Error, HttpError, Result};
use crate::headers::AppIdentity;
use crate::session::ProviderSettings;
use crate::transport::read_capped;

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    identity: AppIdentity,
    access_token: Secret<String>,
    global_entity_id: String,
    target_country_iso: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("access_token", &self.access_token)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(
        settings: &ProviderSettings,
        identity: AppIdentity,
        access_token: Secret<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base = settings.require_base_url()?;
        let mut base_url = Url::parse(base)
            .map_err(|e| Error::Config(format!("invalid base_url {base:?}: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            identity,
            access_token,
            global_entity_id: settings.global_entity_id.trim().to_string(),
            target_country_iso: settings.target_country_iso.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// GET `path` (relative to the base URL) and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("invalid API path {path:?}: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        let mut headers = self.identity.to_header_map();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in [
            ("x-global-entity-id", &self.global_entity_id),
            ("x-target-country-code-iso", &self.target_country_iso),
        ] {
            if value.is_empty() {
                continue;
            }
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    headers.insert(HeaderName::from_static(name), v);
                }
                Err(e) => warn!(header = name, error = %e, "skipping invalid header value"),
            }
        }
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.access_token.expose()))
            .map_err(|_| Error::Config("access token is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, bearer);

        let response = self
            .http
            .get(url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| Error::Http(format!("GET {url}: {e}")))?;

        let status = response.status().as_u16();
        let body = read_capped(response, API_BODY_LIMIT).await?;
        if !(200..300).contains(&status) {
            return Err(HttpError {
                method: "GET".into(),
                url: url.to_string(),
                status,
                body,
            }
            .into());
        }

        serde_json::from_slice(&body).map_err(|e| Error::Http(format!("{path}: decode JSON: {e}")))
    }
}
