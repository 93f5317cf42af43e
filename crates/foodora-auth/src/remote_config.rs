//! Firebase Remote Config adapter
//!
//! The apps ship their OAuth client secrets through Remote Config rather than
//! in the binary. This is a thin client for the REST fetch endpoint; picking
//! the right secret out of the result is [`crate::secrets`]' job.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::API_BODY_LIMIT;
use crate::error::{Error, Result};
use crate::redact::render_body;
use crate::secrets::{RemoteConfigEntries, RemoteConfigFetch};
use crate::session::ProviderSettings;
use crate::transport::read_capped;

/// Public REST endpoint of Firebase Remote Config.
pub const DEFAULT_ENDPOINT: &str = "https://firebaseremoteconfig.googleapis.com";

/// Identifiers of one app's Firebase project, as embedded in the APK.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FirebaseProject {
    pub project_id: String,
    pub app_id: String,
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

impl FirebaseProject {
    /// Austria is served by the mjam app, which has its own project. Falls
    /// back to `default` when no mjam project is configured.
    pub fn for_market<'a>(
        settings: &ProviderSettings,
        default: &'a FirebaseProject,
        mjam: Option<&'a FirebaseProject>,
    ) -> &'a FirebaseProject {
        match mjam {
            Some(project) if settings.is_mjam_market() => project,
            _ => default,
        }
    }

    fn fetch_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/namespaces/firebase:fetch",
            self.endpoint.trim_end_matches('/'),
            self.project_id
        )
    }

    fn fetch_url_with_key(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.fetch_url())
            .map_err(|e| Error::Config(format!("invalid remote config endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchRequest<'a> {
    app_id: &'a str,
    app_instance_id: &'a str,
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    entries: HashMap<String, String>,
}

/// Remote Config client posing as a fresh app install.
pub struct FirebaseRemoteConfig {
    http: reqwest::Client,
    project: FirebaseProject,
    app_instance_id: String,
}

impl FirebaseRemoteConfig {
    pub fn new(project: FirebaseProject, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            project,
            app_instance_id: uuid::Uuid::new_v4().simple().to_string(),
        })
    }

    async fn fetch_entries(&self) -> Result<RemoteConfigEntries> {
        let url = self.project.fetch_url();
        debug!(project = %self.project.project_id, "fetching remote config");

        let response = self
            .http
            .post(self.project.fetch_url_with_key()?)
            .json(&FetchRequest {
                app_id: &self.project.app_id,
                app_instance_id: &self.app_instance_id,
            })
            .send()
            .await
            .map_err(|e| Error::RemoteConfig(format!("POST {url}: {}", e.without_url())))?;

        let status = response.status();
        let body = read_capped(response, API_BODY_LIMIT).await?;
        if !status.is_success() {
            return Err(Error::RemoteConfig(format!(
                "POST {url}: HTTP {}: {}",
                status.as_u16(),
                render_body(&body)
            )));
        }

        let parsed: FetchResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::RemoteConfig(format!("decoding fetch response: {e}")))?;
        Ok(RemoteConfigEntries {
            entries: parsed.entries,
        })
    }
}

impl RemoteConfigFetch for FirebaseRemoteConfig {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<RemoteConfigEntries>> + Send + '_>> {
        Box::pin(self.fetch_entries())
    }
}
