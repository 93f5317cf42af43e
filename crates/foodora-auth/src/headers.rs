//! Mobile-app identity headers
//!
//! The token endpoint and the customer API sit behind bot protection that
//! expects requests to look like they come from the Android app: a device id,
//! the app's API key, and (for the Austrian mjam app) its own app name and
//! user agent. Cookies imported from Chrome or learned by the browser fallback
//! are replayed for the base-URL host.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::constants::{
    ANDROID_APP_UA_PREFIX, FP_API_KEY, MJAM_APP_NAME, MJAM_USER_AGENT, default_user_agent,
};
use crate::session::{ProviderSettings, SessionRecord};

/// Headers derived from provider settings and the stored session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppIdentity {
    pub user_agent: String,
    pub original_user_agent: Option<String>,
    pub device_id: Option<String>,
    pub cookie: Option<String>,
    pub fp_api_key: String,
    pub app_name: Option<String>,
}

impl AppIdentity {
    /// User agent precedence: the one the browser fallback learned, then the
    /// market's app profile, then `ordercli/<version>`.
    pub fn for_session(settings: &ProviderSettings, record: &SessionRecord) -> Self {
        let mjam = settings.is_mjam_market();

        let user_agent = Some(record.http_user_agent.trim())
            .filter(|ua| !ua.is_empty())
            .map(str::to_string)
            .or_else(|| mjam.then(|| MJAM_USER_AGENT.to_string()))
            .unwrap_or_else(default_user_agent);

        let original_user_agent = user_agent
            .starts_with(ANDROID_APP_UA_PREFIX)
            .then(|| user_agent.clone());

        let cookie = settings
            .cookie_host()
            .and_then(|host| record.cookie_header_for(&host).map(str::to_string));

        Self {
            original_user_agent,
            device_id: non_empty(&record.device_id),
            cookie,
            fp_api_key: FP_API_KEY.to_string(),
            app_name: mjam.then(|| MJAM_APP_NAME.to_string()),
            user_agent,
        }
    }

    /// Insert the identity headers into `headers`.
    ///
    /// Values that are not valid header text (a cookie blob with a stray
    /// newline, say) are skipped with a warning rather than failing the call.
    pub fn apply(&self, headers: &mut HeaderMap) {
        let mut set = |name: HeaderName, value: &str| match HeaderValue::from_str(value) {
            Ok(v) => {
                headers.insert(name, v);
            }
            Err(e) => warn!(header = %name, error = %e, "skipping invalid header value"),
        };

        set(reqwest::header::USER_AGENT, &self.user_agent);
        if let Some(ua) = &self.original_user_agent {
            set(HeaderName::from_static("x-original-user-agent"), ua);
        }
        if let Some(device_id) = &self.device_id {
            set(HeaderName::from_static("x-device"), device_id);
            set(HeaderName::from_static("device-id"), device_id);
        }
        if let Some(cookie) = &self.cookie {
            set(reqwest::header::COOKIE, cookie);
        }
        set(HeaderName::from_static("x-fp-api-key"), &self.fp_api_key);
        if let Some(app_name) = &self.app_name {
            set(HeaderName::from_static("app-name"), app_name);
        }
    }

    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.apply(&mut headers);
        headers
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
