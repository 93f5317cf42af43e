//! Configuration types and loading
//!
//! Config path precedence: `--config` > `ORDERCLI_CONFIG` env var > `ordercli.toml`.
//! A missing default file means defaults; a missing explicit file is an error.
//! Client secrets never live in the TOML: they come from the session cache,
//! `FOODORA_CLIENT_SECRET` or Remote Config.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use foodora_auth::{
    BrowserFallback, ChromeCookies, FirebaseProject, FirebaseRemoteConfig, HelperCommand,
    ProviderSettings, RemoteConfigEntries, RemoteConfigFetch,
};
use serde::Deserialize;

pub const CONFIG_ENV: &str = "ORDERCLI_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "ordercli.toml";
const DEFAULT_SESSION_FILE: &str = "ordercli-session.json";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub foodora: FoodoraConfig,
    #[serde(default)]
    pub remote_config: RemoteConfigSection,
    #[serde(default)]
    pub browser: Option<BrowserConfig>,
    #[serde(default)]
    pub cookies: Option<HelperConfig>,
    /// Directory of the config file; relative paths resolve against it.
    #[serde(skip)]
    base_dir: PathBuf,
}

/// Market and session settings
#[derive(Debug, Deserialize)]
pub struct FoodoraConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub target_country_iso: String,
    #[serde(default)]
    pub global_entity_id: String,
    #[serde(default)]
    pub session_path: Option<PathBuf>,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_otp_timeout")]
    pub otp_timeout_secs: u64,
}

impl Default for FoodoraConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            target_country_iso: String::new(),
            global_entity_id: String::new(),
            session_path: None,
            http_timeout_secs: default_http_timeout(),
            otp_timeout_secs: default_otp_timeout(),
        }
    }
}

/// Firebase projects the client secrets are fetched from
#[derive(Debug, Default, Deserialize)]
pub struct RemoteConfigSection {
    #[serde(default)]
    pub default: Option<FirebaseProject>,
    /// Austrian market app; falls back to `default`.
    #[serde(default)]
    pub mjam: Option<FirebaseProject>,
}

/// External helper program
#[derive(Debug, Clone, Deserialize)]
pub struct HelperConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl HelperConfig {
    fn command(&self) -> HelperCommand {
        HelperCommand::new(self.program.clone(), self.args.clone())
    }
}

/// Browser login helper
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    #[serde(flatten)]
    pub helper: HelperConfig,
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
}

fn default_http_timeout() -> u64 {
    20
}

fn default_otp_timeout() -> u64 {
    600
}

impl Config {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields defaults.
    pub fn load_or_default(path: &Path) -> common::Result<Self> {
        match Self::load(path) {
            Err(common::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut config = Config::default();
                config.base_dir = path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                Ok(config)
            }
            other => other,
        }
    }

    /// Resolve config file path from CLI arg or `ORDERCLI_CONFIG`. The flag
    /// tells whether the path was chosen explicitly.
    pub fn resolve_path(cli_path: Option<&str>) -> (PathBuf, bool) {
        if let Some(p) = cli_path {
            return (PathBuf::from(p), true);
        }
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            if !p.trim().is_empty() {
                return (PathBuf::from(p), true);
            }
        }
        (PathBuf::from(DEFAULT_CONFIG_FILE), false)
    }

    fn validate(&self) -> common::Result<()> {
        let base_url = self.foodora.base_url.trim();
        if !base_url.is_empty()
            && !base_url.starts_with("http://")
            && !base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {base_url}"
            )));
        }

        if self.foodora.http_timeout_secs == 0 {
            return Err(common::Error::Config(
                "http_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.foodora.otp_timeout_secs == 0 {
            return Err(common::Error::Config(
                "otp_timeout_secs must be greater than 0".into(),
            ));
        }

        for (section, helper) in [
            ("browser", self.browser.as_ref().map(|b| &b.helper)),
            ("cookies", self.cookies.as_ref()),
        ] {
            if helper.is_some_and(|h| h.program.trim().is_empty()) {
                return Err(common::Error::Config(format!(
                    "[{section}] program must not be empty"
                )));
            }
        }
        Ok(())
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            base_url: self.foodora.base_url.trim().to_string(),
            target_country_iso: self.foodora.target_country_iso.trim().to_string(),
            global_entity_id: self.foodora.global_entity_id.trim().to_string(),
        }
    }

    pub fn session_path(&self) -> PathBuf {
        let path = self
            .foodora
            .session_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE));
        if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.foodora.http_timeout_secs)
    }

    pub fn otp_timeout(&self) -> Duration {
        Duration::from_secs(self.foodora.otp_timeout_secs)
    }

    /// Remote Config client for the configured market.
    pub fn remote_config(&self) -> foodora_auth::Result<Arc<dyn RemoteConfigFetch>> {
        let Some(default) = self.remote_config.default.as_ref() else {
            return Ok(Arc::new(UnconfiguredRemoteConfig));
        };
        let project = FirebaseProject::for_market(
            &self.provider_settings(),
            default,
            self.remote_config.mjam.as_ref(),
        );
        Ok(Arc::new(FirebaseRemoteConfig::new(
            project.clone(),
            self.http_timeout(),
        )?))
    }

    pub fn browser_fallback(&self) -> Option<BrowserFallback> {
        self.browser.as_ref().map(|b| {
            let profile_dir = b.profile_dir.as_ref().map(|p| self.resolve(p));
            BrowserFallback::new(b.helper.command(), profile_dir).with_timeout(self.otp_timeout())
        })
    }

    pub fn chrome_cookies(&self) -> foodora_auth::Result<ChromeCookies> {
        self.cookies
            .as_ref()
            .map(|c| ChromeCookies::new(c.command()))
            .ok_or(foodora_auth::Error::MissingConfig {
                field: "cookies.program",
                remedy: "set [cookies] program in ordercli.toml",
            })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Stand-in when no Firebase project is configured: any fetch names the fix.
struct UnconfiguredRemoteConfig;

impl RemoteConfigFetch for UnconfiguredRemoteConfig {
    fn fetch(
        &self,
    ) -> Pin<Box<dyn Future<Output = foodora_auth::Result<RemoteConfigEntries>> + Send + '_>> {
        Box::pin(async {
            Err(foodora_auth::Error::MissingConfig {
                field: "remote_config.default",
                remedy: "add [remote_config.default] to ordercli.toml or set FOODORA_CLIENT_SECRET",
            })
        })
    }
}
