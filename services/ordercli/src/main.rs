//! ordercli-auth
//!
//! Command line front end of the foodora session engine:
//! 1. Loads `ordercli.toml` and the session file
//! 2. Runs one command (login, refresh, logout, status, cookie imports)
//! 3. Persists the session when it changed, even if the command failed
//!
//! The only layer that prints or picks the exit status.

mod cli;
mod config;
mod prompt;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use common::Secret;
use foodora_auth::{SecretResolver, SessionRecord, SessionState, SessionStore, now_millis};
use foodora_session::{
    CancelSignal, ChromeImportOptions, LoginOptions, LoginOutcome, SessionManager,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command, CookieSource, LoginArgs};
use crate::config::Config;
use crate::prompt::{TerminalPrompt, read_password};

const PASSWORD_ENV: &str = "FOODORA_PASSWORD";

/// Exit status of a login that stopped at an MFA challenge. 2 is taken by
/// usage errors.
const EXIT_MFA_PENDING: u8 = 3;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // JSON logs on stderr; quiet unless LOG_LEVEL / RUST_LOG ask for more
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let (config_path, explicit) = Config::resolve_path(cli.config.as_deref());
    let config = if explicit {
        Config::load(&config_path)
    } else {
        Config::load_or_default(&config_path)
    }
    .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(path = %config_path.display(), "configuration loaded");

    let store = SessionStore::new(config.session_path());
    let mut state = store
        .load()
        .await
        .with_context(|| format!("failed to load session from {}", store.path().display()))?;

    let cancel = CancelSignal::new();
    spawn_interrupt_watcher(cancel.clone());

    let settings = config.provider_settings();
    let secrets = SecretResolver::from_env(
        config.remote_config()?,
        settings.market_key_candidates(),
    );
    let mut manager = SessionManager::new(settings, secrets)
        .with_prompt(Arc::new(TerminalPrompt))
        .with_cancel(cancel)
        .with_http_timeout(config.http_timeout());
    if let Some(browser) = config.browser_fallback() {
        manager = manager.with_browser(browser);
    }

    let result = run(&manager, &config, &mut state, cli.command).await;

    // A pending MFA challenge must survive a failed or interrupted login.
    match store.save_if_dirty(&mut state).await {
        Ok(true) => info!(path = %store.path().display(), "session saved"),
        Ok(false) => {}
        Err(e) if result.is_ok() => {
            return Err(e)
                .with_context(|| format!("failed to save session to {}", store.path().display()));
        }
        Err(e) => error!(error = %e, "failed to save session"),
    }

    result
}

async fn run(
    manager: &SessionManager,
    config: &Config,
    state: &mut SessionState,
    command: Command,
) -> Result<ExitCode> {
    match command {
        Command::Login(args) => {
            let options = login_options(args, config).await?;
            match manager.login(state, options).await.context("login failed")? {
                LoginOutcome::LoggedIn {
                    client_id,
                    expires_at,
                } => {
                    println!(
                        "logged in (client {client_id}, {})",
                        describe_expiry(expires_at, now_millis())
                    );
                }
                LoginOutcome::MfaPending(deferred) => {
                    println!("{deferred}");
                    return Ok(ExitCode::from(EXIT_MFA_PENDING));
                }
            }
        }

        Command::Refresh { client_id } => {
            let refreshed = manager
                .refresh(state, client_id.as_deref())
                .await
                .context("refresh failed")?;
            println!(
                "token refreshed (client {}, {})",
                refreshed.client_id,
                describe_expiry(refreshed.expires_at, now_millis())
            );
        }

        Command::Logout => {
            manager.logout(state);
            println!("logged out");
        }

        Command::Status => {
            print!("{}", status(manager, state).await);
        }

        Command::Cookies(source) => {
            let cookies = config.chrome_cookies()?;
            let imported = manager
                .import_cookies(state, &cookies, &chrome_options(source, None))
                .await
                .context("cookie import failed")?;
            println!(
                "imported {} cookies for {}",
                imported.cookie_count, imported.host
            );
        }

        Command::SessionChrome { source, client_id } => {
            let cookies = config.chrome_cookies()?;
            let imported = manager
                .import_chrome_session(state, &cookies, &chrome_options(source, client_id))
                .await
                .context("Chrome session import failed")?;
            if imported.has_access_token {
                println!(
                    "imported Chrome session (client {}, {})",
                    imported.client_id,
                    describe_expiry(imported.expires_at, now_millis())
                );
            } else {
                println!(
                    "imported refresh token (client {}); run `ordercli-auth refresh`",
                    imported.client_id
                );
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn login_options(args: LoginArgs, config: &Config) -> Result<LoginOptions> {
    let password = match (args.password, args.password_stdin) {
        (Some(password), _) => password,
        (None, true) => read_password()
            .await
            .context("failed to read password from stdin")?,
        (None, false) => std::env::var(PASSWORD_ENV).map_err(|_| {
            anyhow::anyhow!("password required: pass --password, --password-stdin or set {PASSWORD_ENV}")
        })?,
    };

    let mut options = LoginOptions::new(args.email, Secret::new(password));
    options.client_id = args.client_id;
    options.client_secret = args.client_secret.map(Secret::new);
    options.store_client_secret = args.store_client_secret;
    options.otp_method = args.otp_method;
    options.otp_code = args.otp;
    options.mfa_token = args.mfa_token;
    options.wait_for_otp = !args.no_wait;
    options.otp_timeout = config.otp_timeout();
    options.use_browser = args.browser;
    Ok(options)
}

fn chrome_options(source: CookieSource, client_id: Option<String>) -> ChromeImportOptions {
    ChromeImportOptions {
        url: source.url,
        chrome_profile: source.profile.unwrap_or_default(),
        cookie_path: source.cookie_path.unwrap_or_default(),
        client_id,
    }
}

/// Cancel on Ctrl-C. A second Ctrl-C is left to the default handler.
fn spawn_interrupt_watcher(cancel: CancelSignal) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received SIGINT, cancelling");
                cancel.cancel("interrupted");
            }
            Err(e) => warn!(error = %e, "failed to install Ctrl+C handler"),
        }
    });
}

/// Status report, refreshing first when the access token is about to
/// expire. A failed refresh is reported but the status is still shown.
async fn status(manager: &SessionManager, state: &mut SessionState) -> String {
    if state.record().has_session() {
        if let Err(e) = manager.ensure_fresh_session(state).await {
            warn!(error = %e, "session refresh failed");
            eprintln!("warning: could not refresh the session: {e}");
        }
    }
    format_status(state.record(), now_millis())
}

fn describe_expiry(expires_at: Option<u64>, now_ms: u64) -> String {
    match expires_at {
        None => "expiry unknown".to_string(),
        Some(at) if at <= now_ms => "expired".to_string(),
        Some(at) => {
            let mins = (at - now_ms) / 60_000;
            if mins >= 60 {
                format!("expires in {}h{:02}m", mins / 60, mins % 60)
            } else {
                format!("expires in {mins}m")
            }
        }
    }
}

fn format_status(record: &SessionRecord, now_ms: u64) -> String {
    let mut out = String::new();
    if record.has_session() {
        out.push_str(&format!(
            "logged in: yes ({})\n",
            describe_expiry(record.effective_expiry(), now_ms)
        ));
        if record.token_likely_expired(now_ms) {
            out.push_str("refresh: due\n");
        }
    } else if !record.refresh_token.is_empty() {
        out.push_str("logged in: refresh token only (run `ordercli-auth refresh`)\n");
    } else {
        out.push_str("logged in: no\n");
    }

    let client_id = match record.oauth_client_id.trim() {
        "" => "-",
        id => id,
    };
    out.push_str(&format!("client id: {client_id}\n"));
    out.push_str(&format!(
        "client secret cached: {}\n",
        if record.client_secret.is_empty() { "no" } else { "yes" }
    ));
    if let Some(pending) = &record.pending_challenge {
        out.push_str(&format!(
            "pending MFA: {} for {}\n",
            pending.channel, pending.email
        ));
    }
    if !record.cookies_by_host.is_empty() {
        let hosts: Vec<&str> = record.cookies_by_host.keys().map(String::as_str).collect();
        out.push_str(&format!("cookies: {}\n", hosts.join(", ")));
    }
    out
}
