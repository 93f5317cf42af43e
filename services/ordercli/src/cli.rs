//! Command line definition

use std::fmt;

use clap::builder::NonEmptyStringValueParser;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "ordercli-auth",
    version,
    about = "Foodora login and session management for ordercli",
    after_help = "Environment:\n  ORDERCLI_CONFIG        config file (default ordercli.toml)\n  FOODORA_PASSWORD       password when neither --password nor --password-stdin is given\n  FOODORA_CLIENT_SECRET  client secret override\n  LOG_LEVEL / RUST_LOG   log filter (default warn)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (overrides ORDERCLI_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Log in with email and password, answering an MFA challenge if needed
    Login(LoginArgs),

    /// Refresh the access token now
    Refresh {
        /// Client id to refresh for instead of the stored one
        #[arg(long)]
        client_id: Option<String>,
    },

    /// Forget the tokens and any pending MFA challenge
    Logout,

    /// Show the session, refreshing the access token when it is about to expire
    Status,

    /// Import Chrome cookies for the API host
    Cookies(CookieSource),

    /// Import a logged-in web session from Chrome
    SessionChrome {
        #[command(flatten)]
        source: CookieSource,

        /// Client id instead of the token's `client_id` claim
        #[arg(long)]
        client_id: Option<String>,
    },
}

#[derive(Default, PartialEq, Eq, Args)]
pub struct LoginArgs {
    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    pub email: String,

    #[arg(long, conflicts_with = "password_stdin")]
    pub password: Option<String>,

    /// Read the password from stdin
    #[arg(long)]
    pub password_stdin: bool,

    #[arg(long)]
    pub client_id: Option<String>,

    /// Use this client secret instead of the cached or fetched one
    #[arg(long)]
    pub client_secret: Option<String>,

    /// Cache --client-secret in the session file
    #[arg(long, requires = "client_secret")]
    pub store_client_secret: bool,

    /// MFA channel (sms or email)
    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    pub otp_method: Option<String>,

    /// MFA code for a pending challenge
    #[arg(long, value_name = "CODE")]
    pub otp: Option<String>,

    #[arg(long)]
    pub mfa_token: Option<String>,

    /// Do not prompt for an MFA code; print how to finish the login instead
    #[arg(long)]
    pub no_wait: bool,

    /// Log in through the configured browser helper
    #[arg(long)]
    pub browser: bool,
}

impl fmt::Debug for LoginArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("LoginArgs")
            .field("email", &self.email)
            .field("password", &mask(&self.password))
            .field("password_stdin", &self.password_stdin)
            .field("client_id", &self.client_id)
            .field("client_secret", &mask(&self.client_secret))
            .field("store_client_secret", &self.store_client_secret)
            .field("otp_method", &self.otp_method)
            .field("otp", &mask(&self.otp))
            .field("mfa_token", &mask(&self.mfa_token))
            .field("no_wait", &self.no_wait)
            .field("browser", &self.browser)
            .finish()
    }
}

/// Where the cookie helper reads Chrome cookies from.
#[derive(Debug, Default, PartialEq, Eq, Args)]
pub struct CookieSource {
    /// Site whose cookies to read; only its origin is used
    #[arg(long)]
    pub url: Option<String>,

    /// Chrome profile directory name
    #[arg(long, value_name = "NAME")]
    pub profile: Option<String>,

    /// Explicit path to a Chrome `Cookies` database
    #[arg(long, value_name = "FILE")]
    pub cookie_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("ordercli-auth").chain(args.iter().copied()))
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_login_with_otp_flags() {
        let cli = parse(&[
            "login",
            "--email",
            "me@example.com",
            "--password=pw",
            "--otp-method",
            "email",
            "--otp",
            "123456",
            "--no-wait",
        ])
        .unwrap();

        let Command::Login(login) = cli.command else {
            panic!("expected login");
        };
        assert_eq!(login.email, "me@example.com");
        assert_eq!(login.password.as_deref(), Some("pw"));
        assert_eq!(login.otp_method.as_deref(), Some("email"));
        assert_eq!(login.otp.as_deref(), Some("123456"));
        assert!(login.no_wait);
        assert!(!login.browser);
    }

    #[test]
    fn config_flag_is_accepted_anywhere() {
        let cli = parse(&["status", "--config", "/etc/ordercli.toml"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("/etc/ordercli.toml"));
        assert_eq!(cli.command, Command::Status);

        let cli = parse(&["--config=/tmp/o.toml", "logout"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("/tmp/o.toml"));
        assert_eq!(cli.command, Command::Logout);
    }

    #[test]
    fn login_requires_non_empty_email() {
        let err = parse(&["login", "--password", "pw"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let err = parse(&["login", "--email", ""]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn password_sources_conflict() {
        let err = parse(&[
            "login",
            "--email",
            "me@example.com",
            "--password",
            "pw",
            "--password-stdin",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn storing_a_secret_needs_one() {
        let err = parse(&["login", "--email", "me@example.com", "--store-client-secret"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn empty_otp_method_is_rejected() {
        let err = parse(&["login", "--email", "me@example.com", "--otp-method="]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn cookie_options_are_scoped_to_their_commands() {
        let cli = parse(&[
            "session-chrome",
            "--url",
            "https://www.foodora.at/",
            "--profile",
            "Profile 1",
            "--client-id",
            "web",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::SessionChrome {
                source: CookieSource {
                    url: Some("https://www.foodora.at/".into()),
                    profile: Some("Profile 1".into()),
                    cookie_path: None,
                },
                client_id: Some("web".into()),
            }
        );

        let err = parse(&["cookies", "--client-id", "web"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);

        let cli = parse(&["refresh", "--client-id", "web"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Refresh {
                client_id: Some("web".into())
            }
        );
    }

    #[test]
    fn unknown_and_missing_commands() {
        assert!(parse(&[]).is_err());
        assert_eq!(
            parse(&["lgoin"]).unwrap_err().kind(),
            ErrorKind::InvalidSubcommand
        );
    }

    #[test]
    fn debug_hides_credentials() {
        let login = LoginArgs {
            email: "me@example.com".into(),
            password: Some("hunter2".into()),
            client_secret: Some("cs-live".into()),
            ..Default::default()
        };
        let rendered = format!("{login:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("cs-live"));
        assert!(rendered.contains("me@example.com"));
    }
}
