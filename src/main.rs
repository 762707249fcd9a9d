//! hltoken -- HighLevel OAuth token manager.
//!
//! Entry point for the CLI. Loads configuration, initializes logging, and
//! runs exactly one action against the [`TokenStore`]. Logs go to stderr so
//! `--get-token` can be piped.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgGroup, CommandFactory, Parser};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use hltoken::config::Config;
use hltoken::oauth::{ConsoleAuthorizer, OAuthError, TokenRecord, TokenStatus, TokenStore};
use hltoken::AppError;

/// Number of characters of a secret shown in setup/refresh output.
const PREVIEW_CHARS: usize = 20;

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "hltoken", about = "HighLevel OAuth token manager", version)]
#[command(group(
    ArgGroup::new("action")
        .args(["setup", "refresh", "get_token", "status", "auth_url"])
        .multiple(false)
))]
struct Cli {
    /// Authorize the app in a browser and store the resulting tokens
    #[arg(long)]
    setup: bool,

    /// Force a token refresh
    #[arg(long)]
    refresh: bool,

    /// Print a valid access token, refreshing first if it is about to expire
    #[arg(long)]
    get_token: bool,

    /// Show whether tokens are stored and when they expire
    #[arg(long)]
    status: bool,

    /// Print the status report as JSON (with --status)
    #[arg(long, requires = "status")]
    json: bool,

    /// Print the authorization URL without opening a browser
    #[arg(long)]
    auth_url: bool,

    /// Path to configuration file
    #[arg(long, short = 'c', env = "HLTOKEN_CONFIG", default_value = "hltoken.toml")]
    config: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Setup,
    Refresh,
    GetToken,
    Status,
    AuthUrl,
}

impl Cli {
    fn action(&self) -> Option<Action> {
        if self.setup {
            Some(Action::Setup)
        } else if self.refresh {
            Some(Action::Refresh)
        } else if self.get_token {
            Some(Action::GetToken)
        } else if self.status {
            Some(Action::Status)
        } else if self.auth_url {
            Some(Action::AuthUrl)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(action) = cli.action() else {
        if let Err(e) = Cli::command().print_help() {
            eprintln!("Error: {e}");
        }
        return ExitCode::SUCCESS;
    };

    match run(action, &cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(kind = err.kind(), code = err.exit_code(), "Command failed");
            eprintln!("Error: {err}");
            err.into()
        }
    }
}

fn run(action: Action, cli: &Cli) -> Result<(), AppError> {
    let config_path = cli.config.as_path();
    let config = Config::load(config_path)?;
    init_tracing(&config);
    log_config_notices(&config, config_path);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        backend = %config.storage.backend,
        ?action,
        "Starting hltoken"
    );

    if action != Action::Status && !config.highlevel.has_credentials() {
        return Err(AppError::MissingCredentials);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| OAuthError::Other(format!("Failed to build Tokio runtime: {e}")))?;

    let store = TokenStore::from_config(&config)?;
    runtime.block_on(dispatch(action, &store, &config, cli.json))
}

/// Report what `Config::load` could not log itself.
fn log_config_notices(config: &Config, config_path: &Path) {
    if config.loaded_from.is_none() {
        tracing::info!(
            path = %config_path.display(),
            "Config file not found, using defaults and HIGHLEVEL_* environment"
        );
    }
    for env in config.env_overrides.ignored() {
        tracing::warn!(env = %env, "Ignoring unparsable env override");
    }
}

async fn dispatch(
    action: Action,
    store: &TokenStore,
    config: &Config,
    json: bool,
) -> Result<(), AppError> {
    match action {
        Action::Setup => {
            let mut authorizer = ConsoleAuthorizer::stdio();
            let record = store.authorize_interactively(&mut authorizer).await?;
            println!("\nTokens saved.");
            print_record(&record);
        }
        Action::Refresh => {
            let record = store.refresh_token().await?;
            println!("Token refreshed.");
            print_record(&record);
        }
        Action::GetToken => {
            let token = store.get_valid_token().await?;
            println!("{token}");
        }
        Action::Status => print_status(store, config, json)?,
        Action::AuthUrl => println!("{}", store.authorization_url()),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// First [`PREVIEW_CHARS`] characters of a secret, with an ellipsis if cut.
fn preview(secret: &str) -> String {
    let mut chars = secret.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

fn format_epoch(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

fn print_record(record: &TokenRecord) {
    println!("Access token:  {}", preview(&record.access_token));
    match record.usable_refresh_token() {
        Some(refresh) => println!("Refresh token: {}", preview(refresh)),
        None => println!("Refresh token: (none)"),
    }
    if let Some(exp) = record.expires_at {
        println!("Expires at:    {}", format_epoch(exp));
    }
    if let Some(location) = &record.location_id {
        println!("Location ID:   {location}");
    }
}

/// Settings whose origin is shown by `--status`.
const SOURCED_SETTINGS: [&str; 3] = [
    "highlevel.client_id",
    "highlevel.client_secret",
    "storage.token_file",
];

#[derive(Debug, Serialize)]
struct StatusReport {
    storage: String,
    #[serde(flatten)]
    token: TokenStatus,
    /// Setting key -> where its value came from.
    sources: Vec<(&'static str, String)>,
}

fn status_report(store: &TokenStore, config: &Config) -> Result<StatusReport, AppError> {
    Ok(StatusReport {
        storage: store.storage().name().to_string(),
        token: store.status()?,
        sources: SOURCED_SETTINGS
            .iter()
            .map(|key| (*key, config.source_of(key)))
            .collect(),
    })
}

fn print_status(store: &TokenStore, config: &Config, json: bool) -> Result<(), AppError> {
    let report = status_report(store, config)?;
    if json {
        let out = serde_json::to_string_pretty(&report)
            .map_err(|e| OAuthError::Other(format!("Failed to encode status: {e}")))?;
        println!("{out}");
        return Ok(());
    }

    println!("Storage:       {}", report.storage);
    for (key, source) in &report.sources {
        println!("  {key}: {source}");
    }
    let status = report.token;
    if !status.authorized {
        println!("Authorized:    no (run with --setup)");
        return Ok(());
    }

    println!("Authorized:    yes");
    println!(
        "Refresh token: {}",
        if status.has_refresh_token { "yes" } else { "no" }
    );
    match (status.expires_at, status.expires_in_secs) {
        (Some(exp), Some(left)) => {
            println!("Expires at:    {} ({left}s left)", format_epoch(exp));
        }
        _ => println!("Expires at:    unknown"),
    }
    if status.expired {
        println!("State:         expired");
    } else if status.needs_refresh {
        println!("State:         due for refresh");
    } else {
        println!("State:         valid");
    }
    if let Some(location) = &status.location_id {
        println!("Location ID:   {location}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("hltoken={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_each_action() {
        let cases = [
            ("--setup", Action::Setup),
            ("--refresh", Action::Refresh),
            ("--get-token", Action::GetToken),
            ("--status", Action::Status),
            ("--auth-url", Action::AuthUrl),
        ];
        for (flag, expected) in cases {
            let cli = Cli::try_parse_from(["hltoken", flag, "--config", "x.toml"]).unwrap();
            assert_eq!(cli.action(), Some(expected), "{flag}");
        }
    }

    #[test]
    fn test_no_flag_has_no_action() {
        let cli = Cli::try_parse_from(["hltoken", "--config", "x.toml"]).unwrap();
        assert_eq!(cli.action(), None);
        assert_eq!(cli.config, PathBuf::from("x.toml"));
    }

    #[test]
    fn test_actions_are_mutually_exclusive() {
        let err = Cli::try_parse_from(["hltoken", "--setup", "--refresh"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_unknown_flag_is_usage_error() {
        let err = Cli::try_parse_from(["hltoken", "--logout"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_json_requires_status() {
        let cli = Cli::try_parse_from(["hltoken", "--status", "--json"]).unwrap();
        assert_eq!(cli.action(), Some(Action::Status));
        assert!(cli.json);

        let err = Cli::try_parse_from(["hltoken", "--json"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_status_report_json_carries_sources() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.token_file = dir.path().join("tokens.json");
        let store = TokenStore::from_config(&config).unwrap();

        let report = status_report(&store, &config).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["storage"], "file");
        assert_eq!(json["authorized"], false);
        assert_eq!(json["sources"][0][0], "highlevel.client_id");
        assert_eq!(json["sources"][0][1], "default");
        assert_eq!(json["sources"].as_array().unwrap().len(), SOURCED_SETTINGS.len());
    }

    #[test]
    fn test_preview_truncates_long_secrets() {
        let token = "abcdefghijklmnopqrstuvwxyz";
        assert_eq!(preview(token), "abcdefghijklmnopqrst...");
        assert_eq!(preview("short"), "short");
        assert_eq!(preview(&"x".repeat(20)), "x".repeat(20));
    }

    #[test]
    fn test_format_epoch() {
        assert_eq!(format_epoch(0), "1970-01-01T00:00:00+00:00");
    }
}
