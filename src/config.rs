use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::oauth::highlevel::{
    DEFAULT_AUTH_URL, DEFAULT_REDIRECT_URI, DEFAULT_TOKEN_URL, HighLevelOAuthConfig,
};

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
    ignored: Vec<String>,
}

impl EnvOverrides {
    /// Get the env var name that overrides the given setting key
    /// (e.g. "storage.token_file").
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// All overrides as (setting key, env var) pairs, sorted by key.
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<_> = self
            .overrides
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// Env vars that were set but could not be parsed.
    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }

    fn ignore(&mut self, env_var: &str) {
        self.ignored.push(env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub highlevel: HighLevelConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
    /// File the settings were read from; `None` when it did not exist.
    #[serde(skip)]
    pub loaded_from: Option<PathBuf>,
}

/// OAuth app registration.
#[derive(Clone, Deserialize, Serialize)]
pub struct HighLevelConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

impl Default for HighLevelConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
        }
    }
}

impl HighLevelConfig {
    /// Both the client id and secret are set.
    pub fn has_credentials(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }

    pub fn oauth_config(&self) -> HighLevelOAuthConfig {
        HighLevelOAuthConfig::from_provider_config(
            self.client_id.trim(),
            self.client_secret.trim(),
            &self.redirect_uri,
            &self.auth_url,
            &self.token_url,
        )
    }
}

impl std::fmt::Debug for HighLevelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secret = if self.client_secret.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("HighLevelConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &secret)
            .field("redirect_uri", &self.redirect_uri)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            token_file: default_token_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Keyring => write!(f, "keyring"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Unknown storage backend: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// Whole-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}
fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}
fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}
fn default_token_file() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("hltoken").join("highlevel_tokens.json"))
        .unwrap_or_else(|| PathBuf::from(".highlevel_tokens.json"))
}
const fn default_timeout_secs() -> u64 {
    30
}
const fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `HIGHLEVEL_` takes precedence over
    /// the file value and is tracked in `env_overrides`.
    ///
    /// A missing file is not an error; `loaded_from` stays `None` so the
    /// caller can report it once logging is up.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let mut config: Config = toml::from_str(&content)?;
            config.loaded_from = Some(path.to_path_buf());
            config
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Where the value of setting `key` came from: an env var, the config
    /// file, or the built-in default.
    pub fn source_of(&self, key: &str) -> String {
        match (self.env_overrides.env_var_for(key), &self.loaded_from) {
            (Some(var), _) => format!("env {var}"),
            (None, Some(path)) => format!("config file {}", path.display()),
            (None, None) => "default".to_string(),
        }
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// `HIGHLEVEL_CLIENT_ID` and `HIGHLEVEL_CLIENT_SECRET` are how credentials
    /// are normally supplied; the file rarely carries the secret.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    match val.parse() {
                        Ok(parsed) => {
                            $field = parsed;
                            ov.record($key, $env);
                        }
                        Err(_) => ov.ignore($env),
                    }
                }
            };
        }
        macro_rules! env_path {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = PathBuf::from(val);
                    ov.record($key, $env);
                }
            };
        }

        // -- HighLevel app --
        env_str!("highlevel.client_id", "HIGHLEVEL_CLIENT_ID", self.highlevel.client_id);
        env_str!(
            "highlevel.client_secret",
            "HIGHLEVEL_CLIENT_SECRET",
            self.highlevel.client_secret
        );
        env_str!(
            "highlevel.redirect_uri",
            "HIGHLEVEL_REDIRECT_URI",
            self.highlevel.redirect_uri
        );
        env_str!("highlevel.auth_url", "HIGHLEVEL_AUTH_URL", self.highlevel.auth_url);
        env_str!("highlevel.token_url", "HIGHLEVEL_TOKEN_URL", self.highlevel.token_url);

        // -- Storage --
        env_parse!(
            "storage.backend",
            "HIGHLEVEL_STORAGE_BACKEND",
            self.storage.backend
        );
        env_path!(
            "storage.token_file",
            "HIGHLEVEL_TOKEN_FILE",
            self.storage.token_file
        );

        // -- HTTP --
        env_parse!(
            "http.timeout_secs",
            "HIGHLEVEL_HTTP_TIMEOUT",
            self.http.timeout_secs
        );
        env_parse!(
            "http.connect_timeout_secs",
            "HIGHLEVEL_HTTP_CONNECT_TIMEOUT",
            self.http.connect_timeout_secs
        );

        // -- Logging --
        env_str!("logging.level", "HIGHLEVEL_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "HIGHLEVEL_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

// Helper for default token file location
mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
