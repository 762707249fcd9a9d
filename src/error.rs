use std::process::ExitCode;

use crate::oauth::OAuthError;

/// Top-level error for the `hltoken` binary.
///
/// Each kind maps to its own process exit code so scripts can tell a missing
/// authorization from a rejected refresh.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(
        "HIGHLEVEL_CLIENT_ID and HIGHLEVEL_CLIENT_SECRET must be set (environment or config file)"
    )]
    MissingCredentials,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    OAuth(#[from] OAuthError),
}

impl AppError {
    /// Process exit code for this error. Usage errors (2) are reported by clap.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MissingCredentials | Self::Config(_) => 3,
            Self::OAuth(err) => match err {
                OAuthError::NotAuthorized(_) => 4,
                OAuthError::ExchangeFailed(_) => 5,
                OAuthError::RefreshFailed(_) => 6,
                OAuthError::Storage(_) => 7,
                OAuthError::Http(_) | OAuthError::Other(_) => 8,
            },
        }
    }

    /// Short machine-readable kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::Config(_) => "config",
            Self::OAuth(err) => match err {
                OAuthError::NotAuthorized(_) => "not_authorized",
                OAuthError::ExchangeFailed(_) => "exchange_failed",
                OAuthError::RefreshFailed(_) => "refresh_failed",
                OAuthError::Storage(_) => "storage",
                OAuthError::Http(_) => "http",
                OAuthError::Other(_) => "other",
            },
        }
    }
}

impl From<AppError> for ExitCode {
    fn from(err: AppError) -> Self {
        ExitCode::from(err.exit_code())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Config(format!("{err:#}"))
    }
}
