//! hltoken -- OAuth 2.0 token lifecycle for the HighLevel API.
//!
//! Obtains an access/refresh token pair through the authorization-code flow,
//! persists it, and hands out a valid access token on demand, refreshing it
//! shortly before it expires.

pub mod config;
pub mod error;
pub mod net;
pub mod oauth;

pub use config::Config;
pub use error::AppError;
pub use oauth::{OAuthError, TokenRecord, TokenStatus, TokenStore};
