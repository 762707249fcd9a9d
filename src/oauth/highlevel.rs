//! HighLevel (LeadConnector) OAuth authorization-code flow.
//!
//! # Key Characteristics
//! - Token request format: Form-encoded (standard OAuth)
//! - Client secret: Required for both exchange and refresh
//! - Scope: fixed to `contacts.write opportunities.write`
//! - Refresh responses may omit `refresh_token`
//!
//! # Endpoints
//! - Authorization: `https://marketplace.gohighlevel.com/oauth/chooselocation`
//! - Token: `https://api.gohighlevel.com/OAuth/token`

use async_trait::async_trait;
use tracing::{debug, warn};

use super::OAuthError;
use super::token::TokenResponse;
use crate::net::HttpClient;

/// Default authorization URL (location chooser).
pub const DEFAULT_AUTH_URL: &str = "https://marketplace.gohighlevel.com/oauth/chooselocation";

/// Default token URL.
pub const DEFAULT_TOKEN_URL: &str = "https://api.gohighlevel.com/OAuth/token";

/// Default redirect URI registered for the app.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080";

/// Scope requested on every authorization.
pub const SCOPE: &str = "contacts.write opportunities.write";

/// Configuration for the HighLevel OAuth flow.
#[derive(Clone)]
pub struct HighLevelOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
}

impl HighLevelOAuthConfig {
    /// Create a config from explicit settings.
    pub fn from_provider_config(
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        auth_url: &str,
        token_url: &str,
    ) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
            auth_url: auth_url.to_string(),
            token_url: token_url.to_string(),
        }
    }

    /// Create a config with the default endpoints and redirect URI.
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self::from_provider_config(
            client_id,
            client_secret,
            DEFAULT_REDIRECT_URI,
            DEFAULT_AUTH_URL,
            DEFAULT_TOKEN_URL,
        )
    }
}

impl std::fmt::Debug for HighLevelOAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighLevelOAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .finish()
    }
}

/// Build the authorization URL the user must visit to grant access.
pub fn build_authorize_url(config: &HighLevelOAuthConfig) -> String {
    format!(
        "{}?response_type=code&redirect_uri={}&client_id={}&scope={}",
        config.auth_url,
        urlencoding::encode(&config.redirect_uri),
        urlencoding::encode(&config.client_id),
        urlencoding::encode(SCOPE),
    )
}

// =============================================================================
// AuthServer
// =============================================================================

/// The authorization server's token endpoint.
///
/// Implementations report a non-success response as
/// [`OAuthError::ExchangeFailed`] or [`OAuthError::RefreshFailed`] carrying
/// the server's raw body. Nothing is retried.
#[async_trait]
pub trait AuthServer: Send + Sync {
    /// URL the user visits to obtain an authorization code.
    fn authorize_url(&self) -> String;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, OAuthError>;

    /// Mint a new access token from a refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, OAuthError>;
}

/// [`AuthServer`] backed by the HighLevel token endpoint.
#[derive(Debug, Clone)]
pub struct HighLevelClient {
    http: reqwest::Client,
    config: HighLevelOAuthConfig,
}

impl HighLevelClient {
    pub fn new(config: HighLevelOAuthConfig, http: &HttpClient) -> Self {
        Self {
            http: http.inner().clone(),
            config,
        }
    }

    async fn request_token(
        &self,
        form_data: &[(&str, &str)],
        failure: fn(String) -> OAuthError,
    ) -> Result<TokenResponse, OAuthError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(form_data)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "HighLevel token request failed");
            if body.trim().is_empty() {
                return Err(failure(format!("HTTP {}", status.as_u16())));
            }
            return Err(failure(body));
        }

        serde_json::from_str(&body)
            .map_err(|e| failure(format!("Failed to parse token response: {}", e)))
    }
}

#[async_trait]
impl AuthServer for HighLevelClient {
    fn authorize_url(&self) -> String {
        build_authorize_url(&self.config)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, OAuthError> {
        debug!("Exchanging authorization code for HighLevel tokens");

        let form_data = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];

        let response = self
            .request_token(&form_data, OAuthError::ExchangeFailed)
            .await?;
        debug!("HighLevel token exchange successful");
        Ok(response)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, OAuthError> {
        debug!("Refreshing HighLevel access token");

        let form_data = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .request_token(&form_data, OAuthError::RefreshFailed)
            .await?;
        debug!(
            rotated = response.refresh_token.is_some(),
            "HighLevel token refresh successful"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_authorize_url_contains_required_params() {
        let config = HighLevelOAuthConfig::new("client-123", "secret");
        let url = build_authorize_url(&config);

        assert!(url.starts_with(DEFAULT_AUTH_URL));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080"));
        assert!(url.contains("scope=contacts.write%20opportunities.write"));
        assert!(!url.contains("secret"));
    }

    #[test]
    fn test_authorize_url_uses_auth_host_not_token_host() {
        let config = HighLevelOAuthConfig::new("client", "secret");
        let url = build_authorize_url(&config);
        assert!(url.contains("marketplace.gohighlevel.com"));
        assert!(!url.contains("api.gohighlevel.com"));
    }

    #[test]
    fn test_build_authorize_url_encodes_special_chars() {
        let config = HighLevelOAuthConfig::from_provider_config(
            "id with spaces",
            "secret",
            "https://example.com/cb?x=1",
            "https://auth.example.com/oauth",
            "https://token.example.com/token",
        );
        let url = build_authorize_url(&config);
        assert!(url.starts_with("https://auth.example.com/oauth?"));
        assert!(url.contains("client_id=id%20with%20spaces"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fexample.com%2Fcb%3Fx%3D1"));
    }

    #[test]
    fn test_config_new_uses_defaults() {
        let config = HighLevelOAuthConfig::new("my-client", "my-secret");
        assert_eq!(config.auth_url, DEFAULT_AUTH_URL);
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.redirect_uri, DEFAULT_REDIRECT_URI);
    }

    #[test]
    fn test_config_debug_redacts_secret() {
        let config = HighLevelOAuthConfig::new("my-client", "super-secret-value");
        let debug = format!("{:?}", config);
        assert!(debug.contains("my-client"));
        assert!(!debug.contains("super-secret-value"));
    }
}
