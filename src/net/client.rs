//! HTTP client for the token endpoint.

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

use crate::config::HttpConfig;

/// Sent on every token request.
pub const USER_AGENT: &str = concat!("hltoken/", env!("CARGO_PKG_VERSION"));

/// Shared `reqwest` client with the timeouts from `[http]`. Redirects are
/// not followed.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    /// Client with the default `[http]` settings.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::from_config(&HttpConfig::default())
    }

    pub fn from_config(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        Self::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .request_timeout(Duration::from_secs(config.timeout_secs))
            .build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder {
            builder: Client::builder()
                .user_agent(USER_AGENT)
                .redirect(reqwest::redirect::Policy::none()),
        }
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    builder: ClientBuilder,
}

impl HttpClientBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.connect_timeout(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.timeout(timeout);
        self
    }

    pub fn build(self) -> Result<HttpClient, reqwest::Error> {
        Ok(HttpClient {
            inner: self.builder.build()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_version() {
        assert!(USER_AGENT.starts_with("hltoken/"));
        assert!(USER_AGENT.len() > "hltoken/".len());
    }

    #[test]
    fn test_from_config_builds() {
        let config = HttpConfig {
            timeout_secs: 2,
            connect_timeout_secs: 1,
        };
        assert!(HttpClient::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_connect_timeout_from_config_applies() {
        // Non-routable address: the connect attempt hangs until the timeout.
        let config = HttpConfig {
            timeout_secs: 30,
            connect_timeout_secs: 1,
        };
        let client = HttpClient::from_config(&config).unwrap();
        let started = std::time::Instant::now();
        let err = client
            .inner()
            .post("http://10.255.255.1:81/token")
            .send()
            .await
            .unwrap_err();
        assert!(err.is_connect() || err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
