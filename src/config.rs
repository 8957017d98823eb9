//! Flow configuration (code > env).

use crate::error::AuthError;

/// Endpoints and client identity for one authorization server.
///
/// The engine owns none of these values; they come from the embedding
/// application, either directly or via [`FlowConfig::from_env`].
///
/// # Example
/// ```
/// use portcullis::config::FlowConfig;
///
/// let config = FlowConfig::new(
///     "my-client-id",
///     "https://auth.example.com/device/code",
///     "https://auth.example.com/token",
/// )
/// .with_scopes(["openid", "email"]);
/// ```
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub client_id: String,
    pub device_code_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
}

impl FlowConfig {
    pub fn new(
        client_id: impl Into<String>,
        device_code_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            device_code_url: device_code_url.into(),
            token_url: token_url.into(),
            scopes: Vec::new(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_device_code_url(mut self, url: impl Into<String>) -> Self {
        self.device_code_url = url.into();
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Load from environment variables (`OAUTH_CLIENT_ID`,
    /// `OAUTH_DEVICE_CODE_URL`, `OAUTH_TOKEN_URL`, optional
    /// space-separated `OAUTH_SCOPES`). A `.env` file is honored if
    /// present.
    pub fn from_env() -> Result<Self, AuthError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error

        let client_id = require_env("OAUTH_CLIENT_ID")?;
        let device_code_url = require_env("OAUTH_DEVICE_CODE_URL")?;
        let token_url = require_env("OAUTH_TOKEN_URL")?;
        let scopes = std::env::var("OAUTH_SCOPES")
            .map(|raw| raw.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        Ok(Self {
            client_id,
            device_code_url,
            token_url,
            scopes,
        })
    }
}

fn require_env(name: &str) -> Result<String, AuthError> {
    std::env::var(name)
        .map_err(|_| AuthError::Configuration(format!("missing environment variable {name}")))
}
