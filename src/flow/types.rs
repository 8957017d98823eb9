use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Credential scope a flow runs under: one provider/account pair.
///
/// Two flows with distinct keys are fully independent (own device code,
/// own poll interval, own timers). Starting a second flow for the same
/// key is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub provider: String,
    pub account: String,
}

impl FlowKey {
    pub fn new(provider: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            account: account.into(),
        }
    }

    /// Key for the default account of a provider.
    pub fn for_provider(provider: impl Into<String>) -> Self {
        Self::new(provider, "default")
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.account)
    }
}

/// Device-code session details held by the client for the lifetime of a
/// single flow attempt.
///
/// The `device_code` is the credential-exchange secret; it never appears
/// in any published event.
#[derive(Debug, Clone)]
pub(crate) struct DeviceAuthorization {
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub user_code: String,
    pub device_code: String,
    pub expires_in_secs: u64,
    pub interval_secs: u64,
}

impl DeviceAuthorization {
    /// The public subset safe to hand to a presentation layer.
    pub fn issued(&self) -> IssuedDeviceAuth {
        IssuedDeviceAuth {
            verification_uri: self.verification_uri.clone(),
            verification_uri_complete: self.verification_uri_complete.clone(),
            user_code: self.user_code.clone(),
            expires_in_secs: self.expires_in_secs,
        }
    }
}

/// Public fields of a device authorization, published on issuance.
///
/// Deliberately has no `device_code` field, so leakage to the
/// presentation layer is ruled out by the type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedDeviceAuth {
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub user_code: String,
    pub expires_in_secs: u64,
}

/// Closed set of progress statuses a flow can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Polling,
    Success,
    Error,
    Timeout,
    RateLimit,
}

impl ProgressStatus {
    /// Whether this status ends the flow.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Timeout)
    }
}

/// One progress report with an optional human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthProgress {
    pub status: ProgressStatus,
    pub message: Option<String>,
}

impl AuthProgress {
    pub fn status(status: ProgressStatus) -> Self {
        Self {
            status,
            message: None,
        }
    }

    pub fn with_message(status: ProgressStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Device-code endpoint response (RFC 8628 §3.2).
///
/// Some servers use `verification_url` instead of `verification_uri`, and
/// `verification_uri_complete` is optional.
#[derive(Debug, Deserialize)]
pub(crate) struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: Option<String>,
    pub verification_url: Option<String>,
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// Token endpoint response during polling.
///
/// GitHub-style servers return HTTP 200 with an `error` field; RFC-style
/// servers return HTTP 400 with the same body shape. Both are covered.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenPollResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl DeviceCodeResponse {
    pub fn into_authorization(self) -> Result<DeviceAuthorization, crate::error::AuthError> {
        let verification_uri = self
            .verification_uri
            .or(self.verification_url)
            .ok_or_else(|| {
                crate::error::AuthError::InvalidResponse(
                    "device code response missing verification_uri".to_string(),
                )
            })?;
        let verification_uri_complete = self
            .verification_uri_complete
            .unwrap_or_else(|| verification_uri.clone());
        Ok(DeviceAuthorization {
            verification_uri,
            verification_uri_complete,
            user_code: self.user_code,
            device_code: self.device_code,
            expires_in_secs: self.expires_in,
            interval_secs: self.interval,
        })
    }
}

/// Convert a token-response `expires_in` into an absolute expiry.
pub(crate) fn expiry_from_now(expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs))
}
