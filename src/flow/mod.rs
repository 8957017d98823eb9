//! OAuth 2.0 Device Authorization Grant engine (RFC 8628).

pub mod client;
pub mod types;

pub use client::{DeviceAuthClient, PollPolicy};
pub use types::{AuthProgress, FlowKey, IssuedDeviceAuth, ProgressStatus};
