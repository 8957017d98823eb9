//! Convenience re-exports for common use.

pub use crate::bus::{BusMessage, EventBus, Subscription, Topic};
pub use crate::config::FlowConfig;
pub use crate::error::AuthError;
pub use crate::flow::{
    AuthProgress, DeviceAuthClient, FlowKey, IssuedDeviceAuth, PollPolicy, ProgressStatus,
};
pub use crate::projector::{AuthUiState, DeviceFlowProjector, UiStatus};
pub use crate::store::{Credential, CredentialStore, FileCredentialStore};
