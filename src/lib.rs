//! Portcullis — OAuth 2.0 Device Authorization Grant engine
//!
//! Implements the RFC 8628 device flow as a protocol state machine
//! decoupled from presentation: a [`flow::DeviceAuthClient`] drives the
//! device-code request, poll loop, backoff, expiry, and cancellation,
//! publishing progress on an explicit [`bus::EventBus`]; a
//! [`projector::DeviceFlowProjector`] reduces that event stream into a
//! small UI state machine with leak-free setup/teardown.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use portcullis::prelude::*;
//!
//! # fn example() -> Result<(), portcullis::error::AuthError> {
//! let bus = Arc::new(EventBus::new());
//! let config = FlowConfig::from_env()?;
//! let store = Arc::new(FileCredentialStore::new_default());
//! let client = DeviceAuthClient::new(config, bus.clone(), store);
//!
//! let projector = DeviceFlowProjector::new(bus, FlowKey::for_provider("gemini"));
//! projector.update_inputs(true, true);
//! client.start(FlowKey::for_provider("gemini"))?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod flow;
pub mod prelude;
pub mod projector;
pub mod store;
