//! Presentation-facing projection of the device-auth event stream.
//!
//! The projector owns no network resources. It subscribes to the bus
//! while (and only while) the device-flow strategy is selected and
//! authentication is requested, reduces the event stream into
//! [`AuthUiState`], and exposes a cancel command. Rendering code
//! consumes the state snapshot (or its watch channel) and nothing else.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::bus::{BusMessage, EventBus, Subscription, Topic};
use crate::flow::types::{FlowKey, IssuedDeviceAuth, ProgressStatus};

/// UI-visible status, the progress statuses plus `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiStatus {
    Idle,
    Polling,
    Success,
    Error,
    Timeout,
    RateLimit,
}

impl From<ProgressStatus> for UiStatus {
    fn from(status: ProgressStatus) -> Self {
        match status {
            ProgressStatus::Polling => Self::Polling,
            ProgressStatus::Success => Self::Success,
            ProgressStatus::Error => Self::Error,
            ProgressStatus::Timeout => Self::Timeout,
            ProgressStatus::RateLimit => Self::RateLimit,
        }
    }
}

/// Derived UI state for one device-auth flow.
///
/// `device_auth` is populated only after an issuance event has been
/// observed for the current flow, and cleared on every reset (strategy
/// switch, stop, cancel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUiState {
    pub is_authenticating: bool,
    pub device_auth: Option<IssuedDeviceAuth>,
    pub status: UiStatus,
    pub message: Option<String>,
}

impl Default for AuthUiState {
    fn default() -> Self {
        Self {
            is_authenticating: false,
            device_auth: None,
            status: UiStatus::Idle,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Inputs {
    strategy_selected: bool,
    authenticating: bool,
}

impl Inputs {
    fn active(self) -> bool {
        self.strategy_selected && self.authenticating
    }
}

struct ProjectorShared {
    state: watch::Sender<AuthUiState>,
}

/// Event-stream reducer with explicit setup/teardown reconciliation.
///
/// Listener lifecycle follows the AND of two external booleans: "device
/// flow selected" and "authentication requested". On the rising edge the
/// projector subscribes to issuance and progress topics; on the falling
/// edge it unsubscribes and resets to idle. Dropping the projector also
/// unsubscribes.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use portcullis::bus::EventBus;
/// use portcullis::flow::FlowKey;
/// use portcullis::projector::DeviceFlowProjector;
///
/// let bus = Arc::new(EventBus::new());
/// let projector = DeviceFlowProjector::new(bus, FlowKey::for_provider("gemini"));
/// projector.update_inputs(true, true);
/// assert!(projector.state().is_authenticating);
/// ```
pub struct DeviceFlowProjector {
    bus: Arc<EventBus>,
    flow: FlowKey,
    shared: Arc<ProjectorShared>,
    inputs: Mutex<Inputs>,
    subscriptions: Mutex<Vec<Subscription>>,
    // Keeps the watch channel alive even with no external watchers.
    _state_rx: watch::Receiver<AuthUiState>,
}

impl DeviceFlowProjector {
    pub fn new(bus: Arc<EventBus>, flow: FlowKey) -> Self {
        let (state_tx, state_rx) = watch::channel(AuthUiState::default());
        Self {
            bus,
            flow,
            shared: Arc::new(ProjectorShared { state: state_tx }),
            inputs: Mutex::new(Inputs::default()),
            subscriptions: Mutex::new(Vec::new()),
            _state_rx: state_rx,
        }
    }

    /// Reconcile listener lifecycle against the two external booleans.
    ///
    /// Invoked by the presentation layer whenever either input changes;
    /// computes the rising/falling edge of their AND and performs the
    /// matching subscribe/unsubscribe diff.
    pub fn update_inputs(&self, strategy_selected: bool, authenticating: bool) {
        let (was_active, now_active) = {
            let mut inputs = self.inputs.lock().expect("projector inputs poisoned");
            let was = inputs.active();
            inputs.strategy_selected = strategy_selected;
            inputs.authenticating = authenticating;
            (was, inputs.active())
        };
        if now_active && !was_active {
            self.attach();
        } else if !now_active && was_active {
            self.detach();
        }
    }

    /// Convenience setter for the strategy-selected input.
    pub fn set_strategy_selected(&self, selected: bool) {
        let authenticating = self
            .inputs
            .lock()
            .expect("projector inputs poisoned")
            .authenticating;
        self.update_inputs(selected, authenticating);
    }

    /// Convenience setter for the authentication-requested input.
    pub fn set_authenticating(&self, authenticating: bool) {
        let selected = self
            .inputs
            .lock()
            .expect("projector inputs poisoned")
            .strategy_selected;
        self.update_inputs(selected, authenticating);
    }

    /// Current derived state snapshot.
    pub fn state(&self) -> AuthUiState {
        self.shared.state.borrow().clone()
    }

    /// Subscribe to state changes via a [`watch::Receiver`].
    pub fn watch_state(&self) -> watch::Receiver<AuthUiState> {
        self.shared.state.subscribe()
    }

    /// Request cancellation of the flow and reset local state to idle.
    ///
    /// Does not wait for the client to acknowledge; the UI effect is
    /// immediate regardless of in-flight network state.
    pub fn cancel(&self) {
        self.bus.publish(&BusMessage::CancelRequested {
            flow: self.flow.clone(),
        });
        self.shared.state.send_replace(AuthUiState::default());
    }

    fn attach(&self) {
        self.shared.state.send_replace(AuthUiState {
            is_authenticating: true,
            ..AuthUiState::default()
        });

        let issued_handler = {
            let shared = self.shared.clone();
            let flow = self.flow.clone();
            Arc::new(move |msg: &BusMessage| {
                if let BusMessage::DeviceAuthIssued { flow: event_flow, auth } = msg {
                    if *event_flow == flow {
                        shared.state.send_modify(|state| {
                            state.device_auth = Some(auth.clone());
                            state.status = UiStatus::Polling;
                            state.message = None;
                        });
                    }
                }
            })
        };
        let progress_handler = {
            let shared = self.shared.clone();
            let flow = self.flow.clone();
            Arc::new(move |msg: &BusMessage| {
                if let BusMessage::AuthProgress {
                    flow: event_flow,
                    progress,
                } = msg
                {
                    if *event_flow == flow {
                        shared.state.send_modify(|state| {
                            state.status = progress.status.into();
                            state.message = progress.message.clone();
                        });
                    }
                }
            })
        };

        let mut subscriptions = self
            .subscriptions
            .lock()
            .expect("projector subscriptions poisoned");
        subscriptions.push(self.bus.subscribe(Topic::DeviceAuthIssued, issued_handler));
        subscriptions.push(self.bus.subscribe(Topic::AuthProgress, progress_handler));
    }

    fn detach(&self) {
        let drained: Vec<Subscription> = self
            .subscriptions
            .lock()
            .expect("projector subscriptions poisoned")
            .drain(..)
            .collect();
        for subscription in drained {
            self.bus.unsubscribe(subscription);
        }
        self.shared.state.send_replace(AuthUiState::default());
    }
}

impl Drop for DeviceFlowProjector {
    fn drop(&mut self) {
        self.detach();
    }
}
