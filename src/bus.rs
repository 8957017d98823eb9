//! Process-wide publish/subscribe channel coordinating the device-auth
//! client and its UI projection.
//!
//! The bus is deliberately small: a fixed topic set, synchronous
//! delivery, and no buffering. A late subscriber never sees past
//! messages. Both the client and the projector receive the bus instance
//! explicitly at construction; there is no ambient global.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::flow::types::{AuthProgress, FlowKey, IssuedDeviceAuth};

/// Topics carried by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Client → UI: a device authorization was issued (public fields only).
    DeviceAuthIssued,
    /// Client → UI: flow progress, including the terminal status.
    AuthProgress,
    /// UI → Client: cancel the flow for a given key.
    CancelRequested,
}

/// Messages published on the bus, tagged with the flow they belong to.
#[derive(Debug, Clone)]
pub enum BusMessage {
    DeviceAuthIssued {
        flow: FlowKey,
        auth: IssuedDeviceAuth,
    },
    AuthProgress {
        flow: FlowKey,
        progress: AuthProgress,
    },
    CancelRequested {
        flow: FlowKey,
    },
}

impl BusMessage {
    pub fn topic(&self) -> Topic {
        match self {
            Self::DeviceAuthIssued { .. } => Topic::DeviceAuthIssued,
            Self::AuthProgress { .. } => Topic::AuthProgress,
            Self::CancelRequested { .. } => Topic::CancelRequested,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    topic: Topic,
    id: u64,
}

pub type Handler = Arc<dyn Fn(&BusMessage) + Send + Sync>;

struct Entry {
    id: u64,
    handler: Handler,
}

/// Many-listener, fire-and-forget event bus.
///
/// Delivery rules:
/// - synchronous, in registration order;
/// - exactly the handlers registered at the moment of publish are
///   candidates — a handler added during a publish does not receive it,
///   and a handler removed during a publish is skipped;
/// - a panicking handler is isolated and logged; delivery continues.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use portcullis::bus::{BusMessage, EventBus, Topic};
/// use portcullis::flow::types::FlowKey;
///
/// let bus = EventBus::new();
/// let sub = bus.subscribe(
///     Topic::CancelRequested,
///     Arc::new(|msg: &BusMessage| println!("{msg:?}")),
/// );
/// bus.publish(&BusMessage::CancelRequested {
///     flow: FlowKey::for_provider("gemini"),
/// });
/// bus.unsubscribe(sub);
/// ```
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    entries: Mutex<Vec<(Topic, Entry)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a topic. Handlers fire in registration
    /// order within a topic.
    pub fn subscribe(&self, topic: Topic, handler: Handler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .expect("bus listener table poisoned")
            .push((topic, Entry { id, handler }));
        Subscription { topic, id }
    }

    /// Remove a previously registered handler. Safe to call more than
    /// once; unknown subscriptions are ignored.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.entries
            .lock()
            .expect("bus listener table poisoned")
            .retain(|(topic, entry)| !(*topic == subscription.topic && entry.id == subscription.id));
    }

    /// Number of live handlers for a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.entries
            .lock()
            .expect("bus listener table poisoned")
            .iter()
            .filter(|(t, _)| *t == topic)
            .count()
    }

    /// Deliver a message to the handlers registered for its topic.
    pub fn publish(&self, message: &BusMessage) {
        let topic = message.topic();
        // Snapshot the candidate set so handlers registered mid-publish
        // do not receive this message.
        let snapshot: Vec<(u64, Handler)> = self
            .entries
            .lock()
            .expect("bus listener table poisoned")
            .iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, entry)| (entry.id, entry.handler.clone()))
            .collect();
        for (id, handler) in snapshot {
            // A handler removed by an earlier handler in this same
            // publish must not fire.
            let still_registered = self
                .entries
                .lock()
                .expect("bus listener table poisoned")
                .iter()
                .any(|(t, entry)| *t == topic && entry.id == id);
            if !still_registered {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                tracing::warn!(?topic, handler_id = id, "event handler panicked; continuing");
            }
        }
    }
}
