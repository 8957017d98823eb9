#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portcullis::bus::{BusMessage, EventBus, Topic};
use portcullis::error::AuthError;
use portcullis::flow::AuthProgress;
use portcullis::store::{Credential, CredentialStore};
use tokio::sync::mpsc;

/// In-memory credential store for tests. `poison` makes saves fail to
/// exercise the persist-failure path.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: Mutex<HashMap<(String, String), Credential>>,
    fail_saves: AtomicBool,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poison(&self) {
        self.fail_saves.store(true, Ordering::SeqCst);
    }

    pub fn get(&self, provider: &str, account: &str) -> Option<Credential> {
        self.credentials
            .lock()
            .expect("store lock poisoned")
            .get(&(provider.to_string(), account.to_string()))
            .cloned()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn load(&self, provider: &str, account: &str) -> Result<Option<Credential>, AuthError> {
        Ok(self.get(provider, account))
    }

    fn save(
        &self,
        provider: &str,
        account: &str,
        credential: &Credential,
    ) -> Result<(), AuthError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AuthError::Io("disk full".to_string()));
        }
        self.credentials
            .lock()
            .expect("store lock poisoned")
            .insert(
                (provider.to_string(), account.to_string()),
                credential.clone(),
            );
        Ok(())
    }

    fn clear(&self, provider: &str, account: &str) -> Result<(), AuthError> {
        self.credentials
            .lock()
            .expect("store lock poisoned")
            .remove(&(provider.to_string(), account.to_string()));
        Ok(())
    }
}

/// Records issuance and progress messages from a bus into a channel so
/// tests can await them in order.
pub struct EventRecorder {
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for topic in [Topic::DeviceAuthIssued, Topic::AuthProgress] {
            let tx = tx.clone();
            bus.subscribe(
                topic,
                Arc::new(move |msg: &BusMessage| {
                    let _ = tx.send(msg.clone());
                }),
            );
        }
        Self { rx }
    }

    pub async fn next(&mut self) -> BusMessage {
        tokio::time::timeout(Duration::from_secs(10), self.rx.recv())
            .await
            .expect("timed out waiting for bus message")
            .expect("bus recorder channel closed")
    }

    pub async fn next_progress(&mut self) -> AuthProgress {
        match self.next().await {
            BusMessage::AuthProgress { progress, .. } => progress,
            other => panic!("expected progress message, got {other:?}"),
        }
    }

    /// Message already delivered, if any. Does not wait.
    pub fn try_next(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}
