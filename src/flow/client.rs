use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

use crate::bus::{BusMessage, EventBus, Subscription, Topic};
use crate::config::FlowConfig;
use crate::error::AuthError;
use crate::store::{Credential, CredentialStore};

use super::types::{
    expiry_from_now, AuthProgress, DeviceAuthorization, DeviceCodeResponse, FlowKey,
    ProgressStatus, TokenPollResponse,
};

/// Backoff policy applied when the token endpoint asks to slow down.
///
/// The interval only ever grows within a flow. RFC 8628 §3.5 mandates a
/// 5-second increase, which is the default; `max_interval` caps the
/// growth when set.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub slow_down_increment: Duration,
    pub max_interval: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            slow_down_increment: Duration::from_secs(5),
            max_interval: None,
        }
    }
}

/// Outcome of a single token-endpoint poll.
#[derive(Debug)]
enum TokenPoll {
    Authorized(Credential),
    Pending,
    SlowDown,
    Denied(String),
    Expired,
}

/// Device Authorization Grant client.
///
/// Owns the protocol state machine: device-code request, poll loop,
/// backoff, expiry, cancellation, and credential persistence. Publishes
/// progress on the [`EventBus`] and never reads UI state.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use portcullis::bus::EventBus;
/// use portcullis::config::FlowConfig;
/// use portcullis::flow::{DeviceAuthClient, FlowKey};
/// use portcullis::store::FileCredentialStore;
///
/// # fn example() -> Result<(), portcullis::error::AuthError> {
/// let bus = Arc::new(EventBus::new());
/// let config = FlowConfig::from_env()?;
/// let client = DeviceAuthClient::new(config, bus, Arc::new(FileCredentialStore::new_default()));
/// client.start(FlowKey::for_provider("gemini"))?;
/// # Ok(())
/// # }
/// ```
pub struct DeviceAuthClient {
    http: reqwest::Client,
    config: FlowConfig,
    policy: PollPolicy,
    bus: Arc<EventBus>,
    store: Arc<dyn CredentialStore>,
    active: Arc<Mutex<HashMap<FlowKey, ActiveFlow>>>,
}

struct ActiveFlow {
    cancel: Arc<watch::Sender<bool>>,
    subscription: Subscription,
}

impl DeviceAuthClient {
    pub fn new(config: FlowConfig, bus: Arc<EventBus>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            policy: PollPolicy::default(),
            bus,
            store,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Begin a new flow for the given credential scope.
    ///
    /// Fails fast with [`AuthError::FlowAlreadyActive`] if a flow is
    /// already running for the same key; concurrent starts are rejected,
    /// not queued. The flow itself runs on a spawned task and reports
    /// exclusively through the bus.
    pub fn start(&self, key: FlowKey) -> Result<(), AuthError> {
        let mut active = self.active.lock().expect("active flow table poisoned");
        if active.contains_key(&key) {
            return Err(AuthError::FlowAlreadyActive(key.to_string()));
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        let subscription = {
            let key = key.clone();
            let cancel_tx = cancel_tx.clone();
            self.bus.subscribe(
                Topic::CancelRequested,
                Arc::new(move |msg: &BusMessage| {
                    if let BusMessage::CancelRequested { flow } = msg {
                        if *flow == key {
                            let _ = cancel_tx.send(true);
                        }
                    }
                }),
            )
        };
        active.insert(
            key.clone(),
            ActiveFlow {
                cancel: cancel_tx,
                subscription,
            },
        );
        drop(active);

        tracing::debug!(flow = %key, "starting device authorization flow");
        let ctx = FlowContext {
            http: self.http.clone(),
            config: self.config.clone(),
            policy: self.policy.clone(),
            bus: self.bus.clone(),
            store: self.store.clone(),
            active: self.active.clone(),
            key,
        };
        tokio::spawn(ctx.run(cancel_rx));
        Ok(())
    }

    /// Request cancellation of the flow for `key`.
    ///
    /// Idempotent and safe when no flow is active. The cancellation
    /// signal travels over the bus, so a projector-initiated cancel and
    /// a direct call take the same path; further poll ticks stop
    /// synchronously with the publish.
    pub fn cancel(&self, key: &FlowKey) {
        self.bus.publish(&BusMessage::CancelRequested { flow: key.clone() });
    }

    /// Whether a flow is currently active for `key`.
    pub fn is_active(&self, key: &FlowKey) -> bool {
        self.active
            .lock()
            .expect("active flow table poisoned")
            .contains_key(key)
    }
}

/// Everything a spawned flow task needs, detached from the client.
struct FlowContext {
    http: reqwest::Client,
    config: FlowConfig,
    policy: PollPolicy,
    bus: Arc<EventBus>,
    store: Arc<dyn CredentialStore>,
    active: Arc<Mutex<HashMap<FlowKey, ActiveFlow>>>,
    key: FlowKey,
}

impl FlowContext {
    async fn run(self, mut cancel: watch::Receiver<bool>) {
        let authorization = match self.request_device_code().await {
            Ok(authorization) => authorization,
            Err(err) => {
                tracing::warn!(flow = %self.key, error = %err, "device code request failed");
                self.publish_progress(AuthProgress::with_message(
                    ProgressStatus::Error,
                    err.to_string(),
                ));
                self.finish();
                return;
            }
        };

        // A cancel that raced with the device-code request wins; nothing
        // is published for a flow the caller already walked away from.
        if *cancel.borrow() {
            self.finish();
            return;
        }

        // Expiry is measured from issuance, independent of poll cadence.
        let deadline = Instant::now() + Duration::from_secs(authorization.expires_in_secs);
        tracing::debug!(
            flow = %self.key,
            user_code = %authorization.user_code,
            expires_in = authorization.expires_in_secs,
            "device authorization issued"
        );
        self.bus.publish(&BusMessage::DeviceAuthIssued {
            flow: self.key.clone(),
            auth: authorization.issued(),
        });
        self.publish_progress(AuthProgress::status(ProgressStatus::Polling));

        let mut interval = Duration::from_secs(authorization.interval_secs);
        loop {
            let tick = Instant::now() + interval;
            tokio::select! {
                biased;
                _ = cancel.changed() => {
                    tracing::debug!(flow = %self.key, "flow cancelled");
                    self.finish();
                    return;
                }
                _ = sleep_until(deadline) => {
                    tracing::info!(flow = %self.key, "device code expired");
                    self.publish_progress(AuthProgress::status(ProgressStatus::Timeout));
                    self.finish();
                    return;
                }
                _ = sleep_until(tick) => {}
            }

            let outcome = self.poll_token(&authorization.device_code).await;
            // A cancel that raced with the in-flight request wins; the
            // response is discarded without emitting progress.
            if *cancel.borrow() {
                tracing::debug!(flow = %self.key, "discarding poll response after cancel");
                self.finish();
                return;
            }

            match outcome {
                Ok(TokenPoll::Pending) => {}
                Ok(TokenPoll::SlowDown) => {
                    interval = next_interval(interval, &self.policy);
                    tracing::debug!(
                        flow = %self.key,
                        interval_secs = interval.as_secs(),
                        "slow_down received, poll interval increased"
                    );
                    self.publish_progress(AuthProgress::with_message(
                        ProgressStatus::RateLimit,
                        format!(
                            "Server asked to slow down; now polling every {}s",
                            interval.as_secs()
                        ),
                    ));
                }
                Ok(TokenPoll::Authorized(credential)) => {
                    // The credential must be persisted before success is
                    // considered settled.
                    match self.store.save(&self.key.provider, &self.key.account, &credential) {
                        Ok(()) => {
                            tracing::info!(flow = %self.key, "device authorization completed");
                            self.publish_progress(AuthProgress::status(ProgressStatus::Success));
                        }
                        Err(err) => {
                            tracing::warn!(flow = %self.key, error = %err, "credential save failed");
                            self.publish_progress(AuthProgress::with_message(
                                ProgressStatus::Error,
                                format!("failed to persist credential: {err}"),
                            ));
                        }
                    }
                    self.finish();
                    return;
                }
                Ok(TokenPoll::Denied(reason)) => {
                    tracing::info!(flow = %self.key, reason = %reason, "authorization denied");
                    self.publish_progress(AuthProgress::with_message(ProgressStatus::Error, reason));
                    self.finish();
                    return;
                }
                Ok(TokenPoll::Expired) => {
                    tracing::info!(flow = %self.key, "token endpoint reported expired device code");
                    self.publish_progress(AuthProgress::status(ProgressStatus::Timeout));
                    self.finish();
                    return;
                }
                Err(err) => {
                    tracing::warn!(flow = %self.key, error = %err, "token poll failed");
                    self.publish_progress(AuthProgress::with_message(
                        ProgressStatus::Error,
                        err.to_string(),
                    ));
                    self.finish();
                    return;
                }
            }
        }
    }

    async fn request_device_code(&self) -> Result<DeviceAuthorization, AuthError> {
        let mut params = vec![("client_id", self.config.client_id.clone())];
        if !self.config.scopes.is_empty() {
            params.push(("scope", self.config.scopes.join(" ")));
        }
        let resp = self
            .http
            .post(&self.config.device_code_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AuthError::InvalidResponse(format!(
                "device code request failed with status {}",
                resp.status()
            )));
        }
        let payload: DeviceCodeResponse = resp.json().await?;
        payload.into_authorization()
    }

    async fn poll_token(&self, device_code: &str) -> Result<TokenPoll, AuthError> {
        let resp = self
            .http
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("device_code", device_code),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ])
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        // RFC-style servers answer HTTP 400 with an error body;
        // GitHub-style servers answer 200 with the same shape.
        let payload: TokenPollResponse = serde_json::from_str(&body).map_err(|_| {
            AuthError::InvalidResponse(format!("unexpected token response with status {status}"))
        })?;

        if let Some(access_token) = payload.access_token {
            return Ok(TokenPoll::Authorized(Credential {
                access_token,
                refresh_token: payload.refresh_token,
                expires_at: expiry_from_now(payload.expires_in),
            }));
        }
        match payload.error.as_deref() {
            Some("authorization_pending") => Ok(TokenPoll::Pending),
            Some("slow_down") => Ok(TokenPoll::SlowDown),
            Some("access_denied") => Ok(TokenPoll::Denied(
                payload
                    .error_description
                    .unwrap_or_else(|| "authorization was denied".to_string()),
            )),
            Some("expired_token") => Ok(TokenPoll::Expired),
            Some(other) => Err(AuthError::InvalidResponse(format!(
                "token endpoint error: {other}"
            ))),
            None => Err(AuthError::InvalidResponse(
                "token response missing token and error".to_string(),
            )),
        }
    }

    fn publish_progress(&self, progress: AuthProgress) {
        self.bus.publish(&BusMessage::AuthProgress {
            flow: self.key.clone(),
            progress,
        });
    }

    /// Tear down the flow's registration: drop it from the active table
    /// and detach the cancel listener.
    fn finish(&self) {
        let removed = self
            .active
            .lock()
            .expect("active flow table poisoned")
            .remove(&self.key);
        if let Some(flow) = removed {
            self.bus.unsubscribe(flow.subscription);
        }
    }
}

/// Grow the poll interval per policy. Never decreases, even when the
/// current interval already exceeds the ceiling.
fn next_interval(current: Duration, policy: &PollPolicy) -> Duration {
    let bumped = current + policy.slow_down_increment;
    match policy.max_interval {
        Some(max) => bumped.min(max).max(current),
        None => bumped,
    }
}
