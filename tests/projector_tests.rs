use std::sync::{Arc, Mutex};

use portcullis::bus::{BusMessage, EventBus, Topic};
use portcullis::flow::{AuthProgress, FlowKey, IssuedDeviceAuth, ProgressStatus};
use portcullis::projector::{AuthUiState, DeviceFlowProjector, UiStatus};
use pretty_assertions::assert_eq;

fn gemini() -> FlowKey {
    FlowKey::for_provider("gemini")
}

fn issued_auth(user_code: &str) -> IssuedDeviceAuth {
    IssuedDeviceAuth {
        verification_uri: "https://auth.example.com/device".to_string(),
        verification_uri_complete: format!(
            "https://auth.example.com/device?user_code={user_code}"
        ),
        user_code: user_code.to_string(),
        expires_in_secs: 1800,
    }
}

fn publish_issued(bus: &EventBus, flow: FlowKey, user_code: &str) {
    bus.publish(&BusMessage::DeviceAuthIssued {
        flow,
        auth: issued_auth(user_code),
    });
}

fn publish_progress(bus: &EventBus, flow: FlowKey, progress: AuthProgress) {
    bus.publish(&BusMessage::AuthProgress { flow, progress });
}

#[test]
fn initial_state_is_fully_idle() {
    let bus = Arc::new(EventBus::new());
    let projector = DeviceFlowProjector::new(bus, gemini());
    assert_eq!(projector.state(), AuthUiState::default());
}

#[test]
fn is_authenticating_tracks_the_and_of_both_inputs() {
    let bus = Arc::new(EventBus::new());
    let projector = DeviceFlowProjector::new(bus, gemini());

    for (selected, authenticating) in [
        (false, false),
        (true, false),
        (false, true),
        (true, true),
        (true, false),
        (true, true),
        (false, true),
    ] {
        projector.update_inputs(selected, authenticating);
        assert_eq!(
            projector.state().is_authenticating,
            selected && authenticating,
            "inputs ({selected}, {authenticating})"
        );
    }
}

#[test]
fn rising_edge_subscribes_and_enters_idle() {
    let bus = Arc::new(EventBus::new());
    let projector = DeviceFlowProjector::new(bus.clone(), gemini());

    assert_eq!(bus.subscriber_count(Topic::DeviceAuthIssued), 0);
    projector.update_inputs(true, true);

    assert_eq!(bus.subscriber_count(Topic::DeviceAuthIssued), 1);
    assert_eq!(bus.subscriber_count(Topic::AuthProgress), 1);
    let state = projector.state();
    assert!(state.is_authenticating);
    assert_eq!(state.status, UiStatus::Idle);
    assert_eq!(state.device_auth, None);
}

#[test]
fn repeated_active_inputs_do_not_stack_subscriptions() {
    let bus = Arc::new(EventBus::new());
    let projector = DeviceFlowProjector::new(bus.clone(), gemini());

    projector.update_inputs(true, true);
    projector.update_inputs(true, true);
    projector.update_inputs(true, true);

    assert_eq!(bus.subscriber_count(Topic::DeviceAuthIssued), 1);
    assert_eq!(bus.subscriber_count(Topic::AuthProgress), 1);
}

#[test]
fn issuance_transitions_to_polling_with_public_fields() {
    let bus = Arc::new(EventBus::new());
    let projector = DeviceFlowProjector::new(bus.clone(), gemini());
    projector.update_inputs(true, true);

    publish_issued(&bus, gemini(), "ABC123");

    let state = projector.state();
    assert_eq!(state.status, UiStatus::Polling);
    assert_eq!(state.message, None);
    assert_eq!(state.device_auth, Some(issued_auth("ABC123")));
}

#[test]
fn terminal_status_updates_status_but_keeps_device_auth() {
    let bus = Arc::new(EventBus::new());
    let projector = DeviceFlowProjector::new(bus.clone(), gemini());
    projector.update_inputs(true, true);

    publish_issued(&bus, gemini(), "ABC123");
    publish_progress(
        &bus,
        gemini(),
        AuthProgress::with_message(ProgressStatus::Error, "access denied"),
    );

    let state = projector.state();
    assert_eq!(state.status, UiStatus::Error);
    assert_eq!(state.message.as_deref(), Some("access denied"));
    assert_eq!(state.device_auth, Some(issued_auth("ABC123")));
}

#[test]
fn repeated_rate_limits_update_the_message_and_stay_alive() {
    let bus = Arc::new(EventBus::new());
    let projector = DeviceFlowProjector::new(bus.clone(), gemini());
    projector.update_inputs(true, true);

    publish_issued(&bus, gemini(), "ABC123");
    publish_progress(
        &bus,
        gemini(),
        AuthProgress::with_message(ProgressStatus::RateLimit, "polling every 10s"),
    );
    assert_eq!(projector.state().message.as_deref(), Some("polling every 10s"));

    publish_progress(
        &bus,
        gemini(),
        AuthProgress::with_message(ProgressStatus::RateLimit, "polling every 15s"),
    );
    let state = projector.state();
    assert_eq!(state.status, UiStatus::RateLimit);
    assert_eq!(state.message.as_deref(), Some("polling every 15s"));
    assert!(state.device_auth.is_some());
}

#[test]
fn progress_without_message_clears_the_previous_message() {
    let bus = Arc::new(EventBus::new());
    let projector = DeviceFlowProjector::new(bus.clone(), gemini());
    projector.update_inputs(true, true);

    publish_progress(
        &bus,
        gemini(),
        AuthProgress::with_message(ProgressStatus::RateLimit, "slow down"),
    );
    publish_progress(&bus, gemini(), AuthProgress::status(ProgressStatus::Success));

    let state = projector.state();
    assert_eq!(state.status, UiStatus::Success);
    assert_eq!(state.message, None);
}

#[test]
fn falling_edge_unsubscribes_and_resets_everything() {
    let bus = Arc::new(EventBus::new());
    let projector = DeviceFlowProjector::new(bus.clone(), gemini());
    projector.update_inputs(true, true);
    publish_issued(&bus, gemini(), "ABC123");

    // Strategy switched away mid-poll.
    projector.update_inputs(false, true);

    assert_eq!(bus.subscriber_count(Topic::DeviceAuthIssued), 0);
    assert_eq!(bus.subscriber_count(Topic::AuthProgress), 0);
    assert_eq!(projector.state(), AuthUiState::default());

    // Events after the reset no longer reach the projector.
    publish_issued(&bus, gemini(), "XYZ789");
    assert_eq!(projector.state(), AuthUiState::default());
}

#[test]
fn events_for_a_different_flow_are_ignored() {
    let bus = Arc::new(EventBus::new());
    let projector = DeviceFlowProjector::new(bus.clone(), gemini());
    projector.update_inputs(true, true);

    publish_issued(&bus, FlowKey::new("gemini", "work"), "OTHER1");
    publish_progress(
        &bus,
        FlowKey::for_provider("vertex"),
        AuthProgress::status(ProgressStatus::Success),
    );

    let state = projector.state();
    assert_eq!(state.status, UiStatus::Idle);
    assert_eq!(state.device_auth, None);
}

#[test]
fn cancel_publishes_control_message_and_resets_synchronously() {
    let bus = Arc::new(EventBus::new());
    let projector = DeviceFlowProjector::new(bus.clone(), gemini());
    projector.update_inputs(true, true);
    publish_issued(&bus, gemini(), "ABC123");

    let observed: Arc<Mutex<Vec<FlowKey>>> = Arc::new(Mutex::new(Vec::new()));
    let probe = observed.clone();
    bus.subscribe(
        Topic::CancelRequested,
        Arc::new(move |msg: &BusMessage| {
            if let BusMessage::CancelRequested { flow } = msg {
                probe.lock().unwrap().push(flow.clone());
            }
        }),
    );

    projector.cancel();

    assert_eq!(*observed.lock().unwrap(), vec![gemini()]);
    assert_eq!(projector.state(), AuthUiState::default());
}

#[test]
fn restart_after_reset_requires_fresh_issuance_for_device_auth() {
    let bus = Arc::new(EventBus::new());
    let projector = DeviceFlowProjector::new(bus.clone(), gemini());

    projector.update_inputs(true, true);
    publish_issued(&bus, gemini(), "FIRST1");
    projector.update_inputs(true, false);

    projector.update_inputs(true, true);
    let state = projector.state();
    assert!(state.is_authenticating);
    assert_eq!(state.device_auth, None);
    assert_eq!(state.status, UiStatus::Idle);

    publish_issued(&bus, gemini(), "SECOND");
    assert_eq!(
        projector.state().device_auth.expect("fresh issuance").user_code,
        "SECOND"
    );
}

#[test]
fn dropping_the_projector_unsubscribes_its_listeners() {
    let bus = Arc::new(EventBus::new());
    {
        let projector = DeviceFlowProjector::new(bus.clone(), gemini());
        projector.update_inputs(true, true);
        assert_eq!(bus.subscriber_count(Topic::DeviceAuthIssued), 1);
        assert_eq!(bus.subscriber_count(Topic::AuthProgress), 1);
    }
    assert_eq!(bus.subscriber_count(Topic::DeviceAuthIssued), 0);
    assert_eq!(bus.subscriber_count(Topic::AuthProgress), 0);
}

#[test]
fn watch_channel_observes_state_transitions() {
    let bus = Arc::new(EventBus::new());
    let projector = DeviceFlowProjector::new(bus.clone(), gemini());
    let mut rx = projector.watch_state();

    projector.update_inputs(true, true);
    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update().is_authenticating);

    publish_issued(&bus, gemini(), "ABC123");
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().status, UiStatus::Polling);
}
