//! Integration tests exercising the presenter and receiver engines against
//! mock mechanisms.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use castlink_core::{
    Config, Connection, DisplayChooser, FirstDisplayChooser, Presentation,
};
use castlink_mechanism::mock::{MockDisplay, MockEndpoint, MockMechanism};
use castlink_mechanism::IncomingController;
use castlink_types::{
    ConnectionId, ConnectionState, DisplayInfo, Payload, PresentError, PresentOptions,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// Wait until the connection reaches `want`, or panic after a timeout.
async fn wait_for_state(connection: &Connection, want: ConnectionState) {
    let mut rx = connection.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *rx.borrow_and_update() == want {
                return;
            }
            rx.changed().await.expect("state watch closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("connection never reached {want}, still {}", connection.state()));
}

struct ChooseNone;

#[async_trait]
impl DisplayChooser for ChooseNone {
    async fn choose(&self, _displays: &[DisplayInfo]) -> Option<usize> {
        None
    }
}

struct ChooseIndex(usize);

#[async_trait]
impl DisplayChooser for ChooseIndex {
    async fn choose(&self, _displays: &[DisplayInfo]) -> Option<usize> {
        Some(self.0)
    }
}

struct RecordingChooser {
    called: Arc<AtomicBool>,
}

#[async_trait]
impl DisplayChooser for RecordingChooser {
    async fn choose(&self, displays: &[DisplayInfo]) -> Option<usize> {
        self.called.store(true, Ordering::SeqCst);
        if displays.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}

// ---------------------------------------------------------------------------
// Discovery aggregation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn discovery_order_is_deterministic() {
    init_tracing();
    let presentation = Presentation::with_defaults();

    let (mech_a, handle_a) = MockMechanism::new("alpha");
    handle_a.set_displays(vec![
        MockDisplay::new("A1", "alpha"),
        MockDisplay::new("A2", "alpha"),
    ]);
    let (mech_b, handle_b) = MockMechanism::new("beta");
    handle_b.set_displays(vec![MockDisplay::new("B1", "beta")]);

    presentation.register_mechanism(Arc::new(mech_a));
    presentation.register_mechanism(Arc::new(mech_b));

    let presenter = presentation.presenter(
        "https://example.com/deck",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );

    let first = presenter.available_displays().await;
    let second = presenter.available_displays().await;

    let names: Vec<&str> = first.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["A1", "A2", "B1"]);
    assert_eq!(first, second, "repeated aggregation must preserve ordering");
}

#[tokio::test]
async fn faulty_mechanism_does_not_poison_aggregate() {
    init_tracing();
    let presentation = Presentation::with_defaults();

    let (broken, broken_handle) = MockMechanism::new("broken");
    broken_handle.panic_on_discovery();
    let (healthy, healthy_handle) = MockMechanism::new("healthy");
    healthy_handle.set_displays(vec![MockDisplay::new("Survivor", "healthy")]);

    presentation.register_mechanism(Arc::new(broken));
    presentation.register_mechanism(Arc::new(healthy));

    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );

    let displays = presenter.available_displays().await;
    assert_eq!(displays.len(), 1);
    assert_eq!(displays[0].name, "Survivor");
}

#[tokio::test]
async fn options_reach_every_mechanism() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mechanism, handle) = MockMechanism::new("cast");
    presentation.register_mechanism(Arc::new(mechanism));

    let presenter = presentation.presenter(
        "https://example.com/deck",
        PresentOptions::channel_optional(),
        Arc::new(FirstDisplayChooser),
    );
    let _ = presenter.available_displays().await;

    let log = handle.discovery_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0, "https://example.com/deck");
    assert!(log[0].1.is_channel_optional);
}

// ---------------------------------------------------------------------------
// Start protocol
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_without_candidates_fails_before_selection() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (empty, _handle) = MockMechanism::new("empty");
    presentation.register_mechanism(Arc::new(empty));

    let called = Arc::new(AtomicBool::new(false));
    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(RecordingChooser {
            called: Arc::clone(&called),
        }),
    );

    let err = presenter.start().await.unwrap_err();
    assert!(matches!(err, PresentError::NotFound(_)), "got {err:?}");
    assert!(!called.load(Ordering::SeqCst), "selection must not run");
}

#[tokio::test]
async fn start_with_no_mechanisms_fails_not_found() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );
    let err = presenter.start().await.unwrap_err();
    assert!(matches!(err, PresentError::NotFound(_)));
}

#[tokio::test]
async fn declined_selection_aborts() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mechanism, handle) = MockMechanism::new("cast");
    handle.set_displays(vec![MockDisplay::new("TV", "cast")]);
    presentation.register_mechanism(Arc::new(mechanism));

    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(ChooseNone),
    );
    let err = presenter.start().await.unwrap_err();
    assert!(matches!(err, PresentError::Abort(_)), "got {err:?}");
}

#[tokio::test]
async fn out_of_range_selection_aborts() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mechanism, handle) = MockMechanism::new("cast");
    handle.set_displays(vec![MockDisplay::new("TV", "cast")]);
    presentation.register_mechanism(Arc::new(mechanism));

    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(ChooseIndex(5)),
    );
    let err = presenter.start().await.unwrap_err();
    assert!(matches!(err, PresentError::Abort(_)), "got {err:?}");
}

#[tokio::test]
async fn navigation_failure_surfaces_operation_error() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mechanism, handle) = MockMechanism::new("cast");
    handle.set_displays(vec![MockDisplay::failing_navigation(
        "TV",
        "cast",
        "receiver rejected launch",
    )]);
    presentation.register_mechanism(Arc::new(mechanism));

    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );
    let err = presenter.start().await.unwrap_err();
    match err {
        PresentError::Operation(detail) => {
            assert!(detail.contains("receiver rejected launch"));
        }
        other => panic!("expected Operation, got {other:?}"),
    }
}

#[tokio::test]
async fn connection_ids_are_unique_and_monotonic() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mech_a, handle_a) = MockMechanism::new("alpha");
    handle_a.set_displays(vec![]);
    let (mech_b, handle_b) = MockMechanism::new("beta");
    let display = MockDisplay::new("DisplayX", "beta");
    handle_b.set_displays(vec![Arc::clone(&display) as _]);

    presentation.register_mechanism(Arc::new(mech_a));
    presentation.register_mechanism(Arc::new(mech_b));

    let presenter = presentation.presenter(
        "https://example.com/u",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );

    let first = presenter.start().await.unwrap();
    let second = presenter.start().await.unwrap();
    assert_eq!(first.id(), ConnectionId(0));
    assert_eq!(second.id(), ConnectionId(1));
    assert_ne!(first, second);
    assert_eq!(display.navigations().len(), 2);
    assert_eq!(display.navigations()[0], "https://example.com/u");
}

#[tokio::test]
async fn start_notifies_connection_available() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mechanism, handle) = MockMechanism::new("cast");
    handle.set_displays(vec![MockDisplay::new("TV", "cast")]);
    presentation.register_mechanism(Arc::new(mechanism));

    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );

    let (tx, mut rx) = mpsc::channel(1);
    presenter.set_on_connection_available(move |connection| {
        let _ = tx.try_send(connection.id());
    });

    let connection = presenter.start().await.unwrap();
    let notified = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("no connection-available notification")
        .unwrap();
    assert_eq!(notified, connection.id());
}

// ---------------------------------------------------------------------------
// Connection and channel reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connection_reaches_connected_and_sends() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mechanism, handle) = MockMechanism::new("cast");
    let display = MockDisplay::new("TV", "cast");
    handle.set_displays(vec![Arc::clone(&display) as _]);
    presentation.register_mechanism(Arc::new(mechanism));

    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );
    let connection = presenter.start().await.unwrap();
    wait_for_state(&connection, ConnectionState::Connected).await;

    connection.send("hello receiver").unwrap();

    let peer = display.endpoint().last_peer().expect("loopback peer");
    let (tx, mut rx) = mpsc::channel(1);
    peer.set_on_message(move |payload| {
        let _ = tx.try_send(payload);
    });
    // The message was already pumped across; send another to observe.
    connection.send("second").unwrap();
    let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("message never arrived")
        .unwrap();
    assert_eq!(got, Payload::from("second"));
}

#[tokio::test]
async fn lost_channel_reconciles_and_is_replaced() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mechanism, handle) = MockMechanism::new("cast");
    handle.set_displays(vec![MockDisplay::new("TV", "cast")]);
    presentation.register_mechanism(Arc::new(mechanism));

    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );
    let connection = presenter.start().await.unwrap();
    wait_for_state(&connection, ConnectionState::Connected).await;

    let old_channel = connection.open_channel().await.unwrap();
    old_channel.close();
    wait_for_state(&connection, ConnectionState::Closed).await;

    let new_channel = connection.open_channel().await.unwrap();
    assert!(
        !new_channel.same(&old_channel),
        "stale channel must not be reused"
    );
    wait_for_state(&connection, ConnectionState::Connected).await;
}

#[tokio::test]
async fn concurrent_channel_creation_coalesces() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mechanism, handle) = MockMechanism::new("cast");
    handle.set_displays(vec![MockDisplay::new("TV", "cast")]);
    presentation.register_mechanism(Arc::new(mechanism));

    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );
    let connection = presenter.start().await.unwrap();

    let (a, b) = tokio::join!(connection.open_channel(), connection.open_channel());
    let a = a.unwrap();
    let b = b.unwrap();
    assert!(a.same(&b), "concurrent callers must share one channel");
}

#[tokio::test]
async fn send_errors_distinguish_missing_channel_from_unconnected() {
    init_tracing();
    let presentation = Presentation::with_defaults();

    // One display whose channels never materialise, one whose channels
    // stall in Connecting.
    let (mechanism, handle) = MockMechanism::new("cast");
    handle.set_displays(vec![
        MockDisplay::with_endpoint("NoChannel", "cast", MockEndpoint::never_connects()),
        MockDisplay::with_endpoint("Stalled", "cast", MockEndpoint::stalled()),
    ]);
    presentation.register_mechanism(Arc::new(mechanism));

    // No channel at all.
    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::channel_optional(),
        Arc::new(ChooseIndex(0)),
    );
    let connection = presenter.start().await.unwrap();
    let err = connection.send("too early").unwrap_err();
    match err {
        PresentError::InvalidState(detail) => assert!(detail.contains("no channel")),
        other => panic!("expected InvalidState, got {other:?}"),
    }

    // Channel present but stuck in Connecting.
    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::channel_optional(),
        Arc::new(ChooseIndex(1)),
    );
    let connection = presenter.start().await.unwrap();
    let channel = connection.open_channel().await.unwrap();
    assert!(channel.state().is_live());
    let err = connection.send("still connecting").unwrap_err();
    match err {
        PresentError::InvalidState(detail) => assert!(detail.contains("not connected")),
        other => panic!("expected InvalidState, got {other:?}"),
    }
}

#[tokio::test]
async fn terminate_is_terminal() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mechanism, handle) = MockMechanism::new("cast");
    let display = MockDisplay::new("TV", "cast");
    handle.set_displays(vec![Arc::clone(&display) as _]);
    presentation.register_mechanism(Arc::new(mechanism));

    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );
    let connection = presenter.start().await.unwrap();
    wait_for_state(&connection, ConnectionState::Connected).await;

    connection.terminate().await;
    assert_eq!(connection.state(), ConnectionState::Terminated);
    assert!(display.endpoint().was_terminated());

    let err = connection.send("after the end").unwrap_err();
    assert!(matches!(err, PresentError::InvalidState(_)));
    assert!(connection.close().is_err());
    assert!(connection.open_channel().await.is_err());

    // Nothing moves the state again.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connection.state(), ConnectionState::Terminated);
}

// ---------------------------------------------------------------------------
// Reconnection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_returns_the_original_connection() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mechanism, handle) = MockMechanism::new("cast");
    handle.set_displays(vec![MockDisplay::new("TV", "cast")]);
    presentation.register_mechanism(Arc::new(mechanism));

    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );
    let connection = presenter.start().await.unwrap();
    wait_for_state(&connection, ConnectionState::Connected).await;

    connection.close().unwrap();
    wait_for_state(&connection, ConnectionState::Closed).await;

    let reconnected = presenter.reconnect(connection.id()).unwrap();
    assert_eq!(reconnected, connection, "reconnect must return the same connection");
    wait_for_state(&reconnected, ConnectionState::Connected).await;
}

#[tokio::test]
async fn reconnect_unknown_id_fails_not_found() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );
    let err = presenter.reconnect(ConnectionId(42)).unwrap_err();
    assert!(matches!(err, PresentError::NotFound(_)));
}

// ---------------------------------------------------------------------------
// Availability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn availability_flips_with_discovery_results() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mechanism, handle) = MockMechanism::new("cast");
    presentation.register_mechanism(Arc::new(mechanism));

    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );

    let watcher = presenter.availability().unwrap();
    assert!(!watcher.value());

    // A display appears; the next aggregation flips the watcher.
    handle.set_displays(vec![MockDisplay::new("TV", "cast")]);
    let _ = presenter.available_displays().await;

    let mut rx = watcher.subscribe();
    tokio::time::timeout(Duration::from_secs(1), async {
        while !*rx.borrow_and_update() {
            rx.changed().await.expect("availability watch closed");
        }
    })
    .await
    .expect("watcher never flipped to available");
    assert!(watcher.value());

    // Unchanged results produce no redundant notification.
    let mut quiet = watcher.subscribe();
    quiet.borrow_and_update();
    let _ = presenter.available_displays().await;
    assert!(!quiet.has_changed().unwrap());
}

#[tokio::test]
async fn availability_disabled_by_policy() {
    init_tracing();
    let mut config = Config::default();
    config.engine.availability = false;
    let presentation = Presentation::new(config);

    let presenter = presentation.presenter(
        "https://example.com",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );
    let err = presenter.availability().unwrap_err();
    assert!(matches!(err, PresentError::NotSupported(_)));
}

// ---------------------------------------------------------------------------
// Receiver engine
// ---------------------------------------------------------------------------

fn incoming(url: &str, name: &str) -> IncomingController {
    IncomingController {
        url: url.to_string(),
        name: name.to_string(),
        endpoint: Arc::new(MockEndpoint::loopback()),
    }
}

#[tokio::test]
async fn receiver_resolves_first_connection_on_arrival() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mechanism, handle) = MockMechanism::with_receiver_context("cast");
    presentation.register_mechanism(Arc::new(mechanism));

    let receiver = presentation.receiver().await;

    // Park the first-connection future before anything arrives.
    let waiting = {
        let receiver = receiver.clone();
        tokio::spawn(async move { receiver.connection().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiting.is_finished());

    handle.inject_controller(incoming("https://example.com", "phone")).await;

    let first = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("first connection never resolved")
        .unwrap();
    assert_eq!(first.id(), ConnectionId(0));
    wait_for_state(&first, ConnectionState::Connected).await;
}

#[tokio::test]
async fn receiver_first_connection_is_stable_and_list_grows() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mechanism, handle) = MockMechanism::with_receiver_context("cast");
    presentation.register_mechanism(Arc::new(mechanism));

    let receiver = presentation.receiver().await;
    handle.inject_controller(incoming("https://example.com", "phone")).await;
    handle.inject_controller(incoming("https://example.com", "tablet")).await;

    // Wait until both arrivals are tracked.
    tokio::time::timeout(Duration::from_secs(5), async {
        while receiver.connections().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("arrivals never tracked");

    // Called after arrivals: resolves immediately with the earliest.
    let first = receiver.connection().await;
    assert_eq!(first.id(), ConnectionId(0));

    let connections = receiver.connections();
    assert_eq!(connections.len(), 2);
    assert_eq!(connections[0].id(), ConnectionId(0));
    assert_eq!(connections[1].id(), ConnectionId(1));
    assert_eq!(connections[0], first);
}

#[tokio::test]
async fn receiver_notifies_incoming() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    let (mechanism, handle) = MockMechanism::with_receiver_context("cast");
    presentation.register_mechanism(Arc::new(mechanism));

    let receiver = presentation.receiver().await;
    let (tx, mut rx) = mpsc::channel(4);
    receiver.set_on_incoming(move |connection| {
        let _ = tx.try_send(connection.id());
    });

    handle.inject_controller(incoming("https://example.com", "phone")).await;

    let notified = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no incoming notification")
        .unwrap();
    assert_eq!(notified, ConnectionId(0));
}

// ---------------------------------------------------------------------------
// End to end over the loopback mechanism
// ---------------------------------------------------------------------------

#[tokio::test]
async fn loopback_presentation_end_to_end() {
    init_tracing();
    let presentation = Presentation::with_defaults();
    presentation.register_mechanism(Arc::new(castlink_mechanism::LoopbackMechanism::new(
        "Local Surface",
        16,
    )));

    // Receiver side must be monitoring before the launch lands.
    let receiver = presentation.receiver().await;

    let presenter = presentation.presenter(
        "https://example.com/deck",
        PresentOptions::default(),
        Arc::new(FirstDisplayChooser),
    );
    let controller_conn = presenter.start().await.unwrap();

    let receiver_conn = tokio::time::timeout(Duration::from_secs(5), receiver.connection())
        .await
        .expect("no incoming connection on the receiving side");
    assert_eq!(receiver_conn.url(), "https://example.com/deck");

    wait_for_state(&controller_conn, ConnectionState::Connected).await;
    wait_for_state(&receiver_conn, ConnectionState::Connected).await;

    // Controller -> receiver.
    let (tx, mut rx) = mpsc::channel(4);
    receiver_conn.set_on_message(move |payload| {
        let _ = tx.try_send(payload);
    });
    controller_conn.send("next slide").unwrap();
    let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("receiver never got the message")
        .unwrap();
    assert_eq!(got, Payload::from("next slide"));

    // Receiver -> controller.
    let (tx, mut rx) = mpsc::channel(4);
    controller_conn.set_on_message(move |payload| {
        let _ = tx.try_send(payload);
    });
    receiver_conn.send("on slide 2").unwrap();
    let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("controller never got the reply")
        .unwrap();
    assert_eq!(got, Payload::from("on slide 2"));

    // Terminating the controller side tears the channel down for both.
    controller_conn.terminate().await;
    assert_eq!(controller_conn.state(), ConnectionState::Terminated);
    wait_for_state(&receiver_conn, ConnectionState::Closed).await;
}
