// Session engine against an in-memory broker

mod common;

use common::{error, ok, standard_reply, wait_for, Harness, StubBroker};
use corelink::{
    encode_frame, ConnectionState, ControlCallbacks, CorelinkError, Credentials, DataTransportFactory,
    LogCallbacks, MessageTransport, ReceiverParams, SenderParams, Session, SessionState, StreamFilter,
    StreamId,
};
use serde_json::{json, Map, Value};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn credentials() -> Credentials {
    Credentials::new("Testuser", "Testpassword")
}

fn counting_handler(hits: &Arc<AtomicUsize>) -> impl Fn(StreamId, &[u8], &[u8]) + Send + Sync + 'static {
    let hits = Arc::clone(hits);
    move |_id: StreamId, _header: &[u8], _payload: &[u8]| {
        hits.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CountingCallbacks {
    updates: AtomicUsize,
    subscribers: AtomicUsize,
}

impl ControlCallbacks for CountingCallbacks {
    fn on_update(&self, _msg: &Value) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }

    fn on_subscriber(&self, _msg: &Value) {
        self.subscribers.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn login_stores_token_and_address() {
    let harness = Harness::new(StubBroker::standard());
    let mut session = harness.session(Arc::new(LogCallbacks));
    assert_eq!(session.state(), SessionState::Unauthenticated);

    assert_eq!(session.login(&credentials()).unwrap(), "abc");
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(session.token(), "abc");
    assert_eq!(session.public_ip(), "1.2.3.4");

    let auth = &harness.broker.requests_for("auth")[0];
    assert_eq!(auth["username"], "Testuser");
    assert_eq!(auth["password"], "Testpassword");
    assert_eq!(auth["ID"], 0);
    assert!(auth.get("token").is_none());
}

#[test]
fn rejected_login_is_an_auth_error_and_closes_the_session() {
    let broker = StubBroker::new(Box::new(|req: &Value| vec![error(req, 401, "bad password")]));
    let harness = Harness::new(broker);
    let mut session = harness.session(Arc::new(LogCallbacks));

    match session.login(&credentials()) {
        Err(CorelinkError::Auth { status_code, message }) => {
            assert_eq!(status_code, 401);
            assert_eq!(message, "bad password");
        }
        other => panic!("expected auth error, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(session.login(&credentials()), Err(CorelinkError::Precondition(_))));
}

#[test]
fn calls_before_login_are_rejected_locally() {
    let harness = Harness::new(StubBroker::standard());
    let mut session = harness.session(Arc::new(LogCallbacks));

    let err = session.create_sender(SenderParams::new("Holodeck", "distance")).unwrap_err();
    assert!(matches!(err, CorelinkError::Precondition(_)));
    assert!(matches!(session.list_workspaces(), Err(CorelinkError::Precondition(_))));
    assert!(matches!(session.send(11, b"", b"x"), Err(CorelinkError::Precondition(_))));
    assert!(harness.broker.requests().is_empty());
}

#[test]
fn create_receiver_opens_data_channel_once_and_pings() {
    let harness = Harness::new(StubBroker::standard());
    let mut session = harness.session(Arc::new(LogCallbacks));
    session.login(&credentials()).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let streams = session
        .create_receiver(ReceiverParams::new("Holodeck", &["distance"]), counting_handler(&hits))
        .unwrap();
    assert_eq!(streams, vec![42]);
    assert_eq!(session.receiver_id(), Some(7));
    assert_eq!(session.registry().receiver_ids(), vec![7]);
    assert!(session.registry().is_allowed(42));

    let sender = session.create_sender(SenderParams::new("Holodeck", "distance")).unwrap();
    assert_eq!(sender, 11);

    assert_eq!(harness.factory_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*harness.factory_ports.lock(), vec![9000]);
    let sent = harness.socket.sent.lock().clone();
    assert_eq!(sent, vec![vec![0, 0, 4, 0, 7, 0, 0, 0, 0, 0, 0, 0]]);

    let receiver = &harness.broker.requests_for("receiver")[0];
    assert_eq!(receiver["IP"], "1.2.3.4");
    assert_eq!(receiver["port"], 0);
    assert_eq!(receiver["token"], "abc");
    assert_eq!(receiver["type"], json!(["distance"]));
}

#[test]
fn second_receiver_reuses_receiver_identity() {
    let harness = Harness::new(StubBroker::standard());
    let mut session = harness.session(Arc::new(LogCallbacks));
    session.login(&credentials()).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    session
        .create_receiver(ReceiverParams::new("Holodeck", &["distance"]), counting_handler(&hits))
        .unwrap();
    session
        .create_receiver(ReceiverParams::new("Holodeck", &["audio"]), counting_handler(&hits))
        .unwrap();

    let receivers = harness.broker.requests_for("receiver");
    assert!(receivers[0].get("receiverid").is_none());
    assert_eq!(receivers[1]["receiverid"], 7);
    assert_eq!(harness.factory_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn datagrams_fan_out_to_subscribed_receivers_only() {
    let harness = Harness::new(StubBroker::standard());
    let mut session = harness.session(Arc::new(LogCallbacks));
    session.login(&credentials()).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    session
        .create_receiver(ReceiverParams::new("Holodeck", &["distance"]), counting_handler(&hits))
        .unwrap();
    session
        .create_receiver(ReceiverParams::new("Holodeck", &["distance"]), counting_handler(&hits))
        .unwrap();

    harness.socket.inject(encode_frame(42, b"{}", b"5").unwrap());
    assert!(wait_for(|| hits.load(Ordering::SeqCst) == 2));

    // empty frame, unknown stream, then one more real frame
    harness.socket.inject(vec![0, 0, 0, 0, 7, 0, 0, 0]);
    harness.socket.inject(encode_frame(99, b"", b"1").unwrap());
    harness.socket.inject(encode_frame(42, b"", b"6").unwrap());
    assert!(wait_for(|| hits.load(Ordering::SeqCst) == 4));

    assert!(wait_for(|| session.data_stats().unwrap().dispatched == 4));
    let stats = session.data_stats().unwrap();
    assert_eq!(stats.received, 4);
    assert_eq!(stats.malformed, 0);
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[test]
fn mismatched_reply_id_is_a_protocol_error() {
    let broker = StubBroker::new(Box::new(|req: &Value| {
        if req["function"] == "listWorkspaces" {
            let mut reply = ok(req, json!({"workspaceList": []}));
            reply["ID"] = json!(req["ID"].as_u64().unwrap_or_default() + 1);
            vec![reply]
        } else {
            standard_reply(req)
        }
    }));
    let harness = Harness::new(broker);
    let mut session = harness.session(Arc::new(LogCallbacks));
    session.login(&credentials()).unwrap();

    match session.list_workspaces() {
        Err(CorelinkError::Protocol(msg)) => assert!(msg.contains("id mismatch"), "{}", msg),
        other => panic!("expected protocol error, got {:?}", other),
    }
}

#[test]
fn pushes_go_to_callbacks_and_never_satisfy_a_call() {
    let broker = StubBroker::new(Box::new(|req: &Value| {
        if req["function"] == "listWorkspaces" {
            vec![
                json!({"function": "update", "streamID": 42, "meta": {}}),
                json!({"function": "mystery"}),
                ok(req, json!({"workspaceList": ["Holodeck"]})),
            ]
        } else {
            standard_reply(req)
        }
    }));
    let harness = Harness::new(broker);
    let callbacks = Arc::new(CountingCallbacks::default());
    let mut session = harness.session(callbacks.clone());
    session.login(&credentials()).unwrap();

    assert_eq!(session.list_workspaces().unwrap(), vec!["Holodeck".to_string()]);
    assert_eq!(callbacks.updates.load(Ordering::SeqCst), 1);

    harness.broker.push(json!({"function": "subscriber", "streamID": 50}));
    assert!(wait_for(|| callbacks.subscribers.load(Ordering::SeqCst) == 1));
    assert_eq!(session.get_default_workspace().unwrap(), "Holodeck");
}

#[test]
fn broker_rejection_keeps_the_session_usable() {
    let broker = StubBroker::new(Box::new(|req: &Value| {
        if req["function"] == "addWorkspace" {
            vec![error(req, 403, "not an admin")]
        } else {
            standard_reply(req)
        }
    }));
    let harness = Harness::new(broker);
    let mut session = harness.session(Arc::new(LogCallbacks));
    session.login(&credentials()).unwrap();

    match session.add_workspace("Lab") {
        Err(CorelinkError::Broker { status_code, message }) => {
            assert_eq!(status_code, 403);
            assert_eq!(message, "not an admin");
        }
        other => panic!("expected broker error, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(session.list_workspaces().unwrap().len(), 2);
}

#[test]
fn missing_reply_times_out() {
    let broker = StubBroker::new(Box::new(|req: &Value| {
        if req["function"] == "listUsers" {
            Vec::new()
        } else {
            standard_reply(req)
        }
    }));
    let harness = Harness::new(broker);
    let mut session = harness.session(Arc::new(LogCallbacks));
    session.login(&credentials()).unwrap();

    assert!(matches!(session.list_users(), Err(CorelinkError::Timeout(_))));
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[test]
fn late_reply_after_timeout_is_discarded() {
    let broker = StubBroker::new(Box::new(|req: &Value| {
        if req["function"] == "listUsers" {
            Vec::new()
        } else {
            standard_reply(req)
        }
    }));
    let harness = Harness::new(broker);
    let mut session = harness.session(Arc::new(LogCallbacks));
    session.login(&credentials()).unwrap();

    assert!(matches!(session.list_users(), Err(CorelinkError::Timeout(_))));
    let late_id = harness.broker.requests_for("listUsers")[0]["ID"].clone();
    harness.broker.push(json!({"ID": late_id, "statusCode": 0, "userList": []}));
    thread::sleep(Duration::from_millis(50));

    assert_eq!(session.list_workspaces().unwrap(), vec!["Holodeck", "Chalktalk"]);
    assert_eq!(session.list_workspaces().unwrap(), vec!["Holodeck", "Chalktalk"]);
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[test]
fn late_reply_arriving_mid_call_is_skipped() {
    let broker = StubBroker::new(Box::new(|req: &Value| match req["function"].as_str() {
        Some("listUsers") => Vec::new(),
        Some("listWorkspaces") => {
            let late = json!({"ID": req["ID"].as_u64().unwrap_or(1) - 1, "statusCode": 0, "userList": []});
            vec![late, ok(req, json!({"workspaceList": ["Holodeck"]}))]
        }
        _ => standard_reply(req),
    }));
    let harness = Harness::new(broker);
    let mut session = harness.session(Arc::new(LogCallbacks));
    session.login(&credentials()).unwrap();

    assert!(matches!(session.list_users(), Err(CorelinkError::Timeout(_))));
    assert_eq!(session.list_workspaces().unwrap(), vec!["Holodeck"]);
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[test]
fn request_ids_increase_monotonically() {
    let harness = Harness::new(StubBroker::standard());
    let mut session = harness.session(Arc::new(LogCallbacks));
    session.login(&credentials()).unwrap();
    session.list_workspaces().unwrap();
    session.list_functions().unwrap();
    session.stream_info(42).unwrap();

    let ids: Vec<u64> = harness
        .broker
        .requests()
        .iter()
        .map(|r| r["ID"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
}

#[test]
fn subscribe_requires_a_receiver_and_extends_allowed_streams() {
    let harness = Harness::new(StubBroker::standard());
    let mut session = harness.session(Arc::new(LogCallbacks));
    session.login(&credentials()).unwrap();

    assert!(matches!(session.subscribe(&[50]), Err(CorelinkError::Precondition(_))));

    let hits = Arc::new(AtomicUsize::new(0));
    session
        .create_receiver(ReceiverParams::new("Holodeck", &["distance"]), counting_handler(&hits))
        .unwrap();
    assert_eq!(session.subscribe(&[50]).unwrap(), vec![50]);
    assert!(session.registry().is_allowed(50));

    let subscribe = &harness.broker.requests_for("subscribe")[0];
    assert_eq!(subscribe["receiverID"], 7);
    assert_eq!(subscribe["streamID"], json!([50]));

    harness.socket.inject(encode_frame(50, b"", b"1").unwrap());
    assert!(wait_for(|| hits.load(Ordering::SeqCst) == 1));

    assert_eq!(session.unsubscribe(&[42, 50]).unwrap(), vec![42, 50]);
    assert!(!session.registry().is_allowed(42));
    assert!(!session.registry().is_allowed(50));
}

#[test]
fn default_disconnect_covers_every_local_stream() {
    let harness = Harness::new(StubBroker::standard());
    let mut session = harness.session(Arc::new(LogCallbacks));
    session.login(&credentials()).unwrap();
    session.create_sender(SenderParams::new("Holodeck", "distance")).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    session
        .create_receiver(ReceiverParams::new("Holodeck", &["distance"]), counting_handler(&hits))
        .unwrap();

    assert_eq!(session.disconnect(None).unwrap(), vec![11, 7]);
    let filtered = session
        .disconnect(Some(StreamFilter::new().workspace("Holodeck").stream_ids(&[11])))
        .unwrap();
    assert_eq!(filtered, vec![11, 7]);

    let requests = harness.broker.requests_for("disconnect");
    assert_eq!(requests[0]["streamIDs"], json!([11, 7]));
    assert_eq!(requests[1]["workspaces"], json!(["Holodeck"]));
}

#[test]
fn exit_disconnects_once_and_closes_both_channels() {
    let harness = Harness::new(StubBroker::standard());
    let mut session = harness.session(Arc::new(LogCallbacks));
    session.login(&credentials()).unwrap();
    let sender = session.create_sender(SenderParams::new("Holodeck", "distance")).unwrap();
    session.send(sender, b"", b"5").unwrap();

    assert_eq!(session.exit().unwrap(), vec![11]);
    assert!(session.exit().unwrap().is_empty());

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(harness.broker.requests_for("disconnect").len(), 1);
    assert!(harness.socket.is_closed());
    assert!(matches!(session.send(sender, b"", b"6"), Err(CorelinkError::Precondition(_))));
}

#[test]
fn generic_call_passes_fields_through() {
    let harness = Harness::new(StubBroker::standard());
    let mut session = harness.session(Arc::new(LogCallbacks));
    session.login(&credentials()).unwrap();

    let mut fields = Map::new();
    fields.insert("workspace".to_string(), json!("Holodeck"));
    let reply = session.call("keepAlive", fields).unwrap();
    assert_eq!(reply["statusCode"], 0);

    let call = &harness.broker.requests_for("keepAlive")[0];
    assert_eq!(call["workspace"], "Holodeck");
    assert_eq!(call["token"], "abc");
}

/// Accepts the connect call but never leaves Connecting
struct StuckTransport;

impl MessageTransport for StuckTransport {
    fn connect(&self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn send_message(&self, _text: &str) -> io::Result<()> {
        Err(io::ErrorKind::NotConnected.into())
    }

    fn receive_message(&self) -> io::Result<Option<String>> {
        Err(io::ErrorKind::NotConnected.into())
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Connecting
    }

    fn disconnect(&self) -> io::Result<()> {
        Ok(())
    }
}

struct RefusingTransport;

impl MessageTransport for RefusingTransport {
    fn connect(&self, _timeout: Duration) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
    }

    fn send_message(&self, _text: &str) -> io::Result<()> {
        Err(io::ErrorKind::NotConnected.into())
    }

    fn receive_message(&self) -> io::Result<Option<String>> {
        Err(io::ErrorKind::NotConnected.into())
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Closed
    }

    fn disconnect(&self) -> io::Result<()> {
        Ok(())
    }
}

fn open_with(transport: Arc<dyn MessageTransport>) -> Result<Session, CorelinkError> {
    let factory: DataTransportFactory =
        Box::new(|_host, _port| Err(io::Error::new(io::ErrorKind::Unsupported, "no data channel")));
    Session::with_transports(Harness::config(), transport, Arc::new(LogCallbacks), factory)
}

#[test]
fn transport_stuck_connecting_fails_within_budget() {
    let budget = Harness::config().timeout();
    let started = Instant::now();
    let result = open_with(Arc::new(StuckTransport));

    match result {
        Err(CorelinkError::Connect { endpoint, reason }) => {
            assert_eq!(endpoint, "ws://stub:20012");
            assert!(reason.contains("Connecting"), "{reason}");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("session opened on a transport that never connected"),
    }
    assert!(started.elapsed() >= budget);
    assert!(started.elapsed() < budget + Duration::from_secs(1));
}

#[test]
fn refused_connection_is_a_connect_error() {
    let started = Instant::now();
    match open_with(Arc::new(RefusingTransport)) {
        Err(CorelinkError::Connect { reason, .. }) => assert!(reason.contains("refused"), "{reason}"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("session opened on a refused connection"),
    }
    assert!(started.elapsed() < Harness::config().timeout());
}
