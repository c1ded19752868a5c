// In-memory broker and datagram socket for driving a Session without network
#![allow(dead_code)]

use corelink::{
    Config, ConnectionState, ControlCallbacks, DataTransportFactory, DatagramTransport,
    MessageTransport, Session, StateCell,
};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const POLL: Duration = Duration::from_millis(10);

pub type Responder = Box<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

/// Answers each request through `responder`; replies and pushes are queued
/// for the control receive worker in the order returned
pub struct StubBroker {
    responder: Responder,
    inbound_tx: Sender<String>,
    inbound_rx: Receiver<String>,
    requests: Mutex<Vec<Value>>,
    state: StateCell,
}

impl StubBroker {
    pub fn new(responder: Responder) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = unbounded();
        Arc::new(StubBroker {
            responder,
            inbound_tx,
            inbound_rx,
            requests: Mutex::new(Vec::new()),
            state: StateCell::new(ConnectionState::Connecting),
        })
    }

    pub fn standard() -> Arc<Self> {
        Self::new(Box::new(standard_reply))
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    pub fn requests_for(&self, function: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r["function"] == function)
            .collect()
    }

    pub fn push(&self, msg: Value) {
        let _ = self.inbound_tx.send(msg.to_string());
    }
}

impl MessageTransport for StubBroker {
    fn connect(&self, _timeout: Duration) -> io::Result<()> {
        self.state.set(ConnectionState::Open);
        Ok(())
    }

    fn send_message(&self, text: &str) -> io::Result<()> {
        let request: Value = serde_json::from_str(text)?;
        self.requests.lock().push(request.clone());
        for reply in (self.responder)(&request) {
            let _ = self.inbound_tx.send(reply.to_string());
        }
        Ok(())
    }

    fn receive_message(&self) -> io::Result<Option<String>> {
        if self.state.get() == ConnectionState::Closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "stub closed"));
        }
        match self.inbound_rx.recv_timeout(POLL) {
            Ok(text) => Ok(Some(text)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::ErrorKind::BrokenPipe.into()),
        }
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn disconnect(&self) -> io::Result<()> {
        self.state.set(ConnectionState::Closed);
        Ok(())
    }
}

/// Success reply echoing the request ID, merged with `fields`
pub fn ok(request: &Value, fields: Value) -> Value {
    let mut reply = json!({"ID": request["ID"].clone(), "statusCode": 0});
    if let (Some(reply), Value::Object(fields)) = (reply.as_object_mut(), fields) {
        reply.extend(fields);
    }
    reply
}

pub fn error(request: &Value, status_code: i64, message: &str) -> Value {
    json!({"ID": request["ID"].clone(), "statusCode": status_code, "message": message})
}

/// A broker that grants every request
pub fn standard_reply(request: &Value) -> Vec<Value> {
    let reply = match request["function"].as_str().unwrap_or_default() {
        "auth" => ok(request, json!({"token": "abc", "IP": "1.2.3.4"})),
        "receiver" => ok(
            request,
            json!({"streamID": "7", "streamList": [{"streamID": "42"}], "port": 9000, "proto": "udp"}),
        ),
        "sender" => ok(request, json!({"streamID": 11, "port": 9000, "proto": "udp", "MTU": 20000})),
        "subscribe" => ok(request, json!({"streamList": request["streamID"].clone()})),
        "unsubscribe" | "disconnect" => {
            ok(request, json!({"streamList": request["streamIDs"].clone()}))
        }
        "listWorkspaces" => ok(request, json!({"workspaceList": ["Holodeck", "Chalktalk"]})),
        "getDefaultWorkspace" => ok(request, json!({"workspace": "Holodeck"})),
        _ => ok(request, json!({})),
    };
    vec![reply]
}

/// Datagram socket that records what is sent and replays queued datagrams
#[derive(Default)]
pub struct RecordingSocket {
    pub sent: Mutex<Vec<Vec<u8>>>,
    inbound: Mutex<VecDeque<Vec<u8>>>,
    closed: std::sync::atomic::AtomicBool,
}

impl RecordingSocket {
    pub fn inject(&self, datagram: Vec<u8>) {
        self.inbound.lock().push_back(datagram);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl DatagramTransport for RecordingSocket {
    fn send_datagram(&self, data: &[u8]) -> io::Result<usize> {
        self.sent.lock().push(data.to_vec());
        Ok(data.len())
    }

    fn receive_datagram(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"));
        }
        let next = self.inbound.lock().pop_front();
        match next {
            Some(datagram) => {
                buf[..datagram.len()].copy_from_slice(&datagram);
                Ok(Some(datagram.len()))
            }
            None => {
                thread::sleep(Duration::from_millis(2));
                Ok(None)
            }
        }
    }

    fn disconnect(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Everything a test needs to observe a session from the outside
pub struct Harness {
    pub broker: Arc<StubBroker>,
    pub socket: Arc<RecordingSocket>,
    pub factory_calls: Arc<AtomicUsize>,
    pub factory_ports: Arc<Mutex<Vec<u16>>>,
}

impl Harness {
    pub fn new(broker: Arc<StubBroker>) -> Self {
        Harness {
            broker,
            socket: Arc::new(RecordingSocket::default()),
            factory_calls: Arc::new(AtomicUsize::new(0)),
            factory_ports: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn config() -> Config {
        Config::new("stub").poll_interval(POLL).timeout_iterations(30)
    }

    pub fn session(&self, callbacks: Arc<dyn ControlCallbacks>) -> Session {
        let socket = Arc::clone(&self.socket);
        let calls = Arc::clone(&self.factory_calls);
        let ports = Arc::clone(&self.factory_ports);
        let factory: DataTransportFactory = Box::new(move |_host, port| {
            calls.fetch_add(1, Ordering::SeqCst);
            ports.lock().push(port);
            Ok(Arc::clone(&socket) as Arc<dyn DatagramTransport>)
        });
        let transport = Arc::clone(&self.broker) as Arc<dyn MessageTransport>;
        Session::with_transports(Self::config(), transport, callbacks, factory)
            .expect("stub session opens")
    }
}

/// Poll `check` until it holds or a second passes
pub fn wait_for(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}
