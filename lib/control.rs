// Control channel: FIFO send worker, classifying receive worker, blocking
// request/reply
//
// One request may be in flight at a time. Replies are matched to requests
// only by the echoed "ID" field; a map from id to a one-shot slot would be
// needed to support overlapping calls.
use crate::callbacks::{dispatch_push, ControlCallbacks};
use crate::config::Config;
use crate::document::{self, Request};
use crate::error::{CorelinkError, Result};
use corelink_core::PushKind;
use corelink_transport::{ConnectionState, MessageTransport};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// How the receive worker classified one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Inbound {
    Reply,
    Push(PushKind),
    UnknownPush(String),
    Malformed,
}

pub struct ControlChannel {
    transport: Arc<dyn MessageTransport>,
    outbound: Mutex<Option<Sender<String>>>,
    replies: Receiver<Value>,
    shutdown: Arc<AtomicBool>,
    send_worker: Mutex<Option<JoinHandle<()>>>,
    receive_worker: Mutex<Option<JoinHandle<()>>>,
    reply_timeout: Duration,
    debug: bool,
}

impl ControlChannel {
    /// Connect the transport and start both workers. Fails with `Connect`
    /// when the transport is not open within the configured budget.
    pub fn open(
        transport: Arc<dyn MessageTransport>,
        callbacks: Arc<dyn ControlCallbacks>,
        config: &Config,
        endpoint: &str,
    ) -> Result<Self> {
        let timeout = config.timeout();
        if let Err(e) = transport.connect(timeout) {
            return Err(CorelinkError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            });
        }
        let started = Instant::now();
        while transport.state() == ConnectionState::Connecting && started.elapsed() < timeout {
            thread::sleep(config.poll_interval);
        }
        let state = transport.state();
        if state != ConnectionState::Open {
            return Err(CorelinkError::Connect {
                endpoint: endpoint.to_string(),
                reason: format!("connection {:?} after {:?}", state, timeout),
            });
        }

        let (out_tx, out_rx) = unbounded::<String>();
        let (reply_tx, reply_rx) = unbounded::<Value>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let send_transport = Arc::clone(&transport);
        let send_worker = thread::Builder::new()
            .name("corelink-ctl-tx".to_string())
            .spawn(move || Self::send_loop(send_transport, out_rx))?;

        let recv_transport = Arc::clone(&transport);
        let recv_shutdown = Arc::clone(&shutdown);
        let receive_worker = thread::Builder::new()
            .name("corelink-ctl-rx".to_string())
            .spawn(move || Self::receive_loop(recv_transport, callbacks, reply_tx, recv_shutdown))?;

        debug!(%endpoint, "control channel open");
        Ok(ControlChannel {
            transport,
            outbound: Mutex::new(Some(out_tx)),
            replies: reply_rx,
            shutdown,
            send_worker: Mutex::new(Some(send_worker)),
            receive_worker: Mutex::new(Some(receive_worker)),
            reply_timeout: timeout,
            debug: config.debug,
        })
    }

    // Drains the outbound queue in order until every sender handle is gone
    fn send_loop(transport: Arc<dyn MessageTransport>, outbound: Receiver<String>) {
        for text in outbound.iter() {
            if let Err(e) = transport.send_message(&text) {
                error!(error = %e, "control send failed");
            }
        }
    }

    fn receive_loop(
        transport: Arc<dyn MessageTransport>,
        callbacks: Arc<dyn ControlCallbacks>,
        replies: Sender<Value>,
        shutdown: Arc<AtomicBool>,
    ) {
        while !shutdown.load(Ordering::Acquire) {
            match transport.receive_message() {
                Ok(Some(text)) => {
                    route_inbound(&text, callbacks.as_ref(), &replies);
                }
                Ok(None) => continue,
                Err(e) => {
                    if !shutdown.load(Ordering::Acquire) {
                        error!(error = %e, "control receive failed, stopping receive worker");
                    }
                    break;
                }
            }
        }
        debug!("control receive worker exiting");
    }

    /// Queue a message for the send worker
    pub fn send_message(&self, text: String) -> Result<()> {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(text).map_err(|_| CorelinkError::Closed),
            None => Err(CorelinkError::Closed),
        }
    }

    /// Block until the reply for `expected` arrives or the budget runs out.
    /// Replies carrying an older ID answer calls that already timed out and
    /// are discarded without resetting the deadline.
    pub fn await_reply(&self, expected: u32) -> Result<Value> {
        let started = Instant::now();
        loop {
            let remaining = self.reply_timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(CorelinkError::Timeout(self.reply_timeout));
            }
            let reply = match self.replies.recv_timeout(remaining) {
                Ok(reply) => reply,
                Err(RecvTimeoutError::Timeout) => return Err(CorelinkError::Timeout(self.reply_timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(CorelinkError::Closed),
            };
            match document::field_u32(&reply, "ID") {
                Some(id) if id < expected => {
                    warn!(id, expected, "discarding late reply");
                }
                _ => return Ok(reply),
            }
        }
    }

    pub fn send_and_await_reply(&self, request: Request) -> Result<Value> {
        let expected = request
            .id()
            .ok_or_else(|| CorelinkError::Protocol("request has no ID".to_string()))?;
        let function = request.function().to_string();
        let text = request.into_value().to_string();

        if self.debug && function != "auth" {
            debug!(id = expected, request = %text, "request");
        } else {
            debug!(id = expected, %function, "request");
        }

        // replies left over from timed out calls
        for stale in self.replies.try_iter() {
            warn!(reply = %stale, "discarding late reply");
        }

        self.send_message(text)?;
        let reply = self.await_reply(expected)?;

        if self.debug {
            debug!(id = expected, response = %reply, "response");
        }
        check_reply(&reply, expected)?;
        Ok(reply)
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop both workers and close the transport. Messages already queued
    /// are flushed first. Safe to call more than once.
    pub fn close(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(self.outbound.lock().take());
        join_worker(self.send_worker.lock().take());
        if let Err(e) = self.transport.disconnect() {
            warn!(error = %e, "control transport disconnect failed");
        }
        join_worker(self.receive_worker.lock().take());
        debug!("control channel closed");
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn join_worker(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        // a callback closing its own channel must not join itself
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("control worker panicked");
        }
    }
}

/// Classify one inbound message: documents with a top-level "function" key
/// are pushes and go to the callbacks; everything else is a reply.
pub(crate) fn route_inbound(text: &str, callbacks: &dyn ControlCallbacks, replies: &Sender<Value>) -> Inbound {
    let msg: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "dropping unparsable control message");
            return Inbound::Malformed;
        }
    };

    if let Some(function) = msg.get("function") {
        let name = function.as_str().unwrap_or_default().to_string();
        return match PushKind::from_function(&name) {
            Some(kind) => {
                dispatch_push(callbacks, kind, &msg);
                Inbound::Push(kind)
            }
            None => {
                warn!(function = %name, "unknown callback, dropping; this library may be outdated");
                Inbound::UnknownPush(name)
            }
        };
    }

    let _ = replies.send(msg);
    Inbound::Reply
}

/// Reply must echo the request id and report statusCode 0
pub(crate) fn check_reply(reply: &Value, expected: u32) -> Result<()> {
    match document::field_u32(reply, "ID") {
        Some(id) if id == expected => {}
        _ => {
            let got = reply.get("ID").map(Value::to_string).unwrap_or_else(|| "none".to_string());
            return Err(CorelinkError::Protocol(format!(
                "id mismatch: expected {}, got {}",
                expected, got
            )));
        }
    }

    let status_code = document::status_code(reply);
    if status_code != 0 {
        return Err(CorelinkError::Broker {
            status_code,
            message: document::message(reply),
        });
    }
    Ok(())
}
