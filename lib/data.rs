// Data channel: framed datagrams on the broker-assigned port
//
// One receive worker decodes frames and routes payloads through the stream
// registry. With a dispatch queue configured, routing moves to a second
// worker behind a bounded channel and a full queue drops the newest frame.
use crate::config::Config;
use crate::error::Result;
use crate::registry::StreamRegistry;
use corelink_core::{encode_frame, DataFrame, StreamId, RECEIVER_PING_PAYLOAD};
use corelink_transport::DatagramTransport;
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Data-channel counters
///
/// `received` counts every datagram read from the socket, `malformed` those
/// that failed to decode, `dropped` frames discarded because the dispatch
/// queue was full, `dispatched` handler invocations and `sent` datagrams
/// handed to the socket.
#[derive(Debug, Default)]
pub struct DataStats {
    received: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
    sent: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataStatsSnapshot {
    pub received: u64,
    pub dispatched: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub sent: u64,
}

impl DataStats {
    pub fn snapshot(&self) -> DataStatsSnapshot {
        DataStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
        }
    }
}

// Where decoded frames go from the receive worker
enum Route {
    Inline(Arc<StreamRegistry>),
    Queued(Sender<DataFrame>),
}

pub struct DataChannel {
    transport: Arc<dyn DatagramTransport>,
    port: u16,
    stats: Arc<DataStats>,
    shutdown: Arc<AtomicBool>,
    receive_worker: Mutex<Option<JoinHandle<()>>>,
    dispatch_worker: Mutex<Option<JoinHandle<()>>>,
}

impl DataChannel {
    pub fn open(
        transport: Arc<dyn DatagramTransport>,
        port: u16,
        registry: Arc<StreamRegistry>,
        config: &Config,
    ) -> Result<Self> {
        let stats = Arc::new(DataStats::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut dispatch_worker = None;
        let route = if config.dispatch_queue > 0 {
            let (tx, rx) = bounded::<DataFrame>(config.dispatch_queue);
            let dispatch_registry = Arc::clone(&registry);
            let dispatch_stats = Arc::clone(&stats);
            dispatch_worker = Some(
                thread::Builder::new()
                    .name("corelink-data-dispatch".to_string())
                    .spawn(move || Self::dispatch_loop(rx, dispatch_registry, dispatch_stats))?,
            );
            Route::Queued(tx)
        } else {
            Route::Inline(registry)
        };

        let recv_transport = Arc::clone(&transport);
        let recv_stats = Arc::clone(&stats);
        let recv_shutdown = Arc::clone(&shutdown);
        let max_datagram = config.max_datagram;
        let backoff = config.poll_interval;
        let receive_worker = thread::Builder::new()
            .name("corelink-data-rx".to_string())
            .spawn(move || {
                Self::receive_loop(recv_transport, route, recv_stats, recv_shutdown, max_datagram, backoff)
            })?;

        debug!(port, queued = dispatch_worker.is_some(), "data channel open");
        Ok(DataChannel {
            transport,
            port,
            stats,
            shutdown,
            receive_worker: Mutex::new(Some(receive_worker)),
            dispatch_worker: Mutex::new(dispatch_worker),
        })
    }

    fn receive_loop(
        transport: Arc<dyn DatagramTransport>,
        route: Route,
        stats: Arc<DataStats>,
        shutdown: Arc<AtomicBool>,
        max_datagram: usize,
        backoff: Duration,
    ) {
        let mut buf = vec![0u8; max_datagram];
        while !shutdown.load(Ordering::Acquire) {
            let n = match transport.receive_datagram(&mut buf) {
                Ok(Some(n)) => n,
                Ok(None) => continue,
                Err(e) => {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    warn!(error = %e, "data receive failed");
                    thread::sleep(backoff);
                    continue;
                }
            };

            match &route {
                Route::Inline(registry) => {
                    handle_datagram(registry, &stats, &buf[..n]);
                }
                Route::Queued(tx) => {
                    let Some(frame) = decode_datagram(&stats, &buf[..n]) else {
                        continue;
                    };
                    match tx.try_send(frame) {
                        Ok(()) => {}
                        Err(TrySendError::Full(frame)) => {
                            stats.dropped.fetch_add(1, Ordering::Relaxed);
                            trace!(stream_id = frame.stream_id, "dispatch queue full, frame dropped");
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
            }
        }
        debug!("data receive worker exiting");
    }

    fn dispatch_loop(frames: Receiver<DataFrame>, registry: Arc<StreamRegistry>, stats: Arc<DataStats>) {
        for frame in frames.iter() {
            let n = registry.dispatch(frame.stream_id, &frame.header, &frame.payload);
            stats.dispatched.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn stats(&self) -> DataStatsSnapshot {
        self.stats.snapshot()
    }

    /// Encode and transmit one frame. Not retried.
    pub fn send(&self, stream_id: StreamId, header: &[u8], payload: &[u8]) -> Result<()> {
        let bytes = encode_frame(stream_id, header, payload)?;
        self.transport.send_datagram(&bytes)?;
        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Register this socket's source address for a receiver stream
    pub fn receiver_ping(&self, stream_id: StreamId) -> Result<()> {
        debug!(stream_id, "receiver ping");
        self.send(stream_id, &[], &RECEIVER_PING_PAYLOAD)
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop the workers and release the socket. Safe to call more than once.
    pub fn close(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.transport.disconnect() {
            warn!(error = %e, "data transport disconnect failed");
        }
        // the dispatch worker ends once the receive worker drops its sender
        let receive = self.receive_worker.lock().take();
        let dispatch = self.dispatch_worker.lock().take();
        for handle in [receive, dispatch].into_iter().flatten() {
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if handle.join().is_err() {
                error!("data worker panicked");
            }
        }
        debug!(port = self.port, "data channel closed");
    }
}

impl Drop for DataChannel {
    fn drop(&mut self) {
        self.close();
    }
}

// Decode one datagram; malformed and empty frames yield None
fn decode_datagram(stats: &DataStats, bytes: &[u8]) -> Option<DataFrame> {
    stats.received.fetch_add(1, Ordering::Relaxed);
    match DataFrame::from_bytes(bytes) {
        Ok(frame) if frame.is_empty_frame() => {
            trace!(stream_id = frame.stream_id, "empty frame discarded");
            None
        }
        Ok(frame) => Some(frame),
        Err(e) => {
            stats.malformed.fetch_add(1, Ordering::Relaxed);
            debug!(error = %e, len = bytes.len(), "malformed datagram dropped");
            None
        }
    }
}

/// Decode one datagram and fan it out to the subscribed receivers. Returns
/// the number of handler invocations.
pub(crate) fn handle_datagram(registry: &StreamRegistry, stats: &DataStats, bytes: &[u8]) -> usize {
    let Some(frame) = decode_datagram(stats, bytes) else {
        return 0;
    };
    let n = registry.dispatch(frame.stream_id, &frame.header, &frame.payload);
    stats.dispatched.fetch_add(n as u64, Ordering::Relaxed);
    n
}
