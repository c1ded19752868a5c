// Transport abstraction - allows pluggable communication backends
//
// Methods take &self so one worker can block in receive while another sends;
// implementations synchronize internally.
use std::io::Result;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// Read timeout used by blocking receive calls so worker loops can observe
/// shutdown between reads
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(val: u8) -> Self {
        match val {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Lock-free holder for a connection's lifecycle state
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ConnectionState) -> Self {
        StateCell(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

// Reliable, ordered, message-oriented channel (control channel)
pub trait MessageTransport: Send + Sync {
    /// Establish the connection, giving up once `timeout` has elapsed
    fn connect(&self, timeout: Duration) -> Result<()>;
    fn send_message(&self, text: &str) -> Result<()>;
    /// Next complete message, or Ok(None) when nothing arrived within the
    /// poll interval
    fn receive_message(&self) -> Result<Option<String>>;
    fn state(&self) -> ConnectionState;
    fn disconnect(&self) -> Result<()>;
}

// Best-effort, connectionless channel (data channel)
pub trait DatagramTransport: Send + Sync {
    fn send_datagram(&self, data: &[u8]) -> Result<usize>;
    /// Length of the datagram written to `buf`, or Ok(None) on poll timeout
    fn receive_datagram(&self, buf: &mut [u8]) -> Result<Option<usize>>;
    fn disconnect(&self) -> Result<()>;
}

pub(crate) fn is_poll_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
