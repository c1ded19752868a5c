// Error taxonomy for the protocol client
use corelink_core::FrameError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CorelinkError {
    /// The transport never reached the open state within the budget
    #[error("could not connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// No reply arrived within the budget; session state is unchanged
    #[error("no reply from broker within {0:?}")]
    Timeout(Duration),

    /// Malformed reply: id mismatch, unparsable stream id, missing field
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The broker rejected the request
    #[error("broker error (statusCode {status_code}): {message}")]
    Broker { status_code: i64, message: String },

    /// Login was rejected
    #[error("authentication failed (statusCode {status_code}): {message}")]
    Auth { status_code: i64, message: String },

    /// Operation issued in a session state that does not allow it
    #[error("{0}")]
    Precondition(String),

    #[error("malformed datagram: {0}")]
    Framing(#[from] FrameError),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, CorelinkError>;
