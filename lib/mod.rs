// lib: Corelink protocol client
// Control channel request/reply with push callbacks, framed UDP data channel,
// stream registry and the session engine tying them together

// Re-export core protocol and types
pub use corelink_core::*;

// Re-export transport abstractions
pub use corelink_transport::*;

pub mod callbacks;
pub mod config;
pub mod control;
pub mod data;
pub mod document;
pub mod error;
pub mod registry;
pub mod session;
pub mod stream;

pub use callbacks::{ControlCallbacks, LogCallbacks};
pub use config::{Config, ControlProtocol, Credentials};
pub use data::{DataStats, DataStatsSnapshot};
pub use error::{CorelinkError, Result};
pub use registry::{ReceiverHandler, ReceiverStream, SenderStream, StreamRegistry};
pub use session::{DataTransportFactory, Session, SessionState};
pub use stream::{ReceiverParams, SenderParams};
