// Core types shared by the transport and client crates
use std::fmt;
use std::str::FromStr;

/// Broker-assigned stream identifier; 0 means unassigned
pub type StreamId = u32;

// Transport a stream negotiates with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportProtocol {
    #[default]
    Udp,
    Tcp,
    Ws,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Udp => "udp",
            TransportProtocol::Tcp => "tcp",
            TransportProtocol::Ws => "ws",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(TransportProtocol::Udp),
            "tcp" => Ok(TransportProtocol::Tcp),
            "ws" | "wss" => Ok(TransportProtocol::Ws),
            other => Err(format!("unknown transport protocol: {}", other)),
        }
    }
}

// Unsolicited control-channel messages, told apart from replies by the
// top-level "function" key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushKind {
    Subscriber,
    Update,
    Stale,
    Dropped,
}

impl PushKind {
    pub fn from_function(name: &str) -> Option<Self> {
        match name {
            "subscriber" => Some(PushKind::Subscriber),
            "update" => Some(PushKind::Update),
            "stale" => Some(PushKind::Stale),
            "dropped" => Some(PushKind::Dropped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PushKind::Subscriber => "subscriber",
            PushKind::Update => "update",
            PushKind::Stale => "stale",
            PushKind::Dropped => "dropped",
        }
    }
}

impl fmt::Display for PushKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects streams by workspace, type and id for listing and disconnecting.
/// Empty lists match everything the broker lets this session see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFilter {
    pub workspaces: Vec<String>,
    pub types: Vec<String>,
    pub stream_ids: Vec<StreamId>,
}

impl StreamFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workspace(mut self, workspace: &str) -> Self {
        self.workspaces.push(workspace.to_string());
        self
    }

    pub fn stream_type(mut self, stream_type: &str) -> Self {
        self.types.push(stream_type.to_string());
        self
    }

    pub fn stream_ids(mut self, ids: &[StreamId]) -> Self {
        self.stream_ids.extend_from_slice(ids);
        self
    }
}
