// Stream parameters for sender and receiver creation
use crate::document::Request;
use corelink_core::{StreamId, TransportProtocol};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct SenderParams {
    pub workspace: String,
    pub stream_type: String,
    pub protocol: TransportProtocol,
    pub metadata: Value,
    pub alert: bool,
    /// Existing sender stream to update instead of creating a new one
    pub sender_id: Option<StreamId>,
    pub from: Option<String>,
}

impl SenderParams {
    pub fn new(workspace: &str, stream_type: &str) -> Self {
        SenderParams {
            workspace: workspace.to_string(),
            stream_type: stream_type.to_string(),
            protocol: TransportProtocol::Udp,
            metadata: json!({}),
            alert: false,
            sender_id: None,
            from: None,
        }
    }

    pub fn protocol(mut self, protocol: TransportProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn alert(mut self, alert: bool) -> Self {
        self.alert = alert;
        self
    }

    pub fn sender_id(mut self, id: StreamId) -> Self {
        self.sender_id = Some(id);
        self
    }

    pub fn from(mut self, from: &str) -> Self {
        self.from = Some(from.to_string());
        self
    }

    pub(crate) fn to_request(&self) -> Request {
        let mut req = Request::new("sender")
            .set("workspace", self.workspace.as_str())
            .set("proto", self.protocol.as_str())
            .set("type", self.stream_type.as_str())
            .set("alert", self.alert)
            .set("meta", self.metadata.clone());
        if let Some(id) = self.sender_id {
            req = req.set("senderID", id);
        }
        if let Some(ref from) = self.from {
            req = req.set("from", from.as_str());
        }
        req
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverParams {
    pub workspace: String,
    pub types: Vec<String>,
    pub protocol: TransportProtocol,
    pub metadata: Value,
    pub alert: bool,
    /// Also receive streams this session sends
    pub echo: bool,
    /// Sender streams to subscribe to right away
    pub stream_ids: Vec<StreamId>,
}

impl ReceiverParams {
    pub fn new(workspace: &str, types: &[&str]) -> Self {
        ReceiverParams {
            workspace: workspace.to_string(),
            types: types.iter().map(|t| t.to_string()).collect(),
            protocol: TransportProtocol::Udp,
            metadata: json!({}),
            alert: false,
            echo: false,
            stream_ids: Vec::new(),
        }
    }

    pub fn protocol(mut self, protocol: TransportProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn alert(mut self, alert: bool) -> Self {
        self.alert = alert;
        self
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn stream_ids(mut self, ids: &[StreamId]) -> Self {
        self.stream_ids = ids.to_vec();
        self
    }

    pub(crate) fn to_request(&self, receiver_id: Option<StreamId>) -> Request {
        let mut req = Request::new("receiver")
            .set("workspace", self.workspace.as_str())
            .set("proto", self.protocol.as_str())
            .set("type", self.types.clone())
            .set("alert", self.alert)
            .set("echo", self.echo)
            .set("meta", self.metadata.clone());
        if let Some(id) = receiver_id {
            req = req.set("receiverid", id);
        }
        if !self.stream_ids.is_empty() {
            req = req.set("streamIDs", self.stream_ids.clone());
        }
        req
    }
}
