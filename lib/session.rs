// Session engine: authentication, stream negotiation and broker calls
//
// Unauthenticated -> Authenticated -> Closed. Every broker call blocks the
// caller until its reply arrives; methods that talk to the broker take
// &mut self so only one call can be in flight per session.
use crate::callbacks::{ControlCallbacks, LogCallbacks};
use crate::config::{Config, ControlProtocol, Credentials};
use crate::control::ControlChannel;
use crate::data::{DataChannel, DataStatsSnapshot};
use crate::document::{self, Request};
use crate::error::{CorelinkError, Result};
use crate::registry::{ReceiverHandler, ReceiverStream, SenderStream, StreamRegistry};
use crate::stream::{ReceiverParams, SenderParams};
use corelink_core::{StreamFilter, StreamId, TransportProtocol};
use corelink_transport::{
    DatagramTransport, MessageTransport, TcpTransport, UdpTransport, WebSocketTransport,
};
use serde_json::{Map, Value};
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds the datagram transport once the broker hands out a data port
pub type DataTransportFactory =
    Box<dyn Fn(&str, u16) -> io::Result<Arc<dyn DatagramTransport>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

pub struct Session {
    config: Config,
    control: ControlChannel,
    data: Option<DataChannel>,
    data_factory: DataTransportFactory,
    registry: Arc<StreamRegistry>,
    state: SessionState,
    token: String,
    my_ip: String,
    next_request_id: u32,
    receiver_id: StreamId,
}

impl Session {
    /// Open the control channel selected by `config` with logging callbacks
    pub fn connect(config: Config) -> Result<Self> {
        Self::connect_with_callbacks(config, Arc::new(LogCallbacks))
    }

    pub fn connect_with_callbacks(config: Config, callbacks: Arc<dyn ControlCallbacks>) -> Result<Self> {
        let transport: Arc<dyn MessageTransport> = match config.control_protocol {
            ControlProtocol::WebSocket => Arc::new(WebSocketTransport::with_poll_interval(
                &config.control_url(),
                config.poll_interval,
            )),
            ControlProtocol::Tcp => Arc::new(TcpTransport::with_poll_interval(
                &config.control_url(),
                config.poll_interval,
            )),
        };
        let poll_interval = config.poll_interval;
        let factory: DataTransportFactory = Box::new(move |host, port| {
            let udp = UdpTransport::connect_with_poll_interval(host, port, poll_interval)?;
            Ok(Arc::new(udp) as Arc<dyn DatagramTransport>)
        });
        Self::with_transports(config, transport, callbacks, factory)
    }

    /// Build a session over caller-supplied transports
    pub fn with_transports(
        config: Config,
        transport: Arc<dyn MessageTransport>,
        callbacks: Arc<dyn ControlCallbacks>,
        data_factory: DataTransportFactory,
    ) -> Result<Self> {
        let endpoint = config.control_url();
        let control = ControlChannel::open(transport, callbacks, &config, &endpoint)?;
        info!(%endpoint, protocol = %config.control_protocol, "connected to broker");
        Ok(Session {
            config,
            control,
            data: None,
            data_factory,
            registry: Arc::new(StreamRegistry::new()),
            state: SessionState::Unauthenticated,
            token: String::new(),
            my_ip: String::new(),
            next_request_id: 0,
            receiver_id: 0,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Public address the broker sees for this client
    pub fn public_ip(&self) -> &str {
        &self.my_ip
    }

    pub fn receiver_id(&self) -> Option<StreamId> {
        (self.receiver_id != 0).then_some(self.receiver_id)
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn data_stats(&self) -> Option<DataStatsSnapshot> {
        self.data.as_ref().map(DataChannel::stats)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    fn require_authenticated(&self) -> Result<()> {
        match self.state {
            SessionState::Authenticated => Ok(()),
            SessionState::Unauthenticated => {
                Err(CorelinkError::Precondition("not logged in".to_string()))
            }
            SessionState::Closed => Err(CorelinkError::Precondition("session is closed".to_string())),
        }
    }

    // Stamp token and id on an authenticated request and wait for its reply
    fn request(&mut self, request: Request) -> Result<Value> {
        self.require_authenticated()?;
        let id = self.next_id();
        let request = request.set("token", self.token.as_str()).set("ID", id);
        self.control.send_and_await_reply(request)
    }

    /// Exchange credentials for a session token. A rejected login closes the
    /// session.
    pub fn login(&mut self, credentials: &Credentials) -> Result<&str> {
        if self.state != SessionState::Unauthenticated {
            return Err(CorelinkError::Precondition(format!(
                "login not allowed in state {:?}",
                self.state
            )));
        }
        let id = self.next_id();
        let request = Request::new("auth")
            .set("username", credentials.username.as_str())
            .set("password", credentials.password.as_str())
            .set("ID", id);

        let reply = match self.control.send_and_await_reply(request) {
            Ok(reply) => reply,
            Err(CorelinkError::Broker { status_code, message }) => {
                warn!(status_code, %message, username = %credentials.username, "login rejected");
                self.shutdown();
                return Err(CorelinkError::Auth { status_code, message });
            }
            Err(e) => return Err(e),
        };

        let token = document::field_str(&reply, "token")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CorelinkError::Protocol("auth reply has no token".to_string()))?;
        let ip = document::field_str(&reply, "IP")
            .ok_or_else(|| CorelinkError::Protocol("auth reply has no IP".to_string()))?;

        self.token = token.to_string();
        self.my_ip = canonical_ip(ip);
        self.state = SessionState::Authenticated;
        info!(username = %credentials.username, ip = %self.my_ip, "logged in");
        Ok(&self.token)
    }

    /// Create (or update, with `sender_id`) a sender stream
    pub fn create_sender(&mut self, params: SenderParams) -> Result<StreamId> {
        let request = params
            .to_request()
            .set("IP", self.my_ip.as_str())
            .set("port", 0);
        let reply = self.request(request)?;

        let stream_id = reply_stream_id(&reply)?;
        let port = reply_port(&reply);
        let protocol = reply_protocol(&reply).unwrap_or(params.protocol);
        self.registry.add_sender(SenderStream {
            params,
            stream_id,
            port,
            mtu: document::field_u32(&reply, "MTU"),
        });
        info!(stream_id, %protocol, ?port, "sender created");

        if protocol == TransportProtocol::Udp {
            self.ensure_data_channel(port)?;
        }
        Ok(stream_id)
    }

    /// Create this session's receiver, or update it on later calls. Returns
    /// the sender streams the broker subscribed it to.
    pub fn create_receiver<H>(&mut self, params: ReceiverParams, handler: H) -> Result<Vec<StreamId>>
    where
        H: ReceiverHandler + 'static,
    {
        let request = params
            .to_request(self.receiver_id())
            .set("IP", self.my_ip.as_str())
            .set("port", 0);
        let reply = self.request(request)?;

        let stream_id = reply_stream_id(&reply)?;
        let stream_list = document::stream_list(&reply, "streamList")?;
        let port = reply_port(&reply);
        let protocol = reply_protocol(&reply).unwrap_or(params.protocol);

        self.receiver_id = stream_id;
        self.registry.allow(&stream_list);
        self.registry.add_receiver(ReceiverStream::new(
            params,
            stream_id,
            port,
            stream_list.iter().copied().collect(),
            Arc::new(handler),
        ));
        info!(stream_id, %protocol, ?port, streams = ?stream_list, "receiver created");

        if protocol == TransportProtocol::Udp {
            self.ensure_data_channel(port)?;
            if let Some(data) = &self.data {
                if let Err(e) = data.receiver_ping(stream_id) {
                    warn!(stream_id, error = %e, "receiver ping failed");
                }
            }
        }
        Ok(stream_list)
    }

    // The first udp stream of either direction opens the shared data channel
    fn ensure_data_channel(&mut self, port: Option<u16>) -> Result<()> {
        let port = port.ok_or_else(|| CorelinkError::Protocol("udp stream reply has no port".to_string()))?;
        if let Some(data) = &self.data {
            if data.port() != port {
                warn!(open = data.port(), offered = port, "broker offered a second data port, keeping the first");
            }
            return Ok(());
        }
        let host = self.config.resolved_data_host().to_string();
        let transport = (self.data_factory)(&host, port)?;
        self.data = Some(DataChannel::open(
            transport,
            port,
            Arc::clone(&self.registry),
            &self.config,
        )?);
        info!(%host, port, "data channel started");
        Ok(())
    }

    /// Subscribe the session receiver to more sender streams
    pub fn subscribe(&mut self, stream_ids: &[StreamId]) -> Result<Vec<StreamId>> {
        let receiver_id = self.require_receiver()?;
        let request = Request::new("subscribe")
            .set("receiverID", receiver_id)
            .set("streamID", stream_ids.to_vec());
        let reply = self.request(request)?;

        let confirmed = document::stream_list(&reply, "streamList")?;
        self.registry.allow(&confirmed);
        self.registry.subscribe_receiver(receiver_id, &confirmed);
        debug!(receiver_id, streams = ?confirmed, "subscribed");
        Ok(confirmed)
    }

    pub fn unsubscribe(&mut self, stream_ids: &[StreamId]) -> Result<Vec<StreamId>> {
        let receiver_id = self.require_receiver()?;
        let request = Request::new("unsubscribe")
            .set("receiverID", receiver_id)
            .set("streamIDs", stream_ids.to_vec());
        let reply = self.request(request)?;

        let confirmed = document::stream_list(&reply, "streamList")?;
        self.registry.revoke(&confirmed);
        debug!(receiver_id, streams = ?confirmed, "unsubscribed");
        Ok(confirmed)
    }

    fn require_receiver(&self) -> Result<StreamId> {
        self.require_authenticated()?;
        self.receiver_id()
            .ok_or_else(|| CorelinkError::Precondition("no receiver created yet".to_string()))
    }

    /// Disconnect streams matching `filter`, or every stream this session
    /// created. The session receiver is always included.
    pub fn disconnect(&mut self, filter: Option<StreamFilter>) -> Result<Vec<StreamId>> {
        let filter =
            filter.unwrap_or_else(|| StreamFilter::new().stream_ids(&self.registry.sender_ids()));
        let mut stream_ids = filter.stream_ids;
        if self.receiver_id != 0 && !stream_ids.contains(&self.receiver_id) {
            stream_ids.push(self.receiver_id);
        }
        let request = Request::new("disconnect")
            .set("workspaces", filter.workspaces)
            .set("types", filter.types)
            .set("streamIDs", stream_ids);
        let reply = self.request(request)?;

        let disconnected = document::stream_list(&reply, "streamList")?;
        info!(streams = ?disconnected, "disconnected");
        Ok(disconnected)
    }

    /// Disconnect everything, then close the control channel, then the data
    /// channel. Calling it again is a no-op.
    pub fn exit(&mut self) -> Result<Vec<StreamId>> {
        if self.state == SessionState::Closed {
            return Ok(Vec::new());
        }
        let result = if self.state == SessionState::Authenticated {
            self.disconnect(None)
        } else {
            Ok(Vec::new())
        };
        if let Err(e) = &result {
            warn!(error = %e, "disconnect before exit failed");
        }
        self.shutdown();
        result
    }

    fn shutdown(&mut self) {
        self.control.close();
        if let Some(data) = self.data.take() {
            data.close();
        }
        self.state = SessionState::Closed;
        info!("session closed");
    }

    /// Send one frame on the data channel
    pub fn send(&self, stream_id: StreamId, header: &[u8], payload: &[u8]) -> Result<()> {
        self.require_authenticated()?;
        match &self.data {
            Some(data) => data.send(stream_id, header, payload),
            None => Err(CorelinkError::Precondition(
                "no data channel; create a udp stream first".to_string(),
            )),
        }
    }

    /// Issue any broker function and return the raw reply
    pub fn call(&mut self, function: &str, fields: Map<String, Value>) -> Result<Value> {
        self.request(Request::new(function).extend(fields))
    }

    pub fn add_workspace(&mut self, workspace: &str) -> Result<()> {
        self.request(Request::new("addWorkspace").set("workspace", workspace))
            .map(|_| ())
    }

    pub fn rm_workspace(&mut self, workspace: &str) -> Result<()> {
        self.request(Request::new("rmWorkspace").set("workspace", workspace))
            .map(|_| ())
    }

    pub fn set_default_workspace(&mut self, workspace: &str) -> Result<()> {
        self.request(Request::new("setDefaultWorkspace").set("workspace", workspace))
            .map(|_| ())
    }

    pub fn get_default_workspace(&mut self) -> Result<String> {
        let reply = self.request(Request::new("getDefaultWorkspace"))?;
        required_str(&reply, "workspace")
    }

    pub fn list_workspaces(&mut self) -> Result<Vec<String>> {
        let reply = self.request(Request::new("listWorkspaces"))?;
        Ok(document::string_list(&reply, "workspaceList"))
    }

    pub fn list_functions(&mut self) -> Result<Vec<String>> {
        let reply = self.request(Request::new("listFunctions"))?;
        Ok(document::string_list(&reply, "functionList"))
    }

    pub fn list_server_functions(&mut self) -> Result<Vec<String>> {
        let reply = self.request(Request::new("listServerFunctions"))?;
        Ok(document::string_list(&reply, "functionList"))
    }

    pub fn describe_function(&mut self, function: &str) -> Result<String> {
        let reply = self.request(Request::new("describeFunction").set("functionName", function))?;
        required_str(&reply, "description")
    }

    pub fn describe_server_function(&mut self, function: &str) -> Result<String> {
        let reply =
            self.request(Request::new("describeServerFunction").set("functionName", function))?;
        required_str(&reply, "description")
    }

    pub fn list_users(&mut self) -> Result<Vec<String>> {
        let reply = self.request(Request::new("listUsers"))?;
        Ok(document::string_list(&reply, "userList"))
    }

    /// Sender streams visible to this session, as the broker describes them
    pub fn list_streams(&mut self, filter: &StreamFilter) -> Result<Vec<Value>> {
        let request = Request::new("listStreams")
            .set("workspaces", filter.workspaces.clone())
            .set("types", filter.types.clone());
        let reply = self.request(request)?;
        Ok(reply
            .get("senderList")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub fn stream_info(&mut self, stream_id: StreamId) -> Result<Value> {
        self.request(Request::new("streamInfo").set("streamID", stream_id))
    }
}

fn reply_stream_id(reply: &Value) -> Result<StreamId> {
    document::field_u32(reply, "streamID")
        .filter(|id| *id != 0)
        .ok_or_else(|| CorelinkError::Protocol(format!("reply has no valid streamID: {}", reply)))
}

fn reply_port(reply: &Value) -> Option<u16> {
    document::field_u32(reply, "port").and_then(|p| u16::try_from(p).ok())
}

fn reply_protocol(reply: &Value) -> Option<TransportProtocol> {
    document::field_str(reply, "proto").and_then(|p| p.parse().ok())
}

fn required_str(reply: &Value, key: &str) -> Result<String> {
    document::field_str(reply, key)
        .map(str::to_string)
        .ok_or_else(|| CorelinkError::Protocol(format!("reply has no {}", key)))
}

// IPv4-mapped IPv6 addresses are reported in dotted form
fn canonical_ip(ip: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(addr) => addr.to_canonical().to_string(),
        Err(_) => ip.to_string(),
    }
}
