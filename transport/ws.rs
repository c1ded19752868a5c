// WebSocket control transport
//
// Plain ws:// only; TLS termination is left to the deployment. The socket is
// shared behind a mutex. The reader holds it for one short read slice at a
// time and hands it over fairly, so a queued send waits at most one slice.
use crate::traits::{is_poll_timeout, ConnectionState, MessageTransport, StateCell, DEFAULT_POLL_INTERVAL};
use parking_lot::{Mutex, MutexGuard};
use std::io::{Error, ErrorKind, Result};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::debug;
use tungstenite::client::IntoClientRequest;
use tungstenite::{Message, WebSocket};

/// Longest single blocking read while the socket lock is held
const READ_SLICE: Duration = Duration::from_millis(5);

pub struct WebSocketTransport {
    url: String,
    poll_interval: Duration,
    socket: Mutex<Option<WebSocket<TcpStream>>>,
    state: StateCell,
}

impl WebSocketTransport {
    pub fn new(url: &str) -> Self {
        Self::with_poll_interval(url, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(url: &str, poll_interval: Duration) -> Self {
        WebSocketTransport {
            url: url.to_string(),
            poll_interval,
            socket: Mutex::new(None),
            state: StateCell::new(ConnectionState::Closed),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn handshake(&self, timeout: Duration) -> Result<WebSocket<TcpStream>> {
        let request = self.url.as_str().into_client_request().map_err(ws_to_io)?;
        let uri = request.uri();
        if uri.scheme_str() != Some("ws") {
            return Err(Error::new(
                ErrorKind::Unsupported,
                format!("unsupported websocket url {}, expected ws://", self.url),
            ));
        }
        let host = uri
            .host()
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "websocket url has no host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(80);

        let addr = (host.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::new(ErrorKind::AddrNotAvailable, "address resolved to nothing"))?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let (socket, _response) = tungstenite::client(request, stream)
            .map_err(|e| Error::new(ErrorKind::ConnectionRefused, e.to_string()))?;
        socket.get_ref().set_read_timeout(Some(self.read_slice()))?;
        Ok(socket)
    }

    fn read_slice(&self) -> Duration {
        self.poll_interval.min(READ_SLICE)
    }
}

impl MessageTransport for WebSocketTransport {
    fn connect(&self, timeout: Duration) -> Result<()> {
        self.state.set(ConnectionState::Connecting);
        match self.handshake(timeout) {
            Ok(socket) => {
                *self.socket.lock() = Some(socket);
                self.state.set(ConnectionState::Open);
                debug!(url = %self.url, "websocket control connection open");
                Ok(())
            }
            Err(e) => {
                self.state.set(ConnectionState::Closed);
                Err(e)
            }
        }
    }

    fn send_message(&self, text: &str) -> Result<()> {
        let mut guard = self.socket.lock();
        match guard.as_mut() {
            Some(socket) => socket.send(Message::text(text.to_owned())).map_err(ws_to_io),
            None => Err(Error::new(ErrorKind::NotConnected, "Not connected")),
        }
    }

    fn receive_message(&self) -> Result<Option<String>> {
        let started = Instant::now();
        loop {
            let mut guard = self.socket.lock();
            let result = match guard.as_mut() {
                Some(socket) => socket.read(),
                None => return Err(Error::new(ErrorKind::NotConnected, "Not connected")),
            };
            MutexGuard::unlock_fair(guard);

            match result {
                Err(tungstenite::Error::Io(e)) if is_poll_timeout(&e) => {
                    if started.elapsed() >= self.poll_interval {
                        return Ok(None);
                    }
                }
                other => return self.classify(other),
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn disconnect(&self) -> Result<()> {
        self.state.set(ConnectionState::Closing);
        if let Some(mut socket) = self.socket.lock().take() {
            let _ = socket.close(None);
            let _ = socket.flush();
        }
        self.state.set(ConnectionState::Closed);
        Ok(())
    }
}

impl WebSocketTransport {
    fn classify(&self, read: tungstenite::Result<Message>) -> Result<Option<String>> {
        match read {
            Ok(msg @ Message::Text(_)) | Ok(msg @ Message::Binary(_)) => {
                let text = msg.to_text().map_err(ws_to_io)?;
                Ok(Some(text.to_string()))
            }
            Ok(Message::Close(_)) => {
                self.state.set(ConnectionState::Closed);
                Err(Error::new(ErrorKind::ConnectionAborted, "broker closed the websocket"))
            }
            // ping/pong and raw frames carry no protocol message
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(e)) if is_poll_timeout(&e) => Ok(None),
            Err(e @ tungstenite::Error::ConnectionClosed) | Err(e @ tungstenite::Error::AlreadyClosed) => {
                self.state.set(ConnectionState::Closed);
                Err(ws_to_io(e))
            }
            Err(e) => Err(ws_to_io(e)),
        }
    }
}

fn ws_to_io(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Io(e) => e,
        other => Error::new(ErrorKind::Other, other.to_string()),
    }
}
