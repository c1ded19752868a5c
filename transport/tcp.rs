// TCP control transport
//
// The broker writes JSON documents back to back without a delimiter, so the
// reader keeps undecoded bytes and hands out one complete document at a time.
use crate::traits::{is_poll_timeout, ConnectionState, MessageTransport, StateCell, DEFAULT_POLL_INTERVAL};
use std::collections::VecDeque;
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

const READ_CHUNK_SIZE: usize = 65536;

struct TcpReader {
    stream: TcpStream,
    buffer: Vec<u8>,
    pending: Vec<u8>,
    ready: VecDeque<String>,
}

pub struct TcpTransport {
    address: String,
    poll_interval: Duration,
    writer: Mutex<Option<TcpStream>>,
    reader: Mutex<Option<TcpReader>>,
    state: StateCell,
}

impl TcpTransport {
    pub fn new(address: &str) -> Self {
        Self::with_poll_interval(address, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(address: &str, poll_interval: Duration) -> Self {
        TcpTransport {
            address: address.to_string(),
            poll_interval,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            state: StateCell::new(ConnectionState::Closed),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn open_stream(&self, timeout: Duration) -> Result<TcpStream> {
        let mut last_err = Error::new(ErrorKind::AddrNotAvailable, "address resolved to nothing");
        for addr in self.address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

impl MessageTransport for TcpTransport {
    fn connect(&self, timeout: Duration) -> Result<()> {
        self.state.set(ConnectionState::Connecting);
        let stream = match self.open_stream(timeout) {
            Ok(s) => s,
            Err(e) => {
                self.state.set(ConnectionState::Closed);
                return Err(e);
            }
        };
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.poll_interval))?;
        let read_half = stream.try_clone()?;

        *lock(&self.writer)? = Some(stream);
        *lock(&self.reader)? = Some(TcpReader {
            stream: read_half,
            buffer: vec![0u8; READ_CHUNK_SIZE],
            pending: Vec::new(),
            ready: VecDeque::new(),
        });
        self.state.set(ConnectionState::Open);
        debug!(address = %self.address, "tcp control connection open");
        Ok(())
    }

    fn send_message(&self, text: &str) -> Result<()> {
        let mut writer = lock(&self.writer)?;
        match writer.as_mut() {
            Some(stream) => stream.write_all(text.as_bytes()),
            None => Err(Error::new(ErrorKind::NotConnected, "Not connected")),
        }
    }

    fn receive_message(&self) -> Result<Option<String>> {
        let mut guard = lock(&self.reader)?;
        let reader = match guard.as_mut() {
            Some(r) => r,
            None => return Err(Error::new(ErrorKind::NotConnected, "Not connected")),
        };

        if let Some(doc) = reader.ready.pop_front() {
            return Ok(Some(doc));
        }

        match reader.stream.read(&mut reader.buffer) {
            Ok(0) => {
                self.state.set(ConnectionState::Closed);
                Err(Error::new(ErrorKind::UnexpectedEof, "control connection closed by peer"))
            }
            Ok(n) => {
                reader.pending.extend_from_slice(&reader.buffer[..n]);
                let docs = split_documents(&mut reader.pending);
                reader.ready.extend(docs);
                Ok(reader.ready.pop_front())
            }
            Err(e) if is_poll_timeout(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn disconnect(&self) -> Result<()> {
        self.state.set(ConnectionState::Closing);
        if let Some(stream) = lock(&self.writer)?.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.state.set(ConnectionState::Closed);
        Ok(())
    }
}

/// Drain every complete JSON document from the front of `pending`, leaving a
/// trailing partial document in place. Undecodable bytes are discarded.
pub fn split_documents(pending: &mut Vec<u8>) -> Vec<String> {
    let mut documents = Vec::new();
    let mut consumed = 0;
    {
        let mut stream = serde_json::Deserializer::from_slice(pending)
            .into_iter::<serde_json::Value>();
        loop {
            match stream.next() {
                Some(Ok(_)) => {
                    let end = stream.byte_offset();
                    let text = String::from_utf8_lossy(&pending[consumed..end]);
                    documents.push(text.trim().to_string());
                    consumed = end;
                }
                Some(Err(e)) if e.is_eof() => break,
                Some(Err(e)) => {
                    warn!(error = %e, dropped = pending.len() - consumed, "discarding undecodable control bytes");
                    consumed = pending.len();
                    break;
                }
                None => {
                    consumed = pending.len();
                    break;
                }
            }
        }
    }
    pending.drain(..consumed);
    documents
}

fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::new(ErrorKind::Other, "transport lock poisoned"))
}
