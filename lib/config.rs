// Session configuration
//
// Environment variables (all optional):
// CORELINK_HOST: broker host name or address (default: 127.0.0.1)
// CORELINK_CONTROL_PORT: control channel port (default: 20012)
// CORELINK_CONTROL_PROTOCOL: ws or tcp (default: ws)
// CORELINK_DATA_HOST: data channel host when it differs from the control host
// CORELINK_TIMEOUT_ITERATIONS: number of poll intervals to wait (default: 100)
// CORELINK_POLL_MS: poll interval in milliseconds, at least 1 (default: 100)
// CORELINK_DEBUG: 1/true to log full control documents
// CORELINK_DISPATCH_QUEUE: bounded queue between data receive and dispatch (default: 0 = inline)
use std::env;
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_CONTROL_PORT: u16 = 20012;
pub const DEFAULT_TIMEOUT_ITERATIONS: u32 = 100;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_MAX_DATAGRAM: usize = 65536;
/// Socket read timeouts reject zero, so no poll interval goes below this
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Which backend carries the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlProtocol {
    #[default]
    WebSocket,
    Tcp,
}

impl FromStr for ControlProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ws" | "websocket" => Ok(ControlProtocol::WebSocket),
            "tcp" => Ok(ControlProtocol::Tcp),
            other => Err(format!("unknown control protocol: {}", other)),
        }
    }
}

impl fmt::Display for ControlProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ControlProtocol::WebSocket => write!(f, "ws"),
            ControlProtocol::Tcp => write!(f, "tcp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub control_host: String,
    pub control_port: u16,
    pub control_protocol: ControlProtocol,
    pub data_host: Option<String>,
    pub timeout_iterations: u32,
    pub poll_interval: Duration,
    pub debug: bool,
    pub max_datagram: usize,
    pub dispatch_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config::new(DEFAULT_HOST)
    }
}

impl Config {
    pub fn new(host: &str) -> Self {
        Config {
            control_host: host.to_string(),
            control_port: DEFAULT_CONTROL_PORT,
            control_protocol: ControlProtocol::default(),
            data_host: None,
            timeout_iterations: DEFAULT_TIMEOUT_ITERATIONS,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            debug: false,
            max_datagram: DEFAULT_MAX_DATAGRAM,
            dispatch_queue: 0,
        }
    }

    pub fn from_env() -> Self {
        let mut config = Config::new(
            &env::var("CORELINK_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
        );
        config.control_port = env_parse("CORELINK_CONTROL_PORT").unwrap_or(DEFAULT_CONTROL_PORT);
        config.control_protocol = env_parse("CORELINK_CONTROL_PROTOCOL").unwrap_or_default();
        config.data_host = env::var("CORELINK_DATA_HOST").ok().filter(|h| !h.is_empty());
        config.timeout_iterations =
            env_parse("CORELINK_TIMEOUT_ITERATIONS").unwrap_or(DEFAULT_TIMEOUT_ITERATIONS);
        config = config.poll_interval(Duration::from_millis(
            env_parse("CORELINK_POLL_MS").unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        ));
        config.debug = env::var("CORELINK_DEBUG")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        config.dispatch_queue = env_parse("CORELINK_DISPATCH_QUEUE").unwrap_or(0);
        config
    }

    pub fn control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    pub fn control_protocol(mut self, protocol: ControlProtocol) -> Self {
        self.control_protocol = protocol;
        self
    }

    pub fn data_host(mut self, host: &str) -> Self {
        self.data_host = Some(host.to_string());
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn timeout_iterations(mut self, iterations: u32) -> Self {
        self.timeout_iterations = iterations;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn dispatch_queue(mut self, capacity: usize) -> Self {
        self.dispatch_queue = capacity;
        self
    }

    /// Budget for every bounded wait: connection open, reply await
    pub fn timeout(&self) -> Duration {
        self.poll_interval
            .checked_mul(self.timeout_iterations)
            .unwrap_or(Duration::MAX)
    }

    pub fn control_url(&self) -> String {
        let host = if self.control_host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]", self.control_host)
        } else {
            self.control_host.clone()
        };
        match self.control_protocol {
            ControlProtocol::WebSocket => format!("ws://{}:{}", host, self.control_port),
            ControlProtocol::Tcp => format!("{}:{}", host, self.control_port),
        }
    }

    pub fn resolved_data_host(&self) -> &str {
        self.data_host.as_deref().unwrap_or(&self.control_host)
    }
}

/// Username and password exchanged for a session token by `login`
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
