// client: helpers shared by the corelink command-line tools
use clap::Args;
use corelink::{Config, ControlProtocol, Credentials, StreamId};
use tracing_subscriber::EnvFilter;

/// Broker connection options common to every tool
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Broker host
    #[arg(short = 'a', long, env = "CORELINK_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Control channel port
    #[arg(short, long, env = "CORELINK_CONTROL_PORT", default_value_t = 20012)]
    pub port: u16,

    /// Control channel backend (ws or tcp)
    #[arg(long, env = "CORELINK_CONTROL_PROTOCOL", default_value = "ws")]
    pub control: ControlProtocol,

    #[arg(short, long, env = "CORELINK_USERNAME")]
    pub username: String,

    #[arg(long, env = "CORELINK_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Log full request and response documents
    #[arg(short, long)]
    pub debug: bool,
}

impl ConnectArgs {
    /// Environment defaults overridden by the command line
    pub fn config(&self) -> Config {
        let mut config = Config::from_env()
            .control_port(self.port)
            .control_protocol(self.control);
        config.control_host = self.host.clone();
        if self.debug {
            config.debug = true;
        }
        config
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password)
    }
}

/// Install a stderr subscriber. RUST_LOG wins over the debug flag.
pub fn init_tracing(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

pub fn format_message(stream_id: StreamId, header: &[u8], payload: &[u8]) -> String {
    let now = chrono::Local::now().format("%Y/%m/%d %H:%M:%S%.3f");
    let text = String::from_utf8_lossy(payload);
    if header.is_empty() {
        format!("{} stream {:<6} {}", now, stream_id, text)
    } else {
        format!(
            "{} stream {:<6} {} {}",
            now,
            stream_id,
            String::from_utf8_lossy(header),
            text
        )
    }
}

/// Counter bouncing between 1 and 10, one step per item
#[derive(Debug, Clone)]
pub struct Pulse {
    value: i32,
    direction: i32,
}

impl Default for Pulse {
    fn default() -> Self {
        Pulse { value: 1, direction: 1 }
    }
}

impl Iterator for Pulse {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        let out = self.value;
        self.value += self.direction;
        if self.value >= 10 || self.value <= 1 {
            self.direction = -self.direction;
        }
        Some(out)
    }
}
