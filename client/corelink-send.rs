// corelink-send: publish a counter pulsing between 1 and 10
use clap::Parser;
use corelink::{SenderParams, Session, TransportProtocol};
use corelink_client::{init_tracing, ConnectArgs, Pulse};
use serde_json::json;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "corelink-send", about = "Send a pulsing counter on a corelink stream")]
struct Cli {
    #[command(flatten)]
    connect: ConnectArgs,

    #[arg(short, long, default_value = "Holodeck")]
    workspace: String,

    #[arg(short = 't', long = "type", default_value = "distance")]
    stream_type: String,

    #[arg(long, default_value = "udp")]
    protocol: TransportProtocol,

    /// Milliseconds between messages
    #[arg(short, long, default_value_t = 1000)]
    interval: u64,

    /// Number of messages to send; runs forever when absent
    #[arg(short, long)]
    count: Option<usize>,
}

fn run(cli: Cli) -> corelink::Result<()> {
    let mut session = Session::connect(cli.connect.config())?;
    session.login(&cli.connect.credentials())?;

    let params = SenderParams::new(&cli.workspace, &cli.stream_type)
        .protocol(cli.protocol)
        .metadata(json!({"name": "Random Data"}));
    let stream_id = session.create_sender(params)?;
    info!(stream_id, "sending");

    let pulse: Box<dyn Iterator<Item = i32>> = match cli.count {
        Some(n) => Box::new(Pulse::default().take(n)),
        None => Box::new(Pulse::default()),
    };
    for value in pulse {
        // data channel errors are per datagram; keep going
        if let Err(e) = session.send(stream_id, &[], value.to_string().as_bytes()) {
            warn!(stream_id, error = %e, "send failed");
        }
        info!(value, "sent");
        thread::sleep(Duration::from_millis(cli.interval));
    }

    session.exit()?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.connect.debug);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "corelink-send failed");
            ExitCode::FAILURE
        }
    }
}
