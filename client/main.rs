// corelink-receive: subscribe to streams and print every message
use clap::Parser;
use corelink::{ReceiverParams, Session, StreamId, TransportProtocol};
use corelink_client::{format_message, init_tracing, ConnectArgs};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "corelink-receive", about = "Print messages from corelink streams")]
struct Cli {
    #[command(flatten)]
    connect: ConnectArgs,

    #[arg(short, long, default_value = "Holodeck")]
    workspace: String,

    /// Stream types to receive; repeat for several
    #[arg(short = 't', long = "type", default_value = "distance")]
    types: Vec<String>,

    /// Data transport for the receiver stream
    #[arg(long, default_value = "udp")]
    protocol: TransportProtocol,

    /// Also receive streams this client sends
    #[arg(long)]
    echo: bool,

    /// Stop after this many seconds instead of running forever
    #[arg(long)]
    duration: Option<u64>,
}

fn run(cli: Cli) -> corelink::Result<()> {
    let mut session = Session::connect(cli.connect.config())?;
    session.login(&cli.connect.credentials())?;

    let types: Vec<&str> = cli.types.iter().map(String::as_str).collect();
    let params = ReceiverParams::new(&cli.workspace, &types)
        .protocol(cli.protocol)
        .echo(cli.echo);
    let streams = session.create_receiver(params, |id: StreamId, header: &[u8], payload: &[u8]| {
        println!("{}", format_message(id, header, payload));
    })?;
    info!(receiver = ?session.receiver_id(), ?streams, "receiving");

    let deadline = cli.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    while deadline.map_or(true, |d| Instant::now() < d) {
        thread::sleep(Duration::from_millis(200));
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
            error!(error = %e, "corelink-receive failed");
            ExitCode::FAILURE
        }
    }
}
