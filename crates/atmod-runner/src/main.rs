//! `atmod`: serve an AT modem engine on a TCP serial port.

use std::net::SocketAddr;
use std::path::PathBuf;

use atmod_runner::{spawn_session, EngineFactory, RunnerProfile, RunnerResult, SerialPort};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "atmod", version, about = "AT command modem on a TCP serial port")]
struct Args {
    /// TCP port acting as the serial line.
    #[arg(short, long, default_value_t = 3333)]
    port: u16,

    /// Address to bind the serial port on.
    #[arg(long, default_value = "127.0.0.1")]
    bind: std::net::IpAddr,

    /// File holding the persistent settings block.
    #[arg(short, long, default_value = "atmod-settings.bin")]
    settings: PathBuf,

    /// YAML profile for the simulated radio and engine options.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> RunnerResult<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let profile = match &args.config {
        Some(path) => RunnerProfile::load(path)?,
        None => RunnerProfile::default(),
    };
    profile.validate()?;
    atmod_engine::telemetry::describe_metrics();

    let runtime = tokio::runtime::Runtime::new()?;
    let addr = SocketAddr::new(args.bind, args.port);
    let port = runtime.block_on(SerialPort::bind(addr))?;
    info!(addr = %port.local_addr(), settings = %args.settings.display(), "atmod started");

    let factory = EngineFactory {
        profile,
        settings_path: args.settings,
    };
    let session = spawn_session(factory, port)?;

    let commands = session.commands();
    ctrlc::set_handler(move || {
        let _ = commands.send(atmod_runner::SessionCommand::Shutdown);
    })?;

    let restarts = session.join()?;
    info!(restarts, "atmod stopped");
    runtime.shutdown_background();
    Ok(())
}
