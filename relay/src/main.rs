use clap::Parser;
use log::info;
use relay::admin::Tunables;
use relay::network::Relay;
use relay::table::{seed_layout, Table};
use shared::{DEFAULT_PORT, HOUSEKEEPING_MS, SWEEP_MS};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Period of the outbound flush in milliseconds
    #[arg(long, default_value_t = HOUSEKEEPING_MS)]
    housekeeping_ms: u64,

    /// Period of the full-state sweep in milliseconds
    #[arg(long, default_value_t = SWEEP_MS)]
    sweep_ms: u64,

    /// Simulated delay before relayed batches go out, in milliseconds
    #[arg(short, long, default_value = "0")]
    latency_ms: u64,

    /// Maximum number of simultaneous connections
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Pieces in the startup layout; 0 waits for a participant's push
    #[arg(long, default_value = "0")]
    pieces: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut tunables = Tunables {
        latency_ms: args.latency_ms,
        ..Tunables::default()
    };
    tunables.set("housekeeping_ms", args.housekeeping_ms)?;
    tunables.set("sweep_ms", args.sweep_ms)?;

    let layout = seed_layout(args.pieces, &mut rand::thread_rng());
    info!("Starting relay with {} seeded pieces", layout.len());

    let address = format!("{}:{}", args.host, args.port);
    let mut relay = Relay::new(&address, tunables, args.max_clients, Table::with_layout(layout)).await?;

    tokio::select! {
        result = relay.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
