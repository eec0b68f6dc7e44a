use clap::Parser;
use client::bot::grid_layout;
use client::network::{Client, ClientConfig};
use log::info;
use shared::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,

    /// Display name
    #[arg(short, long, default_value = "Player")]
    name: String,

    /// Team number
    #[arg(short, long, default_value = "0")]
    team: i32,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Create a local grid of this many pieces and push any the relay lacks
    #[arg(short, long, default_value = "0")]
    pieces: u32,

    /// Let a bot drag pieces around
    #[arg(short, long)]
    bot: bool,

    /// Chat line (or /command) to send after joining
    #[arg(short, long)]
    command: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let config = ClientConfig {
        server_addr: args.server,
        name: args.name,
        team: args.team,
        fake_ping_ms: args.fake_ping,
        pieces: grid_layout(args.pieces),
        bot: args.bot,
        command: args.command,
    };

    let mut client = Client::new(config).await?;
    client.run().await?;

    Ok(())
}
