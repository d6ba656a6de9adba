//! VibeCheck CLI: the `connect` tunnel client plus a thin administrative
//! surface (`serve`, `doctor`) over the assessment engine. The REST API
//! surface that normally fronts this engine in production — routing,
//! pagination, request validation — lives outside this binary.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod connect;
mod doctor;
mod serve;

#[derive(Parser)]
#[command(name = "vibecheck", version, about = "VibeCheck tunnel client and administrative CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the tunnel to a server and forward its requests to a local port.
    Connect {
        /// Local port to forward HTTP requests to.
        port: u16,
        /// Tunnel server WebSocket URL.
        #[arg(long, default_value = "ws://127.0.0.1:8080/tunnel")]
        server: String,
    },
    /// Run a single assessment end-to-end in-process and print the result.
    Serve(serve::ServeArgs),
    /// Report which environment configuration is currently present.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Connect { port, server } => connect::run(port, &server).await,
        Commands::Serve(args) => serve::run(args).await,
        Commands::Doctor => doctor::run(),
    }
}
