//! Host/product demo over WebSocket.
//!
//! Run the host, then a product against it:
//!   cargo run -p hostlink-demo-echo -- host --port 9300
//!   cargo run -p hostlink-demo-echo -- product --url ws://127.0.0.1:9300 hello world

mod host;
mod product;
mod protocol;

use clap::{Parser, Subcommand};
use hostlink_core::TransportConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostlink-echo")]
#[command(about = "Echo and ticks over a hostlink transport", long_about = None)]
struct Args {
    /// Transport settings (TOML)
    #[arg(long, global = true, env = "HOSTLINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve echo and ticks
    Host {
        #[arg(short, long, default_value = "9300")]
        port: u16,
    },
    /// Call echo for each message, then stream ticks
    Product {
        #[arg(long, default_value = "ws://127.0.0.1:9300")]
        url: String,
        #[arg(long)]
        shout: bool,
        #[arg(long, default_value = "5")]
        ticks: u32,
        messages: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("hostlink_demo_echo=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => TransportConfig::load(path)?,
        None => TransportConfig::default(),
    };

    match args.command {
        Command::Host { port } => {
            let addr: SocketAddr = ([127, 0, 0, 1], port).into();
            host::run(addr, config).await
        }
        Command::Product {
            url,
            shout,
            ticks,
            messages,
        } => product::run(&url, config, messages, shout, ticks).await,
    }
}
