use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use janus_server::JanusServer;

#[derive(Debug, Parser)]
#[command(name = "janus-server", about = "Multi-broker order-execution server")]
struct Args {
    /// Configuration environment overlay (config/{env}.toml).
    #[arg(long)]
    env: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = janus_config::load_config(args.env.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut server = JanusServer::build(config)?;
    server.run().await
}
