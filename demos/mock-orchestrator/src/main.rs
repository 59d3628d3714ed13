//! Mock SwarmForge orchestrator.
//!
//! Speaks the envelope protocol well enough for local end-to-end runs of the
//! `swarmforge` CLI: it lists modes, plans, simulates task progress for mode
//! runs and asset generation, and honors `cancel_task`.
//!
//!   cargo run -p swarmforge-mock-orchestrator -- --port 8765
//!   cargo run -p swarmforge-cli -- generate --asset-type 3dmodel_blender --name Ship --params ship.json

mod server;

use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mock-orchestrator")]
struct Args {
    #[arg(long, env = "SWARMFORGE_PORT", default_value_t = swarmforge_core::DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("mock_orchestrator=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let addr: SocketAddr = ([127, 0, 0, 1], args.port).into();
    tracing::info!("Starting mock orchestrator on {}", addr);

    server::run(addr).await
}
