//! `swarmforge` command-line client.
//!
//!   swarmforge modes
//!   swarmforge plan "a medieval village" --system-prompt "be brief"
//!   swarmforge generate --asset-type 3dmodel_probuilder --name MyCube --params cube.json
//!   swarmforge watch

mod commands;
mod config;
mod context;

use clap::{Parser, Subcommand};
use config::Config;
use context::AppContext;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "swarmforge", version, about = "SwarmForge orchestrator client")]
struct Cli {
    /// Config file. Defaults to ./swarmforge.toml when present.
    #[arg(long, global = true, env = "SWARMFORGE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "SWARMFORGE_HOST")]
    host: Option<String>,

    /// Override the orchestrator port, e.g. after it bound a fallback.
    #[arg(long, global = true, env = "SWARMFORGE_PORT")]
    port: Option<u16>,

    /// Log filter, e.g. `swarmforge=debug`.
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the orchestrator's named modes.
    Modes,
    /// Run a named mode and follow its task updates.
    RunMode {
        name: String,
        #[arg(long)]
        system_prompt: Option<String>,
    },
    /// Ask the orchestrator to plan a prompt and follow its task updates.
    Plan {
        prompt: String,
        #[arg(long)]
        system_prompt: Option<String>,
    },
    /// Generate an asset through the dispatch engine.
    Generate {
        #[arg(long)]
        asset_type: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// JSON file holding the parameter block for the asset type.
        #[arg(long)]
        params: Option<PathBuf>,
    },
    /// Ask the script generator for a new script.
    Script {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Scene object the script should be attached to.
        #[arg(long)]
        target: Option<String>,
    },
    /// Check a script file with the script generator.
    ValidateScript { path: PathBuf },
    /// Print every inbound message until Ctrl-C.
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(log) = cli.log {
        config.log.filter = log;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let context = AppContext::new(config);
    if let Some(port) = cli.port {
        context.session.set_port(port).await?;
    }

    let outcome = match cli.command {
        Command::Modes => commands::modes(&context).await,
        Command::RunMode {
            name,
            system_prompt,
        } => commands::run_mode(&context, name, system_prompt).await,
        Command::Plan {
            prompt,
            system_prompt,
        } => commands::plan(&context, prompt, system_prompt).await,
        Command::Generate {
            asset_type,
            name,
            description,
            params,
        } => commands::generate(&context, asset_type, name, description, params).await,
        Command::Script {
            name,
            description,
            target,
        } => commands::script(&context, name, description, target).await,
        Command::ValidateScript { path } => commands::validate_script(&context, path).await,
        Command::Watch => commands::watch(&context).await,
    };

    context.shutdown().await;
    outcome
}
