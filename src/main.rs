//! # Content OS Sync Engine Entry Point

use std::sync::Arc;

use clap::Parser;

use contentos_sync::config::ConfigLoader;
use contentos_sync::engine::{Engine, run_until_interrupted};
use contentos_sync::notify::TracingSink;
use contentos_sync::telemetry;

#[derive(Debug, Parser)]
#[command(name = "contentos-sync", version, about = "Content OS sync engine")]
struct Cli {
    /// Workspace to load, overriding CONTENTOS_WORKSPACE_ID.
    #[arg(long)]
    workspace: Option<String>,

    /// Run a single reconciliation pass and exit instead of looping.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let mut config = ConfigLoader::new().load()?;
    if let Some(workspace) = cli.workspace {
        config.workspace_id = Some(workspace);
    }

    telemetry::init_tracing(&config)?;

    println!("Loaded configuration for profile: {}", config.profile);
    if let Ok(redacted_json) = config.redacted_json() {
        println!("Configuration: {}", redacted_json);
    }

    if cli.once {
        let engine = Engine::new(&config, Arc::new(TracingSink))?;
        if let Some(workspace_id) = &config.workspace_id {
            engine.reconciler.load(workspace_id, false).await?;
            engine.reconciler.reconcile().await?;
        } else {
            eprintln!("--once requires a workspace (flag or CONTENTOS_WORKSPACE_ID)");
        }
        return Ok(());
    }

    run_until_interrupted(config, Arc::new(TracingSink)).await?;
    Ok(())
}
