//! Queue Maintenance Binary
//!
//! Runs the lease sweep, reconciliation and position refresh loops against the configured
//! store until Ctrl-C. `--once` runs every pass a single time and prints the report.

use moderation_queue::logging::init_structured_logging;
use moderation_queue::{ConfigManager, ModerationQueueCore};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let run_once = std::env::args().skip(1).any(|arg| arg == "--once");

    let config_manager = ConfigManager::load_or_default()?;
    info!(
        environment = config_manager.environment(),
        "Starting queue maintenance"
    );

    let core = ModerationQueueCore::from_config(config_manager).await?;
    let runner = core.maintenance_runner();

    if run_once {
        let report = runner.run_once().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        core.shutdown().await;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loops = tokio::spawn(async move { runner.run(shutdown_rx).await });

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Err(e) = loops.await {
        error!(error = %e, "Maintenance loops ended abnormally");
    }

    core.shutdown().await;
    info!("Queue maintenance stopped");
    Ok(())
}
