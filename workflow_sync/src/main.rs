use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use shared::{get_db_connection, Config, WorkflowService};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// Workflow sync runner
// Reconciles every strategy's workflow once, or repeatedly when SYNC_INTERVAL_SECS > 0

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let db = get_db_connection(&config.database_url).await?;
    let service = WorkflowService::from_config(&config, Arc::new(db))?;

    if config.sync_interval_secs == 0 {
        info!("Running a single workflow sync pass");
        let report = service.sync_all().await?;
        if report.errored > 0 {
            anyhow::bail!("{} of {} strategies failed to sync", report.errored, report.total());
        }
        return Ok(());
    }

    info!("Syncing workflows every {}s", config.sync_interval_secs);
    let mut ticker = tokio::time::interval(Duration::from_secs(config.sync_interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A failed pass is retried on the next tick.
                if let Err(e) = service.sync_all().await {
                    error!("Workflow sync pass failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down workflow sync");
                break;
            }
        }
    }

    Ok(())
}
