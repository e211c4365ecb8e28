pub mod dispatch;
pub mod init;
pub mod sweep;
pub mod watch;
pub mod worker;

use anyhow::{Context, Result};
use pgqueue::{QueueClient, QueueConfig};

/// Connect to PostgreSQL, creating the schema if missing
pub async fn connect(config: QueueConfig) -> Result<QueueClient> {
    QueueClient::connect(config)
        .await
        .context("Failed to connect to the queue database")
}

/// Wait for Ctrl-C
pub async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Received shutdown signal");
    Ok(())
}
