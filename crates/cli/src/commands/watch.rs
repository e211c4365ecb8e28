// Status notification watcher

use super::{connect, shutdown_signal};
use crate::output::OutputFormat;
use anyhow::Result;
use pgqueue::{QueueConfig, TaskStatus};

pub async fn run(
    config: QueueConfig,
    output: OutputFormat,
    task_id: String,
    status: Option<TaskStatus>,
) -> Result<()> {
    let client = connect(config.with_tasks_ttl(None)).await?;

    let subscribed = client
        .subscribe_to_status(&task_id, status, move |update| async move {
            if output.is_text() {
                println!("{:<10}  {:<12}  {}", update.id, update.status.as_str(), update.task_id);
            } else if let Ok(line) = serde_json::to_string(&update) {
                // One object per line so the stream can be piped
                println!("{}", line);
            }
        })
        .await;

    if subscribed.is_ok() {
        tracing::info!(task_id = %task_id, status = ?status, "Watching status notifications");
        let signal = shutdown_signal().await;
        client.shutdown().await?;
        signal
    } else {
        client.shutdown().await.ok();
        subscribed.map_err(Into::into)
    }
}
