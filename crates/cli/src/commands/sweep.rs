// One-shot retention sweep

use super::connect;
use crate::output::{print_field, OutputFormat};
use anyhow::{bail, Result};
use pgqueue::{parse_ttl, QueueConfig, RetentionSweep};
use serde_json::json;

pub async fn run(config: QueueConfig, output: OutputFormat, ttl: Option<String>) -> Result<()> {
    let Some(ttl) = ttl.or_else(|| config.tasks_ttl.clone()) else {
        bail!("Retention is disabled; pass --ttl or set PGQUEUE_TASKS_TTL");
    };
    parse_ttl(&ttl)?;

    // The client would sweep on connect; run the pass explicitly to report it
    let client = connect(config.with_tasks_ttl(None)).await?;
    let sweep = RetentionSweep::from_ttl(client.store().clone(), &ttl)?;
    let deleted = sweep.sweep().await;
    client.shutdown().await?;
    let deleted = deleted?;

    if output.is_text() {
        print_field("TTL", &ttl);
        print_field("Deleted", &deleted.to_string());
    } else {
        output.print_value(&json!({ "ttl": ttl, "deleted": deleted }))?;
    }
    Ok(())
}
