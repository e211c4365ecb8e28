// Schema setup command

use super::connect;
use crate::output::{print_field, OutputFormat};
use anyhow::Result;
use pgqueue::QueueConfig;
use serde_json::json;

pub async fn run(config: QueueConfig, output: OutputFormat, quiet: bool) -> Result<()> {
    // Connecting runs ensure_schema; skip the retention pass
    let client = connect(config.with_tasks_ttl(None)).await?;
    client.shutdown().await?;

    if output.is_text() {
        if !quiet {
            print_field("Schema", "ready");
        }
    } else {
        output.print_value(&json!({ "schema": "ready" }))?;
    }
    Ok(())
}
