// Task dispatch command

use super::connect;
use crate::output::{print_field, print_records, OutputFormat};
use anyhow::{Context, Result};
use pgqueue::{Payloads, QueueConfig};
use serde_json::{json, Value};
use std::time::Duration;

pub async fn run(
    config: QueueConfig,
    output: OutputFormat,
    task_id: String,
    payloads: Vec<String>,
    wait: bool,
    poll_interval_ms: Option<u64>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let payloads = parse_payloads(&payloads)?;
    let client = connect(config).await?;

    let result = if wait {
        let mut options = client.wait_options();
        if let Some(ms) = poll_interval_ms {
            options = options.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(secs) = timeout_secs {
            options = options.with_timeout(Some(Duration::from_secs(secs)));
        }

        client
            .dispatch_and_wait(&task_id, Payloads::Many(payloads), options)
            .await
            .map(|dispatched| {
                let records = dispatched.into_vec();
                if output.is_text() {
                    print_records(&records);
                    Ok(())
                } else {
                    output.print_value(&records)
                }
            })
    } else {
        client.dispatch(&task_id, payloads).await.map(|ids| {
            if output.is_text() {
                print_field("Task", &task_id);
                let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                print_field("Dispatched", &ids.join(", "));
                Ok(())
            } else {
                output.print_value(&json!({ "task_id": task_id, "ids": ids }))
            }
        })
    };

    // Release the connection even when dispatch failed
    client.shutdown().await?;
    result.context("Dispatch failed")?
}

/// Parse each argument as one JSON payload
fn parse_payloads(raw: &[String]) -> Result<Vec<Value>> {
    raw.iter()
        .enumerate()
        .map(|(i, payload)| {
            serde_json::from_str(payload)
                .with_context(|| format!("Payload {} is not valid JSON: {}", i + 1, payload))
        })
        .collect()
}
