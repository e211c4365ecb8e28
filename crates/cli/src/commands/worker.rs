// Echo worker command
//
// Registers a handler that returns each payload as its result. Useful for
// smoke-testing a deployment end to end.

use super::{connect, shutdown_signal};
use anyhow::{bail, Result};
use pgqueue::engine::DEFAULT_BATCH_SIZE;
use pgqueue::{QueueConfig, TaskRegistration};
use std::time::Duration;

/// `--task` argument: a task type with its claim batch size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub task_id: String,
    pub batch_size: usize,
}

/// Parse `ID` or `ID:BATCH`
pub fn parse_task_spec(raw: &str) -> Result<TaskSpec, String> {
    let (task_id, batch_size) = match raw.rsplit_once(':') {
        Some((task_id, batch)) => {
            let batch_size: usize = batch
                .parse()
                .map_err(|_| format!("invalid batch size '{}'", batch))?;
            if batch_size == 0 {
                return Err("batch size must be at least 1".to_string());
            }
            (task_id, batch_size)
        }
        None => (raw, DEFAULT_BATCH_SIZE),
    };

    if task_id.is_empty() {
        return Err("task type must not be empty".to_string());
    }

    Ok(TaskSpec {
        task_id: task_id.to_string(),
        batch_size,
    })
}

pub async fn run(
    config: QueueConfig,
    quiet: bool,
    tasks: Vec<TaskSpec>,
    poll_interval_ms: Option<u64>,
) -> Result<()> {
    if tasks.is_empty() {
        bail!("At least one --task is required");
    }

    let client = connect(config).await?;

    let registrations = tasks.iter().map(|spec| {
        TaskRegistration::new(spec.task_id.clone(), |payload| async move { Ok(payload) })
            .with_batch_size(spec.batch_size)
    });
    let scheduler = match client
        .subscribe(registrations, poll_interval_ms.map(Duration::from_millis))
        .await
    {
        Ok(scheduler) => scheduler,
        Err(e) => {
            client.shutdown().await.ok();
            return Err(e.into());
        }
    };

    if !quiet {
        println!(
            "Worker {} processing {} (Ctrl-C to stop)",
            scheduler.id(),
            scheduler.task_ids().join(", ")
        );
    }
    tracing::info!(
        scheduler_id = %scheduler.id(),
        poll_interval_ms = scheduler.poll_interval().as_millis() as u64,
        "Worker started"
    );

    let signal = shutdown_signal().await;
    client.shutdown().await?;
    signal?;

    if !quiet {
        println!("Worker stopped");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task_spec() {
        assert_eq!(
            parse_task_spec("resize:5").unwrap(),
            TaskSpec {
                task_id: "resize".to_string(),
                batch_size: 5
            }
        );
        assert_eq!(
            parse_task_spec("email").unwrap(),
            TaskSpec {
                task_id: "email".to_string(),
                batch_size: DEFAULT_BATCH_SIZE
            }
        );
        // Only the last colon separates the batch size
        assert_eq!(parse_task_spec("ns:thumbs:2").unwrap().task_id, "ns:thumbs");
    }

    #[test]
    fn test_parse_task_spec_rejects_bad_input() {
        assert!(parse_task_spec("resize:0").is_err());
        assert!(parse_task_spec("resize:many").is_err());
        assert!(parse_task_spec(":3").is_err());
        assert!(parse_task_spec("").is_err());
    }
}
