// Output formatting for CLI

use anyhow::Result;
use pgqueue::TaskRecord;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }

    /// Print `value` as JSON; text output is handled by each command
    pub fn print_value<T: Serialize>(&self, value: &T) -> Result<()> {
        if let OutputFormat::Json = self {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        Ok(())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, OutputFormat::Text)
    }
}

/// Print a simple key-value pair for text output
pub fn print_field(label: &str, value: &str) {
    println!("{:<14} {}", format!("{}:", label), value);
}

const RECORD_COLUMNS: [(&str, usize); 4] = [("ID", 10), ("STATUS", 12), ("TASK", 24), ("OUTPUT", 40)];

/// Print a table header
pub fn print_table_header(columns: &[(&str, usize)]) {
    let header: String = columns
        .iter()
        .map(|(name, width)| format!("{:<width$}", name, width = width))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", header);
}

/// Print a table row, truncating values wider than their column
pub fn print_table_row(values: &[(&str, usize)]) {
    let row: String = values
        .iter()
        .map(|(val, width)| format!("{:<width$}", truncate(val, *width), width = width))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", row);
}

/// Print finished records as a table
pub fn print_records(records: &[TaskRecord]) {
    print_table_header(&RECORD_COLUMNS);
    for record in records {
        let id = record.id.to_string();
        let output = record_output(record);
        print_table_row(&[
            (&id, RECORD_COLUMNS[0].1),
            (record.status.as_str(), RECORD_COLUMNS[1].1),
            (&record.task_id, RECORD_COLUMNS[2].1),
            (&output, RECORD_COLUMNS[3].1),
        ]);
    }
}

/// Result for completed rows, error detail for failed ones
fn record_output(record: &TaskRecord) -> String {
    match (&record.result, &record.log) {
        (Some(result), _) => result.to_string(),
        (None, Some(log)) => log.to_string(),
        (None, None) => String::new(),
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let kept: String = value.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}
