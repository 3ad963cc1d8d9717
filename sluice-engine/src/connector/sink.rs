// Result Sink
// Persists tabular results produced by extraction modes

use crate::connector::{ConnectorError, Table};
use crate::parser::models::{OutputFormat, Value};

use std::path::Path;

/// Destination for extracted results
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn persist(
        &self,
        table: &Table,
        destination: &Path,
        format: OutputFormat,
    ) -> Result<(), ConnectorError>;
}

/// Writes results as files, creating parent directories
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSink;

impl FileSink {
    pub fn new() -> Self {
        Self
    }

    /// Serialize a table in the requested format
    pub fn encode(table: &Table, format: OutputFormat) -> Result<String, ConnectorError> {
        match format {
            OutputFormat::Csv => Ok(encode_csv(table)),
            OutputFormat::Json => {
                let records: Vec<serde_json::Value> = table.records().iter().map(record_json).collect();
                serde_json::to_string_pretty(&records)
                    .map_err(|e| ConnectorError::Decode(e.to_string()))
            }
            OutputFormat::Jsonl => {
                let mut out = String::new();
                for record in table.records() {
                    out.push_str(&record_json(&record).to_string());
                    out.push('\n');
                }
                Ok(out)
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink for FileSink {
    async fn persist(
        &self,
        table: &Table,
        destination: &Path,
        format: OutputFormat,
    ) -> Result<(), ConnectorError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = Self::encode(table, format)?;
        tokio::fs::write(destination, content).await?;
        tracing::debug!(
            destination = %destination.display(),
            rows = table.len(),
            %format,
            "persisted result"
        );
        Ok(())
    }
}

fn record_json(record: &std::collections::BTreeMap<String, Value>) -> serde_json::Value {
    serde_json::Value::Object(
        record
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
            .collect(),
    )
}

fn encode_csv(table: &Table) -> String {
    let mut out = String::new();
    let header: Vec<String> = table.columns.iter().map(|c| csv_field(c)).collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for row in &table.rows {
        let fields: Vec<String> = row.iter().map(|v| csv_field(&v.as_string())).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Table {
        Table::new(["region", "total"])
            .with_row([Value::from("us, east"), Value::from(10i64)])
            .with_row([Value::from("eu"), Value::Null])
    }

    #[test]
    fn test_encode_csv_quotes_fields() {
        let csv = FileSink::encode(&sample(), OutputFormat::Csv).unwrap();
        assert_eq!(csv, "region,total\n\"us, east\",10\neu,\n");
    }

    #[test]
    fn test_encode_jsonl() {
        let jsonl = FileSink::encode(&sample(), OutputFormat::Jsonl).unwrap();
        let lines: Vec<&str> = jsonl.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], r#"{"region":"eu","total":null}"#);
    }

    #[tokio::test]
    async fn test_persist_creates_directories() {
        let temp = TempDir::new().unwrap();
        let destination = temp.path().join("data/orders/orders_us.json");

        FileSink::new()
            .persist(&sample(), &destination, OutputFormat::Json)
            .await
            .unwrap();

        let written = std::fs::read_to_string(&destination).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed[0]["total"], 10);
    }
}
