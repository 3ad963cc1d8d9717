// Command Executor
// Runs each statement through an external client program (psql, sqlite3, duckdb, ...)

use crate::connector::{ConnectorError, Executor, Table};
use crate::parser::models::Value;

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// How the client program prints result rows on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultEncoding {
    /// Array of objects, or one object per line
    #[default]
    Json,
    /// Header line followed by comma separated rows
    Csv,
}

/// Connection settings for a command-backed executor
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    /// Client program; the statement is written to its stdin
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Timeout per statement in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub output: ResultEncoding,
}

impl CommandConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            timeout: None,
            output: ResultEncoding::default(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn with_output(mut self, output: ResultEncoding) -> Self {
        self.output = output;
        self
    }
}

/// Executor that pipes statements into a client program
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: CommandConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    /// Resolve the client program on `PATH`; paths are checked as given
    pub fn locate(&self) -> Result<PathBuf, which::Error> {
        match &self.config.working_dir {
            Some(dir) => which::which_in(&self.config.program, std::env::var_os("PATH"), dir),
            None => which::which(&self.config.program),
        }
    }

    async fn run(&self, statement: &str) -> Result<String, ConnectorError> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args);
        cmd.envs(&self.config.env);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ConnectorError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        // The stdin write is timed too: a client that never reads blocks it
        let exchange = async move {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(statement.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        let output = match self.config.timeout {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), exchange)
                .await
                .map_err(|_| ConnectorError::Timeout(secs))??,
            None => exchange.await?,
        };

        if !output.status.success() {
            return Err(ConnectorError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait::async_trait]
impl Executor for CommandExecutor {
    async fn execute(&self, statement: &str) -> Result<Option<Table>, ConnectorError> {
        tracing::debug!(program = %self.config.program, "executing statement");
        let stdout = self.run(statement).await?;
        if stdout.trim().is_empty() {
            return Ok(None);
        }

        let table = match self.config.output {
            ResultEncoding::Json => parse_json_rows(&stdout)?,
            ResultEncoding::Csv => parse_csv(&stdout)?,
        };
        Ok(Some(table))
    }

    async fn health_check(&self) -> bool {
        if let Err(e) = self.locate() {
            tracing::warn!(program = %self.config.program, error = %e, "client program not found");
            return false;
        }
        match self.run("select 1").await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(program = %self.config.program, error = %e, "health check failed");
                false
            }
        }
    }
}

/// Parse a JSON array of objects, or newline-delimited objects
pub fn parse_json_rows(text: &str) -> Result<Table, ConnectorError> {
    let text = text.trim();
    let rows: Vec<serde_json::Value> = if text.starts_with('[') {
        serde_json::from_str(text).map_err(|e| ConnectorError::Decode(e.to_string()))?
    } else {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()
            .map_err(|e| ConnectorError::Decode(e.to_string()))?
    };

    let mut table = Table::default();
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let map = match row {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(ConnectorError::Decode(format!(
                    "expected an object per row, found {}",
                    other
                )))
            }
        };
        for key in map.keys() {
            if !table.columns.contains(key) {
                table.columns.push(key.clone());
            }
        }
        records.push(map);
    }

    for mut record in records {
        table.rows.push(
            table
                .columns
                .iter()
                .map(|c| record.remove(c).map(Value::from).unwrap_or_default())
                .collect(),
        );
    }
    Ok(table)
}

/// Parse CSV with a header line; numbers become numbers, empty fields null
pub fn parse_csv(text: &str) -> Result<Table, ConnectorError> {
    let mut records = csv_records(text)?.into_iter();
    let Some(columns) = records.next() else {
        return Ok(Table::default());
    };

    let mut table = Table::new(columns);
    for (i, fields) in records.enumerate() {
        if fields.len() != table.columns.len() {
            return Err(ConnectorError::Decode(format!(
                "row {} has {} fields, header has {}",
                i + 1,
                fields.len(),
                table.columns.len()
            )));
        }
        table.rows.push(fields.iter().map(|f| csv_value(f)).collect());
    }
    Ok(table)
}

fn csv_value(field: &str) -> Value {
    if field.is_empty() {
        Value::Null
    } else if let Ok(n) = field.parse::<i64>() {
        Value::Integer(n)
    } else if let Ok(n) = field.parse::<f64>() {
        Value::Number(n)
    } else {
        Value::String(field.to_string())
    }
}

/// Split CSV text into records. Quoted fields may hold commas, doubled
/// quotes and line breaks; blank lines between records are skipped.
fn csv_records(text: &str) -> Result<Vec<Vec<String>>, ConnectorError> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => current.push(ch),
            ',' => fields.push(std::mem::take(&mut current)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                if !fields.is_empty() || !current.is_empty() {
                    fields.push(std::mem::take(&mut current));
                    records.push(std::mem::take(&mut fields));
                }
            }
            _ => current.push(ch),
        }
    }

    if in_quotes {
        return Err(ConnectorError::Decode("unterminated quoted field".to_string()));
    }
    if !fields.is_empty() || !current.is_empty() {
        fields.push(current);
        records.push(fields);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::FileSink;
    use crate::parser::models::OutputFormat;

    #[test]
    fn test_parse_json_array() {
        let table = parse_json_rows(r#"[{"d": "2024-01-01", "n": 1}, {"d": "2024-01-02"}]"#).unwrap();
        assert_eq!(table.columns, vec!["d", "n"]);
        assert_eq!(table.rows[1][1], Value::Null);
    }

    #[test]
    fn test_parse_json_lines() {
        let table = parse_json_rows("{\"a\": 1}\n{\"a\": 2}\n").unwrap();
        assert_eq!(table.column("a").unwrap(), vec![Value::from(1i64), Value::from(2i64)]);
    }

    #[test]
    fn test_parse_json_rejects_scalars() {
        assert!(parse_json_rows("[1, 2]").is_err());
    }

    #[test]
    fn test_parse_csv_quoted() {
        let table = parse_csv("name,qty\n\"a, b\",3\n\"say \"\"hi\"\"\",\n").unwrap();
        assert_eq!(table.columns, vec!["name", "qty"]);
        assert_eq!(table.rows[0], vec![Value::from("a, b"), Value::Integer(3)]);
        assert_eq!(table.rows[1], vec![Value::from("say \"hi\""), Value::Null]);
    }

    #[test]
    fn test_parse_csv_multiline_field() {
        let table = parse_csv("id,note\r\n1,\"line one\nline two\"\r\n2,plain\r\n").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0][1], Value::from("line one\nline two"));
        assert_eq!(table.rows[1], vec![Value::Integer(2), Value::from("plain")]);
    }

    #[test]
    fn test_parse_csv_reads_sink_output() {
        let written = Table::new(["id", "note"])
            .with_row([Value::from(1234567890123456789i64), Value::from("a \"quoted\"\nnote, here")])
            .with_row([Value::from(2i64), Value::from("short")]);
        let encoded = FileSink::encode(&written, OutputFormat::Csv).unwrap();

        let table = parse_csv(&encoded).unwrap();
        assert_eq!(table.columns, written.columns);
        assert_eq!(table.rows, written.rows);
    }

    #[test]
    fn test_parse_csv_unterminated_quote() {
        assert!(matches!(parse_csv("a\n\"open\n"), Err(ConnectorError::Decode(_))));
    }

    #[test]
    fn test_parse_json_keeps_large_integers() {
        let table = parse_json_rows(r#"[{"id": 1234567890123456789, "ratio": 0.5}]"#).unwrap();
        assert_eq!(table.rows[0][0], Value::Integer(1234567890123456789));
        assert_eq!(table.rows[0][0].as_string(), "1234567890123456789");
        assert_eq!(table.rows[0][1], Value::Number(0.5));
    }

    #[test]
    fn test_parse_csv_ragged_row() {
        assert!(parse_csv("a,b\n1\n").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_executor_reads_stdout() {
        let config = CommandConfig::new("sh")
            .with_args(["-c", "cat > /dev/null; echo 'x,y'; echo '1,2'"])
            .with_output(ResultEncoding::Csv);
        let executor = CommandExecutor::new(config);

        let table = executor.execute("select 1").await.unwrap().unwrap();
        assert_eq!(table.columns, vec!["x", "y"]);
        assert!(executor.health_check().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_executor_failure() {
        let config = CommandConfig::new("sh").with_args(["-c", "cat > /dev/null; echo boom >&2; exit 3"]);
        let executor = CommandExecutor::new(config);

        let err = executor.execute("select 1").await.unwrap_err();
        assert!(matches!(err, ConnectorError::Failed { code: Some(3), ref stderr } if stderr == "boom"));
        assert!(!executor.health_check().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_executor_empty_output() {
        let config = CommandConfig::new("sh").with_args(["-c", "cat > /dev/null"]);
        let executor = CommandExecutor::new(config);
        assert!(executor.execute("create table t (a int)").await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_executor_timeout_covers_stdin() {
        // The client never reads, so a statement larger than the pipe buffer blocks the write
        let config = CommandConfig::new("sh").with_args(["-c", "sleep 30"]).with_timeout(1);
        let executor = CommandExecutor::new(config);

        let statement = "select 1;\n".repeat(200_000);
        let err = executor.execute(&statement).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Timeout(1)));
    }

    #[tokio::test]
    async fn test_command_executor_missing_program() {
        let executor = CommandExecutor::new(CommandConfig::new("definitely-not-a-sql-client"));
        assert!(executor.locate().is_err());
        assert!(!executor.health_check().await);
        let err = executor.execute("select 1").await.unwrap_err();
        assert!(matches!(err, ConnectorError::Spawn { .. }));
    }
}
