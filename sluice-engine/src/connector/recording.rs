// Recording Executor
// In-memory executor with scripted results, used by tests and dry runs

use crate::connector::{ConnectorError, Executor, MethodPatterns, Table};

use std::sync::{Mutex, MutexGuard};

/// Executor that records every statement and answers from a script of
/// `(substring, result)` rules; the first matching rule wins
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    statements: Mutex<Vec<String>>,
    responses: Vec<(String, Table)>,
    failures: Vec<String>,
    unhealthy: bool,
    patterns: Option<MethodPatterns>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `table` for statements containing `fragment`
    pub fn respond(mut self, fragment: impl Into<String>, table: Table) -> Self {
        self.responses.push((fragment.into(), table));
        self
    }

    /// Fail statements containing `fragment`
    pub fn fail_on(mut self, fragment: impl Into<String>) -> Self {
        self.failures.push(fragment.into());
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.unhealthy = true;
        self
    }

    pub fn with_patterns(mut self, patterns: MethodPatterns) -> Self {
        self.patterns = Some(patterns);
        self
    }

    /// Statements executed so far, in order
    pub fn statements(&self) -> Vec<String> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.statements
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl Executor for RecordingExecutor {
    async fn execute(&self, statement: &str) -> Result<Option<Table>, ConnectorError> {
        self.lock().push(statement.to_string());

        if let Some(fragment) = self.failures.iter().find(|f| statement.contains(f.as_str())) {
            return Err(ConnectorError::Rejected(format!(
                "scripted failure for statement containing '{}'",
                fragment
            )));
        }

        Ok(self
            .responses
            .iter()
            .find(|(fragment, _)| statement.contains(fragment.as_str()))
            .map(|(_, table)| table.clone()))
    }

    fn statement_patterns(&self) -> MethodPatterns {
        self.patterns.clone().unwrap_or_else(MethodPatterns::standard)
    }

    async fn health_check(&self) -> bool {
        !self.unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::models::Value;

    #[tokio::test]
    async fn test_scripted_responses() {
        let executor = RecordingExecutor::new()
            .respond("from dates", Table::new(["d"]).with_row([Value::from("2024-01-01")]))
            .fail_on("drop");

        let table = executor.execute("select d from dates").await.unwrap().unwrap();
        assert_eq!(table.len(), 1);
        assert!(executor.execute("create table x").await.unwrap().is_none());
        assert!(executor.execute("drop table x").await.is_err());
        assert_eq!(executor.statements().len(), 3);
    }

    #[tokio::test]
    async fn test_health() {
        assert!(RecordingExecutor::new().health_check().await);
        assert!(!RecordingExecutor::new().unhealthy().health_check().await);
    }
}
