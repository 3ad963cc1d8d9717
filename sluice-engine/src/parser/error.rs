// Parser error types with helpful error messages
// Provides context, line/column info, and suggestions for common mistakes

use std::fmt;

/// Detailed parse error with location and context
#[derive(Debug, Clone)]
pub struct ParseError {
    /// Error message
    pub message: String,
    /// Line number (1-indexed, 0 when unknown)
    pub line: usize,
    /// Column number (1-indexed, 0 when unknown)
    pub column: usize,
    /// Surrounding context (a few lines around the error)
    pub context: String,
    /// Optional suggestion for fixing the error
    pub suggestion: Option<String>,
    /// The kind of error
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// YAML syntax error
    YamlSyntax,
    /// Invalid schema (wrong types, missing fields)
    InvalidSchema,
    /// Invalid value
    InvalidValue,
    /// IO error (file not found, etc.)
    IoError,
    /// Validation error (semantic)
    ValidationError,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            context: String::new(),
            suggestion: None,
            kind: ParseErrorKind::InvalidSchema,
        }
    }

    pub fn yaml_error(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self::new(message, line, column).with_kind(ParseErrorKind::YamlSyntax)
    }

    /// Semantic error that has no source location
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message, 0, 0).with_kind(ParseErrorKind::ValidationError)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(message, 0, 0).with_kind(ParseErrorKind::IoError)
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_kind(mut self, kind: ParseErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Create context from source content
    pub fn with_source_context(mut self, source: &str, context_lines: usize) -> Self {
        let lines: Vec<&str> = source.lines().collect();
        let start = self.line.saturating_sub(context_lines + 1);
        let end = (self.line + context_lines).min(lines.len());

        let mut context = String::new();
        for (i, line) in lines.iter().enumerate().take(end).skip(start) {
            let line_num = i + 1;
            let prefix = if line_num == self.line { ">" } else { " " };
            context.push_str(&format!("{} {:4} | {}\n", prefix, line_num, line));

            if line_num == self.line && self.column > 0 {
                let indicator = " ".repeat(self.column + 7) + "^";
                context.push_str(&format!("       | {}\n", indicator));
            }
        }

        self.context = context;
        self
    }

    /// Translate a serde_yaml error, attaching source context and a hint
    pub fn from_yaml_error(err: &serde_yaml::Error, source: &str) -> Self {
        let raw = err.to_string();
        let (line, column) = err
            .location()
            .map_or((0, 0), |loc| (loc.line(), loc.column()));

        let syntax = ["did not find expected", "mapping values are not allowed"]
            .iter()
            .any(|marker| raw.contains(marker));
        let kind = if syntax {
            ParseErrorKind::YamlSyntax
        } else {
            ParseErrorKind::InvalidSchema
        };

        let mut error = ParseError::new(readable_message(&raw), line, column).with_kind(kind);
        if line > 0 {
            error = error.with_source_context(source, 2);
        }
        let offending = source.lines().nth(line.saturating_sub(1)).unwrap_or("");
        error.suggestion = hint(&raw, offending);
        error
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if self.line > 0 {
            write!(f, " (line {}:{})", self.line, self.column)?;
        }
        if !self.context.is_empty() {
            write!(f, "\n{}", self.context)?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nhelp: {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Rephrase the serde messages users hit most often
fn readable_message(raw: &str) -> String {
    if let Some(field) = between(raw, "missing field `", "`") {
        return format!("missing required field '{}'", field);
    }

    if let Some(field) = between(raw, "unknown field `", "`") {
        return match expected_fields(raw) {
            Some(expected) => format!(
                "unknown field '{}', expected one of: {}",
                field,
                expected.join(", ")
            ),
            None => format!("unknown field '{}'", field),
        };
    }

    if let (Some(found), Some(expected)) = (
        between(raw, "invalid type: ", ","),
        between(raw, "expected ", " at"),
    ) {
        return format!("expected {}, but found {}", expected, found);
    }

    raw.to_string()
}

/// Text between the first `prefix` and the following `suffix`
fn between<'a>(text: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let rest = &text[text.find(prefix)? + prefix.len()..];
    Some(&rest[..rest.find(suffix)?])
}

fn expected_fields(raw: &str) -> Option<Vec<&str>> {
    let marker = "expected one of ";
    let rest = &raw[raw.find(marker)? + marker.len()..];
    let list = rest.split(" at").next().unwrap_or(rest);
    Some(list.split(", ").map(|f| f.trim_matches('`')).collect())
}

/// Misspellings of pipeline keys and what was meant
const TYPOS: &[(&str, &str)] = &[
    ("dependson", "depends_on"),
    ("depends-on", "depends_on"),
    ("dependencies", "depends_on"),
    ("iterateon", "iterate_on"),
    ("iterate-on", "iterate_on"),
    ("storeresults", "store_results"),
    ("store-results", "store_results"),
    ("output:", "outputs"),
    ("argument:", "arguments"),
];

/// Suggest a fix for common pipeline file mistakes
fn hint(raw: &str, offending: &str) -> Option<String> {
    if raw.contains("unknown field `filetype`") {
        return Some("use 'format:' (csv, json or jsonl) on the save mode".to_string());
    }
    if raw.contains("unknown field `iterate_on`") {
        return Some("'iterate_on:' belongs inside a variant entry under 'save.variants'".to_string());
    }
    if raw.contains("expected") && raw.contains("found") && offending.starts_with('\t') {
        return Some("indent with spaces; YAML does not accept tabs".to_string());
    }

    let line = offending.to_lowercase();
    let message = raw.to_lowercase();
    TYPOS
        .iter()
        .find(|(typo, _)| line.contains(typo) || message.contains(&format!("`{}`", typo)))
        .map(|(_, correct)| format!("did you mean '{}'?", correct))
}

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new("missing required field 'name'", 10, 5)
            .with_context("   9 | variants:\n> 10 |   - arguments: {}\n")
            .with_suggestion("every variant needs a 'name:' template");

        let output = format!("{}", err);
        assert!(output.contains("missing required field"));
        assert!(output.contains("line 10:5"));
        assert!(output.contains("help:"));
    }

    #[test]
    fn test_parse_error_with_source_context() {
        let source = r#"arguments:
  start: 2024-01-01

etl:
  orders:
    run:
      querry: select 1"#;

        let err = ParseError::new("unknown field 'querry'", 7, 7).with_source_context(source, 2);

        assert!(err.context.contains("> "));
        assert!(err.context.contains("querry"));
    }

    #[test]
    fn test_readable_message() {
        assert_eq!(
            readable_message("missing field `name` at line 10 column 3"),
            "missing required field 'name'"
        );
        assert_eq!(between("unknown field `querry`, expected", "field `", "`"), Some("querry"));
    }

    #[test]
    fn test_typo_suggestion_from_yaml() {
        let source = "etl:\n  orders:\n    run:\n      query: select 1\n      dependson: [a]\n";
        let err = serde_yaml::from_str::<crate::parser::models::PipelineDefinition>(source)
            .unwrap_err();
        let parse_error = ParseError::from_yaml_error(&err, source);
        assert!(parse_error.message.contains("dependson"));
        assert_eq!(parse_error.suggestion.as_deref(), Some("did you mean 'depends_on'?"));
    }
}
