// Pipeline File Parser
// Parses pipeline YAML files and validates mode configuration at load time

use crate::parser::error::{ParseError, ParseResult};
use crate::parser::models::{ModeConfig, PipelineDefinition};

use std::fs;
use std::path::Path;

/// Pipeline file parser
pub struct PipelineParser;

impl PipelineParser {
    /// Parse and validate a pipeline from YAML string
    pub fn parse(content: &str) -> ParseResult<PipelineDefinition> {
        let definition: PipelineDefinition =
            serde_yaml::from_str(content).map_err(|e| ParseError::from_yaml_error(&e, content))?;

        let errors = PipelineValidator::validate(&definition);
        if !errors.is_empty() {
            let message = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ParseError::validation(message));
        }

        Ok(definition)
    }

    /// Parse pipeline from file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> ParseResult<PipelineDefinition> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ParseError::io(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::parse(&content)
    }
}

/// Semantic checks serde cannot express
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate every node's modes; returns all problems found
    pub fn validate(definition: &PipelineDefinition) -> Vec<ParseError> {
        let mut errors = Vec::new();

        for (name, node) in definition.etl.iter() {
            if let Some(run) = &node.run {
                Self::validate_mode(name, "run", run, &mut errors);
                if run.variants.is_some() {
                    errors.push(ParseError::validation(format!(
                        "etl.{}.run: 'variants' is only supported on save",
                        name
                    )));
                }
                if run.format.is_some() {
                    errors.push(ParseError::validation(format!(
                        "etl.{}.run: 'format' is only supported on save",
                        name
                    )));
                }
            }
            if let Some(save) = &node.save {
                Self::validate_mode(name, "save", save, &mut errors);
            }
        }

        errors
    }

    fn validate_mode(node: &str, mode: &str, config: &ModeConfig, errors: &mut Vec<ParseError>) {
        let path = format!("etl.{}.{}", node, mode);

        if config.query.is_some() && config.script.is_some() {
            errors.push(
                ParseError::validation(format!(
                    "{}: 'query' and 'script' are mutually exclusive",
                    path
                ))
                .with_suggestion("keep the inline query or move it into the script file"),
            );
        }

        if config.store_results && config.outputs.as_ref().map_or(true, Vec::is_empty) {
            errors.push(ParseError::validation(format!(
                "{}: 'store_results' requires at least one entry in 'outputs'",
                path
            )));
        }

        if let Some(deps) = &config.depends_on {
            if deps.iter().any(|d| d == node) {
                errors.push(ParseError::validation(format!(
                    "{}: node cannot depend on itself",
                    path
                )));
            }
        }

        for (i, variant) in config.variants.iter().flatten().enumerate() {
            if variant.name.trim().is_empty() {
                errors.push(ParseError::validation(format!(
                    "{}.variants[{}]: 'name' must not be empty",
                    path, i
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::error::ParseErrorKind;

    #[test]
    fn test_parse_simple_pipeline() {
        let yaml = r#"
arguments:
  start: "2024-01-01"
etl:
  customers:
    manifest: table
    run:
      query: select * from raw.customers
  orders:
    schema: sales
    run:
      depends_on: [customers]
      method: replace
      query: select * from raw.orders where d >= '{{ start }}'
    save:
      depends_on: [customers]
      format: jsonl
      query: select * from {{ this }}
"#;
        let definition = PipelineParser::parse(yaml).unwrap();
        assert_eq!(definition.etl.len(), 2);
        assert!(definition.arguments.contains_key("start"));

        let (_, orders) = &definition.etl.0[1];
        assert_eq!(orders.schema, "sales");
        assert_eq!(orders.run.as_ref().unwrap().method.as_deref(), Some("replace"));
        assert_eq!(
            orders.save.as_ref().unwrap().depends_on,
            Some(vec!["customers".to_string()])
        );

        let (_, customers) = &definition.etl.0[0];
        assert_eq!(customers.schema, "public");
    }

    #[test]
    fn test_query_and_script_rejected() {
        let yaml = r#"
etl:
  orders:
    run:
      query: select 1
      script: sql/orders.sql
"#;
        let err = PipelineParser::parse(yaml).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ValidationError);
        assert!(err.message.contains("mutually exclusive"));
    }

    #[test]
    fn test_run_variants_rejected() {
        let yaml = r#"
etl:
  orders:
    run:
      query: select 1
      variants:
        - name: a
"#;
        let err = PipelineParser::parse(yaml).unwrap_err();
        assert!(err.message.contains("only supported on save"));
    }

    #[test]
    fn test_store_results_requires_outputs() {
        let yaml = r#"
etl:
  dates:
    save:
      query: select d from calendar
      store_results: true
"#;
        let err = PipelineParser::parse(yaml).unwrap_err();
        assert!(err.message.contains("store_results"));
    }

    #[test]
    fn test_variant_without_name_rejected() {
        let yaml = r#"
etl:
  orders:
    save:
      query: select 1
      variants:
        - arguments: {x: 1}
"#;
        let err = PipelineParser::parse(yaml).unwrap_err();
        assert!(err.message.contains("name"));
    }

    #[test]
    fn test_parse_file_missing() {
        let err = PipelineParser::parse_file("/nonexistent/pipeline.yaml").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::IoError);
    }
}
