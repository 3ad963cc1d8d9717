// Built-in Template Functions and Filters
// Helpers available inside every template regardless of the supplied variables

use crate::parser::models::Value;
use crate::template::error::{TemplateError, TemplateErrorKind};

use std::fmt::Write;

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Largest list `range` will build
const MAX_RANGE_LEN: i64 = 100_000;

/// Registry of built-in functions and filters
#[derive(Debug, Default, Clone, Copy)]
pub struct Builtins;

impl Builtins {
    pub fn new() -> Self {
        Self
    }

    /// Call a built-in function
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
        match name {
            "current_date" => self.fn_current_date(args),
            "range" => self.fn_range(args),
            _ => Err(TemplateError::new(
                format!("unknown function: {}", name),
                TemplateErrorKind::UnknownFunction,
            )),
        }
    }

    /// Apply a filter to a defined value
    pub fn filter(&self, name: &str, input: Value, args: Vec<Value>) -> Result<Value, TemplateError> {
        match name {
            "upper" => Ok(Value::String(input.as_string().to_uppercase())),
            "lower" => Ok(Value::String(input.as_string().to_lowercase())),
            "trim" => Ok(Value::String(input.as_string().trim().to_string())),
            "join" => self.filter_join(input, args),
            "length" => self.filter_length(input),
            "default" => Ok(if input.is_null() {
                args.into_iter().next().unwrap_or_default()
            } else {
                input
            }),
            "tojson" => Ok(Value::String(input.to_json())),
            "quote" => Ok(Value::String(quote(&input))),
            "replace" => self.filter_replace(input, args),
            _ => Err(TemplateError::new(
                format!("unknown filter: {}", name),
                TemplateErrorKind::UnknownFilter,
            )),
        }
    }

    // =========================================================================
    // Functions
    // =========================================================================

    /// current_date(format) - local time rendered with a strftime format
    fn fn_current_date(&self, args: Vec<Value>) -> Result<Value, TemplateError> {
        let format = match args.first() {
            Some(value) => value.as_string(),
            None => DEFAULT_DATE_FORMAT.to_string(),
        };

        let mut rendered = String::new();
        write!(rendered, "{}", chrono::Local::now().format(&format)).map_err(|_| {
            TemplateError::evaluation(format!("current_date: invalid format '{}'", format))
        })?;
        Ok(Value::String(rendered))
    }

    /// range(end) or range(start, end)
    fn fn_range(&self, args: Vec<Value>) -> Result<Value, TemplateError> {
        let bounds: Vec<i64> = args
            .iter()
            .map(|a| {
                let bound = match a {
                    Value::Integer(i) => Some(*i),
                    other => other.as_number().map(|n| n as i64),
                };
                bound.ok_or_else(|| {
                    TemplateError::evaluation(format!(
                        "range: expected number, found {}",
                        a.type_name()
                    ))
                })
            })
            .collect::<Result<_, _>>()?;

        let (start, end) = match bounds.as_slice() {
            [end] => (0, *end),
            [start, end] => (*start, *end),
            _ => {
                return Err(TemplateError::evaluation(format!(
                    "range: expected 1 or 2 arguments, got {}",
                    args.len()
                )))
            }
        };

        if end.saturating_sub(start) > MAX_RANGE_LEN {
            return Err(TemplateError::evaluation(format!(
                "range: {}..{} exceeds the limit of {} items",
                start, end, MAX_RANGE_LEN
            )));
        }

        Ok(Value::Array((start..end).map(Value::from).collect()))
    }

    // =========================================================================
    // Filters
    // =========================================================================

    fn filter_join(&self, input: Value, args: Vec<Value>) -> Result<Value, TemplateError> {
        let separator = args.first().map(Value::as_string).unwrap_or_default();
        match input {
            Value::Array(items) => Ok(Value::String(
                items
                    .iter()
                    .map(Value::as_string)
                    .collect::<Vec<_>>()
                    .join(&separator),
            )),
            Value::String(s) => Ok(Value::String(s)),
            other => Err(TemplateError::evaluation(format!(
                "join: expected list, found {}",
                other.type_name()
            ))),
        }
    }

    fn filter_length(&self, input: Value) -> Result<Value, TemplateError> {
        let length = match &input {
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            Value::Null => 0,
            other => {
                return Err(TemplateError::evaluation(format!(
                    "length: unsupported type {}",
                    other.type_name()
                )))
            }
        };
        Ok(Value::Integer(length as i64))
    }

    fn filter_replace(&self, input: Value, args: Vec<Value>) -> Result<Value, TemplateError> {
        let [from, to] = args.as_slice() else {
            return Err(TemplateError::evaluation(format!(
                "replace: expected 2 arguments, got {}",
                args.len()
            )));
        };
        Ok(Value::String(
            input.as_string().replace(&from.as_string(), &to.as_string()),
        ))
    }
}

/// SQL literal: strings single-quoted with doubled quotes, lists comma-joined
fn quote(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Integer(_) | Value::Number(_) | Value::Bool(_) => value.as_string(),
        Value::Array(items) => items.iter().map(quote).collect::<Vec<_>>().join(", "),
        other => format!("'{}'", other.as_string().replace('\'', "''")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_date_default_format() {
        let value = Builtins::new().call("current_date", vec![]).unwrap();
        let text = value.as_string();
        assert_eq!(text.len(), 10);
        assert!(chrono::NaiveDate::parse_from_str(&text, "%Y-%m-%d").is_ok());
    }

    #[test]
    fn test_current_date_custom_format() {
        let value = Builtins::new()
            .call("current_date", vec![Value::from("%Y")])
            .unwrap();
        assert_eq!(value.as_string().len(), 4);
    }

    #[test]
    fn test_range() {
        let builtins = Builtins::new();
        assert_eq!(
            builtins.call("range", vec![Value::from(3i64)]).unwrap(),
            Value::from(vec![0i64, 1, 2])
        );
        assert_eq!(
            builtins
                .call("range", vec![Value::from(2i64), Value::from(4i64)])
                .unwrap(),
            Value::from(vec![2i64, 3])
        );
    }

    #[test]
    fn test_range_is_capped() {
        let builtins = Builtins::new();
        let err = builtins
            .call("range", vec![Value::number(1e12)])
            .unwrap_err();
        assert!(err.message.contains("exceeds the limit"));

        let at_limit = builtins.call("range", vec![Value::from(MAX_RANGE_LEN)]).unwrap();
        assert_eq!(at_limit.as_array().map(<[Value]>::len), Some(MAX_RANGE_LEN as usize));
        assert_eq!(
            builtins.call("range", vec![Value::from(5i64), Value::from(2i64)]).unwrap(),
            Value::Array(Vec::new())
        );
    }

    #[test]
    fn test_unknown_function() {
        let err = Builtins::new().call("now", vec![]).unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::UnknownFunction);
    }

    #[test]
    fn test_join_and_quote() {
        let builtins = Builtins::new();
        let regions = Value::from(vec!["us", "o'hare"]);
        assert_eq!(
            builtins
                .filter("join", regions.clone(), vec![Value::from("|")])
                .unwrap(),
            Value::from("us|o'hare")
        );
        assert_eq!(
            builtins.filter("quote", regions, vec![]).unwrap(),
            Value::from("'us', 'o''hare'")
        );
    }

    #[test]
    fn test_default_replaces_null_only() {
        let builtins = Builtins::new();
        assert_eq!(
            builtins
                .filter("default", Value::Null, vec![Value::from("x")])
                .unwrap(),
            Value::from("x")
        );
        assert_eq!(
            builtins
                .filter("default", Value::from(""), vec![Value::from("x")])
                .unwrap(),
            Value::from("")
        );
    }

    #[test]
    fn test_length_and_replace() {
        let builtins = Builtins::new();
        assert_eq!(
            builtins.filter("length", Value::from(vec![1i64, 2]), vec![]).unwrap(),
            Value::Integer(2)
        );
        assert_eq!(
            builtins
                .filter(
                    "replace",
                    Value::from("a-b"),
                    vec![Value::from("-"), Value::from("_")]
                )
                .unwrap(),
            Value::from("a_b")
        );
    }
}
