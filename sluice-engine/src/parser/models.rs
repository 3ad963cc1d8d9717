// Pipeline Definition Models
// Serde models for pipeline files and the runtime value type shared by the engine

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Pipeline File
// =============================================================================

/// Root of a pipeline file: default arguments plus the ordered node table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDefinition {
    /// Default template arguments inherited by every mode
    #[serde(default)]
    pub arguments: HashMap<String, serde_yaml::Value>,

    /// Node definitions in declaration order
    #[serde(default)]
    pub etl: NodeTable,
}

/// Ordered `name -> node` table; declaration order drives scheduling ties
#[derive(Debug, Clone, Default)]
pub struct NodeTable(pub Vec<(String, NodeConfig)>);

impl NodeTable {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, NodeConfig)> {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for NodeTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NodeTableVisitor;

        impl<'de> Visitor<'de> for NodeTableVisitor {
            type Value = NodeTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of node names to node definitions")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(NodeTable::default())
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut nodes: Vec<(String, NodeConfig)> = Vec::new();
                while let Some((name, node)) = map.next_entry::<String, NodeConfig>()? {
                    if nodes.iter().any(|(existing, _)| existing == &name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate node name `{}`",
                            name
                        )));
                    }
                    nodes.push((name, node));
                }
                Ok(NodeTable(nodes))
            }
        }

        deserializer.deserialize_any(NodeTableVisitor)
    }
}

/// A single node definition as written in the pipeline file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Free-form classification (table, view, export, ...)
    #[serde(default)]
    pub manifest: Option<String>,

    /// Schema qualifier used to build `this`
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Opaque field descriptions, passed through untouched
    #[serde(default)]
    pub fields: Option<serde_yaml::Value>,

    /// Opaque metadata, passed through untouched
    #[serde(default)]
    pub meta: Option<serde_yaml::Value>,

    /// Materialization mode
    #[serde(default)]
    pub run: Option<ModeConfig>,

    /// Extraction mode
    #[serde(default)]
    pub save: Option<ModeConfig>,
}

fn default_schema() -> String {
    "public".to_string()
}

/// Mode configuration shared by all mode kinds; kind-specific rules are
/// enforced when the mode is built
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModeConfig {
    /// Inline statement template
    #[serde(default, alias = "template")]
    pub query: Option<String>,

    /// Path to a script whose content becomes the template
    #[serde(default)]
    pub script: Option<String>,

    /// Names of nodes this mode depends on
    #[serde(default)]
    pub depends_on: Option<Vec<String>>,

    /// Statement-wrapping method (seed, replace, truncate, ...)
    #[serde(default)]
    pub method: Option<String>,

    /// Variant definitions (extraction only)
    #[serde(default)]
    pub variants: Option<Vec<VariantConfig>>,

    /// Result columns published to the execution context
    #[serde(default)]
    pub outputs: Option<Vec<String>>,

    /// Whether declared outputs are stored
    #[serde(default)]
    pub store_results: bool,

    /// Persistence format (extraction only)
    #[serde(default)]
    pub format: Option<OutputFormat>,

    #[serde(default)]
    pub meta: Option<serde_yaml::Value>,
}

/// Variant definition as written in the pipeline file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantConfig {
    /// Artifact name template
    pub name: String,

    /// Argument templates rendered per instance
    #[serde(default)]
    pub arguments: BTreeMap<String, serde_yaml::Value>,

    /// Iteration profile source per parameter
    #[serde(default)]
    pub iterate_on: Option<BTreeMap<String, IterationSource>>,
}

/// Source of the value sequence for one iteration parameter
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IterationSource {
    /// Literal sequence written in the pipeline file
    Values(Vec<serde_yaml::Value>),
    /// Template rendered then parsed into a sequence
    Expression(String),
}

/// Structured serialization format for persisted results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
    Jsonl,
}

impl OutputFormat {
    /// File extension used for persisted artifacts
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Jsonl => "jsonl",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "ndjson" => Ok(OutputFormat::Jsonl),
            _ => Err(format!(
                "Unknown output format '{}'. Valid formats: csv, json, jsonl",
                s
            )),
        }
    }
}

// =============================================================================
// Runtime Values
// =============================================================================

/// Variables available to template rendering
pub type Variables = HashMap<String, Value>;

/// Dynamic value used by templates, execution context and tabular results
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    /// Whole numbers, kept exact (ids above 2^53 must not round)
    Integer(i64),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Build a number, preferring the exact integer form for whole values
    pub fn number(n: f64) -> Value {
        if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
            Value::Integer(n as i64)
        } else {
            Value::Number(n)
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Number(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) | Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "list",
            Value::Object(_) => "mapping",
        }
    }

    /// Text form used when a value is substituted into a template
    pub fn as_string(&self) -> String {
        match self {
            Value::Null => "".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => self.to_json(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::Value::from(self).to_string()
    }

    /// Convert a YAML value from a pipeline file
    pub fn from_yaml(yaml: &serde_yaml::Value) -> Value {
        match yaml {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(*b),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Number(n.as_f64().unwrap_or(0.0)),
            },
            serde_yaml::Value::String(s) => Value::String(s.clone()),
            serde_yaml::Value::Sequence(seq) => {
                Value::Array(seq.iter().map(Value::from_yaml).collect())
            }
            serde_yaml::Value::Mapping(map) => Value::Object(
                map.iter()
                    .filter_map(|(k, v)| {
                        yaml_key(k).map(|key| (key, Value::from_yaml(v)))
                    })
                    .collect(),
            ),
            serde_yaml::Value::Tagged(tagged) => Value::from_yaml(&tagged.value),
        }
    }
}

fn yaml_key(key: &serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        (n as i64).to_string()
    } else {
        n.to_string()
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Number(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

// Integers and floats compare by numeric value, so `1 == 1.0` in templates
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Integer(i), Value::Number(n)) | (Value::Number(n), Value::Integer(i)) => {
                n.fract() == 0.0 && *i as f64 == *n && (*n as i64) == *i
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_as_string() {
        assert_eq!(Value::Null.as_string(), "");
        assert_eq!(Value::Number(3.0).as_string(), "3");
        assert_eq!(Value::Number(2.5).as_string(), "2.5");
        assert_eq!(Value::from("us").as_string(), "us");
        assert_eq!(Value::from(vec!["us", "eu"]).as_string(), r#"["us","eu"]"#);
    }

    #[test]
    fn test_large_integers_survive_json() {
        let json: serde_json::Value = serde_json::from_str(r#"{"id": 1234567890123456789}"#).unwrap();
        let value = Value::from(json);
        assert_eq!(value.as_string(), r#"{"id":1234567890123456789}"#);

        let Value::Object(map) = value else {
            panic!("expected mapping");
        };
        assert_eq!(map["id"], Value::Integer(1234567890123456789));
        assert_eq!(map["id"].as_string(), "1234567890123456789");
        assert_eq!(
            serde_json::Value::from(&map["id"]),
            serde_json::json!(1234567890123456789i64)
        );
    }

    #[test]
    fn test_integer_equals_whole_float() {
        assert_eq!(Value::Integer(3), Value::Number(3.0));
        assert_ne!(Value::Integer(3), Value::Number(3.5));
        assert_eq!(Value::number(4.0), Value::Integer(4));
        assert!(matches!(Value::number(0.25), Value::Number(_)));
    }

    #[test]
    fn test_value_is_truthy() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::Number(1.0).is_truthy());
        assert!(!Value::Array(Vec::new()).is_truthy());
    }

    #[test]
    fn test_from_yaml_mapping() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("{a: 1, b: [x, true]}").unwrap();
        let value = Value::from_yaml(&yaml);
        let Value::Object(map) = value else {
            panic!("expected mapping");
        };
        assert_eq!(map.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(
            map.get("b"),
            Some(&Value::Array(vec![Value::from("x"), Value::Bool(true)]))
        );
    }

    #[test]
    fn test_node_table_preserves_declaration_order() {
        let yaml = r#"
etl:
  zeta:
    run:
      query: select 1
  alpha:
    run:
      query: select 2
"#;
        let definition: PipelineDefinition = serde_yaml::from_str(yaml).unwrap();
        let names: Vec<_> = definition.etl.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_iteration_source_variants() {
        let yaml = r#"
name: "orders_{{region}}"
iterate_on:
  region: [us, eu]
  code: "{{ codes }}"
"#;
        let variant: VariantConfig = serde_yaml::from_str(yaml).unwrap();
        let iterate_on = variant.iterate_on.unwrap();
        assert!(matches!(iterate_on["region"], IterationSource::Values(ref v) if v.len() == 2));
        assert_eq!(
            iterate_on["code"],
            IterationSource::Expression("{{ codes }}".to_string())
        );
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("CSV".parse::<OutputFormat>(), Ok(OutputFormat::Csv));
        assert_eq!("ndjson".parse::<OutputFormat>(), Ok(OutputFormat::Jsonl));
        assert!("parquet".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_unknown_mode_field_rejected() {
        let yaml = r#"
etl:
  orders:
    run:
      query: select 1
      filetype: csv
"#;
        assert!(serde_yaml::from_str::<PipelineDefinition>(yaml).is_err());
    }
}
