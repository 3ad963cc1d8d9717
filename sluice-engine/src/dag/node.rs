// DAG Nodes and Modes
// Typed node/mode model built from validated pipeline configuration

use crate::parser::models::{
    IterationSource, ModeConfig, NodeConfig, OutputFormat, Value, VariantConfig, Variables,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Recognised mode kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeKind {
    /// Materialize the node inside the database
    Run,
    /// Extract the node's rows and persist them
    Save,
}

impl ModeKind {
    pub const ALL: [ModeKind; 2] = [ModeKind::Run, ModeKind::Save];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModeKind::Run => "run",
            ModeKind::Save => "save",
        }
    }

    /// Whether executed results are handed to a sink
    pub fn persists_results(&self) -> bool {
        matches!(self, ModeKind::Save)
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "run" => Ok(ModeKind::Run),
            "save" => Ok(ModeKind::Save),
            _ => Err(format!("Unknown mode '{}'. Valid modes: run, save", s)),
        }
    }
}

/// How a node participates in the schedule of one mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyState<'a> {
    /// Mode declared with a non-empty dependency list
    WithDependencies(&'a [String]),
    /// Mode declared without dependencies
    NoDependencies,
    /// Mode not declared; the node is a pass-through root for this mode
    NotDeclared,
}

impl<'a> DependencyState<'a> {
    pub fn dependencies(&self) -> &'a [String] {
        match self {
            DependencyState::WithDependencies(deps) => deps,
            _ => &[],
        }
    }
}

/// Where a mode's template text comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Inline(String),
    /// Script path, resolved relative to the project root
    Script(String),
}

/// Value sequence for one iteration parameter
#[derive(Debug, Clone, PartialEq)]
pub enum IterationSpec {
    Values(Vec<Value>),
    /// Rendered, then parsed as a YAML/JSON sequence
    Template(String),
}

/// A parametrized sub-definition producing one or more artifacts
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// Artifact name template
    pub name: String,
    /// Argument templates; string values are rendered, others pass through
    pub arguments: BTreeMap<String, Value>,
    /// Zipped iteration profile
    pub iterate_on: Option<BTreeMap<String, IterationSpec>>,
}

impl Variant {
    fn from_config(config: &VariantConfig) -> Self {
        Self {
            name: config.name.clone(),
            arguments: config
                .arguments
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_yaml(v)))
                .collect(),
            iterate_on: config.iterate_on.as_ref().map(|profile| {
                profile
                    .iter()
                    .map(|(param, source)| {
                        let spec = match source {
                            IterationSource::Values(values) => {
                                IterationSpec::Values(values.iter().map(Value::from_yaml).collect())
                            }
                            IterationSource::Expression(template) => {
                                IterationSpec::Template(template.clone())
                            }
                        };
                        (param.clone(), spec)
                    })
                    .collect()
            }),
        }
    }
}

/// A per-node unit of work for one purpose
#[derive(Debug, Clone)]
pub struct Mode {
    pub kind: ModeKind,
    pub source: Option<TemplateSource>,
    pub depends_on: Option<Vec<String>>,
    /// Statement-wrapping method name
    pub method: Option<String>,
    pub variants: Vec<Variant>,
    /// Result columns published to the execution context
    pub outputs: Vec<String>,
    pub store_results: bool,
    pub format: OutputFormat,
    pub meta: Option<serde_yaml::Value>,
    /// Pipeline arguments, lowest precedence at compile time
    pub defaults: Variables,
    last_compiled: Option<String>,
}

impl Mode {
    /// Build from configuration that already passed `PipelineValidator`
    pub fn from_config(kind: ModeKind, config: &ModeConfig, defaults: &Variables) -> Self {
        let source = match (&config.query, &config.script) {
            (Some(query), _) => Some(TemplateSource::Inline(query.clone())),
            (None, Some(script)) => Some(TemplateSource::Script(script.clone())),
            (None, None) => None,
        };

        Self {
            kind,
            source,
            depends_on: config.depends_on.clone(),
            method: config.method.clone(),
            variants: config
                .variants
                .iter()
                .flatten()
                .map(Variant::from_config)
                .collect(),
            outputs: config.outputs.clone().unwrap_or_default(),
            store_results: config.store_results,
            format: config.format.unwrap_or_default(),
            meta: config.meta.clone(),
            defaults: defaults.clone(),
            last_compiled: None,
        }
    }

    /// Bare mode with an inline template, mostly for programmatic DAGs
    pub fn inline(kind: ModeKind, template: impl Into<String>) -> Self {
        Self {
            kind,
            source: Some(TemplateSource::Inline(template.into())),
            depends_on: None,
            method: None,
            variants: Vec::new(),
            outputs: Vec::new(),
            store_results: false,
            format: OutputFormat::default(),
            meta: None,
            defaults: Variables::new(),
            last_compiled: None,
        }
    }

    pub fn with_depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = Some(deps.iter().map(|d| d.to_string()).collect());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|o| o.to_string()).collect();
        self.store_results = true;
        self
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variants.push(variant);
        self
    }

    pub fn dependency_state(&self) -> DependencyState<'_> {
        match &self.depends_on {
            Some(deps) if !deps.is_empty() => DependencyState::WithDependencies(deps),
            _ => DependencyState::NoDependencies,
        }
    }

    /// Whether there is template text to compile
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn has_variants(&self) -> bool {
        !self.variants.is_empty()
    }

    /// Text produced by the most recent compile of this mode
    pub fn last_compiled(&self) -> Option<&str> {
        self.last_compiled.as_deref()
    }

    pub(crate) fn set_last_compiled(&mut self, text: String) {
        self.last_compiled = Some(text);
    }
}

/// A named graph vertex
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub manifest: Option<String>,
    /// Schema qualifier; empty means unqualified
    pub schema: String,
    pub fields: Option<serde_yaml::Value>,
    pub meta: Option<serde_yaml::Value>,
    modes: BTreeMap<ModeKind, Mode>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            manifest: None,
            schema: "public".to_string(),
            fields: None,
            meta: None,
            modes: BTreeMap::new(),
        }
    }

    pub fn from_config(name: &str, config: &NodeConfig, defaults: &Variables) -> Self {
        let mut node = Self {
            name: name.to_string(),
            manifest: config.manifest.clone(),
            schema: config.schema.clone(),
            fields: config.fields.clone(),
            meta: config.meta.clone(),
            modes: BTreeMap::new(),
        };
        if let Some(run) = &config.run {
            node.modes
                .insert(ModeKind::Run, Mode::from_config(ModeKind::Run, run, defaults));
        }
        if let Some(save) = &config.save {
            node.modes
                .insert(ModeKind::Save, Mode::from_config(ModeKind::Save, save, defaults));
        }
        node
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.modes.insert(mode.kind, mode);
        self
    }

    pub fn mode(&self, kind: ModeKind) -> Option<&Mode> {
        self.modes.get(&kind)
    }

    pub fn mode_mut(&mut self, kind: ModeKind) -> Option<&mut Mode> {
        self.modes.get_mut(&kind)
    }

    pub fn modes(&self) -> impl Iterator<Item = &Mode> {
        self.modes.values()
    }

    pub fn modes_mut(&mut self) -> impl Iterator<Item = &mut Mode> {
        self.modes.values_mut()
    }

    pub fn dependency_state(&self, kind: ModeKind) -> DependencyState<'_> {
        match self.mode(kind) {
            Some(mode) => mode.dependency_state(),
            None => DependencyState::NotDeclared,
        }
    }

    /// Identifier bound to `this` in templates
    pub fn target(&self) -> String {
        if self.schema.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.schema, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PipelineParser;

    #[test]
    fn test_mode_kind_from_str() {
        assert_eq!("RUN".parse::<ModeKind>(), Ok(ModeKind::Run));
        assert_eq!("save".parse::<ModeKind>(), Ok(ModeKind::Save));
        assert!("clean".parse::<ModeKind>().is_err());
    }

    #[test]
    fn test_dependency_state_tri_state() {
        let node = Node::new("a")
            .with_mode(Mode::inline(ModeKind::Run, "select 1").with_depends_on(&["b"]))
            .with_mode(Mode::inline(ModeKind::Save, "select 2"));

        assert!(matches!(
            node.dependency_state(ModeKind::Run),
            DependencyState::WithDependencies(deps) if deps == ["b".to_string()]
        ));
        assert_eq!(node.dependency_state(ModeKind::Save), DependencyState::NoDependencies);
        assert_eq!(Node::new("c").dependency_state(ModeKind::Run), DependencyState::NotDeclared);
    }

    #[test]
    fn test_empty_depends_on_is_no_dependencies() {
        let mode = Mode::inline(ModeKind::Run, "select 1").with_depends_on(&[]);
        assert_eq!(mode.dependency_state(), DependencyState::NoDependencies);
    }

    #[test]
    fn test_target_respects_empty_schema() {
        assert_eq!(Node::new("orders").target(), "public.orders");
        assert_eq!(Node::new("orders").with_schema("").target(), "orders");
    }

    #[test]
    fn test_node_from_config() {
        let yaml = r#"
arguments:
  region: us
etl:
  orders:
    schema: sales
    save:
      script: sql/orders.sql
      format: json
      variants:
        - name: "orders_{{ region }}"
          iterate_on:
            region: [us, eu]
"#;
        let definition = PipelineParser::parse(yaml).unwrap();
        let defaults: Variables = definition
            .arguments
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_yaml(v)))
            .collect();
        let (name, config) = &definition.etl.0[0];
        let node = Node::from_config(name, config, &defaults);

        assert!(node.mode(ModeKind::Run).is_none());
        let save = node.mode(ModeKind::Save).unwrap();
        assert_eq!(save.source, Some(TemplateSource::Script("sql/orders.sql".to_string())));
        assert_eq!(save.format, OutputFormat::Json);
        assert_eq!(save.defaults.get("region"), Some(&Value::from("us")));

        let iterate_on = save.variants[0].iterate_on.as_ref().unwrap();
        assert_eq!(
            iterate_on["region"],
            IterationSpec::Values(vec![Value::from("us"), Value::from("eu")])
        );
    }
}
