// Variant Expansion
// Expands one mode template into a family of named artifacts

use crate::dag::{IterationSpec, ModeKind, Variant};
use crate::execution::compiler::{Artifact, CompileError, RenderScope};
use crate::execution::context::OverrideAccumulator;
use crate::parser::models::{Value, Variables};
use crate::template::TemplateEngine;

use std::collections::BTreeMap;

/// One zipped element of an iteration spec: parameter -> value
pub type IterationProfile = BTreeMap<String, Value>;

/// Expands the variants of one node/mode
pub struct VariantExpander<'a> {
    engine: &'a TemplateEngine,
    node: &'a str,
    mode: ModeKind,
}

impl<'a> VariantExpander<'a> {
    pub fn new(engine: &'a TemplateEngine, node: &'a str, mode: ModeKind) -> Self {
        Self { engine, node, mode }
    }

    /// Render `template` once per variant instance.
    ///
    /// Arguments and iteration values merged into `overrides` stay there for
    /// later variants and nodes. Context entries shadowed by an override are
    /// hidden from every render here.
    pub fn expand(
        &self,
        template: &str,
        variants: &[Variant],
        scope: &RenderScope<'_>,
        overrides: &mut OverrideAccumulator,
    ) -> Result<Vec<Artifact>, CompileError> {
        let mut artifacts = Vec::new();
        for variant in variants {
            match &variant.iterate_on {
                Some(spec) if !spec.is_empty() => {
                    let profiles = self.resolve_profiles(variant, spec, scope, overrides)?;
                    for profile in profiles {
                        artifacts.push(self.expand_profile(template, variant, profile, scope, overrides)?);
                    }
                }
                _ => artifacts.push(self.expand_direct(template, variant, scope, overrides)?),
            }
        }
        Ok(artifacts)
    }

    fn expand_direct(
        &self,
        template: &str,
        variant: &Variant,
        scope: &RenderScope<'_>,
        overrides: &mut OverrideAccumulator,
    ) -> Result<Artifact, CompileError> {
        let arguments = self.render_arguments(variant, &scope.build(overrides.values(), true))?;
        overrides.absorb(arguments);
        self.render_artifact(template, variant, scope, overrides)
    }

    fn expand_profile(
        &self,
        template: &str,
        variant: &Variant,
        profile: IterationProfile,
        scope: &RenderScope<'_>,
        overrides: &mut OverrideAccumulator,
    ) -> Result<Artifact, CompileError> {
        let mut with_profile = overrides.values().clone();
        with_profile.extend(profile.iter().map(|(k, v)| (k.clone(), v.clone())));

        let arguments = self.render_arguments(variant, &scope.build(&with_profile, true))?;
        overrides.absorb(profile);
        overrides.absorb(arguments);
        self.render_artifact(template, variant, scope, overrides)
    }

    fn render_artifact(
        &self,
        template: &str,
        variant: &Variant,
        scope: &RenderScope<'_>,
        overrides: &OverrideAccumulator,
    ) -> Result<Artifact, CompileError> {
        let vars = scope.build(overrides.values(), true);
        let name = self.render(&variant.name, &vars)?;
        let text = self.render(template, &vars)?;
        tracing::debug!(node = self.node, mode = %self.mode, variant = %name, "expanded variant");
        Ok(Artifact { name, text })
    }

    /// Resolve every parameter to a concrete sequence and zip them. Fails
    /// before anything is rendered when the lengths differ.
    fn resolve_profiles(
        &self,
        variant: &Variant,
        spec: &BTreeMap<String, IterationSpec>,
        scope: &RenderScope<'_>,
        overrides: &OverrideAccumulator,
    ) -> Result<Vec<IterationProfile>, CompileError> {
        let vars = scope.build(overrides.values(), true);
        let mut sequences: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
        for (parameter, source) in spec {
            let values = match source {
                IterationSpec::Values(values) => values.clone(),
                IterationSpec::Template(text) => {
                    let rendered = self.render(text, &vars)?;
                    self.parse_sequence(variant, parameter, &rendered)?
                }
            };
            sequences.insert(parameter, values);
        }

        let mut lengths = sequences.values().map(Vec::len);
        let len = lengths.next().unwrap_or(0);
        if lengths.any(|other| other != len) {
            return Err(CompileError::VariantLengthMismatch {
                node: self.node.to_string(),
                mode: self.mode,
                variant: variant.name.clone(),
                lengths: sequences
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.len()))
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        Ok((0..len)
            .map(|i| {
                sequences
                    .iter()
                    .map(|(parameter, values)| (parameter.to_string(), values[i].clone()))
                    .collect()
            })
            .collect())
    }

    fn parse_sequence(
        &self,
        variant: &Variant,
        parameter: &str,
        rendered: &str,
    ) -> Result<Vec<Value>, CompileError> {
        let not_a_sequence = |message: String| CompileError::NotASequence {
            node: self.node.to_string(),
            mode: self.mode,
            variant: variant.name.clone(),
            parameter: parameter.to_string(),
            message,
        };

        match serde_yaml::from_str::<serde_yaml::Value>(rendered) {
            Ok(serde_yaml::Value::Sequence(items)) => Ok(items.iter().map(Value::from_yaml).collect()),
            Ok(other) => Err(not_a_sequence(format!(
                "rendered to {}",
                Value::from_yaml(&other).type_name()
            ))),
            Err(e) => Err(not_a_sequence(e.to_string())),
        }
    }

    /// String arguments are templates; other values pass through
    fn render_arguments(
        &self,
        variant: &Variant,
        vars: &Variables,
    ) -> Result<Vec<(String, Value)>, CompileError> {
        variant
            .arguments
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(text) => Value::String(self.render(text, vars)?),
                    other => other.clone(),
                };
                Ok((key.clone(), rendered))
            })
            .collect()
    }

    fn render(&self, text: &str, vars: &Variables) -> Result<String, CompileError> {
        self.engine
            .render(text, vars)
            .map_err(|source| CompileError::Render {
                node: self.node.to_string(),
                mode: self.mode,
                source,
            })
    }
}
