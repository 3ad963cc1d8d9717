// Execution Context
// Run-scoped state: published node outputs and accumulated variant overrides

use crate::execution::executor::ExecutionError;
use crate::parser::models::{Value, Variables};

use std::collections::{BTreeMap, BTreeSet};

/// Append-only mapping of output name to the values a node produced.
///
/// Owned by a single compile or execute call and discarded afterwards.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Output name -> published values
    values: BTreeMap<String, Value>,

    /// Output name -> node that published it
    producers: BTreeMap<String, String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value` under `output`. An output can be published once per
    /// run; a second attempt fails and leaves the first value in place.
    pub fn record(
        &mut self,
        node: &str,
        output: &str,
        value: Value,
    ) -> Result<(), ExecutionError> {
        if let Some(first) = self.producers.get(output) {
            return Err(ExecutionError::DuplicateOutput {
                output: output.to_string(),
                node: node.to_string(),
                first: first.clone(),
            });
        }

        tracing::debug!(node, output, "recording output");
        self.producers.insert(output.to_string(), node.to_string());
        self.values.insert(output.to_string(), value);
        Ok(())
    }

    pub fn get(&self, output: &str) -> Option<&Value> {
        self.values.get(output)
    }

    pub fn contains(&self, output: &str) -> bool {
        self.values.contains_key(output)
    }

    /// Node that published `output`
    pub fn producer(&self, output: &str) -> Option<&str> {
        self.producers.get(output).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Snapshot as template variables
    pub fn variables(&self) -> Variables {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Caller overrides plus everything variant expansion has merged into them.
///
/// Values merged by one variant stay visible to every later variant and node
/// of the same run. `leaked_keys` lists what was added on top of the caller's
/// own overrides.
#[derive(Debug, Clone, Default)]
pub struct OverrideAccumulator {
    values: Variables,
    seeded: BTreeSet<String>,
    leaked: BTreeSet<String>,
}

impl OverrideAccumulator {
    pub fn new(overrides: Variables) -> Self {
        let seeded = overrides.keys().cloned().collect();
        Self {
            values: overrides,
            seeded,
            leaked: BTreeSet::new(),
        }
    }

    /// Merge `entries`, replacing existing keys
    pub fn absorb<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        for (key, value) in entries {
            if !self.seeded.contains(&key) {
                self.leaked.insert(key.clone());
            }
            self.values.insert(key, value);
        }
    }

    /// Merge the values another accumulator picked up beyond its seed
    pub fn absorb_leaked(&mut self, other: &OverrideAccumulator) {
        let entries: Vec<(String, Value)> = other
            .leaked
            .iter()
            .filter_map(|key| other.values.get(key).map(|v| (key.clone(), v.clone())))
            .collect();
        self.absorb(entries);
    }

    pub fn values(&self) -> &Variables {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Keys merged by variant expansion, sorted
    pub fn leaked_keys(&self) -> Vec<&str> {
        self.leaked.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_output_keeps_first_value() {
        let mut context = ExecutionContext::new();
        context
            .record("dates", "day", Value::from(vec!["2024-01-01"]))
            .unwrap();

        let err = context
            .record("other_dates", "day", Value::from(vec!["1999-12-31"]))
            .unwrap_err();

        match err {
            ExecutionError::DuplicateOutput { output, node, first } => {
                assert_eq!(output, "day");
                assert_eq!(node, "other_dates");
                assert_eq!(first, "dates");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(context.get("day"), Some(&Value::from(vec!["2024-01-01"])));
        assert_eq!(context.producer("day"), Some("dates"));
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn test_context_variables_snapshot() {
        let mut context = ExecutionContext::new();
        context.record("regions", "region", Value::from(vec!["us", "eu"])).unwrap();

        let vars = context.variables();
        assert_eq!(vars.get("region"), Some(&Value::from(vec!["us", "eu"])));
    }

    #[test]
    fn test_accumulator_tracks_leaked_keys() {
        let mut seed = Variables::new();
        seed.insert("start".to_string(), Value::from("2024-01-01"));

        let mut overrides = OverrideAccumulator::new(seed);
        overrides.absorb([
            ("region".to_string(), Value::from("us")),
            ("start".to_string(), Value::from("2024-02-01")),
        ]);

        assert_eq!(overrides.leaked_keys(), vec!["region"]);
        assert_eq!(overrides.get("start"), Some(&Value::from("2024-02-01")));
    }

    #[test]
    fn test_absorb_leaked_from_sibling() {
        let base = OverrideAccumulator::new(Variables::new());
        let mut sibling = base.clone();
        sibling.absorb([("region".to_string(), Value::from("eu"))]);

        let mut merged = base;
        merged.absorb_leaked(&sibling);
        assert_eq!(merged.get("region"), Some(&Value::from("eu")));
        assert_eq!(merged.leaked_keys(), vec!["region"]);
    }
}
