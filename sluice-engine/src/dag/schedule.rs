// Topological Scheduler
// Layered execution order per mode, with start-node slicing and table filtering

use crate::dag::graph::{Dag, GraphError};
use crate::dag::node::{DependencyState, ModeKind};

use std::collections::HashSet;

/// Which part of a schedule to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Run from this node onwards; `.`/`all` mean the whole schedule
    pub start: Option<String>,
    /// Only run these nodes; unknown names are ignored
    pub tables: Option<Vec<String>>,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn starting_at(start: impl Into<String>) -> Self {
        Self {
            start: Some(start.into()),
            tables: None,
        }
    }

    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    /// Start node, ignoring the whole-schedule markers
    fn effective_start(&self) -> Option<&str> {
        match self.start.as_deref() {
            None | Some(".") | Some("all") => None,
            Some(start) => Some(start),
        }
    }

    pub fn is_everything(&self) -> bool {
        self.effective_start().is_none() && self.tables.is_none()
    }
}

impl Dag {
    /// Dependency-satisfied layers for `mode`, every node included.
    /// Each layer keeps declaration order.
    pub fn layers(&self, mode: ModeKind) -> Result<Vec<Vec<String>>, GraphError> {
        kahn_layers(mode, &self.dependency_states(mode))
    }

    /// Execution order for `mode`: layers flattened, nodes without a template
    /// or script for the mode dropped
    pub fn schedule(&self, mode: ModeKind) -> Result<Vec<String>, GraphError> {
        Ok(self.schedule_layers(mode)?.into_iter().flatten().collect())
    }

    /// Layers restricted to nodes that have something to compile
    pub fn schedule_layers(&self, mode: ModeKind) -> Result<Vec<Vec<String>>, GraphError> {
        let layers = self
            .layers(mode)?
            .into_iter()
            .map(|layer| {
                layer
                    .into_iter()
                    .filter(|name| self.is_compilable(name, mode))
                    .collect::<Vec<_>>()
            })
            .filter(|layer| !layer.is_empty())
            .collect();
        Ok(layers)
    }

    /// Layers after applying a start node and table filter
    pub fn plan(&self, mode: ModeKind, selection: &Selection) -> Result<Vec<Vec<String>>, GraphError> {
        let layers = self.schedule_layers(mode)?;
        if selection.is_everything() {
            return Ok(layers);
        }

        let order: Vec<&String> = layers.iter().flatten().collect();
        let mut selected: HashSet<&str> = match selection.effective_start() {
            Some(start) => {
                if !self.contains(start) {
                    return Err(GraphError::NodeNotFound(start.to_string()));
                }
                let index = order.iter().position(|n| n.as_str() == start).ok_or_else(|| {
                    GraphError::StartNotScheduled {
                        node: start.to_string(),
                        mode,
                    }
                })?;
                order[index..].iter().map(|n| n.as_str()).collect()
            }
            None => order.iter().map(|n| n.as_str()).collect(),
        };

        if let Some(tables) = &selection.tables {
            let allowed: HashSet<&str> = tables.iter().map(String::as_str).collect();
            selected.retain(|n| allowed.contains(n));
        }

        Ok(layers
            .iter()
            .map(|layer| {
                layer
                    .iter()
                    .filter(|n| selected.contains(n.as_str()))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .filter(|layer| !layer.is_empty())
            .collect())
    }

    fn is_compilable(&self, name: &str, mode: ModeKind) -> bool {
        self.node(name)
            .and_then(|n| n.mode(mode))
            .is_some_and(|m| m.has_source())
    }
}

/// Layered Kahn scan: each pass admits the nodes whose whole dependency list
/// was admitted by earlier passes. A pass admitting nothing is a stall.
fn kahn_layers(
    mode: ModeKind,
    states: &[(&str, DependencyState<'_>)],
) -> Result<Vec<Vec<String>>, GraphError> {
    let mut admitted: HashSet<&str> = HashSet::with_capacity(states.len());
    let mut remaining: Vec<&(&str, DependencyState<'_>)> = states.iter().collect();
    let mut layers = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (
            Vec<&(&str, DependencyState<'_>)>,
            Vec<&(&str, DependencyState<'_>)>,
        ) = remaining.into_iter().partition(|(_, state)| {
            state
                .dependencies()
                .iter()
                .all(|dep| admitted.contains(dep.as_str()))
        });

        if ready.is_empty() {
            return Err(GraphError::Unschedulable {
                mode,
                nodes: blocked.iter().map(|(name, _)| name.to_string()).collect(),
            });
        }

        admitted.extend(ready.iter().map(|(name, _)| *name));
        layers.push(ready.iter().map(|(name, _)| name.to_string()).collect());
        remaining = blocked;
    }

    Ok(layers)
}
