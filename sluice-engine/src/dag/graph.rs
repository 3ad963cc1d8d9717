// DAG Builder
// Owns the nodes of a pipeline and rejects cyclic or dangling dependencies at load time

use crate::dag::node::{DependencyState, ModeKind, Node};
use crate::parser::models::{PipelineDefinition, Value, Variables};

use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Structural errors raised before any compile or execute
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("cycle detected in {mode} mode: {from} -> {to}")]
    Cycle {
        mode: ModeKind,
        from: String,
        to: String,
    },

    #[error("node '{node}' ({mode}) depends on unknown node '{dependency}'")]
    UnknownDependency {
        node: String,
        mode: ModeKind,
        dependency: String,
    },

    #[error("unschedulable nodes in {mode} mode: {}", .nodes.join(", "))]
    Unschedulable { mode: ModeKind, nodes: Vec<String> },

    #[error("node '{0}' not found in DAG")]
    NodeNotFound(String),

    #[error("node '{node}' has nothing to compile in {mode} mode")]
    StartNotScheduled { node: String, mode: ModeKind },

    #[error("duplicate node name '{0}'")]
    DuplicateNode(String),
}

/// Directed acyclic graph of nodes, kept in declaration order
#[derive(Debug, Clone, Default)]
pub struct Dag {
    nodes: Vec<Node>,
    /// Quick lookup of node index by name
    indices: HashMap<String, usize>,
}

impl Dag {
    /// Build and validate a DAG from a parsed pipeline file
    pub fn from_definition(definition: &PipelineDefinition) -> Result<Self, GraphError> {
        let defaults: Variables = definition
            .arguments
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_yaml(v)))
            .collect();

        let nodes = definition
            .etl
            .iter()
            .map(|(name, config)| Node::from_config(name, config, &defaults))
            .collect();

        Self::from_nodes(nodes)
    }

    /// Build and validate a DAG from already constructed nodes
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self, GraphError> {
        let mut indices = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if indices.insert(node.name.clone(), i).is_some() {
                return Err(GraphError::DuplicateNode(node.name.clone()));
            }
        }

        let dag = Self { nodes, indices };
        dag.validate()?;
        Ok(dag)
    }

    /// Check dependency references and acyclicity for every mode present
    pub fn validate(&self) -> Result<(), GraphError> {
        for mode in self.modes_present() {
            for node in &self.nodes {
                for dep in node.dependency_state(mode).dependencies() {
                    if !self.indices.contains_key(dep) {
                        return Err(GraphError::UnknownDependency {
                            node: node.name.clone(),
                            mode,
                            dependency: dep.clone(),
                        });
                    }
                }
            }

            self.detect_cycles(mode)?;
        }

        Ok(())
    }

    /// Detect cycles in one mode's dependencies using DFS
    fn detect_cycles(&self, mode: ModeKind) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for node in &self.nodes {
            if !visited.contains(node.name.as_str()) {
                if let Some((from, to)) = self.dfs_cycle(mode, node, &mut visited, &mut rec_stack)
                {
                    return Err(GraphError::Cycle { mode, from, to });
                }
            }
        }

        Ok(())
    }

    /// Returns the edge that closed a cycle
    fn dfs_cycle<'a>(
        &'a self,
        mode: ModeKind,
        node: &'a Node,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
    ) -> Option<(String, String)> {
        let name = node.name.as_str();
        visited.insert(name);
        rec_stack.insert(name);

        for dep in node.dependency_state(mode).dependencies() {
            if rec_stack.contains(dep.as_str()) {
                return Some((name.to_string(), dep.clone()));
            }
            if !visited.contains(dep.as_str()) {
                if let Some(next) = self.node(dep) {
                    if let Some(edge) = self.dfs_cycle(mode, next, visited, rec_stack) {
                        return Some(edge);
                    }
                }
            }
        }

        rec_stack.remove(name);
        None
    }

    /// Modes declared by at least one node
    pub fn modes_present(&self) -> Vec<ModeKind> {
        ModeKind::ALL
            .into_iter()
            .filter(|kind| self.nodes.iter().any(|n| n.mode(*kind).is_some()))
            .collect()
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.indices.get(name).map(|&idx| &self.nodes[idx])
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        match self.indices.get(name) {
            Some(&idx) => self.nodes.get_mut(idx),
            None => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Scheduling input for one mode: every node with its dependency state
    pub(crate) fn dependency_states(&self, mode: ModeKind) -> Vec<(&str, DependencyState<'_>)> {
        self.nodes
            .iter()
            .map(|n| (n.name.as_str(), n.dependency_state(mode)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::node::Mode;

    fn run_node(name: &str, deps: &[&str]) -> Node {
        Node::new(name).with_mode(Mode::inline(ModeKind::Run, "select 1").with_depends_on(deps))
    }

    #[test]
    fn test_simple_dag() {
        let dag = Dag::from_nodes(vec![run_node("a", &[]), run_node("b", &["a"])]).unwrap();
        assert_eq!(dag.len(), 2);
        assert!(dag.contains("b"));
        assert_eq!(dag.modes_present(), vec![ModeKind::Run]);
    }

    #[test]
    fn test_cycle_detection_names_edge() {
        let err = Dag::from_nodes(vec![run_node("a", &["b"]), run_node("b", &["a"])]).unwrap_err();
        let GraphError::Cycle { mode, from, to } = err else {
            panic!("expected cycle error, got {err:?}");
        };
        assert_eq!(mode, ModeKind::Run);
        assert_eq!((from.as_str(), to.as_str()), ("b", "a"));
    }

    #[test]
    fn test_cycle_detected_in_save_only() {
        let a = Node::new("a")
            .with_mode(Mode::inline(ModeKind::Run, "select 1"))
            .with_mode(Mode::inline(ModeKind::Save, "select 1").with_depends_on(&["c"]));
        let b = Node::new("b")
            .with_mode(Mode::inline(ModeKind::Save, "select 1").with_depends_on(&["a"]));
        let c = Node::new("c")
            .with_mode(Mode::inline(ModeKind::Save, "select 1").with_depends_on(&["b"]));

        let err = Dag::from_nodes(vec![a, b, c]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { mode: ModeKind::Save, .. }));
        assert!(err.to_string().contains("->"));
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let err = Dag::from_nodes(vec![run_node("a", &["a"])]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { ref from, ref to, .. } if from == "a" && to == "a"));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = Dag::from_nodes(vec![run_node("a", &["missing"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                node: "a".to_string(),
                mode: ModeKind::Run,
                dependency: "missing".to_string(),
            }
        );
    }

    #[test]
    fn test_dependency_on_node_without_mode_is_allowed() {
        let raw = Node::new("raw_orders");
        let dag = Dag::from_nodes(vec![raw, run_node("orders", &["raw_orders"])]).unwrap();
        assert_eq!(dag.len(), 2);
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let err = Dag::from_nodes(vec![run_node("a", &[]), run_node("a", &[])]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode("a".to_string()));
    }
}
