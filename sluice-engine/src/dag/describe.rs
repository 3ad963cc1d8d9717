// DAG Description
// Read-only dependency view of one mode and its Mermaid state-diagram rendering

use crate::dag::graph::Dag;
use crate::dag::node::ModeKind;

use serde::Serialize;
use std::fmt;

/// Node -> dependency list for one mode, in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DagDescription {
    pub mode: ModeKind,
    pub entries: Vec<DescribedNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DescribedNode {
    pub name: String,
    pub depends_on: Vec<String>,
}

impl DagDescription {
    /// Nodes nobody else depends on
    pub fn leaves(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|candidate| {
                !self
                    .entries
                    .iter()
                    .any(|e| e.depends_on.iter().any(|d| d == &candidate.name))
            })
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Nodes without dependencies
    pub fn roots(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.depends_on.is_empty())
            .map(|e| e.name.as_str())
            .collect()
    }

    pub fn to_mermaid(&self) -> Mermaid {
        Mermaid::from_description(self)
    }
}

impl Dag {
    /// Dependency view for nodes that declare `mode`
    pub fn describe(&self, mode: ModeKind) -> DagDescription {
        let entries = self
            .nodes()
            .iter()
            .filter_map(|node| {
                node.mode(mode).map(|_| DescribedNode {
                    name: node.name.clone(),
                    depends_on: node.dependency_state(mode).dependencies().to_vec(),
                })
            })
            .collect();

        DagDescription { mode, entries }
    }
}

/// Mermaid `stateDiagram-v2` text: `[*]` leads to every root, each
/// dependency leads to its dependents, leaves lead back to `[*]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mermaid(String);

impl Mermaid {
    pub fn from_description(description: &DagDescription) -> Self {
        let mut text = String::from("stateDiagram-v2\n");

        for entry in &description.entries {
            for dep in &entry.depends_on {
                text.push_str(&format!("    {} --> {}\n", dep, entry.name));
            }
        }
        for root in description.roots() {
            text.push_str(&format!("    [*] --> {}\n", root));
        }
        for leaf in description.leaves() {
            text.push_str(&format!("    {} --> [*]\n", leaf));
        }

        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Mermaid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::node::{Mode, Node};

    fn sample() -> Dag {
        Dag::from_nodes(vec![
            Node::new("a").with_mode(Mode::inline(ModeKind::Run, "select 1")),
            Node::new("b")
                .with_mode(Mode::inline(ModeKind::Run, "select 1").with_depends_on(&["a"])),
            Node::new("c")
                .with_mode(Mode::inline(ModeKind::Run, "select 1").with_depends_on(&["a", "b"])),
            Node::new("d").with_mode(Mode::inline(ModeKind::Save, "select 1")),
        ])
        .unwrap()
    }

    #[test]
    fn test_describe_only_declaring_nodes() {
        let description = sample().describe(ModeKind::Run);
        let names: Vec<_> = description.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(description.entries[2].depends_on, vec!["a", "b"]);
    }

    #[test]
    fn test_roots_and_leaves() {
        let description = sample().describe(ModeKind::Run);
        assert_eq!(description.roots(), vec!["a"]);
        assert_eq!(description.leaves(), vec!["c"]);
    }

    #[test]
    fn test_mermaid_output() {
        let mermaid = sample().describe(ModeKind::Run).to_mermaid();
        let expected = "stateDiagram-v2\n    a --> b\n    a --> c\n    b --> c\n    [*] --> a\n    c --> [*]\n";
        assert_eq!(mermaid.as_str(), expected);
    }

    #[test]
    fn test_describe_serializes_to_json() {
        let description = sample().describe(ModeKind::Save);
        let json = serde_json::to_value(&description).unwrap();
        assert_eq!(json["mode"], "save");
        assert_eq!(json["entries"][0]["name"], "d");
    }
}
