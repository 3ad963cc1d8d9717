// DAG module
// Node/mode model, cycle detection, scheduling and the dependency description

pub mod describe;
pub mod graph;
pub mod node;
pub mod schedule;

pub use describe::{DagDescription, DescribedNode, Mermaid};
pub use graph::{Dag, GraphError};
pub use node::{DependencyState, IterationSpec, Mode, ModeKind, Node, TemplateSource, Variant};
pub use schedule::Selection;
