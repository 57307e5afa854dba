//! Computation graph: typed values, vertices, construction and dominance
//!
//! The graph layer owns the flat DAG handed over by the model source. All
//! nodes live in arenas addressed by integer handles (`ValueId`,
//! `VertexId`); relations between them are index pairs, so the usual
//! def-use/use-def ownership cycle never materializes.

mod build;
pub mod dom;
#[allow(clippy::module_inception)]
pub mod graph;
pub mod tensor;
pub mod value;
pub mod vertex;

pub use dom::{build_dominator_tree, DomNode, DomTree};
pub use graph::Graph;
pub use tensor::{DataType, TensorType};
pub use value::{Value, ValueId, ValueKind};
pub use vertex::{OpNode, Vertex, VertexId, VertexKind};
