//! OpForge - Hierarchical Memory-Constrained Operator Scheduler
//!
//! Computes an execution order for the operators of an inference graph
//! that minimizes the peak footprint of transient activation tensors.
//! Intended for memory-constrained edge deployments where weights are
//! static but activations come and go; reordering operators can change
//! the peak live set dramatically.
//!
//! The pipeline: an external model source produces a typed [`graph::Graph`];
//! [`hier::HierGraph`] coarsens it into sequences and reconvergent-cell
//! groups; [`sched::hierarchical_schedule`] runs budgeted dynamic
//! programming over the coarse graph with iterative refinement; the
//! resulting order feeds [`sched::compute_lifetime`] and, downstream,
//! [`sched::best_fit`] for concrete offsets.

#![allow(clippy::needless_range_loop)] // Clearer for index-coupled arrays
#![allow(clippy::too_many_arguments)] // Scheduler state threading

pub mod error;
pub mod graph;
pub mod hier;
pub mod logging;
pub mod model;
pub mod ops;
pub mod report;
pub mod sched;

pub use error::{ErrorCategory, ForgeResult, OpForgeError};
pub use graph::{DataType, Graph, TensorType, ValueId, VertexId};
pub use hier::HierGraph;
pub use model::ModelGraph;
pub use sched::{
    best_fit, compute_lifetime, estimate_peak, hierarchical_schedule, random_sample,
    reverse_post_order, serenity_schedule, LifetimeStat, MemoryPlan,
};
