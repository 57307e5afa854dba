//! Memory-aware scheduling
//!
//! Everything from the raw ingredients (memory-state tracking, lifetime
//! analysis, baseline topological orders) up to the hierarchical DP
//! scheduler with iterative refinement, plus the downstream best-fit offset
//! packer that consumes the scheduler's output.

pub mod hier;
pub mod life;
pub mod mem;
pub mod order;
pub mod plan;

pub use hier::{
    hierarchical_schedule, serenity_schedule, GroupContext, GroupMemo, HierScheduler,
    DEFAULT_SERENITY_SAMPLES,
};
pub use life::{compute_lifetime, estimate_peak, Lifetime, LifetimeStat, TIME_INPUT};
pub use mem::{compute_inc_dec, overlap_input, MemStateVec, StatVec};
pub use order::{random_sample, reverse_post_order};
pub use plan::{best_fit, Container, MemoryDesc, MemoryPlan, Step};
