//! Incremental memory-state tracking
//!
//! Memory dynamics of a partial schedule are two parallel series:
//! `transient[i]` is the footprint while op `i` executes (inputs still held
//! plus outputs just produced) and `stable[i]` the footprint after it
//! completes (dead inputs released). Appending a step costs O(1); splicing
//! one vector onto another offsets the second by the first's latest level.
//!
//! The `overlap` rule models in-place element-wise execution: when an
//! element-wise op's single output matches the tensor type of an input that
//! dies at this op, the output aliases the input buffer, so the step
//! allocates nothing and the aliased input is not released separately.

use crate::graph::{Graph, ValueId, VertexId};
use crate::ops;

/// A series that tracks its own minimum and maximum
#[derive(Debug, Clone)]
pub struct StatVec {
    vec: Vec<i64>,
    min: i64,
    max: i64,
}

impl Default for StatVec {
    fn default() -> Self {
        Self::new()
    }
}

impl StatVec {
    /// Create an empty series
    pub fn new() -> Self {
        Self {
            vec: Vec::new(),
            min: i64::MAX,
            max: i64::MIN,
        }
    }

    /// Append one element
    pub fn append(&mut self, elem: i64) {
        self.vec.push(elem);
        self.min = self.min.min(elem);
        self.max = self.max.max(elem);
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.vec.len()
    }

    /// Whether the series is empty
    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }

    /// Minimum element; `i64::MAX` when empty
    pub fn min(&self) -> i64 {
        self.min
    }

    /// Maximum element; `i64::MIN` when empty
    pub fn max(&self) -> i64 {
        self.max
    }

    /// Element at `i`
    pub fn get(&self, i: usize) -> i64 {
        self.vec[i]
    }

    /// Iterate elements
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.vec.iter().copied()
    }
}

/// Transient/stable memory series of a (partial) schedule
#[derive(Debug, Clone)]
pub struct MemStateVec {
    /// Level before the first op (live graph inputs)
    init: i64,
    /// Latest stable level
    latest: i64,
    transients: StatVec,
    stables: StatVec,
}

impl Default for MemStateVec {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStateVec {
    /// Empty state starting at level zero
    pub fn new() -> Self {
        Self::with_init(0)
    }

    /// Empty state starting at `init` bytes already live
    pub fn with_init(init: i64) -> Self {
        Self {
            init,
            latest: init,
            transients: StatVec::new(),
            stables: StatVec::new(),
        }
    }

    /// The (transient, stable) levels the next step would reach
    pub fn compute_state(&self, inc: u64, dec: u64) -> (i64, i64) {
        let up = self.latest + inc as i64;
        let down = up - dec as i64;
        (up, down)
    }

    /// Append one step
    pub fn append(&mut self, inc: u64, dec: u64) {
        let (up, down) = self.compute_state(inc, dec);
        self.transients.append(up);
        self.stables.append(down);
        self.latest = down;
    }

    /// Number of steps recorded
    pub fn len(&self) -> usize {
        self.transients.len()
    }

    /// Whether no steps were recorded
    pub fn is_empty(&self) -> bool {
        self.transients.is_empty()
    }

    /// Latest stable level
    pub fn latest(&self) -> i64 {
        self.latest
    }

    /// Peak transient level; the initial level when no step was recorded
    pub fn peak(&self) -> i64 {
        if self.transients.is_empty() {
            self.init
        } else {
            self.transients.max().max(self.init)
        }
    }

    /// Transient series
    pub fn transients(&self) -> &StatVec {
        &self.transients
    }

    /// Stable series
    pub fn stables(&self) -> &StatVec {
        &self.stables
    }

    /// State pair at step `i`
    pub fn state_at(&self, i: usize) -> (i64, i64) {
        (self.transients.get(i), self.stables.get(i))
    }

    /// Splice `other` onto this vector, offsetting its levels by the
    /// current latest level.
    pub fn extend(&mut self, other: &MemStateVec) {
        let delta = self.latest - other.init;
        for i in 0..other.len() {
            self.transients.append(other.transients.get(i) + delta);
            self.stables.append(other.stables.get(i) + delta);
        }
        self.latest = other.latest + delta;
    }
}

/// Sentinel: the op's output cannot alias any input
const OVERLAP_FAILED: usize = usize::MAX;

/// Find which input of `op` its output may alias, ignoring liveness.
///
/// Only single-output element-wise ops alias. An op with exactly one input
/// aliases it; with several, the first non-parameter input of identical
/// tensor type is the candidate. The caller still has to check that the
/// candidate dies at this op.
fn overlap_candidate(graph: &Graph, op: VertexId) -> usize {
    let node = graph.op(op);
    if node.outputs.len() != 1 {
        return OVERLAP_FAILED;
    }
    if !ops::is_element_wise(&node.op_type) {
        return OVERLAP_FAILED;
    }
    if node.inputs.len() == 1 {
        return 0;
    }
    let out_ty = &graph.value(node.outputs[0]).ty;
    for (i, &input) in node.inputs.iter().enumerate() {
        let val = graph.value(input);
        if val.is_param() {
            continue;
        }
        if &val.ty == out_ty {
            return i;
        }
    }
    OVERLAP_FAILED
}

/// Index of the input that `op`'s output overlaps, ignoring liveness
pub fn overlap_input(graph: &Graph, op: VertexId) -> Option<usize> {
    match overlap_candidate(graph, op) {
        OVERLAP_FAILED => None,
        i => Some(i),
    }
}

/// Compute the `(inc, dec)` pair of one op given the values it kills.
///
/// `inc` is the bytes newly allocated for outputs (zero when the output
/// overlaps a killed input); `dec` is the bytes released by killed
/// non-parameter inputs, excluding an overlapped input since its buffer
/// lives on as the output.
pub fn compute_inc_dec(graph: &Graph, op: VertexId, killed: &[ValueId]) -> (u64, u64) {
    let node = graph.op(op);

    // The overlap only holds if the aliased input actually dies here
    let mut ovl_idx = overlap_candidate(graph, op);
    if ovl_idx != OVERLAP_FAILED && !killed.contains(&node.inputs[ovl_idx]) {
        ovl_idx = OVERLAP_FAILED;
    }

    let inc = if ovl_idx == OVERLAP_FAILED {
        node.outputs.iter().map(|&v| graph.value(v).size()).sum()
    } else {
        0
    };

    let ovl_val = if ovl_idx == OVERLAP_FAILED {
        None
    } else {
        Some(node.inputs[ovl_idx])
    };
    let mut dec = 0u64;
    for &val in &node.inputs {
        if graph.value(val).is_param() {
            continue;
        }
        if !killed.contains(&val) {
            continue;
        }
        if Some(val) == ovl_val {
            continue;
        }
        dec += graph.value(val).size();
    }

    (inc, dec)
}
