//! Memory-aware hierarchical scheduling
//!
//! The scheduler runs dynamic programming over frontiers of the
//! hierarchical graph. A state is the set of unscheduled vertices with no
//! unscheduled predecessor; expanding a state schedules one vertex of the
//! frontier and extends the partial order, the memory trace, the serialized
//! predecessor counts and the value use counts. States reached by several
//! paths are merged keeping the variant with the smaller running peak, and
//! partial schedules whose transient level would exceed the budget are
//! pruned.
//!
//! Sequences schedule in their fixed op order. Groups first try a cheap
//! reverse post-order of their interior under the headroom below the
//! running peak; only when that fails does the same DP run inside the
//! group. Final group schedules are memoized by `(group, kill mask)` so
//! they carry over across iterations of the refinement driver.
//!
//! The driver alternates scheduling with ungrouping: after each round the
//! groups around the observed peak values are dissolved, letting the DP see
//! finer-grained choices exactly where the peak sits, until a round changes
//! nothing.

use crate::error::ForgeResult;
use crate::graph::{Graph, ValueId, VertexId};
use crate::hier::graph::{HierGraph, HierId, HierKind};
use crate::hier::group::MakeGroupPass;
use crate::hier::join::JoinSequencePass;
use crate::hier::ungroup::{try_ungroup_succs, ungroup};
use crate::internal_error;
use crate::sched::life::compute_lifetime;
use crate::sched::mem::{compute_inc_dec, MemStateVec};
use crate::sched::order::extract_zero_in;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Effectively unlimited budget that still tolerates arithmetic slack
pub(crate) const MAX_BUDGET: i64 = i64::MAX / 2;

/// Fixed seed of the serenity budget sampler
const SERENITY_SEED: u64 = 0x5eed;

/// Default number of schedules the serenity sampler draws per group
pub const DEFAULT_SERENITY_SAMPLES: usize = 10000;

/// Outcome of scheduling one vertex or one whole (sub)graph
#[derive(Debug, Clone)]
struct SchedResult {
    /// Whether the schedule stayed within budget
    valid: bool,
    /// Scheduled op order
    seq: Vec<VertexId>,
    /// Memory trace of `seq`
    states: MemStateVec,
}

impl SchedResult {
    fn invalid() -> Self {
        Self {
            valid: false,
            seq: Vec::new(),
            states: MemStateVec::new(),
        }
    }

    fn new(seq: Vec<VertexId>, states: MemStateVec) -> Self {
        Self {
            valid: true,
            seq,
            states,
        }
    }
}

/// A DP state: partial schedule plus the serialized graph topology
/// (predecessor counts) and value liveness (use counts) it implies
#[derive(Debug, Clone)]
struct PartialSchedResult {
    result: SchedResult,
    pred_cnt: HashMap<HierId, u32>,
    use_cnt: HashMap<ValueId, u32>,
}

impl PartialSchedResult {
    /// Keep the variant with the smaller running peak.
    fn update(&mut self, other: PartialSchedResult) {
        if other.result.states.peak() < self.result.states.peak() {
            *self = other;
        }
    }
}

/// Memoization key for a group's final schedule
///
/// `kill[i]` is true iff the group's i-th consumed boundary value (in the
/// group's canonical ascending order) would reach zero uses during group
/// execution. Two outer states with the same kill pattern can reuse the
/// same interior schedule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupContext {
    group: HierId,
    kill: Vec<bool>,
}

impl GroupContext {
    fn new(hier: &HierGraph, group: HierId, use_cnt: &HashMap<ValueId, u32>) -> Self {
        let kill = hier
            .group(group)
            .consumed
            .iter()
            .map(|&(val, cnt)| use_cnt.get(&val).copied().unwrap_or(0) == cnt)
            .collect();
        Self { group, kill }
    }
}

/// Memoized group schedules, shared across driver iterations
pub type GroupMemo = HashMap<GroupContext, SchedResultHandle>;

/// Opaque wrapper so the memo type can be public while the result stays
/// crate-internal
#[derive(Debug, Clone)]
pub struct SchedResultHandle(SchedResult);

/// Schedule one sequence: its op order is fixed, so this only computes the
/// memory trace and updates `use_cnt`. Returns an invalid result when the
/// transient level would exceed `budget`; `use_cnt` is left partially
/// updated in that case, so callers pass a clone they can discard.
fn schedule_sequence(
    graph: &Graph,
    hier: &HierGraph,
    seq_id: HierId,
    use_cnt: &mut HashMap<ValueId, u32>,
    budget: i64,
) -> SchedResult {
    let ops = hier.seq(seq_id).ops.clone();
    let mut states = MemStateVec::new();

    for &op in &ops {
        let node = graph.op(op);

        // Find all values this op kills
        let mut killed: Vec<ValueId> = Vec::new();
        for &val in &node.inputs {
            if graph.value(val).is_param() {
                continue;
            }
            let Some(cnt) = use_cnt.get_mut(&val) else {
                tracing::error!(
                    value = %graph.value(val).name,
                    "value consumed without being live"
                );
                return SchedResult::invalid();
            };
            *cnt -= 1;
            if *cnt == 0 && !killed.contains(&val) {
                killed.push(val);
            }
        }

        let (inc, dec) = compute_inc_dec(graph, op, &killed);
        let (transient, _) = states.compute_state(inc, dec);
        if transient > budget {
            return SchedResult::invalid();
        }
        states.append(inc, dec);

        for val in killed {
            use_cnt.remove(&val);
        }
        for &val in &node.outputs {
            use_cnt.insert(val, graph.value(val).use_count());
        }
    }

    SchedResult::new(ops, states)
}

/// Topological order of a group's interior, predecessors first, derived
/// from its exit sequences.
fn group_rpo(hier: &HierGraph, group_id: HierId) -> Vec<HierId> {
    let group = hier.group(group_id);
    let members: BTreeSet<HierId> = group.seqs.iter().copied().collect();

    let mut order = Vec::with_capacity(group.seqs.len());
    let mut traversed: BTreeSet<HierId> = BTreeSet::new();
    let mut stack: Vec<(HierId, bool)> =
        group.exits.iter().rev().map(|&v| (v, false)).collect();
    while let Some((vert, expanded)) = stack.pop() {
        if traversed.contains(&vert) {
            continue;
        }
        if expanded {
            traversed.insert(vert);
            order.push(vert);
            continue;
        }
        stack.push((vert, true));
        for &pred in hier.vert(vert).preds.iter().rev() {
            if members.contains(&pred) && !traversed.contains(&pred) {
                stack.push((pred, false));
            }
        }
    }

    if order.len() != members.len() {
        tracing::warn!(
            missing = members.len() - order.len(),
            "group interior not fully reachable from its exits"
        );
        for &seq in &members {
            if !traversed.contains(&seq) {
                order.push(seq);
            }
        }
    }
    order
}

/// Schedule a group by reverse post-order of its interior. Fast and almost
/// always near-optimal for linear cell interiors; only adopted when it
/// stays within `budget`.
fn schedule_group_rpo(
    graph: &Graph,
    hier: &HierGraph,
    group_id: HierId,
    use_cnt: &mut HashMap<ValueId, u32>,
    budget: i64,
) -> SchedResult {
    let mut op_seq = Vec::new();
    let mut states = MemStateVec::new();
    for seq in group_rpo(hier, group_id) {
        let result = schedule_sequence(graph, hier, seq, use_cnt, budget - states.latest());
        if !result.valid {
            return SchedResult::invalid();
        }
        op_seq.extend(result.seq);
        states.extend(&result.states);
    }
    SchedResult::new(op_seq, states)
}

/// Merge a candidate expansion into the next round's memo.
fn update_result(
    hier: &HierGraph,
    vert: HierId,
    zero_in: &[HierId],
    current: &PartialSchedResult,
    vert_result: SchedResult,
    use_cnt: HashMap<ValueId, u32>,
    new_memo: &mut BTreeMap<Vec<HierId>, PartialSchedResult>,
) {
    if !vert_result.valid {
        return;
    }

    let mut seq = current.result.seq.clone();
    seq.extend(vert_result.seq.iter().copied());
    let mut states = current.result.states.clone();
    states.extend(&vert_result.states);

    let mut pred_cnt = current.pred_cnt.clone();
    for &succ in &hier.vert(vert).succs {
        if let Some(cnt) = pred_cnt.get_mut(&succ) {
            *cnt -= 1;
        }
    }
    let mut new_zero: Vec<HierId> = zero_in.iter().copied().filter(|&v| v != vert).collect();
    extract_zero_in(&mut pred_cnt, &mut new_zero);

    let candidate = PartialSchedResult {
        result: SchedResult::new(seq, states),
        pred_cnt,
        use_cnt,
    };
    match new_memo.entry(new_zero) {
        std::collections::btree_map::Entry::Occupied(mut entry) => {
            entry.get_mut().update(candidate);
        }
        std::collections::btree_map::Entry::Vacant(entry) => {
            entry.insert(candidate);
        }
    }
}

/// Frontier DP over a group's interior (sequences are the leaves here).
fn schedule_group_dp(
    graph: &Graph,
    hier: &HierGraph,
    group_id: HierId,
    use_cnt: &HashMap<ValueId, u32>,
    budget: i64,
) -> SchedResult {
    let members = hier.group(group_id).seqs.clone();
    let mut pred_cnt: HashMap<HierId, u32> = members
        .iter()
        .map(|&seq| (seq, hier.vert(seq).preds.len() as u32))
        .collect();

    let mut zero_in = Vec::new();
    extract_zero_in(&mut pred_cnt, &mut zero_in);
    let mut memo: BTreeMap<Vec<HierId>, PartialSchedResult> = BTreeMap::new();
    memo.insert(
        zero_in,
        PartialSchedResult {
            result: SchedResult::new(Vec::new(), MemStateVec::new()),
            pred_cnt,
            use_cnt: use_cnt.clone(),
        },
    );

    for _ in 0..members.len() {
        let mut new_memo = BTreeMap::new();
        for (zero_in, current) in &memo {
            for &vert in zero_in {
                let mut vert_use = current.use_cnt.clone();
                let vert_result = schedule_sequence(
                    graph,
                    hier,
                    vert,
                    &mut vert_use,
                    budget - current.result.states.latest(),
                );
                update_result(hier, vert, zero_in, current, vert_result, vert_use, &mut new_memo);
            }
        }
        if new_memo.is_empty() {
            return SchedResult::invalid();
        }
        memo = new_memo;
    }

    memo.remove(&Vec::new())
        .map(|p| p.result)
        .unwrap_or_else(SchedResult::invalid)
}

/// Apply a group's declared boundary effect to the outer use counts.
fn update_group_use_count(
    hier: &HierGraph,
    group_id: HierId,
    use_cnt: &mut HashMap<ValueId, u32>,
) {
    let group = hier.group(group_id);
    for &(val, num) in &group.consumed {
        if let Some(cnt) = use_cnt.get_mut(&val) {
            *cnt = cnt.saturating_sub(num);
            if *cnt == 0 {
                use_cnt.remove(&val);
            }
        }
    }
    for &(val, remaining) in &group.produced {
        use_cnt.entry(val).or_insert(remaining);
    }
}

/// The frontier-DP scheduler over a hierarchical graph
pub struct HierScheduler<'a, 'g> {
    hier: &'a HierGraph<'g>,
    /// Upper bound of the acceptable transient level
    budget: i64,
    /// Group schedules shared across driver iterations
    group_memo: &'a mut GroupMemo,
}

impl<'a, 'g> HierScheduler<'a, 'g> {
    /// Create a scheduler over `hier` with the given peak budget.
    pub fn new(hier: &'a HierGraph<'g>, budget: i64, group_memo: &'a mut GroupMemo) -> Self {
        Self {
            hier,
            budget,
            group_memo,
        }
    }

    /// Run the DP to completion and return the full op order.
    pub fn schedule(&mut self) -> ForgeResult<Vec<VertexId>> {
        let graph = self.hier.graph;

        // Serialize the topology: predecessor counts of all schedulable
        // vertices, with input edges already consumed
        let mut pred_cnt: HashMap<HierId, u32> = HashMap::new();
        for vert in self.hier.rpo() {
            match self.hier.vert(vert).kind {
                HierKind::Sequence(_) | HierKind::Group(_) => {
                    pred_cnt.insert(vert, self.hier.vert(vert).preds.len() as u32);
                }
                _ => {}
            }
        }
        let n_vert = pred_cnt.len();

        let mut use_cnt: HashMap<ValueId, u32> = HashMap::new();
        let mut init_size = 0i64;
        for &input in &self.hier.inputs {
            for &succ in &self.hier.vert(input).succs {
                if let Some(cnt) = pred_cnt.get_mut(&succ) {
                    *cnt -= 1;
                }
            }
            if let HierKind::Input(val) = self.hier.vert(input).kind {
                use_cnt.insert(val, graph.value(val).use_count());
                init_size += graph.value(val).size() as i64;
            }
        }

        let mut zero_in = Vec::new();
        extract_zero_in(&mut pred_cnt, &mut zero_in);
        let mut memo: BTreeMap<Vec<HierId>, PartialSchedResult> = BTreeMap::new();
        memo.insert(
            zero_in,
            PartialSchedResult {
                result: SchedResult::new(Vec::new(), MemStateVec::with_init(init_size)),
                pred_cnt,
                use_cnt,
            },
        );

        for round in 0..n_vert {
            let mut new_memo = BTreeMap::new();
            for (zero_in, current) in &memo {
                for &vert in zero_in {
                    let mut vert_use = current.use_cnt.clone();
                    let vert_result =
                        self.schedule_vertex(vert, &mut vert_use, &current.result.states);
                    update_result(
                        self.hier,
                        vert,
                        zero_in,
                        current,
                        vert_result,
                        vert_use,
                        &mut new_memo,
                    );
                }
            }
            if new_memo.is_empty() {
                return Err(internal_error!(
                    "no partial schedule survives round {round} within budget {}",
                    self.budget
                ));
            }
            memo = new_memo;
        }

        memo.remove(&Vec::new())
            .map(|p| p.result.seq)
            .ok_or_else(|| internal_error!("DP finished without an empty frontier"))
    }

    /// Schedule one frontier vertex against the budget headroom left by
    /// the partial schedule in hand.
    fn schedule_vertex(
        &mut self,
        vert: HierId,
        use_cnt: &mut HashMap<ValueId, u32>,
        prev_states: &MemStateVec,
    ) -> SchedResult {
        let graph = self.hier.graph;
        let local_budget = self.budget - prev_states.latest();

        if self.hier.is_sequence(vert) {
            return schedule_sequence(graph, self.hier, vert, use_cnt, local_budget);
        }
        if !self.hier.is_group(vert) {
            tracing::error!(?vert, "frontier vertex is neither sequence nor group");
            return SchedResult::invalid();
        }

        // Memoized interior from an earlier iteration?
        let ctx = GroupContext::new(self.hier, vert, use_cnt);
        if let Some(SchedResultHandle(memoized)) = self.group_memo.get(&ctx) {
            if memoized.states.peak() > local_budget {
                // Cannot fit, abandon this partial schedule
                return SchedResult::invalid();
            }
            let result = memoized.clone();
            update_group_use_count(self.hier, vert, use_cnt);
            return result;
        }

        // Cheap shortcut: interior in reverse post-order, confined to the
        // headroom below the running peak
        let mut rpo_use = use_cnt.clone();
        let rpo_budget = local_budget.min(prev_states.peak() - prev_states.latest());
        let rpo_result = schedule_group_rpo(graph, self.hier, vert, &mut rpo_use, rpo_budget);
        if rpo_result.valid {
            *use_cnt = rpo_use;
            return rpo_result;
        }

        // Full interior DP, memoized for future iterations
        let dp_result = schedule_group_dp(graph, self.hier, vert, use_cnt, local_budget);
        if !dp_result.valid {
            return SchedResult::invalid();
        }
        update_group_use_count(self.hier, vert, use_cnt);
        self.group_memo
            .insert(ctx, SchedResultHandle(dp_result.clone()));
        dp_result
    }
}

/// Hierarchical memory-constrained schedule of a graph.
///
/// Coarsens the graph (sequence joining, cell grouping), then iterates:
/// schedule under the best known peak as budget, locate the values carrying
/// the observed peak, and ungroup around them so the next round can reorder
/// exactly there. Stops when no further ungrouping is possible and returns
/// the best order seen.
pub fn hierarchical_schedule(graph: &Graph) -> ForgeResult<Vec<VertexId>> {
    let mut hier = HierGraph::new(graph);
    JoinSequencePass.run(&mut hier)?;
    MakeGroupPass::default().run(&mut hier)?;

    let mut group_memo: GroupMemo = GroupMemo::new();
    let mut best_sched: Vec<VertexId> = Vec::new();
    let mut best_peak: i64 = MAX_BUDGET;

    loop {
        let sched = HierScheduler::new(&hier, best_peak, &mut group_memo).schedule()?;
        if sched.len() != graph.ops.len() {
            return Err(internal_error!(
                "scheduler produced {} ops for a graph with {}",
                sched.len(),
                graph.ops.len()
            ));
        }

        let stat = compute_lifetime(&sched, graph)?;
        let peak = stat.peak(graph) as i64;
        let peak_values = stat.peak_values(graph);
        tracing::info!(peak_kib = peak / 1024, "scheduling iteration finished");
        for &val in &peak_values {
            tracing::debug!(value = %graph.value(val).name, "at peak");
        }

        if peak < best_peak {
            best_peak = peak;
            best_sched = sched;
        }

        // Sequences defining the peak values
        let mut peak_seqs: BTreeSet<HierId> = BTreeSet::new();
        for &val in &peak_values {
            let Some(def) = graph.value(val).def else {
                continue;
            };
            if !graph.vertex(def).is_op() {
                continue;
            }
            if let Some(&seq) = hier.op_to_seq.get(&def) {
                peak_seqs.insert(seq);
            }
        }

        // Ungroup where the peak lives
        let mut changed = false;
        for &seq in &peak_seqs {
            if let Some(group) = hier.seq(seq).group {
                ungroup(&mut hier, group);
                changed = true;
            }
            changed |= try_ungroup_succs(&mut hier, seq);
        }
        if !changed {
            break;
        }
    }

    Ok(best_sched)
}

/// Peak of one uniformly sampled interior schedule of a group.
fn sample_group_peak(
    graph: &Graph,
    hier: &HierGraph,
    group_id: HierId,
    mut use_cnt: HashMap<ValueId, u32>,
    rng: &mut ChaCha8Rng,
) -> i64 {
    let members = &hier.group(group_id).seqs;
    let mut pred_cnt: HashMap<HierId, u32> = members
        .iter()
        .map(|&seq| (seq, hier.vert(seq).preds.len() as u32))
        .collect();
    let mut zero_in = Vec::new();
    extract_zero_in(&mut pred_cnt, &mut zero_in);

    let mut states = MemStateVec::new();
    while !zero_in.is_empty() {
        let seq = zero_in.remove(rng.gen_range(0..zero_in.len()));
        for &succ in &hier.vert(seq).succs {
            if let Some(cnt) = pred_cnt.get_mut(&succ) {
                *cnt -= 1;
            }
        }
        extract_zero_in(&mut pred_cnt, &mut zero_in);

        let result = schedule_sequence(graph, hier, seq, &mut use_cnt, MAX_BUDGET);
        states.extend(&result.states);
    }

    states.peak()
}

/// Serenity-style schedule for networks of sequentially connected cells.
///
/// Walks the coarsened graph in topological order. Each group's budget is
/// estimated as the minimum peak over `n_samples` random interior
/// schedules (drawn from a fixed seed, so results are reproducible), then
/// the interior DP runs under that budget. With `try_simple`, a reverse
/// post-order interior that does not lift the running peak is taken as-is;
/// with `join_ops`, linear runs are fused before grouping.
pub fn serenity_schedule(
    graph: &Graph,
    join_ops: bool,
    try_simple: bool,
    n_samples: usize,
) -> ForgeResult<Vec<VertexId>> {
    let mut hier = HierGraph::new(graph);
    if join_ops {
        JoinSequencePass.run(&mut hier)?;
    }
    MakeGroupPass::default().run(&mut hier)?;

    let top_verts = hier.rpo();
    let mut sched: Vec<VertexId> = Vec::new();
    let mut states = MemStateVec::new();
    let mut use_cnt: HashMap<ValueId, u32> = HashMap::new();

    for (i, &vert) in top_verts.iter().enumerate() {
        tracing::debug!(current = i + 1, total = top_verts.len(), "scheduling vertex");
        match &hier.vert(vert).kind {
            HierKind::Input(val) => {
                use_cnt.insert(*val, graph.value(*val).use_count());
                states.append(graph.value(*val).size(), 0);
            }
            HierKind::Output(_) | HierKind::Dead => {}
            HierKind::Sequence(_) => {
                let result = schedule_sequence(graph, &hier, vert, &mut use_cnt, MAX_BUDGET);
                if !result.valid {
                    return Err(internal_error!("unbudgeted sequence schedule failed"));
                }
                sched.extend(result.seq);
                states.extend(&result.states);
            }
            HierKind::Group(_) => {
                if try_simple {
                    let mut rpo_use = use_cnt.clone();
                    let rpo_budget = states.peak() - states.latest();
                    let result =
                        schedule_group_rpo(graph, &hier, vert, &mut rpo_use, rpo_budget);
                    if result.valid {
                        use_cnt = rpo_use;
                        sched.extend(result.seq);
                        states.extend(&result.states);
                        continue;
                    }
                }

                tracing::info!("sampling group schedules");
                let mut budget = MAX_BUDGET;
                let mut rng = ChaCha8Rng::seed_from_u64(SERENITY_SEED);
                for _ in 0..n_samples {
                    budget = budget.min(sample_group_peak(
                        graph,
                        &hier,
                        vert,
                        use_cnt.clone(),
                        &mut rng,
                    ));
                }
                tracing::info!(budget_kib = budget / 1024, "scheduling group with budget");

                let result = schedule_group_dp(graph, &hier, vert, &use_cnt, budget);
                if !result.valid {
                    return Err(internal_error!("sampled group budget was infeasible"));
                }
                update_group_use_count(&hier, vert, &mut use_cnt);
                sched.extend(result.seq);
                states.extend(&result.states);
            }
        }
    }

    Ok(sched)
}
