//! Cell-grouping pass
//!
//! Detects "cells", the small reconvergent subgraphs ending in a
//! concatenation found in inception/NAS architectures, and wraps each as a
//! `Group` so the scheduler can optimize its interior jointly.
//!
//! The pass builds dominator and post-dominator trees over the hierarchical
//! graph first. For every cell output, the sequences it post-dominates form
//! the cell body; the sequences it dominates are candidates for "intrusion",
//! a second group carved out downstream so that the boundary between the
//! two crosses the cheapest possible set of values. Edge state of every
//! vertex is snapshotted before any rewiring so that groups can later be
//! dissolved exactly.

use crate::graph::dom::build_dominator_tree;
use crate::graph::{Graph, ValueId};
use crate::hier::graph::{Group, HierGraph, HierId, HierKind, Sequence};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Predicate deciding whether a sequence closes a cell
pub type CellPredicate = fn(&Graph, &Sequence) -> bool;

/// Default cell-output predicate: the sequence starts with a `Concat`.
pub fn concat_cell_output(graph: &Graph, seq: &Sequence) -> bool {
    graph.op(seq.ops[0]).op_type == "Concat"
}

/// The cell-grouping pass
#[derive(Debug)]
pub struct MakeGroupPass {
    /// Whether to carve an intruded group downstream of each cell
    pub intrusion: bool,
    /// Cell-output predicate
    pub cell_output: CellPredicate,
}

impl Default for MakeGroupPass {
    fn default() -> Self {
        Self {
            intrusion: true,
            cell_output: concat_cell_output,
        }
    }
}

impl MakeGroupPass {
    /// Run the pass, mutating the graph in place.
    ///
    /// Missing inputs or outputs, and graphs too small to carry a dominator
    /// tree, are recoverable: a warning is emitted and the graph is left
    /// ungrouped. With several inputs or outputs the trees are built from
    /// the first of each, with a warning.
    pub fn run(&self, hier: &mut HierGraph) -> crate::error::ForgeResult<()> {
        if hier.inputs.is_empty() {
            tracing::error!("input list of the hierarchical graph is empty");
            return Ok(());
        }
        if hier.inputs.len() > 1 {
            tracing::warn!("dominator tree will only be built for the first input vertex");
        }
        let dom = build_dominator_tree(
            hier.inputs[0].0,
            |v| hier.vert(HierId(v)).succs.iter().map(|h| h.0).collect(),
            |v| hier.vert(HierId(v)).preds.iter().map(|h| h.0).collect(),
        );

        if hier.outputs.is_empty() {
            tracing::error!("output list of the hierarchical graph is empty");
            return Ok(());
        }
        if hier.outputs.len() > 1 {
            tracing::warn!("post-dominator tree will only be built for the first output vertex");
        }
        let post_dom = build_dominator_tree(
            hier.outputs[0].0,
            |v| hier.vert(HierId(v)).preds.iter().map(|h| h.0).collect(),
            |v| hier.vert(HierId(v)).succs.iter().map(|h| h.0).collect(),
        );

        match (dom, post_dom) {
            (Some(dom), Some(post_dom)) => {
                hier.dom = Some(dom);
                hier.post_dom = Some(post_dom);
            }
            _ => {
                tracing::warn!("graph too small for dominance analysis, skipping grouping");
                return Ok(());
            }
        }

        // Snapshot edges for later ungrouping and collect cell outputs in
        // topological order
        let order = hier.rpo();
        hier.backup_edges();
        let mut cell_outs = Vec::new();
        for &vert in &order {
            if !hier.is_sequence(vert) {
                continue;
            }
            if (self.cell_output)(hier.graph, hier.seq(vert)) {
                cell_outs.push(vert);
            }
        }

        for out in cell_outs {
            if hier.seq(out).group.is_some() {
                continue;
            }
            make_group_from_cell(hier, out, self.intrusion);
        }
        Ok(())
    }
}

/// Direction of a cone walk
#[derive(Clone, Copy)]
enum Walk {
    Preds,
    Succs,
}

/// Memoized cone detection: collect the connected set of sequences around
/// `root` that satisfy `in_set`, walking `dir` neighbors. `frontier` gets
/// the member sequences with at least one neighbor outside the set, `sink`
/// those with all neighbors outside.
struct SequenceDetector<'h, 'g, F>
where
    F: Fn(&HierGraph<'g>, HierId) -> bool,
{
    hier: &'h HierGraph<'g>,
    in_set: F,
    dir: Walk,
    memo: HashMap<HierId, bool>,
    set: BTreeSet<HierId>,
    frontier: Vec<HierId>,
    sink: Vec<HierId>,
}

impl<'h, 'g, F> SequenceDetector<'h, 'g, F>
where
    F: Fn(&HierGraph<'g>, HierId) -> bool,
{
    fn new(hier: &'h HierGraph<'g>, in_set: F, dir: Walk) -> Self {
        Self {
            hier,
            in_set,
            dir,
            memo: HashMap::new(),
            set: BTreeSet::new(),
            frontier: Vec::new(),
            sink: Vec::new(),
        }
    }

    fn detect(mut self, root: HierId) -> (BTreeSet<HierId>, Vec<HierId>, Vec<HierId>) {
        self.visit(root);
        (self.set, self.frontier, self.sink)
    }

    fn visit(&mut self, vert: HierId) -> bool {
        if let Some(&cached) = self.memo.get(&vert) {
            return cached;
        }
        let result = self.visit_uncached(vert);
        self.memo.insert(vert, result);
        result
    }

    fn visit_uncached(&mut self, vert: HierId) -> bool {
        // Inputs, outputs and groups always bound the cone
        if !self.hier.is_sequence(vert) {
            return false;
        }
        if !(self.in_set)(self.hier, vert) {
            return false;
        }
        self.set.insert(vert);

        let neighbors = match self.dir {
            Walk::Preds => self.hier.vert(vert).preds.clone(),
            Walk::Succs => self.hier.vert(vert).succs.clone(),
        };
        let mut is_frontier = false;
        let mut is_sink = true;
        for n in neighbors {
            let outside = !self.visit(n);
            is_frontier |= outside;
            is_sink &= outside;
        }
        if is_frontier && !self.frontier.contains(&vert) {
            self.frontier.push(vert);
        }
        if is_sink && !self.sink.contains(&vert) {
            self.sink.push(vert);
        }
        true
    }
}

/// Subset search over intrusion candidates minimizing the total byte size
/// of boundary outputs; larger subsets win ties. Subsets are explored by
/// repeatedly adding a sequence whose in-subset predecessor count is zero,
/// and memoized by their sorted member list.
struct OutputSizeOptimizer<'h, 'g> {
    hier: &'h HierGraph<'g>,
    all_seqs: &'h BTreeSet<HierId>,
    memo: HashSet<Vec<HierId>>,
    best_set: Vec<HierId>,
    min_size: u64,
}

impl<'h, 'g> OutputSizeOptimizer<'h, 'g> {
    fn new(hier: &'h HierGraph<'g>, all_seqs: &'h BTreeSet<HierId>) -> Self {
        Self {
            hier,
            all_seqs,
            memo: HashSet::new(),
            best_set: Vec::new(),
            min_size: u64::MAX,
        }
    }

    fn optimize(mut self, root: HierId) -> Vec<HierId> {
        let mut pred_count: HashMap<HierId, u32> = self
            .all_seqs
            .iter()
            .map(|&seq| (seq, self.hier.vert(seq).preds.len() as u32))
            .collect();
        pred_count.insert(root, 0);

        let mut chosen = Vec::new();
        let mut succ_count: HashMap<HierId, u32> = HashMap::new();
        self.search(&mut chosen, &mut pred_count, &mut succ_count);
        self.best_set
    }

    fn search(
        &mut self,
        chosen: &mut Vec<HierId>,
        pred_count: &mut HashMap<HierId, u32>,
        succ_count: &mut HashMap<HierId, u32>,
    ) {
        if self.memo.contains(chosen.as_slice()) {
            return;
        }

        // Boundary size: outputs of chosen sequences that still feed
        // something outside the chosen subset
        let mut size = 0u64;
        for &seq in chosen.iter() {
            if succ_count.get(&seq).copied().unwrap_or(0) == 0 {
                continue;
            }
            size += self
                .hier
                .seq(seq)
                .outputs
                .iter()
                .map(|&v| self.hier.graph.value(v).size())
                .sum::<u64>();
        }
        if size != 0 {
            self.memo.insert(chosen.clone());
            if size < self.min_size
                || (size == self.min_size && chosen.len() > self.best_set.len())
            {
                self.min_size = size;
                self.best_set = chosen.clone();
            }
        }

        // Candidates: not yet chosen, all in-cone predecessors chosen
        let mut cand: Vec<HierId> = pred_count
            .iter()
            .filter(|&(_, &cnt)| cnt == 0)
            .map(|(&seq, _)| seq)
            .collect();
        cand.sort_unstable();

        for seq in cand {
            let idx = match chosen.binary_search(&seq) {
                Err(idx) => idx,
                Ok(_) => continue,
            };
            chosen.insert(idx, seq);
            pred_count.remove(&seq);
            for succ in self.cone_neighbors(seq, Walk::Succs) {
                if let Some(cnt) = pred_count.get_mut(&succ) {
                    *cnt -= 1;
                }
            }
            succ_count.insert(seq, self.hier.vert(seq).succs.len() as u32);
            for pred in self.cone_neighbors(seq, Walk::Preds) {
                if let Some(cnt) = succ_count.get_mut(&pred) {
                    *cnt -= 1;
                }
            }

            self.search(chosen, pred_count, succ_count);

            chosen.remove(idx);
            pred_count.insert(seq, 0);
            for succ in self.cone_neighbors(seq, Walk::Succs) {
                if let Some(cnt) = pred_count.get_mut(&succ) {
                    *cnt += 1;
                }
            }
            succ_count.remove(&seq);
            for pred in self.cone_neighbors(seq, Walk::Preds) {
                if let Some(cnt) = succ_count.get_mut(&pred) {
                    *cnt += 1;
                }
            }
        }
    }

    /// Neighbors restricted to sequences inside the candidate cone
    fn cone_neighbors(&self, seq: HierId, dir: Walk) -> Vec<HierId> {
        let list = match dir {
            Walk::Preds => &self.hier.vert(seq).preds,
            Walk::Succs => &self.hier.vert(seq).succs,
        };
        list.iter()
            .copied()
            .filter(|v| self.hier.is_sequence(*v) && self.all_seqs.contains(v))
            .collect()
    }
}

/// Build the group(s) around one not-yet-grouped cell output.
fn make_group_from_cell(hier: &mut HierGraph, cell_out: HierId, intrusion: bool) {
    // Cell body: everything the cell output post-dominates, walked upstream
    let (seqs, cell_in_front, cell_entrs) = SequenceDetector::new(
        hier,
        |h: &HierGraph, s| h.post_dominates(cell_out, s, false),
        Walk::Preds,
    )
    .detect(cell_out);

    // Intrusion candidates: everything the cell output dominates, walked
    // downstream
    let (intr_cone, intr_out_front, _intr_exits) = SequenceDetector::new(
        hier,
        |h: &HierGraph, s| h.dominates(cell_out, s, false),
        Walk::Succs,
    )
    .detect(cell_out);

    // Intrusion is impossible when the cell output itself sits on the
    // outbound frontier (some successor escapes its dominance cone)
    if !intrusion || intr_out_front.contains(&cell_out) {
        create_group(hier, &seqs, &cell_in_front, &[cell_out], &cell_entrs, &[cell_out]);
        return;
    }

    let min_set = OutputSizeOptimizer::new(hier, &intr_cone).optimize(cell_out);
    if min_set.len() <= 2 {
        // A trivial subset is not worth a second group
        create_group(hier, &seqs, &cell_in_front, &[cell_out], &cell_entrs, &[cell_out]);
        return;
    }

    // Re-detect frontiers restricted to the chosen subset
    let min_set_lookup: BTreeSet<HierId> = min_set.iter().copied().collect();
    let (mut intruded, mut intr_out_front, mut intr_exits) = SequenceDetector::new(
        hier,
        |_h: &HierGraph, s| min_set_lookup.contains(&s),
        Walk::Succs,
    )
    .detect(cell_out);
    intruded.remove(&cell_out);
    intr_out_front.retain(|&s| s != cell_out);
    intr_exits.retain(|&s| s != cell_out);

    // Input frontier of the intruded side: the cell output's successor
    // sequences that made it into the subset
    let mut intr_in_front = Vec::new();
    let mut intr_entrs = Vec::new();
    for &succ in hier.vert(cell_out).succs.clone().iter() {
        if !hier.is_sequence(succ) || !intruded.contains(&succ) {
            continue;
        }
        intr_in_front.push(succ);
        let from_inside = hier
            .vert(succ)
            .preds
            .iter()
            .any(|&p| hier.is_sequence(p) && intruded.contains(&p));
        if !from_inside {
            intr_entrs.push(succ);
        }
    }

    create_group(hier, &seqs, &cell_in_front, &[cell_out], &cell_entrs, &[cell_out]);
    create_group(
        hier,
        &intruded,
        &intr_in_front,
        &intr_out_front,
        &intr_entrs,
        &intr_exits,
    );
}

/// Cross-boundary consumption: occurrences of outside-defined values among
/// the input frontier's inputs, in ascending value-id order.
fn count_consumed(
    hier: &HierGraph,
    set: &BTreeSet<HierId>,
    in_front: &[HierId],
) -> Vec<(ValueId, u32)> {
    let mut consumed: BTreeMap<ValueId, u32> = BTreeMap::new();
    for &seq in in_front {
        for &input in &hier.seq(seq).inputs {
            let def = hier.graph.value(input).def;
            let inside = def
                .filter(|d| hier.graph.vertex(*d).is_op())
                .and_then(|d| hier.op_to_seq.get(&d))
                .map(|s| set.contains(s))
                .unwrap_or(false);
            if !inside {
                *consumed.entry(input).or_insert(0) += 1;
            }
        }
    }
    consumed.into_iter().collect()
}

/// Cross-boundary production: output-frontier values with the uses left
/// after in-set consumption, zero-use entries pruned, ascending by id.
fn count_produced(
    hier: &HierGraph,
    set: &BTreeSet<HierId>,
    out_front: &[HierId],
) -> Vec<(ValueId, u32)> {
    let mut produced: BTreeMap<ValueId, u32> = BTreeMap::new();
    for &seq in out_front {
        for &output in &hier.seq(seq).outputs {
            produced
                .entry(output)
                .or_insert_with(|| hier.graph.value(output).use_count());
        }
    }
    for &seq in set {
        for &input in &hier.seq(seq).inputs {
            if let Some(cnt) = produced.get_mut(&input) {
                *cnt -= 1;
            }
        }
    }
    produced.into_iter().filter(|&(_, cnt)| cnt != 0).collect()
}

/// Materialize a group: set back-references, account the boundary, and
/// rewire external edges onto the group vertex.
fn create_group(
    hier: &mut HierGraph,
    set: &BTreeSet<HierId>,
    in_front: &[HierId],
    out_front: &[HierId],
    entrs: &[HierId],
    exits: &[HierId],
) -> HierId {
    let group = Group {
        seqs: set.iter().copied().collect(),
        entrs: entrs.to_vec(),
        exits: exits.to_vec(),
        in_front: in_front.to_vec(),
        out_front: out_front.to_vec(),
        consumed: count_consumed(hier, set, in_front),
        produced: count_produced(hier, set, out_front),
    };
    let gid = hier.push_vertex(HierKind::Group(group));

    for &seq in set {
        hier.seq_mut(seq).group = Some(gid);
    }

    // External predecessors now point at the group
    for &front in in_front {
        let preds = hier.vert(front).preds.clone();
        let mut kept = Vec::new();
        for pred in preds {
            if hier.is_sequence(pred) && set.contains(&pred) {
                kept.push(pred);
            } else {
                hier.replace_succ_of_pred(pred, front, gid);
                hier.add_pred(gid, pred);
            }
        }
        hier.vert_mut(front).preds = kept;
    }

    // External successors likewise
    for &front in out_front {
        let succs = hier.vert(front).succs.clone();
        let mut kept = Vec::new();
        for succ in succs {
            if hier.is_sequence(succ) && set.contains(&succ) {
                kept.push(succ);
            } else {
                hier.replace_pred_of_succ(succ, front, gid);
                hier.add_succ(gid, succ);
            }
        }
        hier.vert_mut(front).succs = kept;
    }

    gid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tensor::{DataType, TensorType};
    use crate::hier::join::JoinSequencePass;
    use crate::model::{ModelGraph, ModelNode, ModelValueInfo};

    fn value_info(name: &str, n: i64) -> ModelValueInfo {
        ModelValueInfo {
            name: name.to_string(),
            ty: TensorType::new(vec![n], DataType::Float),
        }
    }

    fn node(op_type: &str, inputs: &[&str], outputs: &[&str]) -> ModelNode {
        ModelNode {
            name: String::new(),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            attributes: Default::default(),
        }
    }

    /// Inception-like cell: one branch of three convs, one of a single
    /// conv, joining at a Concat whose result feeds a growing Resize. The
    /// Resize raises the footprint, so joining leaves it outside the cell.
    fn inception_cell() -> Graph {
        let model = ModelGraph {
            name: "cell".to_string(),
            inputs: vec![value_info("x", 4)],
            outputs: vec![value_info("big", 32)],
            initializers: vec![],
            value_infos: vec![
                value_info("b1_0", 4),
                value_info("b1_1", 4),
                value_info("b1_2", 4),
                value_info("b2_0", 4),
                value_info("cat", 8),
            ],
            nodes: vec![
                node("Conv", &["x"], &["b1_0"]),
                node("Conv", &["b1_0"], &["b1_1"]),
                node("Conv", &["b1_1"], &["b1_2"]),
                node("Conv", &["x"], &["b2_0"]),
                node("Concat", &["b1_2", "b2_0"], &["cat"]),
                node("Resize", &["cat"], &["big"]),
            ],
        };
        Graph::from_model(&model).unwrap()
    }

    #[test]
    fn test_cell_becomes_one_group() {
        let graph = inception_cell();
        let mut hier = HierGraph::new(&graph);
        JoinSequencePass.run(&mut hier).unwrap();
        MakeGroupPass::default().run(&mut hier).unwrap();

        let groups: Vec<HierId> = hier.groups();
        assert_eq!(groups.len(), 1);

        let concat_seq = hier.op_to_seq[&graph.ops[4]];
        let group = hier.group(groups[0]);
        assert_eq!(group.exits, vec![concat_seq]);
        assert!(group.seqs.contains(&concat_seq));
        // The whole cell is inside; the trailing Resize is not
        for op in &graph.ops[..5] {
            assert!(group.seqs.contains(&hier.op_to_seq[op]));
        }
        assert!(!group.seqs.contains(&hier.op_to_seq[&graph.ops[5]]));
        // The single consumed value is the cell input, used by two branches
        let x = graph.value(graph.op(graph.ops[0]).inputs[0]).name.clone();
        assert_eq!(x, "x");
        assert_eq!(group.consumed.len(), 1);
        assert_eq!(group.consumed[0].1, 2);
        // The concat result flows out with its single remaining use
        assert_eq!(group.produced.len(), 1);
        assert_eq!(group.produced[0].1, 1);
    }

    #[test]
    fn test_group_rewires_boundary_edges() {
        let graph = inception_cell();
        let mut hier = HierGraph::new(&graph);
        JoinSequencePass.run(&mut hier).unwrap();
        MakeGroupPass::default().run(&mut hier).unwrap();

        let gid = hier.groups()[0];
        // The graph input now feeds the group
        let input = hier.inputs[0];
        assert_eq!(hier.vert(input).succs, vec![gid]);
        assert_eq!(hier.vert(gid).preds, vec![input]);
        // The group feeds the trailing Resize's sequence
        let resize_seq = hier.op_to_seq[&graph.ops[5]];
        assert_eq!(hier.vert(gid).succs, vec![resize_seq]);
        assert_eq!(hier.vert(resize_seq).preds, vec![gid]);
    }

    #[test]
    fn test_sequences_carry_group_backrefs() {
        let graph = inception_cell();
        let mut hier = HierGraph::new(&graph);
        JoinSequencePass.run(&mut hier).unwrap();
        MakeGroupPass::default().run(&mut hier).unwrap();

        let gid = hier.groups()[0];
        for &seq in &hier.group(gid).seqs {
            assert_eq!(hier.seq(seq).group, Some(gid));
        }
    }

    #[test]
    fn test_no_concat_no_groups() {
        let model = ModelGraph {
            name: "plain".to_string(),
            inputs: vec![value_info("x", 4)],
            outputs: vec![value_info("y", 4)],
            initializers: vec![],
            value_infos: vec![],
            nodes: vec![node("Conv", &["x"], &["y"])],
        };
        let graph = Graph::from_model(&model).unwrap();
        let mut hier = HierGraph::new(&graph);
        MakeGroupPass::default().run(&mut hier).unwrap();
        assert!(!hier.has_groups());
    }

    #[test]
    fn test_custom_cell_predicate() {
        fn add_is_cell(graph: &Graph, seq: &Sequence) -> bool {
            graph.op(seq.ops[0]).op_type == "Add"
        }
        let model = ModelGraph {
            name: "addcell".to_string(),
            inputs: vec![value_info("x", 4)],
            outputs: vec![value_info("out", 4)],
            initializers: vec![],
            value_infos: vec![value_info("a", 4), value_info("b", 4)],
            nodes: vec![
                node("Conv", &["x"], &["a"]),
                node("Conv", &["x"], &["b"]),
                node("Add", &["a", "b"], &["out"]),
            ],
        };
        let graph = Graph::from_model(&model).unwrap();
        let mut hier = HierGraph::new(&graph);
        let pass = MakeGroupPass {
            intrusion: true,
            cell_output: add_is_cell,
        };
        pass.run(&mut hier).unwrap();
        assert!(hier.has_groups());
    }
}
