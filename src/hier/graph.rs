//! The hierarchical graph
//!
//! A coarser view of the computation graph whose nodes are `Sequence`s
//! (linear op chains scheduled atomically) and `Group`s (reconvergent cells
//! scheduled jointly). Construction wraps every op as a singleton sequence;
//! the coarsening passes then mutate the graph in place.
//!
//! Vertices live in a push-only arena. Removing a vertex (a dissolved group
//! or a fused-away sequence) tombstones it as `Dead`; ids are never reused,
//! which keeps memoization keys from earlier scheduler iterations unambiguous.

use crate::graph::dom::DomTree;
use crate::graph::graph::reverse_post_order;
use crate::graph::{Graph, ValueId, VertexId, VertexKind};
use std::collections::HashMap;

/// Handle of a vertex in the hierarchical graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HierId(pub u32);

impl HierId {
    /// Index into the owning arena
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A linear chain of ops scheduled as a unit
///
/// Every op except the first consumes only values produced by the op before
/// it, and every intermediate value is used only by the next op. `inputs`
/// and `outputs` are the chain's boundary values; parameters are excluded.
#[derive(Debug, Clone)]
pub struct Sequence {
    /// Ops in execution order
    pub ops: Vec<VertexId>,
    /// External input values (first op's non-parameter inputs)
    pub inputs: Vec<ValueId>,
    /// External output values (last op's outputs)
    pub outputs: Vec<ValueId>,
    /// Enclosing group, if any
    pub group: Option<HierId>,
}

/// A set of sequences whose combined schedule is optimized jointly
///
/// Def-use chains crossing the boundary follow a producer-consumer model:
/// a definition produces `uses` counts, each use consumes one. `consumed`
/// and `produced` record only cross-boundary counts, in ascending value-id
/// order so that kill masks index them canonically.
#[derive(Debug, Clone)]
pub struct Group {
    /// Member sequences, ascending by id
    pub seqs: Vec<HierId>,
    /// Sequences whose predecessors all lie outside the group
    pub entrs: Vec<HierId>,
    /// Sequences whose successors all lie outside the group
    pub exits: Vec<HierId>,
    /// Sequences with at least one predecessor outside the group
    pub in_front: Vec<HierId>,
    /// Sequences with at least one successor outside the group
    pub out_front: Vec<HierId>,
    /// Outside values consumed across the boundary: (value, use count)
    pub consumed: Vec<(ValueId, u32)>,
    /// Inside values still used outside: (value, remaining uses)
    pub produced: Vec<(ValueId, u32)>,
}

/// Vertex payload of the hierarchical graph
#[derive(Debug, Clone)]
pub enum HierKind {
    /// Mirrors a graph input
    Input(ValueId),
    /// Mirrors a graph output
    Output(ValueId),
    /// A linear op chain
    Sequence(Sequence),
    /// A reconvergent cell
    Group(Group),
    /// Tombstone of a removed vertex
    Dead,
}

/// A hierarchical-graph vertex with current and shadow adjacency
///
/// `prev_preds`/`prev_succs` snapshot the edges right before grouping began;
/// ungrouping uses them to restore direct sequence-to-sequence edges.
#[derive(Debug, Clone)]
pub struct HierVertex {
    /// Vertex payload
    pub kind: HierKind,
    /// Predecessors, duplicate-free
    pub preds: Vec<HierId>,
    /// Successors, duplicate-free
    pub succs: Vec<HierId>,
    /// Shadow predecessors captured before grouping
    pub prev_preds: Vec<HierId>,
    /// Shadow successors captured before grouping
    pub prev_succs: Vec<HierId>,
}

impl HierVertex {
    fn new(kind: HierKind) -> Self {
        Self {
            kind,
            preds: Vec::new(),
            succs: Vec::new(),
            prev_preds: Vec::new(),
            prev_succs: Vec::new(),
        }
    }
}

/// A hierarchical graph over a computation graph
#[derive(Debug)]
pub struct HierGraph<'g> {
    /// The underlying computation graph
    pub graph: &'g Graph,
    pub(crate) verts: Vec<HierVertex>,
    /// Input vertices, in graph order
    pub inputs: Vec<HierId>,
    /// Output vertices, in graph order
    pub outputs: Vec<HierId>,
    /// Current sequence of each op
    pub op_to_seq: HashMap<VertexId, HierId>,
    /// Dominator tree, built on demand by the grouping pass
    pub(crate) dom: Option<DomTree>,
    /// Post-dominator tree, built on demand by the grouping pass
    pub(crate) post_dom: Option<DomTree>,
}

impl<'g> HierGraph<'g> {
    /// Build the hierarchical view of a graph: one singleton sequence per
    /// op, one `Input`/`Output` per graph terminal, edges projected 1:1.
    pub fn new(graph: &'g Graph) -> Self {
        let mut hier = HierGraph {
            graph,
            verts: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            op_to_seq: HashMap::new(),
            dom: None,
            post_dom: None,
        };

        // Allocate one hier vertex per graph vertex, in graph id order
        let mut vert_map: HashMap<VertexId, HierId> = HashMap::new();
        for (vid, vert) in graph.iter_vertices() {
            let hid = match &vert.kind {
                VertexKind::Input(val) => {
                    let hid = hier.push_vertex(HierKind::Input(*val));
                    hier.inputs.push(hid);
                    hid
                }
                VertexKind::Output(val) => {
                    let hid = hier.push_vertex(HierKind::Output(*val));
                    hier.outputs.push(hid);
                    hid
                }
                VertexKind::Op(op) => {
                    let inputs = op
                        .inputs
                        .iter()
                        .copied()
                        .filter(|&v| !graph.value(v).is_param())
                        .collect();
                    let hid = hier.push_vertex(HierKind::Sequence(Sequence {
                        ops: vec![vid],
                        inputs,
                        outputs: op.outputs.clone(),
                        group: None,
                    }));
                    hier.op_to_seq.insert(vid, hid);
                    hid
                }
            };
            vert_map.insert(vid, hid);
        }

        // Project edges
        for (vid, vert) in graph.iter_vertices() {
            let hid = vert_map[&vid];
            hier.verts[hid.index()].preds = vert.preds.iter().map(|p| vert_map[p]).collect();
            hier.verts[hid.index()].succs = vert.succs.iter().map(|s| vert_map[s]).collect();
        }

        hier
    }

    pub(crate) fn push_vertex(&mut self, kind: HierKind) -> HierId {
        let id = HierId(self.verts.len() as u32);
        self.verts.push(HierVertex::new(kind));
        id
    }

    /// Vertex by id
    pub fn vert(&self, id: HierId) -> &HierVertex {
        &self.verts[id.index()]
    }

    pub(crate) fn vert_mut(&mut self, id: HierId) -> &mut HierVertex {
        &mut self.verts[id.index()]
    }

    /// Sequence payload; panics on non-sequence ids
    pub fn seq(&self, id: HierId) -> &Sequence {
        match &self.verts[id.index()].kind {
            HierKind::Sequence(seq) => seq,
            other => panic!("vertex {id:?} is not a sequence: {other:?}"),
        }
    }

    pub(crate) fn seq_mut(&mut self, id: HierId) -> &mut Sequence {
        match &mut self.verts[id.index()].kind {
            HierKind::Sequence(seq) => seq,
            other => panic!("vertex {id:?} is not a sequence: {other:?}"),
        }
    }

    /// Group payload; panics on non-group ids
    pub fn group(&self, id: HierId) -> &Group {
        match &self.verts[id.index()].kind {
            HierKind::Group(group) => group,
            other => panic!("vertex {id:?} is not a group: {other:?}"),
        }
    }

    /// Whether `id` refers to a live sequence
    pub fn is_sequence(&self, id: HierId) -> bool {
        matches!(self.verts[id.index()].kind, HierKind::Sequence(_))
    }

    /// Whether `id` refers to a live group
    pub fn is_group(&self, id: HierId) -> bool {
        matches!(self.verts[id.index()].kind, HierKind::Group(_))
    }

    /// Whether any live group exists
    pub fn has_groups(&self) -> bool {
        self.verts
            .iter()
            .any(|v| matches!(v.kind, HierKind::Group(_)))
    }

    /// Live sequence ids, ascending
    pub fn sequences(&self) -> Vec<HierId> {
        self.verts
            .iter()
            .enumerate()
            .filter(|(_, v)| matches!(v.kind, HierKind::Sequence(_)))
            .map(|(i, _)| HierId(i as u32))
            .collect()
    }

    /// Live group ids, ascending
    pub fn groups(&self) -> Vec<HierId> {
        self.verts
            .iter()
            .enumerate()
            .filter(|(_, v)| matches!(v.kind, HierKind::Group(_)))
            .map(|(i, _)| HierId(i as u32))
            .collect()
    }

    /// Total arena size, tombstones included
    pub fn vertex_count(&self) -> usize {
        self.verts.len()
    }

    /// Traverse live vertices from the outputs so that every vertex comes
    /// after all of its predecessors (a topological order).
    pub fn rpo(&self) -> Vec<HierId> {
        reverse_post_order(&self.outputs, |v: HierId| {
            self.verts[v.index()].preds.as_slice()
        })
    }

    /// Snapshot every live vertex's edges into the shadow lists.
    pub fn backup_edges(&mut self) {
        for vert in &mut self.verts {
            if matches!(vert.kind, HierKind::Dead) {
                continue;
            }
            vert.prev_preds = vert.preds.clone();
            vert.prev_succs = vert.succs.clone();
        }
    }

    /// Whether `a` dominates `b` (requires the grouping pass to have built
    /// the tree; absent trees dominate nothing)
    pub fn dominates(&self, a: HierId, b: HierId, strict: bool) -> bool {
        self.dom
            .as_ref()
            .map(|t| t.dominates(a.0, b.0, strict))
            .unwrap_or(false)
    }

    /// Whether `a` post-dominates `b`
    pub fn post_dominates(&self, a: HierId, b: HierId, strict: bool) -> bool {
        self.post_dom
            .as_ref()
            .map(|t| t.dominates(a.0, b.0, strict))
            .unwrap_or(false)
    }

    /// Dominator tree, if built
    pub fn dom_tree(&self) -> Option<&DomTree> {
        self.dom.as_ref()
    }

    /// Post-dominator tree, if built
    pub fn post_dom_tree(&self) -> Option<&DomTree> {
        self.post_dom.as_ref()
    }

    /// Short human-readable label of a vertex (used by reporters)
    pub fn label(&self, id: HierId) -> String {
        match &self.verts[id.index()].kind {
            HierKind::Input(val) | HierKind::Output(val) => {
                self.graph.value(*val).name.clone()
            }
            HierKind::Sequence(seq) => seq
                .ops
                .iter()
                .map(|&op| self.graph.op(op).op_type.as_str())
                .collect::<Vec<_>>()
                .join("\\n"),
            HierKind::Group(group) => {
                let front = |ids: &[HierId], last: bool| {
                    ids.iter()
                        .map(|&s| {
                            let ops = &self.seq(s).ops;
                            let op = if last { *ops.last().unwrap() } else { ops[0] };
                            self.graph.op(op).op_type.as_str()
                        })
                        .collect::<Vec<_>>()
                        .join(" ")
                };
                format!(
                    "{}\\n...\\n{}",
                    front(&group.in_front, false),
                    front(&group.out_front, true)
                )
            }
            HierKind::Dead => String::from("<dead>"),
        }
    }

    // ---- Edge surgery helpers ----

    pub(crate) fn add_pred(&mut self, vert: HierId, pred: HierId) {
        let list = &mut self.vert_mut(vert).preds;
        if !list.contains(&pred) {
            list.push(pred);
        }
    }

    pub(crate) fn add_succ(&mut self, vert: HierId, succ: HierId) {
        let list = &mut self.vert_mut(vert).succs;
        if !list.contains(&succ) {
            list.push(succ);
        }
    }

    pub(crate) fn remove_pred(&mut self, vert: HierId, pred: HierId) {
        self.vert_mut(vert).preds.retain(|&p| p != pred);
    }

    pub(crate) fn remove_succ(&mut self, vert: HierId, succ: HierId) {
        self.vert_mut(vert).succs.retain(|&s| s != succ);
    }

    /// In `pred`'s successor list, replace `old` by `new`; if `new` is
    /// already present just drop `old` (multi-edges are not allowed).
    pub(crate) fn replace_succ_of_pred(&mut self, pred: HierId, old: HierId, new: HierId) {
        let succs = &mut self.vert_mut(pred).succs;
        if succs.contains(&new) {
            succs.retain(|&s| s != old);
        } else {
            for s in succs.iter_mut() {
                if *s == old {
                    *s = new;
                }
            }
        }
    }

    /// In `succ`'s predecessor list, replace `old` by `new`; if `new` is
    /// already present just drop `old`.
    pub(crate) fn replace_pred_of_succ(&mut self, succ: HierId, old: HierId, new: HierId) {
        let preds = &mut self.vert_mut(succ).preds;
        if preds.contains(&new) {
            preds.retain(|&p| p != old);
        } else {
            for p in preds.iter_mut() {
                if *p == old {
                    *p = new;
                }
            }
        }
    }

    /// Redirect every successor of `old` to treat `new` as the predecessor.
    pub(crate) fn replace_pred_of_all_succs(&mut self, old: HierId, new: HierId) {
        let succs = self.vert(old).succs.clone();
        for succ in succs {
            self.replace_pred_of_succ(succ, old, new);
        }
    }

    /// Tombstone a vertex, clearing its adjacency.
    pub(crate) fn kill_vertex(&mut self, id: HierId) {
        let vert = self.vert_mut(id);
        vert.kind = HierKind::Dead;
        vert.preds.clear();
        vert.succs.clear();
        vert.prev_preds.clear();
        vert.prev_succs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tensor::{DataType, TensorType};
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

    fn diamond() -> Graph {
        let model = ModelGraph {
            name: "diamond".to_string(),
            inputs: vec![value_info("x", 2)],
            outputs: vec![value_info("d", 1)],
            initializers: vec![],
            value_infos: vec![value_info("a", 2), value_info("b", 1), value_info("c", 1)],
            nodes: vec![
                node("Relu", &["x"], &["a"]),
                node("ReduceMean", &["a"], &["b"]),
                node("ReduceMax", &["a"], &["c"]),
                node("Add", &["b", "c"], &["d"]),
            ],
        };
        Graph::from_model(&model).unwrap()
    }

    #[test]
    fn test_hier_construction_projects_edges() {
        let graph = diamond();
        let hier = HierGraph::new(&graph);

        assert_eq!(hier.inputs.len(), 1);
        assert_eq!(hier.outputs.len(), 1);
        assert_eq!(hier.sequences().len(), 4);

        // Every sequence starts as a singleton
        for seq_id in hier.sequences() {
            assert_eq!(hier.seq(seq_id).ops.len(), 1);
        }

        // The fork: relu's sequence has two successors
        let relu_seq = hier.op_to_seq[&graph.ops[0]];
        assert_eq!(hier.vert(relu_seq).succs.len(), 2);

        // The join: add's sequence has two predecessors
        let add_seq = hier.op_to_seq[&graph.ops[3]];
        assert_eq!(hier.vert(add_seq).preds.len(), 2);
    }

    #[test]
    fn test_rpo_is_topological() {
        let graph = diamond();
        let hier = HierGraph::new(&graph);
        let order = hier.rpo();
        let pos = |h: HierId| order.iter().position(|&x| x == h).unwrap();
        let relu = hier.op_to_seq[&graph.ops[0]];
        let add = hier.op_to_seq[&graph.ops[3]];
        assert!(pos(hier.inputs[0]) < pos(relu));
        assert!(pos(relu) < pos(add));
        assert!(pos(add) < pos(hier.outputs[0]));
    }

    #[test]
    fn test_backup_and_kill() {
        let graph = diamond();
        let mut hier = HierGraph::new(&graph);
        let relu = hier.op_to_seq[&graph.ops[0]];
        hier.backup_edges();
        assert_eq!(hier.vert(relu).prev_succs, hier.vert(relu).succs);

        let add = hier.op_to_seq[&graph.ops[3]];
        hier.kill_vertex(add);
        assert!(!hier.is_sequence(add));
        assert!(hier.vert(add).preds.is_empty());
    }

    #[test]
    fn test_params_excluded_from_sequence_inputs() {
        let model = ModelGraph {
            name: "conv".to_string(),
            inputs: vec![value_info("x", 8)],
            outputs: vec![value_info("y", 8)],
            initializers: vec![crate::model::ModelTensor {
                name: "w".to_string(),
                ty: TensorType::new(vec![25], DataType::Float),
                data: vec![],
            }],
            value_infos: vec![],
            nodes: vec![node("Conv", &["x", "w"], &["y"])],
        };
        let graph = Graph::from_model(&model).unwrap();
        let hier = HierGraph::new(&graph);
        let seq = hier.op_to_seq[&graph.ops[0]];
        assert_eq!(hier.seq(seq).inputs.len(), 1);
    }
}
