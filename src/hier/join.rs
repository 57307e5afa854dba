//! Sequence-joining pass
//!
//! Greedily fuses linear runs of sequences into longer ones. Walking the
//! graph in topological order, each sequence absorbs its unique successor
//! while the fusion does not raise the local memory footprint: the candidate
//! transient level must stay within the running stable maximum and the
//! candidate stable level within the latest level. The guard keeps a fused
//! sequence from committing the scheduler to a worse peak than scheduling
//! the two halves apart.

use crate::error::ForgeResult;
use crate::graph::{Graph, VertexId};
use crate::hier::graph::{HierGraph, HierId};
use crate::precondition_error;
use crate::sched::mem::{compute_inc_dec, MemStateVec};
use std::collections::HashSet;

/// The sequence-joining pass
///
/// Must run before any groups exist; running it on a graph with groups is a
/// programming error and fails fast.
#[derive(Debug, Default)]
pub struct JoinSequencePass;

impl JoinSequencePass {
    /// Run the pass, mutating the graph in place.
    pub fn run(&self, hier: &mut HierGraph) -> ForgeResult<()> {
        if hier.has_groups() {
            return Err(precondition_error!(
                "cannot run sequence joining on a hierarchical graph with groups"
            ));
        }

        // Topological walk from the inputs; joining only rewrites edges
        // downstream of the vertex in hand, so a plain DFS worklist with a
        // visited set is enough.
        let mut visited: HashSet<HierId> = HashSet::new();
        let mut stack: Vec<HierId> = hier.inputs.iter().rev().copied().collect();
        while let Some(vert) = stack.pop() {
            if !visited.insert(vert) {
                continue;
            }
            if hier.is_sequence(vert) {
                join_chain(hier, vert);
            }
            let succs = hier.vert(vert).succs.clone();
            for succ in succs.into_iter().rev() {
                if !visited.contains(&succ) {
                    stack.push(succ);
                }
            }
        }
        Ok(())
    }
}

/// Absorb successors into `cur` while the footprint guard allows it.
fn join_chain(hier: &mut HierGraph, cur: HierId) {
    let mut states = MemStateVec::new();
    let first_op = hier.seq(cur).ops[0];
    let (inc, dec) = local_inc_dec(hier.graph, first_op);
    states.append(inc, dec);

    loop {
        let succs = &hier.vert(cur).succs;
        if succs.len() != 1 {
            break;
        }
        let next = succs[0];
        if !hier.is_sequence(next) {
            break;
        }
        if hier.vert(next).preds.len() != 1 {
            break;
        }

        let next_op = hier.seq(next).ops[0];
        let (inc, dec) = local_inc_dec(hier.graph, next_op);
        let (transient, stable) = states.compute_state(inc, dec);
        if transient > states.stables().max() || stable > states.latest() {
            break; // incurs higher footprint, stop here
        }
        states.append(inc, dec);
        join(hier, cur, next);
    }
}

/// `(inc, dec)` of an op judged in isolation: an input counts as killed
/// when the op is its only consumer.
fn local_inc_dec(graph: &Graph, op: VertexId) -> (u64, u64) {
    let node = graph.op(op);
    let mut killed = Vec::new();
    for &input in &node.inputs {
        let val = graph.value(input);
        if val.uses.iter().all(|&user| user == op) && !killed.contains(&input) {
            killed.push(input);
        }
    }
    compute_inc_dec(graph, op, &killed)
}

/// Merge `next` into `prev` and drop `next` from the graph.
fn join(hier: &mut HierGraph, prev: HierId, next: HierId) {
    let next_seq = hier.seq(next).clone();
    for &op in &next_seq.ops {
        hier.op_to_seq.insert(op, prev);
    }
    {
        let prev_seq = hier.seq_mut(prev);
        prev_seq.ops.extend(next_seq.ops.iter().copied());
        prev_seq.outputs = next_seq.outputs;
    }

    // Reconnect: prev takes over next's successors
    let next_succs = hier.vert(next).succs.clone();
    hier.vert_mut(prev).succs = next_succs;
    hier.replace_pred_of_all_succs(next, prev);
    hier.kill_vertex(next);
}
