//! Group dissolution
//!
//! Ungrouping deletes a `Group` vertex and reattaches its frontier
//! sequences to the group's current neighbors, using the shadow edge lists
//! captured before grouping began. Neighbors that are themselves groups are
//! reconnected through their own frontiers' shadow edges, since group
//! vertices did not exist when the shadows were taken.

use crate::hier::graph::{HierGraph, HierId};

/// Dissolve `group_id`, restoring direct sequence edges.
pub fn ungroup(hier: &mut HierGraph, group_id: HierId) {
    let group = hier.group(group_id).clone();

    // Reconnect predecessors with the input frontier
    let pred_restore = find_edges_to_restore(
        hier,
        &group.in_front,
        &hier.vert(group_id).preds.clone(),
        RestoreSide::Preds,
    );
    for (front, neighbors) in pred_restore {
        for neighbor in neighbors {
            hier.add_pred(front, neighbor);
            hier.remove_succ(neighbor, group_id);
            hier.add_succ(neighbor, front);
        }
    }

    // Reconnect successors with the output frontier
    let succ_restore = find_edges_to_restore(
        hier,
        &group.out_front,
        &hier.vert(group_id).succs.clone(),
        RestoreSide::Succs,
    );
    for (front, neighbors) in succ_restore {
        for neighbor in neighbors {
            hier.add_succ(front, neighbor);
            hier.remove_pred(neighbor, group_id);
            hier.add_pred(neighbor, front);
        }
    }

    // Clear membership and drop the vertex
    for &seq in &group.seqs {
        hier.seq_mut(seq).group = None;
    }
    hier.kill_vertex(group_id);
}

/// Repeatedly dissolve any group found among `seq`'s successors.
pub fn try_ungroup_succs(hier: &mut HierGraph, seq: HierId) -> bool {
    let mut changed = false;
    loop {
        let next_group = hier
            .vert(seq)
            .succs
            .iter()
            .copied()
            .find(|&succ| hier.is_group(succ));
        match next_group {
            Some(group) => {
                ungroup(hier, group);
                changed = true;
            }
            None => break,
        }
    }
    changed
}

#[derive(Clone, Copy)]
enum RestoreSide {
    /// Restoring the in-frontier: consult neighbors' shadow successors
    Preds,
    /// Restoring the out-frontier: consult neighbors' shadow predecessors
    Succs,
}

/// For each frontier sequence, find which of the group's neighbors had a
/// direct shadow edge to it. A neighboring group is matched through the
/// shadow edges of its own opposite frontier.
fn find_edges_to_restore(
    hier: &HierGraph,
    frontier: &[HierId],
    neighbors: &[HierId],
    side: RestoreSide,
) -> Vec<(HierId, Vec<HierId>)> {
    let mut restore: Vec<(HierId, Vec<HierId>)> =
        frontier.iter().map(|&f| (f, Vec::new())).collect();
    let mut push = |front: HierId, neighbor: HierId, restore: &mut Vec<(HierId, Vec<HierId>)>| {
        if let Some(entry) = restore.iter_mut().find(|(f, _)| *f == front) {
            if !entry.1.contains(&neighbor) {
                entry.1.push(neighbor);
            }
        }
    };

    for &neighbor in neighbors {
        if hier.is_group(neighbor) {
            let opposite = match side {
                RestoreSide::Preds => hier.group(neighbor).out_front.clone(),
                RestoreSide::Succs => hier.group(neighbor).in_front.clone(),
            };
            for inner in opposite {
                let shadow = match side {
                    RestoreSide::Preds => &hier.vert(inner).prev_succs,
                    RestoreSide::Succs => &hier.vert(inner).prev_preds,
                };
                for &out in shadow {
                    if hier.is_sequence(out) {
                        push(out, neighbor, &mut restore);
                    }
                }
            }
        } else {
            let shadow = match side {
                RestoreSide::Preds => &hier.vert(neighbor).prev_succs,
                RestoreSide::Succs => &hier.vert(neighbor).prev_preds,
            };
            for &out in shadow {
                if hier.is_sequence(out) {
                    push(out, neighbor, &mut restore);
                }
            }
        }
    }

    restore
}
