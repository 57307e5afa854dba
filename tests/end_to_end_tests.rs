//! End-to-end seed scenarios
//!
//! Small hand-checked graphs exercising the whole pipeline: construction,
//! coarsening, scheduling, lifetime analysis and packing.

mod common;

use common::*;
use opforge::hier::{HierGraph, JoinSequencePass, MakeGroupPass};
use opforge::sched::compute_lifetime;
use opforge::{hierarchical_schedule, reverse_post_order};

fn lifetime_bounds(
    graph: &opforge::Graph,
    stat: &opforge::LifetimeStat,
    name: &str,
) -> (i32, i32) {
    let lt = stat
        .values
        .iter()
        .find(|l| graph.value(l.value).name == name)
        .unwrap_or_else(|| panic!("no lifetime for {name}"));
    (lt.gen, lt.kill)
}

/// Scenario 1: straight element-wise chain, 4-byte tensors throughout.
/// Overlap keeps the whole chain in one 4-byte buffer.
#[test]
fn test_straight_chain() {
    let graph = straight_chain();
    let sched = hierarchical_schedule(&graph).unwrap();
    assert_eq!(sched, graph.ops, "chain must schedule in order");

    let stat = compute_lifetime(&sched, &graph).unwrap();
    assert_eq!(lifetime_bounds(&graph, &stat, "x"), (-1, 0));
    assert_eq!(lifetime_bounds(&graph, &stat, "a"), (0, 1));
    assert_eq!(lifetime_bounds(&graph, &stat, "b"), (1, 2));
    assert_eq!(lifetime_bounds(&graph, &stat, "c"), (2, 3));
    assert_eq!(stat.peak(&graph), 4);
}

/// Scenario 2: Y-fork where no reordering helps; the driver must simply
/// report no improvement over reverse post-order.
#[test]
fn test_y_fork_no_improvement() {
    let graph = y_fork();
    let rpo = reverse_post_order(&graph);
    let rpo_peak = compute_lifetime(&rpo, &graph).unwrap().peak(&graph);
    assert_eq!(rpo_peak, 12);

    let sched = hierarchical_schedule(&graph).unwrap();
    let peak = compute_lifetime(&sched, &graph).unwrap().peak(&graph);
    assert_eq!(peak, 12);
}

/// Scenario 3: diamond with an 8-byte fork value; both interleavings cost
/// 16 bytes, the scheduler must not exceed that.
#[test]
fn test_diamond_peak_bound() {
    let graph = diamond();
    let sched = hierarchical_schedule(&graph).unwrap();
    assert_topological(&graph, &sched);
    let peak = compute_lifetime(&sched, &graph).unwrap().peak(&graph);
    assert_eq!(peak, 16);
}

/// Scenario 4: inception-like cell. Grouping must isolate the cell behind
/// the Concat, and the refined schedule must beat reverse post-order by
/// running the heavy branch before the light one.
#[test]
fn test_inception_cell_grouping_and_improvement() {
    let graph = inception_cell();

    // Structure: exactly one group, exits at the Concat sequence
    let mut hier = HierGraph::new(&graph);
    JoinSequencePass.run(&mut hier).unwrap();
    MakeGroupPass::default().run(&mut hier).unwrap();
    let groups = hier.groups();
    assert_eq!(groups.len(), 1);
    let group = hier.group(groups[0]);
    let concat_seq = hier.op_to_seq[&nth_op(&graph, 4)];
    assert_eq!(group.exits, vec![concat_seq]);
    // The cell consumes its input once per branch
    assert_eq!(group.consumed.len(), 1);
    let (cell_input, uses) = group.consumed[0];
    assert_eq!(graph.value(cell_input).name, "x");
    assert_eq!(uses, 2);

    // Behavior: strict improvement over the baseline
    let rpo_peak = {
        let sched = reverse_post_order(&graph);
        compute_lifetime(&sched, &graph).unwrap().peak(&graph)
    };
    let hier_peak = {
        let sched = hierarchical_schedule(&graph).unwrap();
        compute_lifetime(&sched, &graph).unwrap().peak(&graph)
    };
    assert_eq!(rpo_peak, 84);
    assert_eq!(hier_peak, 72);
}

/// Scenario 5: single element-wise op. The output aliases the input, so
/// the peak is one tensor, not two.
#[test]
fn test_element_wise_overlap() {
    let graph = build_graph(
        "overlap",
        vec![f32_value("x", 4)],
        vec![f32_value("y", 4)],
        vec![],
        vec![],
        vec![op("Relu", &["x"], &["y"])],
    );
    let sched = hierarchical_schedule(&graph).unwrap();
    let stat = compute_lifetime(&sched, &graph).unwrap();
    assert_eq!(lifetime_bounds(&graph, &stat, "x"), (-1, 0));
    assert_eq!(stat.peak(&graph), 16);
}

/// Scenario 6: parameters are invisible to the activation memory model.
#[test]
fn test_parameter_exclusion() {
    let graph = build_graph(
        "weighted",
        vec![f32_value("x", 2)],
        vec![f32_value("y", 2)],
        vec![u8_param("weight", 100)],
        vec![],
        vec![op("Conv", &["x", "weight"], &["y"])],
    );
    let sched = hierarchical_schedule(&graph).unwrap();
    let stat = compute_lifetime(&sched, &graph).unwrap();

    // 8 bytes in + 8 bytes out; never 100+
    assert_eq!(stat.peak(&graph), 16);
    for lt in &stat.values {
        assert!(!graph.value(lt.value).is_param());
    }
}
