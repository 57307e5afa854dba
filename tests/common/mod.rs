//! Shared helpers for building small model graphs in tests
//!
//! Sizes given to `f32_value` are element counts; one f32 element is four
//! bytes, so `f32_value("x", 1)` is the 4-byte tensor used throughout the
//! seed scenarios.
#![allow(dead_code)] // not every suite uses every helper

use opforge::graph::{Graph, TensorType, VertexId};
use opforge::model::{ModelGraph, ModelNode, ModelTensor, ModelValueInfo};
use opforge::DataType;
use std::collections::HashSet;

/// A named f32 tensor declaration with `elems` elements
pub fn f32_value(name: &str, elems: i64) -> ModelValueInfo {
    ModelValueInfo {
        name: name.to_string(),
        ty: TensorType::new(vec![elems], DataType::Float),
    }
}

/// A u8 initializer of `bytes` bytes
pub fn u8_param(name: &str, bytes: usize) -> ModelTensor {
    ModelTensor {
        name: name.to_string(),
        ty: TensorType::new(vec![bytes as i64], DataType::Uint8),
        data: vec![0u8; bytes],
    }
}

/// An operator node
pub fn op(op_type: &str, inputs: &[&str], outputs: &[&str]) -> ModelNode {
    ModelNode {
        name: String::new(),
        op_type: op_type.to_string(),
        inputs: inputs.iter().map(|s| s.to_string()).collect(),
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
        attributes: Default::default(),
    }
}

/// Assemble and build a graph, panicking on construction errors
pub fn build_graph(
    name: &str,
    inputs: Vec<ModelValueInfo>,
    outputs: Vec<ModelValueInfo>,
    initializers: Vec<ModelTensor>,
    value_infos: Vec<ModelValueInfo>,
    nodes: Vec<ModelNode>,
) -> Graph {
    let model = ModelGraph {
        name: name.to_string(),
        inputs,
        outputs,
        initializers,
        value_infos,
        nodes,
    };
    Graph::from_model(&model).expect("test model must build")
}

/// Straight element-wise chain: In -> A -> B -> C -> Out, all 4 bytes
pub fn straight_chain() -> Graph {
    build_graph(
        "straight_chain",
        vec![f32_value("x", 1)],
        vec![f32_value("c", 1)],
        vec![],
        vec![f32_value("a", 1), f32_value("b", 1)],
        vec![
            op("Relu", &["x"], &["a"]),
            op("Relu", &["a"], &["b"]),
            op("Relu", &["b"], &["c"]),
        ],
    )
}

/// Y-fork: In -> A -> {B, C}, both branch results are outputs, all 4 bytes
pub fn y_fork() -> Graph {
    build_graph(
        "y_fork",
        vec![f32_value("x", 1)],
        vec![f32_value("b", 1), f32_value("c", 1)],
        vec![],
        vec![f32_value("a", 1)],
        vec![
            op("Conv", &["x"], &["a"]),
            op("Conv", &["a"], &["b"]),
            op("Conv", &["a"], &["c"]),
        ],
    )
}

/// Diamond: In -> A(8) -> {B(4), C(4)} -> D(4) -> Out
pub fn diamond() -> Graph {
    build_graph(
        "diamond",
        vec![f32_value("x", 1)],
        vec![f32_value("d", 1)],
        vec![],
        vec![f32_value("a", 2), f32_value("b", 1), f32_value("c", 1)],
        vec![
            op("Conv", &["x"], &["a"]),
            op("Conv", &["a"], &["b"]),
            op("Conv", &["a"], &["c"]),
            op("Add", &["b", "c"], &["d"]),
        ],
    )
}

/// Inception-like cell with asymmetric branches.
///
/// Branch 1 (three convs) has a 64-byte interior intermediate; branch 2
/// (one conv) produces a 16-byte tensor. The Concat lists branch 2 first,
/// so reverse post-order schedules the small branch first and holds its
/// 16-byte result across the big interior. Scheduling branch 1 first only
/// holds the 4-byte input instead.
pub fn inception_cell() -> Graph {
    build_graph(
        "inception_cell",
        vec![f32_value("x", 1)],
        vec![f32_value("out", 1)],
        vec![],
        vec![
            f32_value("a", 1),
            f32_value("b", 16),
            f32_value("c", 1),
            f32_value("s", 4),
            f32_value("cat", 5),
        ],
        vec![
            op("Conv", &["x"], &["a"]),
            op("Conv", &["a"], &["b"]),
            op("Conv", &["b"], &["c"]),
            op("Conv", &["x"], &["s"]),
            op("Concat", &["s", "c"], &["cat"]),
            op("Resize", &["cat"], &["out"]),
        ],
    )
}

/// Assert `order` is a topological permutation of the graph's ops
pub fn assert_topological(graph: &Graph, order: &[VertexId]) {
    assert_eq!(
        order.len(),
        graph.ops.len(),
        "order must cover every op exactly once"
    );
    let mut done: HashSet<VertexId> = HashSet::new();
    for &op in order {
        for &pred in &graph.vertex(op).preds {
            if graph.vertex(pred).is_op() {
                assert!(
                    done.contains(&pred),
                    "{:?} scheduled before its predecessor {:?}",
                    op,
                    pred
                );
            }
        }
        assert!(done.insert(op), "op {:?} scheduled twice", op);
    }
}

/// Op vertex of the i-th model node
pub fn nth_op(graph: &Graph, i: usize) -> VertexId {
    graph.ops[i]
}
