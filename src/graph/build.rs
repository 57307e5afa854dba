//! Graph construction from a model source
//!
//! This is the only place that walks user-supplied value names: a single
//! name-to-value table is built up front, after which scheduling never
//! touches names again. Construction validates the structural invariants
//! the rest of the crate relies on: every referenced name resolves, every
//! result has exactly one definition, edges mirror def-use relations, and
//! the vertex set is acyclic.

use crate::error::{ForgeResult, OpForgeError};
use crate::graph::graph::Graph;
use crate::graph::value::{Value, ValueId, ValueKind};
use crate::graph::vertex::{add_unique, OpNode, Vertex, VertexId, VertexKind};
use crate::model::ModelGraph;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

impl Graph {
    /// Build a graph from a model-source description.
    ///
    /// The model must be shape-inferred: every intermediate referenced by a
    /// node needs a typed declaration in `value_infos` (graph inputs,
    /// outputs and initializers are declared by their own lists).
    pub fn from_model(model: &ModelGraph) -> ForgeResult<Self> {
        let mut graph = Graph {
            name: model.name.clone(),
            ..Default::default()
        };

        // Build the name-value map
        let mut name_to_val: HashMap<String, ValueId> = HashMap::new();

        // Inputs
        for info in &model.inputs {
            let val = declare(
                &mut graph,
                &mut name_to_val,
                &info.name,
                Value::input(&info.name, info.ty.clone()),
            )?;
            let vert = graph.push_vertex(Vertex::new(VertexKind::Input(val)));
            graph.values[val.index()].def = Some(vert);
            graph.inputs.push(vert);
        }
        // Outputs
        let mut output_vals = Vec::new();
        for info in &model.outputs {
            let val = declare(
                &mut graph,
                &mut name_to_val,
                &info.name,
                Value::result(&info.name, info.ty.clone()),
            )?;
            output_vals.push(val);
        }
        // Parameters
        for tensor in &model.initializers {
            let val = declare(
                &mut graph,
                &mut name_to_val,
                &tensor.name,
                Value::param(&tensor.name, tensor.ty.clone(), tensor.data.clone()),
            )?;
            graph.params.push(val);
        }
        // Intermediates
        for info in &model.value_infos {
            declare(
                &mut graph,
                &mut name_to_val,
                &info.name,
                Value::result(&info.name, info.ty.clone()),
            )?;
        }

        // Build ops
        for (i, node) in model.nodes.iter().enumerate() {
            let name = if node.name.is_empty() {
                format!("{}_{}", node.op_type.to_lowercase(), i)
            } else {
                node.name.clone()
            };

            let mut inputs = Vec::with_capacity(node.inputs.len());
            for in_name in &node.inputs {
                let val = *name_to_val
                    .get(in_name)
                    .ok_or_else(|| OpForgeError::ValueNotFound(in_name.clone()))?;
                inputs.push(val);
            }
            let mut outputs = Vec::with_capacity(node.outputs.len());
            for out_name in &node.outputs {
                let val = *name_to_val
                    .get(out_name)
                    .ok_or_else(|| OpForgeError::ValueNotFound(out_name.clone()))?;
                outputs.push(val);
            }

            let op = graph.push_vertex(Vertex::new(VertexKind::Op(OpNode {
                name,
                op_type: node.op_type.clone(),
                inputs: inputs.clone(),
                outputs: outputs.clone(),
                attributes: node.attributes.clone(),
            })));

            for val in inputs {
                graph.values[val.index()].uses.push(op);
            }
            for val in outputs {
                let value = &mut graph.values[val.index()];
                if value.kind != ValueKind::Result || value.def.is_some() {
                    return Err(OpForgeError::DuplicateDefinition(value.name.clone()));
                }
                value.def = Some(op);
            }
            graph.ops.push(op);
        }

        // Output vertices reference their (now defined) result values
        for val in output_vals {
            let vert = graph.push_vertex(Vertex::new(VertexKind::Output(val)));
            graph.outputs.push(vert);
        }

        graph.connect_vertices()?;
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn push_vertex(&mut self, vertex: Vertex) -> VertexId {
        let id = VertexId(self.vertices.len() as u32);
        self.vertices.push(vertex);
        id
    }

    /// Project def-use relations on non-parameter values onto vertex edges.
    fn connect_vertices(&mut self) -> ForgeResult<()> {
        for op_idx in 0..self.ops.len() {
            let op = self.ops[op_idx];
            let inputs = match &self.vertices[op.index()].kind {
                VertexKind::Op(node) => node.inputs.clone(),
                _ => unreachable!(),
            };
            for val in inputs {
                let value = &self.values[val.index()];
                if value.kind == ValueKind::Param {
                    continue;
                }
                let def = value
                    .def
                    .ok_or_else(|| OpForgeError::UndefinedValue(value.name.clone()))?;
                self.connect(def, op);
            }
        }
        for out_idx in 0..self.outputs.len() {
            let out = self.outputs[out_idx];
            let val = match self.vertices[out.index()].kind {
                VertexKind::Output(v) => v,
                _ => unreachable!(),
            };
            let value = &self.values[val.index()];
            let def = value
                .def
                .ok_or_else(|| OpForgeError::UndefinedValue(value.name.clone()))?;
            self.connect(def, out);
        }
        Ok(())
    }

    fn connect(&mut self, tail: VertexId, head: VertexId) {
        add_unique(&mut self.vertices[tail.index()].succs, head);
        add_unique(&mut self.vertices[head.index()].preds, tail);
    }

    /// Kahn's algorithm over op vertices; anything left over sits on a cycle.
    fn check_acyclic(&self) -> ForgeResult<()> {
        let mut pred_cnt: HashMap<VertexId, usize> = self
            .ops
            .iter()
            .map(|&op| (op, self.vertices[op.index()].preds.len()))
            .collect();
        for &input in &self.inputs {
            for &succ in &self.vertices[input.index()].succs {
                if let Some(cnt) = pred_cnt.get_mut(&succ) {
                    *cnt -= 1;
                }
            }
        }

        let mut ready: Vec<VertexId> = pred_cnt
            .iter()
            .filter(|(_, &c)| c == 0)
            .map(|(&v, _)| v)
            .collect();
        let mut seen = 0usize;
        while let Some(vert) = ready.pop() {
            pred_cnt.remove(&vert);
            seen += 1;
            for &succ in &self.vertices[vert.index()].succs {
                if let Some(cnt) = pred_cnt.get_mut(&succ) {
                    *cnt -= 1;
                    if *cnt == 0 {
                        ready.push(succ);
                    }
                }
            }
        }

        if seen != self.ops.len() {
            // Report an arbitrary op still stuck on the cycle
            let stuck = pred_cnt
                .keys()
                .next()
                .map(|&v| self.op(v).name.clone())
                .unwrap_or_default();
            return Err(OpForgeError::CyclicGraph(stuck));
        }
        Ok(())
    }
}

/// Register a freshly created value under its model name.
fn declare(
    graph: &mut Graph,
    name_to_val: &mut HashMap<String, ValueId>,
    name: &str,
    value: Value,
) -> ForgeResult<ValueId> {
    let id = ValueId(graph.values.len() as u32);
    match name_to_val.entry(name.to_string()) {
        Entry::Occupied(_) => Err(OpForgeError::DuplicateDefinition(name.to_string())),
        Entry::Vacant(slot) => {
            slot.insert(id);
            graph.values.push(value);
            Ok(id)
        }
    }
}
