//! Value lifetime analysis
//!
//! Given a complete linear op order, every non-parameter value is alive on a
//! half-open interval `[gen, kill)` of op indices. Graph inputs generate at
//! the pseudo-time -1, graph outputs are killed at `|S|`. An input of an
//! element-wise op that dies at the op and matches the output's tensor type
//! is killed *at* the op index rather than after it, modelling the in-place
//! overlap. Peak memory at a time step is the byte sum of the values alive
//! there.

use crate::error::{ForgeResult, OpForgeError};
use crate::graph::{Graph, ValueId, VertexId};
use crate::sched::mem::overlap_input;
use std::collections::{BTreeSet, HashMap};

/// Pseudo-time before any op has run
pub const TIME_INPUT: i32 = -1;

/// Placeholder for a not-yet-determined kill time
const TIME_UNKNOWN: i32 = i32::MAX;

/// Lifetime descriptor of one value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime {
    /// The described value
    pub value: ValueId,
    /// First time step at which the value is alive
    pub gen: i32,
    /// First time step at which the value is dead
    pub kill: i32,
}

impl Lifetime {
    /// Number of time steps the value stays alive
    pub fn length(&self) -> i32 {
        self.kill - self.gen
    }
}

/// Lifetimes of all values of one schedule, sorted by (gen, kill, value)
#[derive(Debug, Clone)]
pub struct LifetimeStat {
    /// First time step covered (the input pseudo-time)
    pub begin: i32,
    /// One past the last time step covered
    pub end: i32,
    /// Lifetime blocks, ascending by (gen, kill, value)
    pub values: Vec<Lifetime>,
}

impl LifetimeStat {
    /// Memory usage per time step over `[begin, end)`
    pub fn histogram(&self, graph: &Graph) -> Vec<u64> {
        let mut usage = Vec::with_capacity((self.end - self.begin) as usize);
        self.walk(graph, |total, _| usage.push(total));
        usage
    }

    /// Peak memory usage over the whole schedule
    pub fn peak(&self, graph: &Graph) -> u64 {
        let mut peak = 0u64;
        self.walk(graph, |total, _| peak = peak.max(total));
        peak
    }

    /// Values alive at any time step where usage hits the peak, ascending
    pub fn peak_values(&self, graph: &Graph) -> Vec<ValueId> {
        let peak = self.peak(graph);
        let mut at_peak: BTreeSet<ValueId> = BTreeSet::new();
        self.walk(graph, |total, alive| {
            if total == peak {
                at_peak.extend(alive.iter().map(|lt| lt.value));
            }
        });
        at_peak.into_iter().collect()
    }

    /// Walk `[begin, end)` maintaining the alive set, reporting the byte
    /// total and alive blocks at each step.
    fn walk<F>(&self, graph: &Graph, mut callback: F)
    where
        F: FnMut(u64, &[Lifetime]),
    {
        let mut total = 0u64;
        let mut alive: Vec<Lifetime> = Vec::new();
        let mut gen_idx = 0usize;

        for t in self.begin..self.end {
            while gen_idx < self.values.len() && self.values[gen_idx].gen == t {
                alive.push(self.values[gen_idx]);
                total += graph.value(self.values[gen_idx].value).size();
                gen_idx += 1;
            }
            alive.retain(|block| {
                if block.kill == t {
                    total -= graph.value(block.value).size();
                    false
                } else {
                    true
                }
            });
            callback(total, &alive);
        }
    }
}

/// Compute per-value lifetimes for a complete op order of `graph`.
///
/// The order must be a permutation of the graph's ops; anything else is a
/// precondition error. A value consumed before its definition has been
/// scheduled indicates a corrupted order and is reported as structural.
pub fn compute_lifetime(op_seq: &[VertexId], graph: &Graph) -> ForgeResult<LifetimeStat> {
    if op_seq.len() != graph.ops.len() {
        return Err(OpForgeError::ScheduleLengthMismatch {
            expected: graph.ops.len(),
            actual: op_seq.len(),
        });
    }

    let mut val_life: HashMap<ValueId, Lifetime> = HashMap::new();
    let mut use_cnt: HashMap<ValueId, u32> = HashMap::new();
    for &input in &graph.inputs {
        let Some(val) = graph.terminal_value(input) else {
            continue;
        };
        val_life.insert(
            val,
            Lifetime {
                value: val,
                gen: TIME_INPUT,
                kill: TIME_UNKNOWN,
            },
        );
        use_cnt.insert(val, graph.value(val).use_count());
    }

    for (i, &op) in op_seq.iter().enumerate() {
        let node = graph.op(op);
        let t = i as i32;

        for &out in &node.outputs {
            val_life.insert(
                out,
                Lifetime {
                    value: out,
                    gen: t,
                    kill: TIME_UNKNOWN,
                },
            );
            use_cnt.insert(out, graph.value(out).use_count());
        }

        let ovl_idx = overlap_input(graph, op);
        for (j, &input) in node.inputs.iter().enumerate() {
            if graph.value(input).is_param() {
                continue;
            }
            let cnt = use_cnt
                .get_mut(&input)
                .ok_or_else(|| OpForgeError::UndefinedValue(graph.value(input).name.clone()))?;
            *cnt -= 1;
            if *cnt == 0 {
                // An overlapped input's buffer becomes the output: its life
                // ends at this op, not after it
                let kill = if ovl_idx == Some(j) { t } else { t + 1 };
                if let Some(lt) = val_life.get_mut(&input) {
                    lt.kill = kill;
                }
                use_cnt.remove(&input);
            }
        }
    }

    // Outputs stay resident to the end; so does anything never consumed
    let end = op_seq.len() as i32;
    for &output in &graph.outputs {
        if let Some(val) = graph.terminal_value(output) {
            if let Some(lt) = val_life.get_mut(&val) {
                lt.kill = end;
            }
        }
    }
    for lt in val_life.values_mut() {
        if lt.kill == TIME_UNKNOWN {
            lt.kill = end;
        }
    }

    let mut values: Vec<Lifetime> = val_life.into_values().collect();
    values.sort_unstable_by_key(|lt| (lt.gen, lt.kill, lt.value));

    Ok(LifetimeStat {
        begin: TIME_INPUT,
        end,
        values,
    })
}

/// Streaming peak estimate of an op order without materializing lifetimes.
///
/// Matches `compute_lifetime(...).peak(...)`: a non-overlapped input that
/// dies at op `i` still occupies memory while `i` runs and is released
/// before `i + 1`.
pub fn estimate_peak(op_seq: &[VertexId], graph: &Graph) -> ForgeResult<u64> {
    if op_seq.len() != graph.ops.len() {
        return Err(OpForgeError::ScheduleLengthMismatch {
            expected: graph.ops.len(),
            actual: op_seq.len(),
        });
    }

    let mut total = 0u64;
    let mut use_cnt: HashMap<ValueId, u32> = HashMap::new();
    for &input in &graph.inputs {
        if let Some(val) = graph.terminal_value(input) {
            use_cnt.insert(val, graph.value(val).use_count());
            total += graph.value(val).size();
        }
    }

    let mut peak = total;
    let mut next_kill: Vec<ValueId> = Vec::new();
    for &op in op_seq {
        let node = graph.op(op);

        for &out in &node.outputs {
            use_cnt.insert(out, graph.value(out).use_count());
            total += graph.value(out).size();
        }

        for val in next_kill.drain(..) {
            total -= graph.value(val).size();
        }

        let ovl_idx = overlap_input(graph, op);
        for (j, &input) in node.inputs.iter().enumerate() {
            if graph.value(input).is_param() {
                continue;
            }
            let cnt = use_cnt
                .get_mut(&input)
                .ok_or_else(|| OpForgeError::UndefinedValue(graph.value(input).name.clone()))?;
            *cnt -= 1;
            if *cnt == 0 {
                if ovl_idx == Some(j) {
                    total -= graph.value(input).size();
                } else {
                    next_kill.push(input);
                }
                use_cnt.remove(&input);
            }
        }

        peak = peak.max(total);
    }

    Ok(peak)
}
