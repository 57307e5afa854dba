//! Schedule and graph reporters
//!
//! Render already-computed structures to Graphviz DOT (graphs, dominator
//! trees, schedules) or SVG (memory plans) files in a target directory.
//! Reporters never mutate core state, and the `plot_*` wrappers follow the
//! reporter contract: failures are logged and swallowed so a missing or
//! read-only output directory cannot break scheduling.

use crate::error::ForgeResult;
use crate::graph::{Graph, VertexId};
use crate::hier::graph::{HierGraph, HierId};
use crate::sched::plan::MemoryPlan;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Minimal DOT document builder
struct DotWriter {
    body: String,
    ids: HashMap<u64, usize>,
}

impl DotWriter {
    fn new(name: &str) -> Self {
        let mut body = String::new();
        let _ = writeln!(body, "digraph \"{}\" {{", escape(name));
        let _ = writeln!(body, "    node [shape=box, fontname=\"monospace\"];");
        Self {
            body,
            ids: HashMap::new(),
        }
    }

    fn node(&mut self, key: u64, label: &str) {
        let next = self.ids.len();
        let id = *self.ids.entry(key).or_insert(next);
        let _ = writeln!(self.body, "    n{} [label=\"{}\"];", id, escape(label));
    }

    fn edge(&mut self, tail: u64, head: u64) {
        if let (Some(&t), Some(&h)) = (self.ids.get(&tail), self.ids.get(&head)) {
            let _ = writeln!(self.body, "    n{} -> n{};", t, h);
        }
    }

    fn finish(mut self, dir: &Path, name: &str) -> ForgeResult<PathBuf> {
        self.body.push_str("}\n");
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.dot"));
        std::fs::write(&path, self.body)?;
        Ok(path)
    }
}

fn escape(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Write a scheduled graph as DOT, ops labeled with their schedule index.
pub fn write_schedule_dot(
    graph: &Graph,
    sched: &[VertexId],
    dir: &Path,
    name: &str,
) -> ForgeResult<PathBuf> {
    let mut dot = DotWriter::new(name);
    for &input in &graph.inputs {
        if let Some(val) = graph.terminal_value(input) {
            dot.node(input.0 as u64, &graph.value(val).name);
        }
    }
    for (i, &op) in sched.iter().enumerate() {
        dot.node(op.0 as u64, &format!("{}:{}", i, graph.op(op).op_type));
    }
    for &output in &graph.outputs {
        if let Some(val) = graph.terminal_value(output) {
            dot.node(output.0 as u64, &graph.value(val).name);
        }
    }
    for (vid, vert) in graph.iter_vertices() {
        for &pred in &vert.preds {
            dot.edge(pred.0 as u64, vid.0 as u64);
        }
    }
    dot.finish(dir, name)
}

/// Write the top level of a hierarchical graph as DOT.
pub fn write_hier_dot(hier: &HierGraph, dir: &Path, name: &str) -> ForgeResult<PathBuf> {
    let mut dot = DotWriter::new(name);
    let order = hier.rpo();
    for &vert in &order {
        dot.node(vert.0 as u64, &hier.label(vert));
    }
    for &vert in &order {
        for &succ in &hier.vert(vert).succs {
            dot.edge(vert.0 as u64, succ.0 as u64);
        }
    }
    dot.finish(dir, name)
}

/// Write a (post-)dominator tree of a hierarchical graph as DOT.
pub fn write_dom_dot(
    hier: &HierGraph,
    post: bool,
    dir: &Path,
    name: &str,
) -> ForgeResult<PathBuf> {
    let tree = if post {
        hier.post_dom_tree()
    } else {
        hier.dom_tree()
    };
    let Some(tree) = tree else {
        return Err(crate::internal_error!("dominator tree has not been built"));
    };

    let mut dot = DotWriter::new(name);
    for i in 0..tree.len() as u32 {
        let node = tree.node(i);
        dot.node(i as u64, &hier.label(HierId(node.vertex)));
    }
    for i in 0..tree.len() as u32 {
        let node = tree.node(i);
        if let Some(parent) = node.parent {
            dot.edge(parent as u64, i as u64);
        }
    }
    dot.finish(dir, name)
}

/// Write a memory plan as an SVG rectangle plot: time on the x axis,
/// offsets on the y axis, one rectangle per value.
pub fn write_plan_svg(plan: &MemoryPlan, dir: &Path, name: &str) -> ForgeResult<PathBuf> {
    const X_SCALE: f64 = 40.0;
    const HEIGHT: f64 = 480.0;

    let t_min = plan.descs.iter().map(|d| d.gen).min().unwrap_or(0);
    let t_max = plan.descs.iter().map(|d| d.kill).max().unwrap_or(1);
    let peak = plan.peak.max(1) as f64;
    let y_scale = HEIGHT / peak;
    let width = (t_max - t_min) as f64 * X_SCALE;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{:.0}\" height=\"{:.0}\">",
        width, HEIGHT
    );
    for desc in &plan.descs {
        let x = (desc.gen - t_min) as f64 * X_SCALE;
        let w = desc.length() as f64 * X_SCALE;
        let h = desc.size as f64 * y_scale;
        let y = HEIGHT - (desc.offset as f64 * y_scale) - h;
        let _ = writeln!(
            svg,
            "  <rect x=\"{x:.1}\" y=\"{y:.1}\" width=\"{w:.1}\" height=\"{h:.1}\" \
             fill=\"#4c72b0\" fill-opacity=\"0.6\" stroke=\"#222222\"/>",
        );
    }
    svg.push_str("</svg>\n");

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{name}.svg"));
    std::fs::write(&path, svg)?;
    Ok(path)
}

/// Write a lifetime histogram as an SVG bar chart: one bar per time step,
/// bar height proportional to the bytes alive there.
pub fn write_histogram_svg(
    stat: &crate::sched::life::LifetimeStat,
    graph: &Graph,
    dir: &Path,
    name: &str,
) -> ForgeResult<PathBuf> {
    const BAR_WIDTH: f64 = 24.0;
    const HEIGHT: f64 = 320.0;

    let usage = stat.histogram(graph);
    let peak = usage.iter().copied().max().unwrap_or(0).max(1) as f64;
    let width = usage.len() as f64 * BAR_WIDTH;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{:.0}\" height=\"{:.0}\">",
        width, HEIGHT
    );
    for (i, &bytes) in usage.iter().enumerate() {
        let h = bytes as f64 / peak * HEIGHT;
        let x = i as f64 * BAR_WIDTH;
        let y = HEIGHT - h;
        let _ = writeln!(
            svg,
            "  <rect x=\"{x:.1}\" y=\"{y:.1}\" width=\"{:.1}\" height=\"{h:.1}\" \
             fill=\"#55a868\" stroke=\"#222222\"/>",
            BAR_WIDTH - 2.0,
        );
    }
    svg.push_str("</svg>\n");

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{name}.svg"));
    std::fs::write(&path, svg)?;
    Ok(path)
}

/// Reporter wrapper: render a schedule, logging and swallowing failures.
pub fn plot_schedule(graph: &Graph, sched: &[VertexId], dir: &Path, name: &str) {
    if let Err(err) = write_schedule_dot(graph, sched, dir, name) {
        tracing::error!(%err, "failed to render schedule");
    }
}

/// Reporter wrapper: render a hierarchical graph, logging failures.
pub fn plot_hier_graph(hier: &HierGraph, dir: &Path, name: &str) {
    if let Err(err) = write_hier_dot(hier, dir, name) {
        tracing::error!(%err, "failed to render hierarchical graph");
    }
}

/// Reporter wrapper: render a memory plan, logging failures.
pub fn plot_memory_plan(plan: &MemoryPlan, dir: &Path, name: &str) {
    if let Err(err) = write_plan_svg(plan, dir, name) {
        tracing::error!(%err, "failed to render memory plan");
    }
}

/// Reporter wrapper: render a lifetime histogram, logging failures.
pub fn plot_lifetime_histogram(
    stat: &crate::sched::life::LifetimeStat,
    graph: &Graph,
    dir: &Path,
    name: &str,
) {
    if let Err(err) = write_histogram_svg(stat, graph, dir, name) {
        tracing::error!(%err, "failed to render lifetime histogram");
    }
}

/// One-line textual summary of a schedule for logs and the CLI.
pub fn format_schedule(graph: &Graph, sched: &[VertexId]) -> String {
    sched
        .iter()
        .map(|&op| graph.op(op).name.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
