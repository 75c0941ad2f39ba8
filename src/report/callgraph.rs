//! Call-graph rendering
//!
//! The graph is emitted as Graphviz DOT text. Nodes are functions whose
//! cumulative cost reaches [`NODE_FRACTION`] of the total; edges run from
//! caller to callee and carry the cost of the samples that traverse them.
//! PNG and SVG output is produced by piping the DOT text through `dot`.

use super::aggregate::CostTable;
use super::filter::Selection;
use super::options::Callgraph;
use super::profile::ResolvedProfile;
use super::Unit;
use crate::error::{BenchError, Result};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::io::Write as _;
use std::process::{Command, Stdio};

/// Minimum share of the total cost for a function to become a node
pub const NODE_FRACTION: f64 = 0.005;

/// Prefix of the legend line
pub const LEGEND_PREFIX: &str = "subgraph cluster_L";

/// Graph layout executable
pub const DOT_PROGRAM: &str = "dot";

/// Render the selection as DOT text with at most `node_count` nodes (0 = all)
pub fn render(
    profile: &ResolvedProfile,
    selection: &Selection,
    table: &CostTable,
    node_count: usize,
    unit: Unit,
    label: &str,
) -> String {
    let total = selection.total;
    let threshold = (total as f64 * NODE_FRACTION).abs();

    let mut candidates: Vec<usize> = (0..profile.functions.len())
        .filter(|&f| {
            let cost = table.get(f);
            cost.cum != 0 && (cost.cum as f64).abs() >= threshold
        })
        .collect();
    candidates.sort_by(|&a, &b| {
        table
            .get(b)
            .cum
            .cmp(&table.get(a).cum)
            .then_with(|| profile.function_name(a).cmp(profile.function_name(b)))
    });
    let available = candidates.len();
    if node_count > 0 {
        candidates.truncate(node_count);
    }
    let ids: HashMap<usize, usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, &f)| (f, i + 1))
        .collect();

    let mut edges: HashMap<(usize, usize), i64> = HashMap::new();
    let mut seen = HashSet::new();
    for sample in &selection.samples {
        let kept: Vec<usize> = sample
            .stack
            .iter()
            .copied()
            .filter(|f| ids.contains_key(f))
            .collect();
        seen.clear();
        for pair in kept.windows(2) {
            let edge = (pair[1], pair[0]);
            if seen.insert(edge) {
                let weight = edges.entry(edge).or_default();
                *weight = weight.saturating_add(sample.value);
            }
        }
    }
    let mut edges: Vec<_> = edges.into_iter().collect();
    edges.sort_by_key(|&((caller, callee), weight)| (Reverse(weight), ids[&caller], ids[&callee]));

    let mut dot = String::new();
    let _ = writeln!(dot, "digraph \"{}\" {{", escape(label));
    let _ = writeln!(dot, "node [style=filled fillcolor=\"#f8f8f8\"]");
    let _ = writeln!(
        dot,
        "{} {{ \"{}\" [shape=box fontsize=16 label=\"{}\\lTotal: {}\\lShowing {} of {} nodes\\l\"] }}",
        LEGEND_PREFIX,
        escape(label),
        escape(label),
        format_value(total, unit),
        candidates.len(),
        available
    );

    for &function in &candidates {
        let cost = table.get(function);
        let size = 8.0 + 42.0 * share(cost.flat, total);
        let _ = writeln!(
            dot,
            "N{} [label=\"{}\\n{} ({:.2}%)\\nof {} ({:.2}%)\" shape=box fontsize={:.0} tooltip=\"{}\"]",
            ids[&function],
            escape(profile.function_name(function)),
            format_value(cost.flat, unit),
            share(cost.flat, total) * 100.0,
            format_value(cost.cum, unit),
            share(cost.cum, total) * 100.0,
            size,
            escape(profile.function_name(function)),
        );
    }

    for ((caller, callee), weight) in &edges {
        let pen = 1.0 + 4.0 * share(*weight, total);
        let _ = writeln!(
            dot,
            "N{} -> N{} [label=\" {}\" weight={} penwidth={:.1}]",
            ids[caller],
            ids[callee],
            format_value(*weight, unit),
            (share(*weight, total) * 100.0).ceil().max(1.0),
            pen
        );
    }
    dot.push_str("}\n");
    dot
}

/// Remove the legend line from DOT text
pub fn strip_legend(dot: &str) -> String {
    let mut out = String::with_capacity(dot.len());
    for line in dot.lines().filter(|l| !l.starts_with(LEGEND_PREFIX)) {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Encode DOT text in the requested output format
pub fn layout(dot: &str, graph: Callgraph) -> Result<Vec<u8>> {
    layout_with(DOT_PROGRAM, dot, graph)
}

/// Like [`layout`] with an explicit layout executable
pub fn layout_with(program: &str, dot: &str, graph: Callgraph) -> Result<Vec<u8>> {
    let Some(format) = graph.layout_format() else {
        return Ok(dot.as_bytes().to_vec());
    };

    let mut child = Command::new(program)
        .arg(format!("-T{}", format))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BenchError::GraphLayout(e.to_string()))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| BenchError::GraphLayout("stdin unavailable".to_string()))?;
    let input = dot.as_bytes().to_vec();
    let writer = std::thread::spawn(move || stdin.write_all(&input));

    let output = child
        .wait_with_output()
        .map_err(|e| BenchError::GraphLayout(e.to_string()))?;
    match writer.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(BenchError::GraphLayout(e.to_string())),
        Err(_) => return Err(BenchError::GraphLayout("stdin writer panicked".to_string())),
    }

    if !output.status.success() {
        return Err(BenchError::GraphLayout(format!(
            "{}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    tracing::debug!(format, bytes = output.stdout.len(), "call graph laid out");
    Ok(output.stdout)
}

fn share(value: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        value as f64 / total as f64
    }
}

fn format_value(raw: i64, unit: Unit) -> String {
    match unit {
        Unit::None => raw.to_string(),
        unit => format!("{:.2}{}", unit.convert(raw as f64), unit.as_str()),
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
