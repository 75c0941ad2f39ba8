//! Benchmark result: the root task plus its cost reports
//!
//! On the wire a benchmark is its root task object with two extra optional
//! arrays, `pprof` (CPU reports) and `heap` (allocation reports), appended
//! after the task fields.

use crate::error::TaskFailure;
use crate::message::Message;
use crate::report::Report;
use crate::task::Task;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Completed benchmark run
#[derive(Debug, Clone, PartialEq)]
pub struct Benchmark {
    pub task: Task,
    /// CPU reports in generation order
    pub pprof: Vec<Report>,
    /// Allocation reports in generation order
    pub heap: Vec<Report>,
}

impl Benchmark {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            pprof: Vec::new(),
            heap: Vec::new(),
        }
    }

    /// First report with the given label, CPU reports first
    pub fn report(&self, label: &str) -> Option<&Report> {
        self.pprof
            .iter()
            .chain(self.heap.iter())
            .find(|r| r.label == label)
    }

    /// All reports, CPU first
    pub fn reports(&self) -> impl Iterator<Item = &Report> {
        self.pprof.iter().chain(self.heap.iter())
    }

    /// Whether the root task or any descendant failed
    pub fn has_failures(&self) -> bool {
        let mut failed = false;
        self.task.walk(&mut |t, _| failed |= t.error.is_some());
        failed
    }

    /// Indented task tree, one task per line
    pub fn tree(&self) -> String {
        render_tree(&self.task)
    }
}

/// Indented rendering of a task tree with its messages
pub fn render_tree(task: &Task) -> String {
    let mut out = String::new();
    task.walk(&mut |t, depth| {
        let indent = "  ".repeat(depth);
        out.push_str(&format!(
            "{}{} count={} active={:?} total={:?}",
            indent, t.label, t.count, t.active, t.total
        ));
        if let Some(err) = &t.error {
            out.push_str(&format!(" error={:?}", err.message()));
        }
        out.push('\n');
        for msg in &t.messages {
            out.push_str(&format!("{}  [{}] {}\n", indent, msg.kind, msg.text));
        }
    });
    out
}

impl fmt::Display for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tree())?;
        for report in self.reports() {
            writeln!(f)?;
            write!(f, "{}", report)?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct BenchmarkRef<'a> {
    label: &'a str,
    #[serde(with = "crate::json_output::decimal")]
    count: u64,
    #[serde(with = "crate::json_output::nanos")]
    active: Duration,
    #[serde(with = "crate::json_output::nanos")]
    total: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a TaskFailure>,
    #[serde(skip_serializing_if = "<[Task]>::is_empty")]
    children: &'a [Task],
    #[serde(skip_serializing_if = "<[Message]>::is_empty")]
    messages: &'a [Message],
    #[serde(skip_serializing_if = "<[Report]>::is_empty")]
    pprof: &'a [Report],
    #[serde(skip_serializing_if = "<[Report]>::is_empty")]
    heap: &'a [Report],
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BenchmarkRecord {
    label: String,
    #[serde(with = "crate::json_output::decimal")]
    count: u64,
    #[serde(with = "crate::json_output::nanos")]
    active: Duration,
    #[serde(with = "crate::json_output::nanos")]
    total: Duration,
    #[serde(default)]
    error: Option<TaskFailure>,
    #[serde(default)]
    children: Vec<Task>,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    pprof: Vec<Report>,
    #[serde(default)]
    heap: Vec<Report>,
}

impl Serialize for Benchmark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let t = &self.task;
        BenchmarkRef {
            label: &t.label,
            count: t.count,
            active: t.active,
            total: t.total,
            error: t.error.as_ref(),
            children: &t.children,
            messages: &t.messages,
            pprof: &self.pprof,
            heap: &self.heap,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Benchmark {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = BenchmarkRecord::deserialize(deserializer)?;
        let mut task = Task::new(record.label);
        task.count = record.count;
        task.active = record.active;
        task.total = record.total;
        task.error = record.error;
        task.children = record.children;
        task.messages = record.messages;
        Ok(Self {
            task,
            pprof: record.pprof,
            heap: record.heap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_output::{from_json, to_json, to_json_pretty};
    use crate::message::MessageKind;
    use crate::report::{Row, Unit};

    fn sample() -> Benchmark {
        let mut root = Task::new(".");
        root.active = Duration::from_nanos(10);
        root.total = Duration::from_nanos(25);
        let mut leaf = Task::new("leaf");
        leaf.count = 1;
        leaf.active = Duration::from_nanos(10);
        leaf.total = Duration::from_nanos(12);
        leaf.messages.push(Message::new(MessageKind::Opt, "vectorized"));
        root.children.push(leaf);

        let mut report = Report::new("top", Unit::Millisecond);
        report.rows.push(Row {
            flat: 0.5,
            flat_percent: 50.0,
            cum: 1.0,
            cum_percent: 100.0,
            sum_percent: 50.0,
            function: "leaf".to_string(),
        });
        Benchmark {
            task: root,
            pprof: vec![report],
            heap: Vec::new(),
        }
    }

    #[test]
    fn test_reports_follow_task_fields() {
        let json = to_json(&sample()).unwrap();
        let children = json.find("\"children\"").unwrap();
        let pprof = json.find("\"pprof\"").unwrap();
        assert!(children < pprof);
        assert!(!json.contains("\"heap\""));
        assert!(json.starts_with(r#"{"label":".","count":"0","active":"10","total":"25""#));
    }

    #[test]
    fn test_round_trip() {
        let text = to_json_pretty(&sample()).unwrap();
        let decoded: Benchmark = from_json(&text).unwrap();
        assert_eq!(decoded, sample());
        assert_eq!(to_json_pretty(&decoded).unwrap(), text);
    }

    #[test]
    fn test_bare_task_document_is_a_benchmark() {
        let doc = r#"{"label":"x","count":"1","active":"5","total":"6"}"#;
        let bench: Benchmark = from_json(doc).unwrap();
        assert_eq!(bench.task.label, "x");
        assert!(bench.pprof.is_empty());
        assert_eq!(to_json(&bench).unwrap(), doc);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let doc = r#"{"label":"x","count":"1","active":"5","total":"6","cpu":[]}"#;
        assert!(from_json::<Benchmark>(doc).is_err());
    }

    #[test]
    fn test_report_lookup() {
        let bench = sample();
        assert!(bench.report("top").is_some());
        assert!(bench.report("alloc-space").is_none());
        assert_eq!(bench.reports().count(), 1);
    }

    #[test]
    fn test_tree_rendering() {
        let mut bench = sample();
        bench.task.children[0].error = Some(TaskFailure::new("boom"));
        let tree = bench.tree();
        let lines: Vec<_> = tree.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with(". count=0"));
        assert!(lines[1].starts_with("  leaf count=1"));
        assert!(lines[1].ends_with("error=\"boom\""));
        assert_eq!(lines[2], "    [MsgOpt] vectorized");
        assert!(bench.has_failures());
    }
}
