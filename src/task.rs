//! Benchmark task tree
//!
//! A [`Task`] is one node of the benchmark tree. It is either a *leaf*, which
//! measures its own wall time between [`Task::start`] and completion, or a
//! *composite*, whose `active` time is the sum of its children's. Mixing the
//! two roles is a caller bug and panics.
//!
//! ```
//! use benchtree::Task;
//!
//! let mut root = Task::new(".");
//! root.run(|t| {
//!     t.run_sub("parse", |leaf| {
//!         leaf.start();
//!         let _ = "1,2,3".split(',').count();
//!         Ok(())
//!     })?;
//!     Ok(())
//! });
//! assert_eq!(root.children.len(), 1);
//! assert_eq!(root.active, root.children[0].active);
//! ```

use crate::alloc::{self, AllocStats};
use crate::error::TaskFailure;
use crate::gc::{self, GcSuppression};
use crate::message::{Message, MessageKind};
use crate::phase;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Return type of task bodies
pub type TaskResult = anyhow::Result<()>;

/// Transform applied to each completed child before it is linked
///
/// Returning `None` drops the child: it contributes neither time nor an entry
/// in `children`. The run controller also calls the processor once on the root
/// with `parent == None`.
pub trait Processor: Send + Sync {
    fn transform(&self, parent: Option<&Task>, child: Task) -> Option<Task>;
}

impl<F> Processor for F
where
    F: Fn(Option<&Task>, Task) -> Option<Task> + Send + Sync,
{
    fn transform(&self, parent: Option<&Task>, child: Task) -> Option<Task> {
        self(parent, child)
    }
}

/// A node in the benchmark tree
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Task {
    /// Identifying name, not unique
    pub label: String,

    /// Number of times the measured section was (re)started
    #[serde(with = "crate::json_output::decimal")]
    pub count: u64,

    /// Time attributed to measured work
    #[serde(with = "crate::json_output::nanos")]
    pub active: Duration,

    /// Wall time from run entry to completion
    #[serde(with = "crate::json_output::nanos")]
    pub total: Duration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,

    /// Completed children in completion order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Task>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,

    #[serde(skip)]
    processor: Option<Arc<dyn Processor>>,
    #[serde(skip)]
    no_gc: bool,
    #[serde(skip)]
    started: Option<Instant>,
    #[serde(skip)]
    paused_at: Option<Instant>,
    #[serde(skip)]
    paused: Duration,
    #[serde(skip)]
    children_active: Duration,
    #[serde(skip)]
    suppression: Option<GcSuppression>,
    #[serde(skip)]
    alloc_mark: Option<AllocStats>,
    #[serde(skip)]
    allocations: AllocStats,
}

impl Task {
    /// Create an unstarted task
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            count: 0,
            active: Duration::ZERO,
            total: Duration::ZERO,
            error: None,
            children: Vec::new(),
            messages: Vec::new(),
            processor: None,
            no_gc: false,
            started: None,
            paused_at: None,
            paused: Duration::ZERO,
            children_active: Duration::ZERO,
            suppression: None,
            alloc_mark: None,
            allocations: AllocStats::default(),
        }
    }

    /// Attach the processor hook shared by this task and all its descendants
    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Suppress automatic collection while leaves of this subtree measure
    pub fn with_gc_suppression(mut self, no_gc: bool) -> Self {
        self.no_gc = no_gc;
        self
    }

    /// Execute the task body exactly once and complete the task
    ///
    /// Panics if the task has already started measuring.
    pub fn run<F>(&mut self, body: F)
    where
        F: FnOnce(&mut Task) -> TaskResult,
    {
        if self.started.is_some() {
            panic!("start is allowed only in leaf tasks");
        }

        let created = Instant::now();
        let outcome = body(self);
        let finished = Instant::now();

        self.error = outcome.err().map(TaskFailure::from);
        self.total = finished.duration_since(created);

        if !self.children.is_empty() {
            self.active = self.children_active;
            self.allocations = self.children.iter().map(|c| c.allocations).sum();
        } else if let Some(started) = self.started {
            let mut paused = self.paused;
            if let Some(at) = self.paused_at.take() {
                paused += finished.duration_since(at);
            }
            self.active = finished.duration_since(started).saturating_sub(paused);
            if let Some(mark) = self.alloc_mark.take() {
                self.allocations = alloc::snapshot().since(&mark);
            }
        }

        if let Some(guard) = self.suppression.take() {
            guard.release();
        }

        tracing::trace!(
            target: "benchtree::task",
            label = %self.label,
            active_ns = self.active.as_nanos() as u64,
            total_ns = self.total.as_nanos() as u64,
            failed = self.error.is_some(),
            "task completed"
        );
    }

    /// Run a child task to completion and link it under this task
    ///
    /// The child shares this task's processor and collector settings. Returns
    /// the child's failure, if any, so the caller can decide whether it is
    /// fatal. Panics if this task has already started measuring.
    pub fn run_sub<F>(&mut self, label: impl Into<String>, body: F) -> Result<(), TaskFailure>
    where
        F: FnOnce(&mut Task) -> TaskResult,
    {
        if self.started.is_some() {
            panic!("sub-tasks are not allowed in a started leaf task");
        }

        let mut child = Task::new(label).with_gc_suppression(self.no_gc);
        child.processor = self.processor.clone();
        child.run(body);
        phase::reset();

        let outcome = match &child.error {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        };

        let linked = match self.processor.clone() {
            Some(processor) => processor.transform(Some(&*self), child),
            None => Some(child),
        };

        if let Some(child) = linked {
            self.children_active += child.active;
            self.children.push(child);
        }

        outcome
    }

    /// Like [`Task::run_sub`] for bodies returning any error type
    pub fn run_sub_with<F, E>(
        &mut self,
        label: impl Into<String>,
        body: F,
    ) -> Result<(), TaskFailure>
    where
        F: FnOnce(&mut Task) -> Result<(), E>,
        E: Into<anyhow::Error>,
    {
        self.run_sub(label, |t| body(t).map_err(Into::into))
    }

    /// Start measuring (leaf tasks only)
    ///
    /// The first call forces a collection, arms collector suppression when
    /// configured, and records the start instant. Every call increments
    /// `count`. Panics on a task that already has children.
    pub fn start(&mut self) {
        if !self.children.is_empty() {
            panic!("start is allowed only in leaf tasks");
        }

        if self.started.is_none() {
            gc::collect();
            if self.no_gc {
                self.suppression = Some(GcSuppression::acquire());
            }
            phase::enter_active();
            self.alloc_mark = Some(alloc::snapshot());
            self.started = Some(Instant::now());
        }

        self.count += 1;
    }

    /// Stop the measuring clock until [`Task::resume`]
    ///
    /// Panics if the task has not started. Pausing twice is a no-op.
    pub fn pause(&mut self) {
        if self.started.is_none() {
            panic!("pause is allowed only in started leaf tasks");
        }
        if self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
            phase::reset();
        }
    }

    /// Resume the measuring clock after [`Task::pause`]
    pub fn resume(&mut self) {
        if let Some(at) = self.paused_at.take() {
            self.paused += at.elapsed();
            phase::enter_active();
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Time spent paused so far (in-memory only)
    pub fn paused(&self) -> Duration {
        self.paused
    }

    /// Allocations inside the measuring window (in-memory only)
    ///
    /// Zero unless [`crate::alloc::CountingAllocator`] is the global allocator.
    pub fn allocations(&self) -> AllocStats {
        self.allocations
    }

    #[cfg(test)]
    pub(crate) fn set_allocations(&mut self, allocations: AllocStats) {
        self.allocations = allocations;
    }

    /// Append a message of the given kind
    pub fn log(&mut self, kind: MessageKind, text: impl Into<String>) {
        let text = text.into();
        match kind {
            MessageKind::Error => {
                tracing::warn!(target: "benchtree::task", task = %self.label, "{}", text)
            }
            MessageKind::Info => {
                tracing::info!(target: "benchtree::task", task = %self.label, "{}", text)
            }
            MessageKind::Debug | MessageKind::Opt => {
                tracing::debug!(target: "benchtree::task", task = %self.label, "{}", text)
            }
        }
        self.messages.push(Message { kind, text });
    }

    /// Append an error message
    pub fn error(&mut self, text: impl fmt::Display) {
        self.log(MessageKind::Error, text.to_string());
    }

    /// Append an info message
    pub fn info(&mut self, text: impl fmt::Display) {
        self.log(MessageKind::Info, text.to_string());
    }

    /// Append a debug message
    pub fn debug(&mut self, text: impl fmt::Display) {
        self.log(MessageKind::Debug, text.to_string());
    }

    /// Append a free-form performance annotation
    pub fn opt(&mut self, text: impl Into<String>) {
        self.log(MessageKind::Opt, text);
    }

    /// Depth-first walk over this task and its descendants
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Task, usize)) {
        fn go<'a>(task: &'a Task, depth: usize, visit: &mut dyn FnMut(&'a Task, usize)) {
            visit(task, depth);
            for child in &task.children {
                go(child, depth + 1, visit);
            }
        }
        go(self, 0, visit);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("label", &self.label)
            .field("count", &self.count)
            .field("active", &self.active)
            .field("total", &self.total)
            .field("error", &self.error)
            .field("children", &self.children)
            .field("messages", &self.messages)
            .finish_non_exhaustive()
    }
}

/// Equality over the persisted fields only
impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
            && self.count == other.count
            && self.active == other.active
            && self.total == other.total
            && self.error == other.error
            && self.children == other.children
            && self.messages == other.messages
    }
}

impl Clone for Task {
    /// Clones the persisted fields and the processor; timing state is not cloned
    fn clone(&self) -> Self {
        let mut task = Task::new(self.label.clone());
        task.count = self.count;
        task.active = self.active;
        task.total = self.total;
        task.error = self.error.clone();
        task.children = self.children.clone();
        task.messages = self.messages.clone();
        task.processor = self.processor.clone();
        task.no_gc = self.no_gc;
        task.allocations = self.allocations;
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{task_debug, task_info};
    use serial_test::serial;
    use std::thread::sleep;

    fn busy(d: Duration) {
        let until = Instant::now() + d;
        while Instant::now() < until {
            std::hint::spin_loop();
        }
    }

    #[test]
    fn test_new_task_is_empty() {
        let t = Task::new("x");
        assert_eq!(t.label, "x");
        assert_eq!(t.count, 0);
        assert_eq!(t.active, Duration::ZERO);
        assert!(t.is_leaf());
        assert!(!t.is_started());
    }

    #[test]
    #[serial]
    fn test_leaf_measures_from_start() {
        let mut t = Task::new("leaf");
        t.run(|t| {
            sleep(Duration::from_millis(5));
            t.start();
            busy(Duration::from_millis(2));
            Ok(())
        });
        assert_eq!(t.count, 1);
        assert!(t.active >= Duration::from_millis(2));
        assert!(t.total >= t.active + Duration::from_millis(5));
    }

    #[test]
    #[serial]
    fn test_restart_only_counts() {
        let mut t = Task::new("leaf");
        t.run(|t| {
            t.start();
            t.start();
            t.start();
            Ok(())
        });
        assert_eq!(t.count, 3);
    }

    #[test]
    fn test_unstarted_leaf_keeps_zero_active() {
        let mut t = Task::new("idle");
        t.run(|_| {
            sleep(Duration::from_millis(1));
            Ok(())
        });
        assert_eq!(t.active, Duration::ZERO);
        assert!(t.total >= Duration::from_millis(1));
    }

    #[test]
    #[serial]
    fn test_composite_active_is_sum_of_children() {
        let mut root = Task::new(".");
        root.run(|t| {
            for label in ["a", "b"] {
                t.run_sub(label, |leaf| {
                    leaf.start();
                    busy(Duration::from_millis(1));
                    Ok(())
                })?;
            }
            Ok(())
        });
        let sum: Duration = root.children.iter().map(|c| c.active).sum();
        assert_eq!(root.active, sum);
        assert!(root.total >= root.active);
    }

    #[test]
    #[serial]
    fn test_pause_excluded_from_active() {
        let mut t = Task::new("leaf");
        t.run(|t| {
            t.start();
            t.pause();
            sleep(Duration::from_millis(20));
            t.resume();
            Ok(())
        });
        assert!(t.paused() >= Duration::from_millis(20));
        assert!(t.active < Duration::from_millis(20));
    }

    #[test]
    fn test_child_failure_is_returned_and_recorded() {
        let mut root = Task::new(".");
        let mut seen = None;
        root.run(|t| {
            seen = Some(t.run_sub("fails", |_| Err(anyhow::anyhow!("it fails always"))));
            Ok(())
        });
        assert_eq!(
            seen.unwrap().unwrap_err().message(),
            "it fails always"
        );
        assert!(root.error.is_none());
        assert_eq!(
            root.children[0].error.as_ref().unwrap().message(),
            "it fails always"
        );
    }

    #[test]
    fn test_processor_can_drop_children() {
        let keep_even: Arc<dyn Processor> = Arc::new(|_: Option<&Task>, child: Task| {
            if child.label.ends_with('1') {
                None
            } else {
                Some(child)
            }
        });
        let mut root = Task::new(".").with_processor(keep_even);
        root.run(|t| {
            t.run_sub("c0", |_| Ok(()))?;
            let dropped = t.run_sub("c1", |_| Err(anyhow::anyhow!("hidden")));
            assert!(dropped.is_err());
            t.run_sub("c2", |_| Ok(()))?;
            Ok(())
        });
        let labels: Vec<_> = root.children.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, ["c0", "c2"]);
    }

    #[test]
    fn test_processor_propagates_to_grandchildren() {
        let rename: Arc<dyn Processor> = Arc::new(|_: Option<&Task>, mut child: Task| {
            child.label = child.label.to_uppercase();
            Some(child)
        });
        let mut root = Task::new(".").with_processor(rename);
        root.run(|t| {
            t.run_sub("outer", |t| t.run_sub("inner", |_| Ok(())).map_err(Into::into))?;
            Ok(())
        });
        assert_eq!(root.children[0].label, "OUTER");
        assert_eq!(root.children[0].children[0].label, "INNER");
    }

    #[test]
    fn test_run_sub_with_foreign_error() {
        let mut root = Task::new(".");
        root.run(|t| {
            let r = t.run_sub_with("io", |_| {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
            });
            assert!(r.is_err());
            Ok(())
        });
        assert_eq!(root.children[0].error.as_ref().unwrap().message(), "gone");
    }

    #[test]
    #[should_panic(expected = "start is allowed only in leaf tasks")]
    fn test_start_on_composite_panics() {
        let mut root = Task::new(".");
        root.run(|t| {
            t.run_sub("child", |_| Ok(()))?;
            t.start();
            Ok(())
        });
    }

    #[test]
    #[serial]
    #[should_panic(expected = "sub-tasks are not allowed in a started leaf task")]
    fn test_sub_task_on_started_leaf_panics() {
        let mut root = Task::new(".");
        root.run(|t| {
            t.start();
            t.run_sub("child", |_| Ok(()))?;
            Ok(())
        });
    }

    #[test]
    #[should_panic(expected = "pause is allowed only in started leaf tasks")]
    fn test_pause_before_start_panics() {
        let mut t = Task::new("leaf");
        t.pause();
    }

    #[test]
    fn test_messages_keep_order() {
        let mut t = Task::new("m");
        t.run(|t| {
            t.info("hello!");
            task_debug!(t, "benchmarking in test {}", "m");
            t.error("something went wrong");
            t.opt("inlined hot loop");
            task_info!(t, "{} + {} = {}", 1, 2, 3);
            Ok(())
        });
        let kinds: Vec<_> = t.messages.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            [
                MessageKind::Info,
                MessageKind::Debug,
                MessageKind::Error,
                MessageKind::Opt,
                MessageKind::Info
            ]
        );
        assert_eq!(t.messages[1].text, "benchmarking in test m");
        assert_eq!(t.messages[4].text, "1 + 2 = 3");
    }

    #[test]
    fn test_equality_ignores_runtime_state() {
        let mut a = Task::new("x");
        a.count = 2;
        let b = a.clone().with_gc_suppression(true);
        assert_eq!(a, b);
    }

    #[test]
    fn test_walk_visits_depth_first() {
        let mut root = Task::new(".");
        root.run(|t| {
            t.run_sub("a", |t| t.run_sub("a1", |_| Ok(())).map_err(Into::into))?;
            t.run_sub("b", |_| Ok(()))?;
            Ok(())
        });
        let mut seen = Vec::new();
        root.walk(&mut |t, depth| seen.push((t.label.clone(), depth)));
        assert_eq!(
            seen,
            [
                (".".to_string(), 0),
                ("a".to_string(), 1),
                ("a1".to_string(), 2),
                ("b".to_string(), 1)
            ]
        );
    }
}
