//! Benchtree - hierarchical benchmark harness with profile-based cost reports
//!
//! A benchmark is a tree of timed [`Task`]s. Leaves measure their own wall
//! time, composites sum their children, and the whole tree serializes to a
//! JSON document whose numbers are decimal strings. A [`Runner`] can sample the
//! CPU while the tree runs and attach ranked function reports built by the
//! [`report`] engine from pprof-format profile dumps.

pub mod alloc;
pub mod benchmark;
pub mod cli;
pub mod config;
pub mod error;
pub mod gc;
pub mod json_output;
pub mod message;
pub mod phase;
pub mod report;
pub mod run;
pub mod sampler;
pub mod task;

pub use benchmark::Benchmark;
pub use config::RunConfig;
pub use error::{BenchError, Result, TaskFailure};
pub use message::{Message, MessageKind};
pub use report::{Report, ReportKind, ReportOptions, Row, Unit};
pub use run::{run, run_with_processor, Runner};
pub use task::{Processor, Task, TaskResult};
