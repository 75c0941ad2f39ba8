//! Run controller
//!
//! One call to [`Runner::run`] executes a whole benchmark tree:
//!
//! 1. pin the thread to its current CPU
//! 2. start the CPU sampler when reports or a raw dump are requested
//! 3. run the root task
//! 4. stop the sampler and build the CPU reports
//! 5. build the allocation reports
//! 6. write the raw dump
//! 7. hand the root to the processor
//! 8. write the JSON result
//!
//! Runs must not overlap within a process; an overlapping run panics.

use crate::alloc;
use crate::benchmark::Benchmark;
use crate::config::RunConfig;
use crate::json_output;
use crate::phase;
use crate::report::{self, Report, ReportKind, ReportOptions, ResolvedProfile, SampleIndex};
use crate::sampler::{self, CpuSampler, Sampler};
use crate::task::{Processor, Task, TaskResult};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Allocation report labels and the sample values they rank by
pub const HEAP_REPORTS: [(&str, SampleIndex); 2] = [
    ("alloc-space", SampleIndex::AllocSpace),
    ("alloc-objects", SampleIndex::AllocObjects),
];

const ALLOCATOR_MISSING: &str =
    "allocation counting is not installed; set benchtree::alloc::CountingAllocator as the global allocator";

static RUN_ACTIVE: AtomicBool = AtomicBool::new(false);

struct RunGuard;

impl RunGuard {
    fn acquire() -> Self {
        if RUN_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            panic!("benchmark runs must not overlap");
        }
        RunGuard
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        RUN_ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// Clears the thread phase even when the body unwinds
struct PhaseReset;

impl Drop for PhaseReset {
    fn drop(&mut self) {
        phase::reset();
    }
}

/// Pins the calling thread to the CPU it is running on; restores the prior
/// affinity mask on drop
#[cfg(target_os = "linux")]
pub struct ThreadPin {
    prior: nix::sched::CpuSet,
    cpu: usize,
}

#[cfg(target_os = "linux")]
impl ThreadPin {
    pub fn current() -> Option<Self> {
        use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
        use nix::unistd::Pid;

        // SAFETY: sched_getcpu has no preconditions.
        let cpu = unsafe { libc::sched_getcpu() };
        let cpu = usize::try_from(cpu).ok()?;
        let this = Pid::from_raw(0);
        let prior = match sched_getaffinity(this) {
            Ok(set) => set,
            Err(err) => {
                tracing::debug!("sched_getaffinity failed: {}", err);
                return None;
            }
        };
        let mut pinned = CpuSet::new();
        pinned.set(cpu).ok()?;
        if let Err(err) = sched_setaffinity(this, &pinned) {
            tracing::debug!(cpu, "sched_setaffinity failed: {}", err);
            return None;
        }
        tracing::debug!(cpu, "thread pinned");
        Some(Self { prior, cpu })
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }
}

#[cfg(target_os = "linux")]
impl Drop for ThreadPin {
    fn drop(&mut self) {
        let this = nix::unistd::Pid::from_raw(0);
        if let Err(err) = nix::sched::sched_setaffinity(this, &self.prior) {
            tracing::warn!("failed to restore thread affinity: {}", err);
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub struct ThreadPin {
    _private: (),
}

#[cfg(not(target_os = "linux"))]
impl ThreadPin {
    pub fn current() -> Option<Self> {
        None
    }

    pub fn cpu(&self) -> usize {
        0
    }
}

/// Executes benchmark trees with a fixed configuration
#[derive(Clone)]
pub struct Runner {
    config: RunConfig,
    processor: Option<Arc<dyn Processor>>,
}

impl Runner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            processor: None,
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run `body` as the root task and collect the configured reports
    pub fn run<F>(&self, label: &str, body: F) -> Benchmark
    where
        F: FnOnce(&mut Task) -> TaskResult,
    {
        let _run = RunGuard::acquire();
        let config = &self.config;
        let started = Instant::now();
        tracing::info!(label, pprof = config.pprof, heap = config.heap, "benchmark run started");

        let _pin = if config.pin_thread {
            ThreadPin::current()
        } else {
            None
        };

        let mut sampler_error = None;
        let mut cpu = None;
        if config.samples_cpu() {
            let mut sampler = CpuSampler::new(config.frequency);
            match sampler.start() {
                Ok(()) => cpu = Some(sampler),
                Err(err) => {
                    tracing::warn!("CPU sampler failed to start: {}", err);
                    sampler_error = Some(err.to_string());
                }
            }
        }

        let mut root = Task::new(label).with_gc_suppression(config.no_gc);
        if let Some(processor) = &self.processor {
            root = root.with_processor(Arc::clone(processor));
        }
        {
            let _phase = PhaseReset;
            root.run(body);
        }

        let dump = match cpu.as_mut().map(|s| s.stop()) {
            Some(Ok(dump)) => Some(dump),
            Some(Err(err)) => {
                tracing::warn!("CPU sampler failed to stop: {}", err);
                sampler_error = Some(err.to_string());
                None
            }
            None => None,
        };

        let pprof = if config.pprof {
            cpu_reports(config, dump.as_deref(), sampler_error.as_deref())
        } else {
            Vec::new()
        };

        let heap = if config.heap {
            heap_reports(config, &root)
        } else {
            Vec::new()
        };

        if let (Some(path), Some(dump)) = (&config.cpu_profile, &dump) {
            match fs::write(path, dump) {
                Ok(()) => tracing::info!(path = %path.display(), bytes = dump.len(), "CPU profile written"),
                Err(err) => tracing::warn!(path = %path.display(), "failed to write CPU profile: {}", err),
            }
        }

        let task = match &self.processor {
            Some(processor) => processor.transform(None, root.clone()).unwrap_or(root),
            None => root,
        };

        let benchmark = Benchmark { task, pprof, heap };

        if let Some(path) = &config.result {
            let written = fs::File::create(path)
                .map_err(Into::into)
                .and_then(|file| json_output::write_json(std::io::BufWriter::new(file), &benchmark));
            match written {
                Ok(bytes) => tracing::info!(path = %path.display(), bytes, "benchmark result written"),
                Err(err) => tracing::warn!(path = %path.display(), "failed to write result: {}", err),
            }
        }

        tracing::info!(
            label,
            elapsed_ms = started.elapsed().as_millis() as u64,
            failed = benchmark.has_failures(),
            "benchmark run finished"
        );
        benchmark
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(RunConfig::default())
    }
}

/// The six standard CPU reports
fn cpu_reports(config: &RunConfig, dump: Option<&[u8]>, sampler_error: Option<&str>) -> Vec<Report> {
    let profile = match dump.map(ResolvedProfile::decode) {
        Some(Ok(profile)) => Ok(profile),
        Some(Err(err)) => Err(err.to_string()),
        None => Err(sampler_error.unwrap_or("CPU sampler did not run").to_string()),
    };

    ReportKind::ALL
        .iter()
        .map(|kind| match &profile {
            Ok(profile) => {
                let mut options = kind.options(config.report_count);
                if let (ReportKind::Top, Some(graph)) = (kind, config.callgraph) {
                    options = options.callgraph(graph, config.callgraph_count, config.no_legend);
                }
                report::top_resolved(profile, kind.label(), &options)
            }
            Err(err) => Report::failed(kind.label(), err),
        })
        .collect()
}

/// Allocation reports from the per-leaf counters of the finished tree
fn heap_reports(config: &RunConfig, root: &Task) -> Vec<Report> {
    if !alloc::is_counting() {
        tracing::warn!("{}", ALLOCATOR_MISSING);
        return HEAP_REPORTS
            .iter()
            .map(|(label, _)| Report::failed(*label, ALLOCATOR_MISSING))
            .collect();
    }
    let dump = sampler::heap_profile(root);
    HEAP_REPORTS
        .iter()
        .map(|(label, index)| {
            let options = ReportOptions::default()
                .count(config.report_count)
                .sample_index(*index);
            report::top(&dump, label, &options)
        })
        .collect()
}

/// Run with configuration from `BENCHTREE_*` environment variables
pub fn run<F>(label: &str, body: F) -> Benchmark
where
    F: FnOnce(&mut Task) -> TaskResult,
{
    Runner::new(env_config()).run(label, body)
}

/// Like [`run`], with a processor applied to every completed task
pub fn run_with_processor<P, F>(label: &str, processor: P, body: F) -> Benchmark
where
    P: Processor + 'static,
    F: FnOnce(&mut Task) -> TaskResult,
{
    Runner::new(env_config())
        .with_processor(Arc::new(processor))
        .run(label, body)
}

fn env_config() -> RunConfig {
    match RunConfig::from_env().and_then(|c| c.validate().map(|()| c)) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("ignoring BENCHTREE_* environment: {}", err);
            RunConfig::default()
        }
    }
}
