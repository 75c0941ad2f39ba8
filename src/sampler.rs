//! Profile sources
//!
//! [`CpuSampler`] drives the `pprof` signal-based sampler and converts its
//! report into a profile dump. While it runs, leaf tasks rename their thread
//! to [`phase::ACTIVE_THREAD_NAME`], and samples taken on that thread get a
//! `t=active` label.
//!
//! [`heap_profile`] builds an allocation profile from the per-leaf counters
//! recorded by [`crate::alloc::CountingAllocator`].

use crate::error::{BenchError, Result};
use crate::phase;
use crate::report::ProfileBuilder;
use crate::task::Task;

/// Default sampling frequency in Hz
pub const DEFAULT_FREQUENCY: i32 = 1000;

/// Sample types of CPU dumps, in order
pub const CPU_SAMPLE_TYPES: [(&str, &str); 2] = [("samples", "count"), ("cpu", "nanoseconds")];

/// Sample types of heap dumps, in order
pub const HEAP_SAMPLE_TYPES: [(&str, &str); 2] = [("alloc_objects", "count"), ("alloc_space", "bytes")];

/// Something that records a profile between `start` and `stop`
pub trait Sampler {
    fn start(&mut self) -> Result<()>;

    /// Stop recording and return the encoded dump
    fn stop(&mut self) -> Result<Vec<u8>>;
}

/// CPU sampler backed by `pprof`
pub struct CpuSampler {
    frequency: i32,
    #[cfg(unix)]
    guard: Option<pprof::ProfilerGuard<'static>>,
}

impl CpuSampler {
    pub fn new(frequency: i32) -> Self {
        Self {
            frequency,
            #[cfg(unix)]
            guard: None,
        }
    }

    pub fn frequency(&self) -> i32 {
        self.frequency
    }

    /// Sampling period in nanoseconds
    pub fn period_nanos(&self) -> i64 {
        1_000_000_000 / i64::from(self.frequency.max(1))
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new(DEFAULT_FREQUENCY)
    }
}

#[cfg(unix)]
impl CpuSampler {
    pub fn is_running(&self) -> bool {
        self.guard.is_some()
    }
}

#[cfg(not(unix))]
impl CpuSampler {
    pub fn is_running(&self) -> bool {
        false
    }
}

#[cfg(unix)]
impl Sampler for CpuSampler {
    fn start(&mut self) -> Result<()> {
        if self.guard.is_some() {
            return Err(BenchError::Sampler("CPU sampler already running".to_string()));
        }
        let guard = pprof::ProfilerGuardBuilder::default()
            .frequency(self.frequency)
            .blocklist(&["libc", "libgcc", "pthread", "vdso"])
            .build()
            .map_err(|e| BenchError::Sampler(e.to_string()))?;
        self.guard = Some(guard);
        phase::set_capture(true);
        tracing::debug!(frequency = self.frequency, "CPU sampler started");
        Ok(())
    }

    fn stop(&mut self) -> Result<Vec<u8>> {
        phase::set_capture(false);
        let guard = self
            .guard
            .take()
            .ok_or_else(|| BenchError::Sampler("CPU sampler is not running".to_string()))?;
        let report = guard
            .report()
            .build()
            .map_err(|e| BenchError::Sampler(e.to_string()))?;
        drop(guard);

        let period = self.period_nanos();
        let mut builder = ProfileBuilder::new(&CPU_SAMPLE_TYPES)
            .period("cpu", "nanoseconds", period)
            .duration_nanos(i64::try_from(report.timing.duration.as_nanos()).unwrap_or(i64::MAX));

        for (frames, &count) in &report.data {
            let names: Vec<String> = frames
                .frames
                .iter()
                .flat_map(|inlined| inlined.iter().map(|sym| sym.name()))
                .collect();
            let stack: Vec<&str> = user_frames(&names).iter().map(String::as_str).collect();
            let count = count as i64;
            let mut labels = vec![("thread", frames.thread_name.as_str())];
            if frames.thread_name == phase::ACTIVE_THREAD_NAME {
                labels.push((phase::TAG_KEY, phase::ACTIVE));
            }
            builder.add_sample(&stack, &[count, count * period], &labels);
        }

        tracing::debug!(samples = builder.sample_count(), "CPU sampler stopped");
        Ok(builder.encode())
    }
}

#[cfg(not(unix))]
impl Sampler for CpuSampler {
    fn start(&mut self) -> Result<()> {
        Err(BenchError::Sampler(
            "CPU sampling is not supported on this platform".to_string(),
        ))
    }

    fn stop(&mut self) -> Result<Vec<u8>> {
        Err(BenchError::Sampler("CPU sampler is not running".to_string()))
    }
}

impl Drop for CpuSampler {
    fn drop(&mut self) {
        if self.is_running() {
            phase::set_capture(false);
        }
    }
}

/// Frames of a sampled stack below the signal handler, leaf first
///
/// Sampled stacks start inside the unwinder that captured them. Everything up
/// to and including `perf_signal_handler` is dropped, then any leading
/// unwinder or signal trampoline frames left over. A stack made only of
/// sampler frames is returned unchanged.
pub fn user_frames(names: &[String]) -> &[String] {
    let mut start = names
        .iter()
        .rposition(|n| n.contains("perf_signal_handler"))
        .map_or(0, |i| i + 1);
    while start < names.len() && is_sampler_frame(&names[start]) {
        start += 1;
    }
    if start == names.len() {
        names
    } else {
        &names[start..]
    }
}

fn is_sampler_frame(name: &str) -> bool {
    const PREFIXES: [&str; 4] = ["backtrace::", "<backtrace::", "pprof::", "<pprof::"];
    const TRAMPOLINES: [&str; 4] = ["__restore_rt", "__sigreturn", "_sigtramp", "perf_signal_handler"];
    PREFIXES.iter().any(|p| name.starts_with(p)) || TRAMPOLINES.iter().any(|t| name.contains(t))
}

/// Allocation profile of a completed task tree
///
/// Every leaf with recorded allocations becomes one sample whose stack is the
/// path of task labels, leaf first.
pub fn heap_profile(root: &Task) -> Vec<u8> {
    fn visit<'a>(task: &'a Task, path: &mut Vec<&'a str>, builder: &mut ProfileBuilder) {
        path.push(&task.label);
        if task.is_leaf() {
            let stats = task.allocations();
            if !stats.is_zero() {
                let stack: Vec<&str> = path.iter().rev().copied().collect();
                let objects = i64::try_from(stats.objects).unwrap_or(i64::MAX);
                let bytes = i64::try_from(stats.bytes).unwrap_or(i64::MAX);
                builder.add_sample(&stack, &[objects, bytes], &[]);
            }
        } else {
            for child in &task.children {
                visit(child, path, builder);
            }
        }
        path.pop();
    }

    let mut builder = ProfileBuilder::new(&HEAP_SAMPLE_TYPES);
    visit(root, &mut Vec::new(), &mut builder);
    tracing::debug!(samples = builder.sample_count(), "heap profile built");
    builder.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::AllocStats;
    use crate::report::ResolvedProfile;

    #[test]
    fn test_period_from_frequency() {
        assert_eq!(CpuSampler::new(1000).period_nanos(), 1_000_000);
        assert_eq!(CpuSampler::new(100).period_nanos(), 10_000_000);
        assert_eq!(CpuSampler::new(0).period_nanos(), 1_000_000_000);
        assert!(!CpuSampler::default().is_running());
    }

    #[test]
    fn test_stop_without_start_fails() {
        let mut sampler = CpuSampler::default();
        assert!(sampler.stop().is_err());
    }

    fn frames(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_user_frames_skip_signal_handler() {
        let stack = frames(&[
            "backtrace::backtrace::libunwind::trace",
            "<pprof::backtrace::backtrace_rs::Trace as pprof::backtrace::Trace>::trace",
            "pprof::profiler::perf_signal_handler",
            "__restore_rt",
            "app::hot_loop",
            "app::main",
        ]);
        assert_eq!(user_frames(&stack), ["app::hot_loop", "app::main"]);
    }

    #[test]
    fn test_user_frames_without_handler_frame() {
        let stack = frames(&["backtrace::trace_unsynchronized", "app::hot_loop"]);
        assert_eq!(user_frames(&stack), ["app::hot_loop"]);

        let plain = frames(&["app::hot_loop", "app::main"]);
        assert_eq!(user_frames(&plain), plain.as_slice());
    }

    #[test]
    fn test_user_frames_keeps_sampler_only_stack() {
        let stack = frames(&["pprof::profiler::perf_signal_handler"]);
        assert_eq!(user_frames(&stack), stack.as_slice());
    }

    #[test]
    fn test_heap_profile_paths() {
        let mut root = Task::new(".");
        let mut a = Task::new("a");
        a.set_allocations(AllocStats { bytes: 4096, objects: 4 });
        let mut b = Task::new("b");
        let mut b1 = Task::new("b1");
        b1.set_allocations(AllocStats { bytes: 10, objects: 1 });
        b.children.push(b1);
        let idle = Task::new("idle");
        root.children = vec![a, b, idle];

        let profile = ResolvedProfile::decode(&heap_profile(&root)).unwrap();
        assert_eq!(profile.sample_types[0].name, "alloc_objects");
        assert_eq!(profile.sample_types[1].unit, "bytes");
        assert_eq!(profile.samples.len(), 2);

        let stacks: Vec<Vec<&str>> = profile
            .samples
            .iter()
            .map(|s| s.stack.iter().map(|&i| profile.function_name(i)).collect())
            .collect();
        assert_eq!(stacks[0], ["a", "."]);
        assert_eq!(stacks[1], ["b1", "b", "."]);
        assert_eq!(profile.samples[0].values, [4, 4096]);
    }
}
