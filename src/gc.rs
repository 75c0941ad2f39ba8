//! Process-wide collector control
//!
//! The harness forces a collection right before a leaf starts measuring and can
//! suppress automatic collection for the duration of that leaf. Collection is
//! delegated to an installable [`Collector`]; the default one trims the system
//! allocator's free lists (glibc) and is a no-op elsewhere.
//!
//! Suppression is a single process-wide switch owned by a [`GcSuppression`]
//! guard. Only the guard holder restores the prior threshold, and it does so on
//! every exit path, including unwinding out of a panicking task body.

use parking_lot::{const_mutex, Mutex};

/// Threshold value meaning "automatic collection disabled"
pub const DISABLED: i32 = -1;

/// Threshold in effect when nothing has changed it
pub const DEFAULT_THRESHOLD: i32 = 100;

/// Backend that performs collections and honors a collection threshold
///
/// The threshold is expressed as a percentage of the baseline trigger point;
/// negative values disable automatic collection.
pub trait Collector: Send {
    /// Run a full collection now
    fn collect(&mut self);

    /// Apply a new threshold
    fn apply_threshold(&mut self, threshold: i32);
}

/// Default collector backed by the system allocator
#[derive(Debug, Default)]
pub struct MallocCollector;

impl Collector for MallocCollector {
    fn collect(&mut self) {
        trim_free_lists();
    }

    fn apply_threshold(&mut self, threshold: i32) {
        set_trim_threshold(threshold);
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
const BASE_TRIM_THRESHOLD: i64 = 128 * 1024;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn trim_free_lists() {
    // SAFETY: malloc_trim only walks allocator-owned free lists.
    unsafe {
        libc::malloc_trim(0);
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn set_trim_threshold(threshold: i32) {
    let bytes = if threshold < 0 {
        libc::c_int::MAX
    } else {
        (BASE_TRIM_THRESHOLD * i64::from(threshold) / 100).clamp(0, i64::from(libc::c_int::MAX))
            as libc::c_int
    };
    // SAFETY: M_TRIM_THRESHOLD accepts any non-negative byte count.
    unsafe {
        libc::mallopt(libc::M_TRIM_THRESHOLD, bytes);
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn trim_free_lists() {}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn set_trim_threshold(_threshold: i32) {}

struct State {
    threshold: i32,
    suppressed: bool,
    collector: Option<Box<dyn Collector>>,
}

impl State {
    fn collector(&mut self) -> &mut dyn Collector {
        self.collector
            .get_or_insert_with(|| Box::new(MallocCollector))
            .as_mut()
    }
}

static STATE: Mutex<State> = const_mutex(State {
    threshold: DEFAULT_THRESHOLD,
    suppressed: false,
    collector: None,
});

/// Replace the process-wide collector backend
///
/// The current threshold is re-applied to the new backend.
pub fn install_collector(collector: Box<dyn Collector>) {
    let mut state = STATE.lock();
    state.collector = Some(collector);
    let threshold = state.threshold;
    state.collector().apply_threshold(threshold);
}

/// Force a collection now
pub fn collect() {
    STATE.lock().collector().collect();
}

/// Current collection threshold ([`DISABLED`] while suppressed)
pub fn threshold() -> i32 {
    STATE.lock().threshold
}

/// Set the collection threshold, returning the previous value
///
/// Panics while a [`GcSuppression`] guard is held: only the guard may change
/// the threshold until it is released.
pub fn set_threshold(threshold: i32) -> i32 {
    let mut state = STATE.lock();
    if state.suppressed {
        panic!("collector threshold is owned by an active suppression guard");
    }
    let prior = std::mem::replace(&mut state.threshold, threshold);
    state.collector().apply_threshold(threshold);
    prior
}

/// Whether automatic collection is currently suppressed by a guard
pub fn is_suppressed() -> bool {
    STATE.lock().suppressed
}

/// Owning token for collector suppression
///
/// Acquiring disables automatic collection and runs one full collection.
/// Dropping the guard restores the threshold that was in effect before.
#[derive(Debug)]
#[must_use = "suppression ends when the guard is dropped"]
pub struct GcSuppression {
    prior: i32,
}

impl GcSuppression {
    /// Disable automatic collection
    ///
    /// Panics if another guard is already alive; suppression is not reentrant.
    pub fn acquire() -> Self {
        let mut state = STATE.lock();
        if state.suppressed {
            panic!("collector suppression is already held by another leaf task");
        }
        state.suppressed = true;
        let prior = std::mem::replace(&mut state.threshold, DISABLED);
        let collector = state.collector();
        collector.apply_threshold(DISABLED);
        collector.collect();
        tracing::debug!(prior, "collector suppression acquired");
        Self { prior }
    }

    /// Threshold that will be restored on release
    pub fn prior(&self) -> i32 {
        self.prior
    }

    /// Restore the prior threshold now
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for GcSuppression {
    fn drop(&mut self) {
        let mut state = STATE.lock();
        state.threshold = self.prior;
        state.suppressed = false;
        let prior = self.prior;
        state.collector().apply_threshold(prior);
        tracing::debug!(prior, "collector suppression released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_guard_restores_prior_threshold() {
        let before = threshold();
        let guard = GcSuppression::acquire();
        assert_eq!(guard.prior(), before);
        assert_eq!(threshold(), DISABLED);
        assert!(is_suppressed());
        guard.release();
        assert_eq!(threshold(), before);
        assert!(!is_suppressed());
    }

    #[test]
    #[serial]
    fn test_restores_custom_threshold() {
        let original = set_threshold(250);
        {
            let _guard = GcSuppression::acquire();
            assert_eq!(threshold(), DISABLED);
        }
        assert_eq!(threshold(), 250);
        set_threshold(original);
    }

    #[test]
    #[serial]
    fn test_second_guard_is_a_contract_violation() {
        let _guard = GcSuppression::acquire();
        let nested = std::panic::catch_unwind(GcSuppression::acquire);
        assert!(nested.is_err());
        assert!(is_suppressed());
    }

    #[test]
    #[serial]
    fn test_collect_without_guard() {
        collect();
        assert!(!is_suppressed());
    }
}
