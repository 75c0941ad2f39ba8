//! Allocation counting
//!
//! Install [`CountingAllocator`] as the global allocator to have every leaf
//! task record the bytes and objects allocated inside its measuring window:
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: benchtree::alloc::CountingAllocator = benchtree::alloc::CountingAllocator;
//! ```
//!
//! Counters are process-wide and only ever increase. Tasks run on a single
//! thread, so the delta between two snapshots is the task's own allocation
//! as long as no other thread allocates meanwhile.

use std::alloc::{GlobalAlloc, Layout, System};
use std::ops::{Add, AddAssign};
use std::sync::atomic::{AtomicU64, Ordering};

static ALLOCATED_BYTES: AtomicU64 = AtomicU64::new(0);
static ALLOCATED_OBJECTS: AtomicU64 = AtomicU64::new(0);

/// Global allocator wrapper around [`System`] that counts allocations
#[derive(Debug, Default, Clone, Copy)]
pub struct CountingAllocator;

// SAFETY: every call is forwarded unchanged to the system allocator.
unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        record(layout.size());
        // SAFETY: caller upholds the GlobalAlloc contract for `layout`.
        unsafe { System.alloc(layout) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        record(layout.size());
        // SAFETY: caller upholds the GlobalAlloc contract for `layout`.
        unsafe { System.alloc_zeroed(layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if new_size > layout.size() {
            record(new_size - layout.size());
        }
        // SAFETY: caller upholds the GlobalAlloc contract for `ptr` and `layout`.
        unsafe { System.realloc(ptr, layout, new_size) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: caller upholds the GlobalAlloc contract for `ptr` and `layout`.
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[inline]
fn record(bytes: usize) {
    ALLOCATED_BYTES.fetch_add(bytes as u64, Ordering::Relaxed);
    ALLOCATED_OBJECTS.fetch_add(1, Ordering::Relaxed);
}

/// Allocation totals (absolute counters or a delta between two snapshots)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocStats {
    pub bytes: u64,
    pub objects: u64,
}

impl AllocStats {
    /// Allocations that happened after `earlier`
    pub fn since(&self, earlier: &AllocStats) -> AllocStats {
        AllocStats {
            bytes: self.bytes.saturating_sub(earlier.bytes),
            objects: self.objects.saturating_sub(earlier.objects),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.bytes == 0 && self.objects == 0
    }
}

impl Add for AllocStats {
    type Output = AllocStats;

    fn add(self, rhs: AllocStats) -> AllocStats {
        AllocStats {
            bytes: self.bytes + rhs.bytes,
            objects: self.objects + rhs.objects,
        }
    }
}

impl AddAssign for AllocStats {
    fn add_assign(&mut self, rhs: AllocStats) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for AllocStats {
    fn sum<I: Iterator<Item = AllocStats>>(iter: I) -> Self {
        iter.fold(AllocStats::default(), Add::add)
    }
}

/// Current process-wide counters
pub fn snapshot() -> AllocStats {
    AllocStats {
        bytes: ALLOCATED_BYTES.load(Ordering::Relaxed),
        objects: ALLOCATED_OBJECTS.load(Ordering::Relaxed),
    }
}

/// Whether the counting allocator has seen any allocation
pub fn is_counting() -> bool {
    ALLOCATED_OBJECTS.load(Ordering::Relaxed) > 0
}
