//! Execution-phase tagging for the carrying thread
//!
//! A leaf that starts measuring marks the thread as being in the `active`
//! phase until its parent regains control. While CPU capture is on, the mark is
//! also written into the OS thread name so that samples taken by the signal
//! handler carry it; the CPU sampler turns that name into a `t=active` label,
//! which is what tagged reports focus on.

use std::cell::{Cell, RefCell};
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};

/// Label key attached to samples taken inside a measuring window
pub const TAG_KEY: &str = "t";

/// Label value for samples taken inside a measuring window
pub const ACTIVE: &str = "active";

/// Tag filter expression selecting measured samples
pub const ACTIVE_TAG_FILTER: &str = "t=active";

/// OS thread name used while a leaf is measuring and capture is on
pub const ACTIVE_THREAD_NAME: &str = "bench:active";

static CAPTURE: AtomicBool = AtomicBool::new(false);

thread_local! {
    static PHASE: Cell<Option<&'static str>> = const { Cell::new(None) };
    static SAVED_NAME: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Turn thread-name tagging on or off (owned by the CPU sampler)
pub(crate) fn set_capture(on: bool) {
    CAPTURE.store(on, Ordering::SeqCst);
}

/// Whether thread-name tagging is on
pub fn capture_enabled() -> bool {
    CAPTURE.load(Ordering::SeqCst)
}

/// Current phase of this thread
pub fn current() -> Option<&'static str> {
    PHASE.with(|p| p.get())
}

/// Mark this thread as measuring
pub fn enter_active() {
    PHASE.with(|p| p.set(Some(ACTIVE)));
    if capture_enabled() {
        SAVED_NAME.with(|saved| {
            let mut saved = saved.borrow_mut();
            if saved.is_none() {
                *saved = Some(thread_name::get().unwrap_or_default());
            }
        });
        thread_name::set(ACTIVE_THREAD_NAME);
    }
}

/// Clear the phase mark and restore the thread name
pub fn reset() {
    PHASE.with(|p| p.set(None));
    SAVED_NAME.with(|saved| {
        if let Some(name) = saved.borrow_mut().take() {
            if let Ok(name) = name.into_string() {
                thread_name::set(&name);
            }
        }
    });
}

#[cfg(target_os = "linux")]
mod thread_name {
    use std::ffi::CString;

    pub(super) fn get() -> Option<CString> {
        nix::sys::prctl::get_name().ok()
    }

    pub(super) fn set(name: &str) {
        if let Ok(name) = CString::new(name) {
            if let Err(err) = nix::sys::prctl::set_name(&name) {
                tracing::debug!("failed to set thread name: {}", err);
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod thread_name {
    use std::ffi::CString;

    pub(super) fn get() -> Option<CString> {
        None
    }

    pub(super) fn set(_name: &str) {}
}
