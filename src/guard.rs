//! At-most-one-session guard
//!
//! The share extension supports a single live session per process. The
//! guard is an explicit value injected into the composer rather than a
//! module-level global, so tests can create a fresh one per case.

use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide single-session flag. Unset at creation; set once a session
/// is composed; released as the final teardown step.
#[derive(Debug, Default)]
pub struct ProcessGuard {
    held: AtomicBool,
}

impl ProcessGuard {
    /// Create an unset guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the guard. Returns `false` if a session already
    /// holds it. The check-and-set is a single compare-exchange, so
    /// concurrent composition attempts cannot both succeed.
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the guard. Safe to call on an unset guard.
    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    /// Whether a session currently holds the guard.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}
