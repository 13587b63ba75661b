//! Ordered resource stack with failure-isolated teardown
//!
//! Resources register a disposer as they are acquired; `dispose()` runs the
//! disposers in exact reverse order. Every step runs even if an earlier one
//! fails — failures are collected into an aggregate [`TeardownError`] after
//! all steps have attempted. `dispose()` is idempotent: repeat calls are
//! no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{StepFailure, TeardownError};

type Disposer = Box<dyn FnOnce() -> Result<(), String> + Send>;

/// Stack of labelled teardown steps, executed in reverse registration order.
#[derive(Default)]
pub struct ResourceStack {
    steps: Mutex<Vec<(&'static str, Disposer)>>,
    disposed: AtomicBool,
}

impl ResourceStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a teardown step. Later registrations are torn down earlier.
    /// Registering on an already disposed stack runs the disposer
    /// immediately — the resource must not outlive the stack.
    pub fn register<F>(&self, label: &'static str, disposer: F)
    where
        F: FnOnce() -> Result<(), String> + Send + 'static,
    {
        if self.disposed.load(Ordering::Acquire) {
            warn!(step = label, "registered on disposed stack, releasing immediately");
            if let Err(message) = disposer() {
                warn!(step = label, %message, "immediate release failed");
            }
            return;
        }
        self.steps.lock().unwrap().push((label, Box::new(disposer)));
    }

    /// Number of registered steps still pending.
    pub fn len(&self) -> usize {
        self.steps.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `dispose()` has already run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Tear everything down in reverse registration order. The first call
    /// performs the work; any further call is a no-op returning `Ok`.
    pub fn dispose(&self) -> Result<(), TeardownError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            debug!("dispose called on already disposed stack, nothing to do");
            return Ok(());
        }

        let steps = {
            let mut guard = self.steps.lock().unwrap();
            std::mem::take(&mut *guard)
        };

        let mut failures = Vec::new();
        for (label, disposer) in steps.into_iter().rev() {
            match disposer() {
                Ok(()) => debug!(step = label, "torn down"),
                Err(message) => {
                    warn!(step = label, %message, "teardown step failed, continuing");
                    failures.push(StepFailure {
                        step: label,
                        message,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError { failures })
        }
    }
}
