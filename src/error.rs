//! Error taxonomy for session bootstrap, composition and teardown
//!
//! Initialization failures are returned synchronously from
//! [`initialize`](crate::session::initialize) — no partial session is ever
//! handed to the caller. Teardown failures are collected, not thrown
//! mid-sequence, so that every step gets a chance to run.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, InitializationError>;

/// Why a session could not be initialized.
#[derive(Debug, Error)]
pub enum InitializationError {
    /// The local store needs a migration, which only the main application
    /// performs. The caller must redirect the user to the full app.
    #[error("local store needs migration (only the main application migrates)")]
    NeedsMigration,

    /// No user is logged in. Recoverable — prompt re-authentication.
    #[error("no user is logged in")]
    LoggedOut,

    /// The shared application-group container does not exist. Fatal
    /// configuration error.
    #[error("shared container missing: {0}")]
    MissingSharedContainer(String),

    /// `run()` was invoked on a coordinator that already ran. Programming
    /// error — never expected in correct usage.
    #[error("bootstrap coordinator already started")]
    AlreadyStarted,

    /// A live session already exists in this process. Programming error —
    /// at most one session per process is supported.
    #[error("a session already exists in this process")]
    DuplicateSession,

    /// The storage stack did not come up within the configured window.
    #[error("storage stack not ready within {0:?}")]
    BootstrapTimeout(Duration),

    /// An external collaborator failed while the session was being
    /// assembled.
    #[error("{collaborator} failed during initialization: {message}")]
    CollaboratorFailed {
        collaborator: &'static str,
        message: String,
    },
}

/// Error returned when a single-assignment future is fulfilled twice.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FulfillError {
    #[error("value was already fulfilled")]
    AlreadyFulfilled,
}

/// A single failed teardown step.
#[derive(Debug, Clone)]
pub struct StepFailure {
    /// Label of the resource whose disposer failed.
    pub step: &'static str,
    /// Collaborator-provided failure message.
    pub message: String,
}

/// Aggregate teardown failure. Non-fatal: every registered step was still
/// attempted and resources were released best-effort.
#[derive(Debug, Error)]
#[error("teardown completed with {} failed step(s)", failures.len())]
pub struct TeardownError {
    /// Failed steps in the order they were attempted.
    pub failures: Vec<StepFailure>,
}

impl TeardownError {
    /// Whether the named step is among the failures.
    pub fn failed_step(&self, step: &str) -> bool {
        self.failures.iter().any(|f| f.step == step)
    }
}
