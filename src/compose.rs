//! Session composition
//!
//! The synchronous decision step between bootstrap and a usable session:
//! given the ready storage handle, the open transport, and the status
//! snapshots, either all preconditions hold and the dependent subsystems
//! are assembled, or composition fails with a typed error and leaves no
//! state behind. The process guard is claimed here — at most one session
//! per process — and released again if a later assembly step fails.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::InitializationError;
use crate::guard::ProcessGuard;
use crate::providers::{CacheBinder, StorageHandle, StrategyProvider, StrategySet};
use crate::status::{AuthenticationState, StatusDirectory};

/// Subsystems assembled by a successful composition.
pub struct Composition {
    pub strategies: Arc<dyn StrategySet>,
}

impl std::fmt::Debug for Composition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composition").finish_non_exhaustive()
    }
}

/// Validates preconditions and assembles the session's dependent
/// subsystems. Pure decision given its inputs: the same storage, transport
/// and status snapshots always produce the same outcome.
pub struct SessionComposer {
    guard: Arc<ProcessGuard>,
    strategies: Arc<dyn StrategyProvider>,
    caches: Arc<dyn CacheBinder>,
}

impl SessionComposer {
    pub fn new(
        guard: Arc<ProcessGuard>,
        strategies: Arc<dyn StrategyProvider>,
        caches: Arc<dyn CacheBinder>,
    ) -> Self {
        Self {
            guard,
            strategies,
            caches,
        }
    }

    /// Compose the session subsystems.
    ///
    /// Order matters: the authentication snapshot is checked before the
    /// guard is touched, so a logged-out attempt never claims (or reports
    /// on) the single-session slot. On any failure after the guard was
    /// claimed it is released again — a failed attempt must not block a
    /// subsequent one.
    pub fn compose(
        &self,
        storage: &Arc<dyn StorageHandle>,
        status: &Arc<StatusDirectory>,
        caches_directory: &Path,
    ) -> Result<Composition, InitializationError> {
        let snapshot = status.authentication_state();
        if snapshot != AuthenticationState::Authenticated {
            info!("composition rejected: no authenticated user");
            return Err(InitializationError::LoggedOut);
        }

        if !self.guard.try_acquire() {
            error!("composition rejected: a session already exists in this process");
            return Err(InitializationError::DuplicateSession);
        }

        let strategies = match self
            .strategies
            .build_strategies(Arc::clone(storage), Arc::clone(status))
        {
            Ok(set) => set,
            Err(message) => {
                self.guard.release();
                return Err(InitializationError::CollaboratorFailed {
                    collaborator: "strategy provider",
                    message,
                });
            }
        };

        if let Err(message) = self
            .caches
            .bind_caches(Arc::clone(storage), caches_directory)
        {
            // Unwind what was already assembled before reporting.
            let _ = strategies.tear_down();
            self.guard.release();
            return Err(InitializationError::CollaboratorFailed {
                collaborator: "cache binder",
                message,
            });
        }

        debug!(caches = %caches_directory.display(), "session subsystems assembled");
        Ok(Composition { strategies })
    }

    pub fn guard(&self) -> &Arc<ProcessGuard> {
        &self.guard
    }
}
