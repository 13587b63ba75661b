//! One-shot bootstrap of the asynchronous storage stack
//!
//! The storage engine initializes on its own worker; the extension cannot
//! proceed until the handle exists. The coordinator gates on the migration
//! predicate, starts the producer at most once, and blocks the calling
//! thread on an [`AsyncResult`] until the handle is ready (or the optional
//! deadline elapses).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::InitializationError;
use crate::future::AsyncResult;
use crate::providers::{StorageHandle, StorageProvider};

/// Observable bootstrap progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Uninitialized,
    Bootstrapping,
    Ready,
    Failed,
}

/// Drives the storage initialization to completion exactly once. A fresh
/// coordinator is created per initialization attempt; re-running a used one
/// fails with [`InitializationError::AlreadyStarted`].
pub struct BootstrapCoordinator {
    account_id: Uuid,
    container: PathBuf,
    poll_interval: Duration,
    timeout: Option<Duration>,
    started: AtomicBool,
    state: Mutex<BootstrapState>,
}

impl BootstrapCoordinator {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            account_id: config.account_id,
            container: config.shared_container.clone(),
            poll_interval: config.poll_interval,
            timeout: config.bootstrap_timeout,
            started: AtomicBool::new(false),
            state: Mutex::new(BootstrapState::Uninitialized),
        }
    }

    /// Current bootstrap state.
    pub fn state(&self) -> BootstrapState {
        *self.state.lock().unwrap()
    }

    /// Run the bootstrap, blocking until the storage handle is ready.
    ///
    /// Fails fast with `NeedsMigration` before the producer is ever
    /// invoked if the store requires a full-app migration.
    pub fn run(
        &self,
        storage: &dyn StorageProvider,
    ) -> Result<Arc<dyn StorageHandle>, InitializationError> {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!(account = %self.account_id, "bootstrap coordinator re-run rejected");
            return Err(InitializationError::AlreadyStarted);
        }

        if storage.needs_migration(self.account_id, &self.container) {
            info!(account = %self.account_id, "store needs migration, deferring to main app");
            self.set_state(BootstrapState::Failed);
            return Err(InitializationError::NeedsMigration);
        }

        self.set_state(BootstrapState::Bootstrapping);
        debug!(
            account = %self.account_id,
            container = %self.container.display(),
            "starting storage stack"
        );

        let future = AsyncResult::new();
        let producer = future.clone();
        let account_id = self.account_id;
        storage.create_handle(
            self.account_id,
            &self.container,
            Box::new(move || {
                debug!(account = %account_id, "in-place storage migration started");
            }),
            Box::new(move |handle| {
                // Single-producer contract: a duplicate completion keeps
                // the first handle and is only logged.
                if producer.fulfill(handle).is_err() {
                    warn!(account = %account_id, "storage handle delivered twice, ignoring");
                }
            }),
        );

        let handle = match self.timeout {
            Some(timeout) => match future.await_with_deadline(self.poll_interval, timeout) {
                Some(handle) => handle,
                None => {
                    warn!(account = %self.account_id, ?timeout, "storage stack never became ready");
                    self.set_state(BootstrapState::Failed);
                    return Err(InitializationError::BootstrapTimeout(timeout));
                }
            },
            None => future.await_blocking(self.poll_interval),
        };

        self.set_state(BootstrapState::Ready);
        info!(account = %self.account_id, "storage stack ready");
        Ok(handle)
    }

    fn set_state(&self, state: BootstrapState) {
        *self.state.lock().unwrap() = state;
    }
}
