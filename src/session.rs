//! The share-extension session facade
//!
//! [`initialize`] is the entry point of this crate. Extension code creates
//! a session as early as possible and holds on to it for the extension's
//! lifetime; content changes are enqueued on the foreground context and
//! persisted through the storage handle. Disposal walks the resource stack
//! in reverse acquisition order after draining both context queues.
//!
//! At most one live session per process: a second `initialize` against the
//! same process guard fails with `DuplicateSession`.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::bootstrap::BootstrapCoordinator;
use crate::compose::SessionComposer;
use crate::config::SessionConfig;
use crate::error::{InitializationError, Result, TeardownError};
use crate::lifecycle::ResourceStack;
use crate::persistence::{SaveNotificationPersistence, CONTEXT_MERGED_EVENT};
use crate::providers::{ContextKind, Providers, StorageHandle};
use crate::queue::ContextQueue;
use crate::status::{StatusDirectory, SynchronizationState};

/// A live share-extension session. Created only through [`initialize`];
/// destroyed through [`Session::dispose`], which cascades to every owned
/// resource.
pub struct Session {
    account_id: Uuid,
    status: Arc<StatusDirectory>,
    storage: Arc<dyn StorageHandle>,
    foreground: Arc<ContextQueue>,
    background: Arc<ContextQueue>,
    save_notifications: Arc<SaveNotificationPersistence>,
    resources: ResourceStack,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

/// Bootstrap the storage stack, validate preconditions and compose a
/// session. Blocks the calling thread during the bootstrap window; call it
/// from a thread you can afford to park, not from an async executor.
///
/// Errors are returned synchronously and leave nothing behind: every
/// resource acquired before the failing step is unwound, and the process
/// guard is only left set by a success.
pub fn initialize(config: SessionConfig, providers: Providers) -> Result<Session> {
    config.validate()?;
    info!(
        account = %config.account_id,
        container = %config.shared_container.display(),
        "initializing share session"
    );

    let coordinator = BootstrapCoordinator::new(&config);
    let storage = coordinator.run(providers.storage.as_ref())?;

    let reachability = match providers.transport.open_reachability(&config.server_names()) {
        Ok(monitor) => monitor,
        Err(message) => {
            storage.release();
            return Err(InitializationError::CollaboratorFailed {
                collaborator: "reachability",
                message,
            });
        }
    };

    let transport = match providers.transport.open(
        &config.base_url,
        &config.websocket_url,
        Arc::clone(&reachability),
    ) {
        Ok(handle) => handle,
        Err(message) => {
            let _ = reachability.tear_down();
            storage.release();
            return Err(InitializationError::CollaboratorFailed {
                collaborator: "transport",
                message,
            });
        }
    };

    let status = Arc::new(StatusDirectory::new(
        Arc::clone(&transport),
        Arc::clone(&storage),
    ));

    let composer = SessionComposer::new(
        Arc::clone(&providers.guard),
        Arc::clone(&providers.strategies),
        Arc::clone(&providers.caches),
    );
    let composition = match composer.compose(&storage, &status, &config.caches_directory()) {
        Ok(composition) => composition,
        Err(error) => {
            // Reachability goes down before the transport that holds it.
            let _ = reachability.tear_down();
            let _ = transport.tear_down();
            storage.release();
            return Err(error);
        }
    };

    // Everything below unwinds through the resource stack. Registration
    // order is the reverse of the teardown order: the guard goes down
    // last, the context queues drain first.
    let resources = ResourceStack::new();
    {
        let guard = Arc::clone(&providers.guard);
        resources.register("process guard", move || {
            guard.release();
            Ok(())
        });
    }
    {
        let storage = Arc::clone(&storage);
        resources.register("storage handle", move || {
            storage.release();
            Ok(())
        });
    }
    {
        let transport = Arc::clone(&transport);
        resources.register("transport session", move || transport.tear_down());
    }
    {
        let reachability = Arc::clone(&reachability);
        resources.register("reachability", move || reachability.tear_down());
    }
    {
        let strategies = Arc::clone(&composition.strategies);
        resources.register("strategy set", move || strategies.tear_down());
    }

    let save_notifications = match SaveNotificationPersistence::open(&config.account_container()) {
        Ok(persistence) => Arc::new(persistence),
        Err(error) => {
            let _ = resources.dispose();
            return Err(InitializationError::CollaboratorFailed {
                collaborator: "save-notification persistence",
                message: error.to_string(),
            });
        }
    };

    let observer_token = {
        let persistence = Arc::clone(&save_notifications);
        providers.bus.subscribe(
            CONTEXT_MERGED_EVENT,
            Box::new(move |payload| persistence.add(payload)),
        )
    };
    {
        let bus = Arc::clone(&providers.bus);
        resources.register("save-notification observer", move || {
            bus.unsubscribe(observer_token)
        });
    }

    let foreground = match ContextQueue::spawn(ContextKind::Foreground) {
        Ok(queue) => Arc::new(queue),
        Err(error) => {
            let _ = resources.dispose();
            return Err(InitializationError::CollaboratorFailed {
                collaborator: "foreground context queue",
                message: error.to_string(),
            });
        }
    };
    let background = match ContextQueue::spawn(ContextKind::Background) {
        Ok(queue) => Arc::new(queue),
        Err(error) => {
            let _ = foreground.close();
            let _ = resources.dispose();
            return Err(InitializationError::CollaboratorFailed {
                collaborator: "background context queue",
                message: error.to_string(),
            });
        }
    };
    {
        let background = Arc::clone(&background);
        resources.register("background context queue", move || background.close());
    }
    {
        let foreground = Arc::clone(&foreground);
        resources.register("foreground context queue", move || foreground.close());
    }

    info!(account = %config.account_id, "share session ready");
    Ok(Session {
        account_id: config.account_id,
        status,
        storage,
        foreground,
        background,
        save_notifications,
        resources,
    })
}

impl Session {
    /// Account this session was opened for.
    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    /// Whether all prerequisites for sharing are met: an authenticated
    /// user AND a registered device client. Polled live on every call.
    pub fn can_share(&self) -> bool {
        self.status.can_share()
    }

    /// Coarse synchronization readiness, polled live.
    pub fn synchronization_state(&self) -> SynchronizationState {
        self.status.synchronization_state()
    }

    /// Enqueue a content change on the foreground context. The work runs
    /// serialized with all other foreground work, the context is persisted
    /// afterwards, then `on_complete` fires.
    pub fn enqueue_with_completion(
        &self,
        work: impl FnOnce() + Send + 'static,
        on_complete: Option<Box<dyn FnOnce() + Send>>,
    ) {
        self.enqueue_on(&self.foreground, Box::new(work), on_complete);
    }

    /// [`enqueue_with_completion`](Self::enqueue_with_completion) without a
    /// completion callback.
    pub fn enqueue(&self, work: impl FnOnce() + Send + 'static) {
        self.enqueue_with_completion(work, None);
    }

    /// Enqueue a unit of sync work on the background context. Strategy
    /// callbacks use this to stay inside the sync context's confinement.
    pub fn enqueue_sync_work(&self, work: impl FnOnce() + Send + 'static) {
        self.enqueue_on(&self.background, Box::new(work), None);
    }

    fn enqueue_on(
        &self,
        queue: &Arc<ContextQueue>,
        work: Box<dyn FnOnce() + Send>,
        on_complete: Option<Box<dyn FnOnce() + Send>>,
    ) {
        let storage = Arc::clone(&self.storage);
        let context = queue.kind();
        queue.enqueue(Box::new(move || {
            work();
            if let Err(message) = storage.save(context) {
                warn!(%context, %message, "context save failed after enqueued work");
            }
            if let Some(on_complete) = on_complete {
                on_complete();
            }
        }));
    }

    /// Persisted save notifications collected so far (for the main app to
    /// replay on next launch).
    pub fn save_notifications(&self) -> &Arc<SaveNotificationPersistence> {
        &self.save_notifications
    }

    /// Whether this session has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.resources.is_disposed()
    }

    /// Tear down every owned resource in reverse acquisition order. Both
    /// context queues are drained first, so teardown never runs
    /// concurrently with an enqueued unit of work. Idempotent: repeat calls
    /// are no-ops. Step failures are collected into the returned
    /// [`TeardownError`]; they never stop later steps.
    pub fn dispose(&self) -> std::result::Result<(), TeardownError> {
        self.resources.dispose()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.resources.is_disposed() {
            warn!(account = %self.account_id, "session dropped without dispose, tearing down");
            if let Err(error) = self.resources.dispose() {
                warn!(%error, "implicit teardown reported failures");
            }
        }
    }
}
