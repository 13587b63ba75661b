//! Collaborator interfaces consumed by the session core
//!
//! The storage engine, network transport, reachability, request strategies,
//! caches and the notification bus all live in external frameworks. The
//! session only needs the narrow seams below; each trait has one concrete
//! implementation on the collaborator side, composed via constructor
//! injection.
//!
//! Collaborator failures are surfaced as plain `String` messages — the
//! session maps them into its own typed errors at the seam.

use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use crate::guard::ProcessGuard;
use crate::status::StatusDirectory;

/// Which of the two logical execution contexts a unit of work targets.
/// Both operate on the same underlying data; mutation is funneled through
/// one serialized queue per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// The UI-facing context the extension enqueues changes on.
    Foreground,
    /// The sync context the strategies operate on.
    Background,
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextKind::Foreground => write!(f, "foreground"),
            ContextKind::Background => write!(f, "background"),
        }
    }
}

/// Handle onto the initialized storage stack for one account.
pub trait StorageHandle: Send + Sync {
    /// Persisted client identifier, if this account has registered a
    /// device client. An empty string counts as not registered.
    fn persisted_client_id(&self) -> Option<String>;

    /// Persist pending changes on the given context.
    fn save(&self, context: ContextKind) -> Result<(), String>;

    /// Release the handle. Called exactly once, as the last resource
    /// teardown step before the process guard is cleared.
    fn release(&self);
}

impl std::fmt::Debug for dyn StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn StorageHandle")
    }
}

/// Storage engine seam: migration predicate plus asynchronous handle
/// creation. The provider runs the creation on its own worker and reports
/// completion through the callback — it must never block the calling
/// thread, which is parked waiting for `on_complete`.
pub trait StorageProvider: Send + Sync {
    /// Whether the on-disk store needs a migration before it can be opened.
    fn needs_migration(&self, account_id: Uuid, container: &Path) -> bool;

    /// Start asynchronous creation of the storage handle. `on_started`
    /// fires if a lightweight in-place migration begins; `on_complete`
    /// fires exactly once with the ready handle.
    fn create_handle(
        &self,
        account_id: Uuid,
        container: &Path,
        on_started: Box<dyn FnOnce() + Send>,
        on_complete: Box<dyn FnOnce(Arc<dyn StorageHandle>) + Send>,
    );
}

/// Reachability monitor opened alongside the transport and torn down
/// before it.
pub trait ReachabilityMonitor: Send + Sync {
    fn tear_down(&self) -> Result<(), String>;
}

/// Open network transport session.
pub trait TransportHandle: Send + Sync {
    /// Whether an authentication cookie is present. The live source of the
    /// authentication state.
    fn cookie_present(&self) -> bool;

    fn tear_down(&self) -> Result<(), String>;
}

/// Network transport seam.
pub trait TransportProvider: Send + Sync {
    /// Start monitoring reachability of the given server hosts.
    fn open_reachability(
        &self,
        server_names: &[String],
    ) -> Result<Arc<dyn ReachabilityMonitor>, String>;

    /// Open the transport session against the backend.
    fn open(
        &self,
        base_url: &str,
        websocket_url: &str,
        reachability: Arc<dyn ReachabilityMonitor>,
    ) -> Result<Arc<dyn TransportHandle>, String>;
}

/// Client registration seam: whether this account has a registered device
/// client and may generate requests.
pub trait ClientRegistrationProvider: Send + Sync {
    fn is_client_ready(&self) -> bool;
}

/// The set of request-generating sync strategies, owned until teardown.
pub trait StrategySet: Send + Sync {
    fn tear_down(&self) -> Result<(), String>;
}

/// Strategy / request-scheduling seam. Builds the strategy set bound to the
/// storage handle and the live status directory.
pub trait StrategyProvider: Send + Sync {
    fn build_strategies(
        &self,
        storage: Arc<dyn StorageHandle>,
        status: Arc<StatusDirectory>,
    ) -> Result<Arc<dyn StrategySet>, String>;
}

/// Cache seam: binds the image/file caches under `caches_directory` to both
/// contexts of the storage handle.
pub trait CacheBinder: Send + Sync {
    fn bind_caches(
        &self,
        storage: Arc<dyn StorageHandle>,
        caches_directory: &Path,
    ) -> Result<(), String>;
}

/// Opaque subscription handle returned by the notification bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub u64);

/// Notification bus seam used for context-merge save notifications.
pub trait NotificationBus: Send + Sync {
    fn subscribe(
        &self,
        event: &str,
        handler: Box<dyn Fn(serde_json::Value) + Send + Sync>,
    ) -> SubscriptionToken;

    fn unsubscribe(&self, token: SubscriptionToken) -> Result<(), String>;
}

/// The full collaborator set handed to [`initialize`](crate::initialize),
/// plus the process guard that enforces the single-session invariant.
#[derive(Clone)]
pub struct Providers {
    pub storage: Arc<dyn StorageProvider>,
    pub transport: Arc<dyn TransportProvider>,
    pub strategies: Arc<dyn StrategyProvider>,
    pub caches: Arc<dyn CacheBinder>,
    pub bus: Arc<dyn NotificationBus>,
    pub guard: Arc<ProcessGuard>,
}
