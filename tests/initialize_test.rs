//! End-to-end initialization and teardown tests
//!
//! Exercises the full facade against mock collaborators with call-count
//! assertions: migration short-circuit, the logged-out gate, the
//! single-session invariant, enqueue semantics, save-notification
//! persistence and failure-isolated teardown ordering.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use share_session::error::InitializationError;
use share_session::persistence::CONTEXT_MERGED_EVENT;
use share_session::providers::{
    CacheBinder, ContextKind, NotificationBus, ReachabilityMonitor, StorageHandle,
    StorageProvider, StrategyProvider, StrategySet, SubscriptionToken, TransportHandle,
    TransportProvider,
};
use share_session::status::StatusDirectory;
use share_session::{initialize, ProcessGuard, Providers, SessionConfig, SynchronizationState};

type TeardownLog = Arc<Mutex<Vec<&'static str>>>;

/// Route crate logs through the test harness. `RUST_LOG=debug cargo test`
/// shows the structured initialization/teardown trail per test.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

struct MockStorageHandle {
    client_id: Option<String>,
    saves: Mutex<Vec<ContextKind>>,
    releases: AtomicUsize,
    log: TeardownLog,
}

impl StorageHandle for MockStorageHandle {
    fn persisted_client_id(&self) -> Option<String> {
        self.client_id.clone()
    }

    fn save(&self, context: ContextKind) -> Result<(), String> {
        self.saves.lock().unwrap().push(context);
        Ok(())
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push("storage");
    }
}

struct MockStorageProvider {
    needs_migration: bool,
    delay: Duration,
    create_calls: AtomicUsize,
    handle: Arc<MockStorageHandle>,
}

impl StorageProvider for MockStorageProvider {
    fn needs_migration(&self, _account_id: Uuid, _container: &Path) -> bool {
        self.needs_migration
    }

    fn create_handle(
        &self,
        _account_id: Uuid,
        _container: &Path,
        on_started: Box<dyn FnOnce() + Send>,
        on_complete: Box<dyn FnOnce(Arc<dyn StorageHandle>) + Send>,
    ) {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::clone(&self.handle) as Arc<dyn StorageHandle>;
        let delay = self.delay;
        std::thread::spawn(move || {
            on_started();
            std::thread::sleep(delay);
            on_complete(handle);
        });
    }
}

struct MockReachability {
    teardowns: AtomicUsize,
    fail: bool,
    log: TeardownLog,
}

impl ReachabilityMonitor for MockReachability {
    fn tear_down(&self) -> Result<(), String> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push("reachability");
        if self.fail {
            Err("reachability flags unavailable".to_string())
        } else {
            Ok(())
        }
    }
}

struct MockTransport {
    cookie: AtomicBool,
    teardowns: AtomicUsize,
    log: TeardownLog,
}

impl TransportHandle for MockTransport {
    fn cookie_present(&self) -> bool {
        self.cookie.load(Ordering::SeqCst)
    }

    fn tear_down(&self) -> Result<(), String> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push("transport");
        Ok(())
    }
}

struct MockTransportProvider {
    reachability: Arc<MockReachability>,
    transport: Arc<MockTransport>,
    reachability_opens: AtomicUsize,
    opens: AtomicUsize,
    fail_reachability_open: bool,
    fail_open: bool,
}

impl TransportProvider for MockTransportProvider {
    fn open_reachability(
        &self,
        _server_names: &[String],
    ) -> Result<Arc<dyn ReachabilityMonitor>, String> {
        self.reachability_opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_reachability_open {
            return Err("no network interfaces".to_string());
        }
        Ok(Arc::clone(&self.reachability) as Arc<dyn ReachabilityMonitor>)
    }

    fn open(
        &self,
        _base_url: &str,
        _websocket_url: &str,
        _reachability: Arc<dyn ReachabilityMonitor>,
    ) -> Result<Arc<dyn TransportHandle>, String> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err("backend unreachable".to_string());
        }
        Ok(Arc::clone(&self.transport) as Arc<dyn TransportHandle>)
    }
}

struct MockStrategySet {
    teardowns: AtomicUsize,
    log: TeardownLog,
}

impl StrategySet for MockStrategySet {
    fn tear_down(&self) -> Result<(), String> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push("strategies");
        Ok(())
    }
}

struct MockStrategyProvider {
    builds: AtomicUsize,
    fail: bool,
    set: Arc<MockStrategySet>,
}

impl StrategyProvider for MockStrategyProvider {
    fn build_strategies(
        &self,
        _storage: Arc<dyn StorageHandle>,
        _status: Arc<StatusDirectory>,
    ) -> Result<Arc<dyn StrategySet>, String> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("strategy wiring failed".to_string());
        }
        Ok(Arc::clone(&self.set) as Arc<dyn StrategySet>)
    }
}

struct MockCaches {
    binds: AtomicUsize,
}

impl CacheBinder for MockCaches {
    fn bind_caches(
        &self,
        _storage: Arc<dyn StorageHandle>,
        _caches_directory: &Path,
    ) -> Result<(), String> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type BusHandler = Box<dyn Fn(serde_json::Value) + Send + Sync>;

struct MockBus {
    handlers: Mutex<HashMap<u64, (String, BusHandler)>>,
    next_token: AtomicU64,
    unsubscribes: AtomicUsize,
    log: TeardownLog,
}

impl MockBus {
    fn publish(&self, event: &str, payload: serde_json::Value) {
        let handlers = self.handlers.lock().unwrap();
        for (registered_event, handler) in handlers.values() {
            if registered_event == event {
                handler(payload.clone());
            }
        }
    }
}

impl NotificationBus for MockBus {
    fn subscribe(&self, event: &str, handler: BusHandler) -> SubscriptionToken {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.handlers
            .lock()
            .unwrap()
            .insert(token, (event.to_string(), handler));
        SubscriptionToken(token)
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> Result<(), String> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push("observer");
        self.handlers
            .lock()
            .unwrap()
            .remove(&token.0)
            .map(|_| ())
            .ok_or_else(|| "unknown subscription token".to_string())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _dir: TempDir,
    config: SessionConfig,
    providers: Providers,
    storage_handle: Arc<MockStorageHandle>,
    storage: Arc<MockStorageProvider>,
    reachability: Arc<MockReachability>,
    transport: Arc<MockTransport>,
    transport_provider: Arc<MockTransportProvider>,
    strategy_set: Arc<MockStrategySet>,
    bus: Arc<MockBus>,
    teardown_log: TeardownLog,
}

struct HarnessOptions {
    needs_migration: bool,
    cookie_present: bool,
    client_id: Option<String>,
    reachability_fails: bool,
    reachability_open_fails: bool,
    transport_open_fails: bool,
    strategies_fail: bool,
    bootstrap_delay: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            needs_migration: false,
            cookie_present: true,
            client_id: Some("client-7f".to_string()),
            reachability_fails: false,
            reachability_open_fails: false,
            transport_open_fails: false,
            strategies_fail: false,
            bootstrap_delay: Duration::from_millis(10),
        }
    }
}

fn harness(options: HarnessOptions) -> Harness {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let log: TeardownLog = Arc::new(Mutex::new(Vec::new()));

    let storage_handle = Arc::new(MockStorageHandle {
        client_id: options.client_id,
        saves: Mutex::new(Vec::new()),
        releases: AtomicUsize::new(0),
        log: Arc::clone(&log),
    });
    let storage = Arc::new(MockStorageProvider {
        needs_migration: options.needs_migration,
        delay: options.bootstrap_delay,
        create_calls: AtomicUsize::new(0),
        handle: Arc::clone(&storage_handle),
    });
    let reachability = Arc::new(MockReachability {
        teardowns: AtomicUsize::new(0),
        fail: options.reachability_fails,
        log: Arc::clone(&log),
    });
    let transport = Arc::new(MockTransport {
        cookie: AtomicBool::new(options.cookie_present),
        teardowns: AtomicUsize::new(0),
        log: Arc::clone(&log),
    });
    let transport_provider = Arc::new(MockTransportProvider {
        reachability: Arc::clone(&reachability),
        transport: Arc::clone(&transport),
        reachability_opens: AtomicUsize::new(0),
        opens: AtomicUsize::new(0),
        fail_reachability_open: options.reachability_open_fails,
        fail_open: options.transport_open_fails,
    });
    let strategy_set = Arc::new(MockStrategySet {
        teardowns: AtomicUsize::new(0),
        log: Arc::clone(&log),
    });
    let strategies = Arc::new(MockStrategyProvider {
        builds: AtomicUsize::new(0),
        fail: options.strategies_fail,
        set: Arc::clone(&strategy_set),
    });
    let bus = Arc::new(MockBus {
        handlers: Mutex::new(HashMap::new()),
        next_token: AtomicU64::new(1),
        unsubscribes: AtomicUsize::new(0),
        log: Arc::clone(&log),
    });

    let providers = Providers {
        storage: Arc::clone(&storage) as Arc<dyn StorageProvider>,
        transport: Arc::clone(&transport_provider) as Arc<dyn TransportProvider>,
        strategies: strategies as Arc<dyn StrategyProvider>,
        caches: Arc::new(MockCaches {
            binds: AtomicUsize::new(0),
        }) as Arc<dyn CacheBinder>,
        bus: Arc::clone(&bus) as Arc<dyn NotificationBus>,
        guard: Arc::new(ProcessGuard::new()),
    };

    let config = SessionConfig::new(
        Uuid::new_v4(),
        dir.path(),
        "https://backend.example.com",
        "wss://backend-ws.example.com/await",
    )
    .with_poll_interval(Duration::from_millis(2));

    Harness {
        _dir: dir,
        config,
        providers,
        storage_handle,
        storage,
        reachability,
        transport,
        transport_provider,
        strategy_set,
        bus,
        teardown_log: log,
    }
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

#[test]
fn test_initialize_succeeds_and_session_can_share() {
    let h = harness(HarnessOptions::default());
    let session = initialize(h.config.clone(), h.providers.clone()).unwrap();

    assert!(session.can_share());
    assert_eq!(
        session.synchronization_state(),
        SynchronizationState::EventProcessing
    );
    assert!(h.providers.guard.is_held());
    assert_eq!(h.storage.create_calls.load(Ordering::SeqCst), 1);

    session.dispose().unwrap();
}

#[test]
fn test_client_not_ready_gates_sharing_not_construction() {
    let h = harness(HarnessOptions {
        client_id: None,
        ..HarnessOptions::default()
    });
    let session = initialize(h.config.clone(), h.providers.clone()).unwrap();

    assert!(!session.can_share());
    assert_eq!(
        session.synchronization_state(),
        SynchronizationState::Unauthenticated
    );

    session.dispose().unwrap();
}

#[test]
fn test_needs_migration_never_starts_the_producer() {
    let h = harness(HarnessOptions {
        needs_migration: true,
        ..HarnessOptions::default()
    });
    let err = initialize(h.config.clone(), h.providers.clone()).unwrap_err();

    assert!(matches!(err, InitializationError::NeedsMigration));
    assert_eq!(h.storage.create_calls.load(Ordering::SeqCst), 0);
    assert!(!h.providers.guard.is_held());
}

#[test]
fn test_logged_out_unwinds_everything_and_leaves_guard_unset() {
    let h = harness(HarnessOptions {
        cookie_present: false,
        ..HarnessOptions::default()
    });
    let err = initialize(h.config.clone(), h.providers.clone()).unwrap_err();

    assert!(matches!(err, InitializationError::LoggedOut));
    assert!(!h.providers.guard.is_held());
    assert_eq!(h.reachability.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.storage_handle.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn test_missing_shared_container_fails_before_bootstrap() {
    let h = harness(HarnessOptions::default());
    let mut config = h.config.clone();
    config.shared_container = "/definitely/not/present".into();

    let err = initialize(config, h.providers.clone()).unwrap_err();
    assert!(matches!(
        err,
        InitializationError::MissingSharedContainer(_)
    ));
    assert_eq!(h.storage.create_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_second_initialize_is_duplicate_session() {
    let h = harness(HarnessOptions::default());
    let session = initialize(h.config.clone(), h.providers.clone()).unwrap();

    let err = initialize(h.config.clone(), h.providers.clone()).unwrap_err();
    assert!(matches!(err, InitializationError::DuplicateSession));

    // The first session is unaffected and the guard stays held by it.
    assert!(h.providers.guard.is_held());
    assert!(session.can_share());
    session.dispose().unwrap();
    assert!(!h.providers.guard.is_held());

    // With the guard free again a fresh attempt succeeds.
    let session = initialize(h.config.clone(), h.providers.clone()).unwrap();
    session.dispose().unwrap();
}

#[test]
fn test_bootstrap_timeout_is_reported() {
    struct NeverCompletes;
    impl StorageProvider for NeverCompletes {
        fn needs_migration(&self, _account_id: Uuid, _container: &Path) -> bool {
            false
        }
        fn create_handle(
            &self,
            _account_id: Uuid,
            _container: &Path,
            _on_started: Box<dyn FnOnce() + Send>,
            _on_complete: Box<dyn FnOnce(Arc<dyn StorageHandle>) + Send>,
        ) {
        }
    }

    let h = harness(HarnessOptions::default());
    let mut providers = h.providers.clone();
    providers.storage = Arc::new(NeverCompletes);
    let config = h.config.clone().with_bootstrap_timeout(Duration::from_millis(25));

    let err = initialize(config, providers).unwrap_err();
    assert!(matches!(err, InitializationError::BootstrapTimeout(_)));
    assert!(!h.providers.guard.is_held());
}

#[test]
fn test_failed_reachability_open_releases_storage() {
    let h = harness(HarnessOptions {
        reachability_open_fails: true,
        ..HarnessOptions::default()
    });
    let err = initialize(h.config.clone(), h.providers.clone()).unwrap_err();

    assert!(matches!(
        err,
        InitializationError::CollaboratorFailed {
            collaborator: "reachability",
            ..
        }
    ));
    // Storage was the only resource acquired; nothing else was opened.
    assert_eq!(h.storage_handle.releases.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport_provider.opens.load(Ordering::SeqCst), 0);
    assert!(!h.providers.guard.is_held());
}

#[test]
fn test_failed_transport_open_unwinds_reachability_and_storage() {
    let h = harness(HarnessOptions {
        transport_open_fails: true,
        ..HarnessOptions::default()
    });
    let err = initialize(h.config.clone(), h.providers.clone()).unwrap_err();

    assert!(matches!(
        err,
        InitializationError::CollaboratorFailed {
            collaborator: "transport",
            ..
        }
    ));
    assert_eq!(h.reachability.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.storage_handle.releases.load(Ordering::SeqCst), 1);
    assert!(!h.providers.guard.is_held());
}

#[test]
fn test_failed_strategy_build_unwinds_in_reverse_order() {
    let h = harness(HarnessOptions {
        strategies_fail: true,
        ..HarnessOptions::default()
    });
    let err = initialize(h.config.clone(), h.providers.clone()).unwrap_err();

    assert!(matches!(
        err,
        InitializationError::CollaboratorFailed {
            collaborator: "strategy provider",
            ..
        }
    ));
    // No partial session: everything opened so far is unwound, newest first.
    assert_eq!(
        *h.teardown_log.lock().unwrap(),
        vec!["reachability", "transport", "storage"]
    );
    assert!(!h.providers.guard.is_held());
}

// ---------------------------------------------------------------------------
// Enqueue + save notifications
// ---------------------------------------------------------------------------

#[test]
fn test_enqueue_runs_work_saves_context_then_completes() {
    let h = harness(HarnessOptions::default());
    let session = initialize(h.config.clone(), h.providers.clone()).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let o = Arc::clone(&order);
    let c = Arc::clone(&order);
    session.enqueue_with_completion(
        move || o.lock().unwrap().push("work"),
        Some(Box::new(move || c.lock().unwrap().push("complete"))),
    );
    let o = Arc::clone(&order);
    session.enqueue(move || o.lock().unwrap().push("second"));

    // dispose() drains the queues before tearing down.
    session.dispose().unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["work", "complete", "second"]);
    assert_eq!(
        *h.storage_handle.saves.lock().unwrap(),
        vec![ContextKind::Foreground, ContextKind::Foreground]
    );
}

#[test]
fn test_sync_work_saves_the_background_context() {
    let h = harness(HarnessOptions::default());
    let session = initialize(h.config.clone(), h.providers.clone()).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    session.enqueue_sync_work(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    session.dispose().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(
        *h.storage_handle.saves.lock().unwrap(),
        vec![ContextKind::Background]
    );
}

#[test]
fn test_context_merge_notifications_are_persisted_until_unsubscribed() {
    let h = harness(HarnessOptions::default());
    let session = initialize(h.config.clone(), h.providers.clone()).unwrap();

    h.bus.publish(CONTEXT_MERGED_EVENT, json!({"changed": ["c-1"]}));
    h.bus.publish("unrelated-event", json!({"ignored": true}));

    let records = session.save_notifications().records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload["changed"][0], "c-1");

    let persistence = Arc::clone(session.save_notifications());
    session.dispose().unwrap();

    // Observer is gone after dispose: publishing appends nothing.
    h.bus.publish(CONTEXT_MERGED_EVENT, json!({"changed": ["c-2"]}));
    assert_eq!(persistence.records().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

#[test]
fn test_dispose_twice_tears_down_exactly_once() {
    let h = harness(HarnessOptions::default());
    let session = initialize(h.config.clone(), h.providers.clone()).unwrap();

    session.dispose().unwrap();
    assert!(session.is_disposed());
    session.dispose().unwrap();

    assert_eq!(h.bus.unsubscribes.load(Ordering::SeqCst), 1);
    assert_eq!(h.strategy_set.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.reachability.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.storage_handle.releases.load(Ordering::SeqCst), 1);
    assert!(!h.providers.guard.is_held());
}

#[test]
fn test_teardown_runs_in_reverse_acquisition_order() {
    let h = harness(HarnessOptions::default());
    let session = initialize(h.config.clone(), h.providers.clone()).unwrap();

    session.dispose().unwrap();
    assert_eq!(
        *h.teardown_log.lock().unwrap(),
        vec!["observer", "strategies", "reachability", "transport", "storage"]
    );
}

#[test]
fn test_failing_reachability_teardown_still_releases_everything() {
    let h = harness(HarnessOptions {
        reachability_fails: true,
        ..HarnessOptions::default()
    });
    let session = initialize(h.config.clone(), h.providers.clone()).unwrap();

    let err = session.dispose().unwrap_err();
    assert!(err.failed_step("reachability"));
    assert_eq!(err.failures.len(), 1);

    // Later steps still ran and the guard is clear.
    assert_eq!(h.transport.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.storage_handle.releases.load(Ordering::SeqCst), 1);
    assert!(!h.providers.guard.is_held());

    // A second dispose stays a no-op even after a partial failure.
    session.dispose().unwrap();
    assert_eq!(h.transport.teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dropping_an_undisposed_session_tears_down() {
    let h = harness(HarnessOptions::default());
    {
        let _session = initialize(h.config.clone(), h.providers.clone()).unwrap();
    }
    assert_eq!(h.transport.teardowns.load(Ordering::SeqCst), 1);
    assert!(!h.providers.guard.is_held());
}
