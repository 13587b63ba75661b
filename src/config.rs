//! Session configuration
//!
//! Plain configuration struct with builder-style overrides and a
//! `validate()` gate. The shared container is the application-group
//! directory both the main app and the extension can see; the per-account
//! folder and the caches folder are derived from it.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::error::InitializationError;

/// Default bounded wait per poll cycle while blocking on the bootstrap.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Configuration for a share-extension session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Account the session is opened for.
    pub account_id: Uuid,
    /// Shared application-group container directory.
    pub shared_container: PathBuf,
    /// Backend HTTPS base URL.
    pub base_url: String,
    /// Backend WebSocket URL.
    pub websocket_url: String,
    /// Bounded wait per poll cycle during the blocking bootstrap wait.
    pub poll_interval: Duration,
    /// Optional overall bootstrap deadline. `None` waits forever, matching
    /// the narrow bootstrap window this models.
    pub bootstrap_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(
        account_id: Uuid,
        shared_container: impl Into<PathBuf>,
        base_url: impl Into<String>,
        websocket_url: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            shared_container: shared_container.into(),
            base_url: base_url.into(),
            websocket_url: websocket_url.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            bootstrap_timeout: None,
        }
    }

    /// Override the poll interval used while blocking on the bootstrap.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set an overall bootstrap deadline. An unfulfilled bootstrap then
    /// fails with [`InitializationError::BootstrapTimeout`] instead of
    /// hanging forever.
    pub fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = Some(timeout);
        self
    }

    /// Per-account folder inside the shared container.
    pub fn account_container(&self) -> PathBuf {
        self.shared_container
            .join("accounts")
            .join(self.account_id.to_string())
    }

    /// Caches folder for this account inside the shared container.
    pub fn caches_directory(&self) -> PathBuf {
        self.shared_container
            .join("caches")
            .join(self.account_id.to_string())
    }

    /// Hosts to monitor for reachability, extracted from the backend URLs.
    pub fn server_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(2);
        for url in [&self.base_url, &self.websocket_url] {
            if let Some(host) = host_of(url) {
                if !names.contains(&host) {
                    names.push(host);
                }
            }
        }
        names
    }

    /// Validate the configuration. The shared container must already exist;
    /// it is provisioned by the main application, never by the extension.
    pub fn validate(&self) -> Result<(), InitializationError> {
        if !self.shared_container.is_dir() {
            return Err(InitializationError::MissingSharedContainer(
                self.shared_container.display().to_string(),
            ));
        }
        Ok(())
    }
}

/// Extract the host portion of a URL (`wss://host:443/path` -> `host`).
fn host_of(url: &str) -> Option<String> {
    let after_scheme = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    let host = after_scheme
        .split('/')
        .next()?
        .split(':')
        .next()?
        .trim();
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
