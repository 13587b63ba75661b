//! Live authentication and client-registration status
//!
//! Mirrors the status directory the sync strategies consult: the
//! authentication state is derived from cookie presence on the transport,
//! client readiness from the persisted client identifier in storage. Both
//! are polled live on every access; only the composition gate takes a
//! one-shot snapshot.

use std::sync::Arc;

use crate::providers::{ClientRegistrationProvider, StorageHandle, TransportHandle};

/// Whether a user is logged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationState {
    Unauthenticated,
    Authenticated,
}

/// Coarse synchronization readiness exposed to extension UI code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchronizationState {
    /// No registered client; requests cannot be generated yet.
    Unauthenticated,
    /// Client registered; events can be processed.
    EventProcessing,
}

/// Source of the live authentication state.
pub trait AuthenticationStatusProvider: Send + Sync {
    fn state(&self) -> AuthenticationState;
}

/// Authentication status backed by transport cookie presence.
pub struct AuthenticationStatus {
    transport: Arc<dyn TransportHandle>,
}

impl AuthenticationStatus {
    pub fn new(transport: Arc<dyn TransportHandle>) -> Self {
        Self { transport }
    }
}

impl AuthenticationStatusProvider for AuthenticationStatus {
    fn state(&self) -> AuthenticationState {
        if self.transport.cookie_present() {
            AuthenticationState::Authenticated
        } else {
            AuthenticationState::Unauthenticated
        }
    }
}

/// Client registration status backed by the persisted client identifier.
pub struct ClientRegistrationStatus {
    storage: Arc<dyn StorageHandle>,
}

impl ClientRegistrationStatus {
    pub fn new(storage: Arc<dyn StorageHandle>) -> Self {
        Self { storage }
    }
}

impl ClientRegistrationProvider for ClientRegistrationStatus {
    fn is_client_ready(&self) -> bool {
        self.storage
            .persisted_client_id()
            .map(|id| !id.is_empty())
            .unwrap_or(false)
    }
}

/// Directory of the statuses the strategies and the session facade consult.
pub struct StatusDirectory {
    authentication: Arc<dyn AuthenticationStatusProvider>,
    client_registration: Arc<dyn ClientRegistrationProvider>,
}

impl StatusDirectory {
    /// Wire up the concrete statuses over the live transport and storage.
    pub fn new(transport: Arc<dyn TransportHandle>, storage: Arc<dyn StorageHandle>) -> Self {
        Self {
            authentication: Arc::new(AuthenticationStatus::new(transport)),
            client_registration: Arc::new(ClientRegistrationStatus::new(storage)),
        }
    }

    /// Inject custom status providers.
    pub fn with_providers(
        authentication: Arc<dyn AuthenticationStatusProvider>,
        client_registration: Arc<dyn ClientRegistrationProvider>,
    ) -> Self {
        Self {
            authentication,
            client_registration,
        }
    }

    pub fn authentication_state(&self) -> AuthenticationState {
        self.authentication.state()
    }

    pub fn is_client_ready(&self) -> bool {
        self.client_registration.is_client_ready()
    }

    /// Whether all prerequisites for sharing are met: logged in AND a
    /// registered device client. Client readiness gates sharing, not
    /// session construction.
    pub fn can_share(&self) -> bool {
        self.authentication_state() == AuthenticationState::Authenticated
            && self.is_client_ready()
    }

    pub fn synchronization_state(&self) -> SynchronizationState {
        if self.is_client_ready() {
            SynchronizationState::EventProcessing
        } else {
            SynchronizationState::Unauthenticated
        }
    }
}
