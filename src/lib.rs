//! share-session - Bootstrap and lifecycle coordinator for share-extension sessions
//!
//! A share extension runs in a short-lived helper process next to the main
//! messaging application. Before it can enqueue any content it must bring up
//! the durable storage stack (asynchronously), verify that a user is logged
//! in, and wire the sync strategies to the network transport. This crate
//! owns that bootstrap window and the matching teardown:
//!
//! - **Bootstrap**: drive the one-time asynchronous storage initialization
//!   to completion, blocking the calling thread until the handle is ready
//! - **Composition**: validate authentication and assemble a [`Session`]
//!   from the external collaborators, at most one per process
//! - **Lifecycle**: deterministic reverse-order teardown with per-step
//!   failure isolation
//!
//! The storage engine, network transport, request strategies and caches are
//! external collaborators consumed through the traits in [`providers`]; this
//! crate never reimplements them.

pub mod bootstrap;
pub mod compose;
pub mod config;
pub mod error;
pub mod future;
pub mod guard;
pub mod lifecycle;
pub mod persistence;
pub mod providers;
pub mod queue;
pub mod session;
pub mod status;

pub use config::SessionConfig;
pub use error::{InitializationError, Result, TeardownError};
pub use guard::ProcessGuard;
pub use providers::Providers;
pub use session::{initialize, Session};
pub use status::{AuthenticationState, SynchronizationState};
