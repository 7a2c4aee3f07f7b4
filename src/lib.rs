//! ChatHub backend: secret-aware connection configuration core.
//!
//! Stores, masks and synchronizes credentials for pluggable upstream
//! model providers, enforces a base-URL allow-list, and degrades to
//! memory-only secrets when no encryption key is configured.

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod connections;
pub mod errors;
pub mod probe;
pub mod secrets;
pub mod store;

/// Shared application state passed to handlers.
pub struct AppState {
    pub service: connections::service::ConnectionConfigService,
    pub config: config::Config,
}
