//! Server Module
//!
//! [`ServerContext`] is the process-scoped service object. It owns everything
//! the connection handlers and the control path share:
//!
//! - the tree store
//! - the client registry
//! - the pause gate and the shutdown coordinator
//! - connection statistics
//! - the token that stops the listener
//!
//! One context is created at startup and torn down with
//! [`ServerContext::shutdown`]. Tests build their own, so nothing here is global.

pub mod listener;

pub use listener::{bind, spawn_listener};

use crate::connection::{ClientRegistry, ConnectionStats};
use crate::lifecycle::{PauseGate, ShutdownCoordinator};
use crate::storage::TreeStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared state for one running server.
#[derive(Debug, Default)]
pub struct ServerContext {
    store: Arc<TreeStore>,
    registry: Arc<ClientRegistry>,
    gate: PauseGate,
    coordinator: ShutdownCoordinator,
    stats: Arc<ConnectionStats>,
    listener_stop: CancellationToken,
}

impl ServerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &Arc<TreeStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &PauseGate {
        &self.gate
    }

    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    pub fn listener_stop(&self) -> &CancellationToken {
        &self.listener_stop
    }

    /// Tears the server down.
    ///
    /// Order matters: the registry is closed first so no handler can start
    /// while draining, then every live handler is cancelled and awaited. Only
    /// after the live count reaches zero is the store cleared and the listener
    /// stopped. Calling this again is harmless.
    pub async fn shutdown(&self) {
        info!("Shutting down");

        self.registry.close();
        let cancelled = self.registry.cancel_all();
        info!(cancelled, "Cancelled live clients, draining");

        // A paused handler is cancelled at its gate wait, so no release needed
        self.coordinator.drain().await;

        let store = self.store.stats();
        self.store.clear();
        self.listener_stop.cancel();

        info!(
            keys_dropped = store.keys,
            queries = store.queries,
            inserts = store.inserts,
            deletes = store.deletes,
            connections = self.stats.connections_accepted.load(Ordering::Relaxed),
            commands = self.stats.commands_processed.load(Ordering::Relaxed),
            bytes_read = self.stats.bytes_read.load(Ordering::Relaxed),
            bytes_written = self.stats.bytes_written.load(Ordering::Relaxed),
            "Shutdown complete"
        );
    }
}
