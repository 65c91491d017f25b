//! Client Registry
//!
//! The set of connection handlers that are currently live. A handler is
//! added when it starts serving and removed by its own cleanup path; the
//! control path uses the registry to cancel every client at once.
//!
//! ## Invariants
//!
//! - A handler is visible here from registration until its cleanup runs.
//! - [`ClientRegistry::cancel_all`] only cancels. Removal stays with the
//!   handler, so a sweep never races a handler's own exit.
//! - Once [`ClientRegistry::close`] is called no new client can register,
//!   which is what lets a shutdown drain reach zero.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifier assigned to a client at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct ClientEntry {
    addr: SocketAddr,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct RegistryInner {
    clients: HashMap<ClientId, ClientEntry>,
    next_id: u64,
    closed: bool,
}

/// Thread-safe collection of live clients.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    inner: Mutex<RegistryInner>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new client and hands back its id and cancellation token.
    ///
    /// Returns `None` once the registry has been closed.
    pub fn register(&self, addr: SocketAddr) -> Option<(ClientId, CancellationToken)> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }

        let id = ClientId(inner.next_id);
        inner.next_id += 1;

        let cancel = CancellationToken::new();
        inner.clients.insert(
            id,
            ClientEntry {
                addr,
                cancel: cancel.clone(),
            },
        );

        Some((id, cancel))
    }

    /// Removes a client. Returns `false` if it was not registered.
    pub fn deregister(&self, id: ClientId) -> bool {
        self.lock().clients.remove(&id).is_some()
    }

    /// Requests cancellation of every registered client without removing any.
    ///
    /// Returns the number of clients swept.
    pub fn cancel_all(&self) -> usize {
        let inner = self.lock();
        for (id, entry) in &inner.clients {
            debug!(client = %entry.addr, id = %id, "Cancelling client");
            entry.cancel.cancel();
        }
        inner.clients.len()
    }

    /// Refuses all future registrations.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Returns the number of registered clients.
    pub fn len(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
