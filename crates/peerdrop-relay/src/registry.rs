//! Identity registry
//!
//! Maps each connected client's session id to the outbound queue of its
//! connection. Shared by every connection task; each key is independent so
//! the map only needs per-entry atomicity.

use crate::{RelayError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use peerdrop_core::SessionId;
use tokio::sync::mpsc;

/// Outbound queue of one relay connection, drained by its writer task
pub type ClientHandle = mpsc::Sender<String>;

type IdGenerator = Box<dyn Fn() -> peerdrop_core::Result<SessionId> + Send + Sync>;

/// Attempts at finding an unused id before giving up
const MAX_ID_ATTEMPTS: usize = 64;

pub struct Registry {
    clients: DashMap<SessionId, ClientHandle>,
    generate_id: IdGenerator,
}

impl Registry {
    /// Create a registry issuing random ids of `id_length` characters
    pub fn new(id_length: usize) -> Self {
        Self::with_generator(move || SessionId::generate(id_length))
    }

    /// Create a registry with a custom id source
    pub fn with_generator<F>(generate_id: F) -> Self
    where
        F: Fn() -> peerdrop_core::Result<SessionId> + Send + Sync + 'static,
    {
        Self {
            clients: DashMap::new(),
            generate_id: Box::new(generate_id),
        }
    }

    /// Register a connection under a fresh id
    ///
    /// The id is checked and inserted in one step, so two concurrent
    /// registrations can never end up with the same id.
    pub fn register(&self, handle: ClientHandle) -> Result<SessionId> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = (self.generate_id)()?;
            match self.clients.entry(id) {
                Entry::Vacant(entry) => {
                    let id = entry.key().clone();
                    entry.insert(handle);
                    return Ok(id);
                }
                Entry::Occupied(entry) => {
                    tracing::debug!("Session id {} already taken, regenerating", entry.key());
                }
            }
        }
        Err(RelayError::IdsExhausted(MAX_ID_ATTEMPTS))
    }

    /// Get the outbound queue of a connected client
    pub fn lookup(&self, id: &SessionId) -> Option<ClientHandle> {
        self.clients.get(id).map(|handle| handle.value().clone())
    }

    /// Forget a client; returns whether it was registered
    pub fn remove(&self, id: &SessionId) -> bool {
        self.clients.remove(id).is_some()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.clients.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
