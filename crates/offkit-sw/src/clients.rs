//! Connected client contexts.
//!
//! Each open client holds the receiving half of an unbounded channel; the
//! engine broadcasts [`ClientMessage`]s through the registry. A client
//! whose receiver is gone simply stops counting as delivered.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use offkit_cache::WorkerVersion;

use crate::message::ClientMessage;

/// Unique identifier for a client context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A connected client context.
#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    /// Worker version controlling this client, once claimed.
    pub controlled_by: Option<WorkerVersion>,
    sender: mpsc::UnboundedSender<ClientMessage>,
}

impl Client {
    /// Deliver a message to this client. Returns whether the client was
    /// still listening.
    pub fn post_message(&self, message: ClientMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// Registry of every open client context.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, Client>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client; the returned receiver observes broadcasts.
    pub fn connect(&mut self, url: Url) -> (ClientId, mpsc::UnboundedReceiver<ClientMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ClientId::new();
        debug!(client = %id, url = %url, "client connected");
        self.clients.insert(
            id,
            Client {
                id,
                url,
                controlled_by: None,
                sender,
            },
        );
        (id, receiver)
    }

    /// Remove a client. Returns whether it was present.
    pub fn disconnect(&mut self, id: ClientId) -> bool {
        self.clients.remove(&id).is_some()
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Deliver a message to every open client. Returns how many received
    /// it.
    pub fn broadcast(&self, message: &ClientMessage) -> usize {
        self.clients
            .values()
            .filter(|client| client.post_message(message.clone()))
            .count()
    }

    /// Claim every client for a worker version. Returns how many were
    /// claimed.
    pub fn claim(&mut self, version: &WorkerVersion) -> usize {
        for client in self.clients.values_mut() {
            client.controlled_by = Some(version.clone());
        }
        self.clients.len()
    }
}
