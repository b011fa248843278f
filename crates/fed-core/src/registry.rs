//! Client registry: which clients are reachable and what they declared

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::types::{ClientId, Properties};
use crate::{Error, Result};

/// Reachability of a registered client
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    Disconnected,
}

/// Registry entry for one client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Client identifier
    pub id: ClientId,

    /// Current reachability
    pub state: ClientState,

    /// Properties declared on connect (e.g. sample count)
    pub properties: Properties,

    /// When the current connection was registered
    pub registered_at: DateTime<Utc>,

    /// Last connect or successful exchange
    pub last_seen: DateTime<Utc>,
}

impl ClientRecord {
    pub fn new(id: ClientId, properties: Properties) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: ClientState::Connected,
            properties,
            registered_at: now,
            last_seen: now,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }
}

/// Thread-safe client registry
///
/// Writers are serialized through one lock; readers copy a point-in-time
/// snapshot, so a round's candidate set never changes while it is sampled.
pub struct ClientRegistry {
    /// Map of client ID to record
    clients: RwLock<HashMap<ClientId, ClientRecord>>,

    /// Maximum clients allowed
    max_clients: usize,

    /// Number of connected clients, published after every mutation
    available: watch::Sender<usize>,
}

impl ClientRegistry {
    /// Create a new client registry
    pub fn new(max_clients: usize) -> Self {
        let (available, _) = watch::channel(0);
        Self {
            clients: RwLock::new(HashMap::new()),
            max_clients,
            available,
        }
    }

    /// Register a client, or reconnect one that was marked disconnected
    ///
    /// Only connected clients count toward capacity. When the map is full,
    /// the disconnected record seen least recently makes room.
    pub fn register(&self, id: ClientId, properties: Properties) -> Result<ClientRecord> {
        let mut clients = self.clients.write();

        if let Some(existing) = clients.get(&id) {
            if existing.is_connected() {
                return Err(Error::ClientAlreadyRegistered { client_id: id });
            }
        } else if Self::count_connected(&clients) >= self.max_clients {
            return Err(Error::RegistryFull {
                capacity: self.max_clients,
            });
        } else if clients.len() >= self.max_clients {
            Self::evict_stale(&mut clients);
        }

        let record = ClientRecord::new(id.clone(), properties);
        clients.insert(id.clone(), record.clone());
        let connected = Self::count_connected(&clients);
        self.available.send_replace(connected);

        info!(client_id = %id, connected, "Client registered");
        Ok(record)
    }

    /// Remove a client from the registry
    pub fn unregister(&self, id: &ClientId) -> Result<ClientRecord> {
        let mut clients = self.clients.write();
        let record = clients.remove(id).ok_or_else(|| Error::ClientNotFound {
            client_id: id.clone(),
        })?;
        let connected = Self::count_connected(&clients);
        self.available.send_replace(connected);

        info!(client_id = %id, connected, "Client unregistered");
        Ok(record)
    }

    /// Keep the record but exclude the client from sampling
    pub fn mark_disconnected(&self, id: &ClientId) -> Result<()> {
        let mut clients = self.clients.write();
        let record = clients.get_mut(id).ok_or_else(|| Error::ClientNotFound {
            client_id: id.clone(),
        })?;

        if record.is_connected() {
            record.state = ClientState::Disconnected;
            let connected = Self::count_connected(&clients);
            self.available.send_replace(connected);
            warn!(client_id = %id, connected, "Client marked disconnected");
        }
        Ok(())
    }

    /// Record a successful exchange with a client
    pub fn touch(&self, id: &ClientId) {
        if let Some(record) = self.clients.write().get_mut(id) {
            record.last_seen = Utc::now();
        }
    }

    /// Get a client's record by ID
    pub fn get(&self, id: &ClientId) -> Option<ClientRecord> {
        self.clients.read().get(id).cloned()
    }

    /// IDs of all connected clients
    pub fn list_available(&self) -> BTreeSet<ClientId> {
        self.clients
            .read()
            .values()
            .filter(|record| record.is_connected())
            .map(|record| record.id.clone())
            .collect()
    }

    /// Records of all connected clients, ordered by ID
    pub fn snapshot(&self) -> Vec<ClientRecord> {
        let mut records: Vec<ClientRecord> = self
            .clients
            .read()
            .values()
            .filter(|record| record.is_connected())
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Number of connected clients
    pub fn num_available(&self) -> usize {
        *self.available.borrow()
    }

    /// Number of records, connected or not
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` clients are connected
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Result<usize> {
        let mut rx = self.available.subscribe();
        debug!(count, timeout_ms = timeout.as_millis() as u64, "Waiting for clients");

        let wait = async move {
            let connected = rx.wait_for(|&connected| connected >= count).await.map(|n| *n);
            connected
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(connected)) => Ok(connected),
            Ok(Err(_)) => Err(Error::Internal {
                message: "client availability channel closed".to_string(),
            }),
            Err(_) => Err(Error::Timeout {
                operation: format!("waiting for {} clients", count),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn evict_stale(clients: &mut HashMap<ClientId, ClientRecord>) {
        let stale = clients
            .values()
            .filter(|record| !record.is_connected())
            .min_by(|a, b| (a.last_seen, &a.id).cmp(&(b.last_seen, &b.id)))
            .map(|record| record.id.clone());

        if let Some(id) = stale {
            clients.remove(&id);
            debug!(client_id = %id, "Evicted disconnected client");
        }
    }

    fn count_connected(clients: &HashMap<ClientId, ClientRecord>) -> usize {
        clients.values().filter(|record| record.is_connected()).count()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(10000)
    }
}

/// Thread-safe handle to the client registry
pub type ClientRegistryHandle = Arc<ClientRegistry>;
