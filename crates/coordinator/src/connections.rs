//! Directory of connected clients and the proxies used to reach them

use std::sync::Arc;

use client_proxy::ClientProxyHandle;
use dashmap::DashMap;
use fed_core::{
    ClientId, ClientRecord, ClientRegistry, ClientRegistryHandle, Properties, Result,
};
use tracing::debug;

/// Pairs the client registry with one proxy per registered client
///
/// The registry decides who is available for sampling; the proxy map is
/// only consulted at dispatch time.
pub struct ClientConnections {
    registry: ClientRegistryHandle,
    proxies: DashMap<ClientId, ClientProxyHandle>,
}

impl ClientConnections {
    pub fn new(max_clients: usize) -> Self {
        Self::with_registry(Arc::new(ClientRegistry::new(max_clients)))
    }

    pub fn with_registry(registry: ClientRegistryHandle) -> Self {
        Self {
            registry,
            proxies: DashMap::new(),
        }
    }

    /// Register a client and keep its proxy for dispatch
    ///
    /// Reconnecting a disconnected client replaces its proxy.
    pub fn connect(
        &self,
        proxy: ClientProxyHandle,
        properties: Properties,
    ) -> Result<ClientRecord> {
        let id = proxy.id().clone();
        let record = self.registry.register(id.clone(), properties)?;
        self.proxies.insert(id, proxy);
        Ok(record)
    }

    /// Forget a client entirely
    pub fn disconnect(&self, id: &ClientId) -> Result<ClientRecord> {
        self.proxies.remove(id);
        let record = self.registry.unregister(id)?;
        debug!(client_id = %id, "Client connection removed");
        Ok(record)
    }

    /// Keep the client's record but stop sampling it
    ///
    /// The proxy is dropped; a reconnect brings a new one.
    pub fn mark_disconnected(&self, id: &ClientId) -> Result<()> {
        self.registry.mark_disconnected(id)?;
        self.proxies.remove(id);
        Ok(())
    }

    /// Proxy for a client that is still connected
    pub fn proxy(&self, id: &ClientId) -> Option<ClientProxyHandle> {
        if !self.registry.get(id)?.is_connected() {
            return None;
        }
        self.proxies.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn registry(&self) -> &ClientRegistryHandle {
        &self.registry
    }

    pub fn num_available(&self) -> usize {
        self.registry.num_available()
    }
}

impl Default for ClientConnections {
    fn default() -> Self {
        Self::with_registry(Arc::new(ClientRegistry::default()))
    }
}

/// Thread-safe handle to the client directory
pub type ClientConnectionsHandle = Arc<ClientConnections>;
