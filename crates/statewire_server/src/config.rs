//! Server configuration.

use statewire_engine::RegistryConfig;
use std::net::SocketAddr;

/// Configuration for the live server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Path of the WebSocket endpoint.
    pub ws_path: String,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_bytes: usize,
    /// Outbound messages buffered per connection before the reader waits.
    pub outbound_buffer: usize,
    /// Session registry settings.
    pub registry: RegistryConfig,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ws_path: "/ws".to_string(),
            max_message_bytes: 64 * 1024,
            outbound_buffer: 100,
            registry: RegistryConfig::default(),
        }
    }

    /// Sets the WebSocket path.
    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Sets the inbound frame limit.
    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    /// Sets the per-connection outbound buffer.
    pub fn with_outbound_buffer(mut self, size: usize) -> Self {
        self.outbound_buffer = size.max(1);
        self
    }

    /// Sets the registry configuration.
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
