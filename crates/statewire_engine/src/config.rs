//! Configuration for the context registry.

use std::time::Duration;

/// Configuration for session lifetime and eviction.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Age after which a session is unreachable and reclaimed.
    pub ttl: Duration,
    /// How often the background sweep runs.
    pub sweep_interval: Duration,
    /// Prefix for generated session ids.
    pub session_id_prefix: String,
}

impl RegistryConfig {
    /// Creates a configuration with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sweep_interval: Duration::from_secs(60),
            session_id_prefix: "ctx_".to_string(),
        }
    }

    /// Sets the session TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the prefix for generated session ids.
    pub fn with_session_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.session_id_prefix = prefix.into();
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(5 * 60))
    }
}
