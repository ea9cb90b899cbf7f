//! Process-wide directory of session contexts.

use crate::clock::{Clock, SystemClock};
use crate::config::RegistryConfig;
use crate::context::{ContextGuard, SessionContext};
use crate::error::{EngineError, EngineResult};
use dashmap::DashMap;
use statewire_protocol::SessionId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// Counters describing registry activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Contexts created.
    pub created: u64,
    /// Contexts evicted for exceeding the TTL.
    pub evicted: u64,
    /// Contexts removed explicitly.
    pub removed: u64,
    /// Sweeps run.
    pub sweeps: u64,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    evicted: AtomicU64,
    removed: AtomicU64,
    sweeps: AtomicU64,
}

/// Directory of [`SessionContext`]s by session id.
///
/// The map is sharded and safe to use from any number of connection threads.
/// A context older than the configured TTL is unreachable by id from the
/// moment it expires, whether or not a sweep has reclaimed it yet.
///
/// # Example
///
/// ```
/// use statewire_engine::{ContextRegistry, RegistryConfig};
///
/// let registry = ContextRegistry::new(RegistryConfig::default());
/// let session_id = {
///     let mut ctx = registry.create();
///     ctx.create_named_cell("count", 0).unwrap();
///     ctx.session_id().clone()
/// };
///
/// // A later message, possibly on another thread.
/// let ctx = registry.bind(&session_id).unwrap();
/// assert_eq!(ctx.get("count"), Some(&serde_json::json!(0)));
/// ```
pub struct ContextRegistry {
    config: RegistryConfig,
    contexts: DashMap<SessionId, Arc<SessionContext>>,
    cell_ids: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl ContextRegistry {
    /// Creates a registry using the system clock.
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a registry with a custom clock.
    pub fn with_clock(config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            contexts: DashMap::new(),
            cell_ids: Arc::new(AtomicU64::new(1)),
            clock,
            counters: Counters::default(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Returns the session TTL.
    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Creates a context with a fresh session id and returns it bound.
    pub fn create(&self) -> ContextGuard {
        loop {
            let id = SessionId::new(format!(
                "{}{}",
                self.config.session_id_prefix,
                Uuid::new_v4().simple()
            ));
            if let Ok(guard) = self.create_with_id(id) {
                return guard;
            }
        }
    }

    /// Creates a context under a caller-chosen session id and returns it bound.
    pub fn create_with_id(&self, id: impl Into<SessionId>) -> EngineResult<ContextGuard> {
        let id = id.into();
        let context = match self.contexts.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(EngineError::DuplicateSession(id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let context = Arc::new(SessionContext::with_id_source(
                    id,
                    self.clock.now(),
                    Arc::clone(&self.cell_ids),
                ));
                slot.insert(Arc::clone(&context));
                context
            }
        };

        self.counters.created.fetch_add(1, Ordering::Relaxed);
        debug!(session_id = %context.id(), "context created");
        context.bind()
    }

    /// Looks up a live context.
    ///
    /// Returns `None` if the id is unknown or the context has outlived the
    /// TTL. An expired context found here is evicted on the spot.
    pub fn get_by_id(&self, id: impl AsRef<str>) -> Option<Arc<SessionContext>> {
        let id = id.as_ref();
        let context = self.contexts.get(id).map(|entry| Arc::clone(entry.value()))?;
        let now = self.clock.now();
        if context.is_expired_at(now, self.config.ttl) {
            debug!(session_id = %id, "lookup of expired context");
            self.evict(id, now);
            return None;
        }
        Some(context)
    }

    /// Looks up a live context and binds it.
    ///
    /// A context evicted between the lookup and the binding is reported as
    /// expired, never handed out empty.
    pub fn bind(&self, id: impl AsRef<str>) -> EngineResult<ContextGuard> {
        let id = id.as_ref();
        self.get_by_id(id)
            .ok_or_else(|| EngineError::ContextExpired(id.into()))?
            .bind()
    }

    /// Returns true if a live context with this id exists.
    pub fn contains(&self, id: impl AsRef<str>) -> bool {
        self.get_by_id(id).is_some()
    }

    /// Destroys a context. Returns false if it did not exist.
    pub fn remove(&self, id: impl AsRef<str>) -> bool {
        let id = id.as_ref();
        match self.contexts.remove(id) {
            Some((_, context)) => {
                context.release();
                self.counters.removed.fetch_add(1, Ordering::Relaxed);
                debug!(session_id = %id, "context removed");
                true
            }
            None => false,
        }
    }

    /// Evicts every context older than the TTL. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        self.sweep_at(self.clock.now())
    }

    /// Evicts every context older than the TTL at `now`.
    ///
    /// Eviction is unconditional: whether a tab is still attached is not
    /// consulted. Cells and components of an evicted context are dropped
    /// immediately unless a handler currently holds it bound.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let ttl = self.config.ttl;
        let expired: Vec<SessionId> = self
            .contexts
            .iter()
            .filter(|entry| entry.value().is_expired_at(now, ttl))
            .map(|entry| entry.key().clone())
            .collect();

        let evicted = expired
            .iter()
            .filter(|id| self.evict(id.as_str(), now))
            .count();

        self.counters.sweeps.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 {
            info!(evicted, remaining = self.contexts.len(), "context sweep");
        } else {
            debug!(remaining = self.contexts.len(), "context sweep");
        }
        evicted
    }

    fn evict(&self, id: &str, now: Instant) -> bool {
        let ttl = self.config.ttl;
        match self
            .contexts
            .remove_if(id, |_, context| context.is_expired_at(now, ttl))
        {
            Some((_, context)) => {
                let released = context.release();
                self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                debug!(session_id = %id, released, "context evicted");
                true
            }
            None => false,
        }
    }

    /// Returns the number of registered contexts, expired or not.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Returns true if no contexts are registered.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Returns activity counters.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            created: self.counters.created.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            removed: self.counters.removed.load(Ordering::Relaxed),
            sweeps: self.counters.sweeps.load(Ordering::Relaxed),
        }
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
