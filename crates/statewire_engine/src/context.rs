//! Session contexts and the binding guard.

use crate::cell::{CellStore, StateCell};
use crate::component::{Component, ComponentRegistry};
use crate::error::{EngineError, EngineResult};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use serde_json::Value;
use statewire_protocol::{CellId, CellValue, ComponentId, DomPatch, SessionId};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mutable state of one session. Only reachable through a [`ContextGuard`].
#[derive(Debug, Default)]
struct ContextState {
    cells: CellStore,
    dirty: HashSet<CellId>,
    components: ComponentRegistry,
}

/// The cells and components of one logical browser session.
///
/// A context is shared (`Arc`) between the registry and whoever is handling
/// a message for it, but its state is confined to the single holder of its
/// [`ContextGuard`]. `created_at` never changes and is the only input to TTL
/// eviction.
pub struct SessionContext {
    id: SessionId,
    created_at: Instant,
    state: Arc<Mutex<ContextState>>,
    cell_ids: Arc<AtomicU64>,
    retired: AtomicBool,
}

impl SessionContext {
    /// Creates a standalone context with its own cell id sequence.
    pub fn new(id: impl Into<SessionId>, created_at: Instant) -> Self {
        Self::with_id_source(id.into(), created_at, Arc::new(AtomicU64::new(1)))
    }

    pub(crate) fn with_id_source(
        id: SessionId,
        created_at: Instant,
        cell_ids: Arc<AtomicU64>,
    ) -> Self {
        Self {
            id,
            created_at,
            state: Arc::new(Mutex::new(ContextState::default())),
            cell_ids,
            retired: AtomicBool::new(false),
        }
    }

    /// Returns the session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns when the context was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Returns the context's age at `now`.
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Returns true if the context is older than `ttl` at `now`.
    pub fn is_expired_at(&self, now: Instant, ttl: Duration) -> bool {
        self.age_at(now) > ttl
    }

    /// Returns true while some caller holds this context's guard.
    pub fn is_bound(&self) -> bool {
        self.state.is_locked()
    }

    /// Returns true once the context has been evicted or removed.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Binds the context, blocking while another caller holds it.
    ///
    /// Fails with [`EngineError::ContextExpired`] if the context was evicted
    /// or removed before the binding was acquired.
    pub fn bind(self: &Arc<Self>) -> EngineResult<ContextGuard> {
        let state = self.state.lock_arc();
        self.guard(state)
    }

    /// Binds the context if nobody else holds it.
    ///
    /// Returns `Ok(None)` while another caller holds the binding.
    pub fn try_bind(self: &Arc<Self>) -> EngineResult<Option<ContextGuard>> {
        match self.state.try_lock_arc() {
            Some(state) => self.guard(state).map(Some),
            None => Ok(None),
        }
    }

    fn guard(
        self: &Arc<Self>,
        state: ArcMutexGuard<RawMutex, ContextState>,
    ) -> EngineResult<ContextGuard> {
        if self.is_retired() {
            return Err(EngineError::ContextExpired(self.id.clone()));
        }
        Ok(ContextGuard {
            context: Arc::clone(self),
            state,
        })
    }

    /// Retires the context and drops every cell, component and dirty mark.
    ///
    /// A retired context can no longer be bound. Returns false without
    /// clearing anything if the context is bound; a bound context's memory
    /// is released when its last holder lets go.
    pub(crate) fn release(&self) -> bool {
        self.retired.store(true, Ordering::SeqCst);
        match self.state.try_lock() {
            Some(mut state) => {
                state.cells.clear();
                state.dirty.clear();
                state.components.clear();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("bound", &self.is_bound())
            .field("retired", &self.is_retired())
            .finish()
    }
}

/// The result of flushing a context's dirty set.
#[derive(Debug, Clone, PartialEq)]
pub struct Flush {
    /// Every cell changed since the previous flush, in registration order.
    pub cells: Vec<CellValue>,
    /// Every registered component, re-rendered after the change.
    pub patches: Vec<DomPatch>,
}

/// Exclusive binding of a [`SessionContext`].
///
/// Holding the guard is being bound to the context; dropping it (or calling
/// [`ContextGuard::unbind`]) releases the binding. The guard cannot leave the
/// thread that bound it.
pub struct ContextGuard {
    context: Arc<SessionContext>,
    state: ArcMutexGuard<RawMutex, ContextState>,
}

impl ContextGuard {
    /// Returns the bound session's id.
    pub fn session_id(&self) -> &SessionId {
        self.context.id()
    }

    /// Returns the bound context.
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    /// Creates a cell with a registry-issued id.
    pub fn create_cell(&mut self, value: impl Into<Value>) -> CellId {
        let value = value.into();
        loop {
            let n = self.context.cell_ids.fetch_add(1, Ordering::Relaxed);
            let id = CellId::new(format!("cell_{n}"));
            if !self.state.cells.contains(id.as_str()) {
                // Cannot collide: the id was just checked under the binding.
                let _ = self.register(StateCell::new(id.clone(), value));
                return id;
            }
        }
    }

    /// Creates a cell with a caller-chosen id.
    pub fn create_named_cell(
        &mut self,
        id: impl Into<CellId>,
        value: impl Into<Value>,
    ) -> EngineResult<CellId> {
        let id = id.into();
        self.register(StateCell::new(id.clone(), value.into()))?;
        Ok(id)
    }

    fn register(&mut self, cell: StateCell) -> EngineResult<()> {
        self.state.cells.insert(cell)
    }

    /// Returns the session's cells.
    pub fn cells(&self) -> &CellStore {
        &self.state.cells
    }

    /// Returns a cell.
    pub fn cell(&self, id: impl AsRef<str>) -> Option<&StateCell> {
        self.state.cells.cell(id.as_ref())
    }

    /// Returns a cell for subscribing.
    pub fn cell_mut(&mut self, id: impl AsRef<str>) -> Option<&mut StateCell> {
        self.state.cells.cell_mut(id.as_ref())
    }

    /// Returns a cell's current value.
    pub fn get(&self, id: impl AsRef<str>) -> Option<&Value> {
        self.state.cells.get(id.as_ref())
    }

    /// Sets a cell. Returns whether the value changed.
    ///
    /// A change marks the cell dirty in this context; an equal value is a
    /// no-op.
    pub fn set(&mut self, id: impl AsRef<str>, value: impl Into<Value>) -> EngineResult<bool> {
        let id = id.as_ref();
        let state = &mut *self.state;
        let cell = state
            .cells
            .cell_mut(id)
            .ok_or_else(|| EngineError::UnknownCell(id.into()))?;

        if !cell.replace(value.into()) {
            return Ok(false);
        }
        // Recorded before subscribers run so a panicking subscriber cannot
        // hide the change from the next flush.
        state.dirty.insert(cell.id().clone());
        cell.notify();
        Ok(true)
    }

    /// Sets a cell to `f(current)`.
    pub fn update<F, V>(&mut self, id: impl AsRef<str>, f: F) -> EngineResult<bool>
    where
        F: FnOnce(&Value) -> V,
        V: Into<Value>,
    {
        let id = id.as_ref();
        let current = self
            .get(id)
            .ok_or_else(|| EngineError::UnknownCell(id.into()))?;
        let next = f(current).into();
        self.set(id, next)
    }

    /// Registers a component. Returns true if an existing id was replaced.
    pub fn register_component<C>(&mut self, id: impl Into<ComponentId>, component: C) -> bool
    where
        C: Component + 'static,
    {
        self.state.components.register(id.into(), Box::new(component))
    }

    /// Returns the session's components.
    pub fn components(&self) -> &ComponentRegistry {
        &self.state.components
    }

    /// Returns the cells changed since the last flush, in registration order.
    pub fn collect_dirty(&self) -> Vec<CellValue> {
        let state = &*self.state;
        state
            .cells
            .iter()
            .filter(|cell| state.dirty.contains(cell.id()))
            .map(StateCell::to_cell_value)
            .collect()
    }

    /// Returns true if any cell changed since the last flush.
    pub fn has_dirty(&self) -> bool {
        !self.state.dirty.is_empty()
    }

    /// Returns the number of cells changed since the last flush.
    pub fn dirty_count(&self) -> usize {
        self.state.dirty.len()
    }

    /// Resets the dirty set and every cell's dirty flag.
    ///
    /// Call only after the result of [`collect_dirty`](Self::collect_dirty)
    /// has been consumed.
    pub fn clear_dirty(&mut self) {
        let state = &mut *self.state;
        for id in state.dirty.drain() {
            if let Some(cell) = state.cells.cell_mut(id.as_str()) {
                cell.clear_dirty();
            }
        }
    }

    /// Re-renders every registered component.
    pub fn render_components(&self) -> Vec<DomPatch> {
        self.state.components.render_all(&self.state.cells)
    }

    /// Snapshots the dirty set, derives the state diff and DOM patches from
    /// it, then clears it. Returns `None` if nothing changed.
    pub fn flush(&mut self) -> Option<Flush> {
        if !self.has_dirty() {
            return None;
        }
        let cells = self.collect_dirty();
        let patches = self.render_components();
        self.clear_dirty();
        Some(Flush { cells, patches })
    }

    /// Returns `{id, value}` for every cell, in registration order.
    pub fn to_json(&self) -> Vec<CellValue> {
        self.state.cells.iter().map(StateCell::to_cell_value).collect()
    }

    /// Releases the binding.
    pub fn unbind(self) {}
}

impl fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextGuard")
            .field("session_id", self.session_id())
            .field("cells", &self.state.cells.len())
            .field("dirty", &self.state.dirty.len())
            .field("components", &self.state.components)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(id: &str) -> Arc<SessionContext> {
        Arc::new(SessionContext::new(id, Instant::now()))
    }

    fn counter(cells: &CellStore) -> String {
        format!(
            "<span>{}</span>",
            cells.get("count").cloned().unwrap_or_default()
        )
    }

    #[test]
    fn bind_and_unbind() {
        let ctx = context("ctx_1");
        assert!(!ctx.is_bound());

        let guard = ctx.bind().unwrap();
        assert!(ctx.is_bound());
        assert!(ctx.try_bind().unwrap().is_none());

        guard.unbind();
        assert!(!ctx.is_bound());
        assert!(ctx.try_bind().unwrap().is_some());
    }

    #[test]
    fn generated_cell_ids_are_unique() {
        let ctx = context("ctx_1");
        let mut guard = ctx.bind().unwrap();
        let a = guard.create_cell(1);
        let b = guard.create_cell(2);
        assert_ne!(a, b);
        assert_eq!(guard.cells().len(), 2);
    }

    #[test]
    fn generated_ids_skip_named_cells() {
        let ctx = context("ctx_1");
        let mut guard = ctx.bind().unwrap();
        guard.create_named_cell("cell_1", 0).unwrap();
        let id = guard.create_cell(0);
        assert_ne!(id.as_str(), "cell_1");
    }

    #[test]
    fn set_tracks_dirty_once_per_cell() {
        let ctx = context("ctx_1");
        let mut guard = ctx.bind().unwrap();
        let count = guard.create_named_cell("count", 0).unwrap();

        assert!(guard.set(&count, 1).unwrap());
        assert!(guard.set(&count, 2).unwrap());
        assert_eq!(guard.dirty_count(), 1);
        assert_eq!(guard.collect_dirty(), vec![CellValue::new("count", 2)]);
    }

    #[test]
    fn idempotent_write_is_not_dirty() {
        let ctx = context("ctx_1");
        let mut guard = ctx.bind().unwrap();
        guard.create_named_cell("count", 3).unwrap();

        assert!(!guard.set("count", 3).unwrap());
        assert!(!guard.has_dirty());
        assert!(guard.flush().is_none());
    }

    #[test]
    fn unknown_cell_is_an_error() {
        let ctx = context("ctx_1");
        let mut guard = ctx.bind().unwrap();
        assert_eq!(
            guard.set("missing", 1).unwrap_err(),
            EngineError::UnknownCell("missing".into())
        );
        assert!(guard.update("missing", |_| 1).is_err());
    }

    #[test]
    fn update_applies_function() {
        let ctx = context("ctx_1");
        let mut guard = ctx.bind().unwrap();
        guard.create_named_cell("count", 41).unwrap();

        guard
            .update("count", |v| v.as_i64().unwrap_or(0) + 1)
            .unwrap();
        assert_eq!(guard.get("count"), Some(&json!(42)));
    }

    #[test]
    fn flush_snapshots_then_clears() {
        let ctx = context("ctx_1");
        let mut guard = ctx.bind().unwrap();
        guard.create_named_cell("count", 0).unwrap();
        guard.create_named_cell("label", "idle").unwrap();
        guard.register_component("counter", counter);

        guard.set("label", "busy").unwrap();
        guard.set("count", 1).unwrap();

        let flush = guard.flush().unwrap();
        assert_eq!(
            flush.cells,
            vec![CellValue::new("count", 1), CellValue::new("label", "busy")]
        );
        assert_eq!(flush.patches, vec![DomPatch::new("counter", "<span>1</span>")]);

        assert!(!guard.has_dirty());
        assert!(guard.collect_dirty().is_empty());
        assert!(!guard.cell("count").unwrap().is_dirty());
        assert!(guard.flush().is_none());
    }

    #[test]
    fn dirty_set_survives_rebinding() {
        let ctx = context("ctx_1");
        {
            let mut guard = ctx.bind().unwrap();
            guard.create_named_cell("count", 0).unwrap();
            guard.set("count", 9).unwrap();
        }
        let guard = ctx.bind().unwrap();
        assert_eq!(guard.collect_dirty(), vec![CellValue::new("count", 9)]);
    }

    #[test]
    fn to_json_lists_every_cell() {
        let ctx = context("ctx_1");
        let mut guard = ctx.bind().unwrap();
        guard.create_named_cell("count", 5).unwrap();
        guard.create_named_cell("items", json!(["a"])).unwrap();

        assert_eq!(
            guard.to_json(),
            vec![
                CellValue::new("count", 5),
                CellValue::new("items", json!(["a"]))
            ]
        );
    }

    #[test]
    fn release_skips_bound_contexts() {
        let ctx = context("ctx_1");
        {
            let mut guard = ctx.bind().unwrap();
            guard.create_named_cell("count", 1).unwrap();
            assert!(!ctx.release());
        }
        assert!(ctx.release());
        assert!(ctx.is_retired());
    }

    #[test]
    fn retired_context_cannot_be_bound() {
        let ctx = context("ctx_1");
        ctx.bind().unwrap().create_named_cell("count", 1).unwrap();
        assert!(ctx.release());

        assert_eq!(
            ctx.bind().unwrap_err(),
            EngineError::ContextExpired("ctx_1".into())
        );
        assert!(ctx.try_bind().is_err());
    }

    #[test]
    fn panicking_subscriber_keeps_change_dirty() {
        let ctx = context("ctx_1");
        let mut guard = ctx.bind().unwrap();
        guard.create_named_cell("count", 0).unwrap();
        guard.cell_mut("count").unwrap().subscribe(|v| {
            if v == &json!(1) {
                panic!("subscriber bug");
            }
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            guard.set("count", 1)
        }));
        assert!(result.is_err());

        assert_eq!(guard.collect_dirty(), vec![CellValue::new("count", 1)]);
        guard.flush().unwrap();
        assert!(!guard.cell("count").unwrap().is_dirty());
    }

    #[test]
    fn expiry_uses_created_at_only() {
        let start = Instant::now();
        let ctx = SessionContext::new("ctx_1", start);
        let ttl = Duration::from_secs(300);

        assert!(!ctx.is_expired_at(start + ttl, ttl));
        assert!(ctx.is_expired_at(start + ttl + Duration::from_millis(1), ttl));
    }
}
