//! Reactive state cells.

use crate::error::{EngineError, EngineResult};
use serde_json::Value;
use statewire_protocol::{CellId, CellValue};
use std::collections::HashMap;
use std::fmt;

/// Handle returned by [`StateCell::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn Fn(&Value) + Send>;

/// A single reactive value with a dirty flag.
///
/// Cells are owned by a session and only mutated through its
/// [`ContextGuard`](crate::ContextGuard), which is what records the cell in
/// the session's dirty set. Writing a value equal to the current one changes
/// nothing and notifies nobody.
pub struct StateCell {
    id: CellId,
    value: Value,
    dirty: bool,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
}

impl StateCell {
    pub(crate) fn new(id: CellId, value: Value) -> Self {
        Self {
            id,
            value,
            dirty: false,
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Returns the cell id.
    pub fn id(&self) -> &CellId {
        &self.id
    }

    /// Returns the current value.
    pub fn get(&self) -> &Value {
        &self.value
    }

    /// Returns true if the cell changed since the last flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Replaces the value and marks the cell dirty. Returns false (and does
    /// nothing) if it is unchanged.
    ///
    /// Subscribers are not run; the owner records the change first and then
    /// calls [`notify`](Self::notify).
    pub(crate) fn replace(&mut self, value: Value) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        self.dirty = true;
        true
    }

    /// Runs every subscriber with the current value.
    pub(crate) fn notify(&self) {
        for (_, subscriber) in &self.subscribers {
            subscriber(&self.value);
        }
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Registers a callback invoked with the new value after every change.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Removes a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    /// Returns the number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Returns the `{id, value}` wire pair.
    pub fn to_cell_value(&self) -> CellValue {
        CellValue {
            id: self.id.clone(),
            value: self.value.clone(),
        }
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("id", &self.id)
            .field("value", &self.value)
            .field("dirty", &self.dirty)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// The cells of one session, in registration order.
///
/// Components render from a shared reference to the store.
#[derive(Debug, Default)]
pub struct CellStore {
    cells: HashMap<CellId, StateCell>,
    order: Vec<CellId>,
}

impl CellStore {
    /// Returns a cell's current value.
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.cells.get(id).map(StateCell::get)
    }

    /// Returns a cell.
    pub fn cell(&self, id: &str) -> Option<&StateCell> {
        self.cells.get(id)
    }

    pub(crate) fn cell_mut(&mut self, id: &str) -> Option<&mut StateCell> {
        self.cells.get_mut(id)
    }

    /// Returns true if a cell with this id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.cells.contains_key(id)
    }

    /// Returns the number of cells.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if there are no cells.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates cells in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &StateCell> {
        self.order.iter().filter_map(|id| self.cells.get(id))
    }

    pub(crate) fn insert(&mut self, cell: StateCell) -> EngineResult<()> {
        if self.cells.contains_key(cell.id()) {
            return Err(EngineError::DuplicateCell(cell.id().clone()));
        }
        self.order.push(cell.id().clone());
        self.cells.insert(cell.id().clone(), cell);
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.cells.clear();
        self.order.clear();
    }
}
