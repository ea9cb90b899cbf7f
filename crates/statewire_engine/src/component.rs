//! Renderable components.

use crate::cell::CellStore;
use statewire_protocol::{ComponentId, DomPatch};
use std::fmt;

/// A renderable unit of a page.
///
/// `render` must be a pure function of the session's cell values; its output
/// is forwarded to the client verbatim. Identity lives in the registry, not in
/// the component.
pub trait Component: Send {
    /// Renders the component's current HTML.
    fn render(&self, cells: &CellStore) -> String;
}

impl<F> Component for F
where
    F: Fn(&CellStore) -> String + Send,
{
    fn render(&self, cells: &CellStore) -> String {
        self(cells)
    }
}

/// The components of one session, in registration order.
#[derive(Default)]
pub struct ComponentRegistry {
    entries: Vec<(ComponentId, Box<dyn Component>)>,
}

impl ComponentRegistry {
    /// Registers a component.
    ///
    /// Registering an id that already exists replaces its renderer in place,
    /// keeping its position. Returns true if an existing entry was replaced.
    pub fn register(&mut self, id: ComponentId, component: Box<dyn Component>) -> bool {
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => {
                entry.1 = component;
                true
            }
            None => {
                self.entries.push((id, component));
                false
            }
        }
    }

    /// Removes a component. Returns false if it was not registered.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| existing.as_str() != id);
        self.entries.len() != before
    }

    /// Returns true if a component with this id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing.as_str() == id)
    }

    /// Returns the number of components.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no components are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates component ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &ComponentId> {
        self.entries.iter().map(|(id, _)| id)
    }

    /// Renders one component.
    pub fn render(&self, id: &str, cells: &CellStore) -> Option<DomPatch> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.as_str() == id)
            .map(|(id, component)| DomPatch {
                component_id: id.clone(),
                html: component.render(cells),
            })
    }

    /// Renders every component, in registration order.
    pub fn render_all(&self, cells: &CellStore) -> Vec<DomPatch> {
        self.entries
            .iter()
            .map(|(id, component)| DomPatch {
                component_id: id.clone(),
                html: component.render(cells),
            })
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(text: &'static str) -> Box<dyn Component> {
        Box::new(move |_: &CellStore| text.to_string())
    }

    #[test]
    fn render_all_in_registration_order() {
        let mut registry = ComponentRegistry::default();
        registry.register("header".into(), label("<h1/>"));
        registry.register("body".into(), label("<p/>"));

        let patches = registry.render_all(&CellStore::default());
        assert_eq!(
            patches,
            vec![DomPatch::new("header", "<h1/>"), DomPatch::new("body", "<p/>")]
        );
    }

    #[test]
    fn re_registering_keeps_id_and_position() {
        let mut registry = ComponentRegistry::default();
        registry.register("a".into(), label("1"));
        registry.register("b".into(), label("2"));
        assert!(registry.register("a".into(), label("3")));

        let ids: Vec<_> = registry.ids().map(ComponentId::as_str).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(
            registry.render("a", &CellStore::default()),
            Some(DomPatch::new("a", "3"))
        );
    }

    #[test]
    fn remove_component() {
        let mut registry = ComponentRegistry::default();
        registry.register("a".into(), label("1"));
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(registry.is_empty());
        assert!(registry.render("a", &CellStore::default()).is_none());
    }
}
