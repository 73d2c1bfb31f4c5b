//! In-memory application state fed by listeners and optimistic writes.
//!
//! Each collection tracks how many of its writes are still in flight.
//! Listener snapshots that arrive while a write is pending are deferred,
//! not applied: they predate the write and would resurrect deleted rows or
//! drop optimistic ones. The latest deferred snapshot is applied once the
//! pending count drains to zero; by then the listener has usually pushed a
//! snapshot that includes the write anyway.

use crate::models::{HiddenRestaurants, MenuItem, Order};

/// One collection's items plus write bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct CollectionState<T> {
    items: Vec<T>,
    pending_writes: usize,
    deferred: Option<Vec<T>>,
}

impl<T: Clone> CollectionState<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn pending_writes(&self) -> usize {
        self.pending_writes
    }

    /// Replaces the items directly, as an optimistic local mutation does.
    pub fn set_items(&mut self, items: Vec<T>) {
        self.items = items;
    }

    /// Snapshot of the current items, for rolling back a failed mutation.
    pub fn checkpoint(&self) -> Vec<T> {
        self.items.clone()
    }

    pub fn rollback(&mut self, checkpoint: Vec<T>) {
        self.items = checkpoint;
    }

    pub fn write_started(&mut self) {
        self.pending_writes += 1;
    }

    /// Marks one write finished; if it was the last, the newest deferred
    /// listener snapshot (if any) becomes current.
    pub fn write_finished(&mut self) {
        self.pending_writes = self.pending_writes.saturating_sub(1);
        if self.pending_writes == 0 {
            if let Some(items) = self.deferred.take() {
                self.items = items;
            }
        }
    }

    /// Applies a listener snapshot, or defers it while writes are pending.
    /// Only the newest deferred snapshot is kept.
    pub fn apply_snapshot(&mut self, items: Vec<T>) {
        if self.pending_writes > 0 {
            self.deferred = Some(items);
        } else {
            self.items = items;
            self.deferred = None;
        }
    }
}

/// The whole app's synchronized state.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub menu_items: CollectionState<MenuItem>,
    pub orders: CollectionState<Order>,
    pub hidden_restaurants: HiddenRestaurants,
}

impl AppState {
    /// Menu items whose restaurant is not hidden, in stored order.
    pub fn visible_menu_items(&self) -> Vec<MenuItem> {
        self.menu_items
            .items()
            .iter()
            .filter(|item| !self.hidden_restaurants.is_hidden(&item.tag))
            .cloned()
            .collect()
    }

    /// Distinct restaurant tags in first-seen menu order, hidden ones
    /// included.
    pub fn restaurants(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for item in self.menu_items.items() {
            if !item.tag.is_empty() && !seen.contains(&item.tag) {
                seen.push(item.tag.clone());
            }
        }
        seen
    }

    /// Orders whose customer name contains `query`, case-insensitively.
    pub fn find_orders(&self, query: &str) -> Vec<Order> {
        let needle = query.to_lowercase();
        self.orders
            .items()
            .iter()
            .filter(|order| order.name.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, tag: &str) -> MenuItem {
        MenuItem::new(id, "Main Course", format!("Item {id}"), tag)
    }

    #[test]
    fn test_snapshot_applies_when_no_writes_pending() {
        let mut state = CollectionState::default();
        state.apply_snapshot(vec![item(1, "Deli")]);
        assert_eq!(state.items().len(), 1);
    }

    #[test]
    fn test_snapshot_deferred_while_write_pending() {
        let mut state = CollectionState::default();
        state.apply_snapshot(vec![item(1, "Deli"), item(2, "Deli")]);

        // Optimistic delete of item 2, write still in flight.
        state.write_started();
        state.set_items(vec![item(1, "Deli")]);

        // A stale snapshot from before the delete must not resurrect it.
        state.apply_snapshot(vec![item(1, "Deli"), item(2, "Deli")]);
        assert_eq!(state.items().len(), 1);

        // Once the write lands, the newest deferred snapshot applies.
        state.apply_snapshot(vec![item(1, "Deli")]);
        state.write_finished();
        assert_eq!(state.items().len(), 1);
        assert_eq!(state.pending_writes(), 0);
    }

    #[test]
    fn test_only_newest_deferred_snapshot_survives() {
        let mut state = CollectionState::default();
        state.write_started();
        state.apply_snapshot(vec![item(1, "Deli")]);
        state.apply_snapshot(vec![item(1, "Deli"), item(2, "Deli")]);
        state.write_finished();
        assert_eq!(state.items().len(), 2);
    }

    #[test]
    fn test_rollback_restores_checkpoint() {
        let mut state = CollectionState::default();
        state.apply_snapshot(vec![item(1, "Deli")]);
        let checkpoint = state.checkpoint();
        state.set_items(Vec::new());
        state.rollback(checkpoint);
        assert_eq!(state.items().len(), 1);
    }

    #[test]
    fn test_visible_menu_items_filters_hidden_restaurants() {
        let mut app = AppState::default();
        app.menu_items
            .apply_snapshot(vec![item(1, "Deli"), item(2, "Thai Garden"), item(3, "Deli")]);
        app.hidden_restaurants.hide("Thai Garden");

        let visible = app.visible_menu_items();
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|i| i.tag == "Deli"));
        // The restaurant list still includes hidden tags, so they can be
        // unhidden.
        assert_eq!(app.restaurants(), ["Deli", "Thai Garden"]);
    }

    #[test]
    fn test_find_orders_is_case_insensitive() {
        let mut app = AppState::default();
        let order = Order {
            id: 1,
            name: "Alice Johnson".to_string(),
            ..Order::default()
        };
        app.orders.apply_snapshot(vec![order]);

        assert_eq!(app.find_orders("alice").len(), 1);
        assert_eq!(app.find_orders("JOHN").len(), 1);
        assert!(app.find_orders("bob").is_empty());
    }
}
