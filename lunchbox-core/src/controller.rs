//! High-level operations over the synchronized state.
//!
//! The controller owns the sync engine and the shared [`AppState`]. Every
//! mutation is optimistic: state changes first, the write goes through the
//! serializer, and a failed write rolls the state back. Reads come from
//! the in-memory state, which listeners keep current.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::export::{orders_csv, Backup, ExportError};
use crate::models::{MenuItem, Order};
use crate::state::AppState;
use crate::store::{Collection, DocumentStore, StoreError};
use crate::sync::{
    decode_hidden_restaurants, decode_menu_items, decode_orders, ConnectionTracker,
    ListenerManager, RemoteStoreAdapter, SubscriptionHandle, WriteRequest, WriteSerializer,
};

/// Bound on the initial full load; past this the store is treated as
/// unreachable rather than slow.
const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("initial load timed out")]
    LoadTimeout,
    #[error("{0} not found: {1}")]
    NotFound(&'static str, i64),
    #[error("invalid request: {0}")]
    Invalid(String),
}

pub struct Controller<S> {
    adapter: Arc<RemoteStoreAdapter<S>>,
    serializer: Arc<WriteSerializer<S>>,
    listeners: ListenerManager<S>,
    state: Arc<Mutex<AppState>>,
    changed: watch::Sender<u64>,
    handles: Mutex<Vec<SubscriptionHandle>>,
}

impl<S: DocumentStore + 'static> Controller<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_adapter(Arc::new(RemoteStoreAdapter::new(store)))
    }

    /// Builds the controller on a pre-configured adapter, e.g. with a
    /// different retry policy.
    pub fn with_adapter(adapter: Arc<RemoteStoreAdapter<S>>) -> Self {
        let serializer = WriteSerializer::new(adapter.clone());
        let listeners = ListenerManager::new(adapter.clone());
        let (changed, _) = watch::channel(0);
        Self {
            adapter,
            serializer,
            listeners,
            state: Arc::new(Mutex::new(AppState::default())),
            changed,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn connection(&self) -> ConnectionTracker {
        self.adapter.connection()
    }

    /// A point-in-time copy of the app state.
    pub fn snapshot(&self) -> AppState {
        self.state.lock().unwrap().clone()
    }

    /// Receiver that ticks whenever the state changes, from any source.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    fn notify(&self) {
        self.changed.send_modify(|n| *n += 1);
    }

    /// Fetches all three collections once and replaces the state with the
    /// result.
    pub async fn load_all(&self) -> Result<(), ControllerError> {
        let fetch = async {
            let menu = self.adapter.get(Collection::MenuItems).await?;
            let orders = self.adapter.get(Collection::Orders).await?;
            let settings = self.adapter.get(Collection::Settings).await?;
            Ok::<_, StoreError>((menu, orders, settings))
        };
        let (menu, orders, settings) = timeout(LOAD_TIMEOUT, fetch)
            .await
            .map_err(|_| ControllerError::LoadTimeout)??;
        {
            let mut state = self.state.lock().unwrap();
            state.menu_items.apply_snapshot(decode_menu_items(&menu));
            state.orders.apply_snapshot(decode_orders(&orders));
            state.hidden_restaurants = decode_hidden_restaurants(&settings);
        }
        self.notify();
        Ok(())
    }

    /// Starts live subscriptions feeding the state. Idempotent.
    pub fn start_listening(&self) {
        let mut handles = self.handles.lock().unwrap();
        if !handles.is_empty() {
            return;
        }

        let state = self.state.clone();
        let changed = self.changed.clone();
        handles.push(self.listeners.subscribe_menu_items(move |items| {
            state.lock().unwrap().menu_items.apply_snapshot(items);
            changed.send_modify(|n| *n += 1);
        }));

        let state = self.state.clone();
        let changed = self.changed.clone();
        handles.push(self.listeners.subscribe_orders(move |orders| {
            state.lock().unwrap().orders.apply_snapshot(orders);
            changed.send_modify(|n| *n += 1);
        }));

        let state = self.state.clone();
        let changed = self.changed.clone();
        handles.push(self.listeners.subscribe_hidden_restaurants(move |hidden| {
            state.lock().unwrap().hidden_restaurants = hidden;
            changed.send_modify(|n| *n += 1);
        }));
    }

    pub fn stop_listening(&self) {
        for handle in self.handles.lock().unwrap().drain(..) {
            handle.unsubscribe();
        }
    }

    /// Adds a menu item; an id of 0 means "assign one". Assigned ids are
    /// the creation time in milliseconds, the same scheme order ids use.
    /// Returns the item as stored.
    pub async fn add_menu_item(&self, mut item: MenuItem) -> Result<MenuItem, ControllerError> {
        if item.name.trim().is_empty() {
            return Err(ControllerError::Invalid("menu item name is required".into()));
        }
        let (checkpoint, items) = {
            let mut state = self.state.lock().unwrap();
            let checkpoint = state.menu_items.checkpoint();
            if item.id == 0 {
                // Two adds can land in the same millisecond; bump past
                // any taken id rather than colliding.
                let mut id = Utc::now().timestamp_millis();
                while checkpoint.iter().any(|i| i.id == id) {
                    id += 1;
                }
                item.id = id;
            } else if checkpoint.iter().any(|i| i.id == item.id) {
                return Err(ControllerError::Invalid(format!(
                    "menu item id {} already exists",
                    item.id
                )));
            }
            let mut items = checkpoint.clone();
            items.push(item.clone());
            state.menu_items.set_items(items.clone());
            state.menu_items.write_started();
            (checkpoint, items)
        };
        self.notify();
        self.save_menu(checkpoint, items).await?;
        Ok(item)
    }

    pub async fn update_menu_item(&self, item: MenuItem) -> Result<(), ControllerError> {
        let (checkpoint, items) = {
            let mut state = self.state.lock().unwrap();
            let checkpoint = state.menu_items.checkpoint();
            let mut items = checkpoint.clone();
            let slot = items
                .iter_mut()
                .find(|i| i.id == item.id)
                .ok_or(ControllerError::NotFound("menu item", item.id))?;
            *slot = item;
            state.menu_items.set_items(items.clone());
            state.menu_items.write_started();
            (checkpoint, items)
        };
        self.notify();
        self.save_menu(checkpoint, items).await
    }

    pub async fn delete_menu_item(&self, id: i64) -> Result<(), ControllerError> {
        let (checkpoint, items) = {
            let mut state = self.state.lock().unwrap();
            let checkpoint = state.menu_items.checkpoint();
            let mut items = checkpoint.clone();
            let before = items.len();
            items.retain(|i| i.id != id);
            if items.len() == before {
                return Err(ControllerError::NotFound("menu item", id));
            }
            state.menu_items.set_items(items.clone());
            state.menu_items.write_started();
            (checkpoint, items)
        };
        self.notify();
        self.save_menu(checkpoint, items).await
    }

    /// Places an order for the named customer from menu item ids. The
    /// order snapshots the items as they are right now.
    pub async fn place_order(
        &self,
        customer: &str,
        item_ids: &[i64],
    ) -> Result<Order, ControllerError> {
        let customer = customer.trim();
        if customer.is_empty() {
            return Err(ControllerError::Invalid("customer name is required".into()));
        }
        if item_ids.is_empty() {
            return Err(ControllerError::Invalid(
                "an order needs at least one item".into(),
            ));
        }
        let (checkpoint, order) = {
            let mut state = self.state.lock().unwrap();
            let mut selection = Vec::with_capacity(item_ids.len());
            for id in item_ids {
                let item = state
                    .menu_items
                    .items()
                    .iter()
                    .find(|i| i.id == *id)
                    .cloned()
                    .ok_or(ControllerError::NotFound("menu item", *id))?;
                selection.push(item);
            }
            let order = Order::place(customer, &selection);
            let checkpoint = state.orders.checkpoint();
            let mut orders = checkpoint.clone();
            orders.insert(0, order.clone());
            state.orders.set_items(orders);
            state.orders.write_started();
            (checkpoint, order)
        };
        self.notify();

        let result = self
            .serializer
            .enqueue(WriteRequest::SaveOrder(order.clone()))
            .await;
        self.finish_orders_write(checkpoint, result)?;
        Ok(order)
    }

    pub async fn delete_order(&self, id: i64) -> Result<(), ControllerError> {
        let (checkpoint, remaining) = {
            let mut state = self.state.lock().unwrap();
            let checkpoint = state.orders.checkpoint();
            let mut remaining = checkpoint.clone();
            let before = remaining.len();
            remaining.retain(|o| o.id != id);
            if remaining.len() == before {
                return Err(ControllerError::NotFound("order", id));
            }
            state.orders.set_items(remaining.clone());
            state.orders.write_started();
            (checkpoint, remaining)
        };
        self.notify();

        let result = self
            .serializer
            .enqueue(WriteRequest::SaveOrders(remaining))
            .await;
        self.finish_orders_write(checkpoint, result)
    }

    pub async fn hide_restaurant(&self, tag: &str) -> Result<(), ControllerError> {
        let hidden = {
            let mut state = self.state.lock().unwrap();
            if !state.hidden_restaurants.hide(tag) {
                return Ok(());
            }
            state.hidden_restaurants.clone()
        };
        self.notify();

        let result = self
            .serializer
            .enqueue(WriteRequest::SaveSettings(hidden))
            .await;
        if result.is_err() {
            self.state.lock().unwrap().hidden_restaurants.unhide(tag);
            self.notify();
        }
        Ok(result?)
    }

    pub async fn unhide_restaurant(&self, tag: &str) -> Result<(), ControllerError> {
        let hidden = {
            let mut state = self.state.lock().unwrap();
            if !state.hidden_restaurants.unhide(tag) {
                return Ok(());
            }
            state.hidden_restaurants.clone()
        };
        self.notify();

        let result = self
            .serializer
            .enqueue(WriteRequest::SaveSettings(hidden))
            .await;
        if result.is_err() {
            self.state.lock().unwrap().hidden_restaurants.hide(tag);
            self.notify();
        }
        Ok(result?)
    }

    /// Bundles the current menu and orders into a backup.
    pub fn export_backup(&self) -> Backup {
        let state = self.state.lock().unwrap();
        Backup::new(
            state.menu_items.checkpoint(),
            state.orders.checkpoint(),
        )
    }

    /// CSV report of all current orders.
    pub fn export_orders_csv(&self) -> String {
        orders_csv(self.state.lock().unwrap().orders.items())
    }

    /// Replaces menu and orders with a backup's contents, locally and
    /// remotely. Remote documents absent from the backup are deleted.
    pub async fn import_backup(&self, backup: Backup) -> Result<(), ControllerError> {
        let (menu_checkpoint, orders_checkpoint) = {
            let mut state = self.state.lock().unwrap();
            let menu_checkpoint = state.menu_items.checkpoint();
            let orders_checkpoint = state.orders.checkpoint();
            state.menu_items.set_items(backup.menu_items.clone());
            state.orders.set_items(backup.orders.clone());
            state.menu_items.write_started();
            state.orders.write_started();
            (menu_checkpoint, orders_checkpoint)
        };
        self.notify();

        let menu_result = self
            .serializer
            .enqueue(WriteRequest::SaveMenuItems(backup.menu_items))
            .await;
        let orders_result = self
            .serializer
            .enqueue(WriteRequest::SaveOrders(backup.orders))
            .await;

        {
            let mut state = self.state.lock().unwrap();
            state.menu_items.write_finished();
            state.orders.write_finished();
            if menu_result.is_err() {
                state.menu_items.rollback(menu_checkpoint);
            }
            if orders_result.is_err() {
                state.orders.rollback(orders_checkpoint);
            }
        }
        self.notify();
        menu_result?;
        orders_result?;
        Ok(())
    }

    /// Sends a menu write and settles the optimistic state afterwards.
    /// Callers install the new items and mark the write started while
    /// still holding the state lock, so a listener snapshot can never
    /// land between the checkpoint and the pending-write marker.
    async fn save_menu(
        &self,
        checkpoint: Vec<MenuItem>,
        items: Vec<MenuItem>,
    ) -> Result<(), ControllerError> {
        let result = self
            .serializer
            .enqueue(WriteRequest::SaveMenuItems(items))
            .await;
        {
            let mut state = self.state.lock().unwrap();
            state.menu_items.write_finished();
            if result.is_err() {
                state.menu_items.rollback(checkpoint);
            }
        }
        self.notify();
        Ok(result?)
    }

    fn finish_orders_write(
        &self,
        checkpoint: Vec<Order>,
        result: Result<(), StoreError>,
    ) -> Result<(), ControllerError> {
        {
            let mut state = self.state.lock().unwrap();
            state.orders.write_finished();
            if result.is_err() {
                state.orders.rollback(checkpoint);
            }
        }
        self.notify();
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Document, MemoryStore, OpKind};
    use crate::sync::RetryPolicy;
    use serde_json::json;

    fn controller(store: &Arc<MemoryStore>) -> Controller<MemoryStore> {
        Controller::with_adapter(Arc::new(
            RemoteStoreAdapter::new(store.clone())
                .with_retry(RetryPolicy::new(2, Duration::from_millis(10))),
        ))
    }

    fn seed_menu(store: &MemoryStore) {
        store.seed(
            Collection::MenuItems,
            vec![
                Document::new("1", json!({"id": 1, "name": "Tomato Soup", "tag": "Deli",
                                          "category": "Main Course", "price": "$4.50"})),
                Document::new("2", json!({"id": 2, "name": "Pad Thai", "tag": "Thai Garden",
                                          "category": "Main Course", "price": "$9.00"})),
            ],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_all_populates_state() {
        let store = Arc::new(MemoryStore::new());
        seed_menu(&store);
        let controller = controller(&store);

        controller.load_all().await.unwrap();
        let state = controller.snapshot();
        assert_eq!(state.menu_items.items().len(), 2);
        assert_eq!(state.restaurants(), ["Deli", "Thai Garden"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_menu_item_assigns_timestamp_id_and_persists() {
        let store = Arc::new(MemoryStore::new());
        seed_menu(&store);
        let controller = controller(&store);
        controller.load_all().await.unwrap();

        let before = Utc::now().timestamp_millis();
        let added = controller
            .add_menu_item(MenuItem::new(0, "Dessert", "Baklava", "Deli"))
            .await
            .unwrap();
        // Assigned ids are creation-time milliseconds, like order ids.
        assert!(added.id >= before);
        assert_eq!(controller.snapshot().menu_items.items().len(), 3);
        assert_eq!(store.documents(Collection::MenuItems).len(), 3);

        let err = controller
            .add_menu_item(MenuItem::new(1, "Dessert", "Halva", "Deli"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Invalid(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_write_snapshot_keeps_optimistic_item() {
        let store = Arc::new(MemoryStore::new());
        seed_menu(&store);
        let controller = controller(&store);
        controller.load_all().await.unwrap();
        controller.start_listening();

        // The commit notifies the live listener while the write is still
        // pending; that snapshot must be deferred, not clobber the
        // optimistic item.
        let added = controller
            .add_menu_item(MenuItem::new(0, "Dessert", "Baklava", "Deli"))
            .await
            .unwrap();

        let state = controller.snapshot();
        assert!(state.menu_items.items().iter().any(|i| i.id == added.id));
        assert_eq!(state.menu_items.items().len(), 3);
        assert_eq!(store.documents(Collection::MenuItems).len(), 3);
        controller.stop_listening();
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_menu_item_removes_remote_document() {
        let store = Arc::new(MemoryStore::new());
        seed_menu(&store);
        let controller = controller(&store);
        controller.load_all().await.unwrap();

        controller.delete_menu_item(2).await.unwrap();
        let docs = store.documents(Collection::MenuItems);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "1");

        let err = controller.delete_menu_item(99).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotFound("menu item", 99)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_place_order_validates_and_snapshots_items() {
        let store = Arc::new(MemoryStore::new());
        seed_menu(&store);
        let controller = controller(&store);
        controller.load_all().await.unwrap();

        assert!(matches!(
            controller.place_order("  ", &[1]).await.unwrap_err(),
            ControllerError::Invalid(_)
        ));
        assert!(matches!(
            controller.place_order("Alice", &[]).await.unwrap_err(),
            ControllerError::Invalid(_)
        ));
        assert!(matches!(
            controller.place_order("Alice", &[99]).await.unwrap_err(),
            ControllerError::NotFound("menu item", 99)
        ));

        let order = controller.place_order("Alice", &[1, 2]).await.unwrap();
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.summary, "Tomato Soup, Pad Thai");
        assert_eq!(store.documents(Collection::Orders).len(), 1);

        // Later menu edits must not reach into the placed order.
        controller.delete_menu_item(1).await.unwrap();
        let orders = controller.snapshot().orders.checkpoint();
        assert_eq!(orders[0].items.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_rolls_back_optimistic_state() {
        let store = Arc::new(MemoryStore::new());
        seed_menu(&store);
        let controller = controller(&store);
        controller.load_all().await.unwrap();

        store.fail_next(OpKind::SetMerge, StoreError::Permission("rules".into()));
        let err = controller.place_order("Alice", &[1]).await.unwrap_err();
        assert!(matches!(err, ControllerError::Store(StoreError::Permission(_))));
        assert!(controller.snapshot().orders.items().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_order_removes_remote_document() {
        let store = Arc::new(MemoryStore::new());
        seed_menu(&store);
        let controller = controller(&store);
        controller.load_all().await.unwrap();

        let order = controller.place_order("Alice", &[1]).await.unwrap();
        controller.delete_order(order.id).await.unwrap();
        assert!(store.documents(Collection::Orders).is_empty());
        assert!(controller.snapshot().orders.items().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hide_restaurant_persists_and_filters() {
        let store = Arc::new(MemoryStore::new());
        seed_menu(&store);
        let controller = controller(&store);
        controller.load_all().await.unwrap();

        controller.hide_restaurant("Thai Garden").await.unwrap();
        let state = controller.snapshot();
        assert_eq!(state.visible_menu_items().len(), 1);
        assert_eq!(store.documents(Collection::Settings).len(), 1);

        controller.unhide_restaurant("Thai Garden").await.unwrap();
        assert_eq!(controller.snapshot().visible_menu_items().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backup_roundtrip_through_controller() {
        let store = Arc::new(MemoryStore::new());
        seed_menu(&store);
        let controller = controller(&store);
        controller.load_all().await.unwrap();
        controller.place_order("Alice", &[1]).await.unwrap();

        let backup = controller.export_backup();

        // Wipe into a fresh store, then restore from the backup.
        let fresh = Arc::new(MemoryStore::new());
        let restored = self::controller(&fresh);
        restored.import_backup(backup).await.unwrap();

        let state = restored.snapshot();
        assert_eq!(state.menu_items.items().len(), 2);
        assert_eq!(state.orders.items().len(), 1);
        assert_eq!(fresh.documents(Collection::MenuItems).len(), 2);
        assert_eq!(fresh.documents(Collection::Orders).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listeners_feed_state_and_change_channel() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller(&store);
        let mut changes = controller.subscribe_changes();
        controller.start_listening();

        seed_menu(&store);
        // Wait until the menu snapshot lands.
        loop {
            changes.changed().await.unwrap();
            if controller.snapshot().menu_items.items().len() == 2 {
                break;
            }
        }

        controller.stop_listening();
    }
}
