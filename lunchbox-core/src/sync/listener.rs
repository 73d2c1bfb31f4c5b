//! Live collection subscriptions with automatic repair.
//!
//! Each subscription runs a background task around a state machine: it
//! prefers a server-ordered listener, drops to an unordered listener with
//! client-side sorting when the store rejects the ordered query, and
//! reconnects with exponential backoff when the stream breaks. After the
//! reconnect bound is exhausted it delivers one empty snapshot so callers
//! can stop showing stale data, then keeps retrying the unordered
//! fallback at a capped interval.
//!
//! Handles are idempotent to unsubscribe and unsubscribe on drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::models::{HiddenRestaurants, MenuItem, Order, HIDDEN_RESTAURANTS_DOC_ID};
use crate::store::{sort_documents, Collection, Document, DocumentStore, OrderBy};

use super::adapter::RemoteStoreAdapter;

/// Reconnect attempts before the listener declares the stream down and
/// starts delivering empty snapshots.
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

const RECONNECT_BASE: Duration = Duration::from_secs(1);

/// Retry interval once backoff has grown past it, and the fixed interval
/// after the reconnect bound is exhausted.
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Where a subscription's background task currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerPhase {
    /// Opening the server-ordered listener.
    SubscribingOrdered,
    /// Receiving server-ordered snapshots.
    ActiveOrdered,
    /// Opening the unordered fallback listener.
    SubscribingFallback,
    /// Receiving unordered snapshots, sorted client-side.
    ActiveFallback,
    /// Stream broke; waiting out a backoff delay.
    Reconnecting,
}

/// Handle to a live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
    active: Arc<AtomicBool>,
    phase: Arc<Mutex<ListenerPhase>>,
}

impl SubscriptionHandle {
    /// Stops the subscription. Safe to call more than once; the abort also
    /// cancels any backoff timer the task is sleeping on.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> ListenerPhase {
        *self.phase.lock().unwrap()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

pub struct ListenerManager<S> {
    adapter: Arc<RemoteStoreAdapter<S>>,
    reconnect_base: Duration,
    max_retry_interval: Duration,
}

impl<S: DocumentStore + 'static> ListenerManager<S> {
    pub fn new(adapter: Arc<RemoteStoreAdapter<S>>) -> Self {
        Self {
            adapter,
            reconnect_base: RECONNECT_BASE,
            max_retry_interval: MAX_RETRY_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_timing(
        adapter: Arc<RemoteStoreAdapter<S>>,
        reconnect_base: Duration,
        max_retry_interval: Duration,
    ) -> Self {
        Self {
            adapter,
            reconnect_base,
            max_retry_interval,
        }
    }

    /// Subscribes to the menu, delivered sorted by numeric id ascending.
    pub fn subscribe_menu_items<F>(&self, deliver: F) -> SubscriptionHandle
    where
        F: Fn(Vec<MenuItem>) + Send + Sync + 'static,
    {
        self.spawn(
            Collection::MenuItems,
            Some(OrderBy::id_ascending()),
            Arc::new(move |docs| deliver(decode_menu_items(&docs))),
        )
    }

    /// Subscribes to orders, delivered newest first.
    pub fn subscribe_orders<F>(&self, deliver: F) -> SubscriptionHandle
    where
        F: Fn(Vec<Order>) + Send + Sync + 'static,
    {
        self.spawn(
            Collection::Orders,
            Some(OrderBy::created_at_descending()),
            Arc::new(move |docs| deliver(decode_orders(&docs))),
        )
    }

    /// Subscribes to the hidden-restaurant settings document.
    pub fn subscribe_hidden_restaurants<F>(&self, deliver: F) -> SubscriptionHandle
    where
        F: Fn(HiddenRestaurants) + Send + Sync + 'static,
    {
        self.spawn(
            Collection::Settings,
            None,
            Arc::new(move |docs| deliver(decode_hidden_restaurants(&docs))),
        )
    }

    fn spawn(
        &self,
        collection: Collection,
        preferred: Option<OrderBy>,
        handler: Arc<dyn Fn(Vec<Document>) + Send + Sync>,
    ) -> SubscriptionHandle {
        let active = Arc::new(AtomicBool::new(true));
        let phase = Arc::new(Mutex::new(ListenerPhase::SubscribingOrdered));
        let worker = Worker {
            adapter: self.adapter.clone(),
            collection,
            preferred,
            handler,
            active: active.clone(),
            phase: phase.clone(),
            reconnect_base: self.reconnect_base,
            max_retry_interval: self.max_retry_interval,
        };
        let task = tokio::spawn(worker.run());
        SubscriptionHandle {
            task,
            active,
            phase,
        }
    }
}

struct Worker<S> {
    adapter: Arc<RemoteStoreAdapter<S>>,
    collection: Collection,
    preferred: Option<OrderBy>,
    handler: Arc<dyn Fn(Vec<Document>) + Send + Sync>,
    active: Arc<AtomicBool>,
    phase: Arc<Mutex<ListenerPhase>>,
    reconnect_base: Duration,
    max_retry_interval: Duration,
}

impl<S: DocumentStore + 'static> Worker<S> {
    async fn run(self) {
        let mut fallback = false;
        // Consecutive failed attempts since the last good snapshot.
        let mut attempts: u32 = 0;
        let mut delivered_empty = false;

        'outer: loop {
            if !self.active.load(Ordering::SeqCst) {
                return;
            }
            let ordered = self.preferred.is_some() && !fallback;
            self.set_phase(if ordered {
                ListenerPhase::SubscribingOrdered
            } else {
                ListenerPhase::SubscribingFallback
            });

            let order_by = if ordered { self.preferred } else { None };
            let mut sub = match self.adapter.listen(self.collection, order_by).await {
                Ok(sub) => sub,
                Err(err) if ordered && !err.is_connection() => {
                    // The store can't serve the ordered query (typically a
                    // missing index). Retry unordered right away and sort
                    // here instead.
                    tracing::warn!(
                        collection = %self.collection,
                        error = %err,
                        "ordered subscription rejected, falling back to unordered"
                    );
                    fallback = true;
                    continue 'outer;
                }
                Err(err) => {
                    tracing::warn!(
                        collection = %self.collection,
                        error = %err,
                        "subscription failed"
                    );
                    attempts += 1;
                    if self.backoff(attempts, &mut delivered_empty).await {
                        fallback = true;
                    }
                    continue 'outer;
                }
            };

            self.set_phase(if ordered {
                ListenerPhase::ActiveOrdered
            } else {
                ListenerPhase::ActiveFallback
            });

            loop {
                match sub.next().await {
                    Some(Ok(mut docs)) => {
                        attempts = 0;
                        delivered_empty = false;
                        if let Some(order_by) = &self.preferred {
                            sort_documents(&mut docs, order_by);
                        }
                        if !self.active.load(Ordering::SeqCst) {
                            return;
                        }
                        (self.handler)(docs);
                    }
                    Some(Err(err)) if ordered && !err.is_connection() => {
                        tracing::warn!(
                            collection = %self.collection,
                            error = %err,
                            "ordered stream rejected, falling back to unordered"
                        );
                        fallback = true;
                        continue 'outer;
                    }
                    Some(Err(err)) => {
                        tracing::warn!(
                            collection = %self.collection,
                            error = %err,
                            "subscription stream broke"
                        );
                        break;
                    }
                    None => {
                        tracing::debug!(
                            collection = %self.collection,
                            "subscription stream closed"
                        );
                        break;
                    }
                }
            }

            if !self.active.load(Ordering::SeqCst) {
                return;
            }
            attempts += 1;
            if self.backoff(attempts, &mut delivered_empty).await {
                fallback = true;
            }
        }
    }

    /// Waits out the reconnect delay for this attempt. Returns true once
    /// the reconnect bound is exhausted, at which point the caller should
    /// give up on the ordered listener and resubscribe unordered.
    async fn backoff(&self, attempts: u32, delivered_empty: &mut bool) -> bool {
        self.set_phase(ListenerPhase::Reconnecting);
        let exhausted = attempts > MAX_RECONNECT_ATTEMPTS;
        let delay = if exhausted {
            // The stream has been down long enough that stale data is
            // worse than none; hand out one empty snapshot, then keep
            // trying at the slow cadence.
            if !*delivered_empty {
                *delivered_empty = true;
                tracing::warn!(
                    collection = %self.collection,
                    attempts,
                    "reconnect bound exhausted, clearing delivered data"
                );
                (self.handler)(Vec::new());
            }
            self.max_retry_interval
        } else {
            let exp = self.reconnect_base * 2u32.pow(attempts - 1);
            exp.min(self.max_retry_interval)
        };
        sleep(delay).await;
        exhausted
    }

    fn set_phase(&self, phase: ListenerPhase) {
        *self.phase.lock().unwrap() = phase;
    }
}

/// Decodes menu documents, skipping any that don't parse, sorted by
/// numeric id ascending.
pub fn decode_menu_items(docs: &[Document]) -> Vec<MenuItem> {
    let mut items: Vec<MenuItem> = docs
        .iter()
        .filter_map(|doc| match serde_json::from_value(doc.fields.clone()) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::warn!(id = %doc.id, error = %err, "skipping undecodable menu item");
                None
            }
        })
        .collect();
    items.sort_by_key(|item: &MenuItem| item.id);
    items
}

/// Decodes order documents, newest first. Orders written before creation
/// timestamps existed fall back to their display-date string.
pub fn decode_orders(docs: &[Document]) -> Vec<Order> {
    let mut orders: Vec<Order> = docs
        .iter()
        .filter_map(|doc| match serde_json::from_value(doc.fields.clone()) {
            Ok(order) => Some(order),
            Err(err) => {
                tracing::warn!(id = %doc.id, error = %err, "skipping undecodable order");
                None
            }
        })
        .collect();
    orders.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.date.cmp(&a.date))
    });
    orders
}

/// Extracts the hidden-restaurant list from a settings snapshot; an absent
/// or undecodable document means nothing is hidden.
pub fn decode_hidden_restaurants(docs: &[Document]) -> HiddenRestaurants {
    docs.iter()
        .find(|doc| doc.id == HIDDEN_RESTAURANTS_DOC_ID)
        .and_then(|doc| serde_json::from_value(doc.fields.clone()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, OpKind, StoreError};
    use crate::sync::retry::RetryPolicy;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn manager(store: &Arc<MemoryStore>) -> ListenerManager<MemoryStore> {
        let adapter = Arc::new(
            RemoteStoreAdapter::new(store.clone())
                .with_retry(RetryPolicy::new(3, Duration::from_millis(50))),
        );
        ListenerManager::with_timing(adapter, Duration::from_millis(100), Duration::from_secs(5))
    }

    fn seed_menu(store: &MemoryStore) {
        store.seed(
            Collection::MenuItems,
            vec![
                Document::new("10", json!({"id": 10, "name": "Stew", "tag": "Deli"})),
                Document::new("2", json!({"id": 2, "name": "Soup", "tag": "Deli"})),
            ],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_snapshot_is_sorted_by_id() {
        let store = Arc::new(MemoryStore::new());
        seed_menu(&store);
        let manager = manager(&store);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = manager.subscribe_menu_items(move |items| {
            let _ = tx.send(items);
        });

        let items = rx.recv().await.unwrap();
        let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, [2, 10]);
        assert_eq!(handle.phase(), ListenerPhase::ActiveOrdered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_index_falls_back_to_unordered_sorted_client_side() {
        let store = Arc::new(MemoryStore::new());
        seed_menu(&store);
        store.fail_next(
            OpKind::Listen,
            StoreError::Precondition("index required".into()),
        );
        let manager = manager(&store);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = manager.subscribe_menu_items(move |items| {
            let _ = tx.send(items);
        });

        // Fallback happens without a backoff delay and still delivers in
        // id order.
        let items = rx.recv().await.unwrap();
        let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, [2, 10]);
        assert_eq!(handle.phase(), ListenerPhase::ActiveFallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_stream_error() {
        let store = Arc::new(MemoryStore::new());
        seed_menu(&store);
        let manager = manager(&store);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = manager.subscribe_menu_items(move |items| {
            let _ = tx.send(items);
        });
        assert_eq!(rx.recv().await.unwrap().len(), 2);

        store.push_listener_error(
            Collection::MenuItems,
            StoreError::Connection("stream reset".into()),
        );
        store.seed(
            Collection::MenuItems,
            vec![Document::new("3", json!({"id": 3, "name": "Pie", "tag": "Deli"}))],
        );

        // After the backoff the worker resubscribes and sees the new state.
        loop {
            let items = rx.recv().await.unwrap();
            if items.len() == 3 {
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reconnects_deliver_empty_then_recover() {
        let store = Arc::new(MemoryStore::new());
        seed_menu(&store);
        for _ in 0..6 {
            store.fail_next(OpKind::Listen, StoreError::Connection("offline".into()));
        }
        let manager = manager(&store);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = manager.subscribe_menu_items(move |items| {
            let _ = tx.send(items);
        });

        // Six straight connection failures cross the bound of five, so the
        // first delivery is the empty clear, and the next successful
        // subscribe restores real data.
        let cleared = rx.recv().await.unwrap();
        assert!(cleared.is_empty());
        let restored = rx.recv().await.unwrap();
        assert_eq!(restored.len(), 2);
        // Past the bound the worker gives up on the ordered listener; it
        // runs unordered from here, sorted client-side.
        assert_eq!(handle.phase(), ListenerPhase::ActiveFallback);
        let ids: Vec<i64> = restored.iter().map(|i| i.id).collect();
        assert_eq!(ids, [2, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orders_delivered_newest_first() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            Collection::Orders,
            vec![
                Document::new(
                    "1",
                    json!({"id": 1, "name": "Alice", "order": "Soup", "items": [],
                           "date": "1/1/2026, 9:00:00 AM",
                           "createdAt": "2026-01-01T09:00:00Z"}),
                ),
                Document::new(
                    "2",
                    json!({"id": 2, "name": "Bob", "order": "Stew", "items": [],
                           "date": "1/2/2026, 9:00:00 AM",
                           "createdAt": "2026-01-02T09:00:00Z"}),
                ),
            ],
        );
        let manager = manager(&store);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = manager.subscribe_orders(move |orders| {
            let _ = tx.send(orders);
        });

        let orders = rx.recv().await.unwrap();
        let names: Vec<&str> = orders.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["Bob", "Alice"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_delivery_and_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        seed_menu(&store);
        let manager = manager(&store);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = manager.subscribe_menu_items(move |items| {
            let _ = tx.send(items);
        });
        assert_eq!(rx.recv().await.unwrap().len(), 2);
        assert!(handle.is_active());

        handle.unsubscribe();
        handle.unsubscribe();
        assert!(!handle.is_active());

        store.seed(
            Collection::MenuItems,
            vec![Document::new("3", json!({"id": 3, "name": "Pie", "tag": "Deli"}))],
        );
        // The worker's handler is gone, so the channel closes with nothing
        // further delivered.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_restaurants_default_when_absent() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(&store);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = manager.subscribe_hidden_restaurants(move |hidden| {
            let _ = tx.send(hidden);
        });

        let hidden = rx.recv().await.unwrap();
        assert!(hidden.is_empty());
    }

    #[test]
    fn test_decode_skips_undecodable_documents() {
        let docs = vec![
            Document::new("1", json!({"id": 1, "name": "Soup", "tag": "Deli"})),
            Document::new("bad", json!("not an object")),
        ];
        let items = decode_menu_items(&docs);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Soup");
    }
}
