//! Write serialization for the remote store.
//!
//! At most one write is in flight per logical collection; requests that
//! arrive while one is running are queued FIFO and started as the previous
//! one finishes, whatever its outcome. That keeps concurrent bulk saves
//! from racing their stale-id computations against each other. Single-order
//! saves and bulk order saves share the orders queue, so neither can starve
//! the other.
//!
//! Bulk saves diff against the current remote snapshot: documents whose id
//! is absent from the new set are deleted, and (for orders) only new or
//! changed-date entries are written. A quota rejection gets one delayed
//! retry, then a slower one-op-at-a-time fallback before surfacing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::sleep;

use crate::models::{HiddenRestaurants, MenuItem, Order, HIDDEN_RESTAURANTS_DOC_ID};
use crate::store::{BatchOp, Collection, DocumentStore, StoreError};

use super::adapter::RemoteStoreAdapter;

/// Extra wait after a quota rejection, letting the store's write pipeline
/// drain before the retry.
const QUOTA_DELAY: Duration = Duration::from_secs(2);

/// Pause between writes on the slow per-item fallback path.
const PER_ITEM_PAUSE: Duration = Duration::from_millis(250);

/// A queued write against one logical collection.
#[derive(Debug, Clone)]
pub enum WriteRequest {
    /// Replace the menu wholesale: stale documents deleted, every item
    /// merge-written.
    SaveMenuItems(Vec<MenuItem>),
    /// Fast path for a single placed order.
    SaveOrder(Order),
    /// Replace the order list wholesale via diff.
    SaveOrders(Vec<Order>),
    /// Persist the hidden-restaurant list.
    SaveSettings(HiddenRestaurants),
}

impl WriteRequest {
    /// The queue this request serializes on.
    fn queue(&self) -> Collection {
        match self {
            WriteRequest::SaveMenuItems(_) => Collection::MenuItems,
            WriteRequest::SaveOrder(_) | WriteRequest::SaveOrders(_) => Collection::Orders,
            WriteRequest::SaveSettings(_) => Collection::Settings,
        }
    }
}

struct Pending {
    request: WriteRequest,
    done: oneshot::Sender<Result<(), StoreError>>,
}

#[derive(Default)]
struct QueueState {
    in_flight: bool,
    pending: VecDeque<Pending>,
}

pub struct WriteSerializer<S> {
    adapter: Arc<RemoteStoreAdapter<S>>,
    queues: Mutex<HashMap<Collection, QueueState>>,
    quota_delay: Duration,
    per_item_pause: Duration,
}

impl<S: DocumentStore + 'static> WriteSerializer<S> {
    pub fn new(adapter: Arc<RemoteStoreAdapter<S>>) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            queues: Mutex::new(HashMap::new()),
            quota_delay: QUOTA_DELAY,
            per_item_pause: PER_ITEM_PAUSE,
        })
    }

    #[cfg(test)]
    fn with_delays(
        adapter: Arc<RemoteStoreAdapter<S>>,
        quota_delay: Duration,
        per_item_pause: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            queues: Mutex::new(HashMap::new()),
            quota_delay,
            per_item_pause,
        })
    }

    /// Enqueues a write and waits for its outcome.
    ///
    /// Requests for the same collection execute strictly in the order this
    /// future is first polled; requests for different collections are
    /// independent.
    pub async fn enqueue(self: &Arc<Self>, request: WriteRequest) -> Result<(), StoreError> {
        let key = request.queue();
        let (tx, rx) = oneshot::channel();
        let start_drain = {
            let mut queues = self.queues.lock().unwrap();
            let queue = queues.entry(key).or_default();
            queue.pending.push_back(Pending { request, done: tx });
            if queue.in_flight {
                false
            } else {
                queue.in_flight = true;
                true
            }
        };

        if start_drain {
            let this = self.clone();
            tokio::spawn(async move { this.drain(key).await });
        }

        rx.await
            .unwrap_or_else(|_| Err(StoreError::Unknown("write worker went away".into())))
    }

    /// Runs queued writes for one collection until the queue empties.
    async fn drain(self: Arc<Self>, key: Collection) {
        loop {
            let next = {
                let mut queues = self.queues.lock().unwrap();
                let queue = queues.entry(key).or_default();
                match queue.pending.pop_front() {
                    Some(pending) => Some(pending),
                    None => {
                        queue.in_flight = false;
                        None
                    }
                }
            };
            let Some(Pending { request, done }) = next else {
                return;
            };
            let result = self.execute(request).await;
            if let Err(err) = &result {
                tracing::warn!(collection = %key, error = %err, "write failed");
            }
            // Receiver may have gone away; the write still happened.
            let _ = done.send(result);
        }
    }

    async fn execute(&self, request: WriteRequest) -> Result<(), StoreError> {
        match request {
            WriteRequest::SaveMenuItems(items) => self.save_menu_items(&items).await,
            WriteRequest::SaveOrder(order) => self.save_order(&order).await,
            WriteRequest::SaveOrders(orders) => self.save_orders(&orders).await,
            WriteRequest::SaveSettings(hidden) => {
                self.set_merge_with_quota_retry(
                    Collection::Settings,
                    HIDDEN_RESTAURANTS_DOC_ID,
                    encode(&hidden)?,
                )
                .await
            }
        }
    }

    /// Wholesale menu save: delete documents whose id left the set, then
    /// merge-write every item.
    async fn save_menu_items(&self, items: &[MenuItem]) -> Result<(), StoreError> {
        let remote = self.adapter.get(Collection::MenuItems).await?;
        let new_ids: HashSet<String> = items.iter().map(|item| item.doc_id()).collect();

        let mut ops = Vec::new();
        for doc in &remote {
            if !new_ids.contains(&doc.id) {
                ops.push(BatchOp::Delete {
                    collection: Collection::MenuItems,
                    id: doc.id.clone(),
                });
            }
        }
        let updated_at = Utc::now().to_rfc3339();
        for item in items {
            let mut fields = encode(item)?;
            if let Some(map) = fields.as_object_mut() {
                map.insert("updatedAt".into(), Value::String(updated_at.clone()));
            }
            ops.push(BatchOp::SetMerge {
                collection: Collection::MenuItems,
                id: item.doc_id(),
                fields,
            });
        }
        if ops.is_empty() {
            return Ok(());
        }
        tracing::debug!(items = items.len(), ops = ops.len(), "saving menu items");
        self.commit_with_quota_fallback(ops).await
    }

    /// Diffed bulk order save: deletes for ids gone from the new set,
    /// upserts only for new or changed-date orders. An unchanged list
    /// produces zero operations.
    async fn save_orders(&self, orders: &[Order]) -> Result<(), StoreError> {
        let remote = self.adapter.get(Collection::Orders).await?;
        let new_ids: HashSet<String> = orders.iter().map(|order| order.doc_id()).collect();
        let remote_dates: HashMap<&str, Option<&str>> = remote
            .iter()
            .map(|doc| {
                (
                    doc.id.as_str(),
                    doc.fields.get("date").and_then(Value::as_str),
                )
            })
            .collect();

        let mut ops = Vec::new();
        for doc in &remote {
            if !new_ids.contains(&doc.id) {
                ops.push(BatchOp::Delete {
                    collection: Collection::Orders,
                    id: doc.id.clone(),
                });
            }
        }
        for order in orders {
            let id = order.doc_id();
            let unchanged = remote_dates
                .get(id.as_str())
                .is_some_and(|date| *date == Some(order.date.as_str()));
            if !unchanged {
                ops.push(BatchOp::SetMerge {
                    collection: Collection::Orders,
                    id,
                    fields: encode(order)?,
                });
            }
        }
        if ops.is_empty() {
            tracing::debug!("order save produced no operations");
            return Ok(());
        }
        tracing::debug!(orders = orders.len(), ops = ops.len(), "saving orders");
        self.commit_with_quota_fallback(ops).await
    }

    /// Single-order fast path.
    async fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        self.set_merge_with_quota_retry(Collection::Orders, &order.doc_id(), encode(order)?)
            .await
    }

    async fn set_merge_with_quota_retry(
        &self,
        collection: Collection,
        id: &str,
        fields: Value,
    ) -> Result<(), StoreError> {
        match self.adapter.set_merge(collection, id, fields.clone()).await {
            Err(err) if err.is_quota() => {
                tracing::warn!(%collection, %id, "quota exceeded, retrying after delay");
                sleep(self.quota_delay).await;
                self.adapter.set_merge(collection, id, fields).await
            }
            result => result,
        }
    }

    /// Commits a batch; on quota rejection waits once and retries, then
    /// degrades to one operation at a time with pauses.
    async fn commit_with_quota_fallback(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        match self.adapter.commit(ops.clone()).await {
            Err(err) if err.is_quota() => {
                tracing::warn!(ops = ops.len(), "quota exceeded, retrying batch after delay");
                sleep(self.quota_delay).await;
            }
            result => return result.map(|_| ()),
        }
        match self.adapter.commit(ops.clone()).await {
            Err(err) if err.is_quota() => {
                tracing::warn!(ops = ops.len(), "quota still exceeded, writing per item");
            }
            result => return result.map(|_| ()),
        }
        for (index, op) in ops.into_iter().enumerate() {
            if index > 0 {
                sleep(self.per_item_pause).await;
            }
            self.adapter.commit(vec![op]).await?;
        }
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|err| StoreError::Unknown(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Document, MemoryStore, OpKind};
    use crate::sync::retry::RetryPolicy;
    use futures::future::join_all;
    use serde_json::json;

    fn setup(store: &Arc<MemoryStore>) -> Arc<WriteSerializer<MemoryStore>> {
        let adapter = Arc::new(
            RemoteStoreAdapter::new(store.clone())
                .with_retry(RetryPolicy::new(3, Duration::from_millis(50))),
        );
        WriteSerializer::with_delays(
            adapter,
            Duration::from_millis(100),
            Duration::from_millis(10),
        )
    }

    fn order_named(id: i64, name: &str) -> Order {
        Order {
            id,
            name: name.to_string(),
            date: format!("1/1/2026, {}:00:00 AM", id),
            ..Order::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_writes_execute_in_submission_order() {
        let store = Arc::new(MemoryStore::new());
        let serializer = setup(&store);

        // Two bulk saves submitted concurrently: without serialization
        // their get/commit pairs would interleave and race the stale-id
        // diff. Serialized, the op log is get,commit,get,commit.
        let first = vec![order_named(1, "Alice")];
        let second = vec![order_named(1, "Alice"), order_named(2, "Bob")];
        let results = join_all([
            serializer.enqueue(WriteRequest::SaveOrders(first)),
            serializer.enqueue(WriteRequest::SaveOrders(second)),
        ])
        .await;
        assert!(results.into_iter().all(|r| r.is_ok()));

        let kinds: Vec<OpKind> = store.ops().into_iter().map(|op| op.kind).collect();
        assert_eq!(
            kinds,
            vec![OpKind::Get, OpKind::Commit, OpKind::Get, OpKind::Commit]
        );

        // Final state is what sequential execution would produce.
        let docs = store.documents(Collection::Orders);
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_order_writes_keep_fifo_order() {
        let store = Arc::new(MemoryStore::new());
        let serializer = setup(&store);

        let writes: Vec<_> = (1..=5)
            .map(|id| serializer.enqueue(WriteRequest::SaveOrder(order_named(id, "batch"))))
            .collect();
        let results = join_all(writes).await;
        assert!(results.into_iter().all(|r| r.is_ok()));

        assert_eq!(store.documents(Collection::Orders).len(), 5);
        assert_eq!(store.op_count(OpKind::SetMerge), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_order_save_issues_zero_ops() {
        let store = Arc::new(MemoryStore::new());
        let serializer = setup(&store);

        let orders = vec![order_named(1, "Alice"), order_named(2, "Bob")];
        serializer
            .enqueue(WriteRequest::SaveOrders(orders.clone()))
            .await
            .unwrap();
        let commits_after_first = store.op_count(OpKind::Commit);

        serializer
            .enqueue(WriteRequest::SaveOrders(orders))
            .await
            .unwrap();
        // The second save diffs, finds nothing new, and commits nothing.
        assert_eq!(store.op_count(OpKind::Commit), commits_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_menu_save_deletes_stale_documents() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            Collection::MenuItems,
            vec![
                Document::new("1", json!({"id": 1, "name": "Soup"})),
                Document::new("2", json!({"id": 2, "name": "Bread"})),
            ],
        );
        let serializer = setup(&store);

        let kept = MenuItem::new(1, "Main Course", "Soup", "Deli");
        serializer
            .enqueue(WriteRequest::SaveMenuItems(vec![kept]))
            .await
            .unwrap();

        let docs = store.documents(Collection::MenuItems);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_falls_back_to_per_item_writes() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(OpKind::Commit, StoreError::QuotaExceeded("writes".into()));
        store.fail_next(OpKind::Commit, StoreError::QuotaExceeded("writes".into()));
        let serializer = setup(&store);

        let orders = vec![order_named(1, "Alice"), order_named(2, "Bob")];
        serializer
            .enqueue(WriteRequest::SaveOrders(orders))
            .await
            .unwrap();

        // Two failed 2-op batches, then two single-op commits.
        assert_eq!(store.commit_batch_sizes(), vec![2, 2, 1, 1]);
        assert_eq!(store.documents(Collection::Orders).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_surfaces_and_queue_continues() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(OpKind::Get, StoreError::Permission("rules".into()));
        let serializer = setup(&store);

        let err = serializer
            .enqueue(WriteRequest::SaveOrders(vec![order_named(1, "Alice")]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Permission(_)));

        // The queue keeps working after a failed request.
        serializer
            .enqueue(WriteRequest::SaveOrders(vec![order_named(2, "Bob")]))
            .await
            .unwrap();
        assert_eq!(store.documents(Collection::Orders).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_save_targets_fixed_document() {
        let store = Arc::new(MemoryStore::new());
        let serializer = setup(&store);

        let mut hidden = HiddenRestaurants::new();
        hidden.hide("Thai Garden");
        serializer
            .enqueue(WriteRequest::SaveSettings(hidden))
            .await
            .unwrap();

        let docs = store.documents(Collection::Settings);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, HIDDEN_RESTAURANTS_DOC_ID);
    }
}
