//! In-memory document store.
//!
//! Backs tests and ephemeral runs. Supports scripted failure injection
//! (next call of a given kind fails with a chosen [`StoreError`]) and keeps
//! an operation log so tests can assert attempt counts, batch sizes, and
//! retry timing.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{
    sort_documents, BatchOp, Collection, Document, DocumentStore, OrderBy, Snapshot, StoreError,
    Subscription,
};

/// Kinds of store operations, for failure scripting and the op log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Get,
    SetMerge,
    Commit,
    Listen,
    Probe,
}

/// One entry in the operation log.
#[derive(Debug, Clone)]
pub struct OpRecord {
    pub kind: OpKind,
    pub collection: Option<Collection>,
    /// Number of batch operations (1 for non-batch calls).
    pub op_count: usize,
    pub at: Instant,
}

struct Watcher {
    order_by: Option<OrderBy>,
    sender: mpsc::UnboundedSender<Snapshot>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<Collection, BTreeMap<String, Value>>,
    watchers: HashMap<Collection, Vec<Watcher>>,
    failures: HashMap<OpKind, VecDeque<StoreError>>,
    ops: Vec<OpRecord>,
}

/// In-memory [`DocumentStore`] with failure scripting.
#[derive(Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a collection with documents, notifying any listeners.
    pub fn seed(&self, collection: Collection, docs: Vec<Document>) {
        let mut inner = self.inner.lock().unwrap();
        let map = inner.collections.entry(collection).or_default();
        for doc in docs {
            map.insert(doc.id, doc.fields);
        }
        Self::notify(&mut inner, collection);
    }

    /// Scripts the next call of `kind` to fail with `err`. Multiple
    /// scripted failures for the same kind are consumed in order.
    pub fn fail_next(&self, kind: OpKind, err: StoreError) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures.entry(kind).or_default().push_back(err);
    }

    /// Delivers `err` to every active listener on `collection`, simulating
    /// a listener broken by the backend.
    pub fn push_listener_error(&self, collection: Collection, err: StoreError) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(watchers) = inner.watchers.get_mut(&collection) {
            watchers.retain(|w| w.sender.send(Err(err.clone())).is_ok());
        }
    }

    /// Current documents in a collection (unsorted).
    pub fn documents(&self, collection: Collection) -> Vec<Document> {
        let inner = self.inner.lock().unwrap();
        Self::snapshot(&inner, collection)
    }

    /// Full operation log.
    pub fn ops(&self) -> Vec<OpRecord> {
        self.inner.lock().unwrap().ops.clone()
    }

    /// Per-call batch sizes of every `commit`, in call order.
    pub fn commit_batch_sizes(&self) -> Vec<usize> {
        self.ops()
            .into_iter()
            .filter(|op| op.kind == OpKind::Commit)
            .map(|op| op.op_count)
            .collect()
    }

    /// Count of logged operations of one kind.
    pub fn op_count(&self, kind: OpKind) -> usize {
        self.ops().iter().filter(|op| op.kind == kind).count()
    }

    fn take_failure(inner: &mut Inner, kind: OpKind) -> Option<StoreError> {
        inner.failures.get_mut(&kind).and_then(|q| q.pop_front())
    }

    fn record(inner: &mut Inner, kind: OpKind, collection: Option<Collection>, op_count: usize) {
        inner.ops.push(OpRecord {
            kind,
            collection,
            op_count,
            at: Instant::now(),
        });
    }

    fn snapshot(inner: &Inner, collection: Collection) -> Vec<Document> {
        inner
            .collections
            .get(&collection)
            .map(|map| {
                map.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn notify(inner: &mut Inner, collection: Collection) {
        let docs = Self::snapshot(inner, collection);
        if let Some(watchers) = inner.watchers.get_mut(&collection) {
            watchers.retain(|w| {
                let mut snap = docs.clone();
                if let Some(order_by) = &w.order_by {
                    sort_documents(&mut snap, order_by);
                }
                w.sender.send(Ok(snap)).is_ok()
            });
        }
    }

    fn apply(inner: &mut Inner, op: BatchOp) {
        match op {
            BatchOp::SetMerge {
                collection,
                id,
                fields,
            } => {
                let map = inner.collections.entry(collection).or_default();
                match map.get_mut(&id) {
                    Some(existing) => merge_fields(existing, fields),
                    None => {
                        map.insert(id, fields);
                    }
                }
            }
            BatchOp::Delete { collection, id } => {
                if let Some(map) = inner.collections.get_mut(&collection) {
                    map.remove(&id);
                }
            }
        }
    }
}

/// Top-level key merge, matching the backing store's merge-write semantics.
fn merge_fields(existing: &mut Value, incoming: Value) {
    match (existing.as_object_mut(), incoming) {
        (Some(map), Value::Object(new)) => {
            for (k, v) in new {
                map.insert(k, v);
            }
        }
        (_, incoming) => *existing = incoming,
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, collection: Collection) -> BoxFuture<'_, Result<Vec<Document>, StoreError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            Self::record(&mut inner, OpKind::Get, Some(collection), 1);
            if let Some(err) = Self::take_failure(&mut inner, OpKind::Get) {
                return Err(err);
            }
            Ok(Self::snapshot(&inner, collection))
        })
    }

    fn set_merge(
        &self,
        collection: Collection,
        id: String,
        fields: Value,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            Self::record(&mut inner, OpKind::SetMerge, Some(collection), 1);
            if let Some(err) = Self::take_failure(&mut inner, OpKind::SetMerge) {
                return Err(err);
            }
            Self::apply(
                &mut inner,
                BatchOp::SetMerge {
                    collection,
                    id,
                    fields,
                },
            );
            Self::notify(&mut inner, collection);
            Ok(())
        })
    }

    fn commit(&self, ops: Vec<BatchOp>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            Self::record(&mut inner, OpKind::Commit, None, ops.len());
            if let Some(err) = Self::take_failure(&mut inner, OpKind::Commit) {
                return Err(err);
            }
            let mut touched = Vec::new();
            for op in ops {
                let collection = op.collection();
                if !touched.contains(&collection) {
                    touched.push(collection);
                }
                Self::apply(&mut inner, op);
            }
            for collection in touched {
                Self::notify(&mut inner, collection);
            }
            Ok(())
        })
    }

    fn listen(
        &self,
        collection: Collection,
        order_by: Option<OrderBy>,
    ) -> BoxFuture<'_, Result<Subscription, StoreError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            Self::record(&mut inner, OpKind::Listen, Some(collection), 1);
            if let Some(err) = Self::take_failure(&mut inner, OpKind::Listen) {
                return Err(err);
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let mut initial = Self::snapshot(&inner, collection);
            if let Some(order_by) = &order_by {
                sort_documents(&mut initial, order_by);
            }
            let _ = tx.send(Ok(initial));
            inner
                .watchers
                .entry(collection)
                .or_default()
                .push(Watcher {
                    order_by,
                    sender: tx,
                });
            Ok(Subscription::new(rx))
        })
    }

    fn probe(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            Self::record(&mut inner, OpKind::Probe, None, 1);
            if let Some(err) = Self::take_failure(&mut inner, OpKind::Probe) {
                return Err(err);
            }
            Ok(())
        })
    }
}
