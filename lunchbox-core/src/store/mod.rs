//! Document-store abstraction.
//!
//! The backing database is modeled as collections of JSON documents with
//! merge-writes, batched commits, and live snapshot listeners. A
//! [`DocumentStore`] implementation is the seam between the sync engine and
//! whatever actually holds the data: [`MemoryStore`] here, the sqlite
//! fallback in the binary crate, or a cloud document database.
//!
//! Trait methods return boxed futures so the store stays object-safe and
//! implementations can be swapped behind `Arc<S>`.

mod error;
mod memory;

pub use error::StoreError;
pub use memory::{MemoryStore, OpKind, OpRecord};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

/// Logical collections in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    MenuItems,
    Orders,
    Settings,
}

impl Collection {
    /// Remote collection name.
    pub fn name(&self) -> &'static str {
        match self {
            Collection::MenuItems => "menuItems",
            Collection::Orders => "orders",
            Collection::Settings => "settings",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "menuItems" => Some(Collection::MenuItems),
            "orders" => Some(Collection::Orders),
            "settings" => Some(Collection::Settings),
            _ => None,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Ordering hint for queries and listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub field: &'static str,
    pub direction: SortDirection,
}

impl OrderBy {
    /// Menu items order: numeric id ascending.
    pub fn id_ascending() -> Self {
        Self {
            field: "id",
            direction: SortDirection::Ascending,
        }
    }

    /// Orders order: creation time descending (newest first).
    pub fn created_at_descending() -> Self {
        Self {
            field: "createdAt",
            direction: SortDirection::Descending,
        }
    }
}

/// A single document: string key plus JSON fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// One operation inside a batched commit.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Merge `fields` into the document, creating it if absent.
    SetMerge {
        collection: Collection,
        id: String,
        fields: Value,
    },
    /// Delete the document if it exists.
    Delete { collection: Collection, id: String },
}

impl BatchOp {
    pub fn collection(&self) -> Collection {
        match self {
            BatchOp::SetMerge { collection, .. } | BatchOp::Delete { collection, .. } => {
                *collection
            }
        }
    }
}

/// One listener delivery: a full collection snapshot, or the error that
/// broke the listener.
pub type Snapshot = Result<Vec<Document>, StoreError>;

/// A live subscription to a collection.
///
/// The store pushes a full snapshot whenever the collection changes,
/// starting with the current contents. Dropping the subscription stops
/// delivery.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Snapshot>,
}

impl Subscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<Snapshot>) -> Self {
        Self { receiver }
    }

    /// Waits for the next snapshot. Returns `None` once the store side has
    /// gone away.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.receiver.recv().await
    }
}

/// Capability contract for the backing document database.
pub trait DocumentStore: Send + Sync {
    /// Reads all documents in a collection.
    fn get(&self, collection: Collection) -> BoxFuture<'_, Result<Vec<Document>, StoreError>>;

    /// Merge-writes `fields` into one document, creating it if absent.
    fn set_merge(
        &self,
        collection: Collection,
        id: String,
        fields: Value,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Commits a batch of operations atomically.
    ///
    /// Callers are responsible for staying under the store's per-batch
    /// operation limit; the adapter chunks for them.
    fn commit(&self, ops: Vec<BatchOp>) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Opens a live subscription, optionally with a server-side ordering
    /// hint. The first snapshot reflects current contents.
    fn listen(
        &self,
        collection: Collection,
        order_by: Option<OrderBy>,
    ) -> BoxFuture<'_, Result<Subscription, StoreError>>;

    /// Cheap connectivity check.
    fn probe(&self) -> BoxFuture<'_, Result<(), StoreError>>;
}

/// Sorts documents by a field, numerically when both values are numbers
/// and lexicographically otherwise. Stable, so equal keys keep their
/// relative order.
pub fn sort_documents(docs: &mut [Document], order_by: &OrderBy) {
    docs.sort_by(|a, b| {
        let va = a.fields.get(order_by.field);
        let vb = b.fields.get(order_by.field);
        let ord = compare_values(va, vb);
        match order_by.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => std::cmp::Ordering::Greater,
        (None, Some(_)) => std::cmp::Ordering::Less,
        _ => std::cmp::Ordering::Equal,
    }
}
