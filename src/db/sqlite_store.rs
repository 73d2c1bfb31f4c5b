//! Local document store on sqlite.
//!
//! Implements the same [`DocumentStore`] contract as the remote backend,
//! so the sync engine runs unchanged against a local database when no
//! remote is configured. Documents live one row per id with their fields
//! as JSON text. Listeners are in-process: every successful write pushes
//! fresh snapshots to subscribers of the touched collections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tokio::sync::mpsc;

use lunchbox_core::store::Snapshot;
use lunchbox_core::{
    sort_documents, BatchOp, Collection, Document, DocumentStore, OrderBy, StoreError,
    Subscription,
};

/// Legacy whole-list blob keys from builds before per-document storage.
const LEGACY_MENU_KEY: &str = "menuItems";
const LEGACY_ORDERS_KEY: &str = "menuOrders";

struct Watcher {
    order_by: Option<OrderBy>,
    sender: mpsc::UnboundedSender<Snapshot>,
}

pub struct SqliteStore {
    pool: SqlitePool,
    watchers: Arc<Mutex<HashMap<Collection, Vec<Watcher>>>>,
}

impl SqliteStore {
    /// Wraps a migrated pool, importing legacy whole-list blobs into the
    /// per-document tables if this is the first open since the upgrade.
    pub async fn open(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            watchers: Arc::new(Mutex::new(HashMap::new())),
        };
        store.migrate_legacy_blobs().await?;
        Ok(store)
    }

    fn table(collection: Collection) -> &'static str {
        match collection {
            Collection::MenuItems => "menu_documents",
            Collection::Orders => "order_documents",
            Collection::Settings => "settings_documents",
        }
    }

    /// One-time import of pre-upgrade data. Runs only while the document
    /// tables are still empty, so it can never clobber synced data.
    async fn migrate_legacy_blobs(&self) -> Result<(), StoreError> {
        let docs: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM menu_documents) + (SELECT COUNT(*) FROM order_documents)",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        if docs > 0 {
            return Ok(());
        }

        for (key, collection) in [
            (LEGACY_MENU_KEY, Collection::MenuItems),
            (LEGACY_ORDERS_KEY, Collection::Orders),
        ] {
            let payload: Option<String> =
                sqlx::query_scalar("SELECT payload FROM legacy_blobs WHERE key = ?")
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(store_err)?;
            let Some(payload) = payload else { continue };

            let entries: Vec<Value> = serde_json::from_str(&payload).map_err(|e| {
                StoreError::Validation(format!("legacy blob {key:?} is not a JSON list: {e}"))
            })?;
            let count = entries.len();
            let table = Self::table(collection);
            let mut tx = self.pool.begin().await.map_err(store_err)?;
            for entry in entries {
                let Some(id) = entry.get("id").map(value_as_id) else {
                    continue;
                };
                let fields = serde_json::to_string(&entry)
                    .map_err(|e| StoreError::Unknown(e.to_string()))?;
                sqlx::query(&format!(
                    "INSERT OR REPLACE INTO {table} (id, fields) VALUES (?, ?)"
                ))
                .bind(&id)
                .bind(&fields)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
            sqlx::query("DELETE FROM legacy_blobs WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            tx.commit().await.map_err(store_err)?;
            tracing::info!(key, count, "imported legacy blob into {table}");
        }
        Ok(())
    }

    async fn fetch_all(&self, collection: Collection) -> Result<Vec<Document>, StoreError> {
        let table = Self::table(collection);
        let rows = sqlx::query(&format!("SELECT id, fields FROM {table}"))
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let raw: String = row.get("fields");
            let fields = serde_json::from_str(&raw).map_err(|e| {
                StoreError::Validation(format!("stored document {id:?} is not valid JSON: {e}"))
            })?;
            docs.push(Document::new(id, fields));
        }
        Ok(docs)
    }

    async fn upsert_merged(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        collection: Collection,
        id: &str,
        fields: &Value,
    ) -> Result<(), StoreError> {
        let table = Self::table(collection);
        let existing: Option<String> =
            sqlx::query_scalar(&format!("SELECT fields FROM {table} WHERE id = ?"))
                .bind(id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(store_err)?;

        let merged = match existing {
            Some(raw) => {
                let mut current: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
                merge_fields(&mut current, fields);
                current
            }
            None => fields.clone(),
        };
        let raw = serde_json::to_string(&merged).map_err(|e| StoreError::Unknown(e.to_string()))?;
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO {table} (id, fields) VALUES (?, ?)"
        ))
        .bind(id)
        .bind(&raw)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    /// Pushes a fresh snapshot to every live watcher of `collection`.
    async fn notify(&self, collection: Collection) {
        let has_watchers = {
            let watchers = self.watchers.lock().unwrap();
            watchers.get(&collection).is_some_and(|w| !w.is_empty())
        };
        if !has_watchers {
            return;
        }
        let docs = match self.fetch_all(collection).await {
            Ok(docs) => docs,
            Err(err) => {
                tracing::warn!(%collection, error = %err, "snapshot for listeners failed");
                return;
            }
        };
        let mut watchers = self.watchers.lock().unwrap();
        if let Some(list) = watchers.get_mut(&collection) {
            list.retain(|watcher| {
                let mut snapshot = docs.clone();
                if let Some(order_by) = &watcher.order_by {
                    sort_documents(&mut snapshot, order_by);
                }
                watcher.sender.send(Ok(snapshot)).is_ok()
            });
        }
    }
}

impl DocumentStore for SqliteStore {
    fn get(&self, collection: Collection) -> BoxFuture<'_, Result<Vec<Document>, StoreError>> {
        Box::pin(self.fetch_all(collection))
    }

    fn set_merge(
        &self,
        collection: Collection,
        id: String,
        fields: Value,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(store_err)?;
            Self::upsert_merged(&mut tx, collection, &id, &fields).await?;
            tx.commit().await.map_err(store_err)?;
            self.notify(collection).await;
            Ok(())
        })
    }

    fn commit(&self, ops: Vec<BatchOp>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut touched: Vec<Collection> = Vec::new();
            let mut tx = self.pool.begin().await.map_err(store_err)?;
            for op in &ops {
                if !touched.contains(&op.collection()) {
                    touched.push(op.collection());
                }
                match op {
                    BatchOp::SetMerge {
                        collection,
                        id,
                        fields,
                    } => {
                        Self::upsert_merged(&mut tx, *collection, id, fields).await?;
                    }
                    BatchOp::Delete { collection, id } => {
                        let table = Self::table(*collection);
                        sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
                            .bind(id)
                            .execute(&mut *tx)
                            .await
                            .map_err(store_err)?;
                    }
                }
            }
            tx.commit().await.map_err(store_err)?;
            for collection in touched {
                self.notify(collection).await;
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
            let mut initial = self.fetch_all(collection).await?;
            if let Some(order_by) = &order_by {
                sort_documents(&mut initial, order_by);
            }
            let (sender, receiver) = mpsc::unbounded_channel();
            let _ = sender.send(Ok(initial));
            self.watchers
                .lock()
                .unwrap()
                .entry(collection)
                .or_default()
                .push(Watcher { order_by, sender });
            Ok(Subscription::new(receiver))
        })
    }

    fn probe(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
            Ok(())
        })
    }
}

/// Document id for a legacy entry: its numeric id rendered as a string.
fn value_as_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Top-level key merge, matching the remote store's merge-write semantics.
fn merge_fields(current: &mut Value, incoming: &Value) {
    match (current.as_object_mut(), incoming.as_object()) {
        (Some(current), Some(incoming)) => {
            for (key, value) in incoming {
                current.insert(key.clone(), value.clone());
            }
        }
        _ => *current = incoming.clone(),
    }
}

fn store_err(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(e) => StoreError::Connection(e.to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Connection(err.to_string())
        }
        other => StoreError::Unknown(other.to_string()),
    }
}
