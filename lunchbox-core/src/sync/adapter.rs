//! Retry-wrapping adapter over a [`DocumentStore`].
//!
//! Every read and write goes through the shared [`RetryPolicy`]; connection
//! outcomes feed the [`ConnectionTracker`]. Batched commits are chunked to
//! stay under the backing store's per-batch operation limit and issued
//! sequentially with a short pause between chunks.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;

use crate::store::{
    BatchOp, Collection, Document, DocumentStore, OrderBy, StoreError, Subscription,
};

use super::connection::{ConnectionState, ConnectionTracker};
use super::retry::RetryPolicy;

/// Per-batch operation limit of the backing store.
pub const BATCH_LIMIT: usize = 500;

/// Pause between sequential batch chunks, to avoid flooding the write
/// pipeline.
const BATCH_PAUSE: Duration = Duration::from_millis(200);

pub struct RemoteStoreAdapter<S> {
    store: Arc<S>,
    retry: RetryPolicy,
    tracker: ConnectionTracker,
    batch_limit: usize,
    batch_pause: Duration,
}

impl<S: DocumentStore> RemoteStoreAdapter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            tracker: ConnectionTracker::new(),
            batch_limit: BATCH_LIMIT,
            batch_pause: BATCH_PAUSE,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        assert!(limit > 0, "batch limit must be positive");
        self.batch_limit = limit;
        self
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    /// Shared connection tracker (clone to observe state changes).
    pub fn connection(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Reads all documents in a collection, retrying connection failures.
    pub async fn get(&self, collection: Collection) -> Result<Vec<Document>, StoreError> {
        self.retry
            .run("get", || self.call_get(collection))
            .await
    }

    /// Merge-writes one document, retrying connection failures.
    pub async fn set_merge(
        &self,
        collection: Collection,
        id: &str,
        fields: Value,
    ) -> Result<(), StoreError> {
        self.retry
            .run("set_merge", || {
                self.call_set_merge(collection, id.to_string(), fields.clone())
            })
            .await
    }

    /// Commits a batch, chunked at the store's operation limit. Chunks are
    /// issued sequentially with a pause in between; each chunk is retried
    /// independently. Returns the number of chunks committed.
    pub async fn commit(&self, ops: Vec<BatchOp>) -> Result<usize, StoreError> {
        if ops.is_empty() {
            return Ok(0);
        }
        let chunks: Vec<Vec<BatchOp>> = ops
            .chunks(self.batch_limit)
            .map(|chunk| chunk.to_vec())
            .collect();
        let total = chunks.len();
        tracing::debug!(chunks = total, "committing batch");
        for (index, chunk) in chunks.into_iter().enumerate() {
            if index > 0 {
                sleep(self.batch_pause).await;
            }
            self.retry
                .run("commit", || self.call_commit(chunk.clone()))
                .await?;
        }
        Ok(total)
    }

    /// Opens a live subscription. Listener errors are not retried here;
    /// the listener manager owns reconnection and fallback.
    pub async fn listen(
        &self,
        collection: Collection,
        order_by: Option<OrderBy>,
    ) -> Result<Subscription, StoreError> {
        let result = self.store.listen(collection, order_by).await;
        self.observe(result.as_ref().err());
        result
    }

    async fn call_get(&self, collection: Collection) -> Result<Vec<Document>, StoreError> {
        self.reprobe().await;
        let result = self.store.get(collection).await;
        self.observe(result.as_ref().err());
        result
    }

    async fn call_set_merge(
        &self,
        collection: Collection,
        id: String,
        fields: Value,
    ) -> Result<(), StoreError> {
        self.reprobe().await;
        let result = self.store.set_merge(collection, id, fields).await;
        self.observe(result.as_ref().err());
        result
    }

    async fn call_commit(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        self.reprobe().await;
        let result = self.store.commit(ops).await;
        self.observe(result.as_ref().err());
        result
    }

    /// Attempts to re-establish connectivity before a call when the last
    /// outcome marked us offline.
    async fn reprobe(&self) {
        if self.tracker.state() == ConnectionState::Offline
            && self.store.probe().await.is_ok()
        {
            self.tracker.set(ConnectionState::Unknown);
        }
    }

    fn observe(&self, err: Option<&StoreError>) {
        match err {
            None => self.tracker.set(ConnectionState::Online),
            Some(e) if e.is_connection() => self.tracker.set(ConnectionState::Offline),
            Some(_) => {}
        }
    }
}
