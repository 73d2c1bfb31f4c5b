//! Lunchbox Core Library
//!
//! Shared data model, document-store abstraction, and sync engine for
//! Lunchbox applications.

pub mod admin;
pub mod controller;
pub mod export;
pub mod models;
pub mod state;
pub mod store;
pub mod sync;

pub use admin::AdminGate;
pub use controller::{Controller, ControllerError};
pub use export::{orders_csv, Backup, ExportError, BACKUP_VERSION};
pub use models::{HiddenRestaurants, MenuItem, Order, HIDDEN_RESTAURANTS_DOC_ID};
pub use store::{
    sort_documents, BatchOp, Collection, Document, DocumentStore, MemoryStore, OrderBy,
    SortDirection, StoreError, Subscription,
};
pub use sync::{
    ConnectionState, ConnectionTracker, ListenerManager, ListenerPhase, RemoteStoreAdapter,
    RetryPolicy, SubscriptionHandle, WriteRequest, WriteSerializer,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
