//! The sync engine: everything between application state and the
//! document store.
//!
//! Layered bottom-up: [`ConnectionTracker`] shares reachability state,
//! [`RetryPolicy`] retries transient failures with backoff,
//! [`RemoteStoreAdapter`] wraps a [`crate::store::DocumentStore`] with
//! retries, batch chunking, and connection probing, [`WriteSerializer`]
//! runs writes one at a time per collection, and [`ListenerManager`]
//! keeps live subscriptions alive across failures.

mod adapter;
mod connection;
mod listener;
mod retry;
mod serializer;

pub use adapter::RemoteStoreAdapter;
pub use connection::{ConnectionState, ConnectionTracker};
pub use listener::{
    decode_hidden_restaurants, decode_menu_items, decode_orders, ListenerManager, ListenerPhase,
    SubscriptionHandle,
};
pub use retry::RetryPolicy;
pub use serializer::{WriteRequest, WriteSerializer};
