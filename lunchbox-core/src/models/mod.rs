//! Shared data models for Lunchbox.

mod menu_item;
mod order;
mod settings;

pub use menu_item::MenuItem;
pub use order::Order;
pub use settings::{HiddenRestaurants, HIDDEN_RESTAURANTS_DOC_ID};
