use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::menu_item::MenuItem;

/// A placed order.
///
/// `items` holds a snapshot copy of each selected menu item taken at the
/// moment the order was placed. Editing or deleting a menu item afterwards
/// must never change an existing order, so the snapshot is the record.
///
/// The `id` is the creation timestamp in milliseconds and doubles as the
/// remote document key. `summary` (serialized as `order`) is the
/// comma-joined item names, kept denormalized for quick display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Order {
    pub id: i64,
    pub name: String,
    #[serde(rename = "order")]
    pub summary: String,
    pub items: Vec<MenuItem>,
    pub date: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            summary: String::new(),
            items: Vec::new(),
            date: String::new(),
            created_at: DateTime::UNIX_EPOCH,
        }
    }
}

impl Order {
    /// Creates an order for `customer` from the given menu selection.
    ///
    /// Each selected item is cloned into the order so that later menu edits
    /// cannot reach back into it.
    pub fn place(customer: impl Into<String>, selection: &[MenuItem]) -> Self {
        let now = Utc::now();
        Self {
            id: now.timestamp_millis(),
            name: customer.into(),
            summary: selection
                .iter()
                .map(|item| item.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            items: selection.to_vec(),
            date: now.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string(),
            created_at: now,
        }
    }

    /// Remote document id for this order.
    pub fn doc_id(&self) -> String {
        self.id.to_string()
    }

    /// Total price across the snapshotted line items.
    pub fn total(&self) -> f64 {
        self.items.iter().map(|item| item.price_value()).sum()
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} - {}", self.name, self.date)?;
        for item in &self.items {
            writeln!(f, "  - {}", item)?;
        }
        write!(f, "  Total: ${:.2}", self.total())
    }
}
