//! Backup export/import and order CSV reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{MenuItem, Order};

/// Backup format version written by this build.
pub const BACKUP_VERSION: &str = "1.0";

/// Byte-order mark so spreadsheet apps read the CSV as UTF-8.
const UTF8_BOM: &str = "\u{feff}";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unsupported backup version {0:?} (expected {BACKUP_VERSION:?})")]
    UnsupportedVersion(String),
    #[error("backup serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A full data backup: the menu and all orders, with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub version: String,
    #[serde(rename = "exportDate")]
    pub export_date: DateTime<Utc>,
    #[serde(rename = "menuItems", default)]
    pub menu_items: Vec<MenuItem>,
    #[serde(default)]
    pub orders: Vec<Order>,
}

impl Backup {
    pub fn new(menu_items: Vec<MenuItem>, orders: Vec<Order>) -> Self {
        Self {
            version: BACKUP_VERSION.to_string(),
            export_date: Utc::now(),
            menu_items,
            orders,
        }
    }

    /// Pretty-printed JSON suitable for a downloadable file.
    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a backup and rejects versions this build does not know how
    /// to restore.
    pub fn from_json(json: &str) -> Result<Self, ExportError> {
        let backup: Backup = serde_json::from_str(json)?;
        if backup.version != BACKUP_VERSION {
            return Err(ExportError::UnsupportedVersion(backup.version));
        }
        Ok(backup)
    }

    /// Suggested file name, e.g. `lunchbox-backup-2026-08-30.json`.
    pub fn file_name(&self) -> String {
        format!("lunchbox-backup-{}.json", self.export_date.format("%Y-%m-%d"))
    }
}

/// Renders orders as CSV, one row per ordered line item, with a UTF-8 BOM
/// prefix.
pub fn orders_csv(orders: &[Order]) -> String {
    let mut out = String::from(UTF8_BOM);
    out.push_str("Date,Customer Name,Item Name,Item Price,Restaurant\r\n");
    for order in orders {
        for item in &order.items {
            let row = [
                order.date.as_str(),
                order.name.as_str(),
                item.name.as_str(),
                item.price.as_str(),
                item.tag.as_str(),
            ];
            let mut first = true;
            for field in row {
                if !first {
                    out.push(',');
                }
                first = false;
                out.push_str(&csv_field(field));
            }
            out.push_str("\r\n");
        }
    }
    out
}

/// Quotes a field when it contains a delimiter, quote, or newline,
/// doubling embedded quotes.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
