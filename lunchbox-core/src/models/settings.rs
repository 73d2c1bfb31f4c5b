use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Document id of the hidden-restaurant list in the `settings` collection.
pub const HIDDEN_RESTAURANTS_DOC_ID: &str = "hiddenRestaurants";

/// The set of restaurant tags hidden from the customer-facing menu.
///
/// Hiding a restaurant filters its items out of rendering and out of the
/// restaurant filter; the underlying menu records stay untouched, so
/// unhiding restores everything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct HiddenRestaurants {
    pub tags: BTreeSet<String>,
}

impl HiddenRestaurants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hides a restaurant tag. Returns false if it was already hidden.
    pub fn hide(&mut self, tag: impl Into<String>) -> bool {
        self.tags.insert(tag.into())
    }

    /// Unhides a restaurant tag. Returns false if it was not hidden.
    pub fn unhide(&mut self, tag: &str) -> bool {
        self.tags.remove(tag)
    }

    pub fn is_hidden(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}
