use serde::{Deserialize, Serialize};
use std::fmt;

/// A single dish on the shared menu.
///
/// The `id` doubles as the remote document key (stringified). `tag` is the
/// restaurant the item belongs to and is what the hidden-restaurant filter
/// matches against. `price` is free text as entered by the admin, so totals
/// are computed by stripping everything non-numeric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct MenuItem {
    pub id: i64,
    pub category: String,
    pub name: String,
    pub tag: String,
    pub subtitle: String,
    pub description: String,
    pub price: String,
    pub image: String,
}

impl MenuItem {
    pub fn new(
        id: i64,
        category: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            id,
            category: category.into(),
            name: name.into(),
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = subtitle.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_price(mut self, price: impl Into<String>) -> Self {
        self.price = price.into();
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Remote document id for this item.
    pub fn doc_id(&self) -> String {
        self.id.to_string()
    }

    /// Numeric value of the free-text price, for totals.
    ///
    /// Strips everything except digits and the decimal point, so "$12.50"
    /// and "12.50 CAD" both parse to 12.5. Unparseable prices count as 0.
    pub fn price_value(&self) -> f64 {
        let cleaned: String = self
            .price
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        cleaned.parse().unwrap_or(0.0)
    }
}

impl fmt::Display for MenuItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.price.is_empty() {
            write!(f, " - {}", self.price)?;
        }
        if !self.tag.is_empty() {
            write!(f, " ({})", self.tag)?;
        }
        Ok(())
    }
}
