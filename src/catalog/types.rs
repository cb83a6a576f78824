//! Catalog wire types
//!
//! Strongly-typed representations of the order and catalog resources read
//! from (and written to) the commerce platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Order status ids used by the platform
pub mod status {
    /// Fully refunded
    pub const REFUNDED: u32 = 4;
    /// Cancelled
    pub const CANCELLED: u32 = 5;
    /// Partially refunded
    pub const PARTIALLY_REFUNDED: u32 = 14;
}

// =============================================================================
// Orders
// =============================================================================

/// Order detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Order id
    pub id: i64,
    /// Numeric status id
    pub status_id: u32,
    /// Human-readable status
    #[serde(default)]
    pub status: String,
    /// Creation time (RFC 2822 on the wire)
    #[serde(with = "rfc2822")]
    pub date_created: DateTime<Utc>,
    /// Last modification time (RFC 2822 on the wire)
    #[serde(with = "rfc2822")]
    pub date_modified: DateTime<Utc>,
}

/// One order line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderProduct {
    /// Line id
    #[serde(default)]
    pub id: i64,
    /// Ordered product
    pub product_id: i64,
    /// Ordered variant, when the platform reports one
    #[serde(default, deserialize_with = "zero_as_none")]
    pub variant_id: Option<i64>,
    /// Ordered quantity
    pub quantity: i64,
    /// Quantity refunded so far
    #[serde(default)]
    pub quantity_refunded: i64,
    /// Line name
    #[serde(default)]
    pub name: String,
    /// Unit price including tax
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price_inc_tax: f64,
}

// =============================================================================
// Catalog
// =============================================================================

/// Category summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Category id
    pub id: i64,
    /// Category name
    pub name: String,
}

/// Product detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Product id
    pub id: i64,
    /// Product name
    #[serde(default)]
    pub name: String,
    /// Current stock
    #[serde(default)]
    pub inventory_level: i64,
    /// Base price
    #[serde(default)]
    pub price: f64,
    /// Shipping weight
    #[serde(default)]
    pub weight: f64,
    /// Variants, when requested with `include=variants`
    #[serde(default)]
    pub variants: Vec<Variant>,
}

/// Variant detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Variant id
    pub id: i64,
    /// Parent product id
    pub product_id: i64,
    /// Current stock
    #[serde(default)]
    pub inventory_level: i64,
    /// Explicit variant price (null inherits the product price)
    #[serde(default)]
    pub price: Option<f64>,
    /// Price after inheritance and rules
    #[serde(default)]
    pub calculated_price: Option<f64>,
    /// Explicit variant weight (null inherits the product weight)
    #[serde(default)]
    pub weight: Option<f64>,
    /// Weight after inheritance
    #[serde(default)]
    pub calculated_weight: Option<f64>,
}

impl Variant {
    /// Price used for bundle sums
    pub fn effective_price(&self) -> f64 {
        self.price.or(self.calculated_price).unwrap_or(0.0)
    }

    /// Weight used for bundle sums
    pub fn effective_weight(&self) -> f64 {
        self.weight.or(self.calculated_weight).unwrap_or(0.0)
    }
}

/// Key/value metadata attached to a product or variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metafield {
    /// Key within the namespace
    pub key: String,
    /// Raw string value
    pub value: String,
    /// Owning namespace
    #[serde(default)]
    pub namespace: String,
}

impl Metafield {
    /// Build a metafield
    pub fn new(namespace: &str, key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
            namespace: namespace.to_string(),
        }
    }
}

// =============================================================================
// Writes
// =============================================================================

/// Product-level inventory write (one element of a batch PUT)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInventoryUpdate {
    /// Product id
    pub id: i64,
    /// New stock
    pub inventory_level: i64,
    /// New price, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// New weight, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// Variant-level inventory write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantInventoryUpdate {
    /// New stock
    pub inventory_level: i64,
    /// New price, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// New weight, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

// =============================================================================
// Serde helpers
// =============================================================================

mod rfc2822 {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc2822())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc2822(&raw)
            .or_else(|_| DateTime::parse_from_rfc3339(&raw))
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// The platform reports `0` for "no variant" on some order lines
fn zero_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Option::<i64>::deserialize(deserializer)?;
    Ok(value.filter(|v| *v != 0))
}

/// Prices arrive either as numbers or as decimal strings
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(0.0),
        Some(NumberOrString::Number(n)) => Ok(n),
        Some(NumberOrString::Text(s)) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
