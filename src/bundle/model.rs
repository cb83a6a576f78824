//! Bundle definitions
//!
//! Bundle metadata lives in catalog metafields as loosely-typed JSON. It is
//! normalized here, at the boundary, into [`BundleDefinition`] values before
//! any reconciliation logic sees it.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::Metafield;

/// Metafield flagging a product or variant as a bundle
pub const IS_BUNDLE_KEY: &str = "is_bundle";

/// Metafield holding the linked component list
pub const LINKED_COMPONENTS_KEY: &str = "linked_components";

/// Metafield holding an explicit bundle price
pub const OVERRIDE_PRICE_KEY: &str = "override_price";

/// A component reference as stored, in either of its historical shapes
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LinkedComponentRef {
    /// Bare product id
    Legacy(i64),
    /// Object form; variant and quantity optional
    Structured {
        /// Referenced product
        #[serde(rename = "productId", alias = "product_id")]
        product_id: i64,
        /// Referenced variant
        #[serde(default, rename = "variantId", alias = "variant_id")]
        variant_id: Option<i64>,
        /// Units per bundle
        #[serde(default)]
        quantity: Option<i64>,
    },
}

impl LinkedComponentRef {
    /// Canonical form; missing or non-positive quantities become 1
    pub fn normalize(self) -> LinkedComponent {
        match self {
            LinkedComponentRef::Legacy(product_id) => LinkedComponent {
                product_id,
                variant_id: None,
                quantity: 1,
            },
            LinkedComponentRef::Structured {
                product_id,
                variant_id,
                quantity,
            } => LinkedComponent {
                product_id,
                variant_id,
                quantity: quantity.unwrap_or(1).max(1),
            },
        }
    }
}

/// A component of a bundle in canonical form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedComponent {
    /// Referenced product
    pub product_id: i64,
    /// Referenced variant; `None` means the product itself
    pub variant_id: Option<i64>,
    /// Units consumed per bundle unit (always >= 1)
    pub quantity: i64,
}

impl LinkedComponent {
    /// Stock location this component draws from
    pub fn item(&self) -> ItemRef {
        ItemRef {
            product_id: self.product_id,
            variant_id: self.variant_id,
        }
    }

    /// Whether this component draws from `item`
    ///
    /// A product-level component matches any variant of its product.
    pub fn references(&self, item: &ItemRef) -> bool {
        if self.product_id != item.product_id {
            return false;
        }
        match (self.variant_id, item.variant_id) {
            (None, _) => true,
            (Some(own), Some(other)) => own == other,
            (Some(_), None) => false,
        }
    }
}

/// Parse a stored component list
///
/// Entries that match neither shape are skipped with a warning.
pub fn parse_linked_components(raw: &str) -> Vec<LinkedComponent> {
    let values: Vec<serde_json::Value> = match serde_json::from_str(raw) {
        Ok(values) => values,
        Err(e) => {
            warn!(error = %e, "Linked component list is not a JSON array");
            return Vec::new();
        }
    };

    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<LinkedComponentRef>(value.clone()) {
            Ok(reference) => Some(reference.normalize()),
            Err(e) => {
                warn!(entry = %value, error = %e, "Skipping unrecognized linked component");
                None
            }
        })
        .collect()
}

/// A product or variant stock location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemRef {
    /// Product id
    pub product_id: i64,
    /// Variant id
    pub variant_id: Option<i64>,
}

impl ItemRef {
    /// A product-level location
    pub fn product(product_id: i64) -> Self {
        Self {
            product_id,
            variant_id: None,
        }
    }

    /// A variant-level location
    pub fn variant(product_id: i64, variant_id: i64) -> Self {
        Self {
            product_id,
            variant_id: Some(variant_id),
        }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_id {
            Some(variant_id) => write!(f, "{}:{}", self.product_id, variant_id),
            None => write!(f, "{}", self.product_id),
        }
    }
}

/// Where a bundle's own stock lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BundleTarget {
    /// Product-level bundle
    Product {
        /// Bundle product id
        product_id: i64,
    },
    /// Variant-level bundle
    Variant {
        /// Parent product id
        product_id: i64,
        /// Bundle variant id
        variant_id: i64,
    },
}

impl BundleTarget {
    /// Product id of the bundle
    pub fn product_id(&self) -> i64 {
        match self {
            BundleTarget::Product { product_id } | BundleTarget::Variant { product_id, .. } => {
                *product_id
            }
        }
    }

    /// The bundle's own stock location
    pub fn item(&self) -> ItemRef {
        match *self {
            BundleTarget::Product { product_id } => ItemRef::product(product_id),
            BundleTarget::Variant {
                product_id,
                variant_id,
            } => ItemRef::variant(product_id, variant_id),
        }
    }
}

impl fmt::Display for BundleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleTarget::Product { product_id } => write!(f, "product:{}", product_id),
            BundleTarget::Variant {
                product_id,
                variant_id,
            } => write!(f, "variant:{}:{}", product_id, variant_id),
        }
    }
}

/// An active bundle and its components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleDefinition {
    /// The bundle's own stock location
    pub target: BundleTarget,
    /// Components (never empty)
    pub components: Vec<LinkedComponent>,
    /// Explicit price overriding the component sum
    pub override_price: Option<f64>,
}

impl BundleDefinition {
    /// Identity key: `product:{id}` or `variant:{productId}:{variantId}`
    pub fn key(&self) -> String {
        self.target.to_string()
    }

    /// Build from the metafields of `target`
    ///
    /// Returns `None` unless `is_bundle` is true and at least one component
    /// is linked.
    pub fn from_metafields(target: BundleTarget, fields: &[Metafield]) -> Option<Self> {
        let value = |key: &str| {
            fields
                .iter()
                .find(|f| f.key == key)
                .map(|f| f.value.trim())
        };

        let is_bundle = value(IS_BUNDLE_KEY)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);
        if !is_bundle {
            return None;
        }

        let components = value(LINKED_COMPONENTS_KEY)
            .map(parse_linked_components)
            .unwrap_or_default();
        if components.is_empty() {
            warn!(bundle = %target, "Bundle flag set without linked components; ignoring");
            return None;
        }

        let override_price = value(OVERRIDE_PRICE_KEY)
            .filter(|v| !v.is_empty())
            .and_then(|v| match v.parse::<f64>() {
                Ok(price) if price >= 0.0 => Some(price),
                _ => {
                    warn!(bundle = %target, value = v, "Ignoring invalid override price");
                    None
                }
            });

        Some(Self {
            target,
            components,
            override_price,
        })
    }

    /// Whether any component draws from `item`
    pub fn references(&self, item: &ItemRef) -> bool {
        self.components.iter().any(|c| c.references(item))
    }

    /// Whether any component draws from `product_id` or one of `variant_ids`
    pub fn references_product(&self, product_id: i64, variant_ids: &HashSet<i64>) -> bool {
        self.components.iter().any(|c| {
            c.product_id == product_id
                || c.variant_id.map(|v| variant_ids.contains(&v)).unwrap_or(false)
        })
    }
}

/// Every active bundle of a store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleGraph {
    /// Product-level bundles
    pub product_bundles: Vec<BundleDefinition>,
    /// Variant-level bundles
    pub variant_bundles: Vec<BundleDefinition>,
    /// Whether the bundle category exists; when false the graph is empty and
    /// callers fall back to per-item metadata checks
    pub category_found: bool,
}

impl BundleGraph {
    /// All bundles, variant-level first
    pub fn all(&self) -> impl Iterator<Item = &BundleDefinition> {
        self.variant_bundles.iter().chain(self.product_bundles.iter())
    }

    /// The bundle whose own stock is `item`, variant-level taking precedence
    pub fn bundle_at(&self, item: &ItemRef) -> Option<&BundleDefinition> {
        if let Some(variant_id) = item.variant_id {
            let target = BundleTarget::Variant {
                product_id: item.product_id,
                variant_id,
            };
            if let Some(bundle) = self.variant_bundles.iter().find(|b| b.target == target) {
                return Some(bundle);
            }
        }
        let target = BundleTarget::Product {
            product_id: item.product_id,
        };
        self.product_bundles.iter().find(|b| b.target == target)
    }

    /// Bundles with a component drawing from `item`
    pub fn containing(&self, item: &ItemRef) -> Vec<&BundleDefinition> {
        self.all().filter(|b| b.references(item)).collect()
    }

    /// Total number of bundles
    pub fn len(&self) -> usize {
        self.product_bundles.len() + self.variant_bundles.len()
    }

    /// Whether there are no bundles
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fields(pairs: &[(&str, &str)]) -> Vec<Metafield> {
        pairs
            .iter()
            .map(|(k, v)| Metafield::new("bundle_app", k, *v))
            .collect()
    }

    #[test]
    fn test_parse_mixed_shapes() {
        let components = parse_linked_components(
            r#"[12, {"productId": 13, "variantId": 4, "quantity": 3}, {"product_id": 14}]"#,
        );

        assert_eq!(
            components,
            vec![
                LinkedComponent {
                    product_id: 12,
                    variant_id: None,
                    quantity: 1
                },
                LinkedComponent {
                    product_id: 13,
                    variant_id: Some(4),
                    quantity: 3
                },
                LinkedComponent {
                    product_id: 14,
                    variant_id: None,
                    quantity: 1
                },
            ]
        );
    }

    #[test]
    fn test_non_positive_quantity_normalized() {
        let components = parse_linked_components(r#"[{"productId": 1, "quantity": 0}]"#);
        assert_eq!(components[0].quantity, 1);
    }

    #[test]
    fn test_invalid_entries_skipped() {
        let components = parse_linked_components(r#"["abc", {"sku": "x"}, 5]"#);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].product_id, 5);
    }

    #[test]
    fn test_not_an_array() {
        assert!(parse_linked_components("{oops").is_empty());
    }

    #[test]
    fn test_from_metafields_active() {
        let bundle = BundleDefinition::from_metafields(
            BundleTarget::Product { product_id: 50 },
            &fields(&[
                ("is_bundle", "true"),
                ("linked_components", r#"[{"productId": 1, "quantity": 2}]"#),
                ("override_price", "19.99"),
            ]),
        )
        .unwrap();

        assert_eq!(bundle.key(), "product:50");
        assert_eq!(bundle.components.len(), 1);
        assert_eq!(bundle.override_price, Some(19.99));
    }

    #[test]
    fn test_flag_without_components_is_inactive() {
        let bundle = BundleDefinition::from_metafields(
            BundleTarget::Product { product_id: 50 },
            &fields(&[("is_bundle", "true"), ("linked_components", "[]")]),
        );
        assert!(bundle.is_none());
    }

    #[test]
    fn test_flag_false_is_inactive() {
        let bundle = BundleDefinition::from_metafields(
            BundleTarget::Product { product_id: 50 },
            &fields(&[("is_bundle", "false"), ("linked_components", "[1]")]),
        );
        assert!(bundle.is_none());
    }

    #[test]
    fn test_variant_key() {
        let target = BundleTarget::Variant {
            product_id: 5,
            variant_id: 9,
        };
        assert_eq!(target.to_string(), "variant:5:9");
    }

    #[test]
    fn test_component_references() {
        let product_level = LinkedComponent {
            product_id: 1,
            variant_id: None,
            quantity: 1,
        };
        let variant_level = LinkedComponent {
            product_id: 1,
            variant_id: Some(7),
            quantity: 1,
        };

        assert!(product_level.references(&ItemRef::variant(1, 7)));
        assert!(product_level.references(&ItemRef::product(1)));
        assert!(variant_level.references(&ItemRef::variant(1, 7)));
        assert!(!variant_level.references(&ItemRef::variant(1, 8)));
        assert!(!variant_level.references(&ItemRef::product(1)));
    }

    #[test]
    fn test_graph_variant_precedence() {
        let component = LinkedComponent {
            product_id: 1,
            variant_id: None,
            quantity: 1,
        };
        let graph = BundleGraph {
            product_bundles: vec![BundleDefinition {
                target: BundleTarget::Product { product_id: 50 },
                components: vec![component],
                override_price: None,
            }],
            variant_bundles: vec![BundleDefinition {
                target: BundleTarget::Variant {
                    product_id: 50,
                    variant_id: 3,
                },
                components: vec![component],
                override_price: None,
            }],
            category_found: true,
        };

        assert_eq!(
            graph.bundle_at(&ItemRef::variant(50, 3)).unwrap().key(),
            "variant:50:3"
        );
        assert_eq!(
            graph.bundle_at(&ItemRef::variant(50, 4)).unwrap().key(),
            "product:50"
        );
        assert_eq!(graph.containing(&ItemRef::product(1)).len(), 2);
    }
}
