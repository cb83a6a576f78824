//! Order delta computation
//!
//! Diffs two order snapshots line by line. Lines are matched by
//! product/variant identity, never by position, so the result does not
//! depend on the order in which the platform lists them.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::history::OrderItem;

/// How a line changed between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Only in the current snapshot
    Added,
    /// Only in the previous snapshot
    Removed,
    /// In both, with a different quantity
    Modified,
    /// In both, same quantity
    Unchanged,
}

/// Signed quantity change of one order line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDelta {
    /// Product id
    pub product_id: i64,
    /// Variant id
    pub variant_id: Option<i64>,
    /// Quantity in the previous snapshot
    pub old_quantity: i64,
    /// Quantity in the current snapshot
    pub new_quantity: i64,
    /// `new_quantity - old_quantity`
    pub quantity_delta: i64,
    /// Change classification
    pub change_type: ChangeType,
    /// Line name
    pub name: String,
}

impl OrderDelta {
    /// Whether this line moves any stock
    pub fn is_noop(&self) -> bool {
        self.quantity_delta == 0
    }
}

/// Diff `previous` against `current`
///
/// A `None` previous means the order has never been seen: every current line
/// is `Added`. When the same line key appears more than once in a list the
/// quantities are summed. Output is sorted by line key.
pub fn diff(previous: Option<&[OrderItem]>, current: &[OrderItem]) -> Vec<OrderDelta> {
    let previous = index(previous.unwrap_or(&[]));
    let current = index(current);

    let keys: BTreeSet<&String> = previous.keys().chain(current.keys()).collect();

    keys.into_iter()
        .map(|key| match (previous.get(key), current.get(key)) {
            (None, Some(now)) => delta(now, 0, now.quantity, ChangeType::Added),
            (Some(before), None) => delta(before, before.quantity, 0, ChangeType::Removed),
            (Some(before), Some(now)) => {
                let change = if before.quantity == now.quantity {
                    ChangeType::Unchanged
                } else {
                    ChangeType::Modified
                };
                delta(now, before.quantity, now.quantity, change)
            }
            (None, None) => unreachable!("key came from one of the two maps"),
        })
        .collect()
}

/// Deltas that give back everything in `items`
pub fn restore_all(items: &[OrderItem]) -> Vec<OrderDelta> {
    diff(Some(items), &[])
}

fn index(items: &[OrderItem]) -> HashMap<String, OrderItem> {
    let mut map: HashMap<String, OrderItem> = HashMap::with_capacity(items.len());
    for item in items {
        map.entry(item.line_key())
            .and_modify(|existing| existing.quantity += item.quantity)
            .or_insert_with(|| item.clone());
    }
    map
}

fn delta(item: &OrderItem, old_quantity: i64, new_quantity: i64, change_type: ChangeType) -> OrderDelta {
    OrderDelta {
        product_id: item.product_id,
        variant_id: item.variant_id,
        old_quantity,
        new_quantity,
        quantity_delta: new_quantity - old_quantity,
        change_type,
        name: item.name.clone(),
    }
}
