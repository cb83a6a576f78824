//! Per-request inventory aggregation
//!
//! Every order line is folded in before anything is written, so several lines
//! drawing on the same component produce one write.

use std::collections::{BTreeMap, BTreeSet};

use crate::bundle::{BundleDefinition, BundleTarget, ItemRef};

/// Component deductions and bundles awaiting recalculation
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InventoryAdjustments {
    deductions: BTreeMap<ItemRef, i64>,
    touched: BTreeSet<ItemRef>,
    recalc: BTreeMap<BundleTarget, BundleDefinition>,
}

impl InventoryAdjustments {
    /// Start empty
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in a bundle line that moved by `delta` units
    ///
    /// A positive delta deducts `delta * quantity` from every component, a
    /// negative one restores. The bundle is queued even when `delta` is zero.
    pub fn add_bundle_line(&mut self, bundle: &BundleDefinition, delta: i64) {
        if delta != 0 {
            for component in &bundle.components {
                let entry = self.deductions.entry(component.item()).or_insert(0);
                *entry = entry.saturating_add(delta.saturating_mul(component.quantity));
            }
        }
        self.queue(bundle);
    }

    /// Record a plain item whose stock the platform moved itself
    pub fn add_plain_line(&mut self, item: ItemRef) {
        self.touched.insert(item);
    }

    /// Queue a bundle for recalculation; repeats collapse
    pub fn queue(&mut self, bundle: &BundleDefinition) {
        self.recalc
            .entry(bundle.target)
            .or_insert_with(|| bundle.clone());
    }

    /// Net deductions per component, zero entries omitted
    pub fn deductions(&self) -> impl Iterator<Item = (ItemRef, i64)> + '_ {
        self.deductions
            .iter()
            .filter(|(_, amount)| **amount != 0)
            .map(|(item, amount)| (*item, *amount))
    }

    /// Plain items moved by the platform
    pub fn touched(&self) -> impl Iterator<Item = ItemRef> + '_ {
        self.touched.iter().copied()
    }

    /// Bundles queued for recalculation
    pub fn bundles(&self) -> impl Iterator<Item = &BundleDefinition> {
        self.recalc.values()
    }

    /// Number of queued bundles
    pub fn bundle_count(&self) -> usize {
        self.recalc.len()
    }

    /// Whether nothing needs writing
    pub fn is_empty(&self) -> bool {
        self.deductions().next().is_none() && self.touched.is_empty() && self.recalc.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::LinkedComponent;

    fn bundle(id: i64, components: &[(i64, i64)]) -> BundleDefinition {
        BundleDefinition {
            target: BundleTarget::Product { product_id: id },
            components: components
                .iter()
                .map(|(product_id, quantity)| LinkedComponent {
                    product_id: *product_id,
                    variant_id: None,
                    quantity: *quantity,
                })
                .collect(),
            override_price: None,
        }
    }

    #[test]
    fn test_lines_coalesce_per_component() {
        let mut adjustments = InventoryAdjustments::new();
        adjustments.add_bundle_line(&bundle(50, &[(1, 2), (2, 1)]), 3);
        adjustments.add_bundle_line(&bundle(51, &[(1, 1)]), 1);

        let deductions: Vec<_> = adjustments.deductions().collect();
        assert_eq!(
            deductions,
            vec![(ItemRef::product(1), 7), (ItemRef::product(2), 3)]
        );
        assert_eq!(adjustments.bundle_count(), 2);
    }

    #[test]
    fn test_restore_cancels_deduction() {
        let mut adjustments = InventoryAdjustments::new();
        let b = bundle(50, &[(1, 2)]);
        adjustments.add_bundle_line(&b, 2);
        adjustments.add_bundle_line(&b, -2);

        assert_eq!(adjustments.deductions().count(), 0);
        assert_eq!(adjustments.bundle_count(), 1);
    }

    #[test]
    fn test_huge_quantities_saturate() {
        let mut adjustments = InventoryAdjustments::new();
        let b = bundle(50, &[(1, i64::MAX / 2)]);
        adjustments.add_bundle_line(&b, 3);
        adjustments.add_bundle_line(&b, 3);

        let deductions: Vec<_> = adjustments.deductions().collect();
        assert_eq!(deductions, vec![(ItemRef::product(1), i64::MAX)]);
    }

    #[test]
    fn test_zero_delta_still_queues_bundle() {
        let mut adjustments = InventoryAdjustments::new();
        adjustments.add_bundle_line(&bundle(50, &[(1, 2)]), 0);

        assert_eq!(adjustments.deductions().count(), 0);
        assert_eq!(adjustments.bundle_count(), 1);
        assert!(!adjustments.is_empty());
    }
}
