//! Order-event pipeline
//!
//! ```text
//! ORDER_CLASSIFIED → ITEMS_RESOLVED → DELTAS_COMPUTED → INVENTORY_AGGREGATED
//!                  → WRITES_APPLIED → BUNDLES_RECALCULATED → DONE
//! ```
//!
//! Only failing to read the order itself aborts the pipeline. Every later
//! failure is logged and isolated to the item it concerns.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::bundle::{
    BundleGraphResolver, ComponentSource, InventoryRecalculator, InventoryWrite, ItemRef,
};
use crate::catalog::{CatalogClient, CatalogResult, OrderProduct};
use crate::config::ReconcileSettings;
use crate::delta::{diff, restore_all, OrderDelta};
use crate::history::{OrderHistoryStore, OrderItem, OrderSnapshot};
use crate::reconcile::aggregate::InventoryAdjustments;
use crate::reconcile::lifecycle::{classify, OrderLifecycle};
use crate::reconcile::ReconcileSummary;

/// Deltas to apply and the snapshot to persist afterwards
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaPlan {
    /// Signed line changes
    pub deltas: Vec<OrderDelta>,
    /// Lines stored as the new baseline
    pub snapshot: Vec<OrderItem>,
}

/// Decide what an order update means for inventory
///
/// - New: full quantities, unless a snapshot already exists (a redelivery
///   or an edit inside the new-order window), in which case it is diffed.
/// - Cancelled: everything in the stored snapshot is given back; the new
///   baseline is empty so a repeat restores nothing.
/// - Partially refunded: refunded units are given back; the baseline holds
///   net quantities.
/// - Edited: diff against the stored snapshot.
pub fn plan_deltas(
    lifecycle: OrderLifecycle,
    previous: Option<&OrderSnapshot>,
    lines: &[OrderProduct],
) -> DeltaPlan {
    let previous_items = previous.map(|s| s.items.as_slice());

    match lifecycle {
        OrderLifecycle::New | OrderLifecycle::Edited => {
            let current: Vec<OrderItem> = lines.iter().map(OrderItem::from).collect();
            if lifecycle == OrderLifecycle::New && previous_items.is_some() {
                debug!("New order already has a snapshot; diffing against it");
            }
            DeltaPlan {
                deltas: diff(previous_items, &current),
                snapshot: current,
            }
        }
        OrderLifecycle::Cancelled => DeltaPlan {
            deltas: previous_items.map(restore_all).unwrap_or_default(),
            snapshot: Vec::new(),
        },
        OrderLifecycle::PartiallyRefunded => {
            let ordered: Vec<OrderItem> = lines.iter().map(OrderItem::from).collect();
            let net: Vec<OrderItem> = lines
                .iter()
                .filter_map(|line| {
                    let remaining = line.quantity.saturating_sub(line.quantity_refunded);
                    (remaining > 0).then(|| OrderItem::from(line).with_quantity(remaining))
                })
                .collect();
            let baseline = previous_items.unwrap_or(ordered.as_slice());
            DeltaPlan {
                deltas: diff(Some(baseline), &net),
                snapshot: net,
            }
        }
    }
}

/// Component stock after taking `deduction` units from the live level
///
/// Negative deductions restore. The result never drops below zero.
pub fn adjusted_level(live: i64, deduction: i64) -> i64 {
    live.saturating_sub(deduction).max(0)
}

/// One run of the order pipeline against one store
pub(crate) struct OrderPipeline<'a> {
    pub catalog: Arc<dyn CatalogClient>,
    pub history: &'a dyn OrderHistoryStore,
    pub settings: &'a ReconcileSettings,
}

impl OrderPipeline<'_> {
    #[instrument(skip(self), fields(lifecycle = tracing::field::Empty))]
    pub async fn run(&self, order_id: i64, store_id: &str) -> CatalogResult<ReconcileSummary> {
        let order = self.catalog.get_order(order_id).await?;
        let lines = self.catalog.get_order_products(order_id).await?;
        let lifecycle = classify(&order, self.settings.new_order_window);
        tracing::Span::current().record("lifecycle", lifecycle.as_str());
        debug!(stage = "ORDER_CLASSIFIED", lines = lines.len(), "Order classified");

        let previous = match self.history.load(order_id, store_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Snapshot unreadable; treating order as unseen");
                None
            }
        };
        if lifecycle == OrderLifecycle::Cancelled && previous.is_none() {
            info!("Cancelled order has no snapshot; nothing to restore");
        }

        let plan = plan_deltas(lifecycle, previous.as_ref(), &lines);
        debug!(stage = "DELTAS_COMPUTED", deltas = plan.deltas.len(), "Deltas computed");

        let mut resolver =
            BundleGraphResolver::new(self.catalog.clone(), self.settings.bundle_category.clone());
        let mut adjustments = InventoryAdjustments::new();
        let mut moved = 0;

        for delta in &plan.deltas {
            let item = ItemRef {
                product_id: delta.product_id,
                variant_id: delta.variant_id,
            };
            if !delta.is_noop() {
                moved += 1;
            }
            match resolver.bundle_at(item).await {
                Some(bundle) => adjustments.add_bundle_line(&bundle, delta.quantity_delta),
                None if delta.is_noop() => {}
                None => adjustments.add_plain_line(item),
            }
        }
        debug!(
            stage = "INVENTORY_AGGREGATED",
            components = adjustments.deductions().count(),
            bundles = adjustments.bundle_count(),
            "Inventory aggregated"
        );

        let recalculator =
            InventoryRecalculator::new(self.catalog.clone(), self.settings.product_batch_size);

        let mut writes = Vec::new();
        let mut adjusted = Vec::new();
        for (item, deduction) in adjustments.deductions() {
            match recalculator.components().fetch(item).await {
                Ok(stock) => {
                    let level = adjusted_level(stock.inventory_level, deduction);
                    debug!(item = %item, from = stock.inventory_level, to = level, "Adjusting component");
                    writes.push(InventoryWrite::stock(item, level));
                    adjusted.push(item);
                }
                Err(e) => error!(item = %item, error = %e, "Component read failed; adjustment skipped"),
            }
        }
        let component_writes = recalculator.write(writes).await;
        debug!(
            stage = "WRITES_APPLIED",
            written = component_writes.written,
            failed = component_writes.failed,
            "Component writes applied"
        );

        let changed: Vec<ItemRef> = adjusted.into_iter().chain(adjustments.touched()).collect();
        for item in changed {
            for bundle in resolver.bundles_containing(item).await {
                adjustments.queue(&bundle);
            }
        }

        let recalc = recalculator.recalculate(adjustments.bundles()).await;
        debug!(stage = "BUNDLES_RECALCULATED", bundles = recalc.bundles, "Bundles recalculated");

        let snapshot = OrderSnapshot::new(order_id, store_id, plan.snapshot);
        if let Err(e) = self.history.save(&snapshot).await {
            error!(error = %e, "Failed to store order snapshot");
        }

        let summary = ReconcileSummary {
            lifecycle: Some(lifecycle),
            deltas: moved,
            components_adjusted: component_writes.written,
            bundles_recalculated: recalc.bundles,
            bundles_zeroed: recalc.incomplete,
            failed_writes: component_writes.failed + recalc.writes.failed,
        };
        info!(
            deltas = summary.deltas,
            components_adjusted = summary.components_adjusted,
            bundles_recalculated = summary.bundles_recalculated,
            failed_writes = summary.failed_writes,
            "Order reconciled"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::ChangeType;
    use pretty_assertions::assert_eq;

    fn line(product_id: i64, quantity: i64, refunded: i64) -> OrderProduct {
        OrderProduct {
            id: product_id,
            product_id,
            variant_id: None,
            quantity,
            quantity_refunded: refunded,
            name: format!("Item {}", product_id),
            price_inc_tax: 1.0,
        }
    }

    fn snapshot(items: &[(i64, i64)]) -> OrderSnapshot {
        OrderSnapshot::new(
            7,
            "store",
            items
                .iter()
                .map(|(product_id, quantity)| OrderItem {
                    product_id: *product_id,
                    variant_id: None,
                    quantity: *quantity,
                    name: format!("Item {}", product_id),
                    price_inc_tax: 1.0,
                })
                .collect(),
        )
    }

    #[test]
    fn test_adjusted_level() {
        assert_eq!(adjusted_level(10, 4), 6);
        assert_eq!(adjusted_level(10, -4), 14);
        assert_eq!(adjusted_level(3, 5), 0);
        assert_eq!(adjusted_level(5, i64::MIN), i64::MAX);
        assert_eq!(adjusted_level(-5, i64::MAX), 0);
    }

    fn quantities(deltas: &[OrderDelta]) -> Vec<(i64, i64)> {
        deltas
            .iter()
            .map(|d| (d.product_id, d.quantity_delta))
            .collect()
    }

    #[test]
    fn test_new_order_deducts_full_quantities() {
        let plan = plan_deltas(OrderLifecycle::New, None, &[line(1, 2, 0), line(2, 1, 0)]);
        assert_eq!(quantities(&plan.deltas), vec![(1, 2), (2, 1)]);
        assert_eq!(plan.snapshot.len(), 2);
    }

    #[test]
    fn test_new_order_with_snapshot_is_diffed() {
        let previous = snapshot(&[(1, 2)]);
        let plan = plan_deltas(OrderLifecycle::New, Some(&previous), &[line(1, 2, 0)]);
        assert_eq!(plan.deltas[0].change_type, ChangeType::Unchanged);
        assert!(plan.deltas[0].is_noop());
    }

    #[test]
    fn test_cancel_restores_stored_snapshot() {
        let previous = snapshot(&[(1, 2)]);
        // The wire may already show zeroed lines.
        let plan = plan_deltas(OrderLifecycle::Cancelled, Some(&previous), &[line(1, 0, 0)]);

        assert_eq!(quantities(&plan.deltas), vec![(1, -2)]);
        assert!(plan.snapshot.is_empty());
    }

    #[test]
    fn test_repeat_cancel_restores_nothing() {
        let previous = snapshot(&[]);
        let plan = plan_deltas(OrderLifecycle::Cancelled, Some(&previous), &[line(1, 2, 0)]);
        assert!(plan.deltas.is_empty());
    }

    #[test]
    fn test_partial_refund_without_snapshot() {
        let plan = plan_deltas(
            OrderLifecycle::PartiallyRefunded,
            None,
            &[line(1, 3, 1), line(2, 2, 0)],
        );

        assert_eq!(quantities(&plan.deltas), vec![(1, -1), (2, 0)]);
        assert_eq!(plan.snapshot[0].quantity, 2);
    }

    #[test]
    fn test_partial_refund_then_cancel_restores_balance() {
        let first = plan_deltas(
            OrderLifecycle::PartiallyRefunded,
            Some(&snapshot(&[(1, 3)])),
            &[line(1, 3, 1)],
        );
        assert_eq!(quantities(&first.deltas), vec![(1, -1)]);

        let stored = OrderSnapshot::new(7, "store", first.snapshot);
        let second = plan_deltas(OrderLifecycle::Cancelled, Some(&stored), &[line(1, 3, 1)]);
        assert_eq!(quantities(&second.deltas), vec![(1, -2)]);
    }

    #[test]
    fn test_fully_refunded_line_dropped_from_snapshot() {
        let plan = plan_deltas(
            OrderLifecycle::PartiallyRefunded,
            Some(&snapshot(&[(1, 2), (2, 1)])),
            &[line(1, 2, 2), line(2, 1, 0)],
        );

        assert_eq!(quantities(&plan.deltas), vec![(1, -2), (2, 0)]);
        assert_eq!(plan.snapshot.len(), 1);
    }

    #[test]
    fn test_edit_diffs_against_snapshot() {
        let plan = plan_deltas(
            OrderLifecycle::Edited,
            Some(&snapshot(&[(1, 2), (3, 4)])),
            &[line(1, 5, 0)],
        );
        assert_eq!(quantities(&plan.deltas), vec![(1, 3), (3, -4)]);
    }
}
