//! Bundles
//!
//! - [`model`]: bundle definitions normalized from catalog metadata
//! - [`resolver`]: request-scoped discovery of a store's bundles
//! - [`recalc`]: bundle stock, price and weight derived from components

pub mod model;
pub mod recalc;
pub mod resolver;

pub use model::{
    parse_linked_components, BundleDefinition, BundleGraph, BundleTarget, ItemRef,
    LinkedComponent, LinkedComponentRef,
};
pub use recalc::{
    apply_writes, inventory_level, BundleTotals, CatalogComponents, ComponentSource,
    ComponentStock, InventoryRecalculator, InventoryWrite, RecalcReport, WriteReport,
};
pub use resolver::BundleGraphResolver;
