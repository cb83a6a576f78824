//! Per-order serialization
//!
//! Two deliveries for the same order must not both diff against the same
//! stale snapshot. Holding an order's lock from snapshot read to snapshot
//! save serializes them within this process.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type OrderKey = (i64, String);

/// Keyed async mutexes, one per `(order_id, store_id)` in use
#[derive(Debug, Default)]
pub struct OrderLocks {
    locks: Mutex<HashMap<OrderKey, Arc<AsyncMutex<()>>>>,
}

impl OrderLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one order
    pub async fn lock(&self, order_id: i64, store_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            // Entries only the table references are idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry((order_id, store_id.to_string()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }

    /// Orders currently locked or awaited
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_order_serialized() {
        let locks = Arc::new(OrderLocks::new());
        let guard = locks.lock(1, "store").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(1, "store").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_orders_independent() {
        let locks = OrderLocks::new();
        let _a = locks.lock(1, "store").await;
        let _b = locks.lock(2, "store").await;
        let _c = locks.lock(1, "other").await;
        assert_eq!(locks.active(), 3);
    }

    #[tokio::test]
    async fn test_idle_entries_pruned() {
        let locks = OrderLocks::new();
        drop(locks.lock(1, "store").await);
        drop(locks.lock(2, "store").await);
        assert_eq!(locks.active(), 0);
        assert!(locks.locks.lock().len() <= 1);
    }
}
