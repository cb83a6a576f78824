//! Order lifecycle classification
//!
//! Lifecycle is inferred from each delivery's order detail rather than kept
//! as persisted state. Status wins over timing: a cancellation arriving
//! seconds after creation is still a cancellation.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::catalog::types::status;
use crate::catalog::Order;

/// What an order update represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderLifecycle {
    /// Just placed
    New,
    /// Lines changed after placement
    Edited,
    /// Cancelled or fully refunded
    Cancelled,
    /// Some quantity refunded
    PartiallyRefunded,
}

impl OrderLifecycle {
    /// Label used in logs and responses
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Edited => "edited",
            Self::Cancelled => "cancelled",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }
}

impl fmt::Display for OrderLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify `order`; orders modified within `new_order_window` of creation are new
pub fn classify(order: &Order, new_order_window: Duration) -> OrderLifecycle {
    match order.status_id {
        status::CANCELLED | status::REFUNDED => return OrderLifecycle::Cancelled,
        status::PARTIALLY_REFUNDED => return OrderLifecycle::PartiallyRefunded,
        _ => {}
    }

    let elapsed_ms = (order.date_modified - order.date_created)
        .num_milliseconds()
        .unsigned_abs();
    let window_ms = u64::try_from(new_order_window.as_millis()).unwrap_or(u64::MAX);

    if elapsed_ms <= window_ms {
        OrderLifecycle::New
    } else {
        OrderLifecycle::Edited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn order(status_id: u32, modified_after_secs: i64) -> Order {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Order {
            id: 1,
            status_id,
            status: String::new(),
            date_created: created,
            date_modified: created + chrono::Duration::seconds(modified_after_secs),
        }
    }

    const WINDOW: Duration = Duration::from_secs(10);

    #[test]
    fn test_new_within_window() {
        assert_eq!(classify(&order(11, 0), WINDOW), OrderLifecycle::New);
        assert_eq!(classify(&order(11, 10), WINDOW), OrderLifecycle::New);
    }

    #[test]
    fn test_edited_after_window() {
        assert_eq!(classify(&order(11, 11), WINDOW), OrderLifecycle::Edited);
    }

    #[test]
    fn test_status_takes_precedence() {
        assert_eq!(classify(&order(5, 1), WINDOW), OrderLifecycle::Cancelled);
        assert_eq!(classify(&order(4, 3600), WINDOW), OrderLifecycle::Cancelled);
        assert_eq!(
            classify(&order(14, 3600), WINDOW),
            OrderLifecycle::PartiallyRefunded
        );
    }
}
