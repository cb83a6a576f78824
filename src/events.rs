//! Webhook event envelope
//!
//! Strongly-typed representation of the platform's webhook payload:
//!
//! ```json
//! {"scope": "store/order/updated", "data": {"type": "order", "id": 123},
//!  "created_at": 1700000000, "producer": "stores/abc123", "hash": "..."}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WebhookError;

/// Webhook scopes this engine acts on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WebhookScope {
    /// `store/order/updated`
    OrderUpdated,
    /// `store/product/updated`
    ProductUpdated,
    /// Anything else; acknowledged and ignored
    Other(String),
}

impl FromStr for WebhookScope {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "store/order/updated" => Self::OrderUpdated,
            "store/product/updated" => Self::ProductUpdated,
            other => Self::Other(other.to_string()),
        })
    }
}

impl WebhookScope {
    /// Wire representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::OrderUpdated => "store/order/updated",
            Self::ProductUpdated => "store/product/updated",
            Self::Other(scope) => scope,
        }
    }
}

impl fmt::Display for WebhookScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    data: Option<RawData>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    producer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawData {
    #[serde(default)]
    id: Option<i64>,
}

/// A validated webhook delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookEvent {
    /// Event scope as sent
    pub scope: String,
    /// Order or product id
    pub resource_id: i64,
    /// Producer timestamp (unix seconds); 0 when absent
    pub created_at: i64,
    /// Store that produced the event
    pub store_id: String,
}

impl WebhookEvent {
    /// Parse and validate raw JSON bytes
    ///
    /// Fails when the body is not JSON, the resource id is missing, or the
    /// producer does not name a store.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WebhookError> {
        let raw: RawPayload = serde_json::from_slice(bytes)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

        let resource_id = raw
            .data
            .and_then(|d| d.id)
            .ok_or_else(|| WebhookError::InvalidPayload("missing data.id".to_string()))?;

        let store_id = raw
            .producer
            .as_deref()
            .and_then(store_from_producer)
            .ok_or_else(|| WebhookError::InvalidPayload("missing store in producer".to_string()))?;

        Ok(Self {
            scope: raw.scope.unwrap_or_default(),
            resource_id,
            created_at: raw.created_at.unwrap_or(0),
            store_id,
        })
    }

    /// Typed scope
    pub fn typed_scope(&self) -> WebhookScope {
        match WebhookScope::from_str(&self.scope) {
            Ok(scope) => scope,
            Err(never) => match never {},
        }
    }
}

/// Store id from a `stores/{id}` producer
fn store_from_producer(producer: &str) -> Option<String> {
    producer
        .strip_prefix("stores/")
        .map(str::trim)
        .filter(|id| !id.is_empty() && !id.contains('/'))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_order_event() {
        let event = WebhookEvent::from_bytes(
            br#"{"scope":"store/order/updated","data":{"type":"order","id":42},
                "created_at":1700000000,"producer":"stores/abc123","hash":"x"}"#,
        )
        .unwrap();

        assert_eq!(
            event,
            WebhookEvent {
                scope: "store/order/updated".to_string(),
                resource_id: 42,
                created_at: 1_700_000_000,
                store_id: "abc123".to_string(),
            }
        );
        assert_eq!(event.typed_scope(), WebhookScope::OrderUpdated);
    }

    #[test]
    fn test_missing_id_rejected() {
        let err = WebhookEvent::from_bytes(br#"{"scope":"x","data":{},"producer":"stores/a"}"#)
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidPayload(_)));
    }

    #[test]
    fn test_missing_store_rejected() {
        for body in [
            &br#"{"data":{"id":1}}"#[..],
            br#"{"data":{"id":1},"producer":"stores/"}"#,
            br#"{"data":{"id":1},"producer":"apps/7"}"#,
        ] {
            assert!(WebhookEvent::from_bytes(body).is_err());
        }
    }

    #[test]
    fn test_not_json() {
        assert!(WebhookEvent::from_bytes(b"not json").is_err());
    }

    #[test]
    fn test_unknown_scope() {
        let scope: WebhookScope = "store/customer/created".parse().unwrap();
        assert_eq!(scope, WebhookScope::Other("store/customer/created".to_string()));
        assert_eq!(scope.to_string(), "store/customer/created");
    }
}
