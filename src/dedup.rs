//! Webhook deduplication
//!
//! The platform delivers webhooks at least once. Every delivery derives a
//! deterministic key and tries to insert a [`WebhookRecord`] under it; the
//! insert is the only race-safe gate, so a key can pass at most once while
//! its record lives.
//!
//! # Architecture
//!
//! ```text
//! check_and_register
//!       |
//!       v
//! [Atomic insert] --> Conflict --> duplicate
//!       |
//!       +--> Inserted --> allow
//!       |
//!       +--> Store error
//!               |
//!               v
//!       [Key present and live?] --> duplicate
//!               |
//!               v
//!       [Same event seen < window ago?] --> duplicate
//!               |
//!               v
//!             allow (degrade open)
//! ```
//!
//! Expired records are removed by [`spawn_sweeper`], a periodic task that is
//! independent of request traffic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// A processed webhook delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRecord {
    /// Derived idempotency key (unique)
    pub webhook_id: String,
    /// Order or product the event refers to
    pub resource_id: i64,
    /// Producing store
    pub store_id: String,
    /// First time the key was seen
    pub processed_at: DateTime<Utc>,
    /// When the record stops blocking re-delivery
    pub expires_at: DateTime<Utc>,
}

impl WebhookRecord {
    /// Whether the record no longer blocks re-delivery
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of an atomic insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The key was free and is now taken
    Inserted,
    /// A live record already holds the key
    Conflict,
}

/// Storage for webhook records with a uniqueness constraint on the key
#[async_trait::async_trait]
pub trait WebhookStore: Send + Sync {
    /// Insert unless a live record holds the same key
    async fn insert(&self, record: WebhookRecord) -> Result<InsertOutcome, StoreError>;

    /// Record stored under `webhook_id`
    async fn get(&self, webhook_id: &str) -> Result<Option<WebhookRecord>, StoreError>;

    /// Records for the same resource and store processed at or after `since`
    async fn find_since(
        &self,
        resource_id: i64,
        store_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WebhookRecord>, StoreError>;

    /// Delete the record under `webhook_id`
    async fn remove(&self, webhook_id: &str) -> Result<(), StoreError>;

    /// Delete every record expired at `now`; returns how many were removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// In-memory webhook store
#[derive(Debug, Default)]
pub struct InMemoryWebhookStore {
    records: RwLock<HashMap<String, WebhookRecord>>,
    fail_inserts: AtomicBool,
    fail_reads: AtomicBool,
}

impl InMemoryWebhookStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every insert fail with [`StoreError::Unavailable`]
    #[cfg(any(test, feature = "testing"))]
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every read fail with [`StoreError::Unavailable`]
    #[cfg(any(test, feature = "testing"))]
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Put a record without any checks
    #[cfg(any(test, feature = "testing"))]
    pub fn seed(&self, record: WebhookRecord) {
        self.records
            .write()
            .insert(record.webhook_id.clone(), record);
    }

    /// Number of stored records (live or expired)
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl WebhookStore for InMemoryWebhookStore {
    async fn insert(&self, record: WebhookRecord) -> Result<InsertOutcome, StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("inserts disabled".to_string()));
        }

        let mut records = self.records.write();
        let taken = records
            .get(&record.webhook_id)
            .map(|existing| !existing.is_expired(record.processed_at))
            .unwrap_or(false);
        if taken {
            return Ok(InsertOutcome::Conflict);
        }
        records.insert(record.webhook_id.clone(), record);
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, webhook_id: &str) -> Result<Option<WebhookRecord>, StoreError> {
        self.check_reads()?;
        Ok(self.records.read().get(webhook_id).cloned())
    }

    async fn find_since(
        &self,
        resource_id: i64,
        store_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WebhookRecord>, StoreError> {
        self.check_reads()?;
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.resource_id == resource_id && r.store_id == store_id)
            .filter(|r| r.processed_at >= since)
            .cloned()
            .collect())
    }

    async fn remove(&self, webhook_id: &str) -> Result<(), StoreError> {
        self.records.write().remove(webhook_id);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        Ok(before - records.len())
    }
}

/// Outcome of the dedup gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupCheck {
    /// Whether this delivery was already seen
    pub is_duplicate: bool,
    /// Derived key
    pub key: String,
}

/// Derive the idempotency key of a delivery
pub fn webhook_key(store_id: &str, scope: &str, event_id: i64, timestamp: i64) -> String {
    format!("{}:{}:{}:{}", store_id, scope, event_id, timestamp)
}

/// The dedup gate
#[derive(Clone)]
pub struct WebhookDeduplicator {
    store: Arc<dyn WebhookStore>,
    ttl: chrono::Duration,
    duplicate_window: chrono::Duration,
}

impl WebhookDeduplicator {
    /// Create a gate over `store`
    pub fn new(store: Arc<dyn WebhookStore>, ttl: Duration, duplicate_window: Duration) -> Self {
        Self {
            store,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1)),
            duplicate_window: chrono::Duration::from_std(duplicate_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(5)),
        }
    }

    /// Check and record a delivery now
    pub async fn check_and_register(
        &self,
        event_id: i64,
        store_id: &str,
        timestamp: i64,
        scope: &str,
    ) -> DedupCheck {
        self.check_and_register_at(event_id, store_id, timestamp, scope, Utc::now())
            .await
    }

    /// Check and record a delivery as of `now`
    pub async fn check_and_register_at(
        &self,
        event_id: i64,
        store_id: &str,
        timestamp: i64,
        scope: &str,
        now: DateTime<Utc>,
    ) -> DedupCheck {
        let key = webhook_key(store_id, scope, event_id, timestamp);
        let record = WebhookRecord {
            webhook_id: key.clone(),
            resource_id: event_id,
            store_id: store_id.to_string(),
            processed_at: now,
            expires_at: now + self.ttl,
        };

        let is_duplicate = match self.store.insert(record).await {
            Ok(InsertOutcome::Inserted) => false,
            Ok(InsertOutcome::Conflict) => {
                debug!(key = %key, "Duplicate webhook delivery");
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Dedup insert failed, falling back to lookup");
                self.fallback_check(&key, event_id, store_id, now).await
            }
        };

        DedupCheck { is_duplicate, key }
    }

    /// Manual existence check used when the atomic insert is unavailable
    async fn fallback_check(
        &self,
        key: &str,
        event_id: i64,
        store_id: &str,
        now: DateTime<Utc>,
    ) -> bool {
        match self.store.get(key).await {
            Ok(Some(record)) if !record.is_expired(now) => return true,
            Ok(_) => {}
            Err(e) => warn!(key, error = %e, "Dedup lookup failed"),
        }

        // Clock skew on the platform can give one event two timestamps.
        match self
            .store
            .find_since(event_id, store_id, now - self.duplicate_window)
            .await
        {
            Ok(recent) => {
                let skewed = recent
                    .iter()
                    .any(|r| r.webhook_id != key && !r.is_expired(now));
                if skewed {
                    debug!(key, "Treating near-simultaneous delivery as duplicate");
                }
                skewed
            }
            Err(e) => {
                warn!(key, error = %e, "Dedup store unavailable, allowing delivery");
                false
            }
        }
    }

    /// Forget a key so the platform's retry of the same delivery is processed
    pub async fn release(&self, key: &str) {
        if let Err(e) = self.store.remove(key).await {
            warn!(key, error = %e, "Failed to release webhook key");
        }
    }
}

/// Run `purge_expired` every `every` until the handle is aborted
///
/// Periods shorter than one second are raised to one second.
pub fn spawn_sweeper(store: Arc<dyn WebhookStore>, every: Duration) -> JoinHandle<()> {
    let every = every.max(Duration::from_secs(1));
    tokio::spawn(async move {
        info!(interval_secs = every.as_secs(), "Starting expired webhook sweeper");
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);

        loop {
            ticker.tick().await;
            match store.purge_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "Purged expired webhook records"),
                Err(e) => warn!(error = %e, "Failed to purge expired webhook records"),
            }
        }
    })
}
