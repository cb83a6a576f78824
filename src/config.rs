//! Service configuration
//!
//! All settings are loaded from environment variables:
//!
//! - `BUNDLE_SYNC_API_BASE`: Catalog API root (default: `https://api.bigcommerce.com/stores`)
//! - `BUNDLE_SYNC_STORE_TOKENS`: Comma-separated `storeId:token` pairs
//! - `BUNDLE_SYNC_METAFIELD_NAMESPACE`: Metadata namespace (default: `bundle_app`)
//! - `BUNDLE_SYNC_BUNDLE_CATEGORY`: Discovery category name (default: `Bundle`)
//! - `BUNDLE_SYNC_DEDUP_TTL_SECS`: Webhook record lifetime (default: 3600)
//! - `BUNDLE_SYNC_DUPLICATE_WINDOW_SECS`: Clock-skew duplicate window (default: 5)
//! - `BUNDLE_SYNC_SWEEP_INTERVAL_SECS`: Expired record sweep period (default: 300)
//! - `BUNDLE_SYNC_NEW_ORDER_WINDOW_SECS`: New order classification window (default: 10)
//! - `BUNDLE_SYNC_PRODUCT_BATCH_SIZE`: Max products per batch write (default: 10)
//! - `BUNDLE_SYNC_HTTP_TIMEOUT_SECS`: Outbound request timeout (default: 30)
//! - `BUNDLE_SYNC_DATABASE_URL`: SQLite database for dedup records and order
//!   history (default: `sqlite://bundle-sync.db`)
//!
//! Tokens are never logged.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::ConfigError;

/// Default catalog API root
pub const DEFAULT_API_BASE: &str = "https://api.bigcommerce.com/stores";

/// Default database location
pub const DEFAULT_DATABASE_URL: &str = "sqlite://bundle-sync.db";

/// Default metadata namespace for bundle metafields
pub const DEFAULT_METAFIELD_NAMESPACE: &str = "bundle_app";

/// Default name of the category that holds bundle products
pub const DEFAULT_BUNDLE_CATEGORY: &str = "Bundle";

/// Result type for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Reconciliation policy knobs shared by every pipeline stage
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Metadata namespace holding bundle definitions
    pub metafield_namespace: String,
    /// Category scoping bundle discovery
    pub bundle_category: String,
    /// How long a webhook record blocks re-delivery
    pub dedup_ttl: Duration,
    /// Window in which a second timestamp for the same event is a duplicate
    pub duplicate_window: Duration,
    /// Orders modified within this long after creation are new
    pub new_order_window: Duration,
    /// Max items per product batch write
    pub product_batch_size: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            metafield_namespace: DEFAULT_METAFIELD_NAMESPACE.to_string(),
            bundle_category: DEFAULT_BUNDLE_CATEGORY.to_string(),
            dedup_ttl: Duration::from_secs(3600),
            duplicate_window: Duration::from_secs(5),
            new_order_window: Duration::from_secs(10),
            product_batch_size: 10,
        }
    }
}

/// Full service configuration
#[derive(Clone)]
pub struct ServiceConfig {
    /// Catalog API root; the store id is appended as a path segment
    pub api_base: String,
    /// Access token per store id
    store_tokens: HashMap<String, String>,
    /// SQLite database holding dedup records and order history
    pub database_url: String,
    /// Period of the expired dedup record sweep
    pub sweep_interval: Duration,
    /// Outbound HTTP timeout
    pub http_timeout: Duration,
    /// Reconciliation policy
    pub reconcile: ReconcileSettings,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("api_base", &self.api_base)
            .field("stores", &self.store_tokens.keys().collect::<Vec<_>>())
            .field("database_url", &self.database_url)
            .field("sweep_interval", &self.sweep_interval)
            .field("http_timeout", &self.http_timeout)
            .field("reconcile", &self.reconcile)
            .finish()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            store_tokens: HashMap::new(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            sweep_interval: Duration::from_secs(300),
            http_timeout: Duration::from_secs(30),
            reconcile: ReconcileSettings::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a numeric variable cannot be parsed or a
    /// credential entry is malformed.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ServiceConfig::default();

        let api_base = lookup("BUNDLE_SYNC_API_BASE").unwrap_or(defaults.api_base);
        let store_tokens = match lookup("BUNDLE_SYNC_STORE_TOKENS") {
            Some(raw) => parse_store_tokens(&raw)?,
            None => HashMap::new(),
        };

        if store_tokens.is_empty() {
            warn!("BUNDLE_SYNC_STORE_TOKENS is empty; every webhook will be rejected with 401");
        }

        let reconcile = ReconcileSettings {
            metafield_namespace: lookup("BUNDLE_SYNC_METAFIELD_NAMESPACE")
                .unwrap_or(defaults.reconcile.metafield_namespace),
            bundle_category: lookup("BUNDLE_SYNC_BUNDLE_CATEGORY")
                .unwrap_or(defaults.reconcile.bundle_category),
            dedup_ttl: nonzero_secs(
                &lookup,
                "BUNDLE_SYNC_DEDUP_TTL_SECS",
                defaults.reconcile.dedup_ttl,
            )?,
            duplicate_window: secs(
                &lookup,
                "BUNDLE_SYNC_DUPLICATE_WINDOW_SECS",
                defaults.reconcile.duplicate_window,
            )?,
            new_order_window: secs(
                &lookup,
                "BUNDLE_SYNC_NEW_ORDER_WINDOW_SECS",
                defaults.reconcile.new_order_window,
            )?,
            product_batch_size: parsed(
                &lookup,
                "BUNDLE_SYNC_PRODUCT_BATCH_SIZE",
                defaults.reconcile.product_batch_size,
            )?
            .max(1),
        };

        let config = Self {
            api_base,
            store_tokens,
            database_url: lookup("BUNDLE_SYNC_DATABASE_URL").unwrap_or(defaults.database_url),
            sweep_interval: nonzero_secs(
                &lookup,
                "BUNDLE_SYNC_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval,
            )?,
            http_timeout: nonzero_secs(
                &lookup,
                "BUNDLE_SYNC_HTTP_TIMEOUT_SECS",
                defaults.http_timeout,
            )?,
            reconcile,
        };

        info!(
            stores = config.store_tokens.len(),
            category = %config.reconcile.bundle_category,
            namespace = %config.reconcile.metafield_namespace,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Register a credential for a store
    pub fn with_store_token(mut self, store_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.store_tokens.insert(store_id.into(), token.into());
        self
    }

    /// Access token for a store, if one is configured
    pub fn store_token(&self, store_id: &str) -> Option<&str> {
        self.store_tokens.get(store_id).map(String::as_str)
    }

    /// Number of configured stores
    pub fn store_count(&self) -> usize {
        self.store_tokens.len()
    }
}

fn parse_store_tokens(raw: &str) -> ConfigResult<HashMap<String, String>> {
    let mut tokens = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (store, token) = entry
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidCredential(redact(entry)))?;
        let (store, token) = (store.trim(), token.trim());
        if store.is_empty() || token.is_empty() {
            return Err(ConfigError::InvalidCredential(redact(entry)));
        }
        tokens.insert(store.to_string(), token.to_string());
    }
    Ok(tokens)
}

/// Keep only the store part of a credential entry for error messages
fn redact(entry: &str) -> String {
    match entry.split_once(':') {
        Some((store, _)) => format!("{}:***", store.trim()),
        None => "<missing ':' separator>".to_string(),
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> ConfigResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(default),
    }
}

fn secs<F>(lookup: &F, key: &str, default: Duration) -> ConfigResult<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parsed(lookup, key, default.as_secs()).map(Duration::from_secs)
}

/// Like [`secs`], for periods where zero would stall or panic
fn nonzero_secs<F>(lookup: &F, key: &str, default: Duration) -> ConfigResult<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let value = secs(lookup, key, default)?;
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1 second".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.reconcile.bundle_category, "Bundle");
        assert_eq!(config.reconcile.dedup_ttl, Duration::from_secs(3600));
        assert_eq!(config.reconcile.duplicate_window, Duration::from_secs(5));
        assert_eq!(config.reconcile.new_order_window, Duration::from_secs(10));
        assert_eq!(config.store_count(), 0);
    }

    #[test]
    fn test_store_tokens_parsed() {
        let config = ServiceConfig::from_lookup(lookup_from(&[(
            "BUNDLE_SYNC_STORE_TOKENS",
            "abc123:tok-1, def456:tok-2",
        )]))
        .unwrap();

        assert_eq!(config.store_token("abc123"), Some("tok-1"));
        assert_eq!(config.store_token("def456"), Some("tok-2"));
        assert_eq!(config.store_token("missing"), None);
    }

    #[test]
    fn test_invalid_credential_is_redacted() {
        let err = ServiceConfig::from_lookup(lookup_from(&[(
            "BUNDLE_SYNC_STORE_TOKENS",
            "abc123:",
        )]))
        .unwrap_err();
        assert_eq!(err, ConfigError::InvalidCredential("abc123:***".to_string()));
    }

    #[test]
    fn test_invalid_number() {
        let err = ServiceConfig::from_lookup(lookup_from(&[(
            "BUNDLE_SYNC_DEDUP_TTL_SECS",
            "an hour",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("BUNDLE_SYNC_DEDUP_TTL_SECS"));
    }

    #[test]
    fn test_zero_periods_rejected() {
        for key in [
            "BUNDLE_SYNC_SWEEP_INTERVAL_SECS",
            "BUNDLE_SYNC_HTTP_TIMEOUT_SECS",
            "BUNDLE_SYNC_DEDUP_TTL_SECS",
        ] {
            let err = ServiceConfig::from_lookup(lookup_from(&[(key, "0")])).unwrap_err();
            assert_eq!(
                err,
                ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be at least 1 second".to_string(),
                }
            );
        }
    }

    #[test]
    fn test_zero_windows_allowed() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("BUNDLE_SYNC_DUPLICATE_WINDOW_SECS", "0"),
            ("BUNDLE_SYNC_NEW_ORDER_WINDOW_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.reconcile.duplicate_window, Duration::ZERO);
        assert_eq!(config.reconcile.new_order_window, Duration::ZERO);
    }

    #[test]
    fn test_batch_size_floor() {
        let config = ServiceConfig::from_lookup(lookup_from(&[(
            "BUNDLE_SYNC_PRODUCT_BATCH_SIZE",
            "0",
        )]))
        .unwrap();
        assert_eq!(config.reconcile.product_batch_size, 1);
    }

    #[test]
    fn test_debug_hides_tokens() {
        let config = ServiceConfig::default().with_store_token("abc123", "super-secret");
        let debug = format!("{:?}", config);
        assert!(debug.contains("abc123"));
        assert!(!debug.contains("super-secret"));
    }
}
