//! Status and health check handlers
//!
//! - `/health` - liveness, always 200 while the process responds
//! - `/ready` - 503 until at least one store credential is configured
//! - `/status` - webhook counters, latency percentiles and process memory
//!
//! ```text
//! webhook handlers ──record──▶ AppState ◀──read── status_handler ──▶ JSON
//!                               │
//!                               ├─ WebhookCounters (atomics)
//!                               └─ LatencyHistogram (hdrhistogram)
//! ```
//!
//! # Example Response
//!
//! ```json
//! {
//!   "name": "bundle-sync",
//!   "version": "0.1.0",
//!   "uptime_seconds": 3600,
//!   "webhooks": {
//!     "received": 1200, "processed": 1100, "duplicates": 60,
//!     "self_writes": 30, "ignored": 5, "failed": 5
//!   },
//!   "memory": { "rss_bytes": 52428800, "virtual_bytes": 268435456 },
//!   "latency": { "p50_ms": 120.5, "p95_ms": 410.2, "p99_ms": 980.7,
//!                "total_requests": 1200, "mean_ms": 150.3, "max_ms": 2500.0 },
//!   "status": "running",
//!   "timestamp": "2026-01-01T12:00:00+00:00"
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use hdrhistogram::Histogram;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, instrument};

/// Server version from Cargo.toml
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name from Cargo.toml
pub const SERVER_NAME: &str = env!("CARGO_PKG_NAME");

// ============================================================================
// Response Types
// ============================================================================

/// Liveness/readiness body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy", or "not_ready" from `/ready`
    pub status: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

/// Detailed server status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Package name
    pub name: String,
    /// Package version
    pub version: String,
    /// Seconds since start
    pub uptime_seconds: u64,
    /// Store credentials configured
    pub configured_stores: usize,
    /// Webhook outcome counters
    pub webhooks: WebhookCounts,
    /// Process memory
    pub memory: MemoryMetrics,
    /// Webhook handling latency
    pub latency: LatencyMetrics,
    /// Always "running"
    pub status: String,
    /// RFC 3339 generation time
    pub timestamp: String,
}

/// Counts of webhook deliveries by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookCounts {
    /// Deliveries received
    pub received: u64,
    /// Deliveries that ran a pipeline
    pub processed: u64,
    /// Deliveries rejected by the dedup gate
    pub duplicates: u64,
    /// Deliveries caused by this engine's own writes
    pub self_writes: u64,
    /// Deliveries with a scope that is not acted on
    pub ignored: u64,
    /// Deliveries answered with 4xx/5xx
    pub failed: u64,
}

/// Memory usage metrics collected from sysinfo
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetrics {
    /// Resident set size (bytes)
    pub rss_bytes: u64,
    /// Virtual memory size (bytes)
    pub virtual_bytes: u64,
}

/// Latency percentiles in milliseconds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// Median
    pub p50_ms: f64,
    /// 95th percentile
    pub p95_ms: f64,
    /// 99th percentile
    pub p99_ms: f64,
    /// Samples recorded
    pub total_requests: u64,
    /// Mean
    pub mean_ms: f64,
    /// Maximum
    pub max_ms: f64,
}

// ============================================================================
// Latency Histogram
// ============================================================================

/// Thread-safe latency histogram
///
/// Tracks 1 microsecond to 5 minutes with 3 significant figures; webhook
/// handling is dominated by catalog round trips.
#[derive(Debug)]
pub struct LatencyHistogram {
    inner: RwLock<Histogram<u64>>,
}

impl LatencyHistogram {
    /// Create an empty histogram
    pub fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, 300_000_000, 3).expect("static histogram bounds are valid");
        Self {
            inner: RwLock::new(histogram),
        }
    }

    /// Record one duration; values outside the bounds are dropped
    pub fn record(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        let _ = self.inner.write().record(micros.max(1));
    }

    /// Percentiles in milliseconds
    pub fn metrics(&self) -> LatencyMetrics {
        let hist = self.inner.read();
        LatencyMetrics {
            p50_ms: hist.value_at_percentile(50.0) as f64 / 1000.0,
            p95_ms: hist.value_at_percentile(95.0) as f64 / 1000.0,
            p99_ms: hist.value_at_percentile(99.0) as f64 / 1000.0,
            total_requests: hist.len(),
            mean_ms: hist.mean() / 1000.0,
            max_ms: hist.max() as f64 / 1000.0,
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Application State
// ============================================================================

/// Shared counters behind the status endpoints
///
/// Counters are relaxed atomics; `/status` is a monitoring view, not a
/// consistent snapshot.
#[derive(Debug)]
pub struct AppState {
    start_time: Instant,
    configured_stores: usize,
    received: AtomicU64,
    processed: AtomicU64,
    duplicates: AtomicU64,
    self_writes: AtomicU64,
    ignored: AtomicU64,
    failed: AtomicU64,
    latency: LatencyHistogram,
}

impl AppState {
    /// State for a service with `configured_stores` credentials
    pub fn new(configured_stores: usize) -> Self {
        Self {
            start_time: Instant::now(),
            configured_stores,
            received: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            self_writes: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            latency: LatencyHistogram::new(),
        }
    }

    /// Seconds since start
    #[inline]
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Whether the service can authenticate against any store
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.configured_stores > 0
    }

    /// Count an incoming delivery
    #[inline]
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a delivery that ran a pipeline
    #[inline]
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a duplicate delivery
    #[inline]
    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a delivery caused by this engine's own write
    #[inline]
    pub fn record_self_write(&self) {
        self.self_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a delivery with an ignored scope
    #[inline]
    pub fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed delivery
    #[inline]
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record handling latency
    #[inline]
    pub fn record_latency(&self, duration: Duration) {
        self.latency.record(duration);
    }

    /// Current counters
    pub fn webhook_counts(&self) -> WebhookCounts {
        WebhookCounts {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            self_writes: self.self_writes.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Current latency percentiles
    pub fn latency_metrics(&self) -> LatencyMetrics {
        self.latency.metrics()
    }
}

// ============================================================================
// System Metrics Collection
// ============================================================================

/// Memory of the current process; zeros when it cannot be read
fn collect_memory_metrics() -> MemoryMetrics {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    match system.process(pid) {
        Some(process) => MemoryMetrics {
            rss_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
        },
        None => {
            debug!("Could not find current process in sysinfo");
            MemoryMetrics::default()
        }
    }
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// `GET /health`
#[instrument(skip_all)]
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse::default()))
}

/// `GET /ready`
#[instrument(skip_all)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, Json(HealthResponse::default()))
    } else {
        debug!("Readiness check failed: no store credentials");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "not_ready".to_string(),
            }),
        )
    }
}

/// `GET /status`
#[instrument(skip_all)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = StatusResponse {
        name: SERVER_NAME.to_string(),
        version: SERVER_VERSION.to_string(),
        uptime_seconds: state.uptime_seconds(),
        configured_stores: state.configured_stores,
        webhooks: state.webhook_counts(),
        memory: collect_memory_metrics(),
        latency: state.latency_metrics(),
        status: "running".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(response))
}

// ============================================================================
// Router Setup
// ============================================================================

/// Routes for `/health`, `/ready` and `/status`
pub fn status_router(state: Arc<AppState>) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(readiness_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================
