//! # Application State Management
//!
//! Shared state accessed by every HTTP request and WebSocket session.
//!
//! ## Thread Safety:
//! Configuration is loaded once at startup and is immutable afterwards, so it
//! is shared as a plain clone. Metrics are constantly updated by concurrent
//! requests and sit behind `Arc<RwLock<_>>`: many readers or one writer at a
//! time, with locks held only for the counter update itself. The connection
//! tracker carries its own mutex (see `admission`).

use crate::admission::ConnectionTracker;
use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared across all request handlers and relay sessions.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration, read-only after startup.
    pub config: AppConfig,

    /// Per-source-address connection admission gate.
    pub tracker: Arc<ConnectionTracker>,

    /// Service counters, updated by middleware and relay sessions.
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started.
    pub start_time: Instant,
}

/// Counters collected across all requests and sessions.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total HTTP requests processed since server start
    pub request_count: u64,

    /// Total errors encountered since server start
    pub error_count: u64,

    /// Currently active relay sessions
    pub active_sessions: u32,

    /// Transcript events received from the upstream STT service
    pub stt_events_total: u64,

    /// Successful translation responses delivered to clients
    pub translations_total: u64,

    /// Translation requests that exhausted every backend
    pub translation_failures_total: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Statistics for one HTTP endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Create state from validated configuration.
    pub fn new(config: AppConfig) -> Self {
        let tracker = Arc::new(ConnectionTracker::new(config.limits.max_connections_per_ip));
        Self {
            config,
            tracker,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Called when a relay session is admitted and starts.
    pub fn increment_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions += 1;
    }

    /// Called when a relay session terminates, on any exit path.
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    pub fn record_stt_event(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.stt_events_total += 1;
    }

    pub fn record_translation(&self, success: bool) {
        let mut metrics = self.metrics.write().unwrap();
        if success {
            metrics.translations_total += 1;
        } else {
            metrics.translation_failures_total += 1;
        }
    }

    /// Consistent copy of the current metrics for serialization.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            stt_events_total: metrics.stt_events_total,
            translations_total: metrics.translations_total,
            translation_failures_total: metrics.translation_failures_total,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
