//! # Application State Management
//!
//! State shared by every HTTP handler and every WebSocket actor: the loaded configuration,
//! the provider factory, the session registry and the service counters.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - Each actix worker thread gets its own clone of [`AppState`]; the clones share the same
//!   registry, factory and metrics through `Arc`
//!
//! ### RwLock for metrics
//! - Many readers (`/health`, `/api/v1/metrics`) and short writes from middleware and
//!   sessions. A poisoned lock still holds valid counters, so it is recovered rather than
//!   propagated
//!
//! ### Immutable configuration
//! - Configuration is fixed at startup; sessions read it without locking

use crate::config::AppConfig;
use crate::factory::ProviderFactory;
use crate::protocol::TurnOutcome;
use crate::session::SessionRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub factory: Arc<ProviderFactory>,
    pub sessions: Arc<SessionRegistry>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    /// Never changes, so no lock is needed.
    pub start_time: Instant,
}

/// Counters collected since startup.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub turns_completed: u64,
    pub turns_aborted: u64,
    pub synthesis_failures: u64,
    /// Keyed by `"METHOD /path"`.
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, factory: ProviderFactory) -> Self {
        let sessions = SessionRegistry::new(config.performance.max_concurrent_sessions);
        Self {
            config: Arc::new(config),
            factory: Arc::new(factory),
            sessions: Arc::new(sessions),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count one finished conversational turn.
    pub fn record_turn(&self, outcome: TurnOutcome) {
        let mut metrics = self.write_metrics();
        match outcome {
            TurnOutcome::Completed => metrics.turns_completed += 1,
            TurnOutcome::Aborted => metrics.turns_aborted += 1,
            TurnOutcome::SynthesisFailed => metrics.synthesis_failures += 1,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.count()
    }

    /// Copy of the counters, so no lock is held while a response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
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
