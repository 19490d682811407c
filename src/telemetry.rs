//! Prometheus metrics.
//!
//! Recording goes through the `metrics` facade, so the helpers below are
//! no-ops until [`MetricsService::install`] has registered a recorder.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::{info, warn};

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Handle used by `GET /metrics`.
#[derive(Clone, Default)]
pub struct MetricsService {
    handle: Option<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder (once per process).
    pub fn install() -> Self {
        let handle = HANDLE
            .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => {
                    info!("Prometheus recorder installed");
                    Some(handle)
                }
                Err(e) => {
                    warn!("Failed to install Prometheus recorder: {}", e);
                    None
                }
            })
            .clone();
        Self { handle }
    }

    /// A service that renders nothing.
    pub fn disabled() -> Self {
        Self { handle: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }

    /// Prometheus text exposition, or `None` when metrics are disabled.
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// One HTTP request, labelled by route template and status code.
pub fn record_request(endpoint: &str, status: u16) {
    metrics::counter!(
        "signlens_http_requests_total",
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// One completed search and its latency.
pub fn record_search(kind: &'static str, seconds: f64, results: usize) {
    metrics::histogram!("signlens_search_duration_seconds", "kind" => kind).record(seconds);
    metrics::histogram!("signlens_search_results", "kind" => kind).record(results as f64);
}

/// A modality search that failed and was dropped from fusion.
pub fn record_search_failure(kind: &'static str) {
    metrics::counter!("signlens_search_failures_total", "kind" => kind).increment(1);
}

/// A frame pushed to a live session.
pub fn record_live_frame(encoded: bool) {
    metrics::counter!("signlens_live_frames_total", "encoded" => encoded.to_string())
        .increment(1);
}

/// A background search cycle of a live session.
pub fn record_live_search(ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    metrics::counter!("signlens_live_searches_total", "outcome" => outcome).increment(1);
}

pub fn set_live_sessions(count: u64) {
    metrics::gauge!("signlens_live_sessions").set(count as f64);
}

/// A request rejected by the rate limiter.
pub fn record_rate_limited() {
    metrics::counter!("signlens_rate_limited_total").increment(1);
}

/// Points written by ingestion.
pub fn record_ingested(collection: &str, points: usize) {
    metrics::counter!("signlens_ingested_points_total", "collection" => collection.to_string())
        .increment(points as u64);
}
