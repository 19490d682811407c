//! HTTP API.
//!
//! Endpoints:
//! - `GET  /`                          service info
//! - `GET  /health`                    model, vector store and session status
//! - `GET  /metrics`                   Prometheus metrics
//! - `POST /search`                    single image (+ landmarks) search
//! - `POST /search/batch`              multi-image search
//! - `POST /recognize/landmarks`       landmark-only recognition
//! - `POST /live/sessions`             open a live session
//! - `POST /live/sessions/{id}/frames` push a camera frame
//! - `GET  /live/sessions/{id}`        smoothed predictions
//! - `DELETE /live/sessions/{id}`      close a live session

mod handlers;
mod rate_limit;

pub use handlers::{
    CollectionEntry, HealthResponse, LandmarkRequest, RecognitionResponse, SearchQuery,
};
pub use rate_limit::{rate_limit_middleware, RateLimitService};

use axum::{
    extract::{DefaultBodyLimit, MatchedPath, Request},
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ApiSection;
use crate::error::{Error, Result};
use crate::live::LiveSessions;
use crate::search::HybridSearch;
use crate::telemetry::{self, MetricsService};

/// How often idle rate-limit buckets are dropped.
const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// API server settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub listen_address: String,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
    pub max_body_bytes: usize,
}

impl From<&ApiSection> for ApiConfig {
    fn from(section: &ApiSection) -> Self {
        Self {
            listen_address: section.listen_address.clone(),
            cors_enabled: section.cors_enabled,
            cors_origins: section.cors_origins.clone(),
            max_body_bytes: section.max_body_bytes,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::from(&ApiSection::default())
    }
}

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<HybridSearch>,
    pub live: Arc<LiveSessions>,
    pub start_time: Instant,
    pub rate_limiter: Arc<RateLimitService>,
    pub metrics: Arc<MetricsService>,
}

/// Count every response by route template and status.
async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(request).await;
    telemetry::record_request(&endpoint, response.status().as_u16());
    response
}

/// The HTTP server.
pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn with_state(config: ApiConfig, state: AppState) -> Self {
        Self { config, state }
    }

    fn cors_layer(&self) -> CorsLayer {
        let origins = if self.config.cors_origins.is_empty() {
            AllowOrigin::from(Any)
        } else {
            let parsed: Vec<HeaderValue> = self
                .config
                .cors_origins
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        warn!("Ignoring invalid CORS origin: {}", o);
                        None
                    }
                })
                .collect();
            AllowOrigin::list(parsed)
        };
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/", get(handlers::root))
            .route("/health", get(handlers::health))
            .route("/metrics", get(handlers::metrics))
            .route("/search", post(handlers::search))
            .route("/search/batch", post(handlers::search_batch))
            .route("/recognize/landmarks", post(handlers::recognize_landmarks))
            .route("/live/sessions", post(handlers::create_live_session))
            .route(
                "/live/sessions/{id}",
                get(handlers::get_live_session).delete(handlers::close_live_session),
            )
            .route("/live/sessions/{id}/frames", post(handlers::push_live_frame))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                rate_limit_middleware,
            ))
            .layer(middleware::from_fn(track_requests))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(TraceLayer::new_for_http());

        if self.config.cors_enabled {
            router = router.layer(self.cors_layer());
        }

        router.with_state(self.state.clone())
    }

    /// Serve until the process exits.
    pub async fn run(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Api(format!("Failed to bind {}: {}", addr, e)))?;
        info!("HTTP API listening on {}", addr);

        if self.state.rate_limiter.is_enabled() {
            let limiter = Arc::clone(&self.state.rate_limiter);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(RATE_LIMIT_CLEANUP_INTERVAL);
                loop {
                    ticker.tick().await;
                    limiter.cleanup();
                }
            });
        }

        let router = self.router();
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| Error::Api(format!("Server error: {}", e)))
    }
}
