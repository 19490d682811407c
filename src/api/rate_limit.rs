//! Per-client request rate limiting.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use tracing::{debug, warn};

use super::AppState;
use crate::config::RateLimitConfig;
use crate::telemetry;

/// Keyed token-bucket limiter, one bucket per client address.
pub struct RateLimitService {
    limiter: Option<DefaultKeyedRateLimiter<String>>,
}

impl RateLimitService {
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let (Some(rate), Some(burst)) = (
            NonZeroU32::new(config.requests_per_second),
            NonZeroU32::new(config.burst_size),
        ) else {
            warn!("Rate limit of zero requested, disabling the limiter");
            return Self::disabled();
        };
        let quota = Quota::per_second(rate).allow_burst(burst);
        Self {
            limiter: Some(RateLimiter::keyed(quota)),
        }
    }

    pub fn disabled() -> Self {
        Self { limiter: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Take one token for `key`. Returns `false` when the client is over quota.
    pub fn check(&self, key: &str) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check_key(&key.to_string()).is_ok(),
            None => true,
        }
    }

    /// Forget idle clients.
    pub fn cleanup(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.retain_recent();
            limiter.shrink_to_fit();
            debug!("Rate limiter tracking {} clients", limiter.len());
        }
    }
}

/// Identify the caller: socket address, then `X-Forwarded-For`.
fn client_key(request: &Request) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Reject over-quota clients with `429 Too Many Requests`.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request);
    if state.rate_limiter.check(&key) {
        return next.run(request).await;
    }

    debug!("Rate limited client {}", key);
    telemetry::record_rate_limited();
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({ "detail": "Rate limit exceeded" })),
    )
        .into_response()
}
