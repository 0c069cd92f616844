//! Axum middleware that applies admission decisions.
//!
//! Install it on any router with
//! `axum::middleware::from_fn_with_state(state, admission_middleware::<B>)`.
//! Bypassed paths go straight to the handler. Rejected requests get a 429
//! and never reach the handler. Admitted responses carry `X-RateLimit-*`
//! headers.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::ratelimit::{AdmissionBackend, AdmissionResult, RequestDescriptor, Tier};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");
pub const X_WALLET_ADDRESS: HeaderName = HeaderName::from_static("x-wallet-address");

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_RATELIMIT_TIER: HeaderName = HeaderName::from_static("x-ratelimit-tier");

/// Paths that skip admission entirely. Matching is exact.
#[derive(Debug, Clone, Default)]
pub struct BypassList {
    paths: HashSet<String>,
}

impl BypassList {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }
}

/// Shared state for the middleware and the service handlers.
pub struct AppState<B> {
    pub backend: Arc<B>,
    pub bypass: Arc<BypassList>,
}

impl<B> AppState<B> {
    pub fn new(backend: Arc<B>, bypass: BypassList) -> Self {
        Self {
            backend,
            bypass: Arc::new(bypass),
        }
    }
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            bypass: self.bypass.clone(),
        }
    }
}

/// Build a descriptor from request headers and connection info.
pub fn descriptor_from_parts(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    path: &str,
) -> RequestDescriptor {
    let header_str = |name: &HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    RequestDescriptor {
        peer_addr: peer.map(|addr| addr.ip().to_string()),
        forwarded_for: header_str(&X_FORWARDED_FOR),
        api_key: header_str(&X_API_KEY),
        wallet_address: header_str(&X_WALLET_ADDRESS),
        path: path.to_string(),
    }
}

/// Build a descriptor for an axum request.
pub fn descriptor_from_request(request: &Request) -> RequestDescriptor {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    descriptor_from_parts(request.headers(), peer, request.uri().path())
}

/// Admission middleware.
pub async fn admission_middleware<B>(
    State(state): State<AppState<B>>,
    request: Request,
    next: Next,
) -> Response
where
    B: AdmissionBackend + 'static,
{
    if state.bypass.contains(request.uri().path()) {
        trace!(path = %request.uri().path(), "Bypassing admission");
        return next.run(request).await;
    }

    let descriptor = descriptor_from_request(&request);
    let result = state.backend.check(&descriptor).await;

    if !result.allowed {
        debug!(path = %descriptor.path, tier = %result.tier, "Request rejected");
        return RateLimitRejection::new(result, state.backend.window()).into_response();
    }

    let mut response = next.run(request).await;
    apply_quota_headers(response.headers_mut(), &result);
    response
}

/// Attach `X-RateLimit-*` headers describing `result`.
pub fn apply_quota_headers(headers: &mut HeaderMap, result: &AdmissionResult) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    if let Ok(reset) = HeaderValue::from_str(&format_reset(result.reset_at)) {
        headers.insert(X_RATELIMIT_RESET, reset);
    }
    headers.insert(X_RATELIMIT_TIER, HeaderValue::from_static(result.tier.as_str()));
}

/// ISO-8601 form used in headers and bodies.
pub fn format_reset(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Human-readable window length: "hour", "5 minutes", "90 seconds".
pub fn describe_window(window: Duration) -> String {
    const UNITS: [(i64, &str); 4] = [(86400, "day"), (3600, "hour"), (60, "minute"), (1, "second")];

    let secs = window.num_seconds();
    for (unit_secs, name) in UNITS {
        if secs >= unit_secs && secs % unit_secs == 0 {
            let n = secs / unit_secs;
            return if n == 1 {
                name.to_string()
            } else {
                format!("{} {}s", n, name)
            };
        }
    }
    format!("{} seconds", secs)
}

/// JSON body of a 429 response.
#[derive(Debug, Clone, Serialize)]
pub struct RejectionBody {
    pub error: &'static str,
    pub message: String,
    pub limit: u64,
    pub retry_after: String,
    pub tier: Tier,
}

/// A rate-limit rejection, rendered as HTTP 429.
#[derive(Debug, Clone)]
pub struct RateLimitRejection {
    result: AdmissionResult,
    window: Duration,
}

impl RateLimitRejection {
    pub fn new(result: AdmissionResult, window: Duration) -> Self {
        Self { result, window }
    }

    pub fn body(&self) -> RejectionBody {
        RejectionBody {
            error: "rate_limit_exceeded",
            message: format!(
                "You have exceeded the rate limit of {} requests per {}.",
                self.result.limit,
                describe_window(self.window)
            ),
            limit: self.result.limit,
            retry_after: format_reset(self.result.reset_at),
            tier: self.result.tier,
        }
    }
}

impl IntoResponse for RateLimitRejection {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        apply_quota_headers(&mut headers, &self.result);
        headers.insert(
            header::RETRY_AFTER,
            HeaderValue::from(self.window.num_seconds().max(1)),
        );

        (StatusCode::TOO_MANY_REQUESTS, headers, Json(self.body())).into_response()
    }
}
