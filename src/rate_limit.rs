//! Admission controller
//!
//! Fixed-window request counter per client. Buckets live in a sharded
//! concurrent map; the check-and-increment for a key happens while that
//! key's entry is exclusively held, so concurrent requests from one client
//! can never both take the last slot.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::metrics;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Longest admission window accepted from configuration (one year)
pub const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u32,
    reset_at: Instant,
}

/// Outcome of a single admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub remaining: u32,
}

pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    max_requests: u32,
    window: Duration,
    health_path: String,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            max_requests,
            window,
            health_path: "/health".to_string(),
        }
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self {
            health_path: cfg.health_path.clone(),
            ..Self::new(cfg.requests_per_window, Duration::from_secs(cfg.window_seconds))
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn health_path(&self) -> &str {
        &self.health_path
    }

    /// Number of tracked client buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn admit(&self, client_key: &str) -> Admission {
        self.admit_at(client_key, Instant::now())
    }

    /// End of a window opened at `now`; clamps to the longest representable
    /// window instead of overflowing the clock.
    fn window_end(&self, now: Instant) -> Instant {
        now.checked_add(self.window)
            .or_else(|| now.checked_add(MAX_WINDOW))
            .unwrap_or(now)
    }

    /// Admission check against an explicit clock reading
    pub fn admit_at(&self, client_key: &str, now: Instant) -> Admission {
        let reset_at = self.window_end(now);
        // The entry guard holds the shard lock until the end of this function
        let mut bucket = self
            .buckets
            .entry(client_key.to_string())
            .or_insert_with(|| Bucket { count: 0, reset_at });

        if now > bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = reset_at;
        }

        if bucket.count >= self.max_requests {
            return Admission {
                allowed: false,
                remaining: 0,
            };
        }

        bucket.count += 1;
        Admission {
            allowed: true,
            remaining: self.max_requests - bucket.count,
        }
    }

    /// Drop buckets whose window has already passed. Returns how many were removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| now < bucket.reset_at);
        before.saturating_sub(self.buckets.len())
    }

    /// Periodically evict expired buckets so idle clients do not accumulate
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.sweep_expired(Instant::now());
                if removed > 0 {
                    debug!(removed, remaining = limiter.bucket_count(), "Swept expired rate-limit buckets");
                }
            }
        })
    }
}

/// Identify the caller: forwarded-for, then real-ip, then the peer address
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn set_quota_headers(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
}

/// Admission middleware; the health path bypasses it entirely
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == limiter.health_path() {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(request.headers(), peer);
    let admission = limiter.admit(&client);

    if !admission.allowed {
        let window_seconds = limiter.window().as_secs();
        warn!(
            client = %client,
            method = %request.method(),
            path = %request.uri().path(),
            "Rate limit exceeded"
        );
        metrics::record_admission("rejected");

        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Rate limit exceeded",
                "limit": limiter.max_requests(),
                "window_seconds": window_seconds,
            })),
        )
            .into_response();
        let headers = response.headers_mut();
        set_quota_headers(headers, limiter.max_requests(), 0);
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(window_seconds));
        return response;
    }

    metrics::record_admission("admitted");
    let mut response = next.run(request).await;
    set_quota_headers(response.headers_mut(), limiter.max_requests(), admission.remaining);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_nth_allowed_next_rejected() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(limiter.admit_at("a", now), Admission { allowed: true, remaining: 2 });
        assert_eq!(limiter.admit_at("a", now), Admission { allowed: true, remaining: 1 });
        assert_eq!(limiter.admit_at("a", now), Admission { allowed: true, remaining: 0 });
        assert_eq!(limiter.admit_at("a", now), Admission { allowed: false, remaining: 0 });

        // Other clients are independent
        assert!(limiter.admit_at("b", now).allowed);
    }

    #[test]
    fn test_window_reset() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.admit_at("a", now).allowed);
        assert!(!limiter.admit_at("a", now + Duration::from_secs(59)).allowed);
        // The count resets only once the reset instant has passed
        assert!(!limiter.admit_at("a", now + Duration::from_secs(60)).allowed);
        assert!(limiter.admit_at("a", now + Duration::from_secs(60) + Duration::from_nanos(1)).allowed);
    }

    #[test]
    fn test_oversized_window_does_not_overflow_clock() {
        let limiter = RateLimiter::new(1, Duration::from_secs(u64::MAX));
        let now = Instant::now();

        assert!(limiter.admit_at("a", now).allowed);
        assert!(!limiter.admit("a").allowed);
        assert!(!limiter.admit_at("a", now + Duration::from_secs(3600)).allowed);
        assert_eq!(limiter.sweep_expired(now), 0);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10));
        let now = Instant::now();
        limiter.admit_at("old", now);
        limiter.admit_at("fresh", now + Duration::from_secs(8));

        assert_eq!(limiter.sweep_expired(now + Duration::from_secs(11)), 1);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_concurrent_admits_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::new(50, Duration::from_secs(60)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || (0..25).filter(|_| limiter.admit("shared").allowed).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }

    #[test]
    fn test_client_key_precedence() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, Some(peer)), "10.0.0.9");
        assert_eq!(client_key(&headers, None), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("192.168.1.2"));
        assert_eq!(client_key(&headers, Some(peer)), "192.168.1.2");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.1.1.1"));
        assert_eq!(client_key(&headers, Some(peer)), "203.0.113.7");
    }

    fn app(limiter: Arc<RateLimiter>) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/api/logs", get(|| async { "logs" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
    }

    fn request(path: &str) -> Request {
        axum::http::Request::builder()
            .uri(path)
            .header("x-forwarded-for", "198.51.100.1")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_middleware_headers_and_rejection() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(30)));
        let app = app(limiter);

        let ok = app.clone().oneshot(request("/api/logs")).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()[LIMIT_HEADER], "1");
        assert_eq!(ok.headers()[REMAINING_HEADER], "0");

        let rejected = app.clone().oneshot(request("/api/logs")).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rejected.headers()["retry-after"], "30");

        let body = axum::body::to_bytes(rejected.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Rate limit exceeded");
        assert_eq!(value["limit"], 1);
        assert_eq!(value["window_seconds"], 30);
    }

    #[tokio::test]
    async fn test_health_path_bypasses_admission() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(30)));
        let app = app(Arc::clone(&limiter));

        for _ in 0..5 {
            let response = app.clone().oneshot(request("/health")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(LIMIT_HEADER).is_none());
        }
        assert_eq!(limiter.bucket_count(), 0);
    }
}
