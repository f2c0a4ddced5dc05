// src/utils/rate_limit.rs

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;

use crate::error::AppError;

/// Prune expired windows once the table grows past this many keys.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    start: u64,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after: u64 },
}

/// Fixed-window request counter keyed by client.
///
/// A window covers `[k * window_secs, (k + 1) * window_secs)`; the counter
/// resets when a request lands in a later window.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    scope: &'static str,
    window_secs: u64,
    max_requests: u32,
    counters: DashMap<String, Window>,
}

impl FixedWindowLimiter {
    pub fn new(scope: &'static str, window_secs: u64, max_requests: u32) -> Self {
        Self {
            scope,
            window_secs: window_secs.max(1),
            max_requests,
            counters: DashMap::new(),
        }
    }

    pub fn check(&self, key: &str) -> Decision {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.check_at(key, now)
    }

    /// Counts one request for `key` at `now` (Unix seconds).
    pub fn check_at(&self, key: &str, now: u64) -> Decision {
        let window_start = now - now % self.window_secs;

        if self.counters.len() > PRUNE_THRESHOLD {
            self.counters.retain(|_, w| w.start >= window_start);
        }

        let mut entry = self.counters.entry(key.to_owned()).or_insert(Window {
            start: window_start,
            count: 0,
        });

        if entry.start != window_start {
            *entry = Window {
                start: window_start,
                count: 0,
            };
        }

        if entry.count >= self.max_requests {
            return Decision::Limited {
                retry_after: (window_start + self.window_secs).saturating_sub(now).max(1),
            };
        }

        entry.count += 1;
        Decision::Allowed {
            remaining: self.max_requests - entry.count,
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }
}

/// Client address: first `X-Forwarded-For` hop, else the peer address.
fn client_key(req: &Request<Body>) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Axum Middleware: rejects requests over the limiter's budget with 429.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<FixedWindowLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let key = client_key(&req);

    match limiter.check(&key) {
        Decision::Allowed { .. } => Ok(next.run(req).await),
        Decision::Limited { retry_after } => {
            tracing::warn!(
                scope = limiter.scope,
                client = %key,
                "Rate limit exceeded"
            );
            Err(AppError::TooManyRequests(retry_after))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = FixedWindowLimiter::new("test", 60, 3);

        assert_eq!(limiter.check_at("a", 120), Decision::Allowed { remaining: 2 });
        assert_eq!(limiter.check_at("a", 121), Decision::Allowed { remaining: 1 });
        assert_eq!(limiter.check_at("a", 150), Decision::Allowed { remaining: 0 });
        assert_eq!(
            limiter.check_at("a", 170),
            Decision::Limited { retry_after: 10 }
        );
    }

    #[test]
    fn resets_in_next_window() {
        let limiter = FixedWindowLimiter::new("test", 60, 1);

        assert!(matches!(limiter.check_at("a", 59), Decision::Allowed { .. }));
        assert!(matches!(limiter.check_at("a", 59), Decision::Limited { .. }));
        assert!(matches!(limiter.check_at("a", 60), Decision::Allowed { .. }));
    }

    #[test]
    fn keys_are_isolated() {
        let limiter = FixedWindowLimiter::new("test", 60, 1);

        assert!(matches!(limiter.check_at("a", 10), Decision::Allowed { .. }));
        assert!(matches!(limiter.check_at("b", 10), Decision::Allowed { .. }));
        assert!(matches!(limiter.check_at("a", 11), Decision::Limited { .. }));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn forwarded_header_wins() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&req), "203.0.113.7");

        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_key(&req), "unknown");
    }
}
