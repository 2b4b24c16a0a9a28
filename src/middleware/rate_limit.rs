//! Per-client request throttling.
//!
//! A true sliding window: every client keeps the timestamps of its requests
//! from the last window, so a burst that exhausts the budget recovers
//! gradually as old requests age out instead of all at once on a window
//! boundary. Exceeding the budget produces the standard error envelope with
//! `RATE_LIMIT_EXCEEDED` and a Retry-After header.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clients: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The default API budget: requests per one-minute sliding window.
    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Record one request for `client`. Returns the remaining budget, or the
    /// time until the oldest in-window request expires when the budget is
    /// spent.
    pub fn try_acquire(&self, client: IpAddr) -> Result<usize, Duration> {
        let now = Instant::now();
        let mut clients = self.clients.lock();
        let history = clients.entry(client).or_default();

        while let Some(&oldest) = history.front() {
            if now.duration_since(oldest) >= self.window {
                history.pop_front();
            } else {
                break;
            }
        }

        if history.len() >= self.max_requests {
            let oldest = *history.front().expect("budget spent implies history");
            return Err(self.window.saturating_sub(now.duration_since(oldest)));
        }

        history.push_back(now);
        Ok(self.max_requests - history.len())
    }

    /// Drop clients with no in-window requests. Called from a background
    /// task so one-off clients do not accumulate forever.
    pub fn evict_idle(&self) {
        let now = Instant::now();
        let mut clients = self.clients.lock();
        clients.retain(|_, history| {
            history
                .back()
                .map(|&last| now.duration_since(last) < self.window)
                .unwrap_or(false)
        });
    }
}

/// Axum middleware wrapping the limiter.
pub async fn throttle(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match limiter.try_acquire(addr.ip()) {
        Ok(_) => next.run(request).await,
        Err(retry_after) => {
            let retry_secs = retry_after.as_secs().max(1);
            warn!(ip = %addr.ip(), retry_after_secs = retry_secs, "Rate limit exceeded");

            let body = serde_json::json!({
                "error": {
                    "code": "RATE_LIMIT_EXCEEDED",
                    "message": "Too many requests. Please slow down.",
                    "details": { "retry_after": retry_secs },
                }
            });
            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_secs.to_string())],
                axum::Json(body),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(n: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, n])
    }

    #[test]
    fn test_budget_counts_down_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert_eq!(limiter.try_acquire(client(1)), Ok(2));
        assert_eq!(limiter.try_acquire(client(1)), Ok(1));
        assert_eq!(limiter.try_acquire(client(1)), Ok(0));

        let retry_after = limiter.try_acquire(client(1)).unwrap_err();
        assert!(retry_after <= Duration::from_secs(60));
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.try_acquire(client(1)).is_ok());
        assert!(limiter.try_acquire(client(1)).is_err());
        assert!(limiter.try_acquire(client(2)).is_ok());
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_millis(30));
        assert!(limiter.try_acquire(client(1)).is_ok());
        assert!(limiter.try_acquire(client(1)).is_ok());
        assert!(limiter.try_acquire(client(1)).is_err());

        // After the window passes the budget is available again
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.try_acquire(client(1)).is_ok());
    }

    #[test]
    fn test_evict_idle_clears_stale_clients() {
        let limiter = RateLimiter::new(2, Duration::from_millis(10));
        limiter.try_acquire(client(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        limiter.evict_idle();
        assert!(limiter.clients.lock().is_empty());
    }
}
