//! Middleware: per-client request throttling. Request logging comes from
//! tower-http's trace layer.

pub mod rate_limit;

pub use rate_limit::{throttle, RateLimiter};
