//! Shared machinery used by every source: HTTP access with retries, the
//! request rate gate and the bounded worker pool.

pub mod http;
pub mod processor;
pub mod rate_limiter;

pub use http::HttpClient;
pub use processor::{ConcurrentProcessor, ItemId};
pub use rate_limiter::RateLimiter;
