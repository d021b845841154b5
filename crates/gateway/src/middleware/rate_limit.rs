//! Rate limiting middleware using token bucket algorithm

use asynx_common::errors::AppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Process-wide limiter shared by every route
pub struct RateLimit {
    limiter: DefaultDirectRateLimiter,
    requests_per_second: u32,
}

impl RateLimit {
    /// Zero values are raised to one
    pub fn new(requests_per_second: u32, burst: u32) -> Arc<Self> {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);

        Arc::new(Self {
            limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
            requests_per_second: rate.get(),
        })
    }

    /// Take one token if available
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// Reject with 429 once the bucket is empty
pub async fn rate_limit_middleware(
    State(limit): State<Arc<RateLimit>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if limit.check() {
        return Ok(next.run(request).await);
    }

    tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
    Err(AppError::RateLimited {
        limit: limit.requests_per_second,
    })
}
