//! Per-IP token-bucket rate limiting: 60 req/min on room endpoints, 100
//! req/min on message endpoints.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tracing::warn;

use crate::error::ApiError;

type KeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

pub struct RateLimitService {
    room_limiter: KeyedLimiter,
    message_limiter: KeyedLimiter,
}

impl RateLimitService {
    pub fn new(room_per_minute: u32, message_per_minute: u32) -> Result<Self, String> {
        let room_quota = NonZeroU32::new(room_per_minute)
            .ok_or("room rate limit must be greater than 0")?;
        let message_quota = NonZeroU32::new(message_per_minute)
            .ok_or("message rate limit must be greater than 0")?;
        Ok(Self {
            room_limiter: RateLimiter::keyed(Quota::per_minute(room_quota)),
            message_limiter: RateLimiter::keyed(Quota::per_minute(message_quota)),
        })
    }

    pub fn check_room(&self, ip: IpAddr) -> bool {
        self.room_limiter.check_key(&ip).is_ok()
    }

    pub fn check_message(&self, ip: IpAddr) -> bool {
        self.message_limiter.check_key(&ip).is_ok()
    }
}

pub async fn room_rate_limit_middleware(
    State(service): State<Arc<RateLimitService>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !service.check_room(addr.ip()) {
        warn!(ip = %addr.ip(), "room endpoint rate limit exceeded");
        return Err(ApiError::RateLimited);
    }
    Ok(next.run(request).await)
}

pub async fn message_rate_limit_middleware(
    State(service): State<Arc<RateLimitService>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !service.check_message(addr.ip()) {
        warn!(ip = %addr.ip(), "message endpoint rate limit exceeded");
        return Err(ApiError::RateLimited);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limits_are_rejected() {
        assert!(RateLimitService::new(0, 100).is_err());
        assert!(RateLimitService::new(60, 0).is_err());
    }

    #[test]
    fn bursts_beyond_the_quota_are_blocked() {
        let service = RateLimitService::new(2, 2).expect("service");
        let ip: IpAddr = "10.0.0.1".parse().expect("ip");
        assert!(service.check_room(ip));
        assert!(service.check_room(ip));
        assert!(!service.check_room(ip));
        // Independent buckets per key.
        let other: IpAddr = "10.0.0.2".parse().expect("ip");
        assert!(service.check_room(other));
    }
}
