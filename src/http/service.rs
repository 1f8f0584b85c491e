//! Admission control for HTTP requests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, RETRY_AFTER};
use hyper::{Request, Response, StatusCode};
use tracing::{debug, error, instrument, warn};

use super::identity::RequestIdentity;
use crate::config::LimitsConfig;
use crate::error::Result;
use crate::ratelimit::{Clock, Decision, Quota, RateLimiter, SystemClock};
use crate::store::{LimiterStore, StoreError};

/// Header reporting the identifier's rate.
pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
/// Header reporting the accesses left in the current window.
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

const ACCESS_GRANTED: &str = "access granted";
const BLOCKED_MESSAGE: &str = "You have exceeded the allowed number of requests within the specified time window and have been temporarily blocked.";

/// Maps HTTP requests onto rate limiter decisions and decisions onto responses.
pub struct RateLimitService<S: LimiterStore + ?Sized, C: Clock = SystemClock> {
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter<S, C>>,
    /// Quota for requests without an API key
    default_quota: Quota,
    /// Upper bound on a single decision
    decision_timeout: Option<Duration>,
    /// Admit requests when the store fails
    fail_open: bool,
}

impl<S: LimiterStore + ?Sized, C: Clock> RateLimitService<S, C> {
    /// Create a service from the limits configuration.
    pub fn new(rate_limiter: Arc<RateLimiter<S, C>>, limits: &LimitsConfig) -> Result<Self> {
        Ok(Self {
            rate_limiter,
            default_quota: limits.default_quota()?,
            decision_timeout: limits.decision_timeout(),
            fail_open: limits.fail_open,
        })
    }

    /// Decide on one request from `peer`.
    #[instrument(skip(self, request), fields(method = %request.method(), path = %request.uri().path()))]
    pub async fn handle<B>(&self, request: &Request<B>, peer: SocketAddr) -> Response<Full<Bytes>> {
        let identity = match RequestIdentity::resolve(request.headers(), peer, self.default_quota) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Rejecting request with invalid API key");
                return text_response(StatusCode::BAD_REQUEST, "Invalid API key format");
            }
        };

        debug!(
            identifier = %identity.identifier,
            rate = identity.quota.rate(),
            block_duration = ?identity.quota.block_duration(),
            "Processing request"
        );

        let result = match self.decision_timeout {
            Some(timeout) => {
                self.rate_limiter
                    .decide_within(&identity.identifier, identity.quota, timeout)
                    .await
            }
            None => {
                self.rate_limiter
                    .decide(&identity.identifier, identity.quota)
                    .await
            }
        };

        match result {
            Ok(decision) => decision_response(decision),
            Err(e) => self.failure_response(&identity, e),
        }
    }

    fn failure_response(&self, identity: &RequestIdentity, err: StoreError) -> Response<Full<Bytes>> {
        if self.fail_open {
            warn!(
                identifier = %identity.identifier,
                error = %err,
                "Store unavailable, admitting request"
            );
            return text_response(StatusCode::OK, ACCESS_GRANTED);
        }

        error!(
            identifier = %identity.identifier,
            error = %err,
            "Store unavailable, rejecting request"
        );
        text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }
}

fn decision_response(decision: Decision) -> Response<Full<Bytes>> {
    match decision {
        Decision::Allow { limit, remaining } => {
            let mut response = text_response(StatusCode::OK, ACCESS_GRANTED);
            let headers = response.headers_mut();
            headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
            response
        }
        Decision::Deny { limit, retry_after } => {
            let mut response = text_response(StatusCode::TOO_MANY_REQUESTS, BLOCKED_MESSAGE);
            let headers = response.headers_mut();
            headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(0u32));
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
            response
        }
    }
}

/// Whole seconds, rounded up, so clients never retry early.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::identity::API_KEY_HEADER;
    use crate::ratelimit::{Limiter, ManualClock};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    #[derive(Debug, Default)]
    struct FailingStore;

    #[async_trait]
    impl LimiterStore for FailingStore {
        async fn create(&self, _limiter: &Limiter) -> std::result::Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }

        async fn update(&self, _limiter: &Limiter) -> std::result::Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }

        async fn find(&self, _identifier: &str) -> std::result::Result<Limiter, StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
    }

    fn limits(rate: u32) -> LimitsConfig {
        LimitsConfig {
            rate,
            ..LimitsConfig::default()
        }
    }

    fn memory_service(rate: u32) -> RateLimitService<MemoryStore, ManualClock> {
        let limiter = RateLimiter::with_clock(
            Arc::new(MemoryStore::new()),
            ManualClock::starting_now(),
        );
        RateLimitService::new(Arc::new(limiter), &limits(rate)).unwrap()
    }

    fn peer() -> SocketAddr {
        "198.51.100.4:40000".parse().unwrap()
    }

    fn request() -> Request<()> {
        Request::builder().uri("/").body(()).unwrap()
    }

    fn request_with_key(key: &str) -> Request<()> {
        Request::builder()
            .uri("/")
            .header(API_KEY_HEADER, key)
            .body(())
            .unwrap()
    }

    #[tokio::test]
    async fn test_allowed_request_returns_ok_with_headers() {
        let service = memory_service(2);

        let response = service.handle(&request(), peer()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[RATE_LIMIT_LIMIT], "2");
        assert_eq!(response.headers()[RATE_LIMIT_REMAINING], "1");
    }

    #[tokio::test]
    async fn test_over_limit_returns_too_many_requests() {
        let service = memory_service(1);

        assert_eq!(service.handle(&request(), peer()).await.status(), StatusCode::OK);
        let response = service.handle(&request(), peer()).await;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "300");
        assert_eq!(response.headers()[RATE_LIMIT_REMAINING], "0");
    }

    #[tokio::test]
    async fn test_api_key_quota_is_tracked_separately_from_ip() {
        let service = memory_service(1);

        assert_eq!(service.handle(&request(), peer()).await.status(), StatusCode::OK);
        for _ in 0..3 {
            let response = service.handle(&request_with_key("k_rate_3_block_1"), peer()).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = service.handle(&request_with_key("k_rate_3_block_1"), peer()).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "60");
    }

    #[tokio::test]
    async fn test_invalid_api_key_is_bad_request() {
        let service = memory_service(1);

        let response = service.handle(&request_with_key("short_key"), peer()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let limiter = RateLimiter::new(Arc::new(FailingStore));
        let service = RateLimitService::new(Arc::new(limiter), &limits(5)).unwrap();

        let response = service.handle(&request(), peer()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open_when_configured() {
        let limiter = RateLimiter::new(Arc::new(FailingStore));
        let config = LimitsConfig {
            fail_open: true,
            ..limits(5)
        };
        let service = RateLimitService::new(Arc::new(limiter), &config).unwrap();

        let response = service.handle(&request(), peer()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_secs(5)), 5);
        assert_eq!(retry_after_secs(Duration::from_millis(4_200)), 5);
        assert_eq!(retry_after_secs(Duration::ZERO), 0);
    }
}
