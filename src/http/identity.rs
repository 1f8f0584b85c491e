//! Deriving the identifier and quota for an incoming request.

use std::net::SocketAddr;
use std::time::Duration;

use hyper::HeaderMap;
use thiserror::Error;

use crate::ratelimit::Quota;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "api_key";

/// Minimum number of underscore-delimited fields in an API key.
const API_KEY_MIN_FIELDS: usize = 5;
/// Field holding the key's rate.
const API_KEY_RATE_FIELD: usize = 2;
/// Field holding the key's block duration, in minutes.
const API_KEY_BLOCK_FIELD: usize = 4;

/// Why a request's identity could not be determined.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("API key header is not valid text")]
    InvalidHeader,
    #[error("invalid API key format: expected at least 5 parts, got {0}")]
    TooFewParts(usize),
    #[error("invalid rate value in API key: {0}")]
    InvalidRate(String),
    #[error("invalid block duration value in API key: {0}")]
    InvalidBlockDuration(String),
}

/// Who a request is counted against, and under which quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    /// The rate-limited key
    pub identifier: String,
    /// The quota for that key
    pub quota: Quota,
}

impl RequestIdentity {
    /// Resolve the identity of a request.
    ///
    /// A request with an API key is limited by that key under the quota
    /// encoded in it. Anything else is limited by client IP under
    /// `default_quota`.
    pub fn resolve(
        headers: &HeaderMap,
        peer: SocketAddr,
        default_quota: Quota,
    ) -> Result<Self, IdentityError> {
        match headers.get(API_KEY_HEADER) {
            Some(value) => {
                let key = value.to_str().map_err(|_| IdentityError::InvalidHeader)?;
                if key.is_empty() {
                    return Ok(Self::client_ip(peer, default_quota));
                }
                Ok(Self {
                    identifier: key.to_string(),
                    quota: parse_api_key(key)?,
                })
            }
            None => Ok(Self::client_ip(peer, default_quota)),
        }
    }

    fn client_ip(peer: SocketAddr, quota: Quota) -> Self {
        Self {
            identifier: peer.ip().to_string(),
            quota,
        }
    }
}

/// Extract the quota embedded in an API key such as `key_rate_20_block_5`.
pub fn parse_api_key(key: &str) -> Result<Quota, IdentityError> {
    let parts: Vec<&str> = key.split('_').collect();
    if parts.len() < API_KEY_MIN_FIELDS {
        return Err(IdentityError::TooFewParts(parts.len()));
    }

    let rate: u32 = parts[API_KEY_RATE_FIELD]
        .parse()
        .map_err(|_| IdentityError::InvalidRate(parts[API_KEY_RATE_FIELD].to_string()))?;
    let block_minutes: u64 = parts[API_KEY_BLOCK_FIELD].parse().map_err(|_| {
        IdentityError::InvalidBlockDuration(parts[API_KEY_BLOCK_FIELD].to_string())
    })?;

    Quota::new(rate, Duration::from_secs(block_minutes.saturating_mul(60)))
        .map_err(|_| IdentityError::InvalidRate(parts[API_KEY_RATE_FIELD].to_string()))
}
