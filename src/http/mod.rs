//! HTTP transport: identity extraction, decision mapping and the server loop.

mod identity;
mod server;
mod service;

pub use identity::{parse_api_key, IdentityError, RequestIdentity, API_KEY_HEADER};
pub use server::HttpServer;
pub use service::{RateLimitService, RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING};
