//! Rate limiting for the login endpoint using tower-governor
//!
//! IP-based limiting, so one client hammering the password check cannot
//! lock everyone else out. The governor layer itself is assembled in
//! server.rs where the routes are wired.

use axum::{
    extract::{ConnectInfo, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tower_governor::{key_extractor::KeyExtractor, GovernorError};
use tracing::warn;

use crate::server::metrics::record_rate_limit_hit;

/// Seconds between replenished login attempts per IP.
pub const LOGIN_REPLENISH_INTERVAL_SEC: u64 = 6;

/// Login attempts a single IP may burst before throttling kicks in.
pub const LOGIN_BURST_SIZE: u32 = 10;

/// Extracts the client IP from ConnectInfo for IP-based rate limiting.
///
/// Requires the app to be served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
#[derive(Clone)]
pub struct IpKeyExtractor;

impl KeyExtractor for IpKeyExtractor {
    type Key = SocketAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr)
            .ok_or(GovernorError::UnableToExtractKey)
    }
}

/// Logs rate limit violations and maps them to responses.
pub fn rate_limit_error_handler(err: GovernorError) -> Response {
    match err {
        GovernorError::TooManyRequests { .. } => {
            warn!("Login rate limit exceeded");
            record_rate_limit_hit("login");
            StatusCode::TOO_MANY_REQUESTS.into_response()
        }
        _ => {
            warn!("Rate limiting error: {:?}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
