mod http_cache;
mod rate_limit;
mod requests_logging;

pub use http_cache::http_cache;
pub use rate_limit::{
    rate_limit_error_handler, IpKeyExtractor, LOGIN_BURST_SIZE, LOGIN_REPLENISH_INTERVAL_SEC,
};
pub use requests_logging::{log_requests, RequestsLoggingLevel};
