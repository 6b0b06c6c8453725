//! Response caching middleware

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::IntoResponse,
};

/// Stamps a `Cache-Control: max-age` header on responses that did not set
/// their own caching policy. Handlers that set the header keep it.
pub async fn http_cache(
    State(max_age_sec): State<usize>,
    request: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if !headers.contains_key(header::CACHE_CONTROL) {
        if let Ok(value) = HeaderValue::from_str(&format!("max-age={}", max_age_sec)) {
            headers.insert(header::CACHE_CONTROL, value);
        }
    }
    response
}
