//! Vigil Middleware
//!
//! Request id propagation. Each request gets an `x-request-id` (kept when
//! the client already sent one) that is echoed on the response and recorded
//! on the request span.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use axum::{
    body::Body,
    http::{HeaderValue, Request, Response},
    middleware::Next,
};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Add a unique request ID to each request.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response<Body> {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .cloned()
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .unwrap_or_else(|| {
            HeaderValue::from_str(&Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
        });

    request.headers_mut().insert(REQUEST_ID_HEADER, request_id.clone());
    tracing::debug!(
        request_id = request_id.to_str().unwrap_or("unknown"),
        method = %request.method(),
        uri = %request.uri(),
        "Request"
    );

    let mut response = next.run(request).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
    response
}

// =============================================================================
// Tests
// =============================================================================
