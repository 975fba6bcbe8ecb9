//! Diagnostic response headers.

use crate::origin::Origin;
use http::header::{HeaderName, HeaderValue};
use http::Response;
use std::time::Instant;
use tracing::warn;

/// URL of the origin that served the response.
pub const ENDPOINT_HEADER: HeaderName = HeaderName::from_static("x-load-balancer-endpoint");
/// Milliseconds from dispatch start to response.
pub const LATENCY_HEADER: HeaderName = HeaderName::from_static("x-load-balancer-latency");
/// Milliseconds spent selecting or probing before the winning forward.
pub const GATHER_LATENCY_HEADER: HeaderName =
    HeaderName::from_static("x-load-balancer-endpoint-gather-latency");
/// Number of origins attempted. Only set when more than one was.
pub const TRIED_COUNT_HEADER: HeaderName = HeaderName::from_static("x-load-balancer-tried-count");
/// Comma-joined URLs of the origins attempted. Only set when more than one was.
pub const TRIED_ENDPOINTS_HEADER: HeaderName =
    HeaderName::from_static("x-load-balancer-tried-endpoints");

/// Stamps the diagnostic headers onto a response.
///
/// Status, existing headers and body are left untouched.
pub fn annotate<B>(
    response: Response<B>,
    chosen: &Origin,
    tried: &[Origin],
    start: Instant,
    gather: Instant,
) -> Response<B> {
    let total_ms = start.elapsed().as_millis() as u64;
    let gather_ms = gather.saturating_duration_since(start).as_millis() as u64;

    let (mut parts, body) = response.into_parts();
    let headers = &mut parts.headers;

    match HeaderValue::from_str(&chosen.url) {
        Ok(value) => {
            headers.insert(ENDPOINT_HEADER, value);
        }
        Err(e) => warn!(origin = %chosen.url, error = %e, "origin url is not a valid header value"),
    }
    headers.insert(LATENCY_HEADER, HeaderValue::from(total_ms));
    headers.insert(GATHER_LATENCY_HEADER, HeaderValue::from(gather_ms));

    if tried.len() > 1 {
        headers.insert(TRIED_COUNT_HEADER, HeaderValue::from(tried.len() as u64));
        let joined = tried
            .iter()
            .map(|o| o.url.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        if let Ok(value) = HeaderValue::from_str(&joined) {
            headers.insert(TRIED_ENDPOINTS_HEADER, value);
        }
    }

    Response::from_parts(parts, body)
}
