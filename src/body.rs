//! Request body buffering.
//!
//! The inbound body is a one-shot stream. It is read once, before the first
//! forwarding attempt, and the resulting bytes are shared by every attempt.

use crate::error::AttemptError;
use http::Method;
use http_body_util::BodyExt;
use hyper::body::{Body, Bytes};
use tracing::debug;

/// Payload captured from the inbound request. `None` means no body.
pub type BufferedBody = Option<Bytes>;

/// Whether a forwarded request with this method may carry a body.
///
/// GET, HEAD and OPTIONS never do, whatever their case.
pub fn method_allows_body(method: &Method) -> bool {
    let name = method.as_str();
    !["GET", "HEAD", "OPTIONS"]
        .iter()
        .any(|bodyless| name.eq_ignore_ascii_case(bodyless))
}

/// Reads the whole request body into memory.
///
/// Consumes `body`, so it cannot be read twice. Bodyless methods yield
/// `None` without polling the stream; so do empty bodies.
///
/// # Errors
///
/// Returns [`AttemptError::BodyRead`] if the stream itself fails.
pub async fn buffer_body<B>(method: &Method, body: B) -> Result<BufferedBody, AttemptError>
where
    B: Body<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    if !method_allows_body(method) {
        return Ok(None);
    }

    if body.is_end_stream() || body.size_hint().exact() == Some(0) {
        return Ok(None);
    }

    let collected = body
        .collect()
        .await
        .map_err(|e| AttemptError::BodyRead(e.to_string()))?;
    let bytes = collected.to_bytes();

    debug!(bytes = bytes.len(), "buffered request body");

    if bytes.is_empty() {
        Ok(None)
    } else {
        Ok(Some(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FailingBody;
    use http_body_util::{Empty, Full};

    #[test]
    fn test_method_allows_body() {
        assert!(!method_allows_body(&Method::GET));
        assert!(!method_allows_body(&Method::HEAD));
        assert!(!method_allows_body(&Method::OPTIONS));
        assert!(method_allows_body(&Method::POST));
        assert!(method_allows_body(&Method::PUT));
        assert!(method_allows_body(&Method::DELETE));
    }

    #[test]
    fn test_method_allows_body_case_insensitive() {
        let lower = Method::from_bytes(b"get").unwrap();
        assert!(!method_allows_body(&lower));
        let mixed = Method::from_bytes(b"Options").unwrap();
        assert!(!method_allows_body(&mixed));
        let patch = Method::from_bytes(b"patch").unwrap();
        assert!(method_allows_body(&patch));
    }

    #[tokio::test]
    async fn test_get_never_buffers() {
        let body = Full::new(Bytes::from_static(b"ignored"));
        let buffered = buffer_body(&Method::GET, body).await.unwrap();
        assert!(buffered.is_none());
    }

    #[tokio::test]
    async fn test_bodyless_method_does_not_poll_stream() {
        let buffered = buffer_body(&Method::HEAD, FailingBody).await.unwrap();
        assert!(buffered.is_none());
    }

    #[tokio::test]
    async fn test_post_buffers_payload() {
        let body = Full::new(Bytes::from_static(b"{\"a\":1}"));
        let buffered = buffer_body(&Method::POST, body).await.unwrap();
        assert_eq!(buffered, Some(Bytes::from_static(b"{\"a\":1}")));
    }

    #[tokio::test]
    async fn test_post_empty_body_is_none() {
        let buffered = buffer_body(&Method::POST, Empty::<Bytes>::new())
            .await
            .unwrap();
        assert!(buffered.is_none());

        let buffered = buffer_body(&Method::PUT, Full::new(Bytes::new()))
            .await
            .unwrap();
        assert!(buffered.is_none());
    }

    #[tokio::test]
    async fn test_read_failure() {
        let err = buffer_body(&Method::POST, FailingBody).await.unwrap_err();
        assert!(matches!(err, AttemptError::BodyRead(_)));
    }
}
