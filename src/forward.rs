//! Forwarding a single attempt to an origin.

use crate::body::{method_allows_body, BufferedBody};
use crate::error::TransportError;
use crate::origin::Origin;
use async_trait::async_trait;
use http::request::Parts;
use http::{header, HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::{Bytes, Incoming};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::convert::Infallible;
use tokio::time::timeout;
use tracing::{debug, instrument};

/// Body type of responses handed back by a forwarder.
pub type ResponseBody = BoxBody<Bytes, hyper::Error>;

/// A response from an origin, or one built in its place.
pub type OriginResponse = Response<ResponseBody>;

type OutboundBody = BoxBody<Bytes, Infallible>;

/// Default limit on followed redirects.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Wraps bytes in a [`ResponseBody`].
pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Sends one attempt of a request to one origin.
///
/// Implementations must be safe to call concurrently and must not retry.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Forwards `head` plus the buffered body to `origin`.
    ///
    /// A body is only sent when the method permits one, even if `body` is
    /// `Some`.
    async fn forward(
        &self,
        origin: &Origin,
        head: &Parts,
        body: &BufferedBody,
    ) -> Result<OriginResponse, TransportError>;
}

/// Builds the origin URL for an inbound request, keeping path and query
/// verbatim.
pub fn target_url(origin: &Origin, uri: &Uri) -> String {
    let query = uri.query().map(|q| format!("?{}", q)).unwrap_or_default();
    origin.build_target_url(uri.path(), &query)
}

/// Forwarder backed by the hyper-util connection-pooling client.
///
/// Applies the origin's timeout to the whole attempt, redirects included.
///
/// # Example
///
/// ```no_run
/// use rust_edge_router::forward::HttpForwarder;
///
/// let forwarder = HttpForwarder::new().with_max_redirects(5);
/// ```
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client<HttpConnector, OutboundBody>,
    max_redirects: usize,
}

impl Default for HttpForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpForwarder {
    /// Creates a forwarder with its own connection pool.
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    /// Sets how many redirects are followed before giving up.
    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    async fn send_following_redirects(
        &self,
        initial_url: &str,
        head: &Parts,
        body: BufferedBody,
    ) -> Result<OriginResponse, TransportError> {
        let mut url = initial_url.to_string();
        let mut method = head.method.clone();
        let mut body = body;
        let mut headers = outbound_headers(&head.headers);

        for hop in 0..=self.max_redirects {
            let response = self.send_once(&url, &method, &headers, &body).await?;

            let Some(location) = redirect_location(&response, &url) else {
                let (parts, incoming) = response.into_parts();
                return Ok(Response::from_parts(parts, incoming.boxed()));
            };

            debug!(
                hop,
                from = %url,
                to = %location,
                status = response.status().as_u16(),
                "following redirect"
            );

            if rewrites_to_get(response.status(), &method) {
                method = Method::GET;
                body = None;
                strip_body_headers(&mut headers);
            }
            // The inbound Host only applies to the first target.
            headers.remove(header::HOST);
            url = location;
        }

        Err(TransportError::TooManyRedirects {
            url: initial_url.to_string(),
        })
    }

    async fn send_once(
        &self,
        url: &str,
        method: &Method,
        headers: &HeaderMap,
        body: &BufferedBody,
    ) -> Result<Response<Incoming>, TransportError> {
        let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| {
            TransportError::InvalidUri {
                url: url.to_string(),
                message: e.to_string(),
            }
        })?;

        let outbound: OutboundBody = match body {
            Some(bytes) if method_allows_body(method) => Full::new(bytes.clone()).boxed(),
            _ => Empty::new().boxed(),
        };

        let mut req = Request::builder()
            .method(method.clone())
            .uri(uri)
            .body(outbound)
            .map_err(|e| TransportError::InvalidUri {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        *req.headers_mut() = headers.clone();

        self.client
            .request(req)
            .await
            .map_err(|e| TransportError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    #[instrument(
        level = "debug",
        skip(self, head, body),
        fields(origin = %origin.url, method = %head.method)
    )]
    async fn forward(
        &self,
        origin: &Origin,
        head: &Parts,
        body: &BufferedBody,
    ) -> Result<OriginResponse, TransportError> {
        let url = target_url(origin, &head.uri);
        let body = if method_allows_body(&head.method) {
            body.clone()
        } else {
            None
        };

        match timeout(origin.timeout(), self.send_following_redirects(&url, head, body)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                url,
                timeout_ms: origin.timeout_ms,
            }),
        }
    }
}

/// Inbound headers minus the framing headers hyper recomputes from the
/// buffered body.
fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::TRANSFER_ENCODING);
    headers
}

/// Drops headers that describe a body once a redirect has discarded it.
fn strip_body_headers(headers: &mut HeaderMap) {
    headers.remove(header::CONTENT_TYPE);
    headers.remove(header::CONTENT_ENCODING);
    headers.remove(header::CONTENT_LANGUAGE);
    headers.remove(header::CONTENT_LOCATION);
}

/// Resolves the `Location` of a redirect response against the current URL.
fn redirect_location<B>(response: &Response<B>, current: &str) -> Option<String> {
    if !matches!(response.status().as_u16(), 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
    let base = url::Url::parse(current).ok()?;
    base.join(location).ok().map(String::from)
}

/// 303 always switches to GET; 301 and 302 do for anything but GET/HEAD.
fn rewrites_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::SEE_OTHER => *method != Method::HEAD,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => {
            *method != Method::GET && *method != Method::HEAD
        }
        _ => false,
    }
}
