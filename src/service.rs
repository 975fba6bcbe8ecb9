//! Tower service exposing the dispatcher over HTTP.

use crate::dispatcher::Dispatcher;
use crate::forward::{full_body, OriginResponse};
use crate::origin::{ContinentCode, RequestGeoTags};
use http::{HeaderMap, Request, Response, StatusCode};
use hyper::body::Incoming;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{instrument, warn};

/// Header carrying the client's continent code.
pub const GEO_CONTINENT_HEADER: &str = "x-geo-continent";
/// Header carrying the client's country code.
pub const GEO_COUNTRY_HEADER: &str = "x-geo-country";
/// Header carrying the client's region code.
pub const GEO_REGION_HEADER: &str = "x-geo-region";
/// Header carrying the edge datacenter code.
pub const GEO_COLO_HEADER: &str = "x-geo-colo";

/// Reads edge-platform geo headers. Returns `None` when none are present.
///
/// Unknown continent codes are ignored.
pub fn geo_tags_from_headers(headers: &HeaderMap) -> Option<RequestGeoTags> {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let tags = RequestGeoTags {
        continent: value(GEO_CONTINENT_HEADER).and_then(|c| c.parse::<ContinentCode>().ok()),
        country: value(GEO_COUNTRY_HEADER),
        region_code: value(GEO_REGION_HEADER),
        colo: value(GEO_COLO_HEADER),
    };

    if tags.is_empty() {
        None
    } else {
        Some(tags)
    }
}

/// HTTP service that dispatches every request through a [`Dispatcher`].
///
/// When dispatch is exhausted the service answers `502 Bad Gateway`.
#[derive(Clone)]
pub struct DispatchService {
    dispatcher: Arc<Dispatcher>,
}

impl DispatchService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    async fn dispatch(&self, mut req: Request<Incoming>) -> OriginResponse {
        if let Some(tags) = geo_tags_from_headers(req.headers()) {
            req.extensions_mut().insert(tags);
        }

        match self.dispatcher.handle(req).await {
            Ok(response) => response,
            Err(exhausted) => {
                warn!(error = %exhausted, tried = ?exhausted.tried_urls(), "dispatch exhausted");
                Self::error_response(StatusCode::BAD_GATEWAY, "No origin available")
            }
        }
    }

    /// Creates an HTTP error response.
    fn error_response(status: StatusCode, message: &str) -> OriginResponse {
        Response::builder()
            .status(status)
            .body(full_body(message.to_string()))
            .unwrap_or_else(|_| Response::new(full_body("")))
    }
}

impl Service<Request<Incoming>> for DispatchService {
    type Response = OriginResponse;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    #[instrument(
        level = "debug",
        skip(self, req),
        fields(method = %req.method(), uri = %req.uri())
    )]
    fn call(&mut self, req: Request<Incoming>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.dispatch(req).await) })
    }
}
