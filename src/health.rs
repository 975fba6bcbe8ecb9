//! Out-of-band origin health probes.

use crate::error::UnhealthyReason;
use crate::origin::Origin;
use async_trait::async_trait;
use http::{Request, Uri};
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument};

const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(1000);
const MAX_PROBE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Probe timeout for an origin: half its request timeout, clamped to
/// 1s..=10s.
pub fn probe_timeout(origin: &Origin) -> Duration {
    (origin.timeout() / 2).clamp(MIN_PROBE_TIMEOUT, MAX_PROBE_TIMEOUT)
}

/// Checks whether one origin is currently able to serve traffic.
///
/// Implementations are shared across concurrent probes and must hold no
/// per-call mutable state.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn check(&self, origin: &Origin) -> Result<(), UnhealthyReason>;
}

/// Prober that issues `GET {health_check_url}` and treats any 2xx as
/// healthy.
#[derive(Clone)]
pub struct HttpHealthProber {
    client: Client<HttpConnector, Empty<Bytes>>,
}

impl Default for HttpHealthProber {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpHealthProber {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

#[async_trait]
impl HealthProber for HttpHealthProber {
    #[instrument(level = "debug", skip(self), fields(origin = %origin.url))]
    async fn check(&self, origin: &Origin) -> Result<(), UnhealthyReason> {
        let url = origin.health_check_url();
        let uri: Uri = url
            .parse()
            .map_err(|e: http::uri::InvalidUri| UnhealthyReason::Network(e.to_string()))?;
        let req = Request::get(uri)
            .body(Empty::new())
            .map_err(|e| UnhealthyReason::Network(e.to_string()))?;

        let limit = probe_timeout(origin);
        let response = match timeout(limit, self.client.request(req)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(UnhealthyReason::Network(e.to_string())),
            Err(_) => return Err(UnhealthyReason::Timeout),
        };

        let status = response.status();
        debug!(status = status.as_u16(), "health check completed");

        if status.is_success() {
            Ok(())
        } else {
            Err(UnhealthyReason::Status(status.as_u16()))
        }
    }
}

/// Prober that reports every origin as healthy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysHealthy;

#[async_trait]
impl HealthProber for AlwaysHealthy {
    async fn check(&self, _origin: &Origin) -> Result<(), UnhealthyReason> {
        Ok(())
    }
}
