//! Deterministic fakes shared by unit tests.

use crate::body::BufferedBody;
use crate::error::{TransportError, UnhealthyReason};
use crate::forward::{full_body, Forwarder, OriginResponse};
use crate::health::HealthProber;
use crate::origin::Origin;
use async_trait::async_trait;
use http::request::Parts;
use http::{Request, Response, StatusCode};
use hyper::body::{Body, Bytes, Frame, SizeHint};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// A body whose first poll fails.
pub struct FailingBody;

impl Body for FailingBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(Some(Err(std::io::Error::other("connection reset"))))
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

/// Canned outcome for a fake origin.
#[derive(Debug, Clone)]
pub enum Outcome {
    Status(u16),
    Fail,
}

/// One forwarding call observed by [`FakeForwarder`].
#[derive(Debug, Clone)]
pub struct ForwardCall {
    pub url: String,
    pub body: BufferedBody,
}

/// Forwarder answering from a per-origin table. Unknown origins fail.
#[derive(Default)]
pub struct FakeForwarder {
    outcomes: HashMap<String, Outcome>,
    calls: Mutex<Vec<ForwardCall>>,
}

impl FakeForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, outcome: Outcome) -> Self {
        self.outcomes.insert(url.to_string(), outcome);
        self
    }

    pub fn calls(&self) -> Vec<ForwardCall> {
        self.calls.lock().clone()
    }

    pub fn called_urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.url.clone()).collect()
    }
}

#[async_trait]
impl Forwarder for FakeForwarder {
    async fn forward(
        &self,
        origin: &Origin,
        _head: &Parts,
        body: &BufferedBody,
    ) -> Result<OriginResponse, TransportError> {
        self.calls.lock().push(ForwardCall {
            url: origin.url.clone(),
            body: body.clone(),
        });

        match self.outcomes.get(&origin.url) {
            Some(Outcome::Status(status)) => Ok(response(*status, &origin.url)),
            _ => Err(TransportError::Request {
                url: origin.url.clone(),
                message: "connection refused".to_string(),
            }),
        }
    }
}

/// Probe behaviour for one fake origin.
#[derive(Debug, Clone)]
pub enum Probe {
    Healthy,
    HealthyAfter(Duration),
    Unhealthy(UnhealthyReason),
    Hang,
}

/// Prober answering from a per-origin table. Unknown origins are healthy.
#[derive(Default)]
pub struct FakeProber {
    probes: HashMap<String, Probe>,
    checked: Mutex<Vec<String>>,
}

impl FakeProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, probe: Probe) -> Self {
        self.probes.insert(url.to_string(), probe);
        self
    }

    pub fn checked(&self) -> Vec<String> {
        self.checked.lock().clone()
    }
}

#[async_trait]
impl HealthProber for FakeProber {
    async fn check(&self, origin: &Origin) -> Result<(), UnhealthyReason> {
        self.checked.lock().push(origin.url.clone());
        match self.probes.get(&origin.url).cloned().unwrap_or(Probe::Healthy) {
            Probe::Healthy => Ok(()),
            Probe::HealthyAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Probe::Unhealthy(reason) => Err(reason),
            Probe::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

/// Response whose body names the origin that produced it.
pub fn response(status: u16, origin_url: &str) -> OriginResponse {
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap())
        .header("x-origin", origin_url)
        .body(full_body(Bytes::from(origin_url.to_string())))
        .unwrap()
}

/// Request head for `method` and `uri`.
pub fn head(method: &str, uri: &str) -> Parts {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(())
        .unwrap()
        .into_parts()
        .0
}
