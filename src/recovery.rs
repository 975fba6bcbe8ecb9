//! Last-resort recovery after every candidate failed.

use crate::error::Exhausted;
use crate::forward::OriginResponse;
use async_trait::async_trait;
use http::request::Parts;
use std::future::Future;

/// User callback run when a dispatch exhausts its candidates.
///
/// `error` carries the tried origins and the last failure. Returning
/// `Some` substitutes that response for the error; `None` lets the error
/// propagate unchanged. Never invoked on success, and at most once per
/// request.
#[async_trait]
pub trait RecoveryHook: Send + Sync {
    async fn recover(&self, error: &Exhausted, request: &Parts) -> Option<OriginResponse>;
}

/// Adapts a synchronous closure into a [`RecoveryHook`].
///
/// # Example
///
/// ```
/// use rust_edge_router::forward::full_body;
/// use rust_edge_router::recovery::FnRecovery;
/// use http::{Response, StatusCode};
///
/// let hook = FnRecovery::new(|_error, _request| {
///     Response::builder()
///         .status(StatusCode::SERVICE_UNAVAILABLE)
///         .body(full_body("try again later"))
///         .ok()
/// });
/// ```
pub struct FnRecovery<F> {
    f: F,
}

impl<F> FnRecovery<F>
where
    F: Fn(&Exhausted, &Parts) -> Option<OriginResponse> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> RecoveryHook for FnRecovery<F>
where
    F: Fn(&Exhausted, &Parts) -> Option<OriginResponse> + Send + Sync,
{
    async fn recover(&self, error: &Exhausted, request: &Parts) -> Option<OriginResponse> {
        (self.f)(error, request)
    }
}

/// Adapts an async closure into a [`RecoveryHook`].
///
/// The closure receives owned copies of the error and the request URI.
pub struct AsyncFnRecovery<F> {
    f: F,
}

impl<F, Fut> AsyncFnRecovery<F>
where
    F: Fn(Exhausted, http::Uri) -> Fut + Send + Sync,
    Fut: Future<Output = Option<OriginResponse>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> RecoveryHook for AsyncFnRecovery<F>
where
    F: Fn(Exhausted, http::Uri) -> Fut + Send + Sync,
    Fut: Future<Output = Option<OriginResponse>> + Send,
{
    async fn recover(&self, error: &Exhausted, request: &Parts) -> Option<OriginResponse> {
        (self.f)(error.clone(), request.uri.clone()).await
    }
}
