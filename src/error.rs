//! Error types for the edge router.
//!
//! Failures inside a dispatch are values ([`AttemptError`]) that only ever
//! cause fallthrough to the next candidate. [`Exhausted`] is the single
//! terminal error a dispatch can produce.

use crate::origin::Origin;
use std::fmt;
use std::io;
use thiserror::Error;

/// Why a health probe reported an origin as unhealthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnhealthyReason {
    /// The probe did not complete within its timeout.
    Timeout,
    /// The probe completed with a non-2xx status.
    Status(u16),
    /// Any other network-level failure.
    Network(String),
}

impl fmt::Display for UnhealthyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnhealthyReason::Timeout => write!(f, "health check timed out"),
            UnhealthyReason::Status(code) => write!(f, "health check returned status {}", code),
            UnhealthyReason::Network(message) => write!(f, "health check failed: {}", message),
        }
    }
}

/// Failure to deliver a single forwarding attempt to an origin.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The attempt exceeded the origin's request timeout.
    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    /// Connection-level or protocol failure.
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// The target URL could not be built.
    #[error("invalid target uri {url}: {message}")]
    InvalidUri { url: String, message: String },

    /// The redirect chain exceeded the hop limit.
    #[error("too many redirects from {url}")]
    TooManyRedirects { url: String },
}

impl TransportError {
    /// Returns the URL of the attempt that failed.
    pub fn url(&self) -> &str {
        match self {
            TransportError::Timeout { url, .. }
            | TransportError::Request { url, .. }
            | TransportError::InvalidUri { url, .. }
            | TransportError::TooManyRedirects { url } => url,
        }
    }
}

/// A recoverable failure observed while trying one candidate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// The health probe reported the origin as down.
    #[error("origin {url} is unhealthy: {reason}")]
    Unhealthy { url: String, reason: UnhealthyReason },

    /// The forwarding attempt failed at the transport level.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The origin answered with a status configured to trigger failover.
    #[error("origin {url} responded with failover status {status}")]
    BadStatus { url: String, status: u16 },

    /// Reading the inbound request body failed.
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    /// No probe in a health race succeeded before the ceiling.
    #[error("no origin reported healthy within {timeout_ms}ms")]
    RaceTimeout { timeout_ms: u64 },
}

/// Every candidate was tried (or none existed) without a usable response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted {
    /// Origins that were in play, in attempt order.
    pub tried: Vec<Origin>,
    /// The last failure observed, if any.
    pub last_error: Option<AttemptError>,
}

impl Exhausted {
    /// Creates an exhaustion error from the trial record.
    pub fn new(tried: Vec<Origin>, last_error: Option<AttemptError>) -> Self {
        Self { tried, last_error }
    }

    /// Exhaustion without any candidate to try.
    pub fn empty() -> Self {
        Self::new(Vec::new(), None)
    }

    /// URLs of the tried origins.
    pub fn tried_urls(&self) -> Vec<&str> {
        self.tried.iter().map(|o| o.url.as_str()).collect()
    }
}

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} origins exhausted", self.tried.len())?;
        if let Some(err) = &self.last_error {
            write!(f, ", last error: {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for Exhausted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last_error
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Errors raised by the serving layer around the dispatcher.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Failed to bind to the listener address.
    #[error("failed to bind listener to {addr}: {source}")]
    ListenerBind { addr: String, source: io::Error },

    /// HTTP protocol error.
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// Result type alias for serving-layer operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
