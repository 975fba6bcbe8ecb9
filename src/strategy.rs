//! Availability strategies.
//!
//! Each strategy takes the ordered candidate list for one request, buffers
//! the body exactly once, and either returns an annotated response or an
//! [`Exhausted`] error carrying the trial record. Non-terminal failures
//! never escape a strategy.
//!
//! - **fail-forward**: try candidates in order, failing over on transport
//!   errors and on configured statuses (default 502/503/504).
//! - **async-block**: probe each candidate before forwarding to it; the
//!   first healthy origin that answers wins, whatever its status.
//! - **promise-any**: probe every candidate concurrently, forward once to
//!   the first that reports healthy.

use crate::annotate::annotate;
use crate::body::{buffer_body, BufferedBody};
use crate::error::{AttemptError, Exhausted};
use crate::forward::{Forwarder, OriginResponse};
use crate::health::HealthProber;
use crate::origin::Origin;
use http::request::Parts;
use hyper::body::{Body, Bytes};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Statuses that trigger failover when none are configured.
pub const DEFAULT_FAILOVER_STATUSES: [u16; 3] = [502, 503, 504];

/// Ceiling on the whole promise-any health race.
pub const DEFAULT_RACE_TIMEOUT: Duration = Duration::from_secs(10);

fn default_failover_statuses() -> BTreeSet<u16> {
    DEFAULT_FAILOVER_STATUSES.into_iter().collect()
}

fn default_race_timeout_ms() -> u64 {
    DEFAULT_RACE_TIMEOUT.as_millis() as u64
}

/// Selects which availability strategy dispatches a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum AvailabilityConfig {
    /// Sequential failover on transport errors and failover statuses.
    FailForward {
        #[serde(default = "default_failover_statuses")]
        failover_on_statuses: BTreeSet<u16>,
    },
    /// Sequential, gated by a health probe before every forward.
    AsyncBlock,
    /// Concurrent health race, single forward to the winner.
    PromiseAny {
        #[serde(default = "default_race_timeout_ms")]
        race_timeout_ms: u64,
    },
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self::fail_forward()
    }
}

impl AvailabilityConfig {
    /// fail-forward with the default failover statuses.
    pub fn fail_forward() -> Self {
        Self::FailForward {
            failover_on_statuses: default_failover_statuses(),
        }
    }

    /// fail-forward with a custom failover status set.
    pub fn fail_forward_on(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self::FailForward {
            failover_on_statuses: statuses.into_iter().collect(),
        }
    }

    /// promise-any with the default race ceiling.
    pub fn promise_any() -> Self {
        Self::PromiseAny {
            race_timeout_ms: default_race_timeout_ms(),
        }
    }

    /// Short name used in logs and configuration.
    pub fn name(&self) -> &'static str {
        match self {
            AvailabilityConfig::FailForward { .. } => "fail-forward",
            AvailabilityConfig::AsyncBlock => "async-block",
            AvailabilityConfig::PromiseAny { .. } => "promise-any",
        }
    }

    /// Runs the selected strategy over `candidates`.
    pub async fn execute<B>(
        &self,
        caps: &Capabilities,
        candidates: &[Origin],
        head: &Parts,
        body: B,
    ) -> Result<OriginResponse, Exhausted>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: std::fmt::Display,
    {
        match self {
            AvailabilityConfig::FailForward {
                failover_on_statuses,
            } => fail_forward(caps, candidates, head, body, failover_on_statuses).await,
            AvailabilityConfig::AsyncBlock => async_block(caps, candidates, head, body).await,
            AvailabilityConfig::PromiseAny { race_timeout_ms } => {
                promise_any(
                    caps,
                    candidates,
                    head,
                    body,
                    Duration::from_millis(*race_timeout_ms),
                )
                .await
            }
        }
    }
}

/// Injected network capabilities shared by every request.
#[derive(Clone)]
pub struct Capabilities {
    pub forwarder: Arc<dyn Forwarder>,
    pub prober: Arc<dyn HealthProber>,
}

impl Capabilities {
    pub fn new(forwarder: Arc<dyn Forwarder>, prober: Arc<dyn HealthProber>) -> Self {
        Self { forwarder, prober }
    }
}

/// Origins attempted so far and the most recent failure.
#[derive(Debug, Default)]
struct TrialRecord {
    tried: Vec<Origin>,
    last_error: Option<AttemptError>,
}

impl TrialRecord {
    fn new(last_error: Option<AttemptError>) -> Self {
        Self {
            tried: Vec::new(),
            last_error,
        }
    }

    fn attempt(&mut self, origin: &Origin) {
        self.tried.push(origin.clone());
    }

    fn fail(&mut self, error: AttemptError) {
        warn!(attempt = self.tried.len(), error = %error, "attempt failed");
        self.last_error = Some(error);
    }

    fn exhausted(self) -> Exhausted {
        warn!(tried = self.tried.len(), "all candidates exhausted");
        Exhausted::new(self.tried, self.last_error)
    }
}

/// Buffers the body. A read failure becomes the initial last error and the
/// strategy carries on without a body.
async fn prepare_body<B>(head: &Parts, body: B) -> (BufferedBody, Option<AttemptError>)
where
    B: Body<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    match buffer_body(&head.method, body).await {
        Ok(buffered) => (buffered, None),
        Err(e) => {
            warn!(error = %e, "request body could not be buffered, forwarding without it");
            (None, Some(e))
        }
    }
}

#[instrument(level = "debug", skip_all, fields(candidates = candidates.len()))]
async fn fail_forward<B>(
    caps: &Capabilities,
    candidates: &[Origin],
    head: &Parts,
    body: B,
    failover_on_statuses: &BTreeSet<u16>,
) -> Result<OriginResponse, Exhausted>
where
    B: Body<Data = Bytes> + Send,
    B::Error: std::fmt::Display,
{
    let start = Instant::now();
    let (body, initial_error) = prepare_body(head, body).await;
    let mut record = TrialRecord::new(initial_error);

    for origin in candidates {
        record.attempt(origin);
        let gather = Instant::now();
        debug!(origin = %origin.url, attempt = record.tried.len(), "forwarding");

        match caps.forwarder.forward(origin, head, &body).await {
            Ok(response) if failover_on_statuses.contains(&response.status().as_u16()) => {
                record.fail(AttemptError::BadStatus {
                    url: origin.url.clone(),
                    status: response.status().as_u16(),
                });
            }
            Ok(response) => {
                return Ok(annotate(response, origin, &record.tried, start, gather));
            }
            Err(e) => record.fail(e.into()),
        }
    }

    Err(record.exhausted())
}

#[instrument(level = "debug", skip_all, fields(candidates = candidates.len()))]
async fn async_block<B>(
    caps: &Capabilities,
    candidates: &[Origin],
    head: &Parts,
    body: B,
) -> Result<OriginResponse, Exhausted>
where
    B: Body<Data = Bytes> + Send,
    B::Error: std::fmt::Display,
{
    let start = Instant::now();
    let (body, initial_error) = prepare_body(head, body).await;
    let mut record = TrialRecord::new(initial_error);

    for origin in candidates {
        record.attempt(origin);

        if let Err(reason) = caps.prober.check(origin).await {
            record.fail(AttemptError::Unhealthy {
                url: origin.url.clone(),
                reason,
            });
            continue;
        }

        let gather = Instant::now();
        debug!(origin = %origin.url, attempt = record.tried.len(), "origin healthy, forwarding");

        match caps.forwarder.forward(origin, head, &body).await {
            Ok(response) => {
                return Ok(annotate(response, origin, &record.tried, start, gather));
            }
            Err(e) => record.fail(e.into()),
        }
    }

    Err(record.exhausted())
}

#[instrument(level = "debug", skip_all, fields(candidates = candidates.len()))]
async fn promise_any<B>(
    caps: &Capabilities,
    candidates: &[Origin],
    head: &Parts,
    body: B,
    ceiling: Duration,
) -> Result<OriginResponse, Exhausted>
where
    B: Body<Data = Bytes> + Send,
    B::Error: std::fmt::Display,
{
    let start = Instant::now();
    if candidates.is_empty() {
        return Err(Exhausted::empty());
    }

    let (body, initial_error) = prepare_body(head, body).await;

    // Every candidate was in play, so every candidate is reported as tried
    // on failure.
    let mut record = TrialRecord::new(initial_error);
    record.tried = candidates.to_vec();

    let winner = match race_healthy(&caps.prober, candidates, ceiling).await {
        Ok(winner) => winner,
        Err(e) => {
            record.fail(e);
            return Err(record.exhausted());
        }
    };

    let gather = Instant::now();
    debug!(origin = %winner.url, "health race won, forwarding");

    match caps.forwarder.forward(&winner, head, &body).await {
        Ok(response) => Ok(annotate(
            response,
            &winner,
            std::slice::from_ref(&winner),
            start,
            gather,
        )),
        Err(e) => {
            record.fail(e.into());
            Err(record.exhausted())
        }
    }
}

/// Probes every candidate concurrently and returns the first healthy one.
///
/// Failed probes are counted, never fatal. Outstanding probes are aborted
/// when the race returns.
async fn race_healthy(
    prober: &Arc<dyn HealthProber>,
    candidates: &[Origin],
    ceiling: Duration,
) -> Result<Origin, AttemptError> {
    let mut probes = JoinSet::new();
    for origin in candidates {
        let prober = Arc::clone(prober);
        let origin = origin.clone();
        probes.spawn(async move {
            let result = prober.check(&origin).await;
            (origin, result)
        });
    }

    let mut failures = 0usize;
    let mut last_error = None;

    let race = timeout(ceiling, async {
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((origin, Ok(()))) => return Some(origin),
                Ok((origin, Err(reason))) => {
                    failures += 1;
                    debug!(origin = %origin.url, reason = %reason, failures, "probe failed");
                    last_error = Some(AttemptError::Unhealthy {
                        url: origin.url,
                        reason,
                    });
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, "probe task did not complete");
                }
            }
        }
        None
    })
    .await;

    match race {
        Ok(Some(winner)) => Ok(winner),
        Ok(None) => Err(last_error.unwrap_or(AttemptError::RaceTimeout {
            timeout_ms: ceiling.as_millis() as u64,
        })),
        Err(_) => {
            debug!(failures, "health race hit its ceiling");
            Err(AttemptError::RaceTimeout {
                timeout_ms: ceiling.as_millis() as u64,
            })
        }
    }
}
