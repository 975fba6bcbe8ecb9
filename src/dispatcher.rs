//! Request dispatcher: geo selection, strategy execution and recovery.

use crate::config::{OriginSet, RouterConfig};
use crate::error::Exhausted;
use crate::forward::{Forwarder, HttpForwarder, OriginResponse};
use crate::geo::{dedup_origins, select_candidates};
use crate::health::{HealthProber, HttpHealthProber};
use crate::origin::{Origin, RequestGeoTags};
use crate::recovery::RecoveryHook;
use crate::strategy::{AvailabilityConfig, Capabilities};
use http::request::Parts;
use http::Request;
use hyper::body::{Body, Bytes};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Composition root of the edge router.
///
/// Holds only immutable configuration and shared capabilities; each call to
/// [`Dispatcher::handle`] builds its own candidate list and trial record.
///
/// # Example
///
/// ```no_run
/// use rust_edge_router::config::OriginSet;
/// use rust_edge_router::dispatcher::Dispatcher;
/// use rust_edge_router::origin::Origin;
/// use rust_edge_router::strategy::AvailabilityConfig;
///
/// let dispatcher = Dispatcher::builder(OriginSet::flat(vec![
///     Origin::new("http://127.0.0.1:8080"),
///     Origin::new("http://127.0.0.1:8081"),
/// ]))
/// .with_availability(AvailabilityConfig::AsyncBlock)
/// .build();
/// ```
pub struct Dispatcher {
    origins: OriginSet,
    availability: AvailabilityConfig,
    caps: Capabilities,
    recovery: Option<Arc<dyn RecoveryHook>>,
}

impl Dispatcher {
    /// Starts building a dispatcher over `origins`.
    pub fn builder(origins: OriginSet) -> DispatcherBuilder {
        DispatcherBuilder::new(origins)
    }

    /// Builds a dispatcher with HTTP capabilities from loaded configuration.
    pub fn from_config(config: &RouterConfig) -> Self {
        Self::builder(config.origins.clone())
            .with_availability(config.availability.clone())
            .build()
    }

    /// The configured availability strategy.
    pub fn availability(&self) -> &AvailabilityConfig {
        &self.availability
    }

    /// Ordered candidates for a request carrying `tags`.
    pub fn candidates(&self, tags: Option<&RequestGeoTags>) -> Vec<Origin> {
        match &self.origins {
            OriginSet::Flat { origins } => dedup_origins(origins),
            OriginSet::Geo {
                origins,
                default_fallback,
            } => select_candidates(origins, tags, default_fallback),
        }
    }

    /// Dispatches one inbound request.
    ///
    /// Geo tags are read from the request's extensions. On success the
    /// response already carries the diagnostic headers.
    ///
    /// # Errors
    ///
    /// Returns [`Exhausted`] when no candidate produced a usable response
    /// and no recovery hook substituted one.
    #[instrument(level = "debug", skip_all, fields(method = %req.method(), uri = %req.uri()))]
    pub async fn handle<B>(&self, req: Request<B>) -> Result<OriginResponse, Exhausted>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: std::fmt::Display,
    {
        let (head, body) = req.into_parts();
        let candidates = self.candidates(head.extensions.get::<RequestGeoTags>());

        if candidates.is_empty() {
            warn!("no candidate origins for request");
            return self.fail(Exhausted::empty(), &head).await;
        }

        debug!(
            strategy = self.availability.name(),
            candidates = candidates.len(),
            "dispatching"
        );

        match self
            .availability
            .execute(&self.caps, &candidates, &head, body)
            .await
        {
            Ok(response) => Ok(response),
            Err(exhausted) => self.fail(exhausted, &head).await,
        }
    }

    /// Terminal failure path: give the recovery hook one chance to answer.
    async fn fail(&self, exhausted: Exhausted, head: &Parts) -> Result<OriginResponse, Exhausted> {
        let Some(hook) = &self.recovery else {
            return Err(exhausted);
        };

        match hook.recover(&exhausted, head).await {
            Some(response) => {
                info!(
                    tried = exhausted.tried.len(),
                    status = response.status().as_u16(),
                    "recovery hook substituted response"
                );
                Ok(response)
            }
            None => Err(exhausted),
        }
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    origins: OriginSet,
    availability: AvailabilityConfig,
    forwarder: Option<Arc<dyn Forwarder>>,
    prober: Option<Arc<dyn HealthProber>>,
    recovery: Option<Arc<dyn RecoveryHook>>,
}

impl DispatcherBuilder {
    fn new(origins: OriginSet) -> Self {
        Self {
            origins,
            availability: AvailabilityConfig::default(),
            forwarder: None,
            prober: None,
            recovery: None,
        }
    }

    /// Sets the availability strategy.
    pub fn with_availability(mut self, availability: AvailabilityConfig) -> Self {
        self.availability = availability;
        self
    }

    /// Replaces the HTTP forwarder.
    pub fn with_forwarder(mut self, forwarder: Arc<dyn Forwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// Replaces the HTTP health prober.
    pub fn with_prober(mut self, prober: Arc<dyn HealthProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Installs a recovery hook.
    pub fn with_recovery(mut self, hook: Arc<dyn RecoveryHook>) -> Self {
        self.recovery = Some(hook);
        self
    }

    pub fn build(self) -> Dispatcher {
        let forwarder = self
            .forwarder
            .unwrap_or_else(|| Arc::new(HttpForwarder::new()));
        let prober = self
            .prober
            .unwrap_or_else(|| Arc::new(HttpHealthProber::new()));

        Dispatcher {
            origins: self.origins,
            availability: self.availability,
            caps: Capabilities::new(forwarder, prober),
            recovery: self.recovery,
        }
    }
}
