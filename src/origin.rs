//! Origin descriptors and geo-match rules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

fn default_health_check_path() -> String {
    "/".to_string()
}

fn default_weight() -> u32 {
    1
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// A backend the router can forward requests to.
///
/// Immutable once built. Two origins with identical fields are
/// interchangeable.
///
/// # Example
///
/// ```
/// use rust_edge_router::origin::Origin;
///
/// let origin = Origin::new("http://api.example.com/").with_health_check_path("/healthz");
/// assert_eq!(origin.health_check_url(), "http://api.example.com/healthz");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    /// Base URL of the origin.
    pub url: String,

    /// Path appended to the normalized URL for health probes.
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,

    /// Relative weight. Carried for configuration compatibility only.
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Origin {
    /// Creates an origin with default health path, weight and timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            health_check_path: default_health_check_path(),
            weight: default_weight(),
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Sets the health check path.
    pub fn with_health_check_path(mut self, path: impl Into<String>) -> Self {
        self.health_check_path = path.into();
        self
    }

    /// Sets the weight.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Sets the request timeout in milliseconds.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// The URL with at most one trailing slash removed.
    pub fn normalized_url(&self) -> &str {
        normalize_url(&self.url)
    }

    /// Full URL probed by health checks.
    pub fn health_check_url(&self) -> String {
        format!("{}{}", self.normalized_url(), self.health_check_path)
    }

    /// Builds the forwarding target for an inbound path and query.
    ///
    /// `query` is appended verbatim and must include its leading `?`.
    pub fn build_target_url(&self, path: &str, query: &str) -> String {
        format!("{}{}{}", self.normalized_url(), path, query)
    }

    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Strips exactly one trailing slash, if present.
pub fn normalize_url(url: &str) -> &str {
    url.strip_suffix('/').unwrap_or(url)
}

/// Continent codes reported by the edge platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContinentCode {
    AF,
    AN,
    AS,
    EU,
    NA,
    OC,
    SA,
}

impl ContinentCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContinentCode::AF => "AF",
            ContinentCode::AN => "AN",
            ContinentCode::AS => "AS",
            ContinentCode::EU => "EU",
            ContinentCode::NA => "NA",
            ContinentCode::OC => "OC",
            ContinentCode::SA => "SA",
        }
    }
}

impl fmt::Display for ContinentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContinentCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AF" => Ok(ContinentCode::AF),
            "AN" => Ok(ContinentCode::AN),
            "AS" => Ok(ContinentCode::AS),
            "EU" => Ok(ContinentCode::EU),
            "NA" => Ok(ContinentCode::NA),
            "OC" => Ok(ContinentCode::OC),
            "SA" => Ok(ContinentCode::SA),
            other => Err(format!("unknown continent code '{}'", other)),
        }
    }
}

/// Which requests a geo origin serves. Exactly one dimension per rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeoRule {
    Continent { continent: BTreeSet<ContinentCode> },
    Country { country: BTreeSet<String> },
    Region { region: BTreeSet<String> },
    Colo { colo: BTreeSet<String> },
}

impl GeoRule {
    /// Creates a continent rule.
    pub fn continent(codes: impl IntoIterator<Item = ContinentCode>) -> Self {
        Self::Continent {
            continent: codes.into_iter().collect(),
        }
    }

    /// Creates a country rule.
    pub fn country<S: Into<String>>(codes: impl IntoIterator<Item = S>) -> Self {
        Self::Country {
            country: codes.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a region rule.
    pub fn region<S: Into<String>>(codes: impl IntoIterator<Item = S>) -> Self {
        Self::Region {
            region: codes.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a datacenter (colo) rule.
    pub fn colo<S: Into<String>>(codes: impl IntoIterator<Item = S>) -> Self {
        Self::Colo {
            colo: codes.into_iter().map(Into::into).collect(),
        }
    }

    /// Exact, case-sensitive match against the tag for this rule's
    /// dimension. A missing tag never matches.
    pub fn matches(&self, tags: &RequestGeoTags) -> bool {
        match self {
            GeoRule::Continent { continent } => {
                tags.continent.is_some_and(|c| continent.contains(&c))
            }
            GeoRule::Country { country } => {
                tags.country.as_ref().is_some_and(|c| country.contains(c))
            }
            GeoRule::Region { region } => tags
                .region_code
                .as_ref()
                .is_some_and(|r| region.contains(r)),
            GeoRule::Colo { colo } => tags.colo.as_ref().is_some_and(|c| colo.contains(c)),
        }
    }

    /// Number of values in the rule's match set.
    pub fn len(&self) -> usize {
        match self {
            GeoRule::Continent { continent } => continent.len(),
            GeoRule::Country { country } => country.len(),
            GeoRule::Region { region } => region.len(),
            GeoRule::Colo { colo } => colo.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An origin bound to a geo-match rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoOrigin {
    #[serde(flatten)]
    pub origin: Origin,
    pub geo: GeoRule,
}

impl GeoOrigin {
    pub fn new(origin: Origin, geo: GeoRule) -> Self {
        Self { origin, geo }
    }

    /// Projects away the geo rule.
    pub fn to_origin(&self) -> Origin {
        self.origin.clone()
    }
}

/// Per-request location metadata attached by the edge platform.
///
/// Carried as a request extension. An absent field means the request cannot
/// match on that dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestGeoTags {
    pub continent: Option<ContinentCode>,
    pub country: Option<String>,
    pub region_code: Option<String>,
    pub colo: Option<String>,
}

impl RequestGeoTags {
    pub fn with_continent(mut self, continent: ContinentCode) -> Self {
        self.continent = Some(continent);
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_region_code(mut self, region: impl Into<String>) -> Self {
        self.region_code = Some(region.into());
        self
    }

    pub fn with_colo(mut self, colo: impl Into<String>) -> Self {
        self.colo = Some(colo.into());
        self
    }

    /// True when no dimension is populated.
    pub fn is_empty(&self) -> bool {
        self.continent.is_none()
            && self.country.is_none()
            && self.region_code.is_none()
            && self.colo.is_none()
    }
}
