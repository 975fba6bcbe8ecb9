//! Configuration for the edge router.

use crate::origin::{GeoOrigin, Origin};
use crate::strategy::AvailabilityConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

const MAX_TIMEOUT_MS: u64 = 3_600_000;

/// Configuration validation and loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid listen address format.
    #[error("invalid listen address '{addr}': {reason}")]
    InvalidListenAddr { addr: String, reason: String },

    /// Invalid origin definition.
    #[error("invalid origin '{url}': {reason}")]
    InvalidOrigin { url: String, reason: String },

    /// No origins configured.
    #[error("at least one origin is required")]
    NoOrigins,

    /// Invalid failover status code.
    #[error("invalid failover status {status}: must be within 100..=599")]
    InvalidFailoverStatus { status: u16 },

    /// Invalid promise-any race timeout.
    #[error("invalid race timeout {timeout_ms}ms: must be between 1ms and 1 hour")]
    InvalidRaceTimeout { timeout_ms: u64 },

    /// Invalid environment variable value.
    #[error("invalid value for {name}: {reason}")]
    InvalidEnv { name: &'static str, reason: String },

    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: String,
        source: serde_json::Error,
    },
}

/// Where the candidate origins for a request come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "steering", rename_all = "snake_case")]
pub enum OriginSet {
    /// A flat list tried in order.
    #[serde(rename = "none")]
    Flat { origins: Vec<Origin> },
    /// Geo-steered origins with an optional fallback list.
    Geo {
        origins: Vec<GeoOrigin>,
        #[serde(default)]
        default_fallback: Vec<Origin>,
    },
}

impl OriginSet {
    pub fn flat(origins: Vec<Origin>) -> Self {
        Self::Flat { origins }
    }

    pub fn geo(origins: Vec<GeoOrigin>, default_fallback: Vec<Origin>) -> Self {
        Self::Geo {
            origins,
            default_fallback,
        }
    }

    /// Every origin referenced by the set, fallbacks included.
    pub fn all_origins(&self) -> Vec<&Origin> {
        match self {
            OriginSet::Flat { origins } => origins.iter().collect(),
            OriginSet::Geo {
                origins,
                default_fallback,
            } => origins
                .iter()
                .map(|g| &g.origin)
                .chain(default_fallback.iter())
                .collect(),
        }
    }
}

/// HTTP protocol spoken by the inbound listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenProtocol {
    #[default]
    Http1,
    H2c,
}

/// Router configuration loaded at startup.
///
/// Immutable after initialization.
///
/// # Environment Variables
///
/// * `ROUTER_CONFIG_FILE` - JSON file replacing all other variables
/// * `ROUTER_LISTEN_ADDR` - Address to listen on (default: "127.0.0.1:3000")
/// * `ROUTER_PROTOCOL` - `http1` or `h2c` (default: `http1`)
/// * `ROUTER_ORIGINS` - Comma-separated origin URLs (default: "http://127.0.0.1:8080")
/// * `ROUTER_ORIGIN_TIMEOUT_MS` - Per-origin request timeout (default: 30000)
/// * `ROUTER_AVAILABILITY` - `fail-forward`, `async-block` or `promise-any`
/// * `ROUTER_FAILOVER_STATUSES` - Comma-separated statuses for fail-forward
///
/// # Example
///
/// ```
/// use rust_edge_router::config::RouterConfig;
///
/// let config = RouterConfig::default();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Address to listen on for incoming connections.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Inbound protocol.
    #[serde(default)]
    pub protocol: ListenProtocol,

    /// Candidate origins.
    pub origins: OriginSet,

    /// Availability strategy.
    #[serde(default)]
    pub availability: AvailabilityConfig,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            protocol: ListenProtocol::default(),
            origins: OriginSet::flat(vec![Origin::new("http://127.0.0.1:8080")]),
            availability: AvailabilityConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Loads configuration from `ROUTER_CONFIG_FILE` if set, otherwise from
    /// the individual environment variables, and validates it.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match env::var("ROUTER_CONFIG_FILE") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&contents).map_err(|e| ConfigError::ParseFile {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Parses a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Builds configuration from environment variables with fallback to
    /// defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr = env::var("ROUTER_LISTEN_ADDR").unwrap_or_else(|_| default_listen_addr());

        let protocol = match env::var("ROUTER_PROTOCOL").ok().as_deref() {
            None | Some("http1") => ListenProtocol::Http1,
            Some("h2c") => ListenProtocol::H2c,
            Some(other) => {
                return Err(ConfigError::InvalidEnv {
                    name: "ROUTER_PROTOCOL",
                    reason: format!("unknown protocol '{}'", other),
                })
            }
        };

        let timeout_ms = match env::var("ROUTER_ORIGIN_TIMEOUT_MS") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidEnv {
                name: "ROUTER_ORIGIN_TIMEOUT_MS",
                reason: e.to_string(),
            })?,
            Err(_) => 30_000,
        };

        let origins = env::var("ROUTER_ORIGINS")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|url| Origin::new(url).with_timeout_ms(timeout_ms))
            .collect();

        let availability = parse_availability(
            env::var("ROUTER_AVAILABILITY").ok().as_deref(),
            env::var("ROUTER_FAILOVER_STATUSES").ok().as_deref(),
        )?;

        Ok(Self {
            listen_addr,
            protocol,
            origins: OriginSet::flat(origins),
            availability,
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Listen address is not a valid socket address
    /// - No origins are configured
    /// - An origin URL is not an absolute http URL
    /// - An origin has a zero weight or a timeout outside 1ms..=1h
    /// - A health check path does not start with `/`
    /// - A geo rule has an empty match set
    /// - A failover status is not a valid HTTP status
    /// - The promise-any race timeout is outside 1ms..=1h
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidListenAddr {
                addr: self.listen_addr.clone(),
                reason: e.to_string(),
            })?;

        let origins = self.origins.all_origins();
        if origins.is_empty() {
            return Err(ConfigError::NoOrigins);
        }
        for origin in origins {
            validate_origin(origin)?;
        }

        if let OriginSet::Geo { origins, .. } = &self.origins {
            if let Some(empty) = origins.iter().find(|g| g.geo.is_empty()) {
                return Err(ConfigError::InvalidOrigin {
                    url: empty.origin.url.clone(),
                    reason: "geo rule must list at least one value".to_string(),
                });
            }
        }

        if let AvailabilityConfig::FailForward {
            failover_on_statuses,
        } = &self.availability
        {
            if let Some(&status) = failover_on_statuses
                .iter()
                .find(|s| !(100..=599).contains(*s))
            {
                return Err(ConfigError::InvalidFailoverStatus { status });
            }
        }

        if let AvailabilityConfig::PromiseAny { race_timeout_ms } = &self.availability {
            if *race_timeout_ms == 0 || *race_timeout_ms > MAX_TIMEOUT_MS {
                return Err(ConfigError::InvalidRaceTimeout {
                    timeout_ms: *race_timeout_ms,
                });
            }
        }

        Ok(())
    }
}

fn validate_origin(origin: &Origin) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidOrigin {
        url: origin.url.clone(),
        reason: reason.to_string(),
    };

    if origin.url.starts_with("https://") {
        return Err(invalid("https origins are not supported, use http://"));
    }
    if !origin.url.starts_with("http://") {
        return Err(invalid("must start with http://"));
    }
    if url::Url::parse(&origin.url).is_err() {
        return Err(invalid("invalid URL format"));
    }
    if origin.weight == 0 {
        return Err(invalid("weight must be greater than zero"));
    }
    if origin.timeout_ms == 0 || origin.timeout_ms > MAX_TIMEOUT_MS {
        return Err(invalid("timeout must be between 1ms and 1 hour"));
    }
    if !origin.health_check_path.starts_with('/') {
        return Err(invalid("health check path must start with '/'"));
    }
    Ok(())
}

fn parse_availability(
    method: Option<&str>,
    statuses: Option<&str>,
) -> Result<AvailabilityConfig, ConfigError> {
    match method.unwrap_or("fail-forward") {
        "fail-forward" => match statuses {
            None => Ok(AvailabilityConfig::fail_forward()),
            Some(raw) => {
                let parsed = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| s.parse::<u16>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ConfigError::InvalidEnv {
                        name: "ROUTER_FAILOVER_STATUSES",
                        reason: e.to_string(),
                    })?;
                Ok(AvailabilityConfig::fail_forward_on(parsed))
            }
        },
        "async-block" => Ok(AvailabilityConfig::AsyncBlock),
        "promise-any" => Ok(AvailabilityConfig::promise_any()),
        other => Err(ConfigError::InvalidEnv {
            name: "ROUTER_AVAILABILITY",
            reason: format!("unknown availability method '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::{ContinentCode, GeoRule};

    #[test]
    fn test_default_config() {
        let config = RouterConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.protocol, ListenProtocol::Http1);
        assert_eq!(config.origins.all_origins().len(), 1);
        assert_eq!(config.availability, AvailabilityConfig::fail_forward());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(RouterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_listen_addr() {
        let config = RouterConfig {
            listen_addr: "invalid".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidListenAddr { .. }
        ));
    }

    #[test]
    fn test_validate_no_origins() {
        let config = RouterConfig {
            origins: OriginSet::flat(vec![]),
            ..Default::default()
        };
        assert!(matches!(config.validate().unwrap_err(), ConfigError::NoOrigins));
    }

    #[test]
    fn test_validate_invalid_origin() {
        for origin in [
            Origin::new("not-a-url"),
            Origin::new("http://a.example").with_weight(0),
            Origin::new("http://a.example").with_timeout_ms(0),
            Origin::new("http://a.example").with_timeout_ms(7_200_000),
            Origin::new("http://a.example").with_health_check_path("health"),
        ] {
            let config = RouterConfig {
                origins: OriginSet::flat(vec![origin]),
                ..Default::default()
            };
            assert!(matches!(
                config.validate().unwrap_err(),
                ConfigError::InvalidOrigin { .. }
            ));
        }
    }

    #[test]
    fn test_validate_empty_geo_rule() {
        let config = RouterConfig {
            origins: OriginSet::geo(
                vec![GeoOrigin::new(
                    Origin::new("http://a.example"),
                    GeoRule::country(Vec::<String>::new()),
                )],
                vec![],
            ),
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidOrigin { .. }
        ));
    }

    #[test]
    fn test_validate_failover_status() {
        let config = RouterConfig {
            availability: AvailabilityConfig::fail_forward_on([502, 999]),
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidFailoverStatus { status: 999 }
        ));
    }

    #[test]
    fn test_validate_rejects_https_origin() {
        let config = RouterConfig {
            origins: OriginSet::flat(vec![Origin::new("https://secure.example")]),
            ..Default::default()
        };
        match config.validate().unwrap_err() {
            ConfigError::InvalidOrigin { url, reason } => {
                assert_eq!(url, "https://secure.example");
                assert!(reason.contains("https"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_https_fallback() {
        let config = RouterConfig {
            origins: OriginSet::geo(
                vec![GeoOrigin::new(
                    Origin::new("http://eu.example"),
                    GeoRule::continent([ContinentCode::EU]),
                )],
                vec![Origin::new("https://global.example")],
            ),
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidOrigin { .. }
        ));
    }

    #[test]
    fn test_validate_race_timeout() {
        for race_timeout_ms in [0, 7_200_000] {
            let config = RouterConfig {
                availability: AvailabilityConfig::PromiseAny { race_timeout_ms },
                ..Default::default()
            };
            assert!(matches!(
                config.validate().unwrap_err(),
                ConfigError::InvalidRaceTimeout { .. }
            ));
        }

        let config = RouterConfig {
            availability: AvailabilityConfig::PromiseAny {
                race_timeout_ms: 50,
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_availability() {
        assert_eq!(
            parse_availability(None, None).unwrap(),
            AvailabilityConfig::fail_forward()
        );
        assert_eq!(
            parse_availability(Some("fail-forward"), Some("500, 502")).unwrap(),
            AvailabilityConfig::fail_forward_on([500, 502])
        );
        assert_eq!(
            parse_availability(Some("async-block"), None).unwrap(),
            AvailabilityConfig::AsyncBlock
        );
        assert_eq!(
            parse_availability(Some("promise-any"), None).unwrap(),
            AvailabilityConfig::promise_any()
        );
        assert!(parse_availability(Some("round-robin"), None).is_err());
        assert!(parse_availability(Some("fail-forward"), Some("abc")).is_err());
    }

    #[test]
    fn test_from_json_geo() {
        let json = r#"{
            "listen_addr": "0.0.0.0:8000",
            "origins": {
                "steering": "geo",
                "origins": [
                    {"url": "http://eu.example", "geo": {"type": "continent", "continent": ["EU"]}},
                    {"url": "http://us.example", "geo": {"type": "country", "country": ["US"]}}
                ],
                "default_fallback": [{"url": "http://global.example"}]
            },
            "availability": {"method": "promise-any", "race_timeout_ms": 2000}
        }"#;
        let config = RouterConfig::from_json(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.availability,
            AvailabilityConfig::PromiseAny {
                race_timeout_ms: 2000
            }
        );
        match config.origins {
            OriginSet::Geo {
                origins,
                default_fallback,
            } => {
                assert_eq!(origins.len(), 2);
                assert_eq!(origins[0].geo, GeoRule::continent([ContinentCode::EU]));
                assert_eq!(default_fallback, vec![Origin::new("http://global.example")]);
            }
            other => panic!("expected geo origins, got {:?}", other),
        }
    }

    #[test]
    fn test_from_json_flat_defaults() {
        let json = r#"{"origins": {"steering": "none", "origins": [{"url": "http://a.example"}]}}"#;
        let config = RouterConfig::from_json(json).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.availability, AvailabilityConfig::fail_forward());
        assert_eq!(
            config.origins,
            OriginSet::flat(vec![Origin::new("http://a.example")])
        );
    }

    #[test]
    fn test_from_file_missing() {
        assert!(matches!(
            RouterConfig::from_file("/nonexistent/router.json").unwrap_err(),
            ConfigError::ReadFile { .. }
        ));
    }
}
