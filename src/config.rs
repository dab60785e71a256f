//! Configuration surface of the ACL.
//!
//! All components take their slice of configuration by value; there are no
//! implicit globals. The structs deserialize from the documented
//! configuration tree (`rdf.*`, `security.trace_header`, `graph.*`).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AclError, Result};

/// Top-level configuration for the ACL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// Base URL of the SPARQL store, e.g. `http://localhost:3030`.
    pub endpoint: String,
    /// Dataset name appended to the endpoint path.
    pub dataset: String,
    /// Optional Basic auth credentials.
    pub auth: Option<BasicAuthConfig>,
    pub timeout: TimeoutConfig,
    pub retries: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Header used to echo the caller-supplied trace id.
    pub trace_header: String,
    pub naming: GraphNaming,
    /// Named projection profiles, keyed by profile name.
    pub projection_profiles: HashMap<String, ProjectionProfile>,
}

impl Default for AclConfig {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert("default".to_string(), ProjectionProfile::default());
        Self {
            endpoint: "http://localhost:3030".to_string(),
            dataset: "sf".to_string(),
            auth: None,
            timeout: TimeoutConfig::default(),
            retries: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            trace_header: "X-Trace-Id".to_string(),
            naming: GraphNaming::default(),
            projection_profiles: profiles,
        }
    }
}

impl AclConfig {
    /// Validate the configuration before any client is constructed.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(AclError::InvalidConfig("endpoint must not be empty".into()));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(AclError::InvalidConfig(format!(
                "endpoint must be an http(s) URL: {}",
                self.endpoint
            )));
        }
        if self.dataset.trim_matches('/').is_empty() {
            return Err(AclError::InvalidConfig("dataset must not be empty".into()));
        }
        if self.timeout.default == 0 {
            return Err(AclError::InvalidConfig(
                "timeout.default must be at least 1 second".into(),
            ));
        }
        if self.timeout.max < self.timeout.default {
            return Err(AclError::InvalidConfig(
                "timeout.max must be >= timeout.default".into(),
            ));
        }
        if self.retries.max_attempts == 0 {
            return Err(AclError::InvalidConfig(
                "retries.max_attempts must be at least 1".into(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(AclError::InvalidConfig(
                "circuit_breaker.failureThreshold must be at least 1".into(),
            ));
        }
        if self.trace_header.is_empty() {
            return Err(AclError::InvalidConfig(
                "trace_header must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Basic auth credentials for the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

/// Per-request timeout bounds, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub default: u64,
    pub max: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default: 30,
            max: 120,
        }
    }
}

impl TimeoutConfig {
    /// Clamp a caller-supplied timeout into `[1s, max]`, falling back to
    /// the default when none was given.
    pub fn resolve(&self, requested: Option<Duration>) -> Duration {
        match requested {
            None => Duration::from_secs(self.default),
            Some(d) => {
                let secs = d.as_secs().clamp(1, self.max);
                Duration::from_secs(secs)
            }
        }
    }
}

/// Retry policy for the HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_seconds: f64,
    pub backoff_multiplier: f64,
    pub jitter_seconds: f64,
    /// HTTP statuses that warrant a retry. `None` keeps the default set.
    pub retryable_status_codes: Option<HashSet<u16>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_seconds: 0.5,
            backoff_multiplier: 2.0,
            jitter_seconds: 0.1,
            retryable_status_codes: None,
        }
    }
}

const DEFAULT_RETRY_STATUSES: [u16; 7] = [408, 409, 429, 500, 502, 503, 504];

impl RetryPolicy {
    /// Whether the given HTTP status warrants another attempt.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        match &self.retryable_status_codes {
            Some(codes) if !codes.is_empty() => codes.contains(&status),
            _ => DEFAULT_RETRY_STATUSES.contains(&status),
        }
    }

    /// Backoff delay before the retry following `attempt` (1-based), not
    /// including jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let secs = self.backoff_seconds * self.backoff_multiplier.powi(exp as i32);
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Circuit breaker configuration. Field names mirror the external
/// configuration surface, which is camelCase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the breaker.
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before allowing a probe.
    pub recovery_timeout: f64,
    /// When set, only timeouts (not HTTP 5xx) count as breaker failures.
    pub record_timeout_only: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: 30.0,
            record_timeout_only: false,
        }
    }
}

/// Templates for deriving graph and snapshot IRIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphNaming {
    /// Template resolving a structured [`crate::dsl::GraphRef`] to an IRI.
    /// Placeholders: `{model}`, `{version}`, `{env}`.
    pub graph_iri_template: String,
    /// Template for snapshot graph IRIs. Placeholders: `{graph}`, `{ts}`.
    pub snapshot_format: String,
}

impl Default for GraphNaming {
    fn default() -> Self {
        Self {
            graph_iri_template: "urn:sf:graph:{model}:{version}:{env}".to_string(),
            snapshot_format: "{graph}:snapshot:{ts}".to_string(),
        }
    }
}

impl GraphNaming {
    /// Derive the snapshot IRI for a source graph at the given UTC instant.
    pub fn snapshot_iri(&self, graph_iri: &str, at: chrono::DateTime<chrono::Utc>) -> String {
        let ts = at.format("%Y%m%dT%H%M%SZ").to_string();
        self.snapshot_format
            .replace("{graph}", graph_iri)
            .replace("{ts}", &ts)
    }
}

/// A named bundle of graph-projection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectionProfile {
    /// Hard upper bound on projected triples.
    pub limit: usize,
    pub include_literals: bool,
    pub directed: bool,
    /// Predicates admitted as edges; empty means all predicates.
    pub edge_predicates: Vec<String>,
}

impl Default for ProjectionProfile {
    fn default() -> Self {
        Self {
            limit: 1000,
            include_literals: false,
            directed: true,
            edge_predicates: Vec::new(),
        }
    }
}
