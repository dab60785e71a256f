//! RDF client capability surface.
//!
//! [`RdfClient`] is the seam between the pure planning/building layers and
//! the store: one production implementation speaks the SPARQL 1.1 Protocol
//! over HTTP ([`FusekiClient`]), and a scripted double backs tests (the
//! `stub` module, compiled only for tests or under the `testing` feature).

pub mod breaker;
pub mod http;
#[cfg(any(test, feature = "testing"))]
pub mod stub;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use breaker::{CircuitBreaker, CircuitState};
pub use http::FusekiClient;

/// One cell of a W3C SPARQL JSON results binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingCell {
    /// `uri`, `literal`, or `bnode`.
    #[serde(rename = "type")]
    pub cell_type: String,
    pub value: String,
    #[serde(rename = "xml:lang", default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

impl BindingCell {
    pub fn uri(value: impl Into<String>) -> Self {
        Self {
            cell_type: "uri".to_string(),
            value: value.into(),
            lang: None,
            datatype: None,
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            cell_type: "literal".to_string(),
            value: value.into(),
            lang: None,
            datatype: None,
        }
    }

    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            cell_type: "literal".to_string(),
            value: value.into(),
            lang: None,
            datatype: Some(datatype.into()),
        }
    }

    pub fn lang_literal(value: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            cell_type: "literal".to_string(),
            value: value.into(),
            lang: Some(lang.into()),
            datatype: None,
        }
    }

    pub fn is_uri(&self) -> bool {
        self.cell_type == "uri"
    }
}

/// One result row: variable name → cell.
pub type BindingRow = HashMap<String, BindingCell>;

/// Request-level statistics attached to every normalized response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseStats {
    pub status: u16,
    pub duration_ms: f64,
}

/// Normalized SELECT response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectResult {
    pub vars: Vec<String>,
    pub bindings: Vec<BindingRow>,
    pub stats: ResponseStats,
}

impl SelectResult {
    /// An empty result set, useful for defaults and doubles.
    pub fn empty() -> Self {
        Self {
            vars: Vec::new(),
            bindings: Vec::new(),
            stats: ResponseStats {
                status: 200,
                duration_ms: 0.0,
            },
        }
    }
}

/// Normalized CONSTRUCT response: Turtle text plus stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructResult {
    pub turtle: String,
    pub stats: ResponseStats,
}

/// Normalized UPDATE response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub status: u16,
    pub duration_ms: f64,
}

/// Liveness information for the configured backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub backend: String,
    pub dataset: String,
}

/// Capability set of an RDF store client.
///
/// Implementations must be cancellation-safe: dropping a returned future
/// releases the underlying connection and leaves breaker state untouched.
#[async_trait]
pub trait RdfClient: Send + Sync {
    /// Execute a SPARQL SELECT query.
    async fn select(
        &self,
        query: &str,
        timeout: Option<Duration>,
        trace_id: Option<&str>,
    ) -> Result<SelectResult>;

    /// Execute a SPARQL CONSTRUCT query, returning Turtle.
    async fn construct(
        &self,
        query: &str,
        timeout: Option<Duration>,
        trace_id: Option<&str>,
    ) -> Result<ConstructResult>;

    /// Execute a SPARQL UPDATE statement.
    async fn update(
        &self,
        update: &str,
        timeout: Option<Duration>,
        trace_id: Option<&str>,
    ) -> Result<UpdateResult>;

    /// Cheap liveness probe; never generates query load.
    async fn health(&self) -> Result<HealthStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_cell_parses_w3c_shape() {
        let cell: BindingCell = serde_json::from_str(
            r#"{"type": "literal", "value": "示例", "xml:lang": "zh"}"#,
        )
        .unwrap();
        assert_eq!(cell.cell_type, "literal");
        assert_eq!(cell.lang.as_deref(), Some("zh"));

        let uri: BindingCell =
            serde_json::from_str(r#"{"type": "uri", "value": "http://example.org/a"}"#).unwrap();
        assert!(uri.is_uri());
    }
}
