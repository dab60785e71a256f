//! Error types for the RDF anti-corruption layer.
//!
//! A single [`AclError`] enum covers the whole taxonomy: input validation,
//! policy gates, and upstream store failures. Input and policy errors are
//! raised before any I/O; upstream errors are raised after the retry loop
//! has exhausted its attempts (or immediately for non-retryable statuses).
//! Idempotency conflicts are *not* errors; they travel as data in
//! [`crate::transaction::Conflict`] records.

use thiserror::Error;

/// Result type alias using [`AclError`].
pub type Result<T> = std::result::Result<T, AclError>;

/// Errors produced by the ACL.
#[derive(Debug, Clone, Error)]
pub enum AclError {
    /// IRI is empty, has a non-http(s) scheme, or contains forbidden characters
    #[error("invalid IRI: {0}")]
    InvalidIri(String),

    /// Literal cannot be rendered (non-finite float, malformed value)
    #[error("invalid literal: {0}")]
    InvalidLiteral(String),

    /// Prefix name fails NCName validation, or a declaration conflicts
    #[error("invalid prefix: {0}")]
    InvalidPrefix(String),

    /// Upsert key discipline cannot be applied to the request
    #[error("invalid upsert key: {0}")]
    InvalidKey(String),

    /// Pagination cursor is not valid base64url/JSON
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// Configuration value out of range or missing
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Query DSL violates an aggregation/grouping invariant
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Conditional clear would delete more triples than the ceiling allows
    #[error("estimated deletes ({estimated}) exceed the delete ceiling ({max_deletes})")]
    DeleteCeilingExceeded { estimated: u64, max_deletes: u64 },

    /// Projection limit override is not below the profile bound
    #[error("limit override {requested} violates profile bound {profile_limit}")]
    LimitExceedsProfile {
        requested: usize,
        profile_limit: usize,
    },

    /// Merge strategy name not recognised
    #[error("unknown merge strategy: {0}")]
    UnknownStrategy(String),

    /// Output format or algorithm name not recognised
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Store rejected the request as malformed (HTTP 400)
    #[error("bad request: {message}")]
    BadRequest {
        message: String,
        trace_id: Option<String>,
    },

    /// Store requires authentication (HTTP 401)
    #[error("unauthenticated: {message}")]
    Unauthenticated {
        message: String,
        trace_id: Option<String>,
    },

    /// Store denied access (HTTP 403)
    #[error("forbidden: {message}")]
    Forbidden {
        message: String,
        trace_id: Option<String>,
    },

    /// Dataset or resource missing on the store (HTTP 404)
    #[error("not found: {message}")]
    NotFound {
        message: String,
        trace_id: Option<String>,
    },

    /// Store-side query/update failure or an unparseable response
    #[error("store query failed (status {status}): {message}")]
    FusekiQuery {
        status: u16,
        message: String,
        trace_id: Option<String>,
    },

    /// Transport-level failure talking to the store
    #[error("store connection failed: {message}")]
    FusekiConnect {
        message: String,
        trace_id: Option<String>,
    },

    /// Circuit breaker is open; the store was not contacted
    #[error("circuit breaker open; retry after {retry_after_secs:.1}s")]
    CircuitOpen { retry_after_secs: f64 },

    /// Invariant broken inside the ACL itself
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AclError {
    /// Stable kind label for logs and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            AclError::InvalidIri(_) => "InvalidIri",
            AclError::InvalidLiteral(_) => "InvalidLiteral",
            AclError::InvalidPrefix(_) => "InvalidPrefix",
            AclError::InvalidKey(_) => "InvalidKey",
            AclError::InvalidCursor(_) => "InvalidCursor",
            AclError::InvalidConfig(_) => "InvalidConfig",
            AclError::ConstraintViolation(_) => "ConstraintViolation",
            AclError::DeleteCeilingExceeded { .. } => "DeleteCeilingExceeded",
            AclError::LimitExceedsProfile { .. } => "LimitExceedsProfile",
            AclError::UnknownStrategy(_) => "UnknownStrategy",
            AclError::UnknownAlgorithm(_) => "UnknownAlgorithm",
            AclError::BadRequest { .. } => "BadRequest",
            AclError::Unauthenticated { .. } => "Unauthenticated",
            AclError::Forbidden { .. } => "Forbidden",
            AclError::NotFound { .. } => "NotFound",
            AclError::FusekiQuery { .. } => "FusekiQueryError",
            AclError::FusekiConnect { .. } => "FusekiConnectError",
            AclError::CircuitOpen { .. } => "FusekiCircuitOpen",
            AclError::Unexpected(_) => "Unexpected",
        }
    }

    /// HTTP status a transport layer should surface for this error.
    pub fn http_status_hint(&self) -> u16 {
        match self {
            AclError::InvalidIri(_)
            | AclError::InvalidLiteral(_)
            | AclError::InvalidPrefix(_)
            | AclError::InvalidKey(_)
            | AclError::InvalidCursor(_)
            | AclError::ConstraintViolation(_)
            | AclError::UnknownStrategy(_)
            | AclError::UnknownAlgorithm(_)
            | AclError::LimitExceedsProfile { .. } => 400,
            AclError::DeleteCeilingExceeded { .. } => 409,
            AclError::BadRequest { .. } => 400,
            AclError::Unauthenticated { .. } => 401,
            AclError::Forbidden { .. } => 403,
            AclError::NotFound { .. } => 404,
            AclError::FusekiQuery { status, .. } if *status >= 400 => *status,
            AclError::FusekiQuery { .. } => 502,
            AclError::FusekiConnect { .. } => 502,
            AclError::CircuitOpen { .. } => 503,
            AclError::InvalidConfig(_) | AclError::Unexpected(_) => 500,
        }
    }

    /// Whether re-invoking the failed operation with identical inputs may
    /// succeed. Input and policy errors never are; transient upstream
    /// failures and an open breaker are.
    pub fn is_retryable(&self) -> bool {
        match self {
            AclError::FusekiConnect { .. } | AclError::CircuitOpen { .. } => true,
            AclError::FusekiQuery { status, .. } => {
                *status >= 500 || matches!(status, 408 | 429)
            }
            _ => false,
        }
    }

    /// Trace id attached to upstream errors, when the caller supplied one.
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            AclError::BadRequest { trace_id, .. }
            | AclError::Unauthenticated { trace_id, .. }
            | AclError::Forbidden { trace_id, .. }
            | AclError::NotFound { trace_id, .. }
            | AclError::FusekiQuery { trace_id, .. }
            | AclError::FusekiConnect { trace_id, .. } => trace_id.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for AclError {
    fn from(err: serde_json::Error) -> Self {
        AclError::Unexpected(format!("serialization error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_kinds_use_store_labels() {
        let err = AclError::FusekiQuery {
            status: 500,
            message: "boom".into(),
            trace_id: Some("t-1".into()),
        };
        assert_eq!(err.kind(), "FusekiQueryError");
        assert_eq!(err.http_status_hint(), 500);
        assert!(err.is_retryable());
        assert_eq!(err.trace_id(), Some("t-1"));
    }

    #[test]
    fn input_errors_are_not_retryable() {
        let err = AclError::InvalidIri("x".into());
        assert!(!err.is_retryable());
        assert_eq!(err.http_status_hint(), 400);
    }

    #[test]
    fn ceiling_error_carries_both_bounds() {
        let err = AclError::DeleteCeilingExceeded {
            estimated: 12000,
            max_deletes: 10000,
        };
        assert_eq!(err.kind(), "DeleteCeilingExceeded");
        assert!(err.to_string().contains("12000"));
        assert!(err.to_string().contains("10000"));
    }

    #[test]
    fn non_retryable_statuses_surface_as_is() {
        let err = AclError::FusekiQuery {
            status: 422,
            message: "unprocessable".into(),
            trace_id: None,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.http_status_hint(), 422);
    }
}
