//! # sf-rdf-acl
//!
//! Anti-corruption layer between application code and an RDF triple store
//! speaking SPARQL 1.1 over HTTP. Application-level query and write models
//! are compiled into safe, well-formed SPARQL, executed with resilience
//! (timeouts, retries, circuit breaking), and normalised on the way back.
//!
//! ## Architecture
//!
//! The pure layers (sanitizer, DSL, builder, planner, mapper, formatter)
//! never perform I/O; everything that touches the network goes through the
//! [`client::RdfClient`] capability trait, whose production implementation
//! is [`client::FusekiClient`].
//!
//! - [`sanitizer`]: lexical escaping; the only gate between user text and
//!   SPARQL syntax
//! - [`dsl`] / [`builder`]: typed query model and the SPARQL compiler
//! - [`pagination`]: opaque-cursor keyset pagination
//! - [`upsert`]: merge-strategy planning with deterministic request hashes
//! - [`transaction`]: plan execution, conflict detection, rollback
//! - [`batch`]: chunked template writes with per-item retry
//! - [`graph`]: named-graph lifecycle, conditional clear, projection
//! - [`client`]: resilient SPARQL-protocol HTTP client
//! - [`mapper`] / [`formatter`]: response normalisation
//! - [`provenance`]: RDF* annotation writes
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sf_rdf_acl::{
//!     AclConfig, FusekiClient, GraphRef, MergeStrategy, Triple,
//!     TransactionManager, UpsertKey, UpsertRequest,
//! };
//!
//! # async fn run() -> sf_rdf_acl::Result<()> {
//! let config = AclConfig::default();
//! let client = Arc::new(FusekiClient::new(&config)?);
//! let manager = TransactionManager::new(client, config.naming.clone());
//!
//! let request = UpsertRequest {
//!     graph: GraphRef::named("urn:sf:graph:demo:v1:dev"),
//!     triples: vec![Triple::new("http://example.org/e1", "rdfs:label", "Demo")],
//!     upsert_key: UpsertKey::SubjectPredicate,
//!     custom_key_fields: None,
//!     merge_strategy: MergeStrategy::Replace,
//!     provenance: None,
//! };
//! let outcome = manager.upsert(&request, "trace-1", None).await?;
//! println!("applied {} triples", outcome.applied);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod builder;
pub mod client;
pub mod config;
pub mod dsl;
pub mod error;
pub mod formatter;
pub mod graph;
pub mod mapper;
pub mod pagination;
pub mod provenance;
pub mod sanitizer;
pub mod transaction;
pub mod upsert;

pub use batch::{BatchOperator, BatchResult, BatchTemplate};
pub use builder::SparqlQueryBuilder;
pub use client::{
    BindingCell, BindingRow, CircuitBreaker, CircuitState, ConstructResult, FusekiClient,
    HealthStatus, RdfClient, ResponseStats, SelectResult, UpdateResult,
};
pub use config::{
    AclConfig, BasicAuthConfig, CircuitBreakerConfig, GraphNaming, ProjectionProfile, RetryPolicy,
    TimeoutConfig,
};
pub use dsl::{
    Aggregation, AggregateFunction, Filter, FilterOp, FilterValue, GraphRef, GroupBy, Page,
    QueryDsl, QueryType, SortOrder, SortSpec, Term, TimeWindow,
};
pub use error::{AclError, Result};
pub use formatter::{FormattedGraph, GraphFormat, GraphFormatter, SimplifiedGraph};
pub use graph::{
    ClearCondition, ClearOutcome, ClearResult, DryRunResult, GraphProjectionBuilder, GraphStatus,
    NamedGraphManager, ObjectTypeFilter, ProjectionOverride, ProjectionResult, ProjectionSource,
    TriplePattern,
};
pub use mapper::{MappedCell, ResultMapper};
pub use pagination::{CursorPage, PageResult};
pub use provenance::ProvenanceService;
pub use transaction::{AuditRecord, AuditSink, Conflict, TransactionManager, UpsertOutcome};
pub use upsert::{
    MergeStrategy, Provenance, Triple, UpsertKey, UpsertPlan, UpsertPlanner, UpsertRequest,
    UpsertStatement,
};
