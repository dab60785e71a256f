//! Named-graph management and graph projection.

pub mod named;
pub mod projection;

pub use named::{
    ClearCondition, ClearOutcome, ClearResult, DryRunResult, GraphStatus, MergeInfo,
    NamedGraphManager, ObjectTypeFilter, SnapshotInfo, TriplePattern,
};
pub use projection::{
    GraphProjectionBuilder, ProjectionEdge, ProjectionNode, ProjectionOverride, ProjectionResult,
    ProjectionSource, ProjectionStats,
};
