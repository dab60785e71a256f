//! Upsert plan execution with conflict detection and rollback.
//!
//! The manager runs a plan's statements in declaration order. `ignore`
//! statements are preceded by a one-row existence probe; a hit is recorded
//! as a [`Conflict`] and the statement is skipped, never failed. Plans
//! containing `replace` statements get a graph-level `COPY` pre-image, and
//! an upstream failure triggers a best-effort restore from it before the
//! error is surfaced.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::RdfClient;
use crate::config::GraphNaming;
use crate::error::Result;
use crate::upsert::{MergeStrategy, Triple, UpsertPlanner, UpsertRequest};

/// An `ignore`-strategy key whose target already holds a matching triple.
/// Informational, not fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub key: String,
    pub reason: String,
}

/// Result of a successful upsert execution.
#[derive(Debug, Clone, Serialize)]
pub struct UpsertOutcome {
    pub graph: String,
    pub tx_id: String,
    /// Triples applied across executed statements.
    pub applied: usize,
    /// Statements actually submitted to the store.
    pub statements: usize,
    pub conflicts: Vec<Conflict>,
    pub duration_ms: f64,
    pub request_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_id: Option<String>,
}

/// Everything an audit sink needs to persist about one operation. The
/// relational sink itself lives outside this crate; only the seam is here.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub op_type: String,
    pub graph_iri: String,
    pub tx_id: String,
    pub trace_id: String,
    pub request_hash: String,
    pub result_status: String,
    pub latency_ms: f64,
    pub applied: usize,
    pub statements: usize,
    pub conflicts: usize,
    pub actor: Option<String>,
}

/// Optional audit sink invoked after a successful execution. Returning
/// `None` means the sink declined or failed; the operation result is not
/// affected either way.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Option<String>;
}

/// Schedules upsert plans against the store.
pub struct TransactionManager {
    planner: UpsertPlanner,
    client: Arc<dyn RdfClient>,
    naming: GraphNaming,
    snapshot_on_replace: bool,
    audit: Option<Arc<dyn AuditSink>>,
}

impl TransactionManager {
    pub fn new(client: Arc<dyn RdfClient>, naming: GraphNaming) -> Self {
        Self {
            planner: UpsertPlanner::new(naming.clone()),
            client,
            naming,
            snapshot_on_replace: true,
            audit: None,
        }
    }

    /// Toggle graph-level pre-image snapshots for replace plans.
    pub fn with_snapshots(mut self, enabled: bool) -> Self {
        self.snapshot_on_replace = enabled;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Plan and execute an upsert request.
    pub async fn upsert(
        &self,
        request: &UpsertRequest,
        trace_id: &str,
        actor: Option<&str>,
    ) -> Result<UpsertOutcome> {
        let plan = self.planner.plan(request)?;
        let tx_id = Uuid::new_v4().to_string();
        let start = Instant::now();

        let mut snapshot_iri: Option<String> = None;
        if self.snapshot_on_replace && plan.statements.iter().any(|s| s.requires_snapshot) {
            let candidate = self.naming.snapshot_iri(&plan.graph_iri, Utc::now());
            let copy = format!(
                "COPY SILENT GRAPH <{}> TO GRAPH <{candidate}>",
                plan.graph_iri
            );
            match self.client.update(&copy, None, Some(trace_id)).await {
                Ok(_) => {
                    debug!(snapshot = candidate.as_str(), "captured pre-image snapshot");
                    snapshot_iri = Some(candidate);
                }
                Err(e) => {
                    warn!(error = %e, "snapshot capture failed, continuing without rollback cover");
                }
            }
        }

        let mut applied = 0usize;
        let mut executed = 0usize;
        let mut conflicts = Vec::new();

        for statement in &plan.statements {
            if statement.strategy == MergeStrategy::Ignore {
                let exists = self
                    .triple_exists(&plan.graph_iri, &statement.triples[0], trace_id)
                    .await?;
                if exists {
                    conflicts.push(Conflict {
                        key: statement.key.clone(),
                        reason: "duplicate".to_string(),
                    });
                    continue;
                }
            }

            if let Err(err) = self
                .client
                .update(&statement.sparql, None, Some(trace_id))
                .await
            {
                if let Some(snapshot) = &snapshot_iri {
                    self.restore_snapshot(&plan.graph_iri, snapshot, trace_id)
                        .await;
                }
                return Err(err);
            }
            executed += 1;
            applied += statement.triples.len();
        }

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut audit_id = None;
        if let Some(audit) = &self.audit {
            audit_id = audit
                .record(AuditRecord {
                    op_type: "rdf.upsert".to_string(),
                    graph_iri: plan.graph_iri.clone(),
                    tx_id: tx_id.clone(),
                    trace_id: trace_id.to_string(),
                    request_hash: plan.request_hash.clone(),
                    result_status: if conflicts.is_empty() {
                        "success".to_string()
                    } else {
                        "conflict".to_string()
                    },
                    latency_ms: duration_ms,
                    applied,
                    statements: executed,
                    conflicts: conflicts.len(),
                    actor: actor.map(str::to_string),
                })
                .await;
        }

        Ok(UpsertOutcome {
            graph: plan.graph_iri,
            tx_id,
            applied,
            statements: executed,
            conflicts,
            duration_ms,
            request_hash: plan.request_hash,
            audit_id,
        })
    }

    /// One-row probe for an identical triple under the target graph.
    async fn triple_exists(&self, graph_iri: &str, triple: &Triple, trace_id: &str) -> Result<bool> {
        let query = format!(
            "SELECT ?s WHERE {{\n  GRAPH <{graph_iri}> {{ {} }}\n}} LIMIT 1",
            triple.render()
        );
        let result = self.client.select(&query, None, Some(trace_id)).await?;
        Ok(!result.bindings.is_empty())
    }

    /// Best-effort restore: a reverse COPY clears the damaged graph and
    /// reinstates the pre-image in one statement.
    async fn restore_snapshot(&self, graph_iri: &str, snapshot_iri: &str, trace_id: &str) {
        let restore = format!("COPY SILENT GRAPH <{snapshot_iri}> TO GRAPH <{graph_iri}>");
        match self.client.update(&restore, None, Some(trace_id)).await {
            Ok(_) => warn!(graph = graph_iri, snapshot = snapshot_iri, "rolled back from snapshot"),
            Err(e) => warn!(error = %e, "rollback from snapshot failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::stub::{RequestKind, ScriptedClient};
    use crate::client::BindingCell;
    use crate::dsl::GraphRef;
    use crate::error::AclError;
    use crate::upsert::UpsertKey;
    use std::sync::Mutex;

    fn replace_request() -> UpsertRequest {
        UpsertRequest {
            graph: GraphRef::named("urn:sf:graph:demo:v1:dev"),
            triples: vec![
                Triple::new("http://e/e1", "rdfs:label", "A"),
                Triple::new("http://e/e1", "rdfs:label", "B"),
            ],
            upsert_key: UpsertKey::SubjectPredicate,
            custom_key_fields: None,
            merge_strategy: MergeStrategy::Replace,
            provenance: None,
        }
    }

    fn ignore_request() -> UpsertRequest {
        UpsertRequest {
            merge_strategy: MergeStrategy::Ignore,
            ..replace_request()
        }
    }

    #[tokio::test]
    async fn replace_snapshots_then_executes() {
        let client = Arc::new(ScriptedClient::new());
        let manager = TransactionManager::new(client.clone(), GraphNaming::default());
        let outcome = manager
            .upsert(&replace_request(), "t-1", Some("alice"))
            .await
            .unwrap();

        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.statements, 1);
        assert!(outcome.conflicts.is_empty());
        assert!(!outcome.request_hash.is_empty());

        let updates = client.update_texts();
        assert_eq!(updates.len(), 2);
        assert!(updates[0].starts_with("COPY SILENT GRAPH <urn:sf:graph:demo:v1:dev>"));
        assert!(updates[1].contains("DELETE {"));
    }

    #[tokio::test]
    async fn snapshots_can_be_disabled() {
        let client = Arc::new(ScriptedClient::new());
        let manager =
            TransactionManager::new(client.clone(), GraphNaming::default()).with_snapshots(false);
        manager.upsert(&replace_request(), "t-1", None).await.unwrap();
        let updates = client.update_texts();
        assert_eq!(updates.len(), 1);
        assert!(!updates[0].starts_with("COPY"));
    }

    #[tokio::test]
    async fn ignore_conflicts_are_reported_not_fatal() {
        let client = Arc::new(ScriptedClient::new());
        // First probe hits an existing triple, second probe misses.
        client.push_select_column("s", vec![BindingCell::uri("http://e/e1")]);
        client.push_select_column("s", vec![]);

        let manager = TransactionManager::new(client.clone(), GraphNaming::default());
        let outcome = manager.upsert(&ignore_request(), "t-2", None).await.unwrap();

        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].reason, "duplicate");
        assert_eq!(outcome.statements, 1);
        assert_eq!(outcome.applied, 1);
        // Only the non-conflicting statement reached the store.
        assert_eq!(client.update_texts().len(), 1);
    }

    #[tokio::test]
    async fn failure_restores_the_snapshot_and_surfaces_the_error() {
        let client = Arc::new(ScriptedClient::new());
        client.push_update_ok(); // snapshot COPY
        client.push_update_error(AclError::FusekiQuery {
            status: 500,
            message: "boom".into(),
            trace_id: None,
        });
        client.push_update_ok(); // restore COPY

        let manager = TransactionManager::new(client.clone(), GraphNaming::default());
        let err = manager.upsert(&replace_request(), "t-3", None).await.unwrap_err();
        assert_eq!(err.kind(), "FusekiQueryError");

        let updates = client.update_texts();
        assert_eq!(updates.len(), 3);
        assert!(updates[2].starts_with("COPY SILENT GRAPH <urn:sf:graph:demo:v1:dev:snapshot:"));
        assert!(updates[2].ends_with("TO GRAPH <urn:sf:graph:demo:v1:dev>"));
    }

    #[tokio::test]
    async fn trace_id_reaches_every_request() {
        let client = Arc::new(ScriptedClient::new());
        let manager = TransactionManager::new(client.clone(), GraphNaming::default());
        manager.upsert(&replace_request(), "trace-42", None).await.unwrap();
        for request in client.requests() {
            assert_eq!(request.trace_id.as_deref(), Some("trace-42"));
        }
    }

    struct MemoryAudit {
        records: Mutex<Vec<AuditRecord>>,
    }

    #[async_trait]
    impl AuditSink for MemoryAudit {
        async fn record(&self, record: AuditRecord) -> Option<String> {
            self.records.lock().unwrap().push(record);
            Some("audit-1".to_string())
        }
    }

    #[tokio::test]
    async fn audit_sink_sees_successful_operations() {
        let client = Arc::new(ScriptedClient::new());
        let audit = Arc::new(MemoryAudit {
            records: Mutex::new(Vec::new()),
        });
        let manager = TransactionManager::new(client, GraphNaming::default())
            .with_audit(audit.clone());
        let outcome = manager
            .upsert(&replace_request(), "t-4", Some("alice"))
            .await
            .unwrap();

        assert_eq!(outcome.audit_id.as_deref(), Some("audit-1"));
        let records = audit.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].op_type, "rdf.upsert");
        assert_eq!(records[0].result_status, "success");
        assert_eq!(records[0].actor.as_deref(), Some("alice"));
        assert_eq!(records[0].statements, 1);
    }

    #[tokio::test]
    async fn probe_queries_go_through_select() {
        let client = Arc::new(ScriptedClient::new());
        client.push_select_column("s", vec![]);
        client.push_select_column("s", vec![]);
        let manager = TransactionManager::new(client.clone(), GraphNaming::default());
        manager.upsert(&ignore_request(), "t-5", None).await.unwrap();

        let selects: Vec<_> = client
            .requests()
            .into_iter()
            .filter(|r| r.kind == RequestKind::Select)
            .collect();
        assert_eq!(selects.len(), 2);
        assert!(selects[0].text.contains("LIMIT 1"));
        assert!(selects[0].text.contains("GRAPH <urn:sf:graph:demo:v1:dev>"));
    }
}
