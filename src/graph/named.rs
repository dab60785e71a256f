//! Named-graph lifecycle operations and the conditional-clear engine.
//!
//! Each lifecycle operation emits a single SPARQL UPDATE. Conditional
//! clears always estimate first: the dry-run path issues only the COUNT
//! and sample SELECTs, and the destructive path re-checks the estimate
//! against the delete ceiling before any DELETE leaves the process.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::{BindingRow, RdfClient};
use crate::config::GraphNaming;
use crate::dsl::GraphRef;
use crate::error::{AclError, Result};
use crate::sanitizer;

/// A triple pattern with nullable positions; null components become the
/// default variables `?s` / `?p` / `?o`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriplePattern {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
}

impl TriplePattern {
    pub fn to_sparql(&self) -> String {
        let s = self.subject.as_deref().unwrap_or("?s");
        let p = self.predicate.as_deref().unwrap_or("?p");
        let o = self.object.as_deref().unwrap_or("?o");
        format!("{s} {p} {o} .")
    }
}

/// Object-position type filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectTypeFilter {
    #[serde(rename = "IRI")]
    Iri,
    #[serde(rename = "Literal")]
    Literal,
}

/// Condition driving a conditional clear. An empty pattern list matches
/// every triple in the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClearCondition {
    #[serde(default)]
    pub patterns: Vec<TriplePattern>,
    #[serde(default)]
    pub subject_prefix: Option<String>,
    #[serde(default)]
    pub predicate_whitelist: Option<Vec<String>>,
    #[serde(default)]
    pub object_type: Option<ObjectTypeFilter>,
}

/// Dry-run estimate for a conditional clear.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunResult {
    pub graph_iri: String,
    pub estimated_deletes: u64,
    /// At most ten sample rows matching the condition.
    pub sample_triples: Vec<BindingRow>,
    pub estimate_ms: f64,
}

/// Outcome of an executed conditional clear.
#[derive(Debug, Clone, Serialize)]
pub struct ClearOutcome {
    pub graph: String,
    /// The pre-execution estimate; the SPARQL protocol reports no count.
    pub deleted_count: u64,
    pub execution_time_ms: f64,
    pub executed: bool,
}

/// Either branch of `conditional_clear`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClearResult {
    DryRun(DryRunResult),
    Executed(ClearOutcome),
}

/// Result of `create`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStatus {
    pub graph: String,
    /// `created` or `exists`.
    pub status: String,
}

/// Result of `merge`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeInfo {
    pub source: String,
    pub target: String,
}

/// Result of `snapshot`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotInfo {
    pub graph: String,
    pub snapshot_id: String,
    pub snapshot_graph: String,
}

/// Manager for named-graph operations.
pub struct NamedGraphManager {
    client: Arc<dyn RdfClient>,
    naming: GraphNaming,
}

impl NamedGraphManager {
    pub fn new(client: Arc<dyn RdfClient>, naming: GraphNaming) -> Self {
        Self { client, naming }
    }

    /// Create a named graph, reporting whether it already existed. A
    /// SILENT create gives no signal, so existence is pre-checked with a
    /// one-row probe.
    pub async fn create(&self, graph: &GraphRef, trace_id: &str) -> Result<GraphStatus> {
        let graph_iri = graph.resolve(&self.naming)?;
        let probe = format!(
            "SELECT ?s WHERE {{\n  GRAPH <{graph_iri}> {{ ?s ?p ?o . }}\n}} LIMIT 1"
        );
        let existing = self.client.select(&probe, None, Some(trace_id)).await?;
        if !existing.bindings.is_empty() {
            debug!(graph = graph_iri.as_str(), "graph already exists");
            return Ok(GraphStatus {
                graph: graph_iri,
                status: "exists".to_string(),
            });
        }
        self.client
            .update(
                &format!("CREATE SILENT GRAPH <{graph_iri}>"),
                None,
                Some(trace_id),
            )
            .await?;
        Ok(GraphStatus {
            graph: graph_iri,
            status: "created".to_string(),
        })
    }

    /// Remove every triple from the graph.
    pub async fn clear(&self, graph: &GraphRef, trace_id: &str) -> Result<String> {
        let graph_iri = graph.resolve(&self.naming)?;
        self.client
            .update(&format!("CLEAR GRAPH <{graph_iri}>"), None, Some(trace_id))
            .await?;
        Ok(graph_iri)
    }

    /// Append the source graph's triples into the target graph.
    pub async fn merge(
        &self,
        source: &GraphRef,
        target: &GraphRef,
        trace_id: &str,
    ) -> Result<MergeInfo> {
        let source_iri = source.resolve(&self.naming)?;
        let target_iri = target.resolve(&self.naming)?;
        self.client
            .update(
                &format!("ADD SILENT GRAPH <{source_iri}> TO GRAPH <{target_iri}>"),
                None,
                Some(trace_id),
            )
            .await?;
        Ok(MergeInfo {
            source: source_iri,
            target: target_iri,
        })
    }

    /// Copy the graph into a timestamped snapshot graph.
    pub async fn snapshot(&self, graph: &GraphRef, trace_id: &str) -> Result<SnapshotInfo> {
        let graph_iri = graph.resolve(&self.naming)?;
        let now = Utc::now();
        let snapshot_graph = self.naming.snapshot_iri(&graph_iri, now);
        let snapshot_id = format!("snapshot-{}", now.format("%Y%m%dT%H%M%SZ"));
        self.client
            .update(
                &format!("COPY SILENT GRAPH <{graph_iri}> TO GRAPH <{snapshot_graph}>"),
                None,
                Some(trace_id),
            )
            .await?;
        info!(
            graph = graph_iri.as_str(),
            snapshot = snapshot_graph.as_str(),
            "snapshot created"
        );
        Ok(SnapshotInfo {
            graph: graph_iri,
            snapshot_id,
            snapshot_graph,
        })
    }

    /// Conditionally delete triples matching `condition`.
    ///
    /// `dry_run = true` returns the estimate and a sample without issuing
    /// any UPDATE. Otherwise the estimate is taken first and compared to
    /// `max_deletes`; exceeding the ceiling fails with
    /// [`AclError::DeleteCeilingExceeded`] and the DELETE is never issued.
    pub async fn conditional_clear(
        &self,
        graph: &GraphRef,
        condition: &ClearCondition,
        dry_run: bool,
        max_deletes: u64,
        trace_id: &str,
    ) -> Result<ClearResult> {
        let graph_iri = graph.resolve(&self.naming)?;
        let (delete_clause, where_clause) = build_conditional_delete(condition, &graph_iri);

        let estimate = self
            .estimate_conditional_delete(&graph_iri, &where_clause, trace_id)
            .await?;
        if dry_run {
            return Ok(ClearResult::DryRun(estimate));
        }

        if estimate.estimated_deletes > max_deletes {
            return Err(AclError::DeleteCeilingExceeded {
                estimated: estimate.estimated_deletes,
                max_deletes,
            });
        }

        let update = format!("{delete_clause}\n{where_clause}");
        let outcome = self.client.update(&update, None, Some(trace_id)).await?;
        info!(
            graph = graph_iri.as_str(),
            deleted = estimate.estimated_deletes,
            "conditional clear executed"
        );
        Ok(ClearResult::Executed(ClearOutcome {
            graph: graph_iri,
            deleted_count: estimate.estimated_deletes,
            execution_time_ms: outcome.duration_ms,
            executed: true,
        }))
    }

    async fn estimate_conditional_delete(
        &self,
        graph_iri: &str,
        where_clause: &str,
        trace_id: &str,
    ) -> Result<DryRunResult> {
        let start = Instant::now();

        let count_query = format!("SELECT (COUNT(*) AS ?count)\n{where_clause}");
        let count_result = self.client.select(&count_query, None, Some(trace_id)).await?;
        let estimated_deletes = count_result
            .bindings
            .first()
            .and_then(|row| row.get("count").or_else(|| row.values().next()))
            .and_then(|cell| cell.value.parse::<u64>().ok())
            .unwrap_or(0);

        let sample_query = format!("SELECT *\n{where_clause}\nLIMIT 10");
        let sample_result = self.client.select(&sample_query, None, Some(trace_id)).await?;

        let mut estimate_ms = start.elapsed().as_secs_f64() * 1000.0;
        if estimated_deletes > 10 {
            estimate_ms *= estimated_deletes as f64 / 10.0;
        }

        Ok(DryRunResult {
            graph_iri: graph_iri.to_string(),
            estimated_deletes,
            sample_triples: sample_result.bindings,
            estimate_ms,
        })
    }
}

/// Compose the DELETE and WHERE clauses for a condition.
fn build_conditional_delete(condition: &ClearCondition, graph_iri: &str) -> (String, String) {
    let patterns: Vec<String> = if condition.patterns.is_empty() {
        vec![TriplePattern::default().to_sparql()]
    } else {
        condition.patterns.iter().map(TriplePattern::to_sparql).collect()
    };

    let mut filters = Vec::new();
    if let Some(prefix) = &condition.subject_prefix {
        let escaped = sanitizer::escape_string(prefix);
        filters.push(format!("FILTER(STRSTARTS(STR(?s), \"{escaped}\"))"));
    }
    if let Some(whitelist) = &condition.predicate_whitelist {
        if !whitelist.is_empty() {
            let rendered: Vec<String> = whitelist
                .iter()
                .map(|p| sanitizer::format_iri_value(p).into_inner())
                .collect();
            filters.push(format!("FILTER(?p IN ({}))", rendered.join(", ")));
        }
    }
    match condition.object_type {
        Some(ObjectTypeFilter::Iri) => filters.push("FILTER(isIRI(?o))".to_string()),
        Some(ObjectTypeFilter::Literal) => filters.push("FILTER(isLiteral(?o))".to_string()),
        None => {}
    }

    let mut where_clause = format!("WHERE {{\n  GRAPH <{graph_iri}> {{\n");
    for pattern in &patterns {
        where_clause.push_str(&format!("    {pattern}\n"));
    }
    for filter in &filters {
        where_clause.push_str(&format!("    {filter}\n"));
    }
    where_clause.push_str("  }\n}");

    let mut delete_clause = format!("DELETE {{\n  GRAPH <{graph_iri}> {{\n");
    for pattern in &patterns {
        delete_clause.push_str(&format!("    {pattern}\n"));
    }
    delete_clause.push_str("  }\n}");

    (delete_clause, where_clause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::stub::{RequestKind, ScriptedClient};
    use crate::client::BindingCell;

    const XSD_INT: &str = "http://www.w3.org/2001/XMLSchema#integer";

    fn graph() -> GraphRef {
        GraphRef::named("urn:sf:graph:demo:v1:dev")
    }

    fn manager(client: Arc<ScriptedClient>) -> NamedGraphManager {
        NamedGraphManager::new(client, GraphNaming::default())
    }

    fn push_count(client: &ScriptedClient, count: u64) {
        client.push_select_column(
            "count",
            vec![BindingCell::typed_literal(count.to_string(), XSD_INT)],
        );
    }

    #[tokio::test]
    async fn dry_run_issues_no_update() {
        let client = Arc::new(ScriptedClient::new());
        push_count(&client, 12000);
        client.push_select_column("s", vec![BindingCell::uri("http://e/e1")]);

        let result = manager(client.clone())
            .conditional_clear(&graph(), &ClearCondition::default(), true, 10_000, "t-1")
            .await
            .unwrap();

        let ClearResult::DryRun(dry) = result else {
            panic!("expected dry-run result");
        };
        assert_eq!(dry.estimated_deletes, 12000);
        assert_eq!(dry.sample_triples.len(), 1);
        assert!(client.update_texts().is_empty());
    }

    #[tokio::test]
    async fn ceiling_violation_never_issues_the_delete() {
        let client = Arc::new(ScriptedClient::new());
        push_count(&client, 12000);
        client.push_select_column("s", vec![]);

        let err = manager(client.clone())
            .conditional_clear(&graph(), &ClearCondition::default(), false, 10_000, "t-2")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AclError::DeleteCeilingExceeded {
                estimated: 12000,
                max_deletes: 10_000
            }
        ));
        assert!(client.update_texts().is_empty());
    }

    #[tokio::test]
    async fn clear_below_ceiling_executes_the_delete() {
        let client = Arc::new(ScriptedClient::new());
        push_count(&client, 5);
        client.push_select_column("s", vec![]);

        let result = manager(client.clone())
            .conditional_clear(&graph(), &ClearCondition::default(), false, 10_000, "t-3")
            .await
            .unwrap();

        let ClearResult::Executed(outcome) = result else {
            panic!("expected executed result");
        };
        assert!(outcome.executed);
        assert_eq!(outcome.deleted_count, 5);

        let updates = client.update_texts();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].contains("DELETE {"));
        assert!(updates[0].contains("GRAPH <urn:sf:graph:demo:v1:dev>"));
        assert!(updates[0].contains("?s ?p ?o ."));
    }

    #[test]
    fn condition_filters_render_into_the_where_clause() {
        let condition = ClearCondition {
            patterns: vec![TriplePattern {
                subject: None,
                predicate: Some("rdf:type".to_string()),
                object: None,
            }],
            subject_prefix: Some("http://example.org/user/".to_string()),
            predicate_whitelist: Some(vec![
                "rdf:type".to_string(),
                "http://example.org/p".to_string(),
            ]),
            object_type: Some(ObjectTypeFilter::Iri),
        };
        let (delete_clause, where_clause) = build_conditional_delete(&condition, "urn:sf:g");

        assert!(where_clause.contains("?s rdf:type ?o ."));
        assert!(where_clause
            .contains("FILTER(STRSTARTS(STR(?s), \"http://example.org/user/\"))"));
        assert!(where_clause.contains("FILTER(?p IN (rdf:type, <http://example.org/p>))"));
        assert!(where_clause.contains("FILTER(isIRI(?o))"));
        // The DELETE clause carries the pattern but not the filters.
        assert!(delete_clause.contains("?s rdf:type ?o ."));
        assert!(!delete_clause.contains("FILTER"));
    }

    #[test]
    fn literal_object_filter_renders() {
        let condition = ClearCondition {
            object_type: Some(ObjectTypeFilter::Literal),
            ..ClearCondition::default()
        };
        let (_, where_clause) = build_conditional_delete(&condition, "urn:sf:g");
        assert!(where_clause.contains("FILTER(isLiteral(?o))"));
    }

    #[tokio::test]
    async fn create_reports_exists_after_probe_hit() {
        let client = Arc::new(ScriptedClient::new());
        client.push_select_column("s", vec![BindingCell::uri("http://e/e1")]);
        let status = manager(client.clone()).create(&graph(), "t-4").await.unwrap();
        assert_eq!(status.status, "exists");
        assert!(client.update_texts().is_empty());

        let client = Arc::new(ScriptedClient::new());
        client.push_select_column("s", vec![]);
        let status = manager(client.clone()).create(&graph(), "t-5").await.unwrap();
        assert_eq!(status.status, "created");
        assert_eq!(
            client.update_texts(),
            vec!["CREATE SILENT GRAPH <urn:sf:graph:demo:v1:dev>".to_string()]
        );
    }

    #[tokio::test]
    async fn lifecycle_operations_emit_single_updates() {
        let client = Arc::new(ScriptedClient::new());
        let mgr = manager(client.clone());

        mgr.clear(&graph(), "t-6").await.unwrap();
        mgr.merge(&graph(), &GraphRef::named("urn:sf:graph:demo:v1:prod"), "t-6")
            .await
            .unwrap();
        let snapshot = mgr.snapshot(&graph(), "t-6").await.unwrap();

        let updates = client.update_texts();
        assert_eq!(updates[0], "CLEAR GRAPH <urn:sf:graph:demo:v1:dev>");
        assert_eq!(
            updates[1],
            "ADD SILENT GRAPH <urn:sf:graph:demo:v1:dev> TO GRAPH <urn:sf:graph:demo:v1:prod>"
        );
        assert!(updates[2].starts_with("COPY SILENT GRAPH <urn:sf:graph:demo:v1:dev> TO GRAPH <urn:sf:graph:demo:v1:dev:snapshot:"));
        assert!(snapshot.snapshot_graph.contains(":snapshot:"));
        assert!(snapshot.snapshot_graph.ends_with('Z'));
    }

    #[tokio::test]
    async fn estimate_uses_count_and_sample_queries() {
        let client = Arc::new(ScriptedClient::new());
        push_count(&client, 3);
        client.push_select_column("s", vec![]);
        manager(client.clone())
            .conditional_clear(&graph(), &ClearCondition::default(), true, 100, "t-7")
            .await
            .unwrap();

        let selects: Vec<_> = client
            .requests()
            .into_iter()
            .filter(|r| r.kind == RequestKind::Select)
            .collect();
        assert_eq!(selects.len(), 2);
        assert!(selects[0].text.contains("SELECT (COUNT(*) AS ?count)"));
        assert!(selects[1].text.contains("LIMIT 10"));
    }
}
