//! RDF* provenance annotation writes.
//!
//! Each asserted triple is quoted as `<<s p o>>` and annotated with a
//! generation timestamp plus optional evidence, confidence, and source,
//! all submitted as one `INSERT DATA`. Timestamps are explicit UTC.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::client::RdfClient;
use crate::config::GraphNaming;
use crate::dsl::GraphRef;
use crate::error::{AclError, Result};
use crate::sanitizer;
use crate::upsert::{Provenance, Triple};

/// Result of one annotation write.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotationOutcome {
    pub graph: String,
    /// The RDF* statement lines written.
    pub statements: Vec<String>,
    pub count: usize,
}

/// Writes RDF* provenance annotations for asserted triples.
pub struct ProvenanceService {
    client: Arc<dyn RdfClient>,
    naming: GraphNaming,
}

impl ProvenanceService {
    pub fn new(client: Arc<dyn RdfClient>, naming: GraphNaming) -> Self {
        Self { client, naming }
    }

    /// Annotate `triples` with `provenance` (and free-form metadata) in
    /// the target graph.
    pub async fn annotate(
        &self,
        graph: &GraphRef,
        triples: &[Triple],
        provenance: &Provenance,
        trace_id: Option<&str>,
        metadata: Option<&BTreeMap<String, Value>>,
    ) -> Result<AnnotationOutcome> {
        if triples.is_empty() {
            return Err(AclError::ConstraintViolation(
                "provenance annotation requires at least one triple".into(),
            ));
        }
        let graph_iri = graph.resolve(&self.naming)?;

        let statements = build_statements(triples, provenance, metadata);
        let sparql = render_insert(&graph_iri, &statements);
        debug!(
            graph = graph_iri.as_str(),
            statements = statements.len(),
            "writing provenance annotations"
        );
        self.client.update(&sparql, None, trace_id).await?;

        let count = statements.len();
        Ok(AnnotationOutcome {
            graph: graph_iri,
            statements,
            count,
        })
    }
}

fn build_statements(
    triples: &[Triple],
    provenance: &Provenance,
    metadata: Option<&BTreeMap<String, Value>>,
) -> Vec<String> {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut statements = Vec::new();

    for triple in triples {
        let fragment = quote_triple(triple);
        statements.push(format!(
            "{fragment} prov:generatedAtTime \"{timestamp}\"^^xsd:dateTime ."
        ));
        if let Some(evidence) = &provenance.evidence {
            let escaped = sanitizer::escape_string(evidence);
            statements.push(format!("{fragment} sf:evidence \"{escaped}\" ."));
        }
        if let Some(confidence) = provenance.confidence {
            let rendered = format_confidence(confidence);
            statements.push(format!(
                "{fragment} sf:confidence \"{rendered}\"^^xsd:decimal ."
            ));
        }
        if let Some(source) = &provenance.source {
            let term = format_possible_iri(source);
            statements.push(format!("{fragment} prov:wasDerivedFrom {term} ."));
        }
        if let Some(extra) = metadata {
            for (key, value) in extra {
                let predicate = format_metadata_predicate(key);
                let object = format_metadata_value(value);
                statements.push(format!("{fragment} {predicate} {object} ."));
            }
        }
    }
    statements
}

fn render_insert(graph_iri: &str, statements: &[String]) -> String {
    let prefixes: BTreeMap<&str, &str> = [
        ("prov", "http://www.w3.org/ns/prov#"),
        ("sf", "http://semanticforge.ai/ontologies/core#"),
        ("xsd", "http://www.w3.org/2001/XMLSchema#"),
    ]
    .into_iter()
    .collect();
    let prefix_block = prefixes
        .iter()
        .map(|(name, iri)| format!("PREFIX {name}: <{iri}>"))
        .collect::<Vec<_>>()
        .join("\n");
    let body = statements.join("\n  ");
    format!(
        "{prefix_block}\nINSERT DATA {{\n  GRAPH <{graph_iri}> {{\n  {body}\n  }}\n}}"
    )
}

/// Quote a triple as an RDF* embedded term.
fn quote_triple(triple: &Triple) -> String {
    format!(
        "<<{} {} {}>>",
        sanitizer::format_iri_value(&triple.s),
        sanitizer::format_iri_value(&triple.p),
        triple.render_object()
    )
}

fn format_possible_iri(value: &str) -> String {
    if sanitizer::looks_like_iri(value) {
        sanitizer::format_iri_value(value).into_inner()
    } else {
        sanitizer::escape_literal(value, None).into_inner()
    }
}

/// Render a confidence score as a plain decimal with trailing zeros
/// trimmed.
fn format_confidence(confidence: f64) -> String {
    let rendered = format!("{confidence:.6}");
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Metadata keys become `sf:` predicates unless already prefixed;
/// non-alphanumeric characters collapse to underscores.
fn format_metadata_predicate(key: &str) -> String {
    if key.contains(':') {
        return key.to_string();
    }
    let safe: String = key
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("sf:{safe}")
}

fn format_metadata_value(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format_possible_iri(s),
        other => sanitizer::escape_literal(&other.to_string(), None).into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::stub::ScriptedClient;
    use serde_json::json;

    fn service(client: Arc<ScriptedClient>) -> ProvenanceService {
        ProvenanceService::new(client, GraphNaming::default())
    }

    fn graph() -> GraphRef {
        GraphRef::named("urn:sf:graph:demo:v1:dev")
    }

    #[tokio::test]
    async fn empty_triple_list_is_rejected() {
        let client = Arc::new(ScriptedClient::new());
        let err = service(client)
            .annotate(&graph(), &[], &Provenance::default(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AclError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn annotations_render_quoted_triples_with_utc_timestamps() {
        let client = Arc::new(ScriptedClient::new());
        let triples = vec![Triple::new("http://e/e1", "rdf:type", "http://e/Class")];
        let provenance = Provenance {
            evidence: Some("manual \"import\"".to_string()),
            confidence: Some(0.95),
            source: Some("http://example.org/source".to_string()),
        };
        let outcome = service(client.clone())
            .annotate(&graph(), &triples, &provenance, Some("t-1"), None)
            .await
            .unwrap();

        assert_eq!(outcome.count, 4);
        assert!(outcome.statements[0]
            .starts_with("<<<http://e/e1> rdf:type <http://e/Class>>> prov:generatedAtTime \""));
        assert!(outcome.statements[0].contains("Z\"^^xsd:dateTime ."));
        assert_eq!(
            outcome.statements[1],
            "<<<http://e/e1> rdf:type <http://e/Class>>> sf:evidence \"manual \\\"import\\\"\" ."
        );
        assert_eq!(
            outcome.statements[2],
            "<<<http://e/e1> rdf:type <http://e/Class>>> sf:confidence \"0.95\"^^xsd:decimal ."
        );
        assert_eq!(
            outcome.statements[3],
            "<<<http://e/e1> rdf:type <http://e/Class>>> prov:wasDerivedFrom <http://example.org/source> ."
        );

        let updates = client.update_texts();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].contains("INSERT DATA {"));
        assert!(updates[0].contains("GRAPH <urn:sf:graph:demo:v1:dev> {"));
        assert!(updates[0].starts_with("PREFIX prov:"));
    }

    #[tokio::test]
    async fn metadata_keys_fold_into_the_sf_namespace() {
        let client = Arc::new(ScriptedClient::new());
        let triples = vec![Triple::new("http://e/e1", "sf:status", "active")];
        let metadata: BTreeMap<String, Value> = [
            ("operator".to_string(), json!("alice")),
            ("batch id".to_string(), json!(7)),
            ("sf:retried".to_string(), json!(false)),
        ]
        .into_iter()
        .collect();
        let outcome = service(client)
            .annotate(
                &graph(),
                &triples,
                &Provenance::default(),
                None,
                Some(&metadata),
            )
            .await
            .unwrap();

        let rendered = outcome.statements.join("\n");
        assert!(rendered.contains("sf:batch_id 7 ."));
        assert!(rendered.contains("sf:operator \"alice\" ."));
        assert!(rendered.contains("sf:retried false ."));
    }

    #[test]
    fn confidence_trims_trailing_zeros() {
        assert_eq!(format_confidence(0.95), "0.95");
        assert_eq!(format_confidence(1.0), "1");
        assert_eq!(format_confidence(0.333333), "0.333333");
        assert_eq!(format_confidence(0.0), "0");
    }
}
