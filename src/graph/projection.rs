//! Graph projection: CONSTRUCT a bounded subgraph and reshape it into
//! node/edge lists.
//!
//! Profiles bound what a caller may project; a runtime limit override must
//! stay strictly below the profile bound. The literal filter is applied
//! both in the query and again on the parsed response, since a store is
//! not guaranteed to honour it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::builder::SparqlQueryBuilder;
use crate::client::RdfClient;
use crate::config::{GraphNaming, ProjectionProfile};
use crate::dsl::{GraphRef, QueryDsl};
use crate::error::{AclError, Result};
use crate::formatter::{self, ParsedObject, RDF_TYPE};
use crate::sanitizer;

/// What to project from: a named graph or an arbitrary DSL query.
#[derive(Debug, Clone)]
pub enum ProjectionSource {
    Graph(GraphRef),
    Dsl(Box<QueryDsl>),
}

/// Runtime overrides applied on top of a profile.
#[derive(Debug, Clone, Default)]
pub struct ProjectionOverride {
    pub limit: Option<usize>,
    pub include_literals: Option<bool>,
    pub directed: Option<bool>,
    pub edge_predicates: Option<Vec<String>>,
}

/// One projected node. The type comes from any `rdf:type` triple
/// encountered; class IRIs never become nodes themselves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionNode {
    pub id: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
}

/// One projected edge. Literal-valued edges only appear when the profile
/// admits literals; their `target` is the lexical value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionEdge {
    pub source: String,
    pub target: String,
    pub predicate: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub literal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionStats {
    pub node_count: usize,
    pub edge_count: usize,
}

/// Full projection payload.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectionResult {
    pub nodes: Vec<ProjectionNode>,
    pub edges: Vec<ProjectionEdge>,
    pub stats: ProjectionStats,
    pub profile: String,
    pub directed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_iri: Option<String>,
}

/// Projects bounded subgraphs through CONSTRUCT queries.
pub struct GraphProjectionBuilder {
    client: Arc<dyn RdfClient>,
    builder: SparqlQueryBuilder,
    naming: GraphNaming,
    profiles: HashMap<String, ProjectionProfile>,
}

impl GraphProjectionBuilder {
    pub fn new(
        client: Arc<dyn RdfClient>,
        naming: GraphNaming,
        profiles: HashMap<String, ProjectionProfile>,
    ) -> Self {
        Self {
            client,
            builder: SparqlQueryBuilder::new(),
            naming,
            profiles,
        }
    }

    /// Project `source` under the named profile.
    pub async fn project(
        &self,
        source: &ProjectionSource,
        profile_name: &str,
        overrides: Option<&ProjectionOverride>,
        trace_id: Option<&str>,
    ) -> Result<ProjectionResult> {
        let profile = self.merge_profile(profile_name, overrides)?;

        let (query, graph_iri) = match source {
            ProjectionSource::Graph(graph) => {
                let graph_iri = graph.resolve(&self.naming)?;
                let query = self.build_graph_query(&graph_iri, &profile)?;
                (query, Some(graph_iri))
            }
            ProjectionSource::Dsl(dsl) => (self.builder.build_construct(dsl, None)?, None),
        };

        debug!(profile = profile_name, "projecting graph");
        let response = self.client.construct(&query, None, trace_id).await?;
        let triples = formatter::parse_turtle(&response.turtle)?;

        let mut nodes: BTreeMap<String, Option<String>> = BTreeMap::new();
        let mut edges: Vec<ProjectionEdge> = Vec::new();

        for triple in &triples {
            nodes.entry(triple.subject.clone()).or_insert(None);

            // rdf:type becomes the node's type; no edge, no class node.
            if triple.predicate == RDF_TYPE {
                if let Some(type_iri) = triple.object.node_id() {
                    let slot = nodes.get_mut(&triple.subject).expect("node just inserted");
                    if slot.is_none() {
                        *slot = Some(type_iri.to_string());
                    }
                }
                continue;
            }

            match &triple.object {
                ParsedObject::Literal { value, .. } => {
                    // Defensive re-filter: the store may ignore the
                    // isLiteral filter in the query.
                    if profile.include_literals {
                        edges.push(ProjectionEdge {
                            source: triple.subject.clone(),
                            target: value.clone(),
                            predicate: triple.predicate.clone(),
                            literal: true,
                        });
                    }
                }
                ParsedObject::Iri(target) | ParsedObject::Blank(target) => {
                    nodes.entry(target.clone()).or_insert(None);
                    edges.push(ProjectionEdge {
                        source: triple.subject.clone(),
                        target: target.clone(),
                        predicate: triple.predicate.clone(),
                        literal: false,
                    });
                }
            }
        }

        let stats = ProjectionStats {
            node_count: nodes.len(),
            edge_count: edges.len(),
        };
        Ok(ProjectionResult {
            nodes: nodes
                .into_iter()
                .map(|(id, node_type)| ProjectionNode { id, node_type })
                .collect(),
            edges,
            stats,
            profile: profile_name.to_string(),
            directed: profile.directed,
            graph_iri,
        })
    }

    fn merge_profile(
        &self,
        profile_name: &str,
        overrides: Option<&ProjectionOverride>,
    ) -> Result<ProjectionProfile> {
        let mut profile = self
            .profiles
            .get(profile_name)
            .cloned()
            .ok_or_else(|| {
                AclError::InvalidConfig(format!("unknown projection profile: {profile_name}"))
            })?;

        if let Some(overrides) = overrides {
            if let Some(limit) = overrides.limit {
                if limit >= profile.limit {
                    return Err(AclError::LimitExceedsProfile {
                        requested: limit,
                        profile_limit: profile.limit,
                    });
                }
                profile.limit = limit;
            }
            if let Some(include_literals) = overrides.include_literals {
                profile.include_literals = include_literals;
            }
            if let Some(directed) = overrides.directed {
                profile.directed = directed;
            }
            if let Some(edge_predicates) = &overrides.edge_predicates {
                profile.edge_predicates = edge_predicates.clone();
            }
        }
        Ok(profile)
    }

    fn build_graph_query(&self, graph_iri: &str, profile: &ProjectionProfile) -> Result<String> {
        let mut body_lines = vec!["?s ?p ?o .".to_string()];
        if !profile.edge_predicates.is_empty() {
            let rendered: Vec<String> = profile
                .edge_predicates
                .iter()
                .map(|p| sanitizer::format_iri_value(p).into_inner())
                .collect();
            body_lines.push(format!("FILTER(?p IN ({}))", rendered.join(", ")));
        }
        if !profile.include_literals {
            body_lines.push("FILTER(isIRI(?o))".to_string());
        }

        let mut lines = vec![
            self.builder.prefix_block(),
            "CONSTRUCT { ?s ?p ?o }".to_string(),
            "WHERE {".to_string(),
            format!("  GRAPH <{graph_iri}> {{"),
        ];
        for body_line in &body_lines {
            lines.push(format!("    {body_line}"));
        }
        lines.push("  }".to_string());
        lines.push("}".to_string());
        lines.push(format!("LIMIT {}", profile.limit.max(1)));
        Ok(lines.join("\n"))
    }
}
