//! Graph output formatting: Turtle passthrough, JSON-LD, simplified JSON.
//!
//! CONSTRUCT responses arrive as Turtle. The formatter parses them once
//! and re-projects into the requested shape; the simplified form folds
//! `rdf:type` into a node attribute and `rdfs:label` into label fields
//! instead of emitting class nodes or label edges.

use std::collections::BTreeMap;
use std::str::FromStr;

use rio_api::model::{Literal as RioLiteral, Subject, Term as RioTerm};
use rio_api::parser::TriplesParser;
use rio_turtle::{TurtleError, TurtleParser};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{AclError, Result};

pub(crate) const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub(crate) const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";

/// Output format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Turtle,
    JsonLd,
    SimplifiedJson,
}

impl FromStr for GraphFormat {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "turtle" => Ok(GraphFormat::Turtle),
            "json-ld" => Ok(GraphFormat::JsonLd),
            "simplified-json" => Ok(GraphFormat::SimplifiedJson),
            other => Err(AclError::UnknownAlgorithm(format!(
                "unsupported graph format: {other}"
            ))),
        }
    }
}

/// A formatted graph payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FormattedGraph {
    Turtle(String),
    JsonLd(Value),
    Simplified(SimplifiedGraph),
}

/// One literal property value in the simplified form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyValue {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// One node in the simplified form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimplifiedNode {
    pub id: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Vec<PropertyValue>>,
}

impl SimplifiedNode {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            node_type: None,
            label: None,
            labels: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }
}

/// One IRI-to-IRI edge in the simplified form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimplifiedEdge {
    pub source: String,
    pub target: String,
    pub predicate: String,
}

/// Node/edge counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
}

/// The simplified node/edge projection of a graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimplifiedGraph {
    pub nodes: Vec<SimplifiedNode>,
    pub edges: Vec<SimplifiedEdge>,
    pub stats: GraphStats,
}

/// A triple parsed out of a Turtle document.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedTriple {
    pub subject: String,
    pub predicate: String,
    pub object: ParsedObject,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParsedObject {
    Iri(String),
    Blank(String),
    Literal {
        value: String,
        lang: Option<String>,
        dtype: Option<String>,
    },
}

impl ParsedObject {
    pub(crate) fn node_id(&self) -> Option<&str> {
        match self {
            ParsedObject::Iri(iri) => Some(iri),
            ParsedObject::Blank(id) => Some(id),
            ParsedObject::Literal { .. } => None,
        }
    }
}

/// Parse a Turtle document into triples. RDF* quoted-triple positions are
/// skipped; the simplified projections have no representation for them.
pub(crate) fn parse_turtle(turtle: &str) -> Result<Vec<ParsedTriple>> {
    let mut triples = Vec::new();
    let mut parser = TurtleParser::new(turtle.as_bytes(), None);
    let outcome: std::result::Result<(), TurtleError> = parser.parse_all(&mut |t| {
        let subject = match t.subject {
            Subject::NamedNode(n) => n.iri.to_string(),
            Subject::BlankNode(b) => format!("_:{}", b.id),
            Subject::Triple(_) => return Ok(()),
        };
        let object = match t.object {
            RioTerm::NamedNode(n) => ParsedObject::Iri(n.iri.to_string()),
            RioTerm::BlankNode(b) => ParsedObject::Blank(format!("_:{}", b.id)),
            RioTerm::Literal(literal) => match literal {
                RioLiteral::Simple { value } => ParsedObject::Literal {
                    value: value.to_string(),
                    lang: None,
                    dtype: None,
                },
                RioLiteral::LanguageTaggedString { value, language } => ParsedObject::Literal {
                    value: value.to_string(),
                    lang: Some(language.to_string()),
                    dtype: None,
                },
                RioLiteral::Typed { value, datatype } => ParsedObject::Literal {
                    value: value.to_string(),
                    lang: None,
                    dtype: Some(datatype.iri.to_string()),
                },
            },
            RioTerm::Triple(_) => return Ok(()),
        };
        triples.push(ParsedTriple {
            subject,
            predicate: t.predicate.iri.to_string(),
            object,
        });
        Ok(())
    });
    outcome.map_err(|e| AclError::FusekiQuery {
        status: 502,
        message: format!("unparseable Turtle response: {e}"),
        trace_id: None,
    })?;
    Ok(triples)
}

/// Formats Turtle graph payloads into the requested output shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphFormatter;

impl GraphFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Format a Turtle document. `context` is only consulted for JSON-LD,
    /// where it is injected as `@context`.
    pub fn format_graph(
        &self,
        turtle: &str,
        format: GraphFormat,
        context: Option<Value>,
    ) -> Result<FormattedGraph> {
        match format {
            GraphFormat::Turtle => Ok(FormattedGraph::Turtle(turtle.to_string())),
            GraphFormat::JsonLd => {
                let triples = parse_turtle(turtle)?;
                Ok(FormattedGraph::JsonLd(build_jsonld(&triples, context)))
            }
            GraphFormat::SimplifiedJson => {
                let triples = parse_turtle(turtle)?;
                Ok(FormattedGraph::Simplified(build_simplified(&triples)))
            }
        }
    }

    /// Turtle identity passthrough.
    pub fn to_turtle(&self, turtle: &str) -> String {
        turtle.to_string()
    }
}

fn build_jsonld(triples: &[ParsedTriple], context: Option<Value>) -> Value {
    let mut nodes: BTreeMap<String, Map<String, Value>> = BTreeMap::new();

    for triple in triples {
        let node = nodes.entry(triple.subject.clone()).or_insert_with(|| {
            let mut map = Map::new();
            map.insert("@id".to_string(), Value::String(triple.subject.clone()));
            map
        });

        if triple.predicate == RDF_TYPE {
            if let Some(type_iri) = triple.object.node_id() {
                let types = node
                    .entry("@type".to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = types {
                    items.push(Value::String(type_iri.to_string()));
                }
            }
            continue;
        }

        let value_object = match &triple.object {
            ParsedObject::Iri(iri) => json!({ "@id": iri }),
            ParsedObject::Blank(id) => json!({ "@id": id }),
            ParsedObject::Literal { value, lang, dtype } => {
                let mut obj = Map::new();
                obj.insert("@value".to_string(), Value::String(value.clone()));
                if let Some(lang) = lang {
                    obj.insert("@language".to_string(), Value::String(lang.clone()));
                }
                if let Some(dtype) = dtype {
                    obj.insert("@type".to_string(), Value::String(dtype.clone()));
                }
                Value::Object(obj)
            }
        };
        let values = node
            .entry(triple.predicate.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = values {
            items.push(value_object);
        }
    }

    let graph: Vec<Value> = nodes.into_values().map(Value::Object).collect();
    let mut document = Map::new();
    if let Some(context) = context {
        document.insert("@context".to_string(), context);
    }
    document.insert("@graph".to_string(), Value::Array(graph));
    Value::Object(document)
}

fn build_simplified(triples: &[ParsedTriple]) -> SimplifiedGraph {
    let mut nodes: BTreeMap<String, SimplifiedNode> = BTreeMap::new();
    let mut edges: Vec<SimplifiedEdge> = Vec::new();

    for triple in triples {
        let subject = triple.subject.clone();
        nodes
            .entry(subject.clone())
            .or_insert_with(|| SimplifiedNode::new(&subject));

        // rdf:type becomes a node attribute: no edge, no class node.
        if triple.predicate == RDF_TYPE {
            if let Some(type_iri) = triple.object.node_id() {
                let node = nodes.get_mut(&subject).expect("node just inserted");
                if node.node_type.is_none() {
                    node.node_type = Some(type_iri.to_string());
                }
            }
            continue;
        }

        match &triple.object {
            ParsedObject::Literal { value, lang, dtype } => {
                let node = nodes.get_mut(&subject).expect("node just inserted");
                if triple.predicate == RDFS_LABEL {
                    if node.label.is_none() {
                        node.label = Some(value.clone());
                    }
                    if let Some(lang) = lang {
                        node.labels.insert(lang.clone(), value.clone());
                    }
                } else {
                    node.properties
                        .entry(triple.predicate.clone())
                        .or_default()
                        .push(PropertyValue {
                            value: value.clone(),
                            datatype: dtype.clone(),
                            language: lang.clone(),
                        });
                }
            }
            ParsedObject::Iri(target) | ParsedObject::Blank(target) => {
                nodes
                    .entry(target.clone())
                    .or_insert_with(|| SimplifiedNode::new(target));
                edges.push(SimplifiedEdge {
                    source: subject,
                    target: target.clone(),
                    predicate: triple.predicate.clone(),
                });
            }
        }
    }

    let stats = GraphStats {
        node_count: nodes.len(),
        edge_count: edges.len(),
    };
    SimplifiedGraph {
        nodes: nodes.into_values().collect(),
        edges,
        stats,
    }
}
