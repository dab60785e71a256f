//! Upsert request modelling and plan generation.
//!
//! The planner is pure: it turns a batch of triples plus a merge strategy
//! and key discipline into an ordered sequence of SPARQL UPDATE statements
//! and a content-addressable request hash. Statements within a plan are
//! independent of each other modulo the group key, so an executor may
//! abort mid-plan with a well-defined partial effect per group.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::GraphNaming;
use crate::dsl::GraphRef;
use crate::error::{AclError, Result};
use crate::sanitizer;

/// One RDF triple with optional language or datatype annotation on the
/// object. `lang` and `dtype` are mutually exclusive and only apply when
/// the object is a literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triple {
    pub s: String,
    pub p: String,
    pub o: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
}

impl Triple {
    pub fn new(s: impl Into<String>, p: impl Into<String>, o: impl Into<String>) -> Self {
        Self {
            s: s.into(),
            p: p.into(),
            o: o.into(),
            lang: None,
            dtype: None,
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    pub fn with_dtype(mut self, dtype: impl Into<String>) -> Self {
        self.dtype = Some(dtype.into());
        self
    }

    /// Render the object position: typed/tagged literal, IRI, or plain
    /// literal by shape.
    pub fn render_object(&self) -> String {
        if let Some(dtype) = &self.dtype {
            return sanitizer::escape_literal(&self.o, Some(dtype)).into_inner();
        }
        if let Some(lang) = &self.lang {
            let escaped = sanitizer::escape_string(&self.o);
            return format!("\"{escaped}\"@{lang}");
        }
        if sanitizer::looks_like_iri(&self.o) {
            return sanitizer::format_iri_value(&self.o).into_inner();
        }
        sanitizer::escape_literal(&self.o, None).into_inner()
    }

    /// Render the whole triple as a SPARQL statement line (with the
    /// trailing period).
    pub fn render(&self) -> String {
        format!(
            "{} {} {} .",
            sanitizer::format_iri_value(&self.s),
            sanitizer::format_iri_value(&self.p),
            self.render_object()
        )
    }

    fn canonical_line(&self) -> String {
        format!(
            "{}\u{1}{}\u{1}{}\u{1}{}\u{1}{}",
            self.s,
            self.p,
            self.o,
            self.lang.as_deref().unwrap_or(""),
            self.dtype.as_deref().unwrap_or("")
        )
    }
}

/// How colliding triples merge into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    Replace,
    Ignore,
    Append,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Replace => "replace",
            MergeStrategy::Ignore => "ignore",
            MergeStrategy::Append => "append",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "replace" => Ok(MergeStrategy::Replace),
            "ignore" => Ok(MergeStrategy::Ignore),
            "append" => Ok(MergeStrategy::Append),
            other => Err(AclError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Key discipline used to group triples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertKey {
    #[serde(rename = "s")]
    Subject,
    #[serde(rename = "s+p")]
    SubjectPredicate,
    #[serde(rename = "custom")]
    Custom,
}

/// Provenance context attached to a write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A batch upsert request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertRequest {
    pub graph: GraphRef,
    pub triples: Vec<Triple>,
    #[serde(default = "default_upsert_key")]
    pub upsert_key: UpsertKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_key_fields: Option<Vec<String>>,
    #[serde(default = "default_merge_strategy")]
    pub merge_strategy: MergeStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

fn default_upsert_key() -> UpsertKey {
    UpsertKey::Subject
}

fn default_merge_strategy() -> MergeStrategy {
    MergeStrategy::Replace
}

/// One executable UPDATE statement of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertStatement {
    pub sparql: String,
    /// Group key label, e.g. `sp::<s>::<p>`.
    pub key: String,
    pub strategy: MergeStrategy,
    pub triples: Vec<Triple>,
    /// True iff the statement may remove prior state (replace).
    pub requires_snapshot: bool,
}

/// The full plan for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertPlan {
    pub graph_iri: String,
    pub statements: Vec<UpsertStatement>,
    pub request_hash: String,
}

/// Positions of a triple bound by the group key. Unbound positions stay
/// variables in the replace DELETE pattern, so prior values are removed
/// regardless of content.
#[derive(Debug, Clone)]
struct GroupKey {
    label: String,
    s: Option<String>,
    p: Option<String>,
    o: Option<Triple>,
}

/// Generates [`UpsertPlan`]s from requests.
#[derive(Debug, Clone, Default)]
pub struct UpsertPlanner {
    naming: GraphNaming,
}

impl UpsertPlanner {
    pub fn new(naming: GraphNaming) -> Self {
        Self { naming }
    }

    /// Build the plan: resolve the graph, group by key, emit one statement
    /// batch per group, and hash the canonical request.
    pub fn plan(&self, request: &UpsertRequest) -> Result<UpsertPlan> {
        if request.triples.is_empty() {
            return Err(AclError::ConstraintViolation(
                "upsert request requires at least one triple".into(),
            ));
        }
        for triple in &request.triples {
            if triple.lang.is_some() && triple.dtype.is_some() {
                return Err(AclError::InvalidLiteral(format!(
                    "triple object cannot carry both lang and dtype: {}",
                    triple.o
                )));
            }
        }

        let graph_iri = request.graph.resolve(&self.naming)?;
        let groups = self.group_triples(request)?;

        let mut statements = Vec::new();
        for (key, triples) in &groups {
            match request.merge_strategy {
                MergeStrategy::Replace => {
                    statements.push(build_replace_statement(&graph_iri, key, triples));
                }
                MergeStrategy::Ignore => {
                    for triple in triples {
                        statements.push(build_ignore_statement(&graph_iri, key, triple));
                    }
                }
                MergeStrategy::Append => {
                    statements.push(build_append_statement(&graph_iri, key, triples));
                }
            }
        }

        let request_hash = compute_request_hash(&graph_iri, request);
        Ok(UpsertPlan {
            graph_iri,
            statements,
            request_hash,
        })
    }

    /// Bucket triples by group key, preserving first-seen order.
    fn group_triples(&self, request: &UpsertRequest) -> Result<Vec<(GroupKey, Vec<Triple>)>> {
        let mut order: Vec<(GroupKey, Vec<Triple>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for triple in &request.triples {
            let key = compose_key(triple, request)?;
            match index.get(&key.label) {
                Some(&i) => order[i].1.push(triple.clone()),
                None => {
                    index.insert(key.label.clone(), order.len());
                    order.push((key, vec![triple.clone()]));
                }
            }
        }
        Ok(order)
    }
}

fn compose_key(triple: &Triple, request: &UpsertRequest) -> Result<GroupKey> {
    match request.upsert_key {
        UpsertKey::Subject => Ok(GroupKey {
            label: format!("s::{}", triple.s),
            s: Some(triple.s.clone()),
            p: None,
            o: None,
        }),
        UpsertKey::SubjectPredicate => Ok(GroupKey {
            label: format!("sp::{}::{}", triple.s, triple.p),
            s: Some(triple.s.clone()),
            p: Some(triple.p.clone()),
            o: None,
        }),
        UpsertKey::Custom => {
            let fields = request
                .custom_key_fields
                .as_deref()
                .unwrap_or_default();
            if fields.is_empty() {
                return Err(AclError::InvalidKey(
                    "custom key discipline requires custom_key_fields".into(),
                ));
            }
            let mut key = GroupKey {
                label: String::new(),
                s: None,
                p: None,
                o: None,
            };
            let mut parts = Vec::new();
            for field in fields {
                match field.as_str() {
                    "s" => {
                        key.s = Some(triple.s.clone());
                        parts.push(format!("s::{}", triple.s));
                    }
                    "p" => {
                        key.p = Some(triple.p.clone());
                        parts.push(format!("p::{}", triple.p));
                    }
                    "o" => {
                        key.o = Some(triple.clone());
                        parts.push(format!("o::{}", triple.o));
                    }
                    other => {
                        return Err(AclError::InvalidKey(format!(
                            "custom key field must be one of s, p, o: {other}"
                        )));
                    }
                }
            }
            key.label = format!("custom[{}]::{}", fields.join(","), parts.join("::"));
            Ok(key)
        }
    }
}

fn render_triple_block(graph_iri: &str, triples: &[Triple]) -> String {
    let lines: Vec<String> = triples
        .iter()
        .map(|t| format!("    {}", t.render()))
        .collect();
    format!("  GRAPH <{graph_iri}> {{\n{}\n  }}\n", lines.join("\n"))
}

fn build_replace_statement(graph_iri: &str, key: &GroupKey, triples: &[Triple]) -> UpsertStatement {
    let mut bound_vars: Vec<&str> = Vec::new();
    let mut bound_vals: Vec<String> = Vec::new();
    if let Some(s) = &key.s {
        bound_vars.push("?__target_s");
        bound_vals.push(sanitizer::format_iri_value(s).into_inner());
    }
    if let Some(p) = &key.p {
        bound_vars.push("?__target_p");
        bound_vals.push(sanitizer::format_iri_value(p).into_inner());
    }
    if let Some(o) = &key.o {
        bound_vars.push("?__target_o");
        bound_vals.push(o.render_object());
    }

    let values_line = if bound_vars.len() == 1 {
        format!("  VALUES {} {{ {} }}", bound_vars[0], bound_vals[0])
    } else {
        format!(
            "  VALUES ({}) {{ ({}) }}",
            bound_vars.join(" "),
            bound_vals.join(" ")
        )
    };

    let key_pattern = "?__target_s ?__target_p ?__target_o .";
    let insert_block = render_triple_block(graph_iri, triples);
    let sparql = format!(
        "DELETE {{\n  GRAPH <{graph_iri}> {{ {key_pattern} }}\n}}\n\
         INSERT {{\n{insert_block}}}\n\
         WHERE {{\n{values_line}\n  OPTIONAL {{ GRAPH <{graph_iri}> {{ {key_pattern} }} }}\n}}\n"
    );

    UpsertStatement {
        sparql,
        key: key.label.clone(),
        strategy: MergeStrategy::Replace,
        triples: triples.to_vec(),
        requires_snapshot: true,
    }
}

fn build_ignore_statement(graph_iri: &str, key: &GroupKey, triple: &Triple) -> UpsertStatement {
    let fragment = triple.render();
    let insert_block = render_triple_block(graph_iri, std::slice::from_ref(triple));
    let sparql = format!(
        "INSERT {{\n{insert_block}}}\n\
         WHERE {{\n  FILTER NOT EXISTS {{ GRAPH <{graph_iri}> {{ {fragment} }} }}\n}}\n"
    );
    UpsertStatement {
        sparql,
        key: key.label.clone(),
        strategy: MergeStrategy::Ignore,
        triples: vec![triple.clone()],
        requires_snapshot: false,
    }
}

fn build_append_statement(graph_iri: &str, key: &GroupKey, triples: &[Triple]) -> UpsertStatement {
    let block = render_triple_block(graph_iri, triples);
    let sparql = format!("INSERT DATA {{\n{block}}}\n");
    UpsertStatement {
        sparql,
        key: key.label.clone(),
        strategy: MergeStrategy::Append,
        triples: triples.to_vec(),
        requires_snapshot: false,
    }
}

/// SHA-256 over the canonical request: graph, strategy, key discipline,
/// and the sorted triple lines. Identical inputs produce identical
/// hashes regardless of triple order.
fn compute_request_hash(graph_iri: &str, request: &UpsertRequest) -> String {
    let mut lines: Vec<String> = request.triples.iter().map(Triple::canonical_line).collect();
    lines.sort();

    let discipline = match request.upsert_key {
        UpsertKey::Subject => "s".to_string(),
        UpsertKey::SubjectPredicate => "s+p".to_string(),
        UpsertKey::Custom => format!(
            "custom[{}]",
            request
                .custom_key_fields
                .as_deref()
                .unwrap_or_default()
                .join(",")
        ),
    };

    let mut hasher = Sha256::new();
    hasher.update(graph_iri.as_bytes());
    hasher.update([0u8]);
    hasher.update(request.merge_strategy.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(discipline.as_bytes());
    hasher.update([0u8]);
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
