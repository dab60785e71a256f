//! Query DSL value types.
//!
//! These are immutable descriptions consumed by the SPARQL builder. The
//! structs deserialize from the external query surface, so field spellings
//! follow that surface (`type`, `group_by`, operator symbols).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GraphNaming;
use crate::error::{AclError, Result};

/// A sanitizer-level term: variable, IRI, compact IRI, or literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Variable(String),
    Iri(String),
    Curie { prefix: String, local: String },
    Literal {
        value: String,
        lang: Option<String>,
        dtype: Option<String>,
    },
}

/// Top-level query shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Entity,
    Relation,
    Event,
    Raw,
}

/// Filter operators supported by the DSL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "range")]
    Range,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "regex")]
    Regex,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "isNull")]
    IsNull,
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::In => "in",
            FilterOp::Range => "range",
            FilterOp::Contains => "contains",
            FilterOp::Regex => "regex",
            FilterOp::Exists => "exists",
            FilterOp::IsNull => "isNull",
        };
        f.write_str(s)
    }
}

/// A filter value. String values are rendered as literals unless the
/// caller passes an angle-bracketed `<iri>` or a declared CURIE. IRI
/// equality is never inferred from the string shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<FilterValue>),
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<Box<FilterValue>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lte: Option<Box<FilterValue>>,
    },
}

impl FilterValue {
    pub fn str(value: impl Into<String>) -> Self {
        FilterValue::String(value.into())
    }
}

/// A single field filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Predicate CURIE/IRI, or a `?variable` in HAVING position.
    pub field: String,
    #[serde(rename = "operator", alias = "op")]
    pub op: FilterOp,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }
}

/// Inclusive time-window bounds applied to the generation timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub gte: Option<DateTime<Utc>>,
    pub lte: Option<DateTime<Utc>>,
}

/// Offset pagination parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Page {
    pub size: usize,
    pub offset: Option<usize>,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            size: 100,
            offset: None,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Explicit sort specification; absent means no ORDER BY is emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub by: String,
    #[serde(default = "SortSpec::default_order")]
    pub order: SortOrder,
}

impl SortSpec {
    fn default_order() -> SortOrder {
        SortOrder::Asc
    }

    pub fn asc(by: impl Into<String>) -> Self {
        Self {
            by: by.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(by: impl Into<String>) -> Self {
        Self {
            by: by.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Aggregate functions supported in the SELECT head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    #[serde(rename = "GROUP_CONCAT")]
    GroupConcat,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::GroupConcat => "GROUP_CONCAT",
        };
        f.write_str(s)
    }
}

/// One aggregation expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub function: AggregateFunction,
    /// Variable being aggregated, e.g. `?s`.
    pub variable: String,
    pub alias: Option<String>,
    #[serde(default)]
    pub distinct: bool,
    /// Only meaningful for `GROUP_CONCAT`.
    pub separator: Option<String>,
}

/// GROUP BY variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupBy {
    pub variables: Vec<String>,
}

/// Reference to a named graph: either a literal IRI or structured parts
/// resolved through the configured naming template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphRef {
    Name {
        name: String,
    },
    Parts {
        model: String,
        version: String,
        env: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scenario_id: Option<String>,
    },
}

impl GraphRef {
    pub fn named(name: impl Into<String>) -> Self {
        GraphRef::Name { name: name.into() }
    }

    /// Resolve to a canonical graph IRI.
    pub fn resolve(&self, naming: &GraphNaming) -> Result<String> {
        match self {
            GraphRef::Name { name } => {
                if name.is_empty() {
                    return Err(AclError::InvalidIri("empty graph name".into()));
                }
                Ok(name.clone())
            }
            GraphRef::Parts {
                model,
                version,
                env,
                scenario_id,
            } => {
                if model.is_empty() || version.is_empty() || env.is_empty() {
                    return Err(AclError::InvalidIri(
                        "graph reference requires model, version and env".into(),
                    ));
                }
                let mut iri = naming
                    .graph_iri_template
                    .replace("{model}", model)
                    .replace("{version}", version)
                    .replace("{env}", env);
                if let Some(scenario) = scenario_id {
                    iri = format!("{iri}:scenario:{scenario}");
                }
                Ok(iri)
            }
        }
    }
}

/// The query DSL root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDsl {
    #[serde(rename = "type")]
    pub query_type: QueryType,
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Predicates to OPTIONAL-expand, each `pred` or `pred as alias`.
    #[serde(default)]
    pub expand: Vec<String>,
    #[serde(default)]
    pub time_window: Option<TimeWindow>,
    /// Participant IRIs bound through `sf:participant`.
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub page: Page,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub prefixes: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub group_by: Option<GroupBy>,
    #[serde(default)]
    pub having: Vec<Filter>,
}

impl QueryDsl {
    pub fn new(query_type: QueryType) -> Self {
        Self {
            query_type,
            filters: Vec::new(),
            expand: Vec::new(),
            time_window: None,
            participants: Vec::new(),
            page: Page::default(),
            sort: None,
            prefixes: None,
            aggregations: Vec::new(),
            group_by: None,
            having: Vec::new(),
        }
    }

    /// Check the aggregation invariants: with aggregations present, every
    /// HAVING field and any sort field must reference an aggregate alias
    /// or a group variable.
    pub fn validate(&self) -> Result<()> {
        if self.aggregations.is_empty() {
            return Ok(());
        }
        let mut allowed: Vec<String> = self
            .aggregations
            .iter()
            .filter_map(|a| a.alias.as_deref().map(normalize_var))
            .collect();
        if let Some(group) = &self.group_by {
            allowed.extend(group.variables.iter().map(|v| normalize_var(v)));
        }
        for filter in &self.having {
            let var = normalize_var(&filter.field);
            if !allowed.contains(&var) {
                return Err(AclError::ConstraintViolation(format!(
                    "HAVING references {var}, which is neither an aggregate alias nor a group variable"
                )));
            }
        }
        if let Some(sort) = &self.sort {
            let var = normalize_var(&sort.by);
            if !allowed.contains(&var) {
                return Err(AclError::ConstraintViolation(format!(
                    "sort field {var} is neither an aggregate alias nor a group variable"
                )));
            }
        }
        for agg in &self.aggregations {
            if agg.separator.is_some() && agg.function != AggregateFunction::GroupConcat {
                return Err(AclError::ConstraintViolation(format!(
                    "separator only applies to GROUP_CONCAT, not {}",
                    agg.function
                )));
            }
        }
        Ok(())
    }
}

/// Ensure a variable name carries its `?` sigil.
pub(crate) fn normalize_var(var: &str) -> String {
    let trimmed = var.trim();
    if let Some(body) = trimmed.strip_prefix('?') {
        format!("?{body}")
    } else {
        format!("?{trimmed}")
    }
}
