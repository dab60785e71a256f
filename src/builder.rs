//! DSL → SPARQL compilation.
//!
//! The builder is pure: identical DSL input produces byte-identical SPARQL
//! (prefixes render from a `BTreeMap`, everything else follows declaration
//! order). All interpolation routes through the sanitizer.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::dsl::{
    normalize_var, Aggregation, AggregateFunction, Filter, FilterOp, FilterValue, QueryDsl,
    QueryType, SortOrder, TimeWindow,
};
use crate::error::{AclError, Result};
use crate::pagination::{self, CursorPage};
use crate::sanitizer;

const TIME_PREDICATE: &str = "prov:generatedAtTime";
const PARTICIPANT_PREDICATE: &str = "sf:participant";

/// Compiles [`QueryDsl`] descriptions into SELECT / CONSTRUCT queries.
#[derive(Debug, Clone)]
pub struct SparqlQueryBuilder {
    default_prefixes: BTreeMap<String, String>,
}

impl Default for SparqlQueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SparqlQueryBuilder {
    /// Builder with the built-in prefix set (`rdf`, `rdfs`, `xsd`, `prov`,
    /// `sf`).
    pub fn new() -> Self {
        let mut prefixes = BTreeMap::new();
        prefixes.insert(
            "rdf".to_string(),
            "http://www.w3.org/1999/02/22-rdf-syntax-ns#".to_string(),
        );
        prefixes.insert(
            "rdfs".to_string(),
            "http://www.w3.org/2000/01/rdf-schema#".to_string(),
        );
        prefixes.insert(
            "xsd".to_string(),
            "http://www.w3.org/2001/XMLSchema#".to_string(),
        );
        prefixes.insert(
            "prov".to_string(),
            "http://www.w3.org/ns/prov#".to_string(),
        );
        prefixes.insert(
            "sf".to_string(),
            "http://semanticforge.ai/ontologies/core#".to_string(),
        );
        Self {
            default_prefixes: prefixes,
        }
    }

    /// Builder with additional default prefixes on top of the built-ins.
    pub fn with_prefixes<I>(extra: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut builder = Self::new();
        for (name, iri) in extra {
            if !sanitizer::validate_prefix(&name) {
                return Err(AclError::InvalidPrefix(name));
            }
            sanitizer::escape_iri(&iri)?;
            builder.default_prefixes.insert(name, iri);
        }
        Ok(builder)
    }

    /// Rendered PREFIX block for the builder's default prefixes.
    pub fn prefix_block(&self) -> String {
        render_prefix_block(&self.default_prefixes)
    }

    /// Build a SELECT query for the DSL, optionally scoped to a graph.
    pub fn build_select(&self, dsl: &QueryDsl, graph: Option<&str>) -> Result<String> {
        self.build_query(dsl, graph, false)
    }

    /// Build a CONSTRUCT query projecting `?s ?p ?o`.
    pub fn build_construct(&self, dsl: &QueryDsl, graph: Option<&str>) -> Result<String> {
        self.build_query(dsl, graph, true)
    }

    /// Build the cursor-paginated SELECT used by keyset pagination. Emits
    /// `SELECT DISTINCT {sort_key}`, the cursor FILTER when a cursor is
    /// present, `ORDER BY {sort_key}`, and `LIMIT size+1`; the extra row
    /// is the has-more probe, discarded by the caller.
    pub fn build_select_with_cursor(
        &self,
        dsl: &QueryDsl,
        cursor_page: &CursorPage,
        sort_key: Option<&str>,
        graph: Option<&str>,
    ) -> Result<String> {
        dsl.validate()?;
        let sort_key = normalize_var(sort_key.unwrap_or("?s"));
        let prefixes = self.merge_prefixes(dsl)?;
        let mut where_lines = self.collect_where(dsl, &prefixes)?;

        if let Some(cursor) = &cursor_page.cursor {
            let data = pagination::decode_cursor(cursor)?;
            where_lines.push(pagination::cursor_filter(&data, &sort_key));
        }

        let body = wrap_graph(&where_lines, graph);
        let header = render_prefix_block(&prefixes);
        let limit = cursor_page.size.max(1) + 1;

        let parts = vec![
            header,
            format!("SELECT DISTINCT {sort_key}"),
            "WHERE {".to_string(),
            body,
            "}".to_string(),
            format!("ORDER BY {sort_key}"),
            format!("LIMIT {limit}"),
        ];
        Ok(join_parts(parts))
    }

    fn build_query(&self, dsl: &QueryDsl, graph: Option<&str>, construct: bool) -> Result<String> {
        dsl.validate()?;
        let prefixes = self.merge_prefixes(dsl)?;
        let where_lines = self.collect_where(dsl, &prefixes)?;
        let body = wrap_graph(&where_lines, graph);
        let header = render_prefix_block(&prefixes);

        let head = if construct {
            "CONSTRUCT {\n  ?s ?p ?o .\n}".to_string()
        } else if dsl.aggregations.is_empty() {
            "SELECT *".to_string()
        } else {
            let mut exprs: Vec<String> = dsl
                .aggregations
                .iter()
                .map(render_aggregation)
                .collect::<Result<_>>()?;
            if let Some(group) = &dsl.group_by {
                exprs.extend(group.variables.iter().map(|v| normalize_var(v)));
            }
            format!("SELECT {}", exprs.join(" "))
        };

        let mut parts = vec![header, head, "WHERE {".to_string(), body, "}".to_string()];

        if !construct {
            if let Some(group) = &dsl.group_by {
                if !group.variables.is_empty() {
                    let vars: Vec<String> =
                        group.variables.iter().map(|v| normalize_var(v)).collect();
                    parts.push(format!("GROUP BY {}", vars.join(" ")));
                }
            }
            if !dsl.having.is_empty() {
                parts.push(self.render_having(&dsl.having, &prefixes)?);
            }
        }

        // ORDER BY is only ever explicit; an implicit sort key would be an
        // invalid group reference under aggregation.
        if let Some(sort) = &dsl.sort {
            let field = normalize_var(&sort.by);
            let func = match sort.order {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
            };
            if dsl.aggregations.is_empty() && field != "?s" {
                parts.push(format!("ORDER BY {func}({field}) ?s"));
            } else {
                parts.push(format!("ORDER BY {func}({field})"));
            }
        }

        parts.push(format!("LIMIT {}", dsl.page.size.max(1)));
        if let Some(offset) = dsl.page.offset {
            if offset > 0 {
                parts.push(format!("OFFSET {offset}"));
            }
        }

        Ok(join_parts(parts))
    }

    /// Assemble the WHERE body lines: base pattern, filters, expansions,
    /// participants, time window, in that order.
    fn collect_where(
        &self,
        dsl: &QueryDsl,
        prefixes: &BTreeMap<String, String>,
    ) -> Result<Vec<String>> {
        let mut lines = vec!["?s ?p ?o .".to_string()];
        if dsl.query_type == QueryType::Relation {
            lines.push("FILTER(isIRI(?o))".to_string());
        }

        let mut fallback_index = 0usize;
        for filter in &dsl.filters {
            let var = filter_var(&filter.field, &mut fallback_index);
            let (triples, conditions) = self.render_filter(filter, &var, prefixes)?;
            lines.extend(triples);
            lines.extend(conditions);
        }

        let mut expand_index = 0usize;
        for item in &dsl.expand {
            let (predicate, alias) = parse_expand_item(item);
            let predicate = expand_predicate(&predicate, prefixes)?;
            let var = match alias {
                Some(alias) => alias,
                None => {
                    let var = format!("?e{expand_index}");
                    expand_index += 1;
                    var
                }
            };
            lines.push(format!("OPTIONAL {{ ?s {predicate} {var} . }}"));
        }

        if !dsl.participants.is_empty() {
            let predicate = expand_predicate(PARTICIPANT_PREDICATE, prefixes)?;
            for (index, participant) in dsl.participants.iter().enumerate() {
                let var = format!("?participant{index}");
                let iri = format_identifier(participant, prefixes)?;
                lines.push(format!("?s {predicate} {var} ."));
                lines.push(format!("FILTER({var} = {iri})"));
            }
        }

        if let Some(window) = &dsl.time_window {
            if window.gte.is_some() || window.lte.is_some() {
                let predicate = expand_predicate(TIME_PREDICATE, prefixes)?;
                lines.push(format!("OPTIONAL {{ ?s {predicate} ?__time . }}"));
                lines.push(render_time_filter(window));
            }
        }

        Ok(lines)
    }

    fn render_filter(
        &self,
        filter: &Filter,
        var: &str,
        prefixes: &BTreeMap<String, String>,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let predicate = expand_predicate(&filter.field, prefixes)?;

        if matches!(filter.op, FilterOp::Exists | FilterOp::IsNull) {
            let triples = vec![format!("OPTIONAL {{ ?s {predicate} {var} . }}")];
            let condition = if filter.op == FilterOp::Exists {
                format!("FILTER(BOUND({var}))")
            } else {
                format!("FILTER(!BOUND({var}))")
            };
            return Ok((triples, vec![condition]));
        }

        let triples = vec![format!("?s {predicate} {var} .")];
        let condition = match filter.op {
            FilterOp::Eq | FilterOp::Ne | FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => {
                let value = format_value(&filter.value, prefixes)?;
                format!("FILTER({var} {} {value})", comparison_symbol(filter.op))
            }
            FilterOp::In => {
                let values = in_list(&filter.value, prefixes)?;
                format!("FILTER({var} IN ({values}))")
            }
            FilterOp::Range => {
                let (gte, lte) = range_bounds(&filter.value)?;
                let mut clauses = Vec::new();
                if let Some(lower) = gte {
                    clauses.push(format!("{var} >= {}", format_value(&lower, prefixes)?));
                }
                if let Some(upper) = lte {
                    clauses.push(format!("{var} <= {}", format_value(&upper, prefixes)?));
                }
                if clauses.is_empty() {
                    return Err(AclError::InvalidLiteral(
                        "range filter requires at least one bound".into(),
                    ));
                }
                format!("FILTER({})", clauses.join(" && "))
            }
            FilterOp::Contains => {
                let needle = sanitizer::escape_string(&string_value(&filter.value)?);
                format!("FILTER(CONTAINS(STR({var}), \"{needle}\"))")
            }
            FilterOp::Regex => {
                let pattern = sanitizer::escape_string(&string_value(&filter.value)?);
                format!("FILTER(REGEX(STR({var}), \"{pattern}\"))")
            }
            FilterOp::Exists | FilterOp::IsNull => unreachable!("handled above"),
        };
        Ok((triples, vec![condition]))
    }

    fn render_having(
        &self,
        having: &[Filter],
        prefixes: &BTreeMap<String, String>,
    ) -> Result<String> {
        let mut conditions = Vec::new();
        for filter in having {
            let var = normalize_var(&filter.field);
            let condition = match filter.op {
                FilterOp::Eq
                | FilterOp::Ne
                | FilterOp::Lt
                | FilterOp::Le
                | FilterOp::Gt
                | FilterOp::Ge => {
                    let value = format_value(&filter.value, prefixes)?;
                    format!("{var} {} {value}", comparison_symbol(filter.op))
                }
                FilterOp::In => {
                    let values = in_list(&filter.value, prefixes)?;
                    format!("{var} IN ({values})")
                }
                FilterOp::Range => {
                    let (gte, lte) = range_bounds(&filter.value)?;
                    let mut clauses = Vec::new();
                    if let Some(lower) = gte {
                        clauses.push(format!("{var} >= {}", format_value(&lower, prefixes)?));
                    }
                    if let Some(upper) = lte {
                        clauses.push(format!("{var} <= {}", format_value(&upper, prefixes)?));
                    }
                    clauses.join(" && ")
                }
                FilterOp::Contains => {
                    let needle = sanitizer::escape_string(&string_value(&filter.value)?);
                    format!("CONTAINS(STR({var}), \"{needle}\")")
                }
                FilterOp::Regex => {
                    let pattern = sanitizer::escape_string(&string_value(&filter.value)?);
                    format!("REGEX(STR({var}), \"{pattern}\")")
                }
                FilterOp::Exists => format!("BOUND({var})"),
                FilterOp::IsNull => format!("!BOUND({var})"),
            };
            conditions.push(condition);
        }
        Ok(format!("HAVING({})", conditions.join(" && ")))
    }

    fn merge_prefixes(&self, dsl: &QueryDsl) -> Result<BTreeMap<String, String>> {
        let mut prefixes = self.default_prefixes.clone();
        if let Some(custom) = &dsl.prefixes {
            for (name, iri) in custom {
                if !sanitizer::validate_prefix(name) {
                    return Err(AclError::InvalidPrefix(name.clone()));
                }
                sanitizer::escape_iri(iri)?;
                if let Some(existing) = prefixes.get(name) {
                    if existing != iri {
                        return Err(AclError::InvalidPrefix(format!(
                            "prefix {name} already declared as <{existing}>"
                        )));
                    }
                }
                prefixes.insert(name.clone(), iri.clone());
            }
        }
        Ok(prefixes)
    }
}

fn comparison_symbol(op: FilterOp) -> &'static str {
    match op {
        FilterOp::Eq => "=",
        FilterOp::Ne => "!=",
        FilterOp::Lt => "<",
        FilterOp::Le => "<=",
        FilterOp::Gt => ">",
        FilterOp::Ge => ">=",
        _ => unreachable!("not a comparison operator"),
    }
}

/// Variable name for a filter: derived from a CURIE field
/// (`rdfs:label` → `?rdfs_label`), otherwise a positional `?f{n}`.
fn filter_var(field: &str, fallback_index: &mut usize) -> String {
    if sanitizer::is_curie(field) {
        let body: String = field
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        format!("?{body}")
    } else {
        let var = format!("?f{fallback_index}");
        *fallback_index += 1;
        var
    }
}

/// Render a predicate position: a declared CURIE stays compact, an
/// absolute IRI is validated and bracketed.
fn expand_predicate(term: &str, prefixes: &BTreeMap<String, String>) -> Result<String> {
    if sanitizer::is_curie(term) {
        let prefix = term.split(':').next().unwrap_or_default();
        if !prefixes.contains_key(prefix) {
            return Err(AclError::InvalidPrefix(format!("undeclared prefix: {prefix}")));
        }
        return Ok(term.to_string());
    }
    if term.starts_with("http://") || term.starts_with("https://") {
        let validated = sanitizer::escape_iri(term)?;
        return Ok(format!("<{validated}>"));
    }
    Err(AclError::InvalidIri(format!("not a predicate: {term}")))
}

/// Render a value that must denote an IRI (participants): accepts
/// `<iri>`, bare `http(s)` IRIs, and declared CURIEs.
fn format_identifier(value: &str, prefixes: &BTreeMap<String, String>) -> Result<String> {
    if let Some(inner) = value.strip_prefix('<').and_then(|v| v.strip_suffix('>')) {
        sanitizer::escape_iri(inner)?;
        return Ok(value.to_string());
    }
    if value.starts_with("http://") || value.starts_with("https://") {
        let validated = sanitizer::escape_iri(value)?;
        return Ok(format!("<{validated}>"));
    }
    if sanitizer::is_curie(value) {
        let prefix = value.split(':').next().unwrap_or_default();
        if !prefixes.contains_key(prefix) {
            return Err(AclError::InvalidPrefix(format!("undeclared prefix: {prefix}")));
        }
        return Ok(value.to_string());
    }
    Err(AclError::InvalidIri(format!("not an identifier: {value}")))
}

/// Render a scalar filter value. Strings are literals unless explicitly
/// angle-bracketed or a declared CURIE; IRI equality is never inferred.
fn format_value(value: &FilterValue, prefixes: &BTreeMap<String, String>) -> Result<String> {
    match value {
        FilterValue::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
        FilterValue::Int(i) => Ok(i.to_string()),
        FilterValue::Float(f) => {
            if !f.is_finite() {
                return Err(AclError::InvalidLiteral(
                    "non-finite float in filter value".into(),
                ));
            }
            Ok(f.to_string())
        }
        FilterValue::String(s) => {
            if let Some(inner) = s.strip_prefix('<').and_then(|v| v.strip_suffix('>')) {
                sanitizer::escape_iri(inner)?;
                return Ok(s.clone());
            }
            if sanitizer::is_curie(s) {
                let prefix = s.split(':').next().unwrap_or_default();
                if !prefixes.contains_key(prefix) {
                    return Err(AclError::InvalidPrefix(format!(
                        "undeclared prefix: {prefix}"
                    )));
                }
                return Ok(s.clone());
            }
            Ok(sanitizer::escape_literal(s, None).into_inner())
        }
        FilterValue::List(_) => Err(AclError::InvalidLiteral(
            "list value only valid with the `in` operator".into(),
        )),
        FilterValue::Range { .. } => Err(AclError::InvalidLiteral(
            "range value only valid with the `range` operator".into(),
        )),
    }
}

fn in_list(value: &FilterValue, prefixes: &BTreeMap<String, String>) -> Result<String> {
    let items = match value {
        FilterValue::List(items) => items.clone(),
        scalar => vec![scalar.clone()],
    };
    let rendered: Vec<String> = items
        .iter()
        .map(|item| format_value(item, prefixes))
        .collect::<Result<_>>()?;
    Ok(rendered.join(", "))
}

fn range_bounds(value: &FilterValue) -> Result<(Option<FilterValue>, Option<FilterValue>)> {
    match value {
        FilterValue::Range { gte, lte } => Ok((
            gte.as_deref().cloned(),
            lte.as_deref().cloned(),
        )),
        FilterValue::List(items) if items.len() == 2 => {
            Ok((Some(items[0].clone()), Some(items[1].clone())))
        }
        _ => Err(AclError::InvalidLiteral(
            "range filter expects {gte, lte} or a two-element list".into(),
        )),
    }
}

fn string_value(value: &FilterValue) -> Result<String> {
    match value {
        FilterValue::String(s) => Ok(s.clone()),
        FilterValue::Int(i) => Ok(i.to_string()),
        FilterValue::Float(f) => Ok(f.to_string()),
        FilterValue::Bool(b) => Ok(b.to_string()),
        _ => Err(AclError::InvalidLiteral(
            "expected a scalar string value".into(),
        )),
    }
}

fn render_time_filter(window: &TimeWindow) -> String {
    let mut clauses = Vec::new();
    if let Some(gte) = &window.gte {
        clauses.push(format!("?__time >= {}", datetime_literal(gte)));
    }
    if let Some(lte) = &window.lte {
        clauses.push(format!("?__time <= {}", datetime_literal(lte)));
    }
    format!("FILTER({})", clauses.join(" && "))
}

fn datetime_literal(value: &DateTime<Utc>) -> String {
    let iso = value.to_rfc3339_opts(SecondsFormat::Secs, true);
    format!("\"{iso}\"^^xsd:dateTime")
}

fn render_prefix_block(prefixes: &BTreeMap<String, String>) -> String {
    prefixes
        .iter()
        .map(|(name, iri)| format!("PREFIX {name}: <{iri}>"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn wrap_graph(lines: &[String], graph: Option<&str>) -> String {
    let body = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n  ");
    match graph {
        Some(graph) => format!("  GRAPH <{graph}> {{\n  {body}\n  }}"),
        None => format!("  {body}"),
    }
}

fn join_parts(parts: Vec<String>) -> String {
    parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_expand_item(item: &str) -> (String, Option<String>) {
    if let Some((predicate, alias)) = item.split_once(" as ") {
        let alias = alias.trim();
        let alias = if alias.starts_with('?') {
            alias.to_string()
        } else {
            format!("?{alias}")
        };
        (predicate.trim().to_string(), Some(alias))
    } else {
        (item.trim().to_string(), None)
    }
}

fn render_aggregation(agg: &Aggregation) -> Result<String> {
    let var = normalize_var(&agg.variable);
    let distinct = if agg.distinct { "DISTINCT " } else { "" };
    let expr = if agg.function == AggregateFunction::GroupConcat {
        match &agg.separator {
            Some(separator) => {
                let sep = sanitizer::escape_literal(separator, None);
                format!("GROUP_CONCAT({distinct}{var}; SEPARATOR={sep})")
            }
            None => format!("GROUP_CONCAT({distinct}{var})"),
        }
    } else {
        format!("{}({distinct}{var})", agg.function)
    };
    match &agg.alias {
        Some(alias) => Ok(format!("({expr} AS {})", normalize_var(alias))),
        None => Ok(expr),
    }
}
