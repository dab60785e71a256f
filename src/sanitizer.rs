//! Lexical escaping for SPARQL fragments.
//!
//! These functions are the only place where user-controlled text crosses
//! into SPARQL syntax; every other module routes its interpolation through
//! them. Outputs are wrapped in [`SparqlFragment`] so interpolation points
//! visibly consume sanitized text.

use std::collections::BTreeMap;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::dsl::Term;
use crate::error::{AclError, Result};

lazy_static! {
    static ref PREFIX_NAME: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("prefix regex");
    static ref CURIE: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*:[A-Za-z0-9_.-]+$").expect("curie regex");
    static ref LANG_TAG: Regex =
        Regex::new(r"^[A-Za-z]+(-[A-Za-z0-9]+)*$").expect("lang tag regex");
}

/// Characters that must never appear inside an unescaped IRI.
const FORBIDDEN_IRI_CHARS: [char; 9] = ['<', '>', '"', '{', '}', '|', '\\', '^', '`'];

/// A piece of SPARQL text that has passed through the sanitizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparqlFragment(String);

impl SparqlFragment {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SparqlFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SparqlFragment> for String {
    fn from(fragment: SparqlFragment) -> Self {
        fragment.0
    }
}

/// Validate an absolute IRI. Returns the input unchanged on success.
///
/// Only `http://` and `https://` IRIs are accepted here; this is the gate
/// for caller-supplied IRIs, not for internal `urn:` graph names.
pub fn escape_iri(iri: &str) -> Result<&str> {
    if iri.is_empty() {
        return Err(AclError::InvalidIri("empty IRI".into()));
    }
    if !iri.starts_with("http://") && !iri.starts_with("https://") {
        return Err(AclError::InvalidIri(format!("unsupported scheme: {iri}")));
    }
    if iri.contains(&FORBIDDEN_IRI_CHARS[..]) {
        return Err(AclError::InvalidIri(format!(
            "IRI contains forbidden characters: {iri}"
        )));
    }
    Ok(iri)
}

/// Escape backslashes and double quotes inside a literal value.
pub fn escape_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render a string literal, optionally typed with a datatype IRI
/// (supplied without angle brackets).
pub fn escape_literal(value: &str, dtype: Option<&str>) -> SparqlFragment {
    let escaped = escape_string(value);
    match dtype {
        Some(dt) => SparqlFragment(format!("\"{escaped}\"^^<{dt}>")),
        None => SparqlFragment(format!("\"{escaped}\"")),
    }
}

/// Whether `name` is a legal prefix name (XML NCName-lite).
pub fn validate_prefix(name: &str) -> bool {
    PREFIX_NAME.is_match(name)
}

/// Whether `value` has the shape `prefix:local`.
pub fn is_curie(value: &str) -> bool {
    CURIE.is_match(value)
}

/// Render a [`Term`] against a prefix map.
///
/// Variables pass through (with a `?` sigil ensured); IRIs are validated
/// and angle-bracketed; CURIEs stay compact when their prefix is declared
/// and fail with [`AclError::InvalidPrefix`] otherwise; literals go
/// through [`escape_literal`].
pub fn format_term(term: &Term, prefixes: &BTreeMap<String, String>) -> Result<SparqlFragment> {
    match term {
        Term::Variable(name) => {
            let name = name.trim();
            let body = name.strip_prefix('?').unwrap_or(name);
            if body.is_empty() {
                return Err(AclError::InvalidLiteral("empty variable name".into()));
            }
            Ok(SparqlFragment(format!("?{body}")))
        }
        Term::Iri(iri) => {
            let validated = escape_iri(iri)?;
            Ok(SparqlFragment(format!("<{validated}>")))
        }
        Term::Curie { prefix, local } => {
            if !validate_prefix(prefix) {
                return Err(AclError::InvalidPrefix(prefix.clone()));
            }
            if !prefixes.contains_key(prefix.as_str()) {
                return Err(AclError::InvalidPrefix(format!(
                    "undeclared prefix: {prefix}"
                )));
            }
            Ok(SparqlFragment(format!("{prefix}:{local}")))
        }
        Term::Literal { value, lang, dtype } => {
            if lang.is_some() && dtype.is_some() {
                return Err(AclError::InvalidLiteral(
                    "literal cannot carry both a language tag and a datatype".into(),
                ));
            }
            if let Some(tag) = lang {
                if !LANG_TAG.is_match(tag) {
                    return Err(AclError::InvalidLiteral(format!("bad language tag: {tag}")));
                }
                let escaped = escape_string(value);
                return Ok(SparqlFragment(format!("\"{escaped}\"@{tag}")));
            }
            Ok(escape_literal(value, dtype.as_deref()))
        }
    }
}

/// Render a value that must denote a node: an already-bracketed IRI, a
/// bare `http(s)`/`urn:` IRI, a blank node, or a `prefix:local` name.
///
/// This is the heuristic used by the upsert planner and graph managers,
/// where triples arrive as plain strings.
pub fn format_iri_value(value: &str) -> SparqlFragment {
    if value.starts_with("_:") {
        return SparqlFragment(value.to_string());
    }
    if value.starts_with('<') && value.ends_with('>') {
        return SparqlFragment(value.to_string());
    }
    let lowered = value.to_ascii_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") || lowered.starts_with("urn:")
    {
        return SparqlFragment(format!("<{value}>"));
    }
    if is_curie(value) {
        return SparqlFragment(value.to_string());
    }
    SparqlFragment(format!("<{value}>"))
}

/// Whether a plain string can be read as a node identifier rather than a
/// literal.
pub fn looks_like_iri(value: &str) -> bool {
    let lowered = value.to_ascii_lowercase();
    value.starts_with('<')
        || value.starts_with("_:")
        || lowered.starts_with("http://")
        || lowered.starts_with("https://")
        || lowered.starts_with("urn:")
        || is_curie(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn prefixes() -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(
            "rdfs".to_string(),
            "http://www.w3.org/2000/01/rdf-schema#".to_string(),
        );
        map
    }

    #[test]
    fn escape_iri_accepts_plain_http() {
        assert_eq!(
            escape_iri("http://example.org/a").unwrap(),
            "http://example.org/a"
        );
    }

    #[test]
    fn escape_iri_rejects_forbidden_chars() {
        for ch in ['<', '>', '"', '{', '}', '|', '\\', '^', '`'] {
            let iri = format!("http://example.org/{ch}x");
            assert!(
                matches!(escape_iri(&iri), Err(AclError::InvalidIri(_))),
                "expected rejection for {ch:?}"
            );
        }
    }

    #[test]
    fn escape_iri_rejects_empty_and_non_http() {
        assert!(escape_iri("").is_err());
        assert!(escape_iri("ftp://example.org").is_err());
        assert!(escape_iri("not a uri").is_err());
    }

    #[test]
    fn escape_literal_escapes_quotes_and_backslashes() {
        assert_eq!(
            escape_literal("he said \"hi\\\"", None).as_str(),
            "\"he said \\\"hi\\\\\\\"\""
        );
    }

    #[test]
    fn escape_literal_appends_datatype() {
        assert_eq!(
            escape_literal("2024-01-01", Some("http://www.w3.org/2001/XMLSchema#date")).as_str(),
            "\"2024-01-01\"^^<http://www.w3.org/2001/XMLSchema#date>"
        );
    }

    #[test]
    fn validate_prefix_matches_ncname_lite() {
        assert!(validate_prefix("sf"));
        assert!(validate_prefix("_internal"));
        assert!(validate_prefix("a-b_c1"));
        assert!(!validate_prefix("1bad"));
        assert!(!validate_prefix("has space"));
        assert!(!validate_prefix(""));
    }

    #[test]
    fn format_term_renders_each_shape() {
        let pfx = prefixes();
        assert_eq!(
            format_term(&Term::Variable("s".into()), &pfx).unwrap().as_str(),
            "?s"
        );
        assert_eq!(
            format_term(&Term::Iri("http://example.org/a".into()), &pfx)
                .unwrap()
                .as_str(),
            "<http://example.org/a>"
        );
        assert_eq!(
            format_term(
                &Term::Curie {
                    prefix: "rdfs".into(),
                    local: "label".into()
                },
                &pfx
            )
            .unwrap()
            .as_str(),
            "rdfs:label"
        );
        assert_eq!(
            format_term(
                &Term::Literal {
                    value: "hi".into(),
                    lang: Some("en".into()),
                    dtype: None
                },
                &pfx
            )
            .unwrap()
            .as_str(),
            "\"hi\"@en"
        );
    }

    #[test]
    fn format_term_rejects_undeclared_prefix() {
        let err = format_term(
            &Term::Curie {
                prefix: "ex".into(),
                local: "a".into(),
            },
            &prefixes(),
        )
        .unwrap_err();
        assert!(matches!(err, AclError::InvalidPrefix(_)));
    }

    #[test]
    fn format_iri_value_heuristics() {
        assert_eq!(format_iri_value("_:b0").as_str(), "_:b0");
        assert_eq!(format_iri_value("<urn:x:1>").as_str(), "<urn:x:1>");
        assert_eq!(
            format_iri_value("http://example.org/e1").as_str(),
            "<http://example.org/e1>"
        );
        assert_eq!(format_iri_value("rdf:type").as_str(), "rdf:type");
        assert_eq!(format_iri_value("urn:sf:g").as_str(), "<urn:sf:g>");
    }

    /// Inverse of the literal escape, for the round-trip property below.
    fn unescape(body: &str) -> String {
        let mut out = String::with_capacity(body.len());
        let mut chars = body.chars();
        while let Some(ch) = chars.next() {
            if ch == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(ch);
            }
        }
        out
    }

    proptest! {
        #[test]
        fn escaped_literal_parses_back_to_input(s in ".*") {
            let rendered = escape_literal(&s, None).into_inner();
            prop_assert!(rendered.starts_with('"') && rendered.ends_with('"'));
            let body = &rendered[1..rendered.len() - 1];
            // No unescaped quote may remain inside the literal body.
            let mut prev_backslashes = 0usize;
            for ch in body.chars() {
                if ch == '"' {
                    prop_assert!(prev_backslashes % 2 == 1);
                }
                if ch == '\\' {
                    prev_backslashes += 1;
                } else {
                    prev_backslashes = 0;
                }
            }
            prop_assert_eq!(unescape(body), s);
        }

        #[test]
        fn iris_with_forbidden_chars_always_fail(
            prefix in "[a-z]{0,8}",
            ch in prop::sample::select(&FORBIDDEN_IRI_CHARS[..]),
            suffix in "[a-z]{0,8}",
        ) {
            let iri = format!("http://example.org/{prefix}{ch}{suffix}");
            prop_assert!(escape_iri(&iri).is_err());
        }
    }
}
