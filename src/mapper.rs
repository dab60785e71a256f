//! SPARQL result binding normalisation.
//!
//! Maps W3C JSON-results cells into a uniform shape carrying a typed
//! `value` next to the untouched `raw` text. XSD numerics, booleans, and
//! dateTimes are cast; everything else is preserved verbatim so nothing is
//! lost on unknown datatypes.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, SecondsFormat};
use serde::Serialize;
use serde_json::Value;

use crate::client::{BindingCell, BindingRow};

const XSD_INT_TYPES: [&str; 12] = [
    "http://www.w3.org/2001/XMLSchema#integer",
    "http://www.w3.org/2001/XMLSchema#int",
    "http://www.w3.org/2001/XMLSchema#long",
    "http://www.w3.org/2001/XMLSchema#short",
    "http://www.w3.org/2001/XMLSchema#byte",
    "http://www.w3.org/2001/XMLSchema#nonNegativeInteger",
    "http://www.w3.org/2001/XMLSchema#positiveInteger",
    "http://www.w3.org/2001/XMLSchema#nonPositiveInteger",
    "http://www.w3.org/2001/XMLSchema#negativeInteger",
    "http://www.w3.org/2001/XMLSchema#unsignedInt",
    "http://www.w3.org/2001/XMLSchema#unsignedShort",
    "http://www.w3.org/2001/XMLSchema#unsignedByte",
];

const XSD_DECIMAL_TYPES: [&str; 3] = [
    "http://www.w3.org/2001/XMLSchema#decimal",
    "http://www.w3.org/2001/XMLSchema#double",
    "http://www.w3.org/2001/XMLSchema#float",
];

const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
const XSD_DATETIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";

/// One normalised cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedCell {
    /// Typed value where the datatype allowed a cast, else the raw text.
    pub value: Value,
    /// Original lexical form, always preserved.
    pub raw: String,
    /// `uri`, `literal`, or `bnode`.
    #[serde(rename = "type")]
    pub cell_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// Maps SPARQL JSON bindings into rows of [`MappedCell`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultMapper;

impl ResultMapper {
    pub fn new() -> Self {
        Self
    }

    /// Convert a binding array: one map per row, `None` where a variable
    /// is unbound in that row.
    pub fn map_bindings(
        &self,
        vars: &[String],
        bindings: &[BindingRow],
    ) -> Vec<HashMap<String, Option<MappedCell>>> {
        bindings
            .iter()
            .map(|row| {
                vars.iter()
                    .map(|var| (var.clone(), row.get(var).map(convert_cell)))
                    .collect()
            })
            .collect()
    }
}

fn convert_cell(cell: &BindingCell) -> MappedCell {
    MappedCell {
        value: cast_value(&cell.value, cell.datatype.as_deref()),
        raw: cell.value.clone(),
        cell_type: cell.cell_type.clone(),
        datatype: cell.datatype.clone(),
        lang: cell.lang.clone(),
    }
}

fn cast_value(raw: &str, datatype: Option<&str>) -> Value {
    let Some(datatype) = datatype else {
        return Value::String(raw.to_string());
    };
    if XSD_INT_TYPES.contains(&datatype) {
        if let Ok(n) = raw.parse::<i64>() {
            return Value::Number(n.into());
        }
        return Value::String(raw.to_string());
    }
    if XSD_DECIMAL_TYPES.contains(&datatype) {
        if let Some(n) = raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(n);
        }
        return Value::String(raw.to_string());
    }
    if datatype == XSD_BOOLEAN {
        let lowered = raw.to_ascii_lowercase();
        return Value::Bool(lowered == "true" || lowered == "1");
    }
    if datatype == XSD_DATETIME {
        return Value::String(normalize_datetime(raw));
    }
    Value::String(raw.to_string())
}

/// Normalise an `xsd:dateTime` lexical form to explicit-UTC ISO-8601.
/// Timestamps without a zone are read as UTC and gain a trailing `Z`.
fn normalize_datetime(text: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return dt
            .with_timezone(&chrono::Utc)
            .to_rfc3339_opts(SecondsFormat::AutoSi, true);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return naive
                .and_utc()
                .to_rfc3339_opts(SecondsFormat::AutoSi, true);
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn row(var: &str, cell: BindingCell) -> BindingRow {
        let mut row = HashMap::new();
        row.insert(var.to_string(), cell);
        row
    }

    #[test]
    fn integers_and_decimals_are_cast() {
        let mapper = ResultMapper::new();
        let vars = vec!["n".to_string(), "d".to_string()];
        let mut binding = row(
            "n",
            BindingCell::typed_literal("42", "http://www.w3.org/2001/XMLSchema#integer"),
        );
        binding.insert(
            "d".to_string(),
            BindingCell::typed_literal("2.5", "http://www.w3.org/2001/XMLSchema#decimal"),
        );
        let rows = mapper.map_bindings(&vars, &[binding]);
        let n = rows[0]["n"].as_ref().unwrap();
        assert_eq!(n.value, Value::Number(42.into()));
        assert_eq!(n.raw, "42");
        let d = rows[0]["d"].as_ref().unwrap();
        assert_eq!(d.value.as_f64(), Some(2.5));
    }

    #[test]
    fn booleans_accept_true_and_one() {
        for (lexical, expected) in [("true", true), ("1", true), ("false", false)] {
            let value = cast_value(lexical, Some(XSD_BOOLEAN));
            assert_eq!(value, Value::Bool(expected), "for {lexical}");
        }
    }

    #[test]
    fn datetimes_normalise_to_explicit_utc() {
        assert_eq!(
            cast_value("2025-10-17T12:30:00Z", Some(XSD_DATETIME)),
            Value::String("2025-10-17T12:30:00Z".into())
        );
        assert_eq!(
            cast_value("2025-10-17T12:30:00", Some(XSD_DATETIME)),
            Value::String("2025-10-17T12:30:00Z".into())
        );
        assert_eq!(
            cast_value("2025-10-17T14:30:00+02:00", Some(XSD_DATETIME)),
            Value::String("2025-10-17T12:30:00Z".into())
        );
    }

    #[test]
    fn unparseable_values_keep_their_raw_text() {
        assert_eq!(
            cast_value("not-a-number", Some("http://www.w3.org/2001/XMLSchema#integer")),
            Value::String("not-a-number".into())
        );
        assert_eq!(
            cast_value("soon", Some(XSD_DATETIME)),
            Value::String("soon".into())
        );
    }

    #[test]
    fn unbound_variables_map_to_none() {
        let mapper = ResultMapper::new();
        let vars = vec!["s".to_string(), "label".to_string()];
        let binding = row("s", BindingCell::uri("http://example.org/e1"));
        let rows = mapper.map_bindings(&vars, &[binding]);
        assert!(rows[0]["label"].is_none());
        let s = rows[0]["s"].as_ref().unwrap();
        assert_eq!(s.cell_type, "uri");
    }

    #[test]
    fn language_tags_are_preserved() {
        let mapper = ResultMapper::new();
        let vars = vec!["label".to_string()];
        let binding = row("label", BindingCell::lang_literal("示例", "zh"));
        let rows = mapper.map_bindings(&vars, &[binding]);
        let label = rows[0]["label"].as_ref().unwrap();
        assert_eq!(label.lang.as_deref(), Some("zh"));
        assert_eq!(label.value, Value::String("示例".into()));
    }
}
