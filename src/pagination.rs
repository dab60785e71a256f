//! Cursor-based (keyset) pagination.
//!
//! Cursors are opaque, stateless continuation tokens: URL-safe base64 of a
//! canonical JSON object `{"type": "uri"|"literal", "value": …}` with
//! sorted keys. The paired FILTER keeps lexical order stable across pages
//! (`STR()` comparison for IRIs), so a fixed dataset is enumerated exactly
//! once and the loop terminates.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::client::BindingRow;
use crate::error::{AclError, Result};
use crate::sanitizer;

/// Cursor pagination parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPage {
    /// Cursor from the previous page; `None` for the first page.
    pub cursor: Option<String>,
    pub size: usize,
}

impl Default for CursorPage {
    fn default() -> Self {
        Self {
            cursor: None,
            size: 100,
        }
    }
}

impl CursorPage {
    pub fn first(size: usize) -> Self {
        Self { cursor: None, size }
    }

    pub fn after(cursor: impl Into<String>, size: usize) -> Self {
        Self {
            cursor: Some(cursor.into()),
            size,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub results: Vec<BindingRow>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub total_estimate: Option<u64>,
}

/// Whether the cursor value was an IRI or a literal; IRIs compare through
/// `STR()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorType {
    Uri,
    Literal,
}

/// Decoded cursor payload. Field order matches the canonical (sorted-key)
/// JSON encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorData {
    #[serde(rename = "type")]
    pub value_type: CursorType,
    pub value: String,
}

/// Encode the sort-key cell of the last row on a page into a cursor.
pub fn encode_cursor(last_item: &BindingRow, sort_key: &str) -> Result<String> {
    let key = sort_key.trim_start_matches('?');
    let cell = last_item.get(key).ok_or_else(|| {
        AclError::InvalidCursor(format!("sort key {sort_key} missing from result row"))
    })?;
    let value_type = if cell.is_uri() {
        CursorType::Uri
    } else {
        CursorType::Literal
    };
    Ok(encode_data(&CursorData {
        value_type,
        value: cell.value.clone(),
    }))
}

/// Encode a raw value directly (used when the caller tracks the sort key
/// value itself).
pub fn encode_value_cursor(value: &str, is_uri: bool) -> String {
    encode_data(&CursorData {
        value_type: if is_uri {
            CursorType::Uri
        } else {
            CursorType::Literal
        },
        value: value.to_string(),
    })
}

fn encode_data(data: &CursorData) -> String {
    // CursorData serializes with keys already in sorted order.
    let json = serde_json::to_string(data).expect("cursor serialization cannot fail");
    URL_SAFE.encode(json.as_bytes())
}

/// Decode an opaque cursor back into its payload.
pub fn decode_cursor(cursor: &str) -> Result<CursorData> {
    let bytes = URL_SAFE
        .decode(cursor.as_bytes())
        .map_err(|e| AclError::InvalidCursor(format!("bad base64: {e}")))?;
    let json = String::from_utf8(bytes)
        .map_err(|e| AclError::InvalidCursor(format!("bad utf-8: {e}")))?;
    serde_json::from_str(&json).map_err(|e| AclError::InvalidCursor(format!("bad payload: {e}")))
}

/// Build the keyset FILTER for a decoded cursor.
pub fn cursor_filter(data: &CursorData, sort_key: &str) -> String {
    let value = sanitizer::escape_string(&data.value);
    match data.value_type {
        CursorType::Uri => format!("FILTER(STR({sort_key}) > \"{value}\")"),
        CursorType::Literal => format!("FILTER({sort_key} > \"{value}\")"),
    }
}

/// Interpret a probe-row SELECT response (`LIMIT size+1`) as a page:
/// truncates to `size`, derives `has_more` from the extra row, and encodes
/// the next cursor from the last kept row.
pub fn page_from_bindings(
    bindings: Vec<BindingRow>,
    size: usize,
    sort_key: &str,
) -> Result<PageResult> {
    let size = size.max(1);
    let has_more = bindings.len() > size;
    let mut results = bindings;
    results.truncate(size);
    let next_cursor = if has_more {
        match results.last() {
            Some(last) => Some(encode_cursor(last, sort_key)?),
            None => None,
        }
    } else {
        None
    };
    Ok(PageResult {
        results,
        next_cursor,
        has_more,
        total_estimate: None,
    })
}
