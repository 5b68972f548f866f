//! Result Combination
//!
//! Merges the ordered per-chunk responses of one logical request into a
//! single output.
//!
//! ## Strategy
//! 1. Failed chunks are dropped when at least one chunk succeeded; if none
//!    did, the whole request fails with `AllChunksFailed`
//! 2. If every surviving response parses as JSON, they merge at the JSON level
//!    according to the report kind
//! 3. Otherwise, and whenever JSON merging hits a shape it cannot handle, the
//!    raw responses are joined with a separator in chunk order

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::constants::combine;
use crate::types::{ChunkResult, RelayError, ReportKind, Result};

// =============================================================================
// JSON Content Extraction
// =============================================================================

/// Strip a markdown code fence and BOM from a model response
pub fn strip_json_wrapping(raw: &str) -> &str {
    let mut s = raw.trim().trim_start_matches('\u{feff}').trim();

    if s.starts_with("```")
        && let Some(first_newline) = s.find('\n')
    {
        s = &s[first_newline + 1..];
    }

    if let Some(stripped) = s.trim_end().strip_suffix("```") {
        s = stripped;
    }

    s.trim()
}

/// Parse a model response as JSON, tolerating code fences
pub fn parse_json_content(content: &str) -> Result<Value> {
    let cleaned = strip_json_wrapping(content);
    serde_json::from_str(cleaned).map_err(|e| RelayError::Parse(e.to_string()))
}

// =============================================================================
// Combined Output
// =============================================================================

/// Final shape of a combined result
#[derive(Debug, Clone, PartialEq)]
pub enum Combined {
    Json(Value),
    Text(String),
}

impl Combined {
    pub fn is_json(&self) -> bool {
        matches!(self, Combined::Json(_))
    }

    pub fn into_content(self) -> String {
        match self {
            Combined::Json(value) => value.to_string(),
            Combined::Text(text) => text,
        }
    }
}

// =============================================================================
// ResultCombiner
// =============================================================================

/// Merges chunk results by report kind
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultCombiner {
    kind: ReportKind,
}

impl ResultCombiner {
    pub fn new(kind: ReportKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    /// Combine results in index order
    pub fn combine(&self, results: &[ChunkResult]) -> Result<Combined> {
        let mut ordered: Vec<&ChunkResult> = results.iter().collect();
        ordered.sort_by_key(|r| r.index);

        let survivors: Vec<&ChunkResult> = ordered.iter().copied().filter(|r| !r.failed).collect();

        if survivors.is_empty() {
            let last_error = ordered
                .last()
                .map(|r| r.content.clone())
                .unwrap_or_else(|| "no chunk results".to_string());
            return Err(RelayError::AllChunksFailed {
                chunks: ordered.len(),
                last_error,
            });
        }

        let dropped = ordered.len() - survivors.len();
        if dropped > 0 {
            warn!(dropped, total = ordered.len(), "Combining partial results");
        }

        if let [only] = survivors.as_slice() {
            return Ok(match parse_json_content(&only.content) {
                Ok(Value::Object(object)) => {
                    let merged = self.merge_objects(std::slice::from_ref(&object));
                    Combined::Json(Value::Object(merged.unwrap_or(object)))
                }
                Ok(value) => Combined::Json(value),
                Err(_) => Combined::Text(only.content.clone()),
            });
        }

        let parsed: Option<Vec<Value>> = survivors
            .iter()
            .map(|r| parse_json_content(&r.content).ok())
            .collect();

        let Some(values) = parsed else {
            debug!(chunks = survivors.len(), "Non-JSON chunk present, joining as text");
            return Ok(Combined::Text(join_text(&survivors)));
        };

        match self.combine_json(values) {
            Ok(value) => Ok(Combined::Json(value)),
            Err(reason) => {
                warn!(reason = %reason, "JSON combination failed, joining as text");
                Ok(Combined::Text(join_text(&survivors)))
            }
        }
    }

    fn combine_json(&self, values: Vec<Value>) -> std::result::Result<Value, String> {
        let all_objects = values.iter().all(Value::is_object);

        if all_objects {
            let objects: Vec<Map<String, Value>> = values
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect();

            return Ok(match self.merge_objects(&objects) {
                Some(map) => Value::Object(map),
                None => Value::Array(objects.into_iter().map(Value::Object).collect()),
            });
        }

        flatten_unrecognized(values)
    }

    /// Kind-specific merge; `None` when the objects lack the kind's fields
    fn merge_objects(&self, objects: &[Map<String, Value>]) -> Option<Map<String, Value>> {
        match self.kind {
            ReportKind::RecordList => merge_record_lists(objects),
            ReportKind::InsightList => merge_insight_lists(objects),
        }
    }
}

/// Concatenate same-named array fields, dedupe by URL, drop empty fields.
///
/// `None` when no chunk carries an array field.
fn merge_record_lists(objects: &[Map<String, Value>]) -> Option<Map<String, Value>> {
    let has_arrays = objects.iter().any(|o| o.values().any(Value::is_array));
    if !has_arrays {
        return None;
    }

    let mut merged = Map::new();
    for object in objects {
        for (field, value) in object {
            match value {
                Value::Array(items) => {
                    let entry = merged
                        .entry(field.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(existing) = entry {
                        existing.extend(items.iter().cloned());
                    }
                }
                other => {
                    merged.entry(field.clone()).or_insert_with(|| other.clone());
                }
            }
        }
    }

    for value in merged.values_mut() {
        if let Value::Array(items) = value {
            dedupe_by_key(items, combine::RECORD_KEY_FIELD);
        }
    }
    merged.retain(|_, value| !matches!(value, Value::Array(items) if items.is_empty()));

    Some(merged)
}

/// Concatenate insight fields without dedupe; other fields keep their first value.
///
/// `None` when no chunk carries an insight field.
fn merge_insight_lists(objects: &[Map<String, Value>]) -> Option<Map<String, Value>> {
    let has_insights = objects
        .iter()
        .any(|o| combine::INSIGHT_FIELDS.iter().any(|f| o.contains_key(*f)));
    if !has_insights {
        return None;
    }

    let mut merged = Map::new();
    for object in objects {
        for (field, value) in object {
            if combine::INSIGHT_FIELDS.contains(&field.as_str()) {
                let entry = merged
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(existing) = entry {
                    match value {
                        Value::Array(items) => existing.extend(items.iter().cloned()),
                        Value::Null => {}
                        single => existing.push(single.clone()),
                    }
                }
            } else {
                merged.entry(field.clone()).or_insert_with(|| value.clone());
            }
        }
    }

    Some(merged)
}

/// Keep the first record per key; records without the key are always kept
fn dedupe_by_key(items: &mut Vec<Value>, key: &str) {
    let mut seen = HashSet::new();
    items.retain(|item| match item.get(key) {
        Some(Value::String(k)) => seen.insert(k.clone()),
        Some(other) if !other.is_null() => seen.insert(other.to_string()),
        _ => true,
    });
}

fn flatten_unrecognized(values: Vec<Value>) -> std::result::Result<Value, String> {
    if !values.first().is_some_and(Value::is_array) {
        return Ok(Value::Array(values));
    }

    let mut flattened = Vec::new();
    for (i, value) in values.into_iter().enumerate() {
        match value {
            Value::Array(items) => flattened.extend(items),
            other => {
                return Err(format!(
                    "chunk {} is a {} while the first chunk is an array",
                    i + 1,
                    json_type_name(&other)
                ));
            }
        }
    }
    Ok(Value::Array(flattened))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join_text(results: &[&ChunkResult]) -> String {
    results
        .iter()
        .map(|r| r.content.trim())
        .collect::<Vec<_>>()
        .join(combine::TEXT_SEPARATOR)
}
