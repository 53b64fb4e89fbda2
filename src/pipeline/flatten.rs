//! JSON payload flattening.
//!
//! Raw event exports carry a semi-structured payload column (`other_data` in
//! the default schema) holding JSON-encoded text. Flattening adds one column
//! per top-level key found across all successfully parsed payloads, in
//! first-seen order; a row whose payload lacks a key gets a null cell.
//!
//! Collision rule: original columns always win. A derived key that collides
//! with an existing column name is materialized under `<key>_json` instead,
//! appending the suffix until the name is unique.

use serde::Deserialize;
use tracing::debug;

use crate::frame::{Frame, Value};

use super::{PipelineError, PipelineResult};

/// What to do with payload cells that are not valid JSON objects.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlattenPolicy {
    /// Skip the payload silently; the row is kept and contributes nulls for
    /// every derived column. This mirrors the upstream export tooling, where
    /// a fraction of payloads is routinely truncated or empty.
    #[default]
    Lenient,
    /// Abort on the first unparseable payload.
    Strict,
}

/// Flatten the JSON text column `json_column` into additional columns.
///
/// Row count and order are preserved; flattening never drops rows, only adds
/// columns. Nested objects and arrays stay as compact JSON text.
pub fn flatten_json_column(
    frame: &Frame,
    json_column: &str,
    policy: FlattenPolicy,
) -> PipelineResult<Frame> {
    let col = frame.column_index(json_column)?;

    let mut payloads: Vec<Option<serde_json::Map<String, serde_json::Value>>> =
        Vec::with_capacity(frame.n_rows());
    let mut skipped = 0usize;

    for (row_no, row) in frame.rows().enumerate() {
        let parsed = match &row[col] {
            Value::Str(text) => match serde_json::from_str::<serde_json::Value>(text) {
                Ok(serde_json::Value::Object(map)) => Some(map),
                Ok(other) => {
                    if policy == FlattenPolicy::Strict {
                        return Err(PipelineError::MalformedPayload {
                            row: row_no,
                            message: format!("expected a JSON object, got {}", json_kind(&other)),
                        });
                    }
                    None
                }
                Err(err) => {
                    if policy == FlattenPolicy::Strict {
                        return Err(PipelineError::MalformedPayload {
                            row: row_no,
                            message: err.to_string(),
                        });
                    }
                    None
                }
            },
            other => {
                if policy == FlattenPolicy::Strict {
                    return Err(PipelineError::MalformedPayload {
                        row: row_no,
                        message: format!("payload cell is {}, not JSON text", other.type_name()),
                    });
                }
                None
            }
        };
        if parsed.is_none() {
            skipped += 1;
        }
        payloads.push(parsed);
    }

    // Key order is first-seen across rows so reruns over the same input are
    // column-for-column identical.
    let mut keys: Vec<String> = Vec::new();
    let mut seen = rustc_hash::FxHashSet::default();
    for map in payloads.iter().flatten() {
        for key in map.keys() {
            if seen.insert(key.clone()) {
                keys.push(key.clone());
            }
        }
    }

    let mut used: rustc_hash::FxHashSet<String> =
        frame.column_names().iter().cloned().collect();
    let mut columns: Vec<(String, Vec<Value>)> = Vec::with_capacity(keys.len());
    for key in &keys {
        let mut out_name = key.clone();
        while used.contains(&out_name) {
            out_name.push_str("_json");
        }
        used.insert(out_name.clone());
        let values = payloads
            .iter()
            .map(|p| {
                p.as_ref()
                    .and_then(|m| m.get(key))
                    .map(Value::from_json)
                    .unwrap_or(Value::Null)
            })
            .collect();
        columns.push((out_name, values));
    }

    if skipped > 0 {
        debug!(
            skipped,
            total = frame.n_rows(),
            column = json_column,
            "payloads skipped during flatten"
        );
    }

    Ok(frame.with_columns(columns)?)
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a bool",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(payloads: &[&str]) -> Frame {
        let mut f = Frame::new(["event_name", "other_data"]).unwrap();
        for p in payloads {
            f.push_row(vec![
                Value::Str("chat_intake_submit".into()),
                Value::Str((*p).to_string()),
            ])
            .unwrap();
        }
        f
    }

    #[test]
    fn adds_one_column_per_top_level_key() {
        let f = raw(&[
            r#"{"astrologerId": "a1", "waitingListId": "w1"}"#,
            r#"{"astrologerId": "a2", "clientId": "c9"}"#,
        ]);
        let out = flatten_json_column(&f, "other_data", FlattenPolicy::Lenient).unwrap();
        assert_eq!(
            out.column_names(),
            &["event_name", "other_data", "astrologerId", "waitingListId", "clientId"]
        );
        assert_eq!(out.get(0, "astrologerId").unwrap(), &Value::Str("a1".into()));
        // missing key in a row becomes null
        assert_eq!(out.get(1, "waitingListId").unwrap(), &Value::Null);
        assert_eq!(out.get(0, "clientId").unwrap(), &Value::Null);
    }

    #[test]
    fn lenient_keeps_rows_with_malformed_payloads() {
        let f = raw(&[r#"{"k": 1}"#, "{not json", r#"[1,2]"#]);
        let out = flatten_json_column(&f, "other_data", FlattenPolicy::Lenient).unwrap();
        assert_eq!(out.n_rows(), 3);
        assert_eq!(out.get(0, "k").unwrap(), &Value::Int(1));
        assert_eq!(out.get(1, "k").unwrap(), &Value::Null);
        assert_eq!(out.get(2, "k").unwrap(), &Value::Null);
    }

    #[test]
    fn lenient_skips_null_cells() {
        let mut f = Frame::new(["other_data"]).unwrap();
        f.push_row(vec![Value::Null]).unwrap();
        f.push_row(vec![Value::Str(r#"{"k": "v"}"#.into())]).unwrap();
        let out = flatten_json_column(&f, "other_data", FlattenPolicy::Lenient).unwrap();
        assert_eq!(out.n_rows(), 2);
        assert_eq!(out.get(1, "k").unwrap(), &Value::Str("v".into()));
    }

    #[test]
    fn strict_fails_on_first_malformed_payload() {
        let f = raw(&[r#"{"k": 1}"#, "oops"]);
        let err = flatten_json_column(&f, "other_data", FlattenPolicy::Strict).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedPayload { row: 1, .. }));
    }

    #[test]
    fn colliding_keys_get_json_suffix() {
        let f = raw(&[r#"{"event_name": "shadow", "x": 1}"#]);
        let out = flatten_json_column(&f, "other_data", FlattenPolicy::Lenient).unwrap();
        // original column untouched, derived key suffixed
        assert_eq!(
            out.get(0, "event_name").unwrap(),
            &Value::Str("chat_intake_submit".into())
        );
        assert_eq!(
            out.get(0, "event_name_json").unwrap(),
            &Value::Str("shadow".into())
        );
    }

    #[test]
    fn suffixed_names_stay_unique_under_repeat_collisions() {
        // The frame already has event_name and event_name_json; the payload
        // shadows both.
        let mut f = Frame::new(["event_name", "event_name_json", "other_data"]).unwrap();
        f.push_row(vec![
            Value::Str("chat_intake_submit".into()),
            Value::Str("kept".into()),
            Value::Str(r#"{"event_name": "a", "event_name_json": "b"}"#.into()),
        ])
        .unwrap();
        let out = flatten_json_column(&f, "other_data", FlattenPolicy::Strict).unwrap();
        assert_eq!(
            out.column_names(),
            &[
                "event_name",
                "event_name_json",
                "other_data",
                "event_name_json_json",
                "event_name_json_json_json",
            ]
        );
        assert_eq!(out.get(0, "event_name_json").unwrap(), &Value::Str("kept".into()));
        assert_eq!(
            out.get(0, "event_name_json_json").unwrap(),
            &Value::Str("a".into())
        );
        assert_eq!(
            out.get(0, "event_name_json_json_json").unwrap(),
            &Value::Str("b".into())
        );
    }

    #[test]
    fn missing_json_column_is_fatal() {
        let f = Frame::new(["a"]).unwrap();
        let err = flatten_json_column(&f, "other_data", FlattenPolicy::Lenient).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Frame(crate::frame::FrameError::MissingColumn(_))
        ));
    }
}
