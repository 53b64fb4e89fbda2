//! Outer-join folding of aggregate frames.
//!
//! Each per-metric aggregate covers only the buckets it observed; the merge
//! step folds an ordered list of such frames with full outer joins on the
//! bucket key, producing one wide frame over the union of all bucket keys.
//! A metric absent for some bucket stays null — never zero, which would mean
//! "counted and found none".
//!
//! The fold is an explicit function of the caller-supplied list; no merged
//! state is carried between runs.

use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::frame::{Frame, KeyValue, Value};

use super::{PipelineError, PipelineResult};

/// Fold `frames` left-to-right with full outer joins on the key columns
/// shared by both sides (an entity-scoped and a global aggregate join on
/// their common `(date, hour)` subset).
///
/// Output: key columns first (in `key_columns` order), then metric columns in
/// input order; rows sorted by key. Joining is associative and commutative
/// over same-keyed inputs — permuting `frames` permutes only the metric
/// column order, not the row set or cell values.
pub fn outer_merge(frames: &[Frame], key_columns: &[&str]) -> PipelineResult<Frame> {
    let mut iter = frames.iter();
    let Some(first) = iter.next() else {
        return Ok(Frame::new(key_columns.iter().map(|c| c.to_string()))?);
    };

    let mut acc = first.clone();
    for frame in iter {
        acc = outer_join(&acc, frame, key_columns)?;
    }

    debug!(
        tables = frames.len(),
        rows = acc.n_rows(),
        cols = acc.n_cols(),
        "merged aggregate frames"
    );
    finalize(&acc, key_columns)
}

/// Left join `merged` against an entity metadata frame, keeping every
/// aggregate row; rows with no metadata match get null metadata cells. When
/// the metadata key is duplicated the first occurrence wins.
pub fn enrich_left(
    merged: &Frame,
    metadata: &Frame,
    on: (&str, &str),
) -> PipelineResult<Frame> {
    let left_key = merged.column_index(on.0)?;
    let meta_key = metadata.column_index(on.1)?;
    validate_key_column(merged, on.0)?;
    validate_key_column(metadata, on.1)?;

    let mut index: FxHashMap<KeyValue, usize> = FxHashMap::default();
    let mut duplicates = 0usize;
    for (i, row) in metadata.rows().enumerate() {
        if let Some(key) = row[meta_key].as_key() {
            match index.entry(key) {
                Entry::Occupied(_) => duplicates += 1,
                Entry::Vacant(slot) => {
                    slot.insert(i);
                }
            }
        }
    }
    if duplicates > 0 {
        debug!(duplicates, "duplicate metadata keys, keeping first occurrence");
    }

    let carried: Vec<usize> = (0..metadata.n_cols()).filter(|&i| i != meta_key).collect();
    let mut out = Frame::new(
        merged
            .column_names()
            .iter()
            .cloned()
            .chain(carried.iter().map(|&i| metadata.column_names()[i].clone())),
    )?;

    for row in merged.rows() {
        let mut cells = row.to_vec();
        let hit = row[left_key].as_key().and_then(|k| index.get(&k).copied());
        match hit {
            Some(meta_row) => {
                for &i in &carried {
                    cells.push(metadata.row(meta_row)[i].clone());
                }
            }
            None => cells.extend(std::iter::repeat_n(Value::Null, carried.len())),
        }
        out.push_row(cells)?;
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Join internals
// ---------------------------------------------------------------------------

fn outer_join(left: &Frame, right: &Frame, key_columns: &[&str]) -> PipelineResult<Frame> {
    let shared: Vec<&str> = key_columns
        .iter()
        .copied()
        .filter(|c| left.has_column(c) && right.has_column(c))
        .collect();
    if shared.is_empty() {
        // A frame carrying none of the key columns cannot be merged.
        return Err(PipelineError::Frame(crate::frame::FrameError::MissingColumn(
            key_columns.first().copied().unwrap_or("").to_string(),
        )));
    }

    for col in &shared {
        let lt = validate_key_column(left, col)?;
        let rt = validate_key_column(right, col)?;
        if let (Some(lt), Some(rt)) = (lt, rt)
            && lt != rt
        {
            return Err(PipelineError::KeyMismatch {
                column: col.to_string(),
                left: lt,
                right: rt,
            });
        }
    }

    let left_key_idx: Vec<usize> = shared
        .iter()
        .map(|c| left.column_index(c))
        .collect::<Result<_, _>>()?;
    let right_key_idx: Vec<usize> = shared
        .iter()
        .map(|c| right.column_index(c))
        .collect::<Result<_, _>>()?;
    let carried: Vec<usize> = (0..right.n_cols())
        .filter(|i| !right_key_idx.contains(i))
        .collect();

    let mut index: FxHashMap<Vec<KeyValue>, Vec<usize>> = FxHashMap::default();
    for (i, row) in right.rows().enumerate() {
        if let Some(key) = super::count::group_key(row, &right_key_idx) {
            index.entry(key).or_default().push(i);
        }
    }

    let mut out = Frame::new(
        left.column_names()
            .iter()
            .cloned()
            .chain(carried.iter().map(|&i| right.column_names()[i].clone())),
    )?;

    let mut matched: Vec<bool> = vec![false; right.n_rows()];
    for row in left.rows() {
        let key = super::count::group_key(row, &left_key_idx);
        let hits = key.as_ref().and_then(|k| index.get(k));
        match hits {
            Some(rows) => {
                for &r in rows {
                    matched[r] = true;
                    let mut cells = row.to_vec();
                    for &i in &carried {
                        cells.push(right.row(r)[i].clone());
                    }
                    out.push_row(cells)?;
                }
            }
            None => {
                let mut cells = row.to_vec();
                cells.extend(std::iter::repeat_n(Value::Null, carried.len()));
                out.push_row(cells)?;
            }
        }
    }

    // Right-only buckets: nulls for every left metric, key values from right.
    for (r, row) in right.rows().enumerate() {
        if matched[r] || super::count::group_key(row, &right_key_idx).is_none() {
            continue;
        }
        let mut cells: Vec<Value> = Vec::with_capacity(out.n_cols());
        for name in left.column_names() {
            match shared.iter().position(|c| c == name) {
                Some(k) => cells.push(row[right_key_idx[k]].clone()),
                None => cells.push(Value::Null),
            }
        }
        for &i in &carried {
            cells.push(row[i].clone());
        }
        out.push_row(cells)?;
    }

    Ok(out)
}

/// Scan one key column: every non-null cell must be a legal key type and all
/// cells must agree on that type. Returns the type, or `None` for an all-null
/// (or empty) column.
fn validate_key_column(frame: &Frame, column: &str) -> PipelineResult<Option<&'static str>> {
    let idx = frame.column_index(column)?;
    let mut seen: Option<&'static str> = None;
    for row in frame.rows() {
        let cell = &row[idx];
        if cell.is_null() {
            continue;
        }
        let Some(key) = cell.as_key() else {
            return Err(PipelineError::KeyType {
                column: column.to_string(),
                found: cell.type_name(),
            });
        };
        match seen {
            None => seen = Some(key.type_name()),
            Some(t) if t != key.type_name() => {
                return Err(PipelineError::KeyMismatch {
                    column: column.to_string(),
                    left: t,
                    right: key.type_name(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(seen)
}

/// Sort rows by key and move key columns to the front.
fn finalize(frame: &Frame, key_columns: &[&str]) -> PipelineResult<Frame> {
    let present: Vec<&str> = key_columns
        .iter()
        .copied()
        .filter(|c| frame.has_column(c))
        .collect();
    let key_idx: Vec<usize> = present
        .iter()
        .map(|c| frame.column_index(c))
        .collect::<Result<_, _>>()?;

    let mut decorated: Vec<(Vec<Option<KeyValue>>, &[Value])> = frame
        .rows()
        .map(|row| (key_idx.iter().map(|&i| row[i].as_key()).collect(), row))
        .collect();
    decorated.sort_by(|a, b| a.0.cmp(&b.0));

    let order: Vec<&str> = present
        .iter()
        .copied()
        .chain(
            frame
                .column_names()
                .iter()
                .map(String::as_str)
                .filter(|c| !present.contains(c)),
        )
        .collect();

    let mut sorted = Frame::new(frame.column_names().iter().cloned())?;
    for (_, row) in decorated {
        sorted.push_row(row.to_vec())?;
    }
    Ok(sorted.select(&order)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
