//! Start/end event correlation and mean latency per bucket.
//!
//! Pairs a "start" stream (intake submissions) with an "end" stream
//! (cancellations) on the shared `(actor, entity)` key and averages
//! `end − start` in fractional minutes per bucket. Bucketing follows the
//! *start* event: the start frame must already carry its bucket columns.
//!
//! The correlation is a plain relational inner join, not a nearest-match
//! pairing: an actor/entity key with m start and n end events contributes
//! all m×n durations to the average. Callers expecting one-to-one pairing
//! must de-duplicate before correlating.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::frame::{Frame, KeyValue, Value};

use super::bucket::{TimestampPolicy, parse_timestamp};
use super::count::group_key;
use super::{PipelineError, PipelineResult};

/// Column bindings for one correlation.
#[derive(Clone, Debug)]
pub struct LatencySpec<'a> {
    /// Actor id column in (start, end) frames.
    pub actor: (&'a str, &'a str),
    /// Entity id column in (start, end) frames; `None` pairs on actor alone.
    pub entity: Option<(&'a str, &'a str)>,
    /// Timestamp column in (start, end) frames.
    pub timestamp: (&'a str, &'a str),
    /// Bucket-key columns on the start frame.
    pub group_columns: &'a [&'a str],
    /// When set, also emit a count of distinct start-side actors that found
    /// at least one end match, per bucket. This is the "cancelled requests"
    /// metric: a cancellation is attributed to the hour the request was
    /// submitted, alongside the latency it contributes to.
    pub count_column: Option<&'a str>,
    /// Name of the output mean-minutes column.
    pub out_column: &'a str,
    pub policy: TimestampPolicy,
}

/// Mean `end − start` minutes per start-side bucket.
///
/// Buckets with no correlated pairs are absent from the output. Rows with a
/// null actor/entity id or (under [`TimestampPolicy::Null`]) an unparseable
/// timestamp are skipped.
pub fn mean_latency(
    starts: &Frame,
    ends: &Frame,
    spec: &LatencySpec<'_>,
) -> PipelineResult<Frame> {
    let end_index = index_ends(ends, spec)?;

    let actor_col = starts.column_index(spec.actor.0)?;
    let entity_col = spec
        .entity
        .map(|(s, _)| starts.column_index(s))
        .transpose()?;
    let ts_col = starts.column_index(spec.timestamp.0)?;
    let group_idx = spec
        .group_columns
        .iter()
        .map(|c| starts.column_index(c))
        .collect::<Result<Vec<_>, _>>()?;

    #[derive(Default)]
    struct Bucket {
        sum: f64,
        pairs: u64,
        actors: FxHashSet<String>,
    }

    let mut buckets: BTreeMap<Vec<KeyValue>, Bucket> = BTreeMap::new();
    let mut pairs = 0usize;

    for (row_no, row) in starts.rows().enumerate() {
        let Some(actor) = row[actor_col].render() else {
            continue;
        };
        let entity = match entity_col {
            Some(i) => match row[i].render() {
                Some(e) => Some(e),
                None => continue,
            },
            None => None,
        };
        let Some(bucket) = group_key(row, &group_idx) else {
            continue;
        };
        let start_ts = match parse_timestamp(&row[ts_col]) {
            Some(ts) => ts,
            None => {
                if spec.policy == TimestampPolicy::Fail {
                    return Err(PipelineError::MalformedTimestamp {
                        row: row_no,
                        value: row[ts_col].to_string(),
                    });
                }
                continue;
            }
        };

        if let Some(end_times) = end_index.get(&(actor.clone(), entity)) {
            let entry = buckets.entry(bucket).or_default();
            for end_ts in end_times {
                let minutes = (*end_ts - start_ts).num_milliseconds() as f64 / 60_000.0;
                entry.sum += minutes;
                entry.pairs += 1;
                pairs += 1;
            }
            entry.actors.insert(actor);
        }
    }

    debug!(
        pairs,
        buckets = buckets.len(),
        out = spec.out_column,
        "correlated start/end events"
    );

    let mut names: Vec<String> = spec.group_columns.iter().map(|c| c.to_string()).collect();
    if let Some(count) = spec.count_column {
        names.push(count.to_string());
    }
    names.push(spec.out_column.to_string());

    let mut out = Frame::new(names)?;
    for (key, b) in buckets {
        // entries exist only when at least one pair matched
        let mut row: Vec<Value> = key.into_iter().map(KeyValue::into_value).collect();
        if spec.count_column.is_some() {
            row.push(Value::Int(b.actors.len() as i64));
        }
        row.push(Value::Float(b.sum / b.pairs as f64));
        out.push_row(row)?;
    }
    Ok(out)
}

type EndIndex = FxHashMap<(String, Option<String>), Vec<DateTime<Utc>>>;

fn index_ends(ends: &Frame, spec: &LatencySpec<'_>) -> PipelineResult<EndIndex> {
    let actor_col = ends.column_index(spec.actor.1)?;
    let entity_col = spec
        .entity
        .map(|(_, e)| ends.column_index(e))
        .transpose()?;
    let ts_col = ends.column_index(spec.timestamp.1)?;

    let mut index: EndIndex = FxHashMap::default();
    for (row_no, row) in ends.rows().enumerate() {
        let Some(actor) = row[actor_col].render() else {
            continue;
        };
        let entity = match entity_col {
            Some(i) => match row[i].render() {
                Some(e) => Some(e),
                None => continue,
            },
            None => None,
        };
        match parse_timestamp(&row[ts_col]) {
            Some(ts) => index.entry((actor, entity)).or_default().push(ts),
            None => {
                if spec.policy == TimestampPolicy::Fail {
                    return Err(PipelineError::MalformedTimestamp {
                        row: row_no,
                        value: row[ts_col].to_string(),
                    });
                }
            }
        }
    }
    Ok(index)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
