//! Event filtering and per-bucket distinct counts.
//!
//! A [`Predicate`] is a conjunction of column clauses; counters group the
//! matching rows by bucket-key columns and count distinct values of one
//! identifier column. Distinctness is identifier-scoped: the same actor
//! acting twice inside a bucket counts once. Occurrence volume is obtained
//! by running the same counter over a ticket-identifier column instead.
//!
//! Buckets with zero matching rows are absent from the output, never emitted
//! as zero — the merge stage reconciles missing cells as nulls.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;

use crate::frame::{Frame, KeyValue, Value};

use super::PipelineResult;

/// One conjunctive constraint over a column.
#[derive(Clone, Debug)]
pub enum Clause {
    /// Column equals the given text (numeric cells compare by rendering).
    Eq(String, String),
    /// Column value is one of the given texts.
    In(String, Vec<String>),
    /// Column value is a member of a precomputed reference set — the
    /// referential (semi-join) filter. The reference set must be computed
    /// from its source stream *before* the dependent counter runs.
    InSet(String, FxHashSet<String>),
}

impl Clause {
    fn column(&self) -> &str {
        match self {
            Clause::Eq(c, _) | Clause::In(c, _) | Clause::InSet(c, _) => c,
        }
    }

    fn matches(&self, cell: &Value) -> bool {
        let Some(rendered) = cell.render() else {
            return false;
        };
        match self {
            Clause::Eq(_, want) => rendered == *want,
            Clause::In(_, wants) => wants.iter().any(|w| *w == rendered),
            Clause::InSet(_, set) => set.contains(&rendered),
        }
    }
}

/// Conjunction of clauses; an empty predicate matches every row.
#[derive(Clone, Debug, Default)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    pub fn new() -> Predicate {
        Predicate::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Predicate {
        self.clauses.push(Clause::Eq(column.into(), value.into()));
        self
    }

    pub fn is_in<S: Into<String>>(
        mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Predicate {
        self.clauses.push(Clause::In(
            column.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn in_set(mut self, column: impl Into<String>, set: FxHashSet<String>) -> Predicate {
        self.clauses.push(Clause::InSet(column.into(), set));
        self
    }

    /// Resolve clause columns against a frame. Missing columns fail here,
    /// before any aggregation output exists.
    fn bind<'p>(&'p self, frame: &Frame) -> PipelineResult<BoundPredicate<'p>> {
        let indices = self
            .clauses
            .iter()
            .map(|c| frame.column_index(c.column()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BoundPredicate {
            clauses: &self.clauses,
            indices,
        })
    }
}

struct BoundPredicate<'p> {
    clauses: &'p [Clause],
    indices: Vec<usize>,
}

impl BoundPredicate<'_> {
    fn matches(&self, row: &[Value]) -> bool {
        self.clauses
            .iter()
            .zip(&self.indices)
            .all(|(clause, &i)| clause.matches(&row[i]))
    }
}

/// New frame holding only the rows matching `pred`.
pub fn filter(frame: &Frame, pred: &Predicate) -> PipelineResult<Frame> {
    let bound = pred.bind(frame)?;
    Ok(frame.filter_rows(|row| bound.matches(row)))
}

/// Collect the distinct non-null values of `column` over rows matching
/// `pred`. Used to build reference sets for [`Clause::InSet`].
pub fn distinct_values(
    frame: &Frame,
    pred: &Predicate,
    column: &str,
) -> PipelineResult<FxHashSet<String>> {
    let col = frame.column_index(column)?;
    let bound = pred.bind(frame)?;
    let mut out = FxHashSet::default();
    for row in frame.rows() {
        if bound.matches(row)
            && let Some(rendered) = row[col].render()
        {
            out.insert(rendered);
        }
    }
    Ok(out)
}

/// Count distinct non-null values of `distinct_column` per group, over rows
/// matching `pred`.
///
/// Output columns: `group_columns` then `out_column` (integer count), one row
/// per observed group in key order. Rows with a null group-key component or a
/// null identifier are skipped.
pub fn count_distinct(
    frame: &Frame,
    pred: &Predicate,
    group_columns: &[&str],
    distinct_column: &str,
    out_column: &str,
) -> PipelineResult<Frame> {
    let group_idx = group_columns
        .iter()
        .map(|c| frame.column_index(c))
        .collect::<Result<Vec<_>, _>>()?;
    let value_idx = frame.column_index(distinct_column)?;
    let bound = pred.bind(frame)?;

    let mut groups: BTreeMap<Vec<KeyValue>, FxHashSet<String>> = BTreeMap::new();
    for row in frame.rows() {
        if !bound.matches(row) {
            continue;
        }
        let Some(key) = group_key(row, &group_idx) else {
            continue;
        };
        let Some(id) = row[value_idx].render() else {
            continue;
        };
        groups.entry(key).or_default().insert(id);
    }

    let mut out = Frame::new(
        group_columns
            .iter()
            .map(|c| c.to_string())
            .chain(std::iter::once(out_column.to_string())),
    )?;
    for (key, ids) in groups {
        let mut row: Vec<Value> = key.into_iter().map(KeyValue::into_value).collect();
        row.push(Value::Int(ids.len() as i64));
        out.push_row(row)?;
    }
    Ok(out)
}

/// Build a group key from the given columns; `None` when any part is null or
/// not a legal key type.
pub(crate) fn group_key(row: &[Value], idx: &[usize]) -> Option<Vec<KeyValue>> {
    idx.iter().map(|&i| row[i].as_key()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
