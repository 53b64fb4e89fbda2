//! In-memory tabular data.
//!
//! [`Frame`] is the unit of exchange between pipeline stages: ordered named
//! columns over row-major cells. Every stage takes `&Frame` and returns a new
//! `Frame`; inputs are never mutated, so re-deriving columns for a different
//! metric on the same source table can never observe earlier side effects.

pub mod value;

pub use value::{KeyValue, Value};

use rustc_hash::FxHashMap;
use thiserror::Error;

/// Structural errors raised by frame construction and column lookup.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("required column '{0}' is missing")]
    MissingColumn(String),

    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),

    #[error("row has {got} cells but frame has {want} columns")]
    RaggedRow { got: usize, want: usize },

    #[error("column '{name}' has {got} values but frame has {want} rows")]
    ColumnLength {
        name: String,
        got: usize,
        want: usize,
    },
}

/// An immutable-by-convention table: column names plus row-major cells.
#[derive(Debug, Clone)]
pub struct Frame {
    names: Vec<String>,
    index: FxHashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl Frame {
    /// Create an empty frame with the given column names. Duplicate names are
    /// rejected up front so later lookups are unambiguous.
    pub fn new<I, S>(columns: I) -> Result<Self, FrameError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = columns.into_iter().map(Into::into).collect();
        let mut index = FxHashMap::default();
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(FrameError::DuplicateColumn(name.clone()));
            }
        }
        Ok(Frame {
            names,
            index,
            rows: Vec::new(),
        })
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.names.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Resolve a column name to its position, failing fast when the input
    /// table does not carry a required column.
    pub fn column_index(&self, name: &str) -> Result<usize, FrameError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| FrameError::MissingColumn(name.to_string()))
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), FrameError> {
        if row.len() != self.names.len() {
            return Err(FrameError::RaggedRow {
                got: row.len(),
                want: self.names.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Value]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub fn row(&self, i: usize) -> &[Value] {
        &self.rows[i]
    }

    /// Cell lookup by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Result<&Value, FrameError> {
        Ok(&self.rows[row][self.column_index(column)?])
    }

    /// New frame = this frame plus the given columns appended on the right.
    /// Each new column must have exactly one value per existing row.
    pub fn with_columns(
        &self,
        columns: Vec<(String, Vec<Value>)>,
    ) -> Result<Frame, FrameError> {
        for (name, values) in &columns {
            if values.len() != self.rows.len() {
                return Err(FrameError::ColumnLength {
                    name: name.clone(),
                    got: values.len(),
                    want: self.rows.len(),
                });
            }
        }
        let mut out = Frame::new(
            self.names
                .iter()
                .cloned()
                .chain(columns.iter().map(|(n, _)| n.clone())),
        )?;
        let mut added: Vec<std::vec::IntoIter<Value>> =
            columns.into_iter().map(|(_, v)| v.into_iter()).collect();
        for row in &self.rows {
            let mut cells = row.clone();
            for it in &mut added {
                // length validated above
                cells.push(it.next().unwrap_or(Value::Null));
            }
            out.push_row(cells)?;
        }
        Ok(out)
    }

    /// New frame containing only the rows the predicate keeps.
    pub fn filter_rows<F>(&self, mut keep: F) -> Frame
    where
        F: FnMut(&[Value]) -> bool,
    {
        Frame {
            names: self.names.clone(),
            index: self.index.clone(),
            rows: self
                .rows
                .iter()
                .filter(|r| keep(r.as_slice()))
                .cloned()
                .collect(),
        }
    }

    /// Projection to the given columns, in the given order.
    pub fn select(&self, columns: &[&str]) -> Result<Frame, FrameError> {
        let idx: Vec<usize> = columns
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Result<_, _>>()?;
        let mut out = Frame::new(columns.iter().map(|c| c.to_string()))?;
        for row in &self.rows {
            out.push_row(idx.iter().map(|&i| row[i].clone()).collect())?;
        }
        Ok(out)
    }

    /// New frame with one column renamed. Used to align key-column names
    /// across sources before merging (e.g. `astrologerId` on both sides).
    pub fn renamed(&self, from: &str, to: &str) -> Result<Frame, FrameError> {
        let i = self.column_index(from)?;
        let mut names = self.names.clone();
        names[i] = to.to_string();
        let mut out = Frame::new(names)?;
        for row in &self.rows {
            out.push_row(row.clone())?;
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        let mut f = Frame::new(["a", "b"]).unwrap();
        f.push_row(vec![Value::Str("x".into()), Value::Int(1)]).unwrap();
        f.push_row(vec![Value::Str("y".into()), Value::Int(2)]).unwrap();
        f
    }

    #[test]
    fn duplicate_column_rejected() {
        assert!(matches!(
            Frame::new(["a", "a"]),
            Err(FrameError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn ragged_row_rejected() {
        let mut f = Frame::new(["a", "b"]).unwrap();
        let err = f.push_row(vec![Value::Int(1)]).unwrap_err();
        assert!(matches!(err, FrameError::RaggedRow { got: 1, want: 2 }));
    }

    #[test]
    fn missing_column_is_fatal_lookup() {
        let f = sample();
        assert!(matches!(
            f.column_index("nope"),
            Err(FrameError::MissingColumn(_))
        ));
    }

    #[test]
    fn with_columns_preserves_rows_and_appends() {
        let f = sample();
        let g = f
            .with_columns(vec![(
                "c".to_string(),
                vec![Value::Null, Value::Int(9)],
            )])
            .unwrap();
        assert_eq!(g.n_rows(), 2);
        assert_eq!(g.column_names(), &["a", "b", "c"]);
        assert_eq!(g.get(0, "c").unwrap(), &Value::Null);
        assert_eq!(g.get(1, "c").unwrap(), &Value::Int(9));
        // input untouched
        assert_eq!(f.n_cols(), 2);
    }

    #[test]
    fn with_columns_length_mismatch_rejected() {
        let f = sample();
        let err = f
            .with_columns(vec![("c".to_string(), vec![Value::Int(1)])])
            .unwrap_err();
        assert!(matches!(err, FrameError::ColumnLength { .. }));
    }

    #[test]
    fn filter_rows_returns_new_frame() {
        let f = sample();
        let g = f.filter_rows(|r| r[1] == Value::Int(2));
        assert_eq!(g.n_rows(), 1);
        assert_eq!(f.n_rows(), 2);
    }

    #[test]
    fn select_reorders_columns() {
        let f = sample();
        let g = f.select(&["b", "a"]).unwrap();
        assert_eq!(g.column_names(), &["b", "a"]);
        assert_eq!(g.get(0, "b").unwrap(), &Value::Int(1));
    }

    #[test]
    fn renamed_keeps_data() {
        let f = sample();
        let g = f.renamed("a", "entity").unwrap();
        assert_eq!(g.column_names(), &["entity", "b"]);
        assert_eq!(g.get(1, "entity").unwrap(), &Value::Str("y".into()));
    }
}
