//! CSV ingestion and egress.
//!
//! The pipeline core is I/O-free; this module is the thin collaborator that
//! turns CSV exports into [`Frame`]s and writes the rollup back out. Cells
//! load as text; empty cells become null and round-trip back to empty.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::frame::{Frame, FrameError, Value};

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("csv error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error(transparent)]
    Shape(#[from] FrameError),
}

/// Read a headered CSV file into a frame.
pub fn read_csv(path: &Path) -> Result<Frame, CsvError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_path(path)
        .map_err(|e| open_or_csv(path, e))?;

    let headers = reader
        .headers()
        .map_err(|source| CsvError::Csv {
            path: path.to_path_buf(),
            source,
        })?
        .clone();
    let mut frame = Frame::new(headers.iter())?;

    for record in reader.records() {
        let record = record.map_err(|source| CsvError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        frame.push_row(
            record
                .iter()
                .map(|cell| {
                    if cell.is_empty() {
                        Value::Null
                    } else {
                        Value::Str(cell.to_string())
                    }
                })
                .collect(),
        )?;
    }

    debug!(path = %path.display(), rows = frame.n_rows(), cols = frame.n_cols(), "read csv");
    Ok(frame)
}

/// Write a frame as headered CSV; null cells become empty.
pub fn write_csv(frame: &Frame, path: &Path) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| open_or_csv(path, e))?;
    writer
        .write_record(frame.column_names())
        .map_err(|source| CsvError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    for row in frame.rows() {
        writer
            .write_record(row.iter().map(Value::to_string))
            .map_err(|source| CsvError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
    }
    writer.flush().map_err(|source| CsvError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), rows = frame.n_rows(), "wrote csv");
    Ok(())
}

fn open_or_csv(path: &Path, err: csv::Error) -> CsvError {
    let path = path.to_path_buf();
    if !err.is_io_error() {
        return CsvError::Csv { path, source: err };
    }
    match err.into_kind() {
        csv::ErrorKind::Io(source) => CsvError::Open { path, source },
        _ => CsvError::Open {
            path,
            source: std::io::Error::other("csv io error"),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nulls_as_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");

        let mut f = Frame::new(["a", "b"]).unwrap();
        f.push_row(vec![Value::Str("x".into()), Value::Null]).unwrap();
        f.push_row(vec![Value::Int(7), Value::Float(2.5)]).unwrap();
        write_csv(&f, &path).unwrap();

        let g = read_csv(&path).unwrap();
        assert_eq!(g.column_names(), &["a", "b"]);
        assert_eq!(g.get(0, "b").unwrap(), &Value::Null);
        // numeric cells come back as text; predicates compare by rendering
        assert_eq!(g.get(1, "a").unwrap(), &Value::Str("7".into()));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = read_csv(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, CsvError::Open { .. }));
        assert!(err.to_string().contains("not/here.csv"));
    }
}
