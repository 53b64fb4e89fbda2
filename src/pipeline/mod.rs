//! The funnel aggregation pipeline.
//!
//! Pure stages over [`Frame`](crate::frame::Frame)s, composed by
//! [`report::run_funnel`]:
//!
//! - [`flatten`] — JSON payload column → tabular columns
//! - [`bucket`] — UTC-offset normalization and `(date, hour)` derivation
//! - [`count`] — predicate filtering and per-bucket distinct counts
//! - [`latency`] — paired start/end events → mean elapsed minutes per bucket
//! - [`merge`] — outer-join fold of aggregate frames, metadata enrichment
//! - [`report`] — configuration and orchestration of one full run

pub mod bucket;
pub mod count;
pub mod flatten;
pub mod latency;
pub mod merge;
pub mod report;

use thiserror::Error;

use crate::frame::FrameError;

/// Errors raised by pipeline stages. Structural frame errors (missing
/// columns, ragged rows) pass through transparently.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("row {row}: malformed JSON payload: {message}")]
    MalformedPayload { row: usize, message: String },

    #[error("row {row}: cannot parse '{value}' as a timestamp")]
    MalformedTimestamp { row: usize, value: String },

    #[error("merge key '{column}' has incompatible types: {left} vs {right}")]
    KeyMismatch {
        column: String,
        left: &'static str,
        right: &'static str,
    },

    #[error("key column '{column}' holds non-key value of type {found}")]
    KeyType {
        column: String,
        found: &'static str,
    },

    #[error("invalid UTC offset '{0}', expected [+-]HH:MM")]
    BadOffset(String),
}

/// Convenience alias.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
