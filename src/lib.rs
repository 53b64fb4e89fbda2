//! Hourly funnel rollups for chat consultation events.
//!
//! Ingests a raw event log (with a nested JSON payload column), a
//! chat-completion outcomes table, and an optional entity directory, and
//! produces one wide hourly table of funnel metrics per `(entity?, date,
//! hour)` bucket: intake requests, acceptances, completions, paid
//! completions, cancellations, and mean time-to-cancel.
//!
//! The core ([`pipeline`]) works purely over in-memory [`frame::Frame`]s;
//! [`io`] and [`cli`] are the CSV/terminal shell around it.

pub mod cli;
pub mod frame;
pub mod io;
pub mod pipeline;

pub use frame::{Frame, FrameError, KeyValue, Value};
pub use pipeline::report::{FunnelConfig, run_funnel};
pub use pipeline::{PipelineError, PipelineResult};
