//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "cfr",
    version,
    about = "Hourly per-astrologer funnel rollups from raw chat event logs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full funnel: flatten, bucket, count, correlate, merge.
    Run {
        /// Raw event CSV (one row per user action, JSON payload column).
        #[arg(long)]
        raw: PathBuf,

        /// Chat-completion outcome CSV.
        #[arg(long)]
        outcomes: PathBuf,

        /// Optional entity metadata CSV for enriching the final table.
        #[arg(long)]
        entities: Option<PathBuf>,

        /// TOML pipeline configuration; flags below override file values.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output CSV path.
        #[arg(long, default_value = "funnel_hourly.csv")]
        out: PathBuf,

        /// UTC offset applied before bucketing, e.g. +05:30.
        #[arg(long)]
        offset: Option<String>,

        /// Name of the JSON payload column on the raw table.
        #[arg(long)]
        json_column: Option<String>,

        /// Entity id column (post-flatten) scoping every bucket.
        #[arg(long)]
        entity_column: Option<String>,

        /// Abort on the first malformed JSON payload instead of skipping it.
        #[arg(long)]
        strict_json: bool,

        /// Abort on the first unparseable timestamp instead of excluding
        /// the row from aggregation.
        #[arg(long)]
        strict_timestamps: bool,
    },

    /// Flatten the JSON payload column of a CSV and write the combined file.
    Flatten {
        /// Input CSV.
        #[arg(long)]
        input: PathBuf,

        /// Name of the JSON payload column.
        #[arg(long, default_value = "other_data")]
        json_column: String,

        /// Output CSV path.
        #[arg(long, default_value = "combined_data.csv")]
        out: PathBuf,

        /// Abort on the first malformed payload.
        #[arg(long)]
        strict_json: bool,
    },
}
