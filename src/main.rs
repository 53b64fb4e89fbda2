use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_funnel_rollup::cli::{Cli, Command};
use chat_funnel_rollup::io::{read_csv, write_csv};
use chat_funnel_rollup::pipeline::bucket::TimestampPolicy;
use chat_funnel_rollup::pipeline::flatten::{FlattenPolicy, flatten_json_column};
use chat_funnel_rollup::pipeline::report::{FunnelConfig, run_funnel};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Run {
            raw,
            outcomes,
            entities,
            config,
            out,
            offset,
            json_column,
            entity_column,
            strict_json,
            strict_timestamps,
        } => run(
            &raw,
            &outcomes,
            entities.as_deref(),
            config.as_deref(),
            &out,
            offset,
            json_column,
            entity_column,
            strict_json,
            strict_timestamps,
        ),
        Command::Flatten {
            input,
            json_column,
            out,
            strict_json,
        } => flatten(&input, &json_column, &out, strict_json),
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    raw_path: &Path,
    outcomes_path: &Path,
    entities_path: Option<&Path>,
    config_path: Option<&Path>,
    out_path: &Path,
    offset: Option<String>,
    json_column: Option<String>,
    entity_column: Option<String>,
    strict_json: bool,
    strict_timestamps: bool,
) -> anyhow::Result<()> {
    let mut cfg = match config_path {
        Some(path) => FunnelConfig::from_toml_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FunnelConfig::default(),
    };
    if let Some(offset) = offset {
        cfg.utc_offset = offset.parse()?;
    }
    if let Some(column) = json_column {
        cfg.json_column = column;
    }
    if let Some(column) = entity_column {
        cfg.entity_column = Some(column);
    }
    if strict_json {
        cfg.flatten = FlattenPolicy::Strict;
    }
    if strict_timestamps {
        cfg.timestamps = TimestampPolicy::Fail;
    }

    let raw = read_csv(raw_path)?;
    let outcomes = read_csv(outcomes_path)?;
    let entities = entities_path.map(read_csv).transpose()?;
    info!(
        raw_rows = raw.n_rows(),
        outcome_rows = outcomes.n_rows(),
        "loaded input tables"
    );

    let rollup = run_funnel(&raw, &outcomes, entities.as_ref(), &cfg)?;
    write_csv(&rollup, out_path)?;
    println!(
        "wrote {} rows x {} columns to {}",
        rollup.n_rows(),
        rollup.n_cols(),
        out_path.display()
    );
    Ok(())
}

fn flatten(input: &Path, json_column: &str, out: &Path, strict_json: bool) -> anyhow::Result<()> {
    let policy = if strict_json {
        FlattenPolicy::Strict
    } else {
        FlattenPolicy::Lenient
    };
    let frame = read_csv(input)?;
    let combined = flatten_json_column(&frame, json_column, policy)?;
    write_csv(&combined, out)?;
    println!(
        "wrote {} rows x {} columns to {}",
        combined.n_rows(),
        combined.n_cols(),
        out.display()
    );
    Ok(())
}
