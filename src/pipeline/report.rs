//! Funnel configuration and run orchestration.
//!
//! [`run_funnel`] wires the stages into one batch run: flatten the raw
//! payloads, bucket every timestamp source with the same offset, compute the
//! per-metric aggregates (strictly building the intake reference set before
//! the accept counters that depend on it), and outer-merge everything into
//! the wide hourly table.
//!
//! Configuration is stored in TOML. Defaults mirror the legacy exports this
//! pipeline replaced:
//!
//! ```toml
//! json_column = "other_data"
//! utc_offset = "+05:30"
//! entity_column = "astrologerId"
//!
//! [events]
//! intake = "chat_intake_submit"
//! accept = "accept_chat"
//! cancel = "chat_cancel"
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::frame::Frame;

use super::PipelineResult;
use super::bucket::{DATE_COL, HOUR_COL, TimestampPolicy, UtcOffset, with_hour_buckets};
use super::count::{Predicate, count_distinct, distinct_values, filter};
use super::flatten::{FlattenPolicy, flatten_json_column};
use super::latency::{LatencySpec, mean_latency};
use super::merge::{enrich_left, outer_merge};

pub const METRIC_INTAKE_REQUESTS: &str = "chat_intake_requests";
pub const METRIC_INTAKE_SUBMITS: &str = "chat_intake_submits";
pub const METRIC_ACCEPTED: &str = "chat_accepted";
pub const METRIC_ACCEPT_TOTAL: &str = "chat_accept_total";
pub const METRIC_COMPLETED: &str = "chat_completed";
pub const METRIC_PAID_COMPLETED: &str = "paid_chats_completed";
pub const METRIC_CANCELLED: &str = "cancelled_requests";
pub const METRIC_AVG_TIME_TO_CANCEL: &str = "avg_time_diff_minutes";

/// Errors loading a [`FunnelConfig`] from disk.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Full configuration for one funnel run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FunnelConfig {
    /// Name of the JSON payload column on the raw event table.
    pub json_column: String,
    /// Offset applied to every timestamp source before bucketing.
    pub utc_offset: UtcOffset,
    pub flatten: FlattenPolicy,
    pub timestamps: TimestampPolicy,
    /// Entity id column (available after flattening) scoping every bucket;
    /// `None` produces global `(date, hour)` buckets.
    pub entity_column: Option<String>,
    pub events: EventNames,
    pub raw_columns: RawColumns,
    pub outcome_columns: OutcomeColumns,
    pub completed: CompletedFilter,
    pub metadata: MetadataSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventNames {
    pub intake: String,
    pub accept: String,
    pub cancel: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawColumns {
    pub event_name: String,
    pub event_time: String,
    /// Submitting actor id.
    pub user_id: String,
    /// Accepting-side actor id (the astrologer-side export logs the client
    /// under a different column).
    pub accept_actor: String,
    /// Request/ticket id, for occurrence-volume counts.
    pub ticket: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutcomeColumns {
    pub status: String,
    /// Column holding the FREE/PAID kind; named `type` in the export.
    pub kind: String,
    pub created_at: String,
    pub user_id: String,
    /// Entity id column when the outcome export carries one.
    pub entity: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompletedFilter {
    pub status: String,
    /// Kinds counted as completed.
    pub kinds: Vec<String>,
    /// Kind counted as paid.
    pub paid_kind: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataSpec {
    /// Key column on the entity metadata table.
    pub entity_column: String,
    /// Metadata columns to keep on the final table; empty keeps all.
    pub keep: Vec<String>,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        FunnelConfig {
            json_column: "other_data".into(),
            utc_offset: UtcOffset::new(5, 30),
            flatten: FlattenPolicy::default(),
            timestamps: TimestampPolicy::default(),
            entity_column: None,
            events: EventNames::default(),
            raw_columns: RawColumns::default(),
            outcome_columns: OutcomeColumns::default(),
            completed: CompletedFilter::default(),
            metadata: MetadataSpec::default(),
        }
    }
}

impl Default for EventNames {
    fn default() -> Self {
        EventNames {
            intake: "chat_intake_submit".into(),
            accept: "accept_chat".into(),
            cancel: "chat_cancel".into(),
        }
    }
}

impl Default for RawColumns {
    fn default() -> Self {
        RawColumns {
            event_name: "event_name".into(),
            event_time: "event_time".into(),
            user_id: "user_id".into(),
            accept_actor: "clientId".into(),
            ticket: "waitingListId".into(),
        }
    }
}

impl Default for OutcomeColumns {
    fn default() -> Self {
        OutcomeColumns {
            status: "status".into(),
            kind: "type".into(),
            created_at: "createdAt".into(),
            user_id: "userId".into(),
            entity: None,
        }
    }
}

impl Default for CompletedFilter {
    fn default() -> Self {
        CompletedFilter {
            status: "COMPLETED".into(),
            kinds: vec!["FREE".into(), "PAID".into()],
            paid_kind: "PAID".into(),
        }
    }
}

impl Default for MetadataSpec {
    fn default() -> Self {
        MetadataSpec {
            entity_column: "_id".into(),
            keep: Vec::new(),
        }
    }
}

impl FunnelConfig {
    pub fn from_toml_path(path: &Path) -> Result<FunnelConfig, ConfigError> {
        Ok(toml::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// Run the whole funnel over in-memory tables and return the wide hourly
/// rollup: bucket key columns, then the metrics in their fixed order, then
/// (when metadata is supplied in entity-scoped mode) metadata columns.
pub fn run_funnel(
    raw: &Frame,
    outcomes: &Frame,
    metadata: Option<&Frame>,
    cfg: &FunnelConfig,
) -> PipelineResult<Frame> {
    let rc = &cfg.raw_columns;
    let oc = &cfg.outcome_columns;

    let flat = flatten_json_column(raw, &cfg.json_column, cfg.flatten)?;
    let raw_b = with_hour_buckets(&flat, &rc.event_time, cfg.utc_offset, cfg.timestamps)?;

    let mut key_cols: Vec<&str> = Vec::new();
    if let Some(entity) = cfg.entity_column.as_deref() {
        key_cols.push(entity);
    }
    key_cols.push(DATE_COL);
    key_cols.push(HOUR_COL);

    // Intake metrics: distinct submitting actors and distinct tickets.
    let intake_pred = Predicate::new().eq(rc.event_name.as_str(), cfg.events.intake.as_str());
    let intake_users =
        count_distinct(&raw_b, &intake_pred, &key_cols, &rc.user_id, METRIC_INTAKE_REQUESTS)?;
    let intake_submits =
        count_distinct(&raw_b, &intake_pred, &key_cols, &rc.ticket, METRIC_INTAKE_SUBMITS)?;

    // The accept counters only admit actors already present in the intake
    // stream; the reference set must exist before they run.
    let intake_actors = distinct_values(&raw_b, &intake_pred, &rc.user_id)?;
    let accept_pred = Predicate::new()
        .eq(rc.event_name.as_str(), cfg.events.accept.as_str())
        .in_set(rc.accept_actor.as_str(), intake_actors);
    let accepted =
        count_distinct(&raw_b, &accept_pred, &key_cols, &rc.accept_actor, METRIC_ACCEPTED)?;
    let accept_total =
        count_distinct(&raw_b, &accept_pred, &key_cols, &rc.ticket, METRIC_ACCEPT_TOTAL)?;

    // Outcome metrics. Same offset as the event stream so every aggregate
    // shares one local-hour partition.
    let outcomes_b = with_hour_buckets(outcomes, &oc.created_at, cfg.utc_offset, cfg.timestamps)?;
    let out_entity = match (cfg.entity_column.as_deref(), oc.entity.as_deref()) {
        (Some(_), Some(e)) => Some(e),
        _ => None,
    };
    let mut out_keys: Vec<&str> = Vec::new();
    if let Some(e) = out_entity {
        out_keys.push(e);
    }
    out_keys.push(DATE_COL);
    out_keys.push(HOUR_COL);

    let completed_pred = Predicate::new()
        .eq(oc.status.as_str(), cfg.completed.status.as_str())
        .is_in(oc.kind.as_str(), cfg.completed.kinds.iter().map(String::as_str));
    let paid_pred = Predicate::new()
        .eq(oc.status.as_str(), cfg.completed.status.as_str())
        .eq(oc.kind.as_str(), cfg.completed.paid_kind.as_str());
    let completed = align_entity(
        count_distinct(&outcomes_b, &completed_pred, &out_keys, &oc.user_id, METRIC_COMPLETED)?,
        out_entity,
        cfg.entity_column.as_deref(),
    )?;
    let paid = align_entity(
        count_distinct(&outcomes_b, &paid_pred, &out_keys, &oc.user_id, METRIC_PAID_COMPLETED)?,
        out_entity,
        cfg.entity_column.as_deref(),
    )?;

    // Cancellation metrics: a cancelled request is attributed to the hour it
    // was submitted, so both the count and the mean time-to-cancel come from
    // the intake↔cancel correlation, bucketed by the intake event.
    let cancel_pred = Predicate::new().eq(rc.event_name.as_str(), cfg.events.cancel.as_str());
    let starts = filter(&raw_b, &intake_pred)?;
    let ends = filter(&raw_b, &cancel_pred)?;
    let latency_spec = LatencySpec {
        actor: (&rc.user_id, &rc.user_id),
        entity: cfg.entity_column.as_deref().map(|e| (e, e)),
        timestamp: (&rc.event_time, &rc.event_time),
        group_columns: &key_cols,
        count_column: Some(METRIC_CANCELLED),
        out_column: METRIC_AVG_TIME_TO_CANCEL,
        policy: cfg.timestamps,
    };
    let cancellations = mean_latency(&starts, &ends, &latency_spec)?;

    let tables = vec![
        intake_users,
        intake_submits,
        accepted,
        accept_total,
        completed,
        paid,
        cancellations,
    ];
    let mut merged = outer_merge(&tables, &key_cols)?;

    if let (Some(meta), Some(entity)) = (metadata, cfg.entity_column.as_deref()) {
        let aggregate_cols: Vec<String> = merged.column_names().to_vec();
        merged = enrich_left(&merged, meta, (entity, &cfg.metadata.entity_column))?;
        if !cfg.metadata.keep.is_empty() {
            let order: Vec<&str> = aggregate_cols
                .iter()
                .map(String::as_str)
                .chain(cfg.metadata.keep.iter().map(String::as_str))
                .collect();
            merged = merged.select(&order)?;
        }
    }

    info!(
        rows = merged.n_rows(),
        cols = merged.n_cols(),
        entity_scoped = cfg.entity_column.is_some(),
        "funnel rollup complete"
    );
    Ok(merged)
}

/// Rename an outcome aggregate's entity key to the raw-side entity column
/// name so the merge joins on one shared name.
fn align_entity(
    frame: Frame,
    from: Option<&str>,
    to: Option<&str>,
) -> PipelineResult<Frame> {
    match (from, to) {
        (Some(f), Some(t)) if f != t => Ok(frame.renamed(f, t)?),
        _ => Ok(frame),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
