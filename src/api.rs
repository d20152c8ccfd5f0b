//! User-facing SQL API functions for pg_rollup.
//!
//! All functions are exposed in the `silver` schema and provide the primary
//! interface for processing rollups, onboarding source tables, advancing
//! the retry queue, validating configuration, and scheduling.
//!
//! Each function is a thin wrapper delegating to an `_impl` returning
//! `Result`; failures surface as PostgreSQL errors at this boundary.

use pgrx::prelude::*;

use crate::bootstrap;
use crate::catalog::{DimensionConfig, RollupConfig};
use crate::error::PgRollupError;
use crate::inspect;
use crate::orchestrator;
use crate::plan::parse_qualified_name;

/// Fixed pg_cron job names; registration is idempotent on these.
const CRON_JOBS: [(&str, &str); 3] = [
    ("pg_rollup_perform", "SELECT silver.perform_rollup()"),
    ("pg_rollup_retries", "SELECT silver.handle_retries()"),
    (
        "pg_rollup_maintenance",
        "SELECT silver.maintain_timeseries_tables()",
    ),
];

/// Process all active rollup configs, or just one source table.
///
/// Returns the number of configs that executed a window. Intended to be
/// invoked every minute by the external scheduler.
#[pg_extern(schema = "silver")]
fn perform_rollup(source_table: default!(Option<&str>, "NULL")) -> i64 {
    match orchestrator::perform_rollup_impl(source_table) {
        Ok(n) => n,
        Err(e) => pgrx::error!("{}", e),
    }
}

/// Advance the retry queue: re-run every config whose backoff has elapsed.
///
/// Returns the number of configs swept. Intended to be invoked every five
/// minutes by the external scheduler.
#[pg_extern(schema = "silver")]
fn handle_retries() -> i64 {
    match orchestrator::handle_retries_impl() {
        Ok(n) => n,
        Err(e) => pgrx::error!("{}", e),
    }
}

/// Create a rollup target table for `source` and register its config.
///
/// # Arguments
/// - `source`: qualified source table (`'raw.metrics'`).
/// - `target_schema` / `target_name`: where the rollup target is created.
/// - `rollup_interval`: bucket width, e.g. `'1 hour'`.
/// - `look_back_window`: how far back the first run reaches.
/// - `retention_period`: handed to the partition manager.
/// - `processing_window`: initial adaptive batch width.
/// - `initial_status`: `'idle'` (normal) or `'processing'` (start paused
///   under a synthetic lease — operators releasing it manually).
/// - `is_active`: whether the orchestrator picks the config up.
#[pg_extern(schema = "silver")]
#[allow(clippy::too_many_arguments)]
fn create_rollup_table(
    source: &str,
    target_schema: &str,
    target_name: &str,
    rollup_interval: &str,
    look_back_window: default!(&str, "'1 hour'"),
    retention_period: default!(&str, "'90 days'"),
    processing_window: default!(&str, "'1 hour'"),
    initial_status: default!(&str, "'idle'"),
    is_active: default!(bool, true),
) -> String {
    match bootstrap::create_rollup_table_impl(
        source,
        target_schema,
        target_name,
        rollup_interval,
        look_back_window,
        retention_period,
        processing_window,
        initial_status,
        is_active,
    ) {
        Ok(target) => target,
        Err(e) => pgrx::error!("{}", e),
    }
}

/// Reconcile chunk intervals with observed ingest and run partition
/// maintenance. Returns the number of reconciled configs.
#[pg_extern(schema = "silver")]
fn maintain_timeseries_tables(target: default!(Option<&str>, "NULL")) -> i64 {
    match bootstrap::maintain_timeseries_tables_impl(target) {
        Ok(n) => n,
        Err(e) => pgrx::error!("{}", e),
    }
}

// ── Validation ─────────────────────────────────────────────────────────────

/// Validate every active rollup config.
///
/// Checks that the target exists, the source carries a timestamp column,
/// and every declared dimension exists on the target. Returns one row per
/// config; no state is changed.
#[pg_extern(schema = "silver")]
fn validate_rollup_config() -> TableIterator<
    'static,
    (
        name!(source_table, String),
        name!(target_table, String),
        name!(is_valid, bool),
        name!(message, String),
    ),
> {
    let rows = match validate_rollup_config_impl() {
        Ok(rows) => rows,
        Err(e) => pgrx::error!("{}", e),
    };
    TableIterator::new(rows)
}

fn validate_rollup_config_impl() -> Result<Vec<(String, String, bool, String)>, PgRollupError> {
    let configs = RollupConfig::get_all_active()?;
    let mut out = Vec::with_capacity(configs.len());

    for cfg in configs {
        let mut issues: Vec<String> = Vec::new();

        if !inspect::table_exists(&cfg.source_table)? {
            issues.push("Source table does not exist".to_string());
        } else {
            let source_cols = inspect::table_columns(&cfg.source_table)?;
            let has_ts = source_cols.iter().any(|c| {
                c.name == inspect::TIMESTAMP_COLUMN
                    && c.class == inspect::ColumnClass::Timestamp
            });
            if !has_ts {
                issues.push("Source table has no timestamp column".to_string());
            }
        }

        if !inspect::table_exists(&cfg.target_table)? {
            issues.push("Target table does not exist".to_string());
        } else {
            let target_cols = inspect::table_columns(&cfg.target_table)?;
            let declared = DimensionConfig::active_dimensions(&cfg.source_table)?;
            let missing: Vec<String> = declared
                .into_iter()
                .filter(|d| !target_cols.iter().any(|c| &c.name == d))
                .collect();
            if !missing.is_empty() {
                issues.push(format!(
                    "Missing dimension columns in target table: {}",
                    missing.join(", ")
                ));
            }
        }

        let is_valid = issues.is_empty();
        let message = if is_valid {
            "OK".to_string()
        } else {
            issues.join("; ")
        };
        out.push((cfg.source_table, cfg.target_table, is_valid, message));
    }

    Ok(out)
}

// ── Dimension & lifecycle helpers ──────────────────────────────────────────

/// Declare a dimension column for a source table.
///
/// The column becomes part of the GROUP BY key for every rollup of this
/// source. Takes effect for targets created afterwards; existing targets
/// keep their primary key.
#[pg_extern(schema = "silver")]
fn add_rollup_dimension(source_table: &str, dimension_column: &str) {
    if dimension_column.trim().is_empty() {
        pgrx::error!("{}", PgRollupError::InvalidArgument("empty dimension column".into()));
    }
    if let Err(e) = DimensionConfig::add(source_table, dimension_column) {
        pgrx::error!("{}", e);
    }
}

/// Deactivate a declared dimension for a source table.
#[pg_extern(schema = "silver")]
fn remove_rollup_dimension(source_table: &str, dimension_column: &str) {
    if let Err(e) = DimensionConfig::remove(source_table, dimension_column) {
        pgrx::error!("{}", e);
    }
}

/// Pause or resume a rollup config.
#[pg_extern(schema = "silver")]
fn set_rollup_active(source_table: &str, target_table: &str, active: bool) {
    if let Err(e) = RollupConfig::set_active(source_table, target_table, active) {
        pgrx::error!("{}", e);
    }
}

// ── Partition statistics ───────────────────────────────────────────────────

/// Per-partition statistics for one partitioned rollup target.
#[pg_extern(schema = "silver")]
fn get_partition_stats(
    table_name: &str,
) -> TableIterator<
    'static,
    (
        name!(partition_name, String),
        name!(total_bytes, i64),
        name!(row_estimate, i64),
    ),
> {
    // Validate the name shape before handing it to the catalog query.
    if let Err(e) = parse_qualified_name(table_name) {
        pgrx::error!("{}", e);
    }
    let rows = match bootstrap::partition_stats(table_name) {
        Ok(rows) => rows,
        Err(e) => pgrx::error!("{}", e),
    };
    TableIterator::new(rows)
}

/// Aggregated partition statistics for every parent matching a LIKE pattern.
#[pg_extern(schema = "silver")]
fn get_detailed_stats(
    pattern: default!(&str, "'%'"),
) -> TableIterator<
    'static,
    (
        name!(table_name, String),
        name!(partition_count, i64),
        name!(total_bytes, i64),
        name!(row_estimate, i64),
    ),
> {
    let rows = match bootstrap::detailed_stats(pattern) {
        Ok(rows) => rows,
        Err(e) => pgrx::error!("{}", e),
    };
    TableIterator::new(rows)
}

// ── Scheduler registration (pg_cron) ───────────────────────────────────────

/// Whether pg_cron is installed in this database.
fn cron_installed() -> Result<bool, PgRollupError> {
    Spi::get_one::<bool>("SELECT EXISTS(SELECT 1 FROM pg_extension WHERE extname = 'pg_cron')")
        .map_err(|e| PgRollupError::SpiError(e.to_string()))
        .map(|opt| opt.unwrap_or(false))
}

/// Register the three pg_cron jobs under fixed names, replacing any prior
/// registration of the same name. Idempotent: calling twice leaves exactly
/// one job per name.
#[pg_extern(schema = "silver")]
fn schedule_rollup_jobs(
    perform_schedule: default!(&str, "'* * * * *'"),
    retry_schedule: default!(&str, "'*/5 * * * *'"),
    maintenance_schedule: default!(&str, "'3 3 * * *'"),
) -> i64 {
    match schedule_rollup_jobs_impl(perform_schedule, retry_schedule, maintenance_schedule) {
        Ok(n) => n,
        Err(e) => pgrx::error!("{}", e),
    }
}

fn schedule_rollup_jobs_impl(
    perform_schedule: &str,
    retry_schedule: &str,
    maintenance_schedule: &str,
) -> Result<i64, PgRollupError> {
    if !cron_installed()? {
        return Err(PgRollupError::InvalidArgument(
            "pg_cron is not installed; install it or invoke \
             silver.perform_rollup() from an external scheduler"
                .into(),
        ));
    }

    let schedules = [perform_schedule, retry_schedule, maintenance_schedule];
    for ((job_name, command), schedule) in CRON_JOBS.iter().zip(schedules) {
        // Unschedule-then-schedule keeps registration idempotent on the
        // job name even across pg_cron versions that allow duplicates.
        Spi::run_with_args(
            "SELECT cron.unschedule(jobid) FROM cron.job WHERE jobname = $1",
            &[(*job_name).into()],
        )
        .map_err(|e| PgRollupError::SpiError(e.to_string()))?;

        Spi::run_with_args(
            "SELECT cron.schedule($1, $2, $3)",
            &[(*job_name).into(), schedule.into(), (*command).into()],
        )
        .map_err(|e| PgRollupError::SpiError(e.to_string()))?;
    }

    log!(
        "pg_rollup: scheduled jobs (perform='{}', retries='{}', maintenance='{}')",
        perform_schedule,
        retry_schedule,
        maintenance_schedule,
    );
    Ok(CRON_JOBS.len() as i64)
}

/// Remove the pg_cron jobs registered by [`schedule_rollup_jobs`].
#[pg_extern(schema = "silver")]
fn unschedule_rollup_jobs() -> i64 {
    match unschedule_rollup_jobs_impl() {
        Ok(n) => n,
        Err(e) => pgrx::error!("{}", e),
    }
}

fn unschedule_rollup_jobs_impl() -> Result<i64, PgRollupError> {
    if !cron_installed()? {
        return Ok(0);
    }

    let mut removed = 0i64;
    for (job_name, _) in CRON_JOBS {
        let n = Spi::get_one_with_args::<i64>(
            "SELECT count(cron.unschedule(jobid))::int8 FROM cron.job WHERE jobname = $1",
            &[job_name.into()],
        )
        .map_err(|e| PgRollupError::SpiError(e.to_string()))?
        .unwrap_or(0);
        removed += n;
    }
    Ok(removed)
}
