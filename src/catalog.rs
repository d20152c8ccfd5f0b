//! Catalog layer — metadata tables and CRUD operations for rollup configs.
//!
//! All catalog access goes through PostgreSQL's SPI interface. This module
//! provides typed Rust abstractions over `silver.rollup_configs`,
//! `silver.rollup_dimensions`, `silver.rollup_refresh_log`, and
//! `silver.rollup_errors`.
//!
//! Timestamps cross the SQL boundary as Unix-epoch microseconds (`i64`),
//! converted with `EXTRACT(EPOCH FROM …)` on the way out and
//! `to_timestamp(…)` on the way in, so the window controller stays pure.

use pgrx::prelude::*;
use pgrx::spi::SpiHeapTupleData;

use crate::error::{PgRollupError, SqlFailure};

/// Lease status of a rollup config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    Idle,
    Processing,
}

impl LeaseStatus {
    /// Serialize to the SQL CHECK constraint value.
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatus::Idle => "idle",
            LeaseStatus::Processing => "processing",
        }
    }

    /// Deserialize from SQL string. Falls back to `Idle` for unknown values.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "processing" => LeaseStatus::Processing,
            _ => LeaseStatus::Idle,
        }
    }
}

impl std::fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One rollup configuration, mirrors `silver.rollup_configs`.
///
/// Interval columns are carried both as seconds (for the window controller)
/// and as their `::text` rendering where the plan needs a trusted literal.
#[derive(Debug, Clone)]
pub struct RollupConfig {
    pub id: i64,
    pub source_table: String,
    pub target_table: String,
    pub is_active: bool,
    pub rollup_interval_secs: i64,
    /// `rollup_interval::text`, used as the trusted interval literal.
    pub rollup_interval_text: String,
    pub look_back_secs: i64,
    pub max_look_back_secs: i64,
    pub processing_window_secs: i64,
    pub chunk_interval_text: String,
    pub retention_text: String,
    /// Inclusive upper watermark of the last successful run, epoch µs.
    pub last_processed_us: Option<i64>,
    pub status: LeaseStatus,
    pub worker_id: Option<String>,
    pub started_at_us: Option<i64>,
    /// EWMA of wall seconds per window.
    pub avg_processing_secs: Option<f64>,
    pub last_processed_rows: Option<i64>,
    pub retry_count: i32,
    pub next_retry_us: Option<i64>,
    pub max_execution_secs: i64,
    pub alert_threshold_secs: i64,
}

/// Shared SELECT list for loading a [`RollupConfig`]; must stay in step
/// with [`RollupConfig::from_spi_row`].
pub const CONFIG_COLUMNS: &str = "id, source_table, target_table, is_active, \
     EXTRACT(EPOCH FROM rollup_interval)::int8, \
     rollup_interval::text, \
     EXTRACT(EPOCH FROM look_back_window)::int8, \
     EXTRACT(EPOCH FROM max_look_back_window)::int8, \
     EXTRACT(EPOCH FROM processing_window)::int8, \
     chunk_interval::text, \
     retention_period::text, \
     (EXTRACT(EPOCH FROM last_processed_time) * 1000000)::int8, \
     status, worker_id, \
     (EXTRACT(EPOCH FROM started_at) * 1000000)::int8, \
     avg_processing_time, last_processed_rows, retry_count, \
     (EXTRACT(EPOCH FROM next_retry_time) * 1000000)::int8, \
     EXTRACT(EPOCH FROM max_execution_time)::int8, \
     EXTRACT(EPOCH FROM alert_threshold)::int8";

impl RollupConfig {
    /// Extract a RollupConfig from an SPI row positioned on [`CONFIG_COLUMNS`].
    pub fn from_spi_row(row: &SpiHeapTupleData<'_>) -> Result<Self, PgRollupError> {
        let map_spi = |e: pgrx::spi::SpiError| PgRollupError::SpiError(e.to_string());

        let id = row
            .get::<i64>(1)
            .map_err(map_spi)?
            .ok_or_else(|| PgRollupError::InternalError("id is NULL".into()))?;
        let source_table = row
            .get::<String>(2)
            .map_err(map_spi)?
            .ok_or_else(|| PgRollupError::InternalError("source_table is NULL".into()))?;
        let target_table = row
            .get::<String>(3)
            .map_err(map_spi)?
            .ok_or_else(|| PgRollupError::InternalError("target_table is NULL".into()))?;
        let is_active = row.get::<bool>(4).map_err(map_spi)?.unwrap_or(false);
        let rollup_interval_secs = row.get::<i64>(5).map_err(map_spi)?.unwrap_or(0);
        let rollup_interval_text = row.get::<String>(6).map_err(map_spi)?.unwrap_or_default();
        let look_back_secs = row.get::<i64>(7).map_err(map_spi)?.unwrap_or(0);
        let max_look_back_secs = row.get::<i64>(8).map_err(map_spi)?.unwrap_or(0);
        let processing_window_secs = row.get::<i64>(9).map_err(map_spi)?.unwrap_or(0);
        let chunk_interval_text = row.get::<String>(10).map_err(map_spi)?.unwrap_or_default();
        let retention_text = row.get::<String>(11).map_err(map_spi)?.unwrap_or_default();
        let last_processed_us = row.get::<i64>(12).map_err(map_spi)?;
        let status_str = row
            .get::<String>(13)
            .map_err(map_spi)?
            .unwrap_or_else(|| "idle".into());
        let worker_id = row.get::<String>(14).map_err(map_spi)?;
        let started_at_us = row.get::<i64>(15).map_err(map_spi)?;
        let avg_processing_secs = row.get::<f64>(16).map_err(map_spi)?;
        let last_processed_rows = row.get::<i64>(17).map_err(map_spi)?;
        let retry_count = row.get::<i32>(18).map_err(map_spi)?.unwrap_or(0);
        let next_retry_us = row.get::<i64>(19).map_err(map_spi)?;
        let max_execution_secs = row.get::<i64>(20).map_err(map_spi)?.unwrap_or(0);
        let alert_threshold_secs = row.get::<i64>(21).map_err(map_spi)?.unwrap_or(0);

        Ok(RollupConfig {
            id,
            source_table,
            target_table,
            is_active,
            rollup_interval_secs,
            rollup_interval_text,
            look_back_secs,
            max_look_back_secs,
            processing_window_secs,
            chunk_interval_text,
            retention_text,
            last_processed_us,
            status: LeaseStatus::from_str(&status_str),
            worker_id,
            started_at_us,
            avg_processing_secs,
            last_processed_rows,
            retry_count,
            next_retry_us,
            max_execution_secs,
            alert_threshold_secs,
        })
    }

    /// Load the candidate set for one `perform_rollup` invocation.
    ///
    /// Active configs, optionally filtered to one source table, whose lease
    /// is free (or stale past `alert_threshold`) and which are not sitting
    /// in a retry-backoff window. Ordered oldest progress first so starved
    /// configs are served before fresh ones.
    pub fn load_candidates(specific_table: Option<&str>) -> Result<Vec<Self>, PgRollupError> {
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM silver.rollup_configs \
             WHERE is_active \
               AND ($1::text IS NULL OR source_table = $1) \
               AND (status = 'idle' \
                    OR (status = 'processing' AND started_at < now() - alert_threshold)) \
               AND (next_retry_time IS NULL OR next_retry_time <= now()) \
             ORDER BY last_processed_time ASC NULLS FIRST",
        );

        Spi::connect(|client| {
            let table = client
                .select(&sql, None, &[specific_table.into()])
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?;

            let mut result = Vec::new();
            for row in table {
                match Self::from_spi_row(&row) {
                    Ok(cfg) => result.push(cfg),
                    Err(e) => {
                        pgrx::warning!("pg_rollup: skipping corrupted config row: {}", e);
                    }
                }
            }
            Ok(result)
        })
    }

    /// Get all active configs, regardless of lease or retry state.
    pub fn get_all_active() -> Result<Vec<Self>, PgRollupError> {
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM silver.rollup_configs \
             WHERE is_active ORDER BY source_table, target_table",
        );
        Spi::connect(|client| {
            let table = client
                .select(&sql, None, &[])
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?;

            let mut result = Vec::new();
            for row in table {
                match Self::from_spi_row(&row) {
                    Ok(cfg) => result.push(cfg),
                    Err(e) => {
                        pgrx::warning!("pg_rollup: skipping corrupted config row: {}", e);
                    }
                }
            }
            Ok(result)
        })
    }

    /// Look up a config by its (source, target) pair.
    pub fn get_by_pair(source: &str, target: &str) -> Result<Self, PgRollupError> {
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM silver.rollup_configs \
             WHERE source_table = $1 AND target_table = $2",
        );
        Spi::connect(|client| {
            let table = client
                .select(&sql, None, &[source.into(), target.into()])
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?;
            for row in table {
                return Self::from_spi_row(&row);
            }
            Err(PgRollupError::NotFound(format!("{} -> {}", source, target)))
        })
    }

    /// Insert a new config row. Returns the assigned `id`.
    ///
    /// `max_look_back_window` is derived as four look-back windows (at
    /// least one day) so the adaptive window has room to grow.
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        source_table: &str,
        target_table: &str,
        rollup_interval: &str,
        look_back_window: &str,
        processing_window: &str,
        chunk_interval: &str,
        retention_period: &str,
        initial_status: &str,
        is_active: bool,
    ) -> Result<i64, PgRollupError> {
        Spi::get_one_with_args::<i64>(
            "INSERT INTO silver.rollup_configs \
             (source_table, target_table, rollup_interval, look_back_window, \
              max_look_back_window, processing_window, chunk_interval, \
              retention_period, status, is_active) \
             VALUES ($1, $2, $3::interval, $4::interval, \
                     GREATEST($4::interval * 4, INTERVAL '1 day'), \
                     $5::interval, $6::interval, $7::interval, $8, $9) \
             RETURNING id",
            &[
                source_table.into(),
                target_table.into(),
                rollup_interval.into(),
                look_back_window.into(),
                processing_window.into(),
                chunk_interval.into(),
                retention_period.into(),
                initial_status.into(),
                is_active.into(),
            ],
        )
        .map_err(|e| PgRollupError::SpiError(e.to_string()))?
        .ok_or_else(|| PgRollupError::InternalError("INSERT did not return id".into()))
    }

    /// Record a successful run and release the lease in one guarded update.
    ///
    /// The `worker_id` guard makes progress and release atomic: if the
    /// lease was taken over mid-run, zero rows match and the caller must
    /// not assume its progress was written.
    #[allow(clippy::too_many_arguments)]
    pub fn record_success(
        id: i64,
        worker_id: &str,
        window_end_us: i64,
        new_processing_window_secs: i64,
        new_avg_processing_secs: f64,
        rows_processed: i64,
    ) -> Result<(), PgRollupError> {
        let updated = Spi::connect_mut(|client| {
            client
                .update(
                    "UPDATE silver.rollup_configs SET \
                     last_processed_time = to_timestamp($3::double precision / 1000000.0), \
                     processing_window = make_interval(secs => $4), \
                     avg_processing_time = $5, \
                     last_processed_rows = $6, \
                     retry_count = 0, last_error_time = NULL, next_retry_time = NULL, \
                     status = 'idle', worker_id = NULL, started_at = NULL, \
                     updated_at = now() \
                     WHERE id = $1 AND worker_id = $2",
                    None,
                    &[
                        id.into(),
                        worker_id.into(),
                        window_end_us.into(),
                        (new_processing_window_secs as f64).into(),
                        new_avg_processing_secs.into(),
                        rows_processed.into(),
                    ],
                )
                .map(|table| table.len())
                .map_err(|e| PgRollupError::SpiError(e.to_string()))
        })?;

        if updated == 0 {
            return Err(PgRollupError::LeaseLost(format!(
                "config {} was claimed by another worker; progress not written",
                id
            )));
        }
        Ok(())
    }

    /// Record a failed run: advance the backoff schedule and release the
    /// lease, guarded by `worker_id` like [`record_success`].
    ///
    /// `delay_secs` is the precomputed backoff for the post-increment retry
    /// count; `next_retry_time` lands `delay_secs` after the failure.
    pub fn record_failure(
        id: i64,
        worker_id: &str,
        delay_secs: i64,
    ) -> Result<(), PgRollupError> {
        let updated = Spi::connect_mut(|client| {
            client
                .update(
                    "UPDATE silver.rollup_configs SET \
                     retry_count = retry_count + 1, \
                     last_error_time = now(), \
                     next_retry_time = now() + make_interval(secs => $3), \
                     status = 'idle', worker_id = NULL, started_at = NULL, \
                     updated_at = now() \
                     WHERE id = $1 AND worker_id = $2",
                    None,
                    &[id.into(), worker_id.into(), (delay_secs as f64).into()],
                )
                .map(|table| table.len())
                .map_err(|e| PgRollupError::SpiError(e.to_string()))
        })?;

        if updated == 0 {
            return Err(PgRollupError::LeaseLost(format!(
                "config {} was claimed by another worker; failure not recorded",
                id
            )));
        }
        Ok(())
    }

    /// Sweep configs whose retry backoff has elapsed: reset their lease to
    /// idle and return the source tables to re-run.
    ///
    /// A fresh lease held by a live worker is left alone — that worker
    /// already owns the retry; only idle and stale-leased rows are reset.
    pub fn due_retries() -> Result<Vec<String>, PgRollupError> {
        Spi::connect_mut(|client| {
            let table = client
                .update(
                    "UPDATE silver.rollup_configs \
                     SET status = 'idle', worker_id = NULL, started_at = NULL, \
                         updated_at = now() \
                     WHERE retry_count > 0 AND next_retry_time <= now() AND is_active \
                       AND (status = 'idle' \
                            OR (status = 'processing' AND started_at < now() - alert_threshold)) \
                     RETURNING source_table",
                    None,
                    &[],
                )
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?;

            let mut sources = Vec::new();
            for row in table {
                if let Ok(Some(source)) = row.get::<String>(1) {
                    sources.push(source);
                }
            }
            Ok(sources)
        })
    }

    /// Update the stored chunk interval and stamp `last_optimization_time`.
    pub fn update_chunk_interval(id: i64, chunk_interval: &str) -> Result<(), PgRollupError> {
        Spi::run_with_args(
            "UPDATE silver.rollup_configs \
             SET chunk_interval = $1::interval, last_optimization_time = now(), \
                 updated_at = now() \
             WHERE id = $2",
            &[chunk_interval.into(), id.into()],
        )
        .map_err(|e| PgRollupError::SpiError(e.to_string()))
    }

    /// Activate or deactivate a config.
    pub fn set_active(source: &str, target: &str, active: bool) -> Result<(), PgRollupError> {
        let updated = Spi::connect_mut(|client| {
            client
                .update(
                    "UPDATE silver.rollup_configs SET is_active = $3, updated_at = now() \
                     WHERE source_table = $1 AND target_table = $2",
                    None,
                    &[source.into(), target.into(), active.into()],
                )
                .map(|table| table.len())
                .map_err(|e| PgRollupError::SpiError(e.to_string()))
        })?;
        if updated == 0 {
            return Err(PgRollupError::NotFound(format!("{} -> {}", source, target)));
        }
        Ok(())
    }
}

// ── Dimension config ───────────────────────────────────────────────────────

/// Declared GROUP BY keys for a source table.
pub struct DimensionConfig;

impl DimensionConfig {
    /// Ordered list of active dimension columns for a source.
    ///
    /// The ordering (dimension_column ascending) is the single source of
    /// dimension order for both the plan builder and the bootstrap primary
    /// key, so the conflict target always matches the declared key.
    pub fn active_dimensions(source_table: &str) -> Result<Vec<String>, PgRollupError> {
        Spi::connect(|client| {
            let table = client
                .select(
                    "SELECT dimension_column FROM silver.rollup_dimensions \
                     WHERE source_table = $1 AND is_active \
                     ORDER BY dimension_column",
                    None,
                    &[source_table.into()],
                )
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?;

            let mut dims = Vec::new();
            for row in table {
                if let Ok(Some(dim)) = row.get::<String>(1) {
                    dims.push(dim);
                }
            }
            Ok(dims)
        })
    }

    /// Declare a dimension column for a source (idempotent upsert).
    pub fn add(source_table: &str, dimension_column: &str) -> Result<(), PgRollupError> {
        Spi::run_with_args(
            "INSERT INTO silver.rollup_dimensions (source_table, dimension_column, is_active) \
             VALUES ($1, $2, true) \
             ON CONFLICT (source_table, dimension_column) DO UPDATE SET is_active = true",
            &[source_table.into(), dimension_column.into()],
        )
        .map_err(|e| PgRollupError::SpiError(e.to_string()))
    }

    /// Deactivate a declared dimension.
    pub fn remove(source_table: &str, dimension_column: &str) -> Result<(), PgRollupError> {
        Spi::run_with_args(
            "UPDATE silver.rollup_dimensions SET is_active = false \
             WHERE source_table = $1 AND dimension_column = $2",
            &[source_table.into(), dimension_column.into()],
        )
        .map_err(|e| PgRollupError::SpiError(e.to_string()))
    }
}

// ── Refresh log ────────────────────────────────────────────────────────────

/// Append-only run audit log.
pub struct RefreshLog;

impl RefreshLog {
    /// Append one refresh record. `start`/`end` are epoch microseconds.
    pub fn append(
        table_name: &str,
        start_us: i64,
        end_us: i64,
        records_processed: i64,
    ) -> Result<(), PgRollupError> {
        Spi::run_with_args(
            "INSERT INTO silver.rollup_refresh_log \
             (table_name, start_time, end_time, records_processed) \
             VALUES ($1, to_timestamp($2::double precision / 1000000.0), \
                     to_timestamp($3::double precision / 1000000.0), $4)",
            &[
                table_name.into(),
                start_us.into(),
                end_us.into(),
                records_processed.into(),
            ],
        )
        .map_err(|e| PgRollupError::SpiError(e.to_string()))
    }
}

// ── Error log ──────────────────────────────────────────────────────────────

/// Append-only error log with full diagnostic context.
pub struct ErrorLog;

impl ErrorLog {
    /// Append one error record. Never fails the caller: a broken error log
    /// must not mask the original failure, so write errors are demoted to
    /// a WARNING.
    pub fn append(source_table: &str, target_table: Option<&str>, failure: &SqlFailure) {
        let result = Spi::run_with_args(
            "INSERT INTO silver.rollup_errors \
             (source_table, target_table, error_message, sql_state, \
              error_detail, error_hint, error_context, attempted_query) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                source_table.into(),
                target_table.into(),
                failure.message.as_str().into(),
                failure.sql_state.as_deref().into(),
                failure.detail.as_deref().into(),
                failure.hint.as_deref().into(),
                failure.context.as_deref().into(),
                failure.attempted_query.as_deref().into(),
            ],
        );
        if let Err(e) = result {
            pgrx::warning!(
                "pg_rollup: failed to write error log for {}: {}",
                source_table,
                e
            );
        }
    }
}

// ── Store probes ───────────────────────────────────────────────────────────

/// Current wall clock as Unix-epoch microseconds, from the store.
///
/// Uses `clock_timestamp()` rather than transaction time so long
/// invocations observe real elapsed time between configs.
pub fn now_us() -> Result<i64, PgRollupError> {
    Spi::get_one::<i64>("SELECT (EXTRACT(EPOCH FROM clock_timestamp()) * 1000000)::int8")
        .map_err(|e| PgRollupError::SpiError(e.to_string()))?
        .ok_or_else(|| PgRollupError::InternalError("clock_timestamp() returned NULL".into()))
}

/// Best-effort count of active peer client sessions.
///
/// Excludes this backend and the sampling query itself; any failure
/// degrades to `None` (no load adjustment) rather than aborting the run.
pub fn count_active_peers() -> Option<i64> {
    Spi::get_one::<i64>(
        "SELECT count(*)::int8 FROM pg_stat_activity \
         WHERE state = 'active' \
           AND pid <> pg_backend_pid() \
           AND backend_type = 'client backend' \
           AND query NOT ILIKE '%pg_stat_activity%'",
    )
    .ok()
    .flatten()
}
