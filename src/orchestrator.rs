//! Orchestrator — the top-level scan-and-process loop.
//!
//! One invocation of [`perform_rollup_impl`] loads the candidate configs,
//! then for each: claims the lease, checks the execution budget, computes
//! the processing window, derives the aggregation plan from live schema
//! introspection, executes it, and records either success (refresh log,
//! watermark advance, window adaptation, EWMA) or failure (error log,
//! backoff). Errors inside the per-config block are caught and recorded;
//! the loop continues with the next config. Errors loading the candidate
//! set abort the invocation.
//!
//! Each invocation processes at most one window per config; further
//! progress arrives with the next scheduler tick.
//!
//! The watermark is advanced to the *planned* window end, not to
//! `max(source.timestamp)` inside the window. For second/minute intervals
//! the safety buffer already absorbs ingest lag; for coarse intervals with
//! heavily delayed ingest, rows landing before an already-committed end
//! are not revisited — size `look_back_window` accordingly.

use std::time::Instant;

use pgrx::prelude::*;

use crate::catalog::{self, DimensionConfig, ErrorLog, LeaseStatus, RefreshLog, RollupConfig};
use crate::config;
use crate::error::{backoff_delay_secs, PgRollupError, SqlFailure};
use crate::inspect::{self, SchemaCache};
use crate::lease;
use crate::monitor;
use crate::plan::RollupPlan;
use crate::window::{self, US_PER_SEC};

/// What happened to one candidate during an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    /// Window executed and committed; carries the processed row count.
    Completed(i64),
    /// Nothing to do yet — the watermark has caught up to the buffer.
    EmptyWindow,
    /// Another worker holds a fresh lease.
    ClaimMissed,
}

/// Process all candidate configs (or just one source table).
///
/// Returns the number of configs that executed a window.
pub fn perform_rollup_impl(specific_table: Option<&str>) -> Result<i64, PgRollupError> {
    if !config::pg_rollup_enabled() {
        log!("pg_rollup: disabled via pg_rollup.enabled, skipping invocation");
        return Ok(0);
    }

    let worker = lease::worker_id();
    let loop_start = Instant::now();

    let candidates = RollupConfig::load_candidates(specific_table)?;
    let mut cache = SchemaCache::new();
    let mut completed = 0i64;
    let mut overrun_warned = false;

    for candidate in &candidates {
        match process_config(&mut cache, candidate, &worker) {
            Ok(RunOutcome::Completed(rows)) => {
                completed += 1;
                pgrx::debug1!(
                    "pg_rollup: {} -> {} processed {} rows",
                    candidate.source_table,
                    candidate.target_table,
                    rows
                );
            }
            Ok(RunOutcome::EmptyWindow) | Ok(RunOutcome::ClaimMissed) => {}
            Err(e) => handle_run_error(candidate, &worker, e),
        }

        let elapsed = loop_start.elapsed().as_secs() as i64;
        if !overrun_warned && elapsed > candidate.alert_threshold_secs {
            pgrx::warning!(
                "pg_rollup: invocation has been running for {}s, past the {}s alert threshold of {}",
                elapsed,
                candidate.alert_threshold_secs,
                candidate.source_table,
            );
            overrun_warned = true;
        }
    }

    Ok(completed)
}

/// Advance the retry queue: reset configs whose backoff has elapsed and
/// re-run the main rollup path for each affected source.
pub fn handle_retries_impl() -> Result<i64, PgRollupError> {
    if !config::pg_rollup_enabled() {
        return Ok(0);
    }

    let sources = RollupConfig::due_retries()?;
    for source in &sources {
        log!("pg_rollup: retrying rollups for {}", source);
        if let Err(e) = perform_rollup_impl(Some(source)) {
            // A failed retry pass for one source must not starve the rest
            // of the queue; the per-config backoff already advanced.
            pgrx::warning!("pg_rollup: retry pass for {} failed: {}", source, e);
        }
    }

    Ok(sources.len() as i64)
}

// ── Per-config state machine ───────────────────────────────────────────────

fn process_config(
    cache: &mut SchemaCache,
    candidate: &RollupConfig,
    worker: &str,
) -> Result<RunOutcome, PgRollupError> {
    // 1. Claim. A miss means a fresh lease elsewhere.
    let claimed = match lease::claim(candidate.id, worker)? {
        Some(cfg) => cfg,
        None => return Ok(RunOutcome::ClaimMissed),
    };
    let batch_start_us = catalog::now_us()?;

    if candidate.status == LeaseStatus::Processing {
        monitor::alert_stale_lease_taken(
            &claimed.source_table,
            &claimed.target_table,
            candidate.worker_id.as_deref().unwrap_or(""),
        );
    }

    // 2. Budget check against the pre-takeover lease age: a row abandoned
    //    longer than max_execution_time is surfaced as an error, not
    //    silently resumed.
    if candidate.status == LeaseStatus::Processing {
        if let Some(prev_started_us) = candidate.started_at_us {
            if batch_start_us - prev_started_us > claimed.max_execution_secs * US_PER_SEC {
                return Err(PgRollupError::BudgetExceeded(format!(
                    "{} abandoned mid-run for {}s (max_execution_time {}s)",
                    claimed.source_table,
                    (batch_start_us - prev_started_us) / US_PER_SEC,
                    claimed.max_execution_secs,
                )));
            }
        }
    }

    // 3. Window.
    let first_run = claimed.last_processed_us.is_none();
    let load = if first_run {
        1.0
    } else {
        match catalog::count_active_peers() {
            Some(peers) => window::load_factor(
                peers,
                config::pg_rollup_busy_session_threshold(),
                config::pg_rollup_idle_session_threshold(),
            ),
            None => 1.0,
        }
    };
    let optimal_secs = window::optimal_window_secs(
        first_run,
        claimed.processing_window_secs,
        config::pg_rollup_first_run_window_cap_secs(),
        load,
        claimed.max_look_back_secs,
    );
    let buffer_secs = window::safety_buffer_secs(claimed.rollup_interval_secs);

    let win = match window::compute_window(
        batch_start_us,
        claimed.last_processed_us,
        claimed.look_back_secs,
        optimal_secs,
        buffer_secs,
    ) {
        Some(w) => w,
        None => {
            if !lease::release(claimed.id, worker)? {
                log!(
                    "pg_rollup: lease on {} revoked before an empty window; nothing to write",
                    claimed.source_table
                );
            }
            return Ok(RunOutcome::EmptyWindow);
        }
    };

    // 4. Plan from live schema. Missing declared dimensions are logged but
    //    downgrade silently; only a fully degenerate plan aborts.
    let source_cols = cache.columns(&claimed.source_table)?.to_vec();
    let target_cols = cache.columns(&claimed.target_table)?.to_vec();
    let declared_dims = DimensionConfig::active_dimensions(&claimed.source_table)?;
    let columns = inspect::classify_columns(
        &claimed.source_table,
        &source_cols,
        &target_cols,
        &declared_dims,
    )?;

    if !columns.missing_dimensions.is_empty() {
        let failure = SqlFailure::new(format!(
            "declared dimension columns missing from source: {}",
            columns.missing_dimensions.join(", "),
        ))
        .with_context("dimension column check");
        ErrorLog::append(&claimed.source_table, Some(&claimed.target_table), &failure);
    }

    if columns.is_degenerate() {
        return Err(PgRollupError::DegeneratePlan(claimed.source_table.clone()));
    }

    let plan = RollupPlan {
        source: claimed.source_table.clone(),
        target: claimed.target_table.clone(),
        interval_literal: claimed.rollup_interval_text.clone(),
        columns,
    };
    let sql = plan.render();

    // 5. Execute the single aggregation statement. A null row count from
    //    the store is already zero here (empty tuple table).
    let rows = execute_plan(&sql, win.start_us, win.end_us)?;

    // 6. Success bookkeeping: refresh log, watermark = planned window end,
    //    adapted window, EWMA, guarded release.
    let end_wall_us = catalog::now_us()?;
    let elapsed_secs = (end_wall_us - batch_start_us) as f64 / US_PER_SEC as f64;
    let new_window_secs = window::adjusted_processing_window_secs(
        rows,
        optimal_secs,
        claimed.max_look_back_secs,
        config::pg_rollup_window_shrink_row_threshold(),
        config::pg_rollup_window_grow_row_threshold(),
    );
    let new_avg_secs = window::ewma_processing_secs(claimed.avg_processing_secs, elapsed_secs);

    RefreshLog::append(&claimed.source_table, batch_start_us, end_wall_us, rows)?;

    match RollupConfig::record_success(
        claimed.id,
        worker,
        win.end_us,
        new_window_secs,
        new_avg_secs,
        rows,
    ) {
        Ok(()) => {}
        Err(PgRollupError::LeaseLost(msg)) => {
            // The target rows are committed and idempotent; only the
            // watermark write was skipped. The new lease holder will
            // re-cover the window.
            log!("pg_rollup: {}", msg);
            return Ok(RunOutcome::Completed(rows));
        }
        Err(e) => return Err(e),
    }

    monitor::alert_rollup_completed(
        &claimed.source_table,
        &claimed.target_table,
        rows,
        win.width_secs(),
        elapsed_secs,
    );
    log!(
        "pg_rollup: {} -> {} rolled up {} rows over a {}s window in {:.3}s",
        claimed.source_table,
        claimed.target_table,
        rows,
        win.width_secs(),
        elapsed_secs,
    );

    Ok(RunOutcome::Completed(rows))
}

/// Execute the rendered plan, binding the window bounds as epoch seconds.
fn execute_plan(sql: &str, start_us: i64, end_us: i64) -> Result<i64, PgRollupError> {
    let start_secs = start_us as f64 / US_PER_SEC as f64;
    let end_secs = end_us as f64 / US_PER_SEC as f64;

    Spi::connect_mut(|client| {
        client
            .update(sql, None, &[start_secs.into(), end_secs.into()])
            .map(|table| table.len() as i64)
            .map_err(|e| {
                PgRollupError::ExecutionFailed(Box::new(
                    SqlFailure::new(e.to_string())
                        .with_context("rollup execution")
                        .with_query(sql),
                ))
            })
    })
}

/// Record a failed run: error log, backoff schedule, guarded release.
fn handle_run_error(candidate: &RollupConfig, worker: &str, err: PgRollupError) {
    if let PgRollupError::LeaseLost(ref msg) = err {
        log!("pg_rollup: {}", msg);
        return;
    }

    pgrx::warning!(
        "pg_rollup: rollup of {} -> {} failed ({}): {}",
        candidate.source_table,
        candidate.target_table,
        err.kind(),
        err,
    );

    if err.is_logged() {
        ErrorLog::append(
            &candidate.source_table,
            Some(&candidate.target_table),
            &err.to_failure(),
        );
    }

    if !err.schedules_retry() {
        return;
    }

    let delay_secs = backoff_delay_secs(
        candidate.retry_count + 1,
        config::pg_rollup_retry_base_delay_secs(),
    );
    match RollupConfig::record_failure(candidate.id, worker, delay_secs) {
        Ok(()) => {
            monitor::alert_rollup_failed(
                &candidate.source_table,
                &candidate.target_table,
                &err.kind().to_string(),
                &err.to_string(),
                candidate.retry_count + 1,
                delay_secs,
            );
        }
        Err(PgRollupError::LeaseLost(msg)) => {
            // The lease moved on (or was never ours); the new holder owns
            // the retry bookkeeping.
            log!("pg_rollup: {}", msg);
        }
        Err(e) => {
            pgrx::warning!(
                "pg_rollup: failed to record failure for {}: {}",
                candidate.source_table,
                e
            );
        }
    }
}
