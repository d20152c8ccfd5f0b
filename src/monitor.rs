//! Monitoring, observability, and alerting for pg_rollup.
//!
//! # Snapshot
//!
//! `silver.rollup_status()` joins each config with the latest error-log
//! entry for its (source, target) pair and a 24-hour aggregate of the
//! refresh log (run count, average duration, success rate where success
//! means `records_processed > 0`), and derives a `health_status`:
//! - `ALERT` — lease held past `alert_threshold` (stale worker)
//! - `WARNING` — `retry_count > 3`
//! - `RUNNING` — lease held, within threshold
//! - `OK` — otherwise
//!
//! A SQL view `silver.rollup_health` over the same projection is created
//! in `lib.rs` for psql-friendly access.
//!
//! # NOTIFY Alerting
//!
//! Operational events are emitted on the `pg_rollup_alert` channel as JSON.
//! Clients can `LISTEN pg_rollup_alert;` to receive:
//! - `rollup_completed` — a window committed successfully
//! - `rollup_failed` — a run failed and a retry was scheduled
//! - `stale_lease_taken` — a worker took over an expired lease

use pgrx::prelude::*;

use crate::catalog::LeaseStatus;

/// Retry count above which a config is surfaced as WARNING.
const WARNING_RETRY_COUNT: i32 = 3;

/// Derive the health status for one config.
///
/// `started_age_secs` is the age of the lease (`now − started_at`), when
/// one is held. Precedence: ALERT > WARNING > RUNNING > OK.
pub fn health_status(
    status: LeaseStatus,
    started_age_secs: Option<i64>,
    alert_threshold_secs: i64,
    retry_count: i32,
) -> &'static str {
    let stale = status == LeaseStatus::Processing
        && started_age_secs.is_some_and(|age| age > alert_threshold_secs);

    if stale {
        "ALERT"
    } else if retry_count > WARNING_RETRY_COUNT {
        "WARNING"
    } else if status == LeaseStatus::Processing {
        "RUNNING"
    } else {
        "OK"
    }
}

/// Operational snapshot of every rollup config.
///
/// Exposed as `silver.rollup_status()`.
#[pg_extern(schema = "silver", name = "rollup_status")]
#[allow(clippy::type_complexity)]
fn rollup_status() -> TableIterator<
    'static,
    (
        name!(source_table, String),
        name!(target_table, String),
        name!(is_active, bool),
        name!(status, String),
        name!(health_status, String),
        name!(last_processed_time, Option<TimestampWithTimeZone>),
        name!(retry_count, i32),
        name!(next_retry_time, Option<TimestampWithTimeZone>),
        name!(avg_processing_secs, Option<f64>),
        name!(refreshes_24h, i64),
        name!(avg_duration_secs_24h, Option<f64>),
        name!(success_rate_24h, Option<f64>),
        name!(last_error_time, Option<TimestampWithTimeZone>),
        name!(last_error_message, Option<String>),
    ),
> {
    let rows: Vec<_> = Spi::connect(|client| {
        let result = client
            .select(
                "SELECT
                    c.source_table,
                    c.target_table,
                    c.is_active,
                    c.status,
                    EXTRACT(EPOCH FROM (now() - c.started_at))::int8,
                    EXTRACT(EPOCH FROM c.alert_threshold)::int8,
                    c.last_processed_time,
                    c.retry_count,
                    c.next_retry_time,
                    c.avg_processing_time,
                    COALESCE(stats.refreshes, 0)::int8,
                    stats.avg_duration_secs,
                    stats.success_rate,
                    last_err.error_timestamp,
                    last_err.error_message
                FROM silver.rollup_configs c
                LEFT JOIN LATERAL (
                    SELECT
                        count(*) AS refreshes,
                        avg(EXTRACT(EPOCH FROM (r.end_time - r.start_time)))::float8
                            AS avg_duration_secs,
                        (count(*) FILTER (WHERE r.records_processed > 0))::float8
                            / count(*)::float8 AS success_rate
                    FROM silver.rollup_refresh_log r
                    WHERE r.table_name = c.source_table
                      AND r.refresh_timestamp > now() - INTERVAL '24 hours'
                ) stats ON true
                LEFT JOIN LATERAL (
                    SELECT e.error_timestamp, e.error_message
                    FROM silver.rollup_errors e
                    WHERE e.source_table = c.source_table
                      AND e.target_table = c.target_table
                    ORDER BY e.error_timestamp DESC
                    LIMIT 1
                ) last_err ON true
                ORDER BY c.source_table, c.target_table",
                None,
                &[],
            )
            .unwrap();

        let mut out = Vec::new();
        for row in result {
            let source_table = row.get::<String>(1).unwrap().unwrap_or_default();
            let target_table = row.get::<String>(2).unwrap().unwrap_or_default();
            let is_active = row.get::<bool>(3).unwrap().unwrap_or(false);
            let status_str = row.get::<String>(4).unwrap().unwrap_or_default();
            let started_age_secs = row.get::<i64>(5).unwrap();
            let alert_threshold_secs = row.get::<i64>(6).unwrap().unwrap_or(0);
            let last_processed = row.get::<TimestampWithTimeZone>(7).unwrap();
            let retry_count = row.get::<i32>(8).unwrap().unwrap_or(0);
            let next_retry = row.get::<TimestampWithTimeZone>(9).unwrap();
            let avg_processing = row.get::<f64>(10).unwrap();
            let refreshes = row.get::<i64>(11).unwrap().unwrap_or(0);
            let avg_duration = row.get::<f64>(12).unwrap();
            let success_rate = row.get::<f64>(13).unwrap();
            let last_error_time = row.get::<TimestampWithTimeZone>(14).unwrap();
            let last_error_message = row.get::<String>(15).unwrap();

            let status = LeaseStatus::from_str(&status_str);
            let health =
                health_status(status, started_age_secs, alert_threshold_secs, retry_count);

            out.push((
                source_table,
                target_table,
                is_active,
                status_str,
                health.to_string(),
                last_processed,
                retry_count,
                next_retry,
                avg_processing,
                refreshes,
                avg_duration,
                success_rate,
                last_error_time,
                last_error_message,
            ));
        }
        out
    });

    TableIterator::new(rows)
}

// ── NOTIFY Alerting ────────────────────────────────────────────────────────

/// Emit a NOTIFY on the `pg_rollup_alert` channel with a JSON payload.
fn emit_alert(payload: serde_json::Value) {
    let text = payload.to_string();

    // NOTIFY payloads are limited to ~8000 bytes; truncate if needed.
    let safe = if text.len() > 7_900 {
        format!("{}...", &text[..7_890])
    } else {
        text
    };

    let escaped = safe.replace('\'', "''");
    let sql = format!("NOTIFY pg_rollup_alert, '{}'", escaped);
    if let Err(e) = Spi::run(&sql) {
        pgrx::warning!("pg_rollup: failed to emit alert: {}", e);
    }
}

/// Emit a rollup-completed alert.
pub fn alert_rollup_completed(
    source: &str,
    target: &str,
    rows: i64,
    window_secs: i64,
    duration_secs: f64,
) {
    emit_alert(serde_json::json!({
        "event": "rollup_completed",
        "source_table": source,
        "target_table": target,
        "rows": rows,
        "window_seconds": window_secs,
        "duration_seconds": duration_secs,
    }));
}

/// Emit a stale-lease takeover alert.
pub fn alert_stale_lease_taken(source: &str, target: &str, evicted_worker: &str) {
    emit_alert(serde_json::json!({
        "event": "stale_lease_taken",
        "source_table": source,
        "target_table": target,
        "evicted_worker": evicted_worker,
    }));
}

/// Emit a rollup-failed alert with the scheduled retry.
pub fn alert_rollup_failed(
    source: &str,
    target: &str,
    kind: &str,
    error: &str,
    retry_count: i32,
    retry_delay_secs: i64,
) {
    emit_alert(serde_json::json!({
        "event": "rollup_failed",
        "source_table": source,
        "target_table": target,
        "kind": kind,
        "error": error,
        "retry_count": retry_count,
        "retry_delay_seconds": retry_delay_secs,
    }));
}
