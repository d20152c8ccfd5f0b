//! pg_rollup — continuous time-series rollup tables for PostgreSQL.
//!
//! This extension aggregates high-volume append-only source tables into
//! narrower, pre-aggregated rollup tables bucketed to a configured
//! interval. It is built for environments without a native time-series
//! engine: all heavy lifting happens through parameterised SQL against
//! plain PostgreSQL, with pg_partman as the partition manager and pg_cron
//! as the scheduler (both optional, consumed through their SQL interfaces).
//!
//! The orchestrator is stateless between invocations — every piece of
//! state (configs, progress watermarks, leases, retry schedules, logs)
//! lives in the `silver` catalog tables, so any number of workers can run
//! `silver.perform_rollup()` concurrently against the same database.
//! Mutual exclusion per config is a conditional claim on the config row.

#![allow(dead_code)]

use pgrx::prelude::*;

mod api;
mod bootstrap;
mod catalog;
mod config;
pub mod error;
pub mod inspect;
mod lease;
mod monitor;
mod orchestrator;
pub mod plan;
pub mod window;

::pgrx::pg_module_magic!();

// Declare the `silver` schema so pgrx's SQL entity graph recognises it
// for `#[pg_extern(schema = "silver")]` annotations.
#[pg_schema]
mod silver {}

/// Extension initialization — called when the shared library is loaded.
#[allow(non_snake_case)]
#[pg_guard]
pub extern "C-unwind" fn _PG_init() {
    config::register_gucs();
    log!("pg_rollup: initialized");
}

// ── Catalog tables ────────────────────────────────────────────────────

extension_sql!(
    r#"
-- Orchestrator state lives in the silver namespace; rollup targets are
-- created in a caller-chosen namespace (conventionally gold).
CREATE SCHEMA IF NOT EXISTS silver;

-- One row per (source, target) rollup pair
CREATE TABLE IF NOT EXISTS silver.rollup_configs (
    id                     BIGSERIAL PRIMARY KEY,
    source_table           TEXT NOT NULL,
    target_table           TEXT NOT NULL,
    is_active              BOOLEAN NOT NULL DEFAULT TRUE,
    rollup_interval        INTERVAL NOT NULL CHECK (rollup_interval > INTERVAL '0'),
    look_back_window       INTERVAL NOT NULL DEFAULT '1 hour',
    max_look_back_window   INTERVAL NOT NULL DEFAULT '1 day',
    processing_window      INTERVAL NOT NULL DEFAULT '1 hour',
    chunk_interval         INTERVAL NOT NULL DEFAULT '1 day',
    retention_period       INTERVAL NOT NULL DEFAULT '90 days',
    last_processed_time    TIMESTAMPTZ,
    status                 TEXT NOT NULL DEFAULT 'idle'
                            CHECK (status IN ('idle', 'processing')),
    worker_id              TEXT,
    started_at             TIMESTAMPTZ,
    avg_processing_time    DOUBLE PRECISION,
    last_processed_rows    BIGINT,
    last_optimization_time TIMESTAMPTZ,
    retry_count            INT NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
    last_error_time        TIMESTAMPTZ,
    next_retry_time        TIMESTAMPTZ,
    max_execution_time     INTERVAL NOT NULL DEFAULT '30 minutes',
    alert_threshold        INTERVAL NOT NULL DEFAULT '5 minutes',
    created_at             TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at             TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (source_table, target_table),
    CHECK (max_look_back_window >= look_back_window),
    -- Lease cleanliness: idle rows carry no worker, processing rows carry both
    CHECK ((status = 'idle' AND worker_id IS NULL AND started_at IS NULL)
        OR (status = 'processing' AND worker_id IS NOT NULL AND started_at IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_rollup_configs_candidates
    ON silver.rollup_configs (is_active, status, last_processed_time);
CREATE INDEX IF NOT EXISTS idx_rollup_configs_retry
    ON silver.rollup_configs (next_retry_time) WHERE retry_count > 0;

-- Declared GROUP BY keys per source table
CREATE TABLE IF NOT EXISTS silver.rollup_dimensions (
    source_table     TEXT NOT NULL,
    dimension_column TEXT NOT NULL,
    is_active        BOOLEAN NOT NULL DEFAULT TRUE,
    PRIMARY KEY (source_table, dimension_column)
);

-- Append-only run audit log (externally pruned)
CREATE TABLE IF NOT EXISTS silver.rollup_refresh_log (
    id                BIGSERIAL PRIMARY KEY,
    table_name        TEXT NOT NULL,
    start_time        TIMESTAMPTZ NOT NULL,
    end_time          TIMESTAMPTZ NOT NULL,
    records_processed BIGINT NOT NULL DEFAULT 0,
    refresh_timestamp TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_refresh_log_table_ts
    ON silver.rollup_refresh_log (table_name, refresh_timestamp);

-- Append-only error log with full diagnostic context (externally pruned)
CREATE TABLE IF NOT EXISTS silver.rollup_errors (
    id              BIGSERIAL PRIMARY KEY,
    source_table    TEXT NOT NULL,
    target_table    TEXT,
    error_timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
    error_message   TEXT,
    sql_state       TEXT,
    error_detail    TEXT,
    error_hint      TEXT,
    error_context   TEXT,
    attempted_query TEXT
);

CREATE INDEX IF NOT EXISTS idx_rollup_errors_pair_ts
    ON silver.rollup_errors (source_table, target_table, error_timestamp);

-- Store-provided bucketing contract: the start of the half-open bucket
-- containing ts. Standard calendar intervals align to conventional
-- truncation; everything else aligns to the UNIX epoch.
CREATE OR REPLACE FUNCTION silver.time_bucket(bucket_width INTERVAL, ts TIMESTAMPTZ)
RETURNS TIMESTAMPTZ
LANGUAGE sql IMMUTABLE PARALLEL SAFE
AS $tb$
    SELECT CASE
        WHEN EXTRACT(YEAR FROM bucket_width) > 0 OR EXTRACT(MONTH FROM bucket_width) > 0
            THEN date_trunc('month', ts)
        WHEN bucket_width = INTERVAL '1 week'
            THEN date_trunc('week', ts)
        ELSE date_bin(bucket_width, ts, TIMESTAMPTZ '1970-01-01 00:00:00+00')
    END
$tb$;
"#,
    name = "pg_rollup_catalog",
    bootstrap,
);

// ── Operator view ─────────────────────────────────────────────────────

extension_sql!(
    r#"
-- psql-friendly twin of silver.rollup_status()
CREATE OR REPLACE VIEW silver.rollup_health AS
SELECT
    c.source_table,
    c.target_table,
    c.is_active,
    c.status,
    CASE WHEN c.status = 'processing' AND c.started_at < now() - c.alert_threshold
              THEN 'ALERT'
         WHEN c.retry_count > 3 THEN 'WARNING'
         WHEN c.status = 'processing' THEN 'RUNNING'
         ELSE 'OK'
    END AS health_status,
    c.last_processed_time,
    c.retry_count,
    c.next_retry_time,
    c.avg_processing_time AS avg_processing_secs,
    COALESCE(stats.refreshes, 0) AS refreshes_24h,
    stats.avg_duration_secs AS avg_duration_secs_24h,
    stats.success_rate AS success_rate_24h,
    last_err.error_timestamp AS last_error_time,
    last_err.error_message AS last_error_message
FROM silver.rollup_configs c
LEFT JOIN LATERAL (
    SELECT
        count(*) AS refreshes,
        avg(EXTRACT(EPOCH FROM (r.end_time - r.start_time)))::float8 AS avg_duration_secs,
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
) last_err ON true;
"#,
    name = "pg_rollup_health_view",
    requires = ["pg_rollup_catalog"],
);
