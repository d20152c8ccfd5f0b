//! Bootstrap — rollup target creation and partition maintenance.
//!
//! Onboarding a source table creates its rollup target (projected schema,
//! primary key, indexes), registers the target with the external partition
//! manager (pg_partman, consumed purely through its SQL interface), and
//! inserts the matching config row. pg_partman is a soft dependency: when
//! absent the target is created as a plain table and a warning is logged.
//!
//! Partition sizing aims for ~256 MiB chunks based on observed row width
//! and the past-day ingest rate, rounded down to 1 hour / 1 day / 1 week.

use pgrx::prelude::*;

use crate::catalog::{DimensionConfig, ErrorLog, RollupConfig};
use crate::error::{PgRollupError, SqlFailure};
use crate::inspect::{self, ColumnClass, ColumnInfo, TIMESTAMP_COLUMN};
use crate::plan::{quote_identifier, quote_qualified};

/// Target chunk size for partition sizing.
const TARGET_CHUNK_BYTES: i64 = 256 * 1024 * 1024;

/// Candidate chunk intervals, coarsest first, in seconds.
const CHUNK_STEPS: [(i64, &str); 3] = [
    (604_800, "1 week"),
    (86_400, "1 day"),
    (3_600, "1 hour"),
];

/// Default chunk interval when the source has too little data to size from.
pub const DEFAULT_CHUNK_INTERVAL: &str = "1 day";

// ── Target DDL ─────────────────────────────────────────────────────────────

/// Render the CREATE TABLE statement for a rollup target.
///
/// Projection rules:
/// - `timestamp` and each dimension are copied verbatim, NOT NULL;
/// - each non-reserved numeric column becomes nullable `min_x`, `max_x`,
///   `avg_x` of the same type;
/// - JSON columns become nullable arrays of the same JSON type;
/// - other columns are copied verbatim, nullable;
/// - `rollup_count INTEGER DEFAULT 1` and
///   `last_updated_at TIMESTAMPTZ DEFAULT now()` are always appended.
///
/// The primary key is `(timestamp, dims…)`; when `partitioned`, the table
/// is range-partitioned on `timestamp` (which the key therefore covers).
pub fn build_target_ddl(
    target: &str,
    source_cols: &[ColumnInfo],
    dimensions: &[String],
    partitioned: bool,
) -> Result<String, PgRollupError> {
    let ts_type = source_cols
        .iter()
        .find(|c| c.name == TIMESTAMP_COLUMN && c.class == ColumnClass::Timestamp)
        .map(|c| c.type_name.clone())
        .ok_or_else(|| PgRollupError::MissingTimestampColumn(target.to_string()))?;

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!(
        "    {} {} NOT NULL",
        quote_identifier(TIMESTAMP_COLUMN),
        ts_type
    ));

    for dim in dimensions {
        let info = source_cols
            .iter()
            .find(|c| &c.name == dim)
            .ok_or_else(|| {
                PgRollupError::InvalidArgument(format!("dimension column {} not on source", dim))
            })?;
        lines.push(format!(
            "    {} {} NOT NULL",
            quote_identifier(dim),
            info.type_name
        ));
    }

    for col in source_cols {
        let name = col.name.as_str();
        if name == TIMESTAMP_COLUMN
            || dimensions.iter().any(|d| d == name)
            || inspect::RESERVED_COLUMNS.contains(&name)
        {
            continue;
        }
        match col.class {
            // Prefixed numerics are aggregate outputs already; projecting
            // them would nest min_min_x columns.
            ColumnClass::Numeric
                if inspect::RESERVED_PREFIXES.iter().any(|p| name.starts_with(p)) => {}
            ColumnClass::Numeric => {
                for prefix in inspect::RESERVED_PREFIXES {
                    lines.push(format!(
                        "    {} {}",
                        quote_identifier(&format!("{}{}", prefix, name)),
                        col.type_name
                    ));
                }
            }
            ColumnClass::Json => {
                lines.push(format!(
                    "    {} {}[]",
                    quote_identifier(name),
                    col.type_name
                ));
            }
            ColumnClass::Other => {
                lines.push(format!(
                    "    {} {}",
                    quote_identifier(name),
                    col.type_name
                ));
            }
            ColumnClass::Timestamp => {}
        }
    }

    lines.push("    rollup_count INTEGER DEFAULT 1".to_string());
    lines.push("    last_updated_at TIMESTAMPTZ DEFAULT now()".to_string());

    let mut key_cols: Vec<String> = vec![quote_identifier(TIMESTAMP_COLUMN)];
    key_cols.extend(dimensions.iter().map(|d| quote_identifier(d)));
    lines.push(format!("    PRIMARY KEY ({})", key_cols.join(", ")));

    let partition_clause = if partitioned {
        format!(" PARTITION BY RANGE ({})", quote_identifier(TIMESTAMP_COLUMN))
    } else {
        String::new()
    };

    Ok(format!(
        "CREATE TABLE {} (\n{}\n){}",
        quote_qualified(target),
        lines.join(",\n"),
        partition_clause,
    ))
}

/// Round a chunk time span down to the nearest supported interval.
pub fn round_chunk_interval(span_secs: i64) -> &'static str {
    for (secs, label) in CHUNK_STEPS {
        if span_secs >= secs {
            return label;
        }
    }
    // Below one hour of data per chunk: keep hourly partitions
    "1 hour"
}

/// Pure core of the chunk sizing heuristic.
///
/// Given relation size, total row estimate, and rows ingested over the
/// past day, pick the interval whose expected chunk lands near the
/// 256 MiB target. Falls back to [`DEFAULT_CHUNK_INTERVAL`] when the
/// source is too small to estimate from.
pub fn chunk_interval_for(total_bytes: i64, total_rows: i64, rows_last_day: i64) -> &'static str {
    if total_rows < 10_000 || total_bytes <= 0 || rows_last_day <= 0 {
        return DEFAULT_CHUNK_INTERVAL;
    }
    let bytes_per_row = (total_bytes as f64 / total_rows as f64).max(1.0);
    let rows_per_chunk = TARGET_CHUNK_BYTES as f64 / bytes_per_row;
    let span_secs = (rows_per_chunk / rows_last_day as f64) * 86_400.0;
    round_chunk_interval(span_secs as i64)
}

/// Size the partition interval for a source table from live statistics.
pub fn optimize_chunk_interval(source: &str) -> Result<&'static str, PgRollupError> {
    let stats = Spi::connect(|client| {
        let table = client
            .select(
                "SELECT pg_total_relation_size(c.oid), \
                        GREATEST(c.reltuples, 0)::int8 \
                 FROM pg_class c WHERE c.oid = to_regclass($1)",
                None,
                &[source.into()],
            )
            .map_err(|e| PgRollupError::SpiError(e.to_string()))?;

        for row in table {
            let bytes = row
                .get::<i64>(1)
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?
                .unwrap_or(0);
            let rows = row
                .get::<i64>(2)
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?
                .unwrap_or(0);
            return Ok(Some((bytes, rows)));
        }
        Ok(None)
    })?;

    let (total_bytes, total_rows) = match stats {
        Some(s) => s,
        None => return Ok(DEFAULT_CHUNK_INTERVAL),
    };

    if total_rows < 10_000 {
        return Ok(DEFAULT_CHUNK_INTERVAL);
    }

    let rows_last_day = Spi::get_one_with_args::<i64>(
        &format!(
            "SELECT count(*)::int8 FROM {} \
             WHERE {} >= now() - INTERVAL '1 day'",
            quote_qualified(source),
            quote_identifier(TIMESTAMP_COLUMN),
        ),
        &[],
    )
    .map_err(|e| PgRollupError::SpiError(e.to_string()))?
    .unwrap_or(0);

    Ok(chunk_interval_for(total_bytes, total_rows, rows_last_day))
}

// ── Partition manager (pg_partman) ─────────────────────────────────────────

/// Whether pg_partman is installed in this database.
pub fn partman_installed() -> bool {
    Spi::get_one::<bool>("SELECT EXISTS(SELECT 1 FROM pg_extension WHERE extname = 'pg_partman')")
        .unwrap_or(Some(false))
        .unwrap_or(false)
}

/// Register a partitioned target with pg_partman.
fn partman_create_parent(target: &str, chunk_interval: &str) -> Result<(), PgRollupError> {
    Spi::run_with_args(
        "SELECT partman.create_parent(\
            p_parent_table := $1, \
            p_control := 'timestamp', \
            p_interval := $2, \
            p_premake := 4)",
        &[target.into(), chunk_interval.into()],
    )
    .map_err(|e| PgRollupError::SpiError(format!("partman.create_parent failed: {}", e)))
}

/// Configure retention for a partitioned target.
///
/// Expired partitions are dropped outright (`retention_keep_table = false`)
/// and partitions are extended indefinitely (`infinite_time_partitions`).
fn partman_set_retention(target: &str, retention: &str) -> Result<(), PgRollupError> {
    Spi::run_with_args(
        "UPDATE partman.part_config \
         SET retention = $2, retention_keep_table = false, \
             infinite_time_partitions = true \
         WHERE parent_table = $1",
        &[target.into(), retention.into()],
    )
    .map_err(|e| PgRollupError::SpiError(format!("partman retention update failed: {}", e)))
}

/// Reconcile a target's partition interval in pg_partman.
fn partman_set_interval(target: &str, chunk_interval: &str) -> Result<(), PgRollupError> {
    Spi::run_with_args(
        "UPDATE partman.part_config SET partition_interval = $2 WHERE parent_table = $1",
        &[target.into(), chunk_interval.into()],
    )
    .map_err(|e| PgRollupError::SpiError(format!("partman interval update failed: {}", e)))
}

/// Run pg_partman maintenance (creates pending partitions, drops expired).
fn partman_run_maintenance() -> Result<(), PgRollupError> {
    Spi::run("SELECT partman.run_maintenance()")
        .map_err(|e| PgRollupError::SpiError(format!("partman.run_maintenance failed: {}", e)))
}

// ── Onboarding ─────────────────────────────────────────────────────────────

/// Create a rollup target for `source` and register its config.
///
/// Returns the qualified target name.
#[allow(clippy::too_many_arguments)]
pub fn create_rollup_table_impl(
    source: &str,
    target_schema: &str,
    target_name: &str,
    rollup_interval: &str,
    look_back_window: &str,
    retention_period: &str,
    processing_window: &str,
    initial_status: &str,
    is_active: bool,
) -> Result<String, PgRollupError> {
    if target_schema.is_empty() || target_name.is_empty() {
        return Err(PgRollupError::InvalidArgument(
            "target schema and name must be non-empty".into(),
        ));
    }
    if !matches!(initial_status, "idle" | "processing") {
        return Err(PgRollupError::InvalidArgument(format!(
            "initial_status must be 'idle' or 'processing', got '{}'",
            initial_status
        )));
    }

    let target = format!("{}.{}", target_schema, target_name);

    if !inspect::table_exists(source)? {
        return Err(PgRollupError::NotFound(format!("source table {}", source)));
    }
    if inspect::table_exists(&target)? {
        return Err(PgRollupError::AlreadyExists(format!("target table {}", target)));
    }
    if RollupConfig::get_by_pair(source, &target).is_ok() {
        return Err(PgRollupError::AlreadyExists(format!("{} -> {}", source, target)));
    }

    let source_cols = inspect::table_columns(source)?;

    // Resolve active dimensions; declared-but-absent ones are logged and
    // dropped, matching the per-run downgrade behaviour.
    let declared = DimensionConfig::active_dimensions(source)?;
    let mut dimensions = Vec::new();
    let mut missing = Vec::new();
    for dim in declared {
        if source_cols.iter().any(|c| c.name == dim) {
            dimensions.push(dim);
        } else {
            missing.push(dim);
        }
    }
    if !missing.is_empty() {
        let failure = SqlFailure::new(format!(
            "declared dimension columns missing from source: {}",
            missing.join(", "),
        ))
        .with_context("dimension column check");
        ErrorLog::append(source, Some(&target), &failure);
    }

    let partitioned = partman_installed();
    let ddl = build_target_ddl(&target, &source_cols, &dimensions, partitioned)?;
    Spi::run(&ddl)
        .map_err(|e| PgRollupError::SpiError(format!("failed to create {}: {}", target, e)))?;

    let chunk_interval = optimize_chunk_interval(source)?;
    if partitioned {
        partman_create_parent(&target, chunk_interval)?;
        partman_set_retention(&target, retention_period)?;
    } else {
        pgrx::warning!(
            "pg_rollup: pg_partman not installed; {} created without partitioning",
            target
        );
    }

    create_target_indexes(&target, &dimensions, &source_cols)?;

    let id = RollupConfig::insert(
        source,
        &target,
        rollup_interval,
        look_back_window,
        processing_window,
        chunk_interval,
        retention_period,
        initial_status,
        is_active,
    )?;

    log!(
        "pg_rollup: created rollup target {} for {} (config id={}, interval={}, chunk={})",
        target,
        source,
        id,
        rollup_interval,
        chunk_interval,
    );

    Ok(target)
}

/// Create the standard index set on a new target: a BRIN on the timestamp,
/// a composite BTREE on `(dims…, timestamp DESC)` when dimensions exist,
/// and a GIN on each JSON-array column.
fn create_target_indexes(
    target: &str,
    dimensions: &[String],
    source_cols: &[ColumnInfo],
) -> Result<(), PgRollupError> {
    let quoted_target = quote_qualified(target);
    let ts = quote_identifier(TIMESTAMP_COLUMN);

    Spi::run(&format!(
        "CREATE INDEX ON {} USING brin ({})",
        quoted_target, ts
    ))
    .map_err(|e| PgRollupError::SpiError(format!("BRIN index creation failed: {}", e)))?;

    if !dimensions.is_empty() {
        let mut cols: Vec<String> = dimensions.iter().map(|d| quote_identifier(d)).collect();
        cols.push(format!("{} DESC", ts));
        Spi::run(&format!(
            "CREATE INDEX ON {} ({})",
            quoted_target,
            cols.join(", ")
        ))
        .map_err(|e| PgRollupError::SpiError(format!("composite index creation failed: {}", e)))?;
    }

    for col in source_cols {
        if col.class == ColumnClass::Json && !dimensions.iter().any(|d| d == &col.name) {
            Spi::run(&format!(
                "CREATE INDEX ON {} USING gin ({})",
                quoted_target,
                quote_identifier(&col.name)
            ))
            .map_err(|e| PgRollupError::SpiError(format!("GIN index creation failed: {}", e)))?;
        }
    }

    Ok(())
}

// ── Maintenance ────────────────────────────────────────────────────────────

/// Reconcile chunk intervals for all (or one) active targets and run
/// partition maintenance. Returns the number of configs whose chunk
/// interval changed.
pub fn maintain_timeseries_tables_impl(target: Option<&str>) -> Result<i64, PgRollupError> {
    let configs = RollupConfig::get_all_active()?;
    let mut reconciled = 0i64;
    let has_partman = partman_installed();

    for cfg in configs
        .iter()
        .filter(|c| target.is_none_or(|t| c.target_table == t))
    {
        let optimal = optimize_chunk_interval(&cfg.source_table)?;
        // Stored text can render differently (e.g. "1 day" vs "1 day"),
        // compare via the store's interval equality.
        let differs = Spi::get_one_with_args::<bool>(
            "SELECT $1::interval IS DISTINCT FROM $2::interval",
            &[cfg.chunk_interval_text.as_str().into(), optimal.into()],
        )
        .map_err(|e| PgRollupError::SpiError(e.to_string()))?
        .unwrap_or(false);

        if differs {
            RollupConfig::update_chunk_interval(cfg.id, optimal)?;
            if has_partman {
                partman_set_interval(&cfg.target_table, optimal)?;
            }
            log!(
                "pg_rollup: chunk interval for {} reconciled to {}",
                cfg.target_table,
                optimal
            );
            reconciled += 1;
        }
    }

    if has_partman {
        partman_run_maintenance()?;
    }

    Ok(reconciled)
}

// ── Partition statistics ───────────────────────────────────────────────────

/// Per-partition statistics for one partitioned table.
pub fn partition_stats(table: &str) -> Result<Vec<(String, i64, i64)>, PgRollupError> {
    Spi::connect(|client| {
        let result = client
            .select(
                "SELECT c.relname::text, \
                        pg_total_relation_size(c.oid), \
                        GREATEST(c.reltuples, 0)::int8 \
                 FROM pg_inherits i \
                 JOIN pg_class c ON c.oid = i.inhrelid \
                 WHERE i.inhparent = to_regclass($1) \
                 ORDER BY c.relname",
                None,
                &[table.into()],
            )
            .map_err(|e| PgRollupError::SpiError(e.to_string()))?;

        let mut out = Vec::new();
        for row in result {
            let name = row
                .get::<String>(1)
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?
                .unwrap_or_default();
            let bytes = row
                .get::<i64>(2)
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?
                .unwrap_or(0);
            let rows = row
                .get::<i64>(3)
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?
                .unwrap_or(0);
            out.push((name, bytes, rows));
        }
        Ok(out)
    })
}

/// Aggregated statistics for every partitioned parent matching a LIKE
/// pattern on its qualified name.
pub fn detailed_stats(pattern: &str) -> Result<Vec<(String, i64, i64, i64)>, PgRollupError> {
    Spi::connect(|client| {
        let result = client
            .select(
                "SELECT n.nspname || '.' || p.relname, \
                        count(c.oid)::int8, \
                        COALESCE(sum(pg_total_relation_size(c.oid)), 0)::int8, \
                        COALESCE(sum(GREATEST(c.reltuples, 0)), 0)::int8 \
                 FROM pg_class p \
                 JOIN pg_namespace n ON n.oid = p.relnamespace \
                 LEFT JOIN pg_inherits i ON i.inhparent = p.oid \
                 LEFT JOIN pg_class c ON c.oid = i.inhrelid \
                 WHERE p.relkind = 'p' \
                   AND n.nspname || '.' || p.relname LIKE $1 \
                 GROUP BY 1 ORDER BY 1",
                None,
                &[pattern.into()],
            )
            .map_err(|e| PgRollupError::SpiError(e.to_string()))?;

        let mut out = Vec::new();
        for row in result {
            let name = row
                .get::<String>(1)
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?
                .unwrap_or_default();
            let partitions = row
                .get::<i64>(2)
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?
                .unwrap_or(0);
            let bytes = row
                .get::<i64>(3)
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?
                .unwrap_or(0);
            let rows = row
                .get::<i64>(4)
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?
                .unwrap_or(0);
            out.push((name, partitions, bytes, rows));
        }
        Ok(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::classify_type;

    fn col(name: &str, type_name: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.into(),
            type_name: type_name.into(),
            class: classify_type(type_name),
        }
    }

    fn metrics_cols() -> Vec<ColumnInfo> {
        vec![
            col("timestamp", "timestamp with time zone"),
            col("tenant", "text"),
            col("value", "double precision"),
            col("payload", "jsonb"),
            col("status", "text"),
        ]
    }

    // ── DDL projection ─────────────────────────────────────────────────

    #[test]
    fn test_target_ddl_projects_all_column_kinds() {
        let ddl = build_target_ddl(
            "gold.metrics_1h",
            &metrics_cols(),
            &["tenant".to_string()],
            true,
        )
        .unwrap();

        assert!(ddl.starts_with("CREATE TABLE \"gold\".\"metrics_1h\" ("));
        assert!(ddl.contains("\"timestamp\" timestamp with time zone NOT NULL"));
        assert!(ddl.contains("\"tenant\" text NOT NULL"));
        assert!(ddl.contains("\"min_value\" double precision"));
        assert!(ddl.contains("\"max_value\" double precision"));
        assert!(ddl.contains("\"avg_value\" double precision"));
        assert!(ddl.contains("\"payload\" jsonb[]"));
        assert!(ddl.contains("\"status\" text"));
        assert!(ddl.contains("rollup_count INTEGER DEFAULT 1"));
        assert!(ddl.contains("last_updated_at TIMESTAMPTZ DEFAULT now()"));
        assert!(ddl.contains("PRIMARY KEY (\"timestamp\", \"tenant\")"));
        assert!(ddl.ends_with("PARTITION BY RANGE (\"timestamp\")"));
    }

    #[test]
    fn test_target_ddl_without_partman_is_unpartitioned() {
        let ddl = build_target_ddl("gold.metrics_1h", &metrics_cols(), &[], false).unwrap();
        assert!(!ddl.contains("PARTITION BY"));
        assert!(ddl.contains("PRIMARY KEY (\"timestamp\")"));
    }

    #[test]
    fn test_target_ddl_aggregate_columns_are_nullable() {
        let ddl = build_target_ddl("gold.metrics_1h", &metrics_cols(), &[], true).unwrap();
        assert!(!ddl.contains("\"min_value\" double precision NOT NULL"));
        assert!(!ddl.contains("\"status\" text NOT NULL"));
    }

    #[test]
    fn test_target_ddl_requires_timestamp_column() {
        let cols = vec![col("tenant", "text")];
        assert!(build_target_ddl("gold.t", &cols, &[], true).is_err());
    }

    #[test]
    fn test_target_ddl_skips_reserved_columns() {
        let mut cols = metrics_cols();
        cols.push(col("rollup_count", "integer"));
        cols.push(col("last_updated_at", "timestamp with time zone"));
        cols.push(col("min_value", "double precision"));
        let ddl = build_target_ddl("gold.t", &cols, &[], true).unwrap();
        // rollup_count appears exactly once (the appended machinery column)
        assert_eq!(ddl.matches("rollup_count").count(), 1);
        // min_value appears only as the projection of `value`
        assert_eq!(ddl.matches("\"min_value\"").count(), 1);
    }

    #[test]
    fn test_target_ddl_dimension_order_matches_primary_key() {
        let ddl = build_target_ddl(
            "gold.t",
            &[
                col("timestamp", "timestamp with time zone"),
                col("region", "text"),
                col("tenant", "text"),
            ],
            &["tenant".to_string(), "region".to_string()],
            true,
        )
        .unwrap();
        assert!(ddl.contains("PRIMARY KEY (\"timestamp\", \"tenant\", \"region\")"));
    }

    // ── Chunk sizing ───────────────────────────────────────────────────

    #[test]
    fn test_round_chunk_interval_steps() {
        assert_eq!(round_chunk_interval(30 * 86_400), "1 week");
        assert_eq!(round_chunk_interval(604_800), "1 week");
        assert_eq!(round_chunk_interval(604_799), "1 day");
        assert_eq!(round_chunk_interval(86_400), "1 day");
        assert_eq!(round_chunk_interval(86_399), "1 hour");
        assert_eq!(round_chunk_interval(3_600), "1 hour");
        assert_eq!(round_chunk_interval(30), "1 hour");
    }

    #[test]
    fn test_chunk_interval_defaults_with_insufficient_data() {
        assert_eq!(chunk_interval_for(0, 0, 0), DEFAULT_CHUNK_INTERVAL);
        assert_eq!(chunk_interval_for(1 << 30, 9_999, 1_000), DEFAULT_CHUNK_INTERVAL);
        assert_eq!(chunk_interval_for(1 << 30, 1_000_000, 0), DEFAULT_CHUNK_INTERVAL);
    }

    #[test]
    fn test_chunk_interval_high_ingest_gets_hourly_chunks() {
        // 100-byte rows, 2.6M rows/MiB-chunk; 500M rows/day fills a chunk
        // in well under a day.
        let bytes_per_row = 100i64;
        let total_rows = 10_000_000i64;
        assert_eq!(
            chunk_interval_for(bytes_per_row * total_rows, total_rows, 500_000_000),
            "1 hour"
        );
    }

    #[test]
    fn test_chunk_interval_slow_ingest_gets_weekly_chunks() {
        let bytes_per_row = 100i64;
        let total_rows = 100_000i64;
        // 100k rows/day at 100 B/row: a 256 MiB chunk spans ~26 days
        assert_eq!(
            chunk_interval_for(bytes_per_row * total_rows, total_rows, 100_000),
            "1 week"
        );
    }

    #[test]
    fn test_chunk_interval_moderate_ingest_gets_daily_chunks() {
        let bytes_per_row = 100i64;
        let total_rows = 5_000_000i64;
        // 2M rows/day at 100 B/row: a 256 MiB chunk spans ~1.3 days
        assert_eq!(
            chunk_interval_for(bytes_per_row * total_rows, total_rows, 2_000_000),
            "1 day"
        );
    }
}
