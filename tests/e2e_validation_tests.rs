//! E2E validation and bootstrap tests.
//!
//! Prerequisites: `./tests/build_e2e_image.sh`

mod e2e;

use e2e::E2eDb;

// ── ValidateRollupConfig ───────────────────────────────────────────────────

#[tokio::test]
async fn test_validation_flags_dimension_missing_from_target() {
    let db = E2eDb::new().await.with_extension().await;
    db.create_metrics_source("raw.metrics").await;
    db.create_rollup_with_look_back("raw.metrics", "gold", "metrics_1h", "1 hour", "2 hours")
        .await;

    // Declared after target creation, so the target lacks the column
    db.execute("ALTER TABLE raw.metrics ADD COLUMN region TEXT").await;
    db.add_dimension("raw.metrics", "region").await;

    let (is_valid, message): (bool, String) = sqlx::query_as(
        "SELECT is_valid, message FROM silver.validate_rollup_config() \
         WHERE source_table = 'raw.metrics'",
    )
    .fetch_one(&db.pool)
    .await
    .unwrap();

    assert!(!is_valid);
    assert!(
        message.contains("Missing dimension columns in target table: region"),
        "unexpected message: {}",
        message
    );
}

#[tokio::test]
async fn test_validation_passes_for_well_formed_config() {
    let db = E2eDb::new().await.with_extension().await;
    db.create_metrics_source("raw.metrics").await;
    db.add_dimension("raw.metrics", "tenant").await;
    db.create_rollup_with_look_back("raw.metrics", "gold", "metrics_1h", "1 hour", "2 hours")
        .await;

    let (is_valid, message): (bool, String) = sqlx::query_as(
        "SELECT is_valid, message FROM silver.validate_rollup_config() \
         WHERE source_table = 'raw.metrics'",
    )
    .fetch_one(&db.pool)
    .await
    .unwrap();

    assert!(is_valid, "message was: {}", message);
    assert_eq!(message, "OK");
}

#[tokio::test]
async fn test_validation_flags_dropped_target() {
    let db = E2eDb::new().await.with_extension().await;
    db.create_metrics_source("raw.metrics").await;
    db.create_rollup_with_look_back("raw.metrics", "gold", "metrics_1h", "1 hour", "2 hours")
        .await;
    db.execute("DROP TABLE gold.metrics_1h").await;

    let (is_valid, message): (bool, String) = sqlx::query_as(
        "SELECT is_valid, message FROM silver.validate_rollup_config() \
         WHERE source_table = 'raw.metrics'",
    )
    .fetch_one(&db.pool)
    .await
    .unwrap();

    assert!(!is_valid);
    assert!(message.contains("Target table does not exist"));
}

#[tokio::test]
async fn test_validation_flags_source_without_timestamp() {
    let db = E2eDb::new().await.with_extension().await;
    db.create_metrics_source("raw.metrics").await;
    db.create_rollup_with_look_back("raw.metrics", "gold", "metrics_1h", "1 hour", "2 hours")
        .await;
    // Swap the source for one without a timestamp column
    db.execute("ALTER TABLE raw.metrics RENAME COLUMN \"timestamp\" TO recorded_at")
        .await;

    let (is_valid, message): (bool, String) = sqlx::query_as(
        "SELECT is_valid, message FROM silver.validate_rollup_config() \
         WHERE source_table = 'raw.metrics'",
    )
    .fetch_one(&db.pool)
    .await
    .unwrap();

    assert!(!is_valid);
    assert!(message.contains("Source table has no timestamp column"));
}

// ── CreateRollupTable ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_bootstrap_projects_target_schema() {
    let db = E2eDb::new().await.with_extension().await;
    db.execute("CREATE SCHEMA raw").await;
    db.execute(
        "CREATE TABLE raw.events (\
            \"timestamp\" TIMESTAMPTZ NOT NULL, \
            tenant TEXT NOT NULL, \
            value DOUBLE PRECISION, \
            payload JSONB, \
            status TEXT)",
    )
    .await;
    db.add_dimension("raw.events", "tenant").await;
    db.create_rollup("raw.events", "gold", "events_1h", "1 hour").await;

    assert!(db.table_exists("gold", "events_1h").await);

    let columns: Vec<(String, String)> = sqlx::query_as(
        "SELECT column_name, data_type FROM information_schema.columns \
         WHERE table_schema = 'gold' AND table_name = 'events_1h' \
         ORDER BY ordinal_position",
    )
    .fetch_all(&db.pool)
    .await
    .unwrap();

    let names: Vec<&str> = columns.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "timestamp",
            "tenant",
            "min_value",
            "max_value",
            "avg_value",
            "payload",
            "status",
            "rollup_count",
            "last_updated_at",
        ]
    );

    // JSON columns are projected as arrays
    let payload_type = &columns.iter().find(|(n, _)| n == "payload").unwrap().1;
    assert_eq!(payload_type, "ARRAY");

    // Primary key covers (timestamp, dims...)
    let pk_cols: Vec<String> = sqlx::query_scalar(
        "SELECT a.attname::text \
         FROM pg_index i \
         JOIN pg_attribute a ON a.attrelid = i.indrelid \
                            AND a.attnum = ANY(i.indkey) \
         WHERE i.indrelid = 'gold.events_1h'::regclass AND i.indisprimary \
         ORDER BY array_position(i.indkey::int2[], a.attnum)",
    )
    .fetch_all(&db.pool)
    .await
    .unwrap();
    assert_eq!(pk_cols, vec!["timestamp".to_string(), "tenant".to_string()]);

    // Config row registered and active
    let (is_active, status): (bool, String) = sqlx::query_as(
        "SELECT is_active, status FROM silver.rollup_configs \
         WHERE source_table = 'raw.events' AND target_table = 'gold.events_1h'",
    )
    .fetch_one(&db.pool)
    .await
    .unwrap();
    assert!(is_active);
    assert_eq!(status, "idle");
}

#[tokio::test]
async fn test_bootstrap_creates_standard_indexes() {
    let db = E2eDb::new().await.with_extension().await;
    db.create_metrics_source("raw.metrics").await;
    db.add_dimension("raw.metrics", "tenant").await;
    db.create_rollup("raw.metrics", "gold", "metrics_1h", "1 hour").await;

    let index_defs: Vec<String> = sqlx::query_scalar(
        "SELECT indexdef FROM pg_indexes \
         WHERE schemaname = 'gold' AND tablename = 'metrics_1h'",
    )
    .fetch_all(&db.pool)
    .await
    .unwrap();

    assert!(
        index_defs.iter().any(|d| d.contains("USING brin")),
        "missing BRIN index: {:?}",
        index_defs
    );
    assert!(
        index_defs
            .iter()
            .any(|d| d.contains("tenant") && d.contains("\"timestamp\" DESC")),
        "missing composite dimension index: {:?}",
        index_defs
    );
}

#[tokio::test]
async fn test_bootstrap_rejects_duplicates_and_missing_sources() {
    let db = E2eDb::new().await.with_extension().await;
    db.create_metrics_source("raw.metrics").await;
    db.create_rollup("raw.metrics", "gold", "metrics_1h", "1 hour").await;

    let duplicate = db
        .try_execute(
            "SELECT silver.create_rollup_table('raw.metrics', 'gold', 'metrics_1h', '1 hour')",
        )
        .await;
    assert!(duplicate.is_err(), "duplicate onboarding must fail");

    let missing = db
        .try_execute(
            "SELECT silver.create_rollup_table('raw.nonexistent', 'gold', 'x_1h', '1 hour')",
        )
        .await;
    assert!(missing.is_err(), "missing source must fail");
}

#[tokio::test]
async fn test_detailed_stats_runs_without_partitioned_targets() {
    let db = E2eDb::new().await.with_extension().await;
    // Without pg_partman the targets are plain tables; the stats call
    // still succeeds and simply reports nothing.
    let rows: i64 = db
        .query_scalar("SELECT count(*) FROM silver.get_detailed_stats('gold.%')")
        .await;
    assert_eq!(rows, 0);
}
