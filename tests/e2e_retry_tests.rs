//! E2E retry tests — exponential backoff through the retry queue.
//!
//! Prerequisites: `./tests/build_e2e_image.sh`

mod e2e;

use e2e::E2eDb;

/// Set up a config whose runs always fail: the target table is dropped
/// after onboarding, so every execution errors on the INSERT. A declared
/// dimension keeps the plan non-degenerate, exercising the execution
/// error path rather than the plan error path.
async fn broken_rollup(db: &E2eDb) {
    db.create_metrics_source("raw.metrics").await;
    db.add_dimension("raw.metrics", "tenant").await;
    db.create_rollup_with_look_back("raw.metrics", "gold", "metrics_1h", "1 hour", "2 hours")
        .await;
    db.execute(
        "INSERT INTO raw.metrics (\"timestamp\", tenant, value) \
         VALUES (now() - INTERVAL '90 minutes', 't', 1.0)",
    )
    .await;
    db.execute("DROP TABLE gold.metrics_1h").await;
}

/// Backoff delay currently scheduled, in seconds.
async fn scheduled_delay_secs(db: &E2eDb) -> f64 {
    db.query_scalar(
        "SELECT EXTRACT(EPOCH FROM (next_retry_time - last_error_time))::float8 \
         FROM silver.rollup_configs WHERE source_table = 'raw.metrics'",
    )
    .await
}

/// Make the scheduled retry due immediately.
async fn expire_backoff(db: &E2eDb) {
    db.execute(
        "UPDATE silver.rollup_configs \
         SET next_retry_time = now() - INTERVAL '1 second' \
         WHERE source_table = 'raw.metrics'",
    )
    .await;
}

#[tokio::test]
async fn test_backoff_ladder_doubles_per_failure() {
    let db = E2eDb::new().await.with_extension().await;
    broken_rollup(&db).await;

    // First failure via the regular path: 5 minutes
    db.perform_rollup().await;
    let (_, _, retry_count) = db.lease_state("raw.metrics").await;
    assert_eq!(retry_count, 1);
    assert!((scheduled_delay_secs(&db).await - 300.0).abs() < 2.0);

    // Second failure via the retry queue: 10 minutes
    expire_backoff(&db).await;
    let swept = db.handle_retries().await;
    assert_eq!(swept, 1);
    let (_, _, retry_count) = db.lease_state("raw.metrics").await;
    assert_eq!(retry_count, 2);
    assert!((scheduled_delay_secs(&db).await - 600.0).abs() < 2.0);

    // Third failure: 20 minutes
    expire_backoff(&db).await;
    db.handle_retries().await;
    let (_, _, retry_count) = db.lease_state("raw.metrics").await;
    assert_eq!(retry_count, 3);
    assert!((scheduled_delay_secs(&db).await - 1200.0).abs() < 2.0);

    // Three failed runs, three fully contextualised error rows
    let errors: i64 = db
        .query_scalar(
            "SELECT count(*) FROM silver.rollup_errors \
             WHERE source_table = 'raw.metrics' AND attempted_query IS NOT NULL",
        )
        .await;
    assert_eq!(errors, 3);
}

#[tokio::test]
async fn test_config_in_backoff_is_not_picked_up_early() {
    let db = E2eDb::new().await.with_extension().await;
    broken_rollup(&db).await;

    db.perform_rollup().await;
    let (_, _, retry_count) = db.lease_state("raw.metrics").await;
    assert_eq!(retry_count, 1);

    // While the backoff is pending, neither entry point touches the config
    db.perform_rollup().await;
    let swept = db.handle_retries().await;
    assert_eq!(swept, 0);
    let (_, _, retry_count) = db.lease_state("raw.metrics").await;
    assert_eq!(retry_count, 1, "backoff must shield the config from re-runs");
}

#[tokio::test]
async fn test_success_clears_retry_state() {
    let db = E2eDb::new().await.with_extension().await;
    broken_rollup(&db).await;

    db.perform_rollup().await;
    let (_, _, retry_count) = db.lease_state("raw.metrics").await;
    assert_eq!(retry_count, 1);

    // Repair the target by re-running the projection DDL by hand
    db.execute(
        "CREATE TABLE gold.metrics_1h (\
            \"timestamp\" TIMESTAMPTZ NOT NULL, \
            tenant TEXT NOT NULL, \
            min_value DOUBLE PRECISION, \
            max_value DOUBLE PRECISION, \
            avg_value DOUBLE PRECISION, \
            rollup_count INTEGER DEFAULT 1, \
            last_updated_at TIMESTAMPTZ DEFAULT now(), \
            PRIMARY KEY (\"timestamp\", tenant))",
    )
    .await;

    expire_backoff(&db).await;
    let swept = db.handle_retries().await;
    assert_eq!(swept, 1);

    let (retry_count, has_error_time, has_retry_time): (i32, bool, bool) = sqlx::query_as(
        "SELECT retry_count, last_error_time IS NOT NULL, next_retry_time IS NOT NULL \
         FROM silver.rollup_configs WHERE source_table = 'raw.metrics'",
    )
    .fetch_one(&db.pool)
    .await
    .unwrap();
    assert_eq!(retry_count, 0, "success must reset the retry counter");
    assert!(!has_error_time, "success must clear last_error_time");
    assert!(!has_retry_time, "success must clear next_retry_time");

    assert!(db.count("gold.metrics_1h").await > 0);
}
