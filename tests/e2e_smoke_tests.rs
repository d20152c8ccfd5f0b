//! E2E smoke tests — verify the test harness and extension load correctly.
//!
//! Prerequisites: `./tests/build_e2e_image.sh`

mod e2e;

use e2e::E2eDb;

#[tokio::test]
async fn test_create_extension_succeeds() {
    let db = E2eDb::new().await.with_extension().await;

    let exists: bool = db
        .query_scalar("SELECT EXISTS(SELECT 1 FROM pg_extension WHERE extname = 'pg_rollup')")
        .await;
    assert!(exists, "Extension should be installed");
}

#[tokio::test]
async fn test_catalog_tables_created() {
    let db = E2eDb::new().await.with_extension().await;

    let tables = [
        "rollup_configs",
        "rollup_dimensions",
        "rollup_refresh_log",
        "rollup_errors",
    ];
    for table in tables {
        assert!(
            db.table_exists("silver", table).await,
            "Table silver.{} should exist",
            table
        );
    }
}

#[tokio::test]
async fn test_operator_functions_exist() {
    let db = E2eDb::new().await.with_extension().await;

    let functions = [
        "perform_rollup",
        "handle_retries",
        "create_rollup_table",
        "maintain_timeseries_tables",
        "validate_rollup_config",
        "rollup_status",
        "get_partition_stats",
        "get_detailed_stats",
        "time_bucket",
        "schedule_rollup_jobs",
    ];
    for function in functions {
        let exists: bool = db
            .query_scalar(&format!(
                "SELECT EXISTS(SELECT 1 FROM pg_proc p \
                 JOIN pg_namespace n ON n.oid = p.pronamespace \
                 WHERE n.nspname = 'silver' AND p.proname = '{}')",
                function
            ))
            .await;
        assert!(exists, "Function silver.{}() should exist", function);
    }
}

#[tokio::test]
async fn test_perform_rollup_with_no_configs_is_a_no_op() {
    let db = E2eDb::new().await.with_extension().await;
    assert_eq!(db.perform_rollup().await, 0);
    assert_eq!(db.handle_retries().await, 0);
}

#[tokio::test]
async fn test_disabled_extension_skips_processing() {
    let db = E2eDb::new().await.with_extension().await;
    db.create_metrics_source("raw.metrics").await;
    db.create_rollup_with_look_back("raw.metrics", "gold", "metrics_1h", "1 hour", "2 hours")
        .await;
    db.execute(
        "INSERT INTO raw.metrics (\"timestamp\", tenant, value) \
         VALUES (now() - INTERVAL '90 minutes', 't', 1.0)",
    )
    .await;

    // SET is session-local, so pin one connection for the whole check
    let mut conn = db.pool.acquire().await.unwrap();
    sqlx::query("SET pg_rollup.enabled = off")
        .execute(&mut *conn)
        .await
        .unwrap();
    let completed: i64 = sqlx::query_scalar("SELECT silver.perform_rollup()")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!(completed, 0);

    sqlx::query("SET pg_rollup.enabled = on")
        .execute(&mut *conn)
        .await
        .unwrap();
    let completed: i64 = sqlx::query_scalar("SELECT silver.perform_rollup()")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn test_schedule_jobs_without_pg_cron_errors_cleanly() {
    let db = E2eDb::new().await.with_extension().await;
    let result = db.try_execute("SELECT silver.schedule_rollup_jobs()").await;
    assert!(result.is_err(), "scheduling without pg_cron must error");

    // Unscheduling is a harmless no-op without pg_cron
    let removed: i64 = db.query_scalar("SELECT silver.unschedule_rollup_jobs()").await;
    assert_eq!(removed, 0);
}
