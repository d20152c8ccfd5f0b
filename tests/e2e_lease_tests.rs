//! E2E lease tests — stale-lease takeover through the orchestrator.
//!
//! Prerequisites: `./tests/build_e2e_image.sh`

mod e2e;

use e2e::E2eDb;

#[tokio::test]
async fn test_stale_lease_is_taken_over_by_perform_rollup() {
    let db = E2eDb::new().await.with_extension().await;
    db.create_metrics_source("raw.metrics").await;
    db.add_dimension("raw.metrics", "tenant").await;
    db.create_rollup_with_look_back("raw.metrics", "gold", "metrics_1h", "1 hour", "2 hours")
        .await;
    db.execute(
        "INSERT INTO raw.metrics (\"timestamp\", tenant, value) \
         VALUES (now() - INTERVAL '90 minutes', 't', 42.0)",
    )
    .await;

    // Worker A crashed mid-run just past the alert threshold
    db.execute(
        "UPDATE silver.rollup_configs \
         SET status = 'processing', worker_id = 'crashed-worker', \
             started_at = now() - alert_threshold - INTERVAL '1 second' \
         WHERE source_table = 'raw.metrics'",
    )
    .await;

    // Worker B's sweep must take the lease over and complete the run
    let completed = db.perform_rollup().await;
    assert_eq!(completed, 1, "stale lease must be claimable by the orchestrator");

    let (status, worker, _) = db.lease_state("raw.metrics").await;
    assert_eq!(status, "idle");
    assert!(worker.is_none());
    assert!(db.watermark_epoch("raw.metrics").await.is_some());

    // A's tardy release hits the worker_id guard and changes nothing
    let tardy: i64 = db
        .query_scalar(
            "WITH released AS ( \
                 UPDATE silver.rollup_configs \
                 SET status = 'idle', worker_id = NULL, started_at = NULL \
                 WHERE source_table = 'raw.metrics' AND worker_id = 'crashed-worker' \
                 RETURNING 1) \
             SELECT count(*)::int8 FROM released",
        )
        .await;
    assert_eq!(tardy, 0);

    // Progress survived the tardy release attempt
    assert!(db.watermark_epoch("raw.metrics").await.is_some());
}

#[tokio::test]
async fn test_fresh_lease_is_skipped() {
    let db = E2eDb::new().await.with_extension().await;
    db.create_metrics_source("raw.metrics").await;
    db.create_rollup_with_look_back("raw.metrics", "gold", "metrics_1h", "1 hour", "2 hours")
        .await;

    // Another worker holds a fresh lease
    db.execute(
        "UPDATE silver.rollup_configs \
         SET status = 'processing', worker_id = 'busy-worker', started_at = now() \
         WHERE source_table = 'raw.metrics'",
    )
    .await;

    let completed = db.perform_rollup().await;
    assert_eq!(completed, 0, "a fresh lease must not be disturbed");

    let (status, worker, _) = db.lease_state("raw.metrics").await;
    assert_eq!(status, "processing");
    assert_eq!(worker.as_deref(), Some("busy-worker"));
}

#[tokio::test]
async fn test_long_abandoned_lease_hits_the_budget_check() {
    let db = E2eDb::new().await.with_extension().await;
    db.create_metrics_source("raw.metrics").await;
    db.add_dimension("raw.metrics", "tenant").await;
    db.create_rollup_with_look_back("raw.metrics", "gold", "metrics_1h", "1 hour", "2 hours")
        .await;

    // Abandoned for longer than max_execution_time: the takeover must be
    // surfaced as a budget error, not silently resumed.
    db.execute(
        "UPDATE silver.rollup_configs \
         SET status = 'processing', worker_id = 'hung-worker', \
             started_at = now() - max_execution_time - INTERVAL '1 minute' \
         WHERE source_table = 'raw.metrics'",
    )
    .await;

    let completed = db.perform_rollup().await;
    assert_eq!(completed, 0);

    let (status, worker, retry_count) = db.lease_state("raw.metrics").await;
    assert_eq!(status, "idle", "budget overrun must release the lease");
    assert!(worker.is_none());
    assert_eq!(retry_count, 1, "budget overrun counts as a failed run");

    let budget_errors: i64 = db
        .query_scalar(
            "SELECT count(*) FROM silver.rollup_errors \
             WHERE source_table = 'raw.metrics' \
               AND error_message LIKE '%budget%'",
        )
        .await;
    assert_eq!(budget_errors, 1);
}
