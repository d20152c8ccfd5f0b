//! GUC (Grand Unified Configuration) variables for pg_rollup.
//!
//! These are registered in `_PG_init()` and control the orchestrator's
//! behavior. All GUC names are prefixed with `pg_rollup.`.

use pgrx::guc::*;

/// Master enable/disable switch for the extension.
pub static PGR_ENABLED: GucSetting<bool> = GucSetting::<bool>::new(true);

/// Active peer sessions above which the processing window is halved.
pub static PGR_BUSY_SESSION_THRESHOLD: GucSetting<i32> = GucSetting::<i32>::new(5);

/// Active peer sessions below which the processing window grows by 1.5×.
pub static PGR_IDLE_SESSION_THRESHOLD: GucSetting<i32> = GucSetting::<i32>::new(2);

/// Cap on the processing window for a config's first ever run, in seconds.
pub static PGR_FIRST_RUN_WINDOW_CAP_SECONDS: GucSetting<i32> = GucSetting::<i32>::new(3_600);

/// Rows processed above which the processing window shrinks to 0.8×.
pub static PGR_WINDOW_SHRINK_ROW_THRESHOLD: GucSetting<i32> = GucSetting::<i32>::new(1_000_000);

/// Rows processed below which the processing window grows to 1.2×.
pub static PGR_WINDOW_GROW_ROW_THRESHOLD: GucSetting<i32> = GucSetting::<i32>::new(100_000);

/// Base retry backoff delay in seconds (doubled for each failed attempt).
pub static PGR_RETRY_BASE_DELAY_SECONDS: GucSetting<i32> = GucSetting::<i32>::new(300);

/// Register all GUC variables. Called from `_PG_init()`.
pub fn register_gucs() {
    GucRegistry::define_bool_guc(
        c"pg_rollup.enabled",
        c"Master enable/disable switch for pg_rollup.",
        c"When false, perform_rollup() and handle_retries() return immediately without processing.",
        &PGR_ENABLED,
        GucContext::Suset,
        GucFlags::default(),
    );

    GucRegistry::define_int_guc(
        c"pg_rollup.busy_session_threshold",
        c"Active peer sessions above which the processing window is halved.",
        c"Sampled from pg_stat_activity before each run. Raise on hosts that routinely run many concurrent clients.",
        &PGR_BUSY_SESSION_THRESHOLD,
        1,     // min
        1_000, // max
        GucContext::Suset,
        GucFlags::default(),
    );

    GucRegistry::define_int_guc(
        c"pg_rollup.idle_session_threshold",
        c"Active peer sessions below which the processing window grows by 1.5x.",
        c"Must be below busy_session_threshold to leave a neutral band.",
        &PGR_IDLE_SESSION_THRESHOLD,
        0,   // min
        100, // max
        GucContext::Suset,
        GucFlags::default(),
    );

    GucRegistry::define_int_guc(
        c"pg_rollup.first_run_window_cap_seconds",
        c"Cap on the processing window for a config's first run, in seconds.",
        c"A new config has no throughput history, so the first batch is bounded to avoid a surprise full-table scan.",
        &PGR_FIRST_RUN_WINDOW_CAP_SECONDS,
        60,      // min: 1 minute
        604_800, // max: 1 week
        GucContext::Suset,
        GucFlags::default(),
    );

    GucRegistry::define_int_guc(
        c"pg_rollup.window_shrink_row_threshold",
        c"Rows processed above which the processing window shrinks to 0.8x.",
        c"Adaptive batch sizing: large batches indicate the window is too wide for current ingest volume.",
        &PGR_WINDOW_SHRINK_ROW_THRESHOLD,
        1_000,       // min
        100_000_000, // max
        GucContext::Suset,
        GucFlags::default(),
    );

    GucRegistry::define_int_guc(
        c"pg_rollup.window_grow_row_threshold",
        c"Rows processed below which the processing window grows to 1.2x.",
        c"Adaptive batch sizing: small batches indicate headroom; growth is capped at max_look_back_window.",
        &PGR_WINDOW_GROW_ROW_THRESHOLD,
        0,          // min
        10_000_000, // max
        GucContext::Suset,
        GucFlags::default(),
    );

    GucRegistry::define_int_guc(
        c"pg_rollup.retry_base_delay_seconds",
        c"Base retry backoff delay in seconds.",
        c"A failed config is retried after base * 2^(retry_count - 1) seconds.",
        &PGR_RETRY_BASE_DELAY_SECONDS,
        1,      // min
        86_400, // max: 1 day
        GucContext::Suset,
        GucFlags::default(),
    );
}

// ── Convenience accessors ──────────────────────────────────────────────────

/// Returns the current value of `pg_rollup.enabled`.
pub fn pg_rollup_enabled() -> bool {
    PGR_ENABLED.get()
}

/// Returns the busy-session threshold for load-adjusted windows.
pub fn pg_rollup_busy_session_threshold() -> i64 {
    PGR_BUSY_SESSION_THRESHOLD.get() as i64
}

/// Returns the idle-session threshold for load-adjusted windows.
pub fn pg_rollup_idle_session_threshold() -> i64 {
    PGR_IDLE_SESSION_THRESHOLD.get() as i64
}

/// Returns the first-run processing window cap in seconds.
pub fn pg_rollup_first_run_window_cap_secs() -> i64 {
    PGR_FIRST_RUN_WINDOW_CAP_SECONDS.get() as i64
}

/// Returns the row threshold above which the window shrinks.
pub fn pg_rollup_window_shrink_row_threshold() -> i64 {
    PGR_WINDOW_SHRINK_ROW_THRESHOLD.get() as i64
}

/// Returns the row threshold below which the window grows.
pub fn pg_rollup_window_grow_row_threshold() -> i64 {
    PGR_WINDOW_GROW_ROW_THRESHOLD.get() as i64
}

/// Returns the base retry backoff delay in seconds.
pub fn pg_rollup_retry_base_delay_secs() -> i64 {
    PGR_RETRY_BASE_DELAY_SECONDS.get() as i64
}
