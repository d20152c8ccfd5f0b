//! Window controller — pure arithmetic for per-run processing windows.
//!
//! All functions here are pure over Unix-epoch microseconds (`i64`) and
//! plain second counts; the catalog layer converts to and from SQL
//! timestamps at the store boundary. Keeping the control laws free of SPI
//! makes every branch unit-testable.
//!
//! The laws:
//! - **start** = `last_processed_time`, or `now − look_back_window` on the
//!   first run.
//! - **window** seed = `processing_window`, capped at the first-run cap
//!   when there is no history; load-adjusted otherwise (×0.5 when the
//!   store is busy, ×1.5 when quiet, capped at `max_look_back_window`).
//! - **safety buffer** keeps the window clear of still-live buckets:
//!   30 s for sub-second/1 s intervals, 60 s for 1 m, otherwise one
//!   rollup interval.
//! - **end** = `min(now − buffer, start + window)`; an empty window
//!   (`start ≥ end`) means "no work", not an error.
//! - After a successful run the stored window adapts: ×0.8 above the
//!   shrink threshold, ×1.2 (capped) below the grow threshold.

pub const US_PER_SEC: i64 = 1_000_000;

/// A half-open processing window `[start, end)` in epoch microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start_us: i64,
    pub end_us: i64,
}

impl Window {
    /// Window width in whole seconds.
    pub fn width_secs(&self) -> i64 {
        (self.end_us - self.start_us) / US_PER_SEC
    }
}

/// Safety buffer in seconds for a given rollup interval.
///
/// Sub-minute intervals get a fixed buffer wide enough for ingest to settle;
/// anything coarser waits out one full bucket.
pub fn safety_buffer_secs(rollup_interval_secs: i64) -> i64 {
    if rollup_interval_secs <= 1 {
        30
    } else if rollup_interval_secs == 60 {
        60
    } else {
        rollup_interval_secs
    }
}

/// Load multiplier derived from the count of active peer sessions.
///
/// More than `busy_threshold` peers halves the window; fewer than
/// `idle_threshold` grows it by half. The band in between is neutral.
pub fn load_factor(active_peers: i64, busy_threshold: i64, idle_threshold: i64) -> f64 {
    if active_peers > busy_threshold {
        0.5
    } else if active_peers < idle_threshold {
        1.5
    } else {
        1.0
    }
}

/// Width in seconds of the window to attempt this run.
///
/// On the first run (no progress watermark) the stored `processing_window`
/// is capped at `first_run_cap_secs` and no load adjustment is applied —
/// there is no throughput history to adjust against. Subsequent runs apply
/// the load factor and clamp at `max_look_back_secs`.
pub fn optimal_window_secs(
    first_run: bool,
    processing_window_secs: i64,
    first_run_cap_secs: i64,
    load: f64,
    max_look_back_secs: i64,
) -> i64 {
    if first_run {
        return processing_window_secs.min(first_run_cap_secs);
    }
    let adjusted = (processing_window_secs as f64 * load) as i64;
    adjusted.min(max_look_back_secs).max(1)
}

/// Compute the processing window for one run, or `None` when there is
/// nothing to do yet (the start has caught up to `now − buffer`).
pub fn compute_window(
    now_us: i64,
    last_processed_us: Option<i64>,
    look_back_secs: i64,
    window_secs: i64,
    buffer_secs: i64,
) -> Option<Window> {
    let start_us = match last_processed_us {
        Some(ts) => ts,
        None => now_us - look_back_secs * US_PER_SEC,
    };
    let end_us = (now_us - buffer_secs * US_PER_SEC).min(start_us + window_secs * US_PER_SEC);

    if start_us >= end_us {
        None
    } else {
        Some(Window { start_us, end_us })
    }
}

/// Post-run adaptation of the stored processing window.
///
/// Large batches shrink the window to 0.8×; small ones grow it to 1.2×,
/// never exceeding `max_look_back_secs`.
pub fn adjusted_processing_window_secs(
    rows_processed: i64,
    optimal_secs: i64,
    max_look_back_secs: i64,
    shrink_threshold: i64,
    grow_threshold: i64,
) -> i64 {
    if rows_processed > shrink_threshold {
        ((optimal_secs as f64 * 0.8) as i64).max(1)
    } else if rows_processed < grow_threshold {
        ((optimal_secs as f64 * 1.2) as i64).min(max_look_back_secs)
    } else {
        optimal_secs
    }
}

/// Exponential moving average of per-run wall time, α = 0.3.
pub fn ewma_processing_secs(prev: Option<f64>, observed_secs: f64) -> f64 {
    match prev {
        Some(p) => 0.7 * p + 0.3 * observed_secs,
        None => observed_secs,
    }
}
