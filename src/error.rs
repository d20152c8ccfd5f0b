//! Error types for pg_rollup.
//!
//! All errors that can occur within the extension are represented by
//! [`PgRollupError`]. Errors are propagated via `Result<T, PgRollupError>`
//! throughout the codebase and converted to PostgreSQL errors at the API
//! boundary using `pgrx::error!()`.
//!
//! # Error Classification
//!
//! Errors are classified into kinds that determine how the orchestrator
//! reacts to a failed run:
//! - **Transient** — store-level failures (deadlock, SPI error). Logged and
//!   retried with backoff.
//! - **Plan** — the rollup plan cannot be built (no timestamp column,
//!   nothing to aggregate). Aborts the config, retried with backoff.
//! - **Execution** — the aggregation statement itself failed. Aborts the
//!   config, retried with backoff; the attempted query is preserved.
//! - **Budget** — the claimed lease was already past `max_execution_time`.
//! - **Lease** — the lease was revoked mid-run. Progress is *not* written;
//!   only a diagnostic is logged, no retry is scheduled.
//! - **User** — invalid arguments, duplicate configs. Surfaced to the
//!   caller, never retried.
//!
//! # Backoff
//!
//! Failed runs are rescheduled with exponential backoff:
//! `next_retry_time = now + base · 2^(retry_count − 1)`, base 5 minutes.
//! [`backoff_delay_secs`] is the single source of that law.

use std::fmt;

/// Default base delay for retry backoff: 5 minutes.
pub const RETRY_BASE_DELAY_SECS: i64 = 300;

/// Diagnostic record carried to the error log.
///
/// Mirrors the fields a `GET STACKED DIAGNOSTICS` block captures, so one
/// failed run produces one fully contextualised error row.
#[derive(Debug, Clone, Default)]
pub struct SqlFailure {
    pub message: String,
    pub sql_state: Option<String>,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub context: Option<String>,
    pub attempted_query: Option<String>,
}

impl SqlFailure {
    pub fn new(message: impl Into<String>) -> Self {
        SqlFailure {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.attempted_query = Some(query.into());
        self
    }
}

impl fmt::Display for SqlFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref state) = self.sql_state {
            write!(f, " [{}]", state)?;
        }
        Ok(())
    }
}

/// Primary error type for the extension.
#[derive(Debug, thiserror::Error)]
pub enum PgRollupError {
    // ── User errors — surfaced to the caller, never retried ──────────────
    /// The specified rollup config was not found.
    #[error("rollup config not found: {0}")]
    NotFound(String),

    /// A rollup config for this (source, target) pair already exists.
    #[error("rollup config already exists: {0}")]
    AlreadyExists(String),

    /// An invalid argument was provided to an API function.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // ── Plan errors — abort the config, retry with backoff ───────────────
    /// The source table has no `timestamp` column.
    #[error("source table {0} has no timestamp column")]
    MissingTimestampColumn(String),

    /// The plan has no dimensions and no aggregated columns.
    #[error("degenerate rollup plan for {0}: no dimensions and no aggregated columns")]
    DegeneratePlan(String),

    // ── Run errors ───────────────────────────────────────────────────────
    /// The claimed lease was already older than `max_execution_time`.
    #[error("execution budget exceeded: {0}")]
    BudgetExceeded(String),

    /// The lease was revoked mid-run (guarded release matched zero rows).
    #[error("lease lost: {0}")]
    LeaseLost(String),

    /// The aggregation statement failed on the store.
    #[error("rollup execution failed: {0}")]
    ExecutionFailed(Box<SqlFailure>),

    // ── System errors — retry with backoff ───────────────────────────────
    /// An SPI (Server Programming Interface) error occurred.
    #[error("SPI error: {0}")]
    SpiError(String),

    // ── Internal errors — should not happen ──────────────────────────────
    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    InternalError(String),
}

/// Classification of error kind for logging and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupErrorKind {
    User,
    Plan,
    Budget,
    Lease,
    Execution,
    Transient,
    Internal,
}

impl fmt::Display for RollupErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RollupErrorKind::User => "USER",
            RollupErrorKind::Plan => "PLAN",
            RollupErrorKind::Budget => "BUDGET",
            RollupErrorKind::Lease => "LEASE",
            RollupErrorKind::Execution => "EXECUTION",
            RollupErrorKind::Transient => "TRANSIENT",
            RollupErrorKind::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

impl PgRollupError {
    /// Classify the error for logging and retry decisions.
    pub fn kind(&self) -> RollupErrorKind {
        match self {
            PgRollupError::NotFound(_)
            | PgRollupError::AlreadyExists(_)
            | PgRollupError::InvalidArgument(_) => RollupErrorKind::User,

            PgRollupError::MissingTimestampColumn(_) | PgRollupError::DegeneratePlan(_) => {
                RollupErrorKind::Plan
            }

            PgRollupError::BudgetExceeded(_) => RollupErrorKind::Budget,
            PgRollupError::LeaseLost(_) => RollupErrorKind::Lease,
            PgRollupError::ExecutionFailed(_) => RollupErrorKind::Execution,
            PgRollupError::SpiError(_) => RollupErrorKind::Transient,
            PgRollupError::InternalError(_) => RollupErrorKind::Internal,
        }
    }

    /// Whether a failed run with this error schedules a backoff retry.
    ///
    /// Lost leases are a silent skip (another worker owns the config now)
    /// and user errors never reach the per-config run path.
    pub fn schedules_retry(&self) -> bool {
        matches!(
            self.kind(),
            RollupErrorKind::Plan
                | RollupErrorKind::Budget
                | RollupErrorKind::Execution
                | RollupErrorKind::Transient
                | RollupErrorKind::Internal
        )
    }

    /// Whether this error produces an error-log row.
    ///
    /// Lost leases log a diagnostic note only.
    pub fn is_logged(&self) -> bool {
        !matches!(self, PgRollupError::LeaseLost(_))
    }

    /// Convert into the diagnostic record written to the error log.
    pub fn to_failure(&self) -> SqlFailure {
        match self {
            PgRollupError::ExecutionFailed(failure) => (**failure).clone(),
            other => SqlFailure::new(other.to_string()),
        }
    }
}

// ── Backoff law ────────────────────────────────────────────────────────────

/// Backoff delay in seconds for the given (post-increment) retry count.
///
/// `retry_count` is the value *after* the failure was recorded, so the
/// first failure (retry_count = 1) waits one base delay, the second twice
/// that, and so on: `base · 2^(retry_count − 1)`.
///
/// The shift saturates so pathological retry counts cannot overflow; the
/// ceiling is expected to be bounded operationally (configs get paused).
pub fn backoff_delay_secs(retry_count: i32, base_secs: i64) -> i64 {
    let exponent = (retry_count.max(1) - 1).min(32) as u32;
    base_secs.saturating_mul(1i64 << exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_ladder() {
        // 5, 10, 20, 40 minutes for the first four failures
        assert_eq!(backoff_delay_secs(1, RETRY_BASE_DELAY_SECS), 300);
        assert_eq!(backoff_delay_secs(2, RETRY_BASE_DELAY_SECS), 600);
        assert_eq!(backoff_delay_secs(3, RETRY_BASE_DELAY_SECS), 1200);
        assert_eq!(backoff_delay_secs(4, RETRY_BASE_DELAY_SECS), 2400);
    }

    #[test]
    fn test_backoff_zero_and_negative_counts_behave_like_first() {
        assert_eq!(backoff_delay_secs(0, 300), 300);
        assert_eq!(backoff_delay_secs(-3, 300), 300);
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        let huge = backoff_delay_secs(i32::MAX, RETRY_BASE_DELAY_SECS);
        assert!(huge > 0);
        assert_eq!(huge, RETRY_BASE_DELAY_SECS.saturating_mul(1i64 << 32));
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(
            PgRollupError::InvalidArgument("x".into()).kind(),
            RollupErrorKind::User
        );
        assert_eq!(
            PgRollupError::MissingTimestampColumn("t".into()).kind(),
            RollupErrorKind::Plan
        );
        assert_eq!(
            PgRollupError::DegeneratePlan("t".into()).kind(),
            RollupErrorKind::Plan
        );
        assert_eq!(
            PgRollupError::BudgetExceeded("x".into()).kind(),
            RollupErrorKind::Budget
        );
        assert_eq!(
            PgRollupError::LeaseLost("x".into()).kind(),
            RollupErrorKind::Lease
        );
        assert_eq!(
            PgRollupError::SpiError("x".into()).kind(),
            RollupErrorKind::Transient
        );
        assert_eq!(
            PgRollupError::InternalError("x".into()).kind(),
            RollupErrorKind::Internal
        );
    }

    #[test]
    fn test_retry_scheduling() {
        assert!(PgRollupError::SpiError("x".into()).schedules_retry());
        assert!(PgRollupError::DegeneratePlan("t".into()).schedules_retry());
        assert!(PgRollupError::BudgetExceeded("x".into()).schedules_retry());
        assert!(PgRollupError::ExecutionFailed(Box::new(SqlFailure::new("boom"))).schedules_retry());

        assert!(!PgRollupError::LeaseLost("x".into()).schedules_retry());
        assert!(!PgRollupError::NotFound("x".into()).schedules_retry());
        assert!(!PgRollupError::InvalidArgument("x".into()).schedules_retry());
    }

    #[test]
    fn test_lost_lease_is_not_logged() {
        assert!(!PgRollupError::LeaseLost("x".into()).is_logged());
        assert!(PgRollupError::SpiError("x".into()).is_logged());
    }

    #[test]
    fn test_execution_failure_preserves_diagnostics() {
        let failure = SqlFailure::new("division by zero")
            .with_context("rollup execution")
            .with_query("INSERT INTO gold.metrics_1h ...");
        let err = PgRollupError::ExecutionFailed(Box::new(failure));

        let report = err.to_failure();
        assert_eq!(report.message, "division by zero");
        assert_eq!(report.context.as_deref(), Some("rollup execution"));
        assert!(report.attempted_query.unwrap().starts_with("INSERT INTO"));
    }

    #[test]
    fn test_plain_error_to_failure_keeps_message() {
        let report = PgRollupError::SpiError("connection reset".into()).to_failure();
        assert!(report.message.contains("connection reset"));
        assert!(report.attempted_query.is_none());
    }

    #[test]
    fn test_sql_failure_display_includes_state() {
        let mut f = SqlFailure::new("deadlock detected");
        f.sql_state = Some("40P01".into());
        assert_eq!(f.to_string(), "deadlock detected [40P01]");
    }
}
