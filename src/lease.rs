//! Lease manager — optimistic claim and release of rollup configs.
//!
//! Mutual exclusion is enforced entirely by the store: the claim is a
//! single conditional `UPDATE … RETURNING`, which is the linearisation
//! point. At most one worker holds `status = 'processing'` for a config at
//! any time, modulo stale-lease takeover after `alert_threshold`.
//!
//! A takeover is silent and counts as a normal claim; the evicted worker's
//! eventual release (or progress write) fails its `worker_id` guard and is
//! treated as a lost lease.

use pgrx::prelude::*;

use crate::catalog::{RollupConfig, CONFIG_COLUMNS};
use crate::error::PgRollupError;

/// Opaque identity of this worker, stable for the backend's lifetime.
pub fn worker_id() -> String {
    format!("pg_rollup:{}", std::process::id())
}

/// Attempt to claim a config.
///
/// Succeeds when the lease is free or stale (held longer than
/// `alert_threshold`). Returns the refreshed config row on success, `None`
/// when another worker holds a fresh lease.
pub fn claim(config_id: i64, worker: &str) -> Result<Option<RollupConfig>, PgRollupError> {
    let sql = format!(
        "UPDATE silver.rollup_configs \
         SET status = 'processing', worker_id = $2, started_at = now(), \
             updated_at = now() \
         WHERE id = $1 \
           AND (status = 'idle' \
                OR (status = 'processing' AND started_at < now() - alert_threshold)) \
         RETURNING {CONFIG_COLUMNS}",
    );

    Spi::connect_mut(|client| {
        let table = client
            .update(&sql, None, &[config_id.into(), worker.into()])
            .map_err(|e| PgRollupError::SpiError(e.to_string()))?;

        for row in table {
            return RollupConfig::from_spi_row(&row).map(Some);
        }
        Ok(None)
    })
}

/// Release a claimed config, guarded by worker identity.
///
/// Returns `true` when the lease was released, `false` when it had already
/// been revoked (taken over) — in which case the caller must not write
/// progress and should log a diagnostic only.
pub fn release(config_id: i64, worker: &str) -> Result<bool, PgRollupError> {
    let released = Spi::connect_mut(|client| {
        client
            .update(
                "UPDATE silver.rollup_configs \
                 SET status = 'idle', worker_id = NULL, started_at = NULL, \
                     updated_at = now() \
                 WHERE id = $1 AND worker_id = $2",
                None,
                &[config_id.into(), worker.into()],
            )
            .map(|table| table.len())
            .map_err(|e| PgRollupError::SpiError(e.to_string()))
    })?;

    Ok(released > 0)
}
