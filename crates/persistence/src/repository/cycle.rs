//! Cycle state repository — versioned single-row orchestrator state
//!
//! There is no in-process state between invocations; everything the
//! orchestrator needs to resume lives in this row. All writes are
//! compare-and-swap style conditional updates, so overlapping invocations
//! coordinate through the storage layer instead of shared memory.

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// The singleton orchestrator state row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CycleStateRecord {
    pub version: i64,
    pub cycle: i64,
    pub last_mined_cycle: i64,
    pub last_tournament_cycle: i64,
}

/// Repository for orchestrator cycle state
pub struct CycleRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CycleRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the current state (the row is seeded at migration time)
    pub async fn load(&self) -> DbResult<CycleStateRecord> {
        let record = sqlx::query_as::<_, CycleStateRecord>(
            "SELECT version, cycle, last_mined_cycle, last_tournament_cycle
             FROM cycle_state WHERE id = 1",
        )
        .fetch_one(self.pool)
        .await?;

        Ok(record)
    }

    /// Claim the next cycle number via compare-and-swap.
    ///
    /// Returns `Some(cycle)` when this invocation won the claim, `None` when
    /// a concurrent invocation advanced the counter first.
    pub async fn claim_next_cycle(&self) -> DbResult<Option<i64>> {
        let state = self.load().await?;
        let next = state.cycle + 1;

        let result = sqlx::query(
            r#"UPDATE cycle_state
               SET cycle = ?1, version = version + 1,
                   updated_at = strftime('%s', 'now')
               WHERE id = 1 AND version = ?2
            "#,
        )
        .bind(next)
        .bind(state.version)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(Some(next))
        } else {
            Ok(None)
        }
    }

    /// Record that mining covered up to `cycle`. The monotone guard makes the
    /// mark idempotent: a retried invocation for an already-covered window
    /// changes nothing and returns false.
    pub async fn mark_mined(&self, cycle: i64) -> DbResult<bool> {
        let result = sqlx::query(
            r#"UPDATE cycle_state
               SET last_mined_cycle = ?1, version = version + 1,
                   updated_at = strftime('%s', 'now')
               WHERE id = 1 AND last_mined_cycle < ?1
            "#,
        )
        .bind(cycle)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Claim the tournament stage for `cycle`. Same monotone discipline as
    /// `mark_mined`; callers claim before running so an overlapping
    /// invocation never replays an already-claimed tournament window.
    pub async fn claim_tournament(&self, cycle: i64) -> DbResult<bool> {
        let result = sqlx::query(
            r#"UPDATE cycle_state
               SET last_tournament_cycle = ?1, version = version + 1,
                   updated_at = strftime('%s', 'now')
               WHERE id = 1 AND last_tournament_cycle < ?1
            "#,
        )
        .bind(cycle)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
