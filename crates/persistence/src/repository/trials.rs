//! Trial log repository — append-only store of chaos trade outcomes

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A single persisted trial row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrialRecord {
    pub id: Option<i64>,
    pub cycle: i64,
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: String,
    pub exit_price: String,
    pub pnl: String,
    pub is_win: i64,
    pub justification: String,
    pub snap_price: String,
    pub snap_momentum: String,
    pub snap_moving_avg: String,
    pub snap_volume: String,
    pub snap_volatility: String,
    pub created_at: Option<i64>,
}

/// Repository for the append-only trial log
pub struct TrialRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TrialRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a batch of trials in a single transaction.
    ///
    /// An empty batch is a no-op: nothing is written and no error is raised.
    /// On any insert failure the transaction rolls back, so a partial batch
    /// is never persisted.
    pub async fn append_batch(&self, trials: &[TrialRecord]) -> DbResult<usize> {
        if trials.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for trial in trials {
            sqlx::query(
                r#"INSERT INTO trials
                    (cycle, entry_time, exit_time, entry_price, exit_price, pnl, is_win,
                     justification, snap_price, snap_momentum, snap_moving_avg,
                     snap_volume, snap_volatility)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )
            .bind(trial.cycle)
            .bind(trial.entry_time)
            .bind(trial.exit_time)
            .bind(&trial.entry_price)
            .bind(&trial.exit_price)
            .bind(&trial.pnl)
            .bind(trial.is_win)
            .bind(&trial.justification)
            .bind(&trial.snap_price)
            .bind(&trial.snap_momentum)
            .bind(&trial.snap_moving_avg)
            .bind(&trial.snap_volume)
            .bind(&trial.snap_volatility)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(trials.len())
    }

    /// Count trials already recorded for a cycle (generation idempotency key)
    pub async fn count_for_cycle(&self, cycle: i64) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trials WHERE cycle = ?")
            .bind(cycle)
            .fetch_one(self.pool)
            .await?;

        Ok(row.0)
    }

    /// Fetch the most recent `limit` trials, oldest first.
    ///
    /// This is the bounded window the miner scans; it never grows with total
    /// history.
    pub async fn recent_window(&self, limit: i64) -> DbResult<Vec<TrialRecord>> {
        if limit <= 0 {
            return Err(DbError::Query(format!("invalid window size {limit}")));
        }

        let mut records = sqlx::query_as::<_, TrialRecord>(
            "SELECT * FROM trials ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        records.reverse();
        Ok(records)
    }

    /// Total number of trials ever recorded
    pub async fn count_all(&self) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trials")
            .fetch_one(self.pool)
            .await?;

        Ok(row.0)
    }
}
