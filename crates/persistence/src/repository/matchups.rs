//! Matchup log repository — append-only head-to-head tournament outcomes
//!
//! Recording a tournament result touches three things: the matchup row, the
//! winner's counters, and the loser's counters. `record_result` wraps all of
//! them in one transaction so a failure at any point leaves nothing applied.

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::BTreeMap;

/// A persisted matchup row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MatchupRecord {
    pub id: Option<i64>,
    pub pattern_a: i64,
    pub pattern_b: i64,
    pub timeframe: String,
    pub roi_a: String,
    pub roi_b: String,
    pub bonus: f64,
    pub winner: i64,
    pub slice_start: i64,
    pub slice_end: i64,
    pub created_at: Option<i64>,
}

/// Per-pattern side effects of a tournament run
#[derive(Debug, Clone)]
pub struct PatternResultUpdate {
    pub pattern_id: i64,
    pub won: bool,
    pub timeframe: String,
    pub roi: f64,
    pub tested_at: i64,
}

/// Rolling per-timeframe performance entry stored in `patterns.timeframe_perf`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframePerf {
    pub avg_roi: f64,
    pub samples: i64,
}

/// Repository for the matchup log
pub struct MatchupRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MatchupRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a tournament outcome: one matchup insert plus both pattern
    /// updates, all-or-nothing.
    pub async fn record_result(
        &self,
        matchup: &MatchupRecord,
        sides: [&PatternResultUpdate; 2],
    ) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"INSERT INTO matchups
                (pattern_a, pattern_b, timeframe, roi_a, roi_b, bonus, winner,
                 slice_start, slice_end)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(matchup.pattern_a)
        .bind(matchup.pattern_b)
        .bind(&matchup.timeframe)
        .bind(&matchup.roi_a)
        .bind(&matchup.roi_b)
        .bind(matchup.bonus)
        .bind(matchup.winner)
        .bind(matchup.slice_start)
        .bind(matchup.slice_end)
        .execute(&mut *tx)
        .await?;

        for side in sides {
            // Reads happen inside the same write transaction, so the JSON
            // merge cannot lose a concurrent update.
            let row: Option<(String, String)> = sqlx::query_as(
                "SELECT timeframes, timeframe_perf FROM patterns WHERE id = ?",
            )
            .bind(side.pattern_id)
            .fetch_optional(&mut *tx)
            .await?;

            let (timeframes, perf) = row.ok_or_else(|| {
                DbError::Conflict(format!(
                    "pattern {} missing while recording matchup",
                    side.pattern_id
                ))
            })?;

            let timeframes = merge_timeframe_list(&timeframes, &side.timeframe);
            let perf = merge_timeframe_perf(&perf, &side.timeframe, side.roi);
            let (win_inc, loss_inc) = if side.won { (1i64, 0i64) } else { (0, 1) };

            let updated = sqlx::query(
                r#"UPDATE patterns SET
                     runs = runs + 1,
                     h2h_wins = h2h_wins + ?1,
                     h2h_losses = h2h_losses + ?2,
                     last_tested = ?3,
                     timeframes = ?4,
                     timeframe_perf = ?5
                   WHERE id = ?6
                "#,
            )
            .bind(win_inc)
            .bind(loss_inc)
            .bind(side.tested_at)
            .bind(&timeframes)
            .bind(&perf)
            .bind(side.pattern_id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                return Err(DbError::Conflict(format!(
                    "pattern {} vanished while recording matchup",
                    side.pattern_id
                )));
            }
        }

        tx.commit().await?;
        Ok(inserted.last_insert_rowid())
    }

    /// Most recent matchups, newest first
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<MatchupRecord>> {
        let records = sqlx::query_as::<_, MatchupRecord>(
            "SELECT * FROM matchups ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Total number of matchups ever recorded
    pub async fn count_all(&self) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM matchups")
            .fetch_one(self.pool)
            .await?;

        Ok(row.0)
    }
}

/// Add a timeframe to the JSON list if absent, preserving first-seen order
fn merge_timeframe_list(json: &str, timeframe: &str) -> String {
    let mut list: Vec<String> = serde_json::from_str(json).unwrap_or_default();
    if !list.iter().any(|t| t == timeframe) {
        list.push(timeframe.to_string());
    }
    serde_json::to_string(&list).unwrap_or_else(|_| "[]".to_string())
}

/// Fold a new ROI observation into the rolling per-timeframe average
fn merge_timeframe_perf(json: &str, timeframe: &str, roi: f64) -> String {
    let mut map: BTreeMap<String, TimeframePerf> = serde_json::from_str(json).unwrap_or_default();
    let entry = map.entry(timeframe.to_string()).or_insert(TimeframePerf {
        avg_roi: 0.0,
        samples: 0,
    });
    entry.avg_roi = (entry.avg_roi * entry.samples as f64 + roi) / (entry.samples + 1) as f64;
    entry.samples += 1;
    serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
}
