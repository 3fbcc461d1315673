//! Pattern registry repository
//!
//! All mutations are atomic at the storage layer: promotion is a
//! conflict-resolving upsert keyed by the condition signature, and votes are
//! conditional increments. Two overlapping miner invocations can never create
//! duplicate rows for the same signature.

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted pattern row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PatternRecord {
    pub id: Option<i64>,
    pub signature: String,
    pub name: String,
    pub condition_json: String,
    pub win_rate: f64,
    pub sample_size: i64,
    pub confidence: f64,
    pub rationale: String,
    pub upvotes: i64,
    pub downvotes: i64,
    pub origin: String,
    pub runs: i64,
    pub last_tested: Option<i64>,
    pub h2h_wins: i64,
    pub h2h_losses: i64,
    pub timeframes: String,
    pub mined_passes: i64,
    pub created_at: Option<i64>,
    pub timeframe_perf: String,
}

/// Outcome of a mining upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new pattern row was created
    Promoted,
    /// An existing pattern's statistics were refreshed in place
    Refreshed,
}

/// Aggregate registry statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_patterns: i64,
    pub winning_patterns: i64,
    pub total_votes: i64,
    pub total_runs: i64,
}

/// Repository for the pattern registry
pub struct PatternRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PatternRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a freshly mined pattern, or refresh the existing row with the
    /// same signature.
    ///
    /// The refresh blends win rates as a sample-size-weighted running mean and
    /// sets sample_size to the latest matching count. The whole operation is a
    /// single conflict-resolving statement, so concurrent miners racing on the
    /// same signature both land on one row.
    pub async fn upsert_mined(&self, record: &PatternRecord) -> DbResult<UpsertOutcome> {
        sqlx::query(
            r#"INSERT INTO patterns
                (signature, name, condition_json, win_rate, sample_size, confidence,
                 rationale, origin)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
               ON CONFLICT(signature) DO UPDATE SET
                 win_rate = (patterns.win_rate * patterns.sample_size
                             + excluded.win_rate * excluded.sample_size)
                            / (patterns.sample_size + excluded.sample_size),
                 sample_size = excluded.sample_size,
                 confidence = excluded.confidence,
                 rationale = excluded.rationale,
                 mined_passes = patterns.mined_passes + 1
            "#,
        )
        .bind(&record.signature)
        .bind(&record.name)
        .bind(&record.condition_json)
        .bind(record.win_rate)
        .bind(record.sample_size)
        .bind(record.confidence)
        .bind(&record.rationale)
        .bind(&record.origin)
        .execute(self.pool)
        .await?;

        // mined_passes == 1 means this upsert created the row
        let (passes,): (i64,) =
            sqlx::query_as("SELECT mined_passes FROM patterns WHERE signature = ?")
                .bind(&record.signature)
                .fetch_one(self.pool)
                .await?;

        Ok(if passes == 1 {
            UpsertOutcome::Promoted
        } else {
            UpsertOutcome::Refreshed
        })
    }

    /// Get a pattern by its condition signature
    pub async fn get_by_signature(&self, signature: &str) -> DbResult<Option<PatternRecord>> {
        let record =
            sqlx::query_as::<_, PatternRecord>("SELECT * FROM patterns WHERE signature = ?")
                .bind(signature)
                .fetch_optional(self.pool)
                .await?;

        Ok(record)
    }

    /// Get a pattern by id
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<PatternRecord>> {
        let record = sqlx::query_as::<_, PatternRecord>("SELECT * FROM patterns WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(record)
    }

    /// All patterns ordered oldest-last-tested first (never-tested rows lead,
    /// then by id). This is the deterministic candidate order the weighted
    /// sampler draws from.
    pub async fn sampling_candidates(&self) -> DbResult<Vec<PatternRecord>> {
        let records = sqlx::query_as::<_, PatternRecord>(
            r#"SELECT * FROM patterns
               ORDER BY last_tested IS NOT NULL, last_tested ASC, id ASC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Atomic vote increment ("increment by 1", never read-modify-write).
    /// Returns false if the pattern does not exist.
    pub async fn vote(&self, id: i64, upvote: bool) -> DbResult<bool> {
        let sql = if upvote {
            "UPDATE patterns SET upvotes = upvotes + 1 WHERE id = ?"
        } else {
            "UPDATE patterns SET downvotes = downvotes + 1 WHERE id = ?"
        };

        let result = sqlx::query(sql).bind(id).execute(self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Leaderboard: patterns with at least one tournament run, ranked by
    /// head-to-head win ratio, then by total wins.
    pub async fn leaderboard(&self, limit: i64) -> DbResult<Vec<PatternRecord>> {
        let records = sqlx::query_as::<_, PatternRecord>(
            r#"SELECT * FROM patterns
               WHERE runs > 0
               ORDER BY (CAST(h2h_wins AS REAL) / runs) DESC, h2h_wins DESC, id ASC
               LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Paginated registry listing with optional filters
    pub async fn get_all_paginated(
        &self,
        limit: i64,
        offset: i64,
        origin: Option<&str>,
        min_win_rate: Option<f64>,
        sort_by: Option<&str>,
    ) -> DbResult<(Vec<PatternRecord>, i64)> {
        let mut where_clauses = vec!["1=1".to_string()];
        let mut binds: Vec<String> = Vec::new();

        if let Some(o) = origin {
            where_clauses.push("origin = ?".to_string());
            binds.push(o.to_string());
        }
        if let Some(mwr) = min_win_rate {
            where_clauses.push("win_rate >= ?".to_string());
            binds.push(format!("{mwr}"));
        }

        let where_sql = where_clauses.join(" AND ");

        let count_sql = format!("SELECT COUNT(*) FROM patterns WHERE {where_sql}");
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        for b in &binds {
            count_query = count_query.bind(b);
        }
        let (total,) = count_query.fetch_one(self.pool).await?;

        let order_col = match sort_by {
            Some("sample_size") => "sample_size",
            Some("confidence") => "confidence",
            Some("upvotes") => "upvotes",
            Some("runs") => "runs",
            Some("h2h_wins") => "h2h_wins",
            Some("created_at") => "created_at",
            _ => "win_rate",
        };

        let data_sql = format!(
            "SELECT * FROM patterns WHERE {where_sql} ORDER BY {order_col} DESC LIMIT ? OFFSET ?"
        );

        let mut data_query = sqlx::query_as::<_, PatternRecord>(&data_sql);
        for b in &binds {
            data_query = data_query.bind(b);
        }
        data_query = data_query.bind(limit).bind(offset);

        let records = data_query.fetch_all(self.pool).await?;
        Ok((records, total))
    }

    /// Aggregate registry statistics
    pub async fn get_stats(&self) -> DbResult<RegistryStats> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM patterns")
            .fetch_one(self.pool)
            .await?;

        let winning: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM patterns WHERE h2h_wins > h2h_losses")
                .fetch_one(self.pool)
                .await?;

        let (votes, runs): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(upvotes + downvotes), 0), COALESCE(SUM(runs), 0) FROM patterns",
        )
        .fetch_one(self.pool)
        .await?;

        Ok(RegistryStats {
            total_patterns: total.0,
            winning_patterns: winning.0,
            total_votes: votes,
            total_runs: runs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn mined(signature: &str, win_rate: f64, sample_size: i64) -> PatternRecord {
        PatternRecord {
            id: None,
            signature: signature.to_string(),
            name: "momentum rising · volatility high".to_string(),
            condition_json: r#"{"type":"all","items":[]}"#.to_string(),
            win_rate,
            sample_size,
            confidence: 0.96,
            rationale: "test bucket".to_string(),
            upvotes: 0,
            downvotes: 0,
            origin: "chaos_miner".to_string(),
            runs: 0,
            last_tested: None,
            h2h_wins: 0,
            h2h_losses: 0,
            timeframes: "[]".to_string(),
            mined_passes: 1,
            created_at: None,
            timeframe_perf: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_promotes_then_refreshes() {
        let db = Database::in_memory().await.unwrap();
        let repo = PatternRepository::new(db.pool());

        let outcome = repo.upsert_mined(&mined("sig-a", 0.60, 25)).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Promoted);

        // Same signature again: refreshed in place, no duplicate row
        let outcome = repo.upsert_mined(&mined("sig-a", 0.70, 25)).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Refreshed);

        let (stats, row) = (
            repo.get_stats().await.unwrap(),
            repo.get_by_signature("sig-a").await.unwrap().unwrap(),
        );
        assert_eq!(stats.total_patterns, 1);
        // Running mean of two equal-sized passes: (0.60 + 0.70) / 2
        assert!((row.win_rate - 0.65).abs() < 1e-9);
        assert_eq!(row.sample_size, 25);
        assert_eq!(row.mined_passes, 2);
    }

    #[tokio::test]
    async fn test_vote_is_atomic_increment() {
        let db = Database::in_memory().await.unwrap();
        let repo = PatternRepository::new(db.pool());

        repo.upsert_mined(&mined("sig-v", 0.6, 30)).await.unwrap();
        let id = repo.get_by_signature("sig-v").await.unwrap().unwrap().id.unwrap();

        assert!(repo.vote(id, true).await.unwrap());
        assert!(repo.vote(id, true).await.unwrap());
        assert!(repo.vote(id, false).await.unwrap());
        assert!(!repo.vote(id + 999, true).await.unwrap());

        let row = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(row.upvotes, 2);
        assert_eq!(row.downvotes, 1);
    }

    #[tokio::test]
    async fn test_sampling_candidates_order() {
        let db = Database::in_memory().await.unwrap();
        let repo = PatternRepository::new(db.pool());

        repo.upsert_mined(&mined("sig-1", 0.6, 30)).await.unwrap();
        repo.upsert_mined(&mined("sig-2", 0.6, 30)).await.unwrap();
        repo.upsert_mined(&mined("sig-3", 0.6, 30)).await.unwrap();

        // Mark sig-1 as tested recently; sig-2 tested earlier; sig-3 never
        sqlx::query("UPDATE patterns SET last_tested = 200 WHERE signature = 'sig-1'")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query("UPDATE patterns SET last_tested = 100 WHERE signature = 'sig-2'")
            .execute(db.pool())
            .await
            .unwrap();

        let candidates = repo.sampling_candidates().await.unwrap();
        let sigs: Vec<&str> = candidates.iter().map(|p| p.signature.as_str()).collect();
        assert_eq!(sigs, vec!["sig-3", "sig-2", "sig-1"]);
    }

    #[tokio::test]
    async fn test_leaderboard_ranks_by_win_ratio() {
        let db = Database::in_memory().await.unwrap();
        let repo = PatternRepository::new(db.pool());

        repo.upsert_mined(&mined("sig-a", 0.6, 30)).await.unwrap();
        repo.upsert_mined(&mined("sig-b", 0.6, 30)).await.unwrap();
        repo.upsert_mined(&mined("sig-c", 0.6, 30)).await.unwrap();

        sqlx::query("UPDATE patterns SET runs = 4, h2h_wins = 3, h2h_losses = 1 WHERE signature = 'sig-a'")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query("UPDATE patterns SET runs = 4, h2h_wins = 1, h2h_losses = 3 WHERE signature = 'sig-b'")
            .execute(db.pool())
            .await
            .unwrap();

        let board = repo.leaderboard(10).await.unwrap();
        // sig-c has no runs and is excluded
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].signature, "sig-a");
        assert_eq!(board[1].signature, "sig-b");
    }
}
