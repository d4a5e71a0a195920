//! Likes leaderboard over all time or the current calendar month.
//!
//! Month boundaries are computed in UTC from a single clock reading per call.

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteExecutor, SqlitePool};

use crate::db;
use crate::errors::Result;
use crate::models::LeaderboardEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardScope {
    #[default]
    AllTime,
    Monthly,
}

impl LeaderboardScope {
    /// Earliest `posted_at` (unix millis) counted for this scope.
    pub fn since(&self, now: DateTime<Utc>) -> Option<i64> {
        match self {
            Self::AllTime => None,
            Self::Monthly => Some(start_of_month(now).timestamp_millis()),
        }
    }
}

/// First instant of the calendar month containing `now`, in UTC.
pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    // Day 1 exists in every month.
    let first = today.with_day(1).unwrap_or(today);
    Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN))
}

/// Order authors by likes, most first. The sort is stable, so authors with
/// equal totals keep the order they arrived in.
pub fn rank(mut totals: Vec<LeaderboardEntry>, limit: usize) -> Vec<LeaderboardEntry> {
    totals.sort_by(|a, b| b.total_likes.cmp(&a.total_likes));
    totals.truncate(limit);
    totals
}

/// Rank against any executor, with an explicit clock reading.
pub async fn rank_at<'e, E>(
    ex: E,
    scope: LeaderboardScope,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<Vec<LeaderboardEntry>>
where
    E: SqliteExecutor<'e>,
{
    let totals = db::sum_likes_grouped_by_author(ex, scope.since(now)).await?;
    Ok(rank(totals, limit))
}

#[derive(Clone)]
pub struct LeaderboardRanker {
    pool: SqlitePool,
}

impl LeaderboardRanker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn rank(&self, scope: LeaderboardScope, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        rank_at(&self.pool, scope, limit, Utc::now()).await
    }
}
