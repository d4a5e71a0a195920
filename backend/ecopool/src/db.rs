//! Database layer: connection pool, migrations and the collaborator
//! directories (users, campaigns, posts, notifications) the core reads and
//! updates.
//!
//! Every query takes a generic [`SqliteExecutor`] so the same helper runs
//! against the pool for reads and inside a ledger write unit for updates that
//! must commit together with a transaction append.

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Sqlite, SqliteExecutor, SqlitePool, Transaction,
};
use tracing::info;

use crate::errors::Result;
use crate::models::{Campaign, Feedback, LeaderboardEntry, Notification, User};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// Open a transaction that holds SQLite's write lock from its first
/// statement. A deferred transaction that reads before writing cannot be
/// upgraded once another connection has committed, and the busy timeout does
/// not retry that case; taking the lock up front lets it wait instead.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ─────────────────────────────────────────────────────────
// User directory
// ─────────────────────────────────────────────────────────

pub async fn find_user<'e, E>(ex: E, user_id: &str) -> Result<Option<User>>
where
    E: SqliteExecutor<'e>,
{
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, name, avatar, trust_score FROM users WHERE id = ?1",
    )
    .bind(user_id)
    .fetch_optional(ex)
    .await?;
    Ok(user)
}

/// Overwrite the cached trust score. Returns `false` if the user is unknown.
pub async fn set_trust_score<'e, E>(ex: E, user_id: &str, score: i64) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query("UPDATE users SET trust_score = ?1 WHERE id = ?2")
        .bind(score)
        .bind(user_id)
        .execute(ex)
        .await?
        .rows_affected();
    Ok(rows == 1)
}

pub async fn push_notification<'e, E>(ex: E, user_id: &str, message: &str) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query("INSERT INTO notifications (user_id, message, created_at) VALUES (?1, ?2, ?3)")
        .bind(user_id)
        .bind(message)
        .bind(now_millis())
        .execute(ex)
        .await?;
    Ok(())
}

/// Notifications for a user, newest first.
pub async fn list_notifications<'e, E>(ex: E, user_id: &str) -> Result<Vec<Notification>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, Notification>(
        r#"
        SELECT id, user_id, message, read, created_at
        FROM   notifications
        WHERE  user_id = ?1
        ORDER  BY id DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(ex)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Campaign directory
// ─────────────────────────────────────────────────────────

pub async fn find_campaign<'e, E>(ex: E, campaign_id: &str) -> Result<Option<Campaign>>
where
    E: SqliteExecutor<'e>,
{
    let campaign = sqlx::query_as::<_, Campaign>(
        "SELECT id, creator_id, title, status, amount_raised FROM campaigns WHERE id = ?1",
    )
    .bind(campaign_id)
    .fetch_optional(ex)
    .await?;
    Ok(campaign)
}

/// Bump the cached `amount_raised` projection. Returns `false` if the
/// campaign is unknown.
pub async fn increment_amount_raised<'e, E>(ex: E, campaign_id: &str, delta: i64) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query("UPDATE campaigns SET amount_raised = amount_raised + ?1 WHERE id = ?2")
        .bind(delta)
        .bind(campaign_id)
        .execute(ex)
        .await?
        .rows_affected();
    Ok(rows == 1)
}

/// Insert a feedback row. Returns `false` when the user already left
/// feedback on this campaign; the `(campaign_id, user_id)` unique key decides.
pub async fn append_feedback<'e, E>(
    ex: E,
    campaign_id: &str,
    user_id: &str,
    rating: i64,
    comment: Option<&str>,
) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query(
        r#"
        INSERT OR IGNORE INTO campaign_feedback (campaign_id, user_id, rating, comment, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(campaign_id)
    .bind(user_id)
    .bind(rating)
    .bind(comment)
    .bind(now_millis())
    .execute(ex)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

pub async fn list_feedback<'e, E>(ex: E, campaign_id: &str) -> Result<Vec<Feedback>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, Feedback>(
        r#"
        SELECT campaign_id, user_id, rating, comment, created_at
        FROM   campaign_feedback
        WHERE  campaign_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(campaign_id)
    .fetch_all(ex)
    .await?;
    Ok(rows)
}

/// Ratings left on every completed campaign of `creator_id`.
pub async fn completed_campaign_ratings<'e, E>(ex: E, creator_id: &str) -> Result<Vec<i64>>
where
    E: SqliteExecutor<'e>,
{
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT f.rating
        FROM   campaign_feedback f
        JOIN   campaigns c ON c.id = f.campaign_id
        WHERE  c.creator_id = ?1 AND c.status = 'completed'
        ORDER  BY f.id ASC
        "#,
    )
    .bind(creator_id)
    .fetch_all(ex)
    .await?;
    Ok(rows.into_iter().map(|(r,)| r).collect())
}

// ─────────────────────────────────────────────────────────
// Post directory
// ─────────────────────────────────────────────────────────

/// Likes per author, optionally restricted to posts at or after `since`
/// (unix millis). Rows come back in the natural order of each author's first
/// post so that ranking ties resolve deterministically.
pub async fn sum_likes_grouped_by_author<'e, E>(
    ex: E,
    since: Option<i64>,
) -> Result<Vec<LeaderboardEntry>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, LeaderboardEntry>(
        r#"
        SELECT user_id, SUM(likes) AS total_likes
        FROM   posts
        WHERE  user_id IS NOT NULL
          AND  (?1 IS NULL OR posted_at >= ?1)
        GROUP  BY user_id
        ORDER  BY MIN(id) ASC
        "#,
    )
    .bind(since)
    .fetch_all(ex)
    .await?;
    Ok(rows)
}
