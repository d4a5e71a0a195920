//! Creator trust score: feedback ratings across completed campaigns folded
//! into a 0–100 score, cached on the user record.

use sqlx::{SqliteExecutor, SqlitePool};
use tracing::info;

use crate::db;
use crate::errors::{PoolError, Result};
use crate::models::{CampaignStatus, Feedback};

pub const MAX_RATING: i64 = 5;

/// `round(100 * Σratings / (5 * count))`, halves rounding up; `0` without
/// ratings.
pub fn score(ratings: &[i64]) -> i64 {
    if ratings.is_empty() {
        return 0;
    }
    let numerator = 100 * ratings.iter().sum::<i64>();
    let denominator = MAX_RATING * ratings.len() as i64;
    (2 * numerator + denominator) / (2 * denominator)
}

/// Score of `creator_id` from the feedback currently stored.
pub async fn recompute<'e, E>(ex: E, creator_id: &str) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let ratings = db::completed_campaign_ratings(ex, creator_id).await?;
    Ok(score(&ratings))
}

#[derive(Clone)]
pub struct TrustScoreCalculator {
    pool: SqlitePool,
}

impl TrustScoreCalculator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record feedback on a completed campaign and refresh the creator's
    /// cached score in the same storage transaction. Returns the new score.
    pub async fn submit_feedback(
        &self,
        campaign_id: &str,
        user_id: &str,
        rating: i64,
        comment: Option<&str>,
    ) -> Result<i64> {
        if !(1..=MAX_RATING).contains(&rating) {
            return Err(PoolError::InvalidRating(rating.to_string()));
        }

        let mut tx = db::begin_write(&self.pool).await?;
        let campaign = db::find_campaign(&mut *tx, campaign_id)
            .await?
            .ok_or_else(|| PoolError::CampaignNotFound(campaign_id.to_string()))?;
        if campaign.status != CampaignStatus::Completed {
            return Err(PoolError::CampaignNotCompleted);
        }
        if !db::append_feedback(&mut *tx, campaign_id, user_id, rating, comment).await? {
            return Err(PoolError::DuplicateFeedback);
        }

        let trust_score = recompute(&mut *tx, &campaign.creator_id).await?;
        if !db::set_trust_score(&mut *tx, &campaign.creator_id, trust_score).await? {
            return Err(PoolError::UserNotFound(campaign.creator_id));
        }
        tx.commit().await?;

        info!(
            campaign_id,
            creator_id = %campaign.creator_id,
            trust_score,
            "Trust score recomputed"
        );
        Ok(trust_score)
    }

    pub async fn list_feedback(&self, campaign_id: &str) -> Result<Vec<Feedback>> {
        if db::find_campaign(&self.pool, campaign_id).await?.is_none() {
            return Err(PoolError::CampaignNotFound(campaign_id.to_string()));
        }
        db::list_feedback(&self.pool, campaign_id).await
    }

    /// The cached score on the user record.
    pub async fn trust_score(&self, user_id: &str) -> Result<i64> {
        db::find_user(&self.pool, user_id)
            .await?
            .map(|u| u.trust_score)
            .ok_or_else(|| PoolError::UserNotFound(user_id.to_string()))
    }
}
