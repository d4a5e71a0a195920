//! Paying out of the pool: campaign allocations and contributor rewards.
//!
//! Every payout checks the pool inside the same write unit that appends it,
//! so concurrent payouts can never overcommit the balance. Each call creates
//! a new payout; only a replayed payment confirmation is refused.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::db;
use crate::errors::{PoolError, Result};
use crate::leaderboard::{self, LeaderboardScope};
use crate::ledger::{LedgerStore, LedgerWrite};
use crate::models::{format_money, NewTransaction, PaymentConfirmation, Transaction, TransactionKind};
use crate::signature::SignatureVerifier;

#[derive(Clone)]
pub struct AllocationService {
    ledger: LedgerStore,
    verifier: SignatureVerifier,
}

impl AllocationService {
    pub fn new(ledger: LedgerStore, verifier: SignatureVerifier) -> Self {
        Self { ledger, verifier }
    }

    /// Move `amount` from the pool to a campaign. When the admin funded the
    /// allocation through the gateway, its confirmation is verified and
    /// claimed like a donation's.
    pub async fn allocate_to_campaign(
        &self,
        campaign_id: &str,
        amount: i64,
        admin_payment: Option<&PaymentConfirmation>,
    ) -> Result<Transaction> {
        if amount <= 0 {
            return Err(PoolError::InvalidAmount);
        }
        if let Some(confirmation) = admin_payment {
            if let Err(e) = self.verifier.check(confirmation) {
                warn!(
                    campaign_id,
                    order_id = %confirmation.order_id,
                    payment_id = %confirmation.payment_id,
                    "Rejected allocation: {e}"
                );
                return Err(e);
            }
        }

        let mut write = self.ledger.begin().await?;
        let payment = admin_payment.map(PaymentConfirmation::reference);
        if let Some(payment) = &payment {
            write.claim_payment(payment).await?;
        }

        let campaign = db::find_campaign(write.conn(), campaign_id)
            .await?
            .ok_or_else(|| PoolError::CampaignNotFound(campaign_id.to_string()))?;
        write.ensure_covered(amount).await?;

        let tx = write
            .append(NewTransaction {
                kind: TransactionKind::Allocation,
                amount,
                donor_id: None,
                campaign_id: Some(campaign.id.clone()),
                recipient_id: None,
                payment,
                description: format!(
                    "Admin allocated {} to campaign \"{}\"",
                    format_money(amount),
                    campaign.title
                ),
            })
            .await?;
        db::increment_amount_raised(write.conn(), &campaign.id, amount).await?;
        db::push_notification(
            write.conn(),
            &campaign.creator_id,
            &format!(
                "Admin sent {} to your campaign \"{}\"!",
                format_money(amount),
                campaign.title
            ),
        )
        .await?;
        write.commit().await?;

        info!(campaign_id, amount, "Pool allocation recorded");
        Ok(tx)
    }

    /// Pay `amount` from the pool to a user. `authorizing_admin_id` is kept on
    /// the row as `donor_id` for the audit trail.
    pub async fn reward_user(
        &self,
        recipient_id: &str,
        amount: i64,
        authorizing_admin_id: &str,
    ) -> Result<Transaction> {
        if amount <= 0 {
            return Err(PoolError::InvalidAmount);
        }
        let mut write = self.ledger.begin().await?;
        write.ensure_covered(amount).await?;
        let tx = append_reward(&mut write, recipient_id, amount, authorizing_admin_id).await?;
        write.commit().await?;

        info!(recipient_id, amount, authorizing_admin_id, "Reward recorded");
        Ok(tx)
    }

    /// Pay `amounts[i]` to the contributor ranked `i` for `scope`. Either every
    /// reward is paid or none is. Contributors without likes are not paid, so
    /// fewer rewards than amounts may be returned.
    pub async fn reward_leaderboard(
        &self,
        scope: LeaderboardScope,
        amounts: &[i64],
        authorizing_admin_id: &str,
    ) -> Result<Vec<Transaction>> {
        self.reward_leaderboard_at(scope, amounts, authorizing_admin_id, Utc::now())
            .await
    }

    async fn reward_leaderboard_at(
        &self,
        scope: LeaderboardScope,
        amounts: &[i64],
        authorizing_admin_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        if amounts.is_empty() || amounts.iter().any(|a| *a <= 0) {
            return Err(PoolError::InvalidAmount);
        }

        let mut write = self.ledger.begin().await?;
        let ranked = leaderboard::rank_at(write.conn(), scope, amounts.len(), now).await?;
        let winners: Vec<_> = ranked
            .into_iter()
            .filter(|entry| entry.total_likes > 0)
            .zip(amounts.iter().copied())
            .collect();

        let total = winners
            .iter()
            .try_fold(0i64, |acc, (_, amount)| acc.checked_add(*amount))
            .ok_or(PoolError::InvalidAmount)?;
        write.ensure_covered(total).await?;

        let mut paid = Vec::with_capacity(winners.len());
        for (entry, amount) in &winners {
            paid.push(append_reward(&mut write, &entry.user_id, *amount, authorizing_admin_id).await?);
        }
        write.commit().await?;

        info!(
            scope = ?scope,
            winners = paid.len(),
            total,
            authorizing_admin_id,
            "Leaderboard rewards recorded"
        );
        Ok(paid)
    }
}

async fn append_reward(
    write: &mut LedgerWrite<'_>,
    recipient_id: &str,
    amount: i64,
    authorizing_admin_id: &str,
) -> Result<Transaction> {
    let recipient = db::find_user(write.conn(), recipient_id)
        .await?
        .ok_or_else(|| PoolError::UserNotFound(recipient_id.to_string()))?;

    let tx = write
        .append(NewTransaction {
            kind: TransactionKind::Reward,
            amount,
            donor_id: Some(authorizing_admin_id.to_string()),
            campaign_id: None,
            recipient_id: Some(recipient.id.clone()),
            payment: None,
            description: format!(
                "Leaderboard reward of {} to @{}",
                format_money(amount),
                recipient.username
            ),
        })
        .await?;
    db::push_notification(
        write.conn(),
        &recipient.id,
        &format!("You received a {} leaderboard reward!", format_money(amount)),
    )
    .await?;
    Ok(tx)
}
