//! Recording verified donations.
//!
//! A donation either goes straight into the pool or, when aimed at a
//! campaign, is split: the platform fee (rounded) goes to the pool and the
//! remainder to the campaign. Both halves are appended in one write unit.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::BPS_DENOMINATOR;
use crate::db;
use crate::errors::{PoolError, Result};
use crate::ledger::LedgerStore;
use crate::models::{format_money, NewTransaction, PaymentConfirmation, Transaction, TransactionKind};
use crate::signature::SignatureVerifier;

/// How a campaign donation is divided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Split {
    pub campaign_share: i64,
    pub fee_share: i64,
}

/// `fee_share = round(amount * fee_bps / 10_000)` with halves rounding up;
/// the campaign absorbs the remainder so the shares always sum to `amount`.
pub fn split(amount: i64, fee_bps: u32) -> Result<Split> {
    if amount <= 0 {
        return Err(PoolError::InvalidAmount);
    }
    let denominator = i128::from(BPS_DENOMINATOR);
    let scaled = i128::from(amount) * i128::from(fee_bps);
    let fee_share = i64::try_from((2 * scaled + denominator) / (2 * denominator))
        .map_err(|_| PoolError::InvalidAmount)?;
    Ok(Split {
        campaign_share: amount - fee_share,
        fee_share,
    })
}

fn format_rate(fee_bps: u32) -> String {
    if fee_bps % 100 == 0 {
        format!("{}%", fee_bps / 100)
    } else {
        format!("{}.{:02}%", fee_bps / 100, fee_bps % 100)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DonationOutcome {
    pub transactions: Vec<Transaction>,
    /// Present for campaign donations.
    pub split: Option<Split>,
    /// The campaign's `amount_raised` after this donation.
    pub amount_raised: Option<i64>,
}

#[derive(Clone)]
pub struct DonationService {
    ledger: LedgerStore,
    verifier: SignatureVerifier,
    fee_bps: u32,
}

impl DonationService {
    pub fn new(ledger: LedgerStore, verifier: SignatureVerifier, fee_bps: u32) -> Self {
        Self {
            ledger,
            verifier,
            fee_bps,
        }
    }

    pub async fn donate(
        &self,
        donor_id: &str,
        amount: i64,
        confirmation: &PaymentConfirmation,
        campaign_id: Option<&str>,
    ) -> Result<DonationOutcome> {
        if amount <= 0 {
            return Err(PoolError::InvalidAmount);
        }
        if let Err(e) = self.verifier.check(confirmation) {
            warn!(
                donor_id,
                order_id = %confirmation.order_id,
                payment_id = %confirmation.payment_id,
                "Rejected donation: {e}"
            );
            return Err(e);
        }

        let payment = confirmation.reference();
        let mut write = self.ledger.begin().await?;
        write.claim_payment(&payment).await?;

        let donor = db::find_user(write.conn(), donor_id)
            .await?
            .ok_or_else(|| PoolError::UserNotFound(donor_id.to_string()))?;

        let outcome = match campaign_id {
            None => {
                let tx = write
                    .append(NewTransaction {
                        kind: TransactionKind::Donation,
                        amount,
                        donor_id: Some(donor.id.clone()),
                        campaign_id: None,
                        recipient_id: None,
                        payment: Some(payment),
                        description: format!("Donation by @{}", donor.username),
                    })
                    .await?;
                DonationOutcome {
                    transactions: vec![tx],
                    split: None,
                    amount_raised: None,
                }
            }
            Some(campaign_id) => {
                let campaign = db::find_campaign(write.conn(), campaign_id)
                    .await?
                    .ok_or_else(|| PoolError::CampaignNotFound(campaign_id.to_string()))?;
                let split = split(amount, self.fee_bps)?;

                let mut transactions = Vec::with_capacity(2);
                transactions.push(
                    write
                        .append(NewTransaction {
                            kind: TransactionKind::Donation,
                            amount: split.campaign_share,
                            donor_id: Some(donor.id.clone()),
                            campaign_id: Some(campaign.id.clone()),
                            recipient_id: None,
                            payment: Some(payment.clone()),
                            description: format!(
                                "{} donated to \"{}\" by @{}",
                                format_money(split.campaign_share),
                                campaign.title,
                                donor.username
                            ),
                        })
                        .await?,
                );
                // Tiny donations can round the fee down to nothing; there is
                // then no pool row to write.
                if split.fee_share > 0 {
                    transactions.push(
                        write
                            .append(NewTransaction {
                                kind: TransactionKind::Donation,
                                amount: split.fee_share,
                                donor_id: Some(donor.id.clone()),
                                campaign_id: None,
                                recipient_id: None,
                                payment: Some(payment),
                                description: format!(
                                    "{} platform fee ({}) from @{}'s donation to \"{}\"",
                                    format_money(split.fee_share),
                                    format_rate(self.fee_bps),
                                    donor.username,
                                    campaign.title
                                ),
                            })
                            .await?,
                    );
                }

                db::increment_amount_raised(write.conn(), &campaign.id, split.campaign_share)
                    .await?;
                db::push_notification(
                    write.conn(),
                    &campaign.creator_id,
                    &format!(
                        "@{} donated {} to your campaign \"{}\"!",
                        donor.username,
                        format_money(split.campaign_share),
                        campaign.title
                    ),
                )
                .await?;

                DonationOutcome {
                    transactions,
                    split: Some(split),
                    amount_raised: Some(campaign.amount_raised + split.campaign_share),
                }
            }
        };

        write.commit().await?;
        info!(
            donor_id,
            amount,
            campaign_id = campaign_id.unwrap_or("-"),
            rows = outcome.transactions.len(),
            "Donation recorded"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariants;
    use crate::testutil;

    async fn setup() -> (DonationService, LedgerStore) {
        setup_on(testutil::ledger().await).await
    }

    async fn setup_on(ledger: LedgerStore) -> (DonationService, LedgerStore) {
        testutil::user(ledger.pool(), "donor").await;
        testutil::user(ledger.pool(), "creator").await;
        testutil::campaign(ledger.pool(), "x", "creator", "active").await;
        let service = DonationService::new(ledger.clone(), testutil::verifier(), 600);
        (service, ledger)
    }

    #[test]
    fn six_percent_of_one_hundred() {
        assert_eq!(
            split(100, 600).unwrap(),
            Split {
                campaign_share: 94,
                fee_share: 6
            }
        );
    }

    #[test]
    fn fee_rounds_half_up_and_campaign_absorbs_remainder() {
        // 25 * 6% = 1.5 -> 2
        assert_eq!(split(25, 600).unwrap().fee_share, 2);
        // 24 * 6% = 1.44 -> 1
        assert_eq!(split(24, 600).unwrap().fee_share, 1);
        // 8 * 6% = 0.48 -> 0
        assert_eq!(split(8, 600).unwrap().fee_share, 0);

        for amount in [1, 7, 33, 99, 101, 12_345, 1_000_003] {
            let s = split(amount, 600).unwrap();
            invariants::assert_split_conserves(amount, s.campaign_share, s.fee_share);
        }
    }

    #[test]
    fn split_rejects_non_positive_amounts() {
        assert!(matches!(split(0, 600), Err(PoolError::InvalidAmount)));
        assert!(matches!(split(-1, 600), Err(PoolError::InvalidAmount)));
    }

    #[test]
    fn rate_is_rendered_as_percent() {
        assert_eq!(format_rate(600), "6%");
        assert_eq!(format_rate(250), "2.50%");
    }

    #[tokio::test]
    async fn pool_donation_appends_one_row() {
        let (service, ledger) = setup().await;
        let outcome = service
            .donate("donor", 1_000, &testutil::confirmation("pay_1"), None)
            .await
            .unwrap();

        assert_eq!(outcome.transactions.len(), 1);
        let tx = &outcome.transactions[0];
        assert_eq!(tx.amount, 1_000);
        assert_eq!(tx.campaign_id, None);
        assert_eq!(tx.payment_id.as_deref(), Some("pay_1"));
        assert_eq!(tx.description, "Donation by @donor");
        assert_eq!(ledger.current_balance().await.unwrap(), 1_000);
        invariants::assert_all_ledger_invariants(&ledger).await;
    }

    #[tokio::test]
    async fn campaign_donation_splits_and_updates_projection() {
        let (service, ledger) = setup().await;
        let outcome = service
            .donate("donor", 100, &testutil::confirmation("pay_1"), Some("x"))
            .await
            .unwrap();

        let amounts: Vec<i64> = outcome.transactions.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![94, 6]);
        assert_eq!(outcome.transactions[0].campaign_id.as_deref(), Some("x"));
        assert_eq!(outcome.transactions[1].campaign_id, None);
        assert_eq!(outcome.amount_raised, Some(94));

        // Both shares are donation rows, so the fold counts the full amount.
        assert_eq!(ledger.current_balance().await.unwrap(), 100);
        assert_eq!(testutil::amount_raised(ledger.pool(), "x").await, 94);

        let notes = db::list_notifications(ledger.pool(), "creator").await.unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].message.contains("@donor donated ₹0.94"));
        invariants::assert_all_ledger_invariants(&ledger).await;
    }

    #[tokio::test]
    async fn replayed_payment_is_recorded_once() {
        let (service, ledger) = setup().await;
        let confirmation = testutil::confirmation("pay_1");
        service
            .donate("donor", 100, &confirmation, Some("x"))
            .await
            .unwrap();

        let replay = service.donate("donor", 100, &confirmation, Some("x")).await;
        assert!(matches!(replay, Err(PoolError::DuplicatePayment(_))));

        assert_eq!(ledger.list(10, None).await.unwrap().len(), 2);
        assert_eq!(testutil::amount_raised(ledger.pool(), "x").await, 94);
    }

    #[tokio::test]
    async fn forged_signature_mutates_nothing() {
        let (service, ledger) = setup().await;
        let mut confirmation = testutil::confirmation("pay_1");
        confirmation.signature = "ab".repeat(32);

        let result = service.donate("donor", 100, &confirmation, Some("x")).await;
        assert!(matches!(result, Err(PoolError::InvalidSignature)));
        assert!(ledger.list(10, None).await.unwrap().is_empty());
        assert_eq!(testutil::amount_raised(ledger.pool(), "x").await, 0);

        // A forged attempt does not burn the payment id.
        service
            .donate("donor", 100, &testutil::confirmation("pay_1"), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn invalid_amount_is_checked_first() {
        let (service, ledger) = setup().await;
        let result = service
            .donate("donor", 0, &testutil::confirmation("pay_1"), None)
            .await;
        assert!(matches!(result, Err(PoolError::InvalidAmount)));
        assert_eq!(ledger.current_balance().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_campaign_releases_the_payment_claim() {
        let (service, ledger) = setup().await;
        let confirmation = testutil::confirmation("pay_1");

        let result = service
            .donate("donor", 100, &confirmation, Some("missing"))
            .await;
        assert!(matches!(result, Err(PoolError::CampaignNotFound(_))));
        assert!(ledger.list(10, None).await.unwrap().is_empty());

        // The rolled-back unit did not keep the claim.
        service
            .donate("donor", 100, &confirmation, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_donor_is_rejected() {
        let (service, ledger) = setup().await;
        let result = service
            .donate("ghost", 100, &testutil::confirmation("pay_1"), None)
            .await;
        assert!(matches!(result, Err(PoolError::UserNotFound(id)) if id == "ghost"));
        assert_eq!(ledger.current_balance().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn tiny_campaign_donation_skips_empty_fee_row() {
        let (service, ledger) = setup().await;
        let outcome = service
            .donate("donor", 8, &testutil::confirmation("pay_1"), Some("x"))
            .await
            .unwrap();
        assert_eq!(outcome.transactions.len(), 1);
        assert_eq!(outcome.transactions[0].amount, 8);
        assert_eq!(ledger.current_balance().await.unwrap(), 8);
        invariants::assert_all_ledger_invariants(&ledger).await;
    }

    #[tokio::test]
    async fn concurrent_replays_record_once() {
        let (service, ledger) = setup().await;
        let confirmation = testutil::confirmation("pay_1");

        let a = {
            let service = service.clone();
            let confirmation = confirmation.clone();
            tokio::spawn(async move { service.donate("donor", 500, &confirmation, None).await })
        };
        let b = {
            let service = service.clone();
            let confirmation = confirmation.clone();
            tokio::spawn(async move { service.donate("donor", 500, &confirmation, None).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(PoolError::DuplicatePayment(_)))));
        assert_eq!(ledger.current_balance().await.unwrap(), 500);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_replays_record_once_across_connections() {
        let (service, ledger) = setup_on(testutil::file_ledger(5).await).await;
        let confirmation = testutil::confirmation("pay_1");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                let confirmation = confirmation.clone();
                tokio::spawn(async move { service.donate("donor", 500, &confirmation, Some("x")).await })
            })
            .collect();
        let mut recorded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => recorded += 1,
                Err(PoolError::DuplicatePayment(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(recorded, 1);
        assert_eq!(ledger.list(10, None).await.unwrap().len(), 2);
        assert_eq!(testutil::amount_raised(ledger.pool(), "x").await, 470);
        invariants::assert_all_ledger_invariants(&ledger).await;
    }
}
