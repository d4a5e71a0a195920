//! Append-only money log and the derived pool balance.
//!
//! ## Write units
//!
//! Every money-moving operation runs inside a [`LedgerWrite`]: the store's
//! write gate is held and a single `BEGIN IMMEDIATE` SQLite transaction is
//! open for the whole unit. Balance checks, payment claims, appends and the
//! projection updates they trigger commit together or not at all. No other
//! write can slip between a balance read and the append that depends on it.
//!
//! ## Balance
//!
//! The pool balance is never stored. It is recomputed as
//! `Σ donation − Σ (allocation + reward)` over the whole log on every read.

use std::sync::Arc;

use sqlx::{Sqlite, SqliteConnection, SqliteExecutor, SqlitePool};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::db::{self, now_millis};
use crate::errors::{PoolError, Result};
use crate::models::{NewTransaction, PaymentReference, Transaction};

const TRANSACTION_COLUMNS: &str = "id, kind, amount, donor_id, campaign_id, recipient_id, \
                                   order_id, payment_id, description, created_at";

#[derive(Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

impl LedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a serialized write unit. Dropping it without [`LedgerWrite::commit`]
    /// rolls everything back.
    pub async fn begin(&self) -> Result<LedgerWrite<'_>> {
        let gate = self.write_gate.lock().await;
        let tx = db::begin_write(&self.pool).await?;
        Ok(LedgerWrite { tx, _gate: gate })
    }

    /// Append a single transaction in its own write unit.
    pub async fn append(&self, new: NewTransaction) -> Result<Transaction> {
        let mut write = self.begin().await?;
        let appended = write.append(new).await?;
        write.commit().await?;
        Ok(appended)
    }

    pub async fn current_balance(&self) -> Result<i64> {
        balance(&self.pool).await
    }

    /// Most recent transactions first.
    pub async fn list(&self, limit: u32, offset: Option<u32>) -> Result<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY id DESC LIMIT ?1 OFFSET ?2"
        ))
        .bind(i64::from(limit))
        .bind(i64::from(offset.unwrap_or(0)))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

async fn balance<'e, E>(ex: E) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let balance: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(CASE WHEN kind = 'donation' THEN amount ELSE -amount END), 0)
        FROM   transactions
        "#,
    )
    .fetch_one(ex)
    .await?;
    Ok(balance)
}

/// An open, serialized ledger write. Fields drop in order, so an abandoned
/// unit rolls back before the gate is released.
pub struct LedgerWrite<'a> {
    tx: sqlx::Transaction<'static, Sqlite>,
    _gate: MutexGuard<'a, ()>,
}

impl LedgerWrite<'_> {
    /// Connection of the open transaction, for collaborator updates that must
    /// commit with the ledger rows.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    pub async fn balance(&mut self) -> Result<i64> {
        balance(&mut *self.tx).await
    }

    /// Record `payment` as consumed. Fails with [`PoolError::DuplicatePayment`]
    /// if the payment id was claimed before.
    pub async fn claim_payment(&mut self, payment: &PaymentReference) -> Result<()> {
        let rows = sqlx::query(
            "INSERT OR IGNORE INTO payments (payment_id, order_id, recorded_at) VALUES (?1, ?2, ?3)",
        )
        .bind(&payment.payment_id)
        .bind(&payment.order_id)
        .bind(now_millis())
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if rows == 0 {
            warn!(payment_id = %payment.payment_id, "Rejected replayed payment confirmation");
            return Err(PoolError::DuplicatePayment(payment.payment_id.clone()));
        }
        Ok(())
    }

    /// Append an outflow only if the pool can cover `total`, the sum of every
    /// outflow this unit is about to make.
    pub async fn ensure_covered(&mut self, total: i64) -> Result<()> {
        let available = self.balance().await?;
        if total > available {
            return Err(PoolError::InsufficientPool {
                requested: total,
                available,
            });
        }
        Ok(())
    }

    pub async fn append(&mut self, new: NewTransaction) -> Result<Transaction> {
        if new.amount <= 0 {
            return Err(PoolError::InvalidAmount);
        }

        // created_at never goes backwards, even if the wall clock does.
        let last: Option<i64> = sqlx::query_scalar("SELECT MAX(created_at) FROM transactions")
            .fetch_one(&mut *self.tx)
            .await?;
        let created_at = last.map_or(now_millis(), |l| l.max(now_millis()));

        let (order_id, payment_id) = match &new.payment {
            Some(p) => (Some(p.order_id.as_str()), Some(p.payment_id.as_str())),
            None => (None, None),
        };

        let appended = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            INSERT INTO transactions
                (kind, amount, donor_id, campaign_id, recipient_id, order_id, payment_id,
                 description, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(new.kind)
        .bind(new.amount)
        .bind(&new.donor_id)
        .bind(&new.campaign_id)
        .bind(&new.recipient_id)
        .bind(order_id)
        .bind(payment_id)
        .bind(&new.description)
        .bind(created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        info!(
            id = appended.id,
            kind = appended.kind.as_str(),
            amount = appended.amount,
            "Ledger append"
        );
        Ok(appended)
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariants;
    use crate::models::TransactionKind;
    use crate::testutil;

    fn donation(amount: i64) -> NewTransaction {
        NewTransaction {
            kind: TransactionKind::Donation,
            amount,
            donor_id: Some("u1".into()),
            campaign_id: None,
            recipient_id: None,
            payment: None,
            description: format!("Donation of {amount}"),
        }
    }

    fn allocation(amount: i64) -> NewTransaction {
        NewTransaction {
            kind: TransactionKind::Allocation,
            campaign_id: Some("c1".into()),
            donor_id: None,
            ..donation(amount)
        }
    }

    #[tokio::test]
    async fn empty_ledger_has_zero_balance() {
        let ledger = testutil::ledger().await;
        assert_eq!(ledger.current_balance().await.unwrap(), 0);
        assert!(ledger.list(10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn balance_is_a_fold_over_the_log() {
        let ledger = testutil::ledger().await;
        ledger.append(donation(1_000)).await.unwrap();
        ledger.append(donation(250)).await.unwrap();
        ledger.append(allocation(600)).await.unwrap();

        assert_eq!(ledger.current_balance().await.unwrap(), 650);
        invariants::assert_balance_matches_log(&ledger).await;
    }

    #[tokio::test]
    async fn append_assigns_ids_and_monotonic_timestamps() {
        let ledger = testutil::ledger().await;
        let a = ledger.append(donation(1)).await.unwrap();
        let b = ledger.append(donation(2)).await.unwrap();
        assert!(b.id > a.id);
        assert!(b.created_at >= a.created_at);
        assert_eq!(a.kind, TransactionKind::Donation);
        assert_eq!(a.payment_reference(), None);
    }

    #[tokio::test]
    async fn list_is_most_recent_first_with_offset() {
        let ledger = testutil::ledger().await;
        for amount in 1..=5 {
            ledger.append(donation(amount)).await.unwrap();
        }

        let page: Vec<i64> = ledger
            .list(2, None)
            .await
            .unwrap()
            .iter()
            .map(|t| t.amount)
            .collect();
        assert_eq!(page, vec![5, 4]);

        let next: Vec<i64> = ledger
            .list(2, Some(2))
            .await
            .unwrap()
            .iter()
            .map(|t| t.amount)
            .collect();
        assert_eq!(next, vec![3, 2]);
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let ledger = testutil::ledger().await;
        assert!(matches!(
            ledger.append(donation(0)).await,
            Err(PoolError::InvalidAmount)
        ));
        assert!(matches!(
            ledger.append(donation(-5)).await,
            Err(PoolError::InvalidAmount)
        ));
        assert!(ledger.list(10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn payment_ids_can_be_claimed_once() {
        let ledger = testutil::ledger().await;
        let payment = PaymentReference {
            order_id: "order_1".into(),
            payment_id: "pay_1".into(),
        };

        let mut write = ledger.begin().await.unwrap();
        write.claim_payment(&payment).await.unwrap();
        write.commit().await.unwrap();

        let mut write = ledger.begin().await.unwrap();
        assert!(matches!(
            write.claim_payment(&payment).await,
            Err(PoolError::DuplicatePayment(id)) if id == "pay_1"
        ));
    }

    #[tokio::test]
    async fn abandoned_unit_rolls_back() {
        let ledger = testutil::ledger().await;
        {
            let mut write = ledger.begin().await.unwrap();
            write.append(donation(500)).await.unwrap();
            assert_eq!(write.balance().await.unwrap(), 500);
        }
        assert_eq!(ledger.current_balance().await.unwrap(), 0);
        assert!(ledger.list(10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ensure_covered_reports_available_balance() {
        let ledger = testutil::ledger().await;
        testutil::fund_pool(&ledger, 400).await;

        let mut write = ledger.begin().await.unwrap();
        write.ensure_covered(400).await.unwrap();
        assert!(matches!(
            write.ensure_covered(401).await,
            Err(PoolError::InsufficientPool { requested: 401, available: 400 })
        ));
    }

    #[tokio::test]
    async fn rows_cannot_be_rewritten() {
        let ledger = testutil::ledger().await;
        let tx = ledger.append(donation(100)).await.unwrap();

        let update = sqlx::query("UPDATE transactions SET amount = 1 WHERE id = ?1")
            .bind(tx.id)
            .execute(ledger.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM transactions WHERE id = ?1")
            .bind(tx.id)
            .execute(ledger.pool())
            .await;
        assert!(delete.is_err());

        assert_eq!(ledger.current_balance().await.unwrap(), 100);
    }
}
