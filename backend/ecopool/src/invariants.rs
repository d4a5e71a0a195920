//! Ledger invariants asserted by the tests after each scenario.

use crate::ledger::LedgerStore;
use crate::models::Transaction;

/// Fold the log the slow way: Σ donation − Σ (allocation + reward).
pub fn fold_balance(log: &[Transaction]) -> i64 {
    log.iter().map(|t| t.kind.signed(t.amount)).sum()
}

/// INV-1: the reported balance equals a fresh fold over every row.
pub async fn assert_balance_matches_log(ledger: &LedgerStore) {
    let log = ledger.list(u32::MAX, None).await.expect("list ledger");
    let reported = ledger.current_balance().await.expect("current balance");
    assert_eq!(
        reported,
        fold_balance(&log),
        "INV-1 violated: balance {reported} does not match the fold over {} rows",
        log.len()
    );
    assert_balance_non_negative(reported);
}

/// INV-2: the pool never goes negative.
pub fn assert_balance_non_negative(balance: i64) {
    assert!(balance >= 0, "INV-2 violated: pool balance is {balance}");
}

/// INV-3: every row carries a positive amount.
pub fn assert_amounts_positive(log: &[Transaction]) {
    for t in log {
        assert!(
            t.amount > 0,
            "INV-3 violated: transaction {} has amount {}",
            t.id,
            t.amount
        );
    }
}

/// INV-4: a campaign donation split loses nothing to rounding.
pub fn assert_split_conserves(total: i64, campaign_share: i64, fee_share: i64) {
    assert_eq!(
        campaign_share + fee_share,
        total,
        "INV-4 violated: {campaign_share} + {fee_share} != {total}"
    );
}

/// INV-5: ids and timestamps never go backwards in insertion order.
pub fn assert_log_monotonic(log_newest_first: &[Transaction]) {
    for pair in log_newest_first.windows(2) {
        let (newer, older) = (&pair[0], &pair[1]);
        assert!(
            newer.id > older.id,
            "INV-5 violated: id {} listed before {}",
            newer.id,
            older.id
        );
        assert!(
            newer.created_at >= older.created_at,
            "INV-5 violated: transaction {} predates {}",
            newer.id,
            older.id
        );
    }
}

/// Run every log-wide invariant.
pub async fn assert_all_ledger_invariants(ledger: &LedgerStore) {
    let log = ledger.list(u32::MAX, None).await.expect("list ledger");
    assert_amounts_positive(&log);
    assert_log_monotonic(&log);
    assert_balance_matches_log(ledger).await;
}
