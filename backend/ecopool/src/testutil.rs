//! Seeding helpers shared by the unit tests.

use std::sync::atomic::{AtomicU32, Ordering};

use sqlx::SqlitePool;

use crate::db;
use crate::ledger::LedgerStore;
use crate::models::{PaymentConfirmation, TransactionKind};
use crate::signature::SignatureVerifier;

pub const SECRET: &str = "test_key_secret";

/// Fresh in-memory database. A single connection keeps every query on the
/// same in-memory file.
pub async fn pool() -> SqlitePool {
    db::init_pool("sqlite::memory:", 1)
        .await
        .expect("in-memory database")
}

/// Fresh file-backed database in WAL mode with `max_connections`
/// connections, the way the service runs in production.
pub async fn file_pool(max_connections: u32) -> SqlitePool {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    let path = std::env::temp_dir().join(format!(
        "ecopool-test-{}-{}.db",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }
    db::init_pool(&format!("sqlite://{}", path.display()), max_connections)
        .await
        .expect("file database")
}

pub async fn ledger() -> LedgerStore {
    LedgerStore::new(pool().await)
}

pub async fn file_ledger(max_connections: u32) -> LedgerStore {
    LedgerStore::new(file_pool(max_connections).await)
}

pub fn verifier() -> SignatureVerifier {
    SignatureVerifier::new(SECRET)
}

/// A correctly signed confirmation for `payment_id`.
pub fn confirmation(payment_id: &str) -> PaymentConfirmation {
    let order_id = format!("order_{payment_id}");
    PaymentConfirmation {
        signature: verifier().sign(&order_id, payment_id),
        order_id,
        payment_id: payment_id.to_string(),
    }
}

pub async fn user(pool: &SqlitePool, id: &str) {
    sqlx::query("INSERT INTO users (id, username, name) VALUES (?1, ?1, ?1)")
        .bind(id)
        .execute(pool)
        .await
        .expect("insert user");
}

pub async fn campaign(pool: &SqlitePool, id: &str, creator_id: &str, status: &str) {
    sqlx::query(
        "INSERT INTO campaigns (id, creator_id, title, status) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(id)
    .bind(creator_id)
    .bind(format!("Campaign {id}"))
    .bind(status)
    .execute(pool)
    .await
    .expect("insert campaign");
}

pub async fn feedback(pool: &SqlitePool, campaign_id: &str, user_id: &str, rating: i64) {
    assert!(db::append_feedback(pool, campaign_id, user_id, rating, None)
        .await
        .expect("insert feedback"));
}

pub async fn post(pool: &SqlitePool, user_id: Option<&str>, likes: i64, posted_at: i64) {
    sqlx::query("INSERT INTO posts (user_id, likes, posted_at) VALUES (?1, ?2, ?3)")
        .bind(user_id)
        .bind(likes)
        .bind(posted_at)
        .execute(pool)
        .await
        .expect("insert post");
}

/// Seed the pool directly with an unreferenced donation.
pub async fn fund_pool(ledger: &LedgerStore, amount: i64) {
    ledger
        .append(crate::models::NewTransaction {
            kind: TransactionKind::Donation,
            amount,
            donor_id: Some("seed".to_string()),
            campaign_id: None,
            recipient_id: None,
            payment: None,
            description: format!("Seed donation of {amount}"),
        })
        .await
        .expect("seed donation");
}

pub async fn amount_raised(pool: &SqlitePool, campaign_id: &str) -> i64 {
    db::find_campaign(pool, campaign_id)
        .await
        .expect("query campaign")
        .expect("campaign exists")
        .amount_raised
}
