//! Records read from and written to the ledger and its collaborator tables.

use serde::{Deserialize, Serialize};

/// The three kinds of money movement the ledger knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Money entering the platform from a verified payment.
    Donation,
    /// Money leaving the pool for a campaign.
    Allocation,
    /// Money leaving the pool for a leaderboard contributor.
    Reward,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Donation => "donation",
            Self::Allocation => "allocation",
            Self::Reward => "reward",
        }
    }

    /// Signed contribution of an amount of this kind to the pool balance.
    pub fn signed(&self, amount: i64) -> i64 {
        match self {
            Self::Donation => amount,
            Self::Allocation | Self::Reward => -amount,
        }
    }
}

/// `{order_id, payment_id}` pair identifying a gateway payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReference {
    pub order_id: String,
    pub payment_id: String,
}

/// A client-side payment confirmation as handed back by the gateway widget.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfirmation {
    #[serde(alias = "razorpay_order_id")]
    pub order_id: String,
    #[serde(alias = "razorpay_payment_id")]
    pub payment_id: String,
    #[serde(alias = "razorpay_signature")]
    pub signature: String,
}

impl PaymentConfirmation {
    pub fn reference(&self) -> PaymentReference {
        PaymentReference {
            order_id: self.order_id.clone(),
            payment_id: self.payment_id.clone(),
        }
    }
}

/// A transaction that has not been appended yet. Id and timestamp are
/// assigned by the ledger.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub amount: i64,
    pub donor_id: Option<String>,
    pub campaign_id: Option<String>,
    pub recipient_id: Option<String>,
    pub payment: Option<PaymentReference>,
    pub description: String,
}

/// An immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: i64,
    pub kind: TransactionKind,
    pub amount: i64,
    pub donor_id: Option<String>,
    pub campaign_id: Option<String>,
    pub recipient_id: Option<String>,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub description: String,
    pub created_at: i64,
}

impl Transaction {
    pub fn payment_reference(&self) -> Option<PaymentReference> {
        match (&self.order_id, &self.payment_id) {
            (Some(order_id), Some(payment_id)) => Some(PaymentReference {
                order_id: order_id.clone(),
                payment_id: payment_id.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Campaign {
    pub id: String,
    pub creator_id: String,
    pub title: String,
    pub status: CampaignStatus,
    pub amount_raised: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub trust_score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Feedback {
    pub campaign_id: String,
    pub user_id: String,
    pub rating: i64,
    pub comment: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub user_id: String,
    pub message: String,
    pub read: bool,
    pub created_at: i64,
}

/// Like total of one author, as returned by the post directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub total_likes: i64,
}

/// Render an amount in the smallest currency unit as rupees for audit and
/// notification text, e.g. `9400` -> `₹94.00`.
pub fn format_money(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}₹{}.{:02}", abs / 100, abs % 100)
}
