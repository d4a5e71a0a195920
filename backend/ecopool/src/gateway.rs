//! Payment gateway client. Creates the orders that the client-side checkout
//! then pays against.
//!
//! ## Resilience
//!
//! * Exponential back-off is applied when the gateway is unreachable, rate
//!   limits us or answers with a 5xx, up to [`MAX_BACKOFF_SECS`] seconds and
//!   [`MAX_ATTEMPTS`] attempts.
//! * 4xx answers other than 429 are hard failures and are not retried.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::db::now_millis;
use crate::errors::{PoolError, Result};

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_ATTEMPTS: u32 = 5;

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

/// An order as created by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "id")]
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    error: GatewayError,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PaymentGateway {
    client: Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    currency: String,
    initial_backoff: Duration,
}

impl PaymentGateway {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            currency: currency.into(),
            initial_backoff: Duration::from_secs(INITIAL_BACKOFF_SECS),
        }
    }

    /// Create an order for `amount` in the smallest currency unit.
    pub async fn create_order(&self, amount: i64) -> Result<Order> {
        if amount <= 0 {
            return Err(PoolError::InvalidAmount);
        }

        let url = format!("{}/v1/orders", self.base_url.trim_end_matches('/'));
        let body = build_order_body(amount, &self.currency, now_millis());
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;

        loop {
            let response = self
                .client
                .post(&url)
                .basic_auth(&self.key_id, Some(&self.key_secret))
                .json(&body)
                .send()
                .await;

            let retry_reason = match response {
                Err(e) if attempt < MAX_ATTEMPTS && (e.is_connect() || e.is_timeout()) => {
                    e.to_string()
                }
                Err(e) => return Err(e.into()),
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let order: Order = resp.json().await?;
                        debug!(order_id = %order.order_id, amount, "Gateway order created");
                        return Ok(order);
                    }
                    if !is_retryable(status) || attempt >= MAX_ATTEMPTS {
                        let text = resp.text().await.unwrap_or_default();
                        return Err(PoolError::GatewayRejected(describe_rejection(status, &text)));
                    }
                    format!("status {status}")
                }
            };

            warn!(
                attempt,
                "Gateway order request failed (will retry in {}s): {retry_reason}",
                backoff.as_secs()
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(MAX_BACKOFF_SECS));
            attempt += 1;
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn build_order_body(amount: i64, currency: &str, now_ms: i64) -> Value {
    json!({
        "amount": amount,
        "currency": currency,
        "receipt": format!("rcpt_{now_ms}"),
    })
}

/// Turn a gateway error body into a short message. Falls back to the status
/// when the body is not the gateway's error shape.
fn describe_rejection(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<GatewayErrorBody>(body) {
        Ok(GatewayErrorBody { error }) => {
            let code = error.code.unwrap_or_else(|| status.as_u16().to_string());
            match error.description {
                Some(description) => format!("{code}: {description}"),
                None => code,
            }
        }
        Err(_) => format!("status {status}"),
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
