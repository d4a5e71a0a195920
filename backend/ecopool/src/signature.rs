//! Payment confirmation signature check.
//!
//! The gateway signs `order_id|payment_id` with HMAC-SHA256 using the merchant
//! key secret and hands the hex digest to the client. A confirmation is only
//! trusted once the digest recomputed here matches the one the client sent.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::errors::{PoolError, Result};
use crate::models::PaymentConfirmation;

type HmacSha256 = Hmac<Sha256>;

/// Returns `Ok(false)` on any mismatch, including a signature that is not
/// valid hex or has the wrong length. Errors only when a required input is
/// empty.
pub fn verify(order_id: &str, payment_id: &str, signature: &str, secret: &str) -> Result<bool> {
    if order_id.is_empty() {
        return Err(PoolError::MissingInput("order_id"));
    }
    if payment_id.is_empty() {
        return Err(PoolError::MissingInput("payment_id"));
    }
    if signature.is_empty() {
        return Err(PoolError::MissingInput("signature"));
    }
    if secret.is_empty() {
        return Err(PoolError::MissingInput("secret"));
    }

    let Ok(provided) = hex::decode(signature.trim()) else {
        return Ok(false);
    };
    let expected = digest(order_id, payment_id, secret);
    if provided.len() != expected.len() {
        return Ok(false);
    }
    Ok(bool::from(expected.as_slice().ct_eq(provided.as_slice())))
}

/// Hex-encoded `HMAC-SHA256(secret, order_id|payment_id)`.
#[cfg(test)]
pub fn sign(order_id: &str, payment_id: &str, secret: &str) -> String {
    hex::encode(digest(order_id, payment_id, secret))
}

fn digest(order_id: &str, payment_id: &str, secret: &str) -> [u8; 32] {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Holds the shared secret so callers never pass it around.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Rejects the confirmation with [`PoolError::InvalidSignature`] unless
    /// its signature checks out.
    pub fn check(&self, confirmation: &PaymentConfirmation) -> Result<()> {
        if verify(
            &confirmation.order_id,
            &confirmation.payment_id,
            &confirmation.signature,
            &self.secret,
        )? {
            Ok(())
        } else {
            Err(PoolError::InvalidSignature)
        }
    }

    #[cfg(test)]
    pub fn sign(&self, order_id: &str, payment_id: &str) -> String {
        sign(order_id, payment_id, &self.secret)
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}
