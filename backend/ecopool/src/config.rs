//! Application configuration loaded from environment variables.

use crate::errors::{PoolError, Result};

/// Basis points in one whole (100%).
pub const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Size of the SQLite connection pool
    pub db_max_connections: u32,
    /// Port for the REST API server
    pub api_port: u16,
    /// Payment gateway key id, used for order creation
    pub gateway_key_id: String,
    /// Payment gateway key secret; also the HMAC secret for payment confirmations
    pub gateway_key_secret: String,
    /// Payment gateway base URL (e.g. https://api.razorpay.com)
    pub gateway_url: String,
    /// ISO currency code for new orders
    pub currency: String,
    /// Share of a campaign donation diverted to the pool, in basis points
    pub fee_bps: u32,
    /// Default page size of the public transaction feed
    pub transactions_page_limit: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./ecopool.db".to_string()),
            db_max_connections: env_var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| PoolError::Config("Invalid DB_MAX_CONNECTIONS".to_string()))?,
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| PoolError::Config("Invalid API_PORT".to_string()))?,
            gateway_key_id: env_var("RAZORPAY_KEY_ID").map_err(|_| {
                PoolError::Config("RAZORPAY_KEY_ID environment variable is required".to_string())
            })?,
            gateway_key_secret: env_var("RAZORPAY_KEY_SECRET").map_err(|_| {
                PoolError::Config(
                    "RAZORPAY_KEY_SECRET environment variable is required".to_string(),
                )
            })?,
            gateway_url: env_var("GATEWAY_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com".to_string()),
            currency: env_var("CURRENCY").unwrap_or_else(|_| "INR".to_string()),
            fee_bps: env_var("POOL_FEE_BPS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .map_err(|_| PoolError::Config("Invalid POOL_FEE_BPS".to_string()))?,
            transactions_page_limit: env_var("TRANSACTIONS_PAGE_LIMIT")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .map_err(|_| PoolError::Config("Invalid TRANSACTIONS_PAGE_LIMIT".to_string()))?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.fee_bps >= BPS_DENOMINATOR {
            return Err(PoolError::Config(format!(
                "POOL_FEE_BPS must be below {BPS_DENOMINATOR}, got {}",
                self.fee_bps
            )));
        }
        if self.gateway_key_secret.is_empty() {
            return Err(PoolError::Config(
                "RAZORPAY_KEY_SECRET must not be empty".to_string(),
            ));
        }
        if self.db_max_connections == 0 {
            return Err(PoolError::Config(
                "DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| PoolError::Config(format!("Missing env var: {key}")))
}
