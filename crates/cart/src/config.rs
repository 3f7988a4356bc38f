//! Cart subsystem configuration.
//!
//! # Environment Variables (backend client)
//!
//! ## Required
//! - `SUGARLOAF_SHOP_API_URL` - Commerce backend GraphQL endpoint
//! - `SUGARLOAF_CHANNEL_TOKEN` - Channel token for the shop API
//!
//! Cache policy knobs ([`CartConfig`]) are compiled-in defaults; hosts that
//! need different windows construct the struct directly.

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use sugarloaf_core::CurrencyCode;

/// Current schema version of the durable cart record.
pub const CART_SCHEMA_VERSION: u32 = 3;

/// Current schema version of the durable catalog snapshot.
pub const CATALOG_SCHEMA_VERSION: u32 = 2;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cache policy and storage layout for the cart subsystem.
#[derive(Debug, Clone)]
pub struct CartConfig {
    /// Durable storage key for the cart record.
    pub cart_storage_key: String,
    /// Durable storage key for the catalog snapshot.
    pub catalog_storage_key: String,
    /// Currency assumed for carts created empty.
    pub currency_code: CurrencyCode,
    /// How long a fetched per-variant stock figure stays trustworthy.
    pub variant_stock_ttl: Duration,
    /// How old the catalog-level stock view may get before callers should refresh.
    pub catalog_refresh_window: Duration,
    /// Minimum interval between non-forced catalog stock refreshes.
    ///
    /// A rate limit, not a correctness mechanism: checkout validation always
    /// forces a fresh check regardless of this interval.
    pub min_stock_refresh_interval: Duration,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            cart_storage_key: "sugarloaf.cart".to_string(),
            catalog_storage_key: "sugarloaf.catalog".to_string(),
            currency_code: CurrencyCode::USD,
            variant_stock_ttl: Duration::from_secs(300),
            catalog_refresh_window: Duration::from_secs(30),
            min_stock_refresh_interval: Duration::from_secs(300),
        }
    }
}

/// Commerce backend connection configuration.
///
/// Implements `Debug` manually to redact the channel token.
#[derive(Clone)]
pub struct BackendConfig {
    /// GraphQL endpoint of the commerce backend's shop API.
    pub endpoint: String,
    /// Channel token sent with every request.
    pub channel_token: SecretString,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("endpoint", &self.endpoint)
            .field("channel_token", &"[REDACTED]")
            .finish()
    }
}

impl BackendConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let endpoint = get_required_env("SUGARLOAF_SHOP_API_URL")?;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidEnvVar(
                "SUGARLOAF_SHOP_API_URL".to_string(),
                "must be an http(s) URL".to_string(),
            ));
        }
        let channel_token = SecretString::from(get_required_env("SUGARLOAF_CHANNEL_TOKEN")?);

        Ok(Self {
            endpoint,
            channel_token,
        })
    }
}

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}
