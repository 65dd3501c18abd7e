//! Cart configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `ROCKETSHOES_API_URL` - Base URL of the stock/product API (default: `http://localhost:3333`)
//! - `ROCKETSHOES_API_TOKEN` - Bearer token sent with every API request
//! - `ROCKETSHOES_REQUEST_TIMEOUT_SECS` - Per-request timeout (default: 10)
//! - `ROCKETSHOES_PRODUCT_CACHE_TTL_SECS` - Product metadata cache TTL (default: 300)
//! - `ROCKETSHOES_STORAGE_DIR` - Directory holding the persisted cart (default: `.rocketshoes`)
//! - `ROCKETSHOES_STORAGE_KEY` - Persistence slot name (default: `@RocketShoes:cart`)
//! - `ROCKETSHOES_CURRENCY` - ISO 4217 code used for display (default: BRL)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::time::Duration;

use rocketshoes_core::CurrencyCode;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:3333";
const DEFAULT_STORAGE_KEY: &str = "@RocketShoes:cart";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart application configuration.
#[derive(Debug, Clone)]
pub struct CartConfig {
    /// Stock/product API configuration
    pub api: ApiConfig,
    /// Local persistence configuration
    pub storage: StorageConfig,
    /// Currency used when formatting prices
    pub currency: CurrencyCode,
    /// Error tracking configuration
    pub telemetry: TelemetryConfig,
}

/// Stock/product API configuration.
///
/// Implements `Debug` manually to redact the token.
#[derive(Clone)]
pub struct ApiConfig {
    /// Base URL, always ending in `/` so relative paths join under it
    pub base_url: Url,
    /// Optional bearer token
    pub token: Option<SecretString>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// How long product metadata stays cached
    pub product_cache_ttl: Duration,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout", &self.request_timeout)
            .field("product_cache_ttl", &self.product_cache_ttl)
            .finish()
    }
}

/// Local persistence configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the cart snapshot
    pub dir: PathBuf,
    /// Slot name of the cart snapshot
    pub key: String,
}

/// Sentry configuration.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

impl CartConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Lookup(&lookup);

        let api = ApiConfig {
            base_url: parse_base_url(
                "ROCKETSHOES_API_URL",
                &env.or_default("ROCKETSHOES_API_URL", DEFAULT_API_URL),
            )?,
            token: env.optional("ROCKETSHOES_API_TOKEN").map(SecretString::from),
            request_timeout: env.secs("ROCKETSHOES_REQUEST_TIMEOUT_SECS", 10)?,
            product_cache_ttl: env.secs("ROCKETSHOES_PRODUCT_CACHE_TTL_SECS", 300)?,
        };

        let storage = StorageConfig {
            dir: PathBuf::from(env.or_default("ROCKETSHOES_STORAGE_DIR", ".rocketshoes")),
            key: env.or_default("ROCKETSHOES_STORAGE_KEY", DEFAULT_STORAGE_KEY),
        };
        if storage.key.trim().is_empty() {
            return Err(ConfigError::InvalidEnvVar(
                "ROCKETSHOES_STORAGE_KEY".to_string(),
                "must not be empty".to_string(),
            ));
        }

        let currency = env
            .or_default("ROCKETSHOES_CURRENCY", "BRL")
            .parse::<CurrencyCode>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("ROCKETSHOES_CURRENCY".to_string(), e.to_string())
            })?;

        let telemetry = TelemetryConfig {
            sentry_dsn: env.optional("SENTRY_DSN"),
            sentry_environment: env.optional("SENTRY_ENVIRONMENT"),
        };

        Ok(Self {
            api,
            storage,
            currency,
            telemetry,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Lookup<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Lookup<'_, F> {
    /// Get an optional variable, treating empty values as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.is_empty())
    }

    /// Get a variable with a default value.
    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    /// Get a duration expressed in whole seconds.
    fn secs(&self, key: &str, default: u64) -> Result<Duration, ConfigError> {
        self.optional(key).map_or(Ok(Duration::from_secs(default)), |raw| {
            raw.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
    }
}

/// Parse the API base URL, forcing a trailing slash.
fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let mut url =
        Url::parse(raw).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be an absolute http(s) URL".to_string(),
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
