//! Stock and product API capabilities.
//!
//! # Architecture
//!
//! - [`StockService`] and [`ProductCatalog`] are the seams the cart store
//!   talks through; tests inject in-memory fakes
//! - [`ApiClient`] implements both over HTTP with `reqwest`
//! - Stock is the source of truth for quantities and is never cached
//! - Product metadata is cached via `moka` (configurable TTL)
//!
//! # Endpoints
//!
//! - `GET {base}/stock/{id}` -> [`StockRecord`]
//! - `GET {base}/products/{id}` -> [`ProductRecord`]

mod client;
pub mod types;

pub use client::ApiClient;
pub use types::*;

use async_trait::async_trait;
use rocketshoes_core::ProductId;
use thiserror::Error;

/// Errors that can occur when talking to the stock/product API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Endpoint URL could not be built.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Source of truth for available quantities.
#[async_trait]
pub trait StockService: Send + Sync {
    /// Fetch the current stock record for a product.
    async fn get_stock(&self, product_id: ProductId) -> Result<StockRecord, ApiError>;
}

/// Product metadata lookup.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Fetch display metadata for a product.
    async fn get_product(&self, product_id: ProductId) -> Result<ProductRecord, ApiError>;
}
