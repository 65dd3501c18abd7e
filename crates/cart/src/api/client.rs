//! HTTP implementation of the stock and product capabilities.
//!
//! Uses `reqwest` for HTTP. Caches product metadata using `moka`; stock
//! records always hit the API.

use std::sync::Arc;

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use rocketshoes_core::ProductId;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::{ApiError, ProductCatalog, ProductRecord, StockRecord, StockService};
use crate::config::ApiConfig;

/// Longest response body excerpt kept in errors and logs.
const MAX_ERROR_BODY: usize = 500;

/// Client for the storefront stock/product API.
///
/// Cheaply cloneable; clones share the connection pool and product cache.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    client: reqwest::Client,
    base_url: Url,
    products: Cache<ProductId, ProductRecord>,
}

impl ApiClient {
    /// Create a new API client.
    ///
    /// # Errors
    ///
    /// Returns error if the token is not a valid header value or the HTTP
    /// client fails to build.
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|e| ApiError::Api {
                    status: 0,
                    message: format!("Invalid API token format: {e}"),
                })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        let products = Cache::builder()
            .max_capacity(1000)
            .time_to_live(config.product_cache_ttl)
            .build();

        Ok(Self {
            inner: Arc::new(ApiClientInner {
                client,
                base_url: config.base_url.clone(),
                products,
            }),
        })
    }

    /// GET a path relative to the base URL and decode the JSON body.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.inner.base_url.join(path)?;
        let response = self.inner.client.get(url).send().await?;
        let status = response.status();

        // Get response body as text first for better error diagnostics
        let body = response.text().await?;

        if !status.is_success() {
            let excerpt = body.chars().take(MAX_ERROR_BODY).collect::<String>();
            tracing::warn!(status = %status, body = %excerpt, "API returned non-success status");
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: excerpt,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl StockService for ApiClient {
    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn get_stock(&self, product_id: ProductId) -> Result<StockRecord, ApiError> {
        self.get_json(&format!("stock/{product_id}")).await
    }
}

#[async_trait]
impl ProductCatalog for ApiClient {
    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn get_product(&self, product_id: ProductId) -> Result<ProductRecord, ApiError> {
        if let Some(product) = self.inner.products.get(&product_id).await {
            debug!("Cache hit for product");
            return Ok(product);
        }

        let product: ProductRecord = self.get_json(&format!("products/{product_id}")).await?;

        self.inner
            .products
            .insert(product_id, product.clone())
            .await;

        Ok(product)
    }
}
