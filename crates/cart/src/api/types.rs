//! Records returned by the stock/product API.

use rocketshoes_core::{Price, ProductId};
use serde::{Deserialize, Serialize};

/// Available quantity of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    /// Product the record claims to describe.
    pub id: ProductId,
    /// Units available.
    pub amount: u32,
}

/// Product display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Catalog product ID.
    pub id: ProductId,
    /// Product name.
    #[serde(alias = "name")]
    pub title: String,
    /// Unit price.
    pub price: Price,
    /// Product image URL.
    #[serde(alias = "imageUrl")]
    pub image: String,
}
