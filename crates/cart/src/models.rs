//! Cart data model.
//!
//! A [`Cart`] is an ordered list of [`CartItem`]s with at most one line per
//! product and every line holding at least one unit. Its serialized form is
//! a bare JSON array of items, which is exactly the persisted snapshot.

use rocketshoes_core::{CurrencyCode, Price, ProductId};
use serde::{Deserialize, Serialize};

use crate::api::ProductRecord;

/// One product line in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
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
    /// Units in the cart, always at least 1.
    pub amount: u32,
}

impl CartItem {
    /// A fresh single-unit line for a product entering the cart.
    #[must_use]
    pub fn from_product(product: ProductRecord) -> Self {
        Self {
            id: product.id,
            title: product.title,
            price: product.price,
            image: product.image,
            amount: 1,
        }
    }

    /// Unit price times amount.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.price.times(self.amount)
    }
}

/// Ordered cart lines keyed by product ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    /// Create an empty cart.
    #[must_use]
    pub const fn empty() -> Self {
        Self { items: Vec::new() }
    }

    /// Build a cart from untrusted lines.
    ///
    /// Lines with a zero amount are dropped and only the first line for each
    /// product is kept. Returns the cart and the number of discarded lines.
    #[must_use]
    pub fn normalized(items: Vec<CartItem>) -> (Self, usize) {
        let total = items.len();
        let mut cart = Self::empty();
        for item in items {
            if item.amount > 0 && !cart.contains(item.id) {
                cart.items.push(item);
            }
        }
        let discarded = total - cart.items.len();
        (cart, discarded)
    }

    /// Lines in display order.
    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// Line for a product, if present.
    #[must_use]
    pub fn get(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.id == product_id)
    }

    /// Amount of a product in the cart, if present.
    #[must_use]
    pub fn amount_of(&self, product_id: ProductId) -> Option<u32> {
        self.get(product_id).map(|item| item.amount)
    }

    /// Whether the cart has a line for a product.
    #[must_use]
    pub fn contains(&self, product_id: ProductId) -> bool {
        self.get(product_id).is_some()
    }

    /// Number of distinct lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of all line amounts.
    #[must_use]
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.amount).sum()
    }

    /// Sum of all line totals.
    #[must_use]
    pub fn subtotal(&self) -> Price {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Display model of the cart.
    #[must_use]
    pub fn summary(&self, currency: CurrencyCode) -> CartSummary {
        CartSummary {
            lines: self
                .items
                .iter()
                .map(|item| CartLineSummary {
                    id: item.id,
                    title: item.title.clone(),
                    image: item.image.clone(),
                    amount: item.amount,
                    price: item.price.display(currency),
                    line_price: item.line_total().display(currency),
                })
                .collect(),
            item_count: self.len(),
            total_quantity: self.total_quantity(),
            subtotal: self.subtotal().display(currency),
        }
    }

    // Mutators below keep the one-line-per-product and amount >= 1 rules;
    // callers are the store's commit closures.

    /// Append a line for a product not yet in the cart.
    pub(crate) fn insert(&mut self, item: CartItem) {
        debug_assert!(item.amount > 0);
        if !self.contains(item.id) {
            self.items.push(item);
        }
    }

    /// Set the amount of an existing line. Zero removes the line.
    pub(crate) fn set_amount(&mut self, product_id: ProductId, amount: u32) {
        if amount == 0 {
            self.remove(product_id);
        } else if let Some(item) = self.items.iter_mut().find(|item| item.id == product_id) {
            item.amount = amount;
        }
    }

    /// Drop the line for a product.
    pub(crate) fn remove(&mut self, product_id: ProductId) {
        self.items.retain(|item| item.id != product_id);
    }
}

/// Formatted cart view for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSummary {
    /// Lines in display order.
    pub lines: Vec<CartLineSummary>,
    /// Number of distinct lines.
    pub item_count: usize,
    /// Sum of all line amounts.
    pub total_quantity: u32,
    /// Formatted subtotal.
    pub subtotal: String,
}

/// Formatted cart line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLineSummary {
    pub id: ProductId,
    pub title: String,
    pub image: String,
    pub amount: u32,
    /// Formatted unit price.
    pub price: String,
    /// Formatted unit price times amount.
    pub line_price: String,
}
