//! Rejection taxonomy for cart operations, with Sentry breadcrumbs.
//!
//! Cart operations never return `Err` to the UI layer. Each one settles into
//! an [`Outcome`]; a rejected outcome carries the [`CartError`] and, for the
//! kinds the shopper should hear about, a [`Notice`] has already been
//! emitted.

use rocketshoes_core::ProductId;
use thiserror::Error;

use crate::api::ApiError;
use crate::notify::Notice;

/// Cart operation kinds, used to pick the generic failure notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartAction {
    Add,
    Remove,
    Update,
}

impl CartAction {
    const fn failure_notice(self) -> Notice {
        match self {
            Self::Add => Notice::AddFailed,
            Self::Remove => Notice::RemoveFailed,
            Self::Update => Notice::UpdateFailed,
        }
    }

    /// Short name used in logs and breadcrumbs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Update => "update",
        }
    }
}

/// Why a cart operation was rejected.
#[derive(Debug, Error)]
pub enum CartError {
    /// Stock or product lookup failed.
    #[error("Transport error: {0}")]
    Transport(#[from] ApiError),

    /// Requested amount exceeds available stock.
    #[error("Only {available} unit(s) of product {product_id} in stock, {requested} requested")]
    StockExceeded {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Product is not in the cart.
    #[error("Product {0} is not in the cart")]
    NotFound(ProductId),

    /// Amount must be at least 1.
    #[error("Invalid amount: {0}")]
    InvalidAmount(u32),

    /// The API answered with a stock or product record for another product.
    #[error("API returned a record for product {received} when product {requested} was requested")]
    IntegrityMismatch {
        requested: ProductId,
        received: ProductId,
    },
}

impl CartError {
    /// Notice shown to the shopper for this rejection, if any.
    ///
    /// Invalid input and integrity mismatches are silent.
    #[must_use]
    pub const fn notice(&self, action: CartAction) -> Option<Notice> {
        match self {
            Self::StockExceeded { .. } => Some(Notice::OutOfStock),
            Self::Transport(_) | Self::NotFound(_) => Some(action.failure_notice()),
            Self::InvalidAmount(_) | Self::IntegrityMismatch { .. } => None,
        }
    }
}

/// Result of a cart operation as seen by the UI layer.
#[derive(Debug)]
pub enum Outcome {
    /// The change is in memory and persisted.
    Committed,
    /// Nothing changed.
    Rejected(CartError),
}

impl Outcome {
    /// Whether the operation committed.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    /// The rejection reason, if rejected.
    #[must_use]
    pub const fn rejection(&self) -> Option<&CartError> {
        match self {
            Self::Committed => None,
            Self::Rejected(err) => Some(err),
        }
    }
}

impl From<Result<(), CartError>> for Outcome {
    fn from(result: Result<(), CartError>) -> Self {
        match result {
            Ok(()) => Self::Committed,
            Err(err) => Self::Rejected(err),
        }
    }
}

/// Add a breadcrumb for a cart action.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of cart
/// changes leading up to an error. No-op when Sentry is not initialized.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
