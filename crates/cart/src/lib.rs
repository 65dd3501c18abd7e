//! RocketShoes cart state manager.
//!
//! Owns the shopper's cart for a client-side storefront: an in-memory list
//! of product lines, persisted locally after every change, with each
//! quantity change checked against the stock API first.
//!
//! # Architecture
//!
//! - [`store::CartStore`] - the cart and its three mutations (add, remove,
//!   update amount)
//! - [`api`] - stock/product capabilities and their `reqwest` client
//! - [`storage`] - snapshot persistence capability (file or memory)
//! - [`notify`] - shopper-facing notices for rejected changes
//! - [`config`] - environment configuration
//! - [`telemetry`] - tracing subscriber and Sentry setup

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod storage;
pub mod store;
pub mod telemetry;

pub use error::{CartError, Outcome};
pub use models::{Cart, CartItem, CartSummary};
pub use notify::{Notice, Notifier};
pub use store::{CartServices, CartStore};
