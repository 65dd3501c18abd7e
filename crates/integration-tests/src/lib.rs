//! Integration test support for the RocketShoes cart.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p rocketshoes-integration-tests
//! ```
//!
//! [`StubApi`] serves the storefront's `/stock/{id}` and `/products/{id}`
//! endpoints from in-memory tables on an ephemeral localhost port, so the
//! tests drive the real `reqwest` client and file storage end to end.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rocketshoes_cart::config::CartConfig;
use serde_json::{Value, json};

#[derive(Default)]
struct Tables {
    stock: HashMap<i32, Value>,
    products: HashMap<i32, Value>,
}

#[derive(Default)]
struct StubState {
    tables: Mutex<Tables>,
    stock_hits: AtomicUsize,
    product_hits: AtomicUsize,
}

/// In-process stand-in for the storefront stock/product API.
#[derive(Clone)]
pub struct StubApi {
    state: Arc<StubState>,
    addr: SocketAddr,
}

impl StubApi {
    /// Bind to an ephemeral port and start serving in the background.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn spawn() -> Self {
        let state = Arc::new(StubState::default());

        let app = Router::new()
            .route("/stock/{id}", get(stock))
            .route("/products/{id}", get(product))
            .with_state(state.clone());

        #[allow(clippy::expect_used)]
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind stub API");
        #[allow(clippy::expect_used)]
        let addr = listener.local_addr().expect("Stub API has no local address");

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { state, addr }
    }

    /// Register a product with the given stock.
    pub fn add_product(&self, id: i32, title: &str, price: f64, stock: u32) {
        let mut tables = self.tables();
        tables.products.insert(
            id,
            json!({
                "id": id,
                "title": title,
                "price": price,
                "image": format!("https://cdn.rocketshoes.test/{id}.jpg"),
            }),
        );
        tables.stock.insert(id, json!({ "id": id, "amount": stock }));
    }

    /// Replace the stock amount for a product.
    pub fn set_stock(&self, id: i32, amount: u32) {
        self.tables()
            .stock
            .insert(id, json!({ "id": id, "amount": amount }));
    }

    /// Serve an arbitrary stock body for a product.
    pub fn set_raw_stock(&self, id: i32, body: Value) {
        self.tables().stock.insert(id, body);
    }

    /// Stop serving product metadata for a product (stock stays).
    pub fn remove_product_record(&self, id: i32) {
        self.tables().products.remove(&id);
    }

    /// Number of stock requests served.
    #[must_use]
    pub fn stock_hits(&self) -> usize {
        self.state.stock_hits.load(Ordering::SeqCst)
    }

    /// Number of product requests served.
    #[must_use]
    pub fn product_hits(&self) -> usize {
        self.state.product_hits.load(Ordering::SeqCst)
    }

    /// Base URL of the stub.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Cart configuration pointing at this stub and a fresh storage directory.
    ///
    /// # Panics
    ///
    /// Panics if the generated configuration is invalid.
    #[must_use]
    pub fn config(&self, storage_dir: &std::path::Path) -> CartConfig {
        let vars: HashMap<&str, String> = HashMap::from([
            ("ROCKETSHOES_API_URL", self.base_url()),
            ("ROCKETSHOES_REQUEST_TIMEOUT_SECS", "5".to_string()),
            ("ROCKETSHOES_STORAGE_DIR", storage_dir.display().to_string()),
        ]);

        #[allow(clippy::expect_used)]
        CartConfig::from_lookup(|key| vars.get(key).cloned()).expect("Invalid stub configuration")
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.state
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fresh scratch directory, removed when the guard drops.
///
/// # Panics
///
/// Panics if the system temp directory is not writable.
#[must_use]
#[allow(clippy::expect_used)]
pub fn scratch_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("rocketshoes-it-")
        .tempdir()
        .expect("Failed to create scratch directory")
}

async fn stock(State(state): State<Arc<StubState>>, Path(id): Path<i32>) -> Response {
    state.stock_hits.fetch_add(1, Ordering::SeqCst);
    let body = state
        .tables
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .stock
        .get(&id)
        .cloned();
    respond(body)
}

async fn product(State(state): State<Arc<StubState>>, Path(id): Path<i32>) -> Response {
    state.product_hits.fetch_add(1, Ordering::SeqCst);
    let body = state
        .tables
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .products
        .get(&id)
        .cloned();
    respond(body)
}

fn respond(body: Option<Value>) -> Response {
    match body {
        Some(body) => Json(body).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({}))).into_response(),
    }
}
