//! Stock-validated cart store.
//!
//! [`CartStore`] owns the in-memory cart, validates every quantity change
//! against a fresh stock record, persists a full snapshot on each commit and
//! emits a [`Notice`] when a rejection should reach the shopper.
//!
//! # Consistency
//!
//! - Mutations on the same product are serialized by a per-product async
//!   lock held from the first read of the line to the commit.
//! - Commits apply their single-line change to the cart as it stands at
//!   commit time, under a short synchronous lock that also covers the
//!   snapshot write, so the persisted snapshot follows commit order.
//! - Rejected operations touch neither the cart nor the snapshot.
//!
//! # Example
//!
//! ```rust,ignore
//! let (notifier, mut notices) = ChannelNotifier::channel();
//! let store = CartStore::connect(&CartConfig::from_env()?, Arc::new(notifier))?;
//!
//! store.add_product(ProductId::new(1)).await;
//! store.update_product_amount(ProductId::new(1), 3).await;
//! println!("{}", store.summary().subtotal);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rocketshoes_core::{CurrencyCode, ProductId};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, instrument, warn};

use crate::api::{ApiClient, ApiError, ProductCatalog, StockService};
use crate::config::CartConfig;
use crate::error::{CartAction, CartError, Outcome, add_breadcrumb};
use crate::models::{Cart, CartItem, CartSummary};
use crate::notify::{Notice, Notifier};
use crate::storage::{FileStorage, Persistable};

/// Capabilities the store is built from.
#[derive(Clone)]
pub struct CartServices {
    pub stock: Arc<dyn StockService>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub storage: Arc<dyn Persistable>,
    pub notifier: Arc<dyn Notifier>,
}

impl CartServices {
    /// Use one API implementation for both stock and product lookups.
    pub fn new<A>(api: Arc<A>, storage: Arc<dyn Persistable>, notifier: Arc<dyn Notifier>) -> Self
    where
        A: StockService + ProductCatalog + 'static,
    {
        let stock: Arc<dyn StockService> = api.clone();
        Self {
            stock,
            catalog: api,
            storage,
            notifier,
        }
    }
}

/// Shopping cart shared between UI consumers.
///
/// Cheaply cloneable via `Arc`; clones operate on the same cart.
#[derive(Clone)]
pub struct CartStore {
    inner: Arc<CartStoreInner>,
}

struct CartStoreInner {
    services: CartServices,
    currency: CurrencyCode,
    cart: Mutex<Cart>,
    locks: ProductLocks,
}

impl CartStore {
    /// Create a store, seeding the cart from the persisted snapshot.
    ///
    /// A missing snapshot yields an empty cart. An unreadable one is logged
    /// and ignored. Invalid lines (zero amounts, repeated products) are
    /// dropped and the cleaned snapshot is written back.
    #[must_use]
    pub fn open(services: CartServices, currency: CurrencyCode) -> Self {
        let cart = load_snapshot(services.storage.as_ref());

        Self {
            inner: Arc::new(CartStoreInner {
                services,
                currency,
                cart: Mutex::new(cart),
                locks: ProductLocks::default(),
            }),
        }
    }

    /// Create a store backed by the HTTP API and file storage from `config`.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` if the HTTP client cannot be built.
    pub fn connect(config: &CartConfig, notifier: Arc<dyn Notifier>) -> Result<Self, ApiError> {
        let api = Arc::new(ApiClient::new(&config.api)?);
        let storage = Arc::new(FileStorage::new(&config.storage.dir, &config.storage.key));

        Ok(Self::open(
            CartServices::new(api, storage, notifier),
            config.currency,
        ))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Snapshot of the cart.
    #[must_use]
    pub fn cart(&self) -> Cart {
        self.lock_cart().clone()
    }

    /// Amount of a product in the cart, if present.
    #[must_use]
    pub fn amount_of(&self, product_id: ProductId) -> Option<u32> {
        self.lock_cart().amount_of(product_id)
    }

    /// Formatted cart view in the store's currency.
    #[must_use]
    pub fn summary(&self) -> CartSummary {
        self.lock_cart().summary(self.inner.currency)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add one unit of a product, creating its line if needed.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add_product(&self, product_id: ProductId) -> Outcome {
        let _guard = self.inner.locks.acquire(product_id).await;
        let result = self.try_add_product(product_id).await;
        self.settle(CartAction::Add, product_id, result)
    }

    /// Remove a product's line entirely.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn remove_product(&self, product_id: ProductId) -> Outcome {
        let _guard = self.inner.locks.acquire(product_id).await;
        let result = self.commit(|cart| {
            if !cart.contains(product_id) {
                return Err(CartError::NotFound(product_id));
            }
            cart.remove(product_id);
            Ok(())
        });
        self.settle(CartAction::Remove, product_id, result)
    }

    /// Set the amount of a product already in the cart.
    ///
    /// Zero is rejected silently; removing a line is `remove_product`'s job.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn update_product_amount(&self, product_id: ProductId, amount: u32) -> Outcome {
        let _guard = self.inner.locks.acquire(product_id).await;
        let result = self.try_update_product_amount(product_id, amount).await;
        self.settle(CartAction::Update, product_id, result)
    }

    async fn try_add_product(&self, product_id: ProductId) -> Result<(), CartError> {
        let current_amount = self.amount_of(product_id).unwrap_or(0);

        let stock = self.inner.services.stock.get_stock(product_id).await?;

        let desired_amount = current_amount.saturating_add(1);
        if desired_amount > stock.amount {
            return Err(CartError::StockExceeded {
                product_id,
                requested: desired_amount,
                available: stock.amount,
            });
        }

        let new_line = if current_amount == 0 {
            let product = self.inner.services.catalog.get_product(product_id).await?;
            if product.id != product_id {
                return Err(CartError::IntegrityMismatch {
                    requested: product_id,
                    received: product.id,
                });
            }
            Some(CartItem::from_product(product))
        } else {
            None
        };

        // A stock record for another product is discarded without telling the shopper
        if stock.id != product_id {
            return Err(CartError::IntegrityMismatch {
                requested: product_id,
                received: stock.id,
            });
        }

        self.commit(|cart| {
            match new_line {
                Some(item) => cart.insert(item),
                None => cart.set_amount(product_id, desired_amount),
            }
            Ok(())
        })
    }

    async fn try_update_product_amount(
        &self,
        product_id: ProductId,
        amount: u32,
    ) -> Result<(), CartError> {
        if amount == 0 {
            return Err(CartError::InvalidAmount(amount));
        }

        let stock = self.inner.services.stock.get_stock(product_id).await?;

        if amount > stock.amount {
            return Err(CartError::StockExceeded {
                product_id,
                requested: amount,
                available: stock.amount,
            });
        }

        self.commit(|cart| {
            if !cart.contains(product_id) {
                return Err(CartError::NotFound(product_id));
            }
            cart.set_amount(product_id, amount);
            Ok(())
        })
    }

    // =========================================================================
    // Commit / settle
    // =========================================================================

    /// Apply a change to a copy of the current cart; on success persist the
    /// copy and make it current.
    ///
    /// The snapshot is written synchronously while the cart lock is held, so
    /// storage backends are expected to be small local slots.
    fn commit(
        &self,
        apply: impl FnOnce(&mut Cart) -> Result<(), CartError>,
    ) -> Result<(), CartError> {
        let mut cart = self.lock_cart();
        let mut next = cart.clone();
        apply(&mut next)?;
        persist(self.inner.services.storage.as_ref(), &next);
        *cart = next;
        Ok(())
    }

    /// Log the result, emit the notice if one applies, and wrap it up.
    fn settle(
        &self,
        action: CartAction,
        product_id: ProductId,
        result: Result<(), CartError>,
    ) -> Outcome {
        match &result {
            Ok(()) => {
                debug!(action = action.as_str(), "Cart change committed");
                add_breadcrumb(
                    "cart",
                    "Cart change committed",
                    Some(&[
                        ("action", action.as_str()),
                        ("product_id", &product_id.to_string()),
                    ]),
                );
            }
            Err(err) => match err.notice(action) {
                Some(notice) => {
                    warn!(action = action.as_str(), error = %err, "Cart change rejected");
                    self.notify(notice);
                }
                None => debug!(action = action.as_str(), error = %err, "Cart change ignored"),
            },
        }

        Outcome::from(result)
    }

    fn notify(&self, notice: Notice) {
        self.inner.services.notifier.notify(notice);
    }

    fn lock_cart(&self) -> MutexGuard<'_, Cart> {
        self.inner
            .cart
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Async locks for the products with an operation in flight.
///
/// An entry lives while some operation holds or waits on it and is pruned by
/// the last guard to go.
#[derive(Default)]
struct ProductLocks {
    locks: Mutex<HashMap<ProductId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProductLocks {
    async fn acquire(&self, product_id: ProductId) -> ProductLockGuard<'_> {
        // Built before waiting, so a cancelled waiter still prunes its entry
        let mut held = ProductLockGuard {
            locks: self,
            product_id,
            guard: None,
        };
        // Cloned under the map lock, so a pruning guard sees every waiter
        let lock = Arc::clone(self.map().entry(product_id).or_default());
        held.guard = Some(lock.lock_owned().await);
        held
    }

    fn map(&self) -> MutexGuard<'_, HashMap<ProductId, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

struct ProductLockGuard<'a> {
    locks: &'a ProductLocks,
    product_id: ProductId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ProductLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.map();
        if map
            .get(&self.product_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.product_id);
        }
    }
}

/// Read and sanitize the persisted cart.
fn load_snapshot(storage: &dyn Persistable) -> Cart {
    let blob = match storage.load() {
        Ok(Some(blob)) => blob,
        Ok(None) => return Cart::empty(),
        Err(e) => {
            warn!(error = %e, "Failed to read cart snapshot, starting empty");
            return Cart::empty();
        }
    };

    let items = match serde_json::from_str::<Vec<CartItem>>(&blob) {
        Ok(items) => items,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable cart snapshot");
            return Cart::empty();
        }
    };

    let (cart, discarded) = Cart::normalized(items);
    if discarded > 0 {
        warn!(discarded, "Dropped invalid lines from cart snapshot");
        persist(storage, &cart);
    }
    debug!(lines = cart.len(), "Cart restored from snapshot");
    cart
}

/// Overwrite the snapshot. Failures are logged, never surfaced.
fn persist(storage: &dyn Persistable, cart: &Cart) {
    let blob = match serde_json::to_string(cart) {
        Ok(blob) => blob,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize cart snapshot");
            return;
        }
    };

    if let Err(e) = storage.save(&blob) {
        tracing::error!(error = %e, "Failed to persist cart snapshot");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rocketshoes_core::Price;

    use super::*;
    use crate::api::{ProductRecord, StockRecord};
    use crate::storage::{MemoryStorage, StorageError};

    // =========================================================================
    // Fakes
    // =========================================================================

    #[derive(Default)]
    struct FakeApi {
        stock: Mutex<HashMap<ProductId, StockRecord>>,
        products: Mutex<HashMap<ProductId, ProductRecord>>,
        stock_calls: AtomicUsize,
        product_calls: AtomicUsize,
        offline: AtomicBool,
    }

    impl FakeApi {
        fn with_product(self, id: i32, stock: u32) -> Self {
            let product_id = ProductId::new(id);
            self.stock.lock().unwrap().insert(
                product_id,
                StockRecord {
                    id: product_id,
                    amount: stock,
                },
            );
            self.products
                .lock()
                .unwrap()
                .insert(product_id, product(id));
            self
        }

        /// Stock lookups for `id` answer with a record for `reported`.
        fn with_misrouted_stock(self, id: i32, reported: i32, stock: u32) -> Self {
            self.stock.lock().unwrap().insert(
                ProductId::new(id),
                StockRecord {
                    id: ProductId::new(reported),
                    amount: stock,
                },
            );
            self
        }

        /// Product lookups for `id` answer with the record for `reported`.
        fn with_misrouted_product(self, id: i32, reported: i32) -> Self {
            self.products
                .lock()
                .unwrap()
                .insert(ProductId::new(id), product(reported));
            self
        }

        fn without_product_record(self, id: i32) -> Self {
            self.products.lock().unwrap().remove(&ProductId::new(id));
            self
        }

        fn set_stock(&self, id: i32, amount: u32) {
            let product_id = ProductId::new(id);
            self.stock.lock().unwrap().insert(
                product_id,
                StockRecord {
                    id: product_id,
                    amount,
                },
            );
        }

        fn go_offline(&self) {
            self.offline.store(true, Ordering::SeqCst);
        }

        fn not_found(product_id: ProductId) -> ApiError {
            ApiError::Api {
                status: 404,
                message: format!("no record for {product_id}"),
            }
        }
    }

    #[async_trait]
    impl StockService for FakeApi {
        async fn get_stock(&self, product_id: ProductId) -> Result<StockRecord, ApiError> {
            // Give concurrent operations a chance to interleave
            tokio::task::yield_now().await;
            self.stock_calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(ApiError::Api {
                    status: 503,
                    message: "Service Unavailable".to_string(),
                });
            }
            self.stock
                .lock()
                .unwrap()
                .get(&product_id)
                .copied()
                .ok_or_else(|| Self::not_found(product_id))
        }
    }

    #[async_trait]
    impl ProductCatalog for FakeApi {
        async fn get_product(&self, product_id: ProductId) -> Result<ProductRecord, ApiError> {
            tokio::task::yield_now().await;
            self.product_calls.fetch_add(1, Ordering::SeqCst);
            self.products
                .lock()
                .unwrap()
                .get(&product_id)
                .cloned()
                .ok_or_else(|| Self::not_found(product_id))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<Notice>>,
    }

    impl RecordingNotifier {
        fn notices(&self) -> Vec<Notice> {
            self.notices.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notice: Notice) {
            self.notices.lock().unwrap().push(notice);
        }
    }

    struct FailingStorage;

    impl Persistable for FailingStorage {
        fn load(&self) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        fn save(&self, _blob: &str) -> Result<(), StorageError> {
            Err(StorageError::Io {
                path: "/read-only/cart.json".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        }
    }

    fn product(id: i32) -> ProductRecord {
        ProductRecord {
            id: ProductId::new(id),
            title: format!("Tênis {id}"),
            price: Price::from_cents(17990),
            image: format!("https://cdn.example.com/{id}.jpg"),
        }
    }

    fn line(id: i32, amount: u32) -> CartItem {
        CartItem {
            amount,
            ..CartItem::from_product(product(id))
        }
    }

    struct Harness {
        store: CartStore,
        api: Arc<FakeApi>,
        storage: Arc<MemoryStorage>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Harness {
        fn new(api: FakeApi) -> Self {
            Self::with_storage(api, MemoryStorage::new())
        }

        fn seeded(api: FakeApi, lines: Vec<CartItem>) -> Self {
            let blob = serde_json::to_string(&lines).unwrap();
            Self::with_storage(api, MemoryStorage::with_snapshot(blob))
        }

        fn with_storage(api: FakeApi, storage: MemoryStorage) -> Self {
            let api = Arc::new(api);
            let storage = Arc::new(storage);
            let notifier = Arc::new(RecordingNotifier::default());
            let store = CartStore::open(
                CartServices::new(api.clone(), storage.clone(), notifier.clone()),
                CurrencyCode::BRL,
            );
            Self {
                store,
                api,
                storage,
                notifier,
            }
        }

        fn persisted(&self) -> Option<Cart> {
            self.storage
                .snapshot()
                .map(|blob| serde_json::from_str(&blob).unwrap())
        }

        fn amounts(&self) -> Vec<(i32, u32)> {
            self.store
                .cart()
                .items()
                .iter()
                .map(|item| (item.id.as_i32(), item.amount))
                .collect()
        }
    }

    // =========================================================================
    // Add
    // =========================================================================

    #[tokio::test]
    async fn test_add_to_empty_cart_creates_line() {
        let h = Harness::new(FakeApi::default().with_product(1, 5));

        let outcome = h.store.add_product(ProductId::new(1)).await;

        assert!(outcome.is_committed());
        assert_eq!(h.amounts(), vec![(1, 1)]);
        let item = h.store.cart().get(ProductId::new(1)).cloned().unwrap();
        assert_eq!(item.title, "Tênis 1");
        assert_eq!(item.price, Price::from_cents(17990));
        assert_eq!(h.persisted(), Some(h.store.cart()));
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_add_existing_increments_without_refetching_product() {
        let h = Harness::new(FakeApi::default().with_product(1, 5));

        h.store.add_product(ProductId::new(1)).await;
        h.store.add_product(ProductId::new(1)).await;

        assert_eq!(h.amounts(), vec![(1, 2)]);
        assert_eq!(h.api.product_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.api.stock_calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.persisted(), Some(h.store.cart()));
    }

    #[tokio::test]
    async fn test_add_beyond_stock_is_rejected() {
        let h = Harness::seeded(FakeApi::default().with_product(1, 1), vec![line(1, 1)]);
        let before = h.storage.snapshot();

        let outcome = h.store.add_product(ProductId::new(1)).await;

        assert!(matches!(
            outcome.rejection(),
            Some(CartError::StockExceeded {
                requested: 2,
                available: 1,
                ..
            })
        ));
        assert_eq!(h.amounts(), vec![(1, 1)]);
        assert_eq!(h.storage.snapshot(), before);
        assert_eq!(h.notifier.notices(), vec![Notice::OutOfStock]);
    }

    #[tokio::test]
    async fn test_add_with_zero_stock_never_creates_line() {
        let h = Harness::new(FakeApi::default().with_product(1, 0));

        let outcome = h.store.add_product(ProductId::new(1)).await;

        assert!(!outcome.is_committed());
        assert!(h.store.cart().is_empty());
        assert_eq!(h.api.product_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.notifier.notices(), vec![Notice::OutOfStock]);
    }

    #[tokio::test]
    async fn test_add_when_stock_lookup_fails() {
        let h = Harness::new(FakeApi::default().with_product(1, 5));
        h.api.go_offline();

        let outcome = h.store.add_product(ProductId::new(1)).await;

        assert!(matches!(outcome.rejection(), Some(CartError::Transport(_))));
        assert!(h.store.cart().is_empty());
        assert!(h.storage.snapshot().is_none());
        assert_eq!(h.notifier.notices(), vec![Notice::AddFailed]);
    }

    #[tokio::test]
    async fn test_add_when_product_lookup_fails() {
        let h = Harness::new(
            FakeApi::default()
                .with_product(1, 5)
                .without_product_record(1),
        );

        let outcome = h.store.add_product(ProductId::new(1)).await;

        assert!(matches!(outcome.rejection(), Some(CartError::Transport(_))));
        assert!(h.store.cart().is_empty());
        assert!(h.storage.snapshot().is_none());
        assert_eq!(h.notifier.notices(), vec![Notice::AddFailed]);
    }

    #[tokio::test]
    async fn test_add_unknown_product_fails_at_stock_lookup() {
        let h = Harness::new(FakeApi::default());

        let outcome = h.store.add_product(ProductId::new(42)).await;

        assert!(!outcome.is_committed());
        assert_eq!(h.notifier.notices(), vec![Notice::AddFailed]);
    }

    #[tokio::test]
    async fn test_add_with_misrouted_stock_is_silent_noop() {
        let h = Harness::new(
            FakeApi::default()
                .with_product(1, 5)
                .with_misrouted_stock(1, 2, 5),
        );

        let outcome = h.store.add_product(ProductId::new(1)).await;

        assert!(matches!(
            outcome.rejection(),
            Some(CartError::IntegrityMismatch { .. })
        ));
        assert!(h.store.cart().is_empty());
        assert!(h.storage.snapshot().is_none());
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_add_with_misrouted_product_is_silent_noop() {
        let h = Harness::new(
            FakeApi::default()
                .with_product(1, 5)
                .with_misrouted_product(1, 2),
        );

        let outcome = h.store.add_product(ProductId::new(1)).await;

        assert!(matches!(
            outcome.rejection(),
            Some(CartError::IntegrityMismatch { requested, received })
                if *requested == ProductId::new(1) && *received == ProductId::new(2)
        ));
        assert!(h.store.cart().is_empty());
        assert!(h.storage.snapshot().is_none());
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_misrouted_stock_still_reports_out_of_stock_first() {
        let h = Harness::seeded(
            FakeApi::default()
                .with_product(1, 5)
                .with_misrouted_stock(1, 2, 1),
            vec![line(1, 1)],
        );

        h.store.add_product(ProductId::new(1)).await;

        assert_eq!(h.amounts(), vec![(1, 1)]);
        assert_eq!(h.notifier.notices(), vec![Notice::OutOfStock]);
    }

    // =========================================================================
    // Remove
    // =========================================================================

    #[tokio::test]
    async fn test_remove_existing_line() {
        let h = Harness::seeded(FakeApi::default(), vec![line(2, 3)]);

        let outcome = h.store.remove_product(ProductId::new(2)).await;

        assert!(outcome.is_committed());
        assert!(h.store.cart().is_empty());
        assert_eq!(h.persisted(), Some(Cart::empty()));
        assert_eq!(h.api.stock_calls.load(Ordering::SeqCst), 0);
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_remove_keeps_other_lines_in_order() {
        let h = Harness::seeded(
            FakeApi::default(),
            vec![line(1, 1), line(2, 2), line(3, 3)],
        );

        h.store.remove_product(ProductId::new(2)).await;

        assert_eq!(h.amounts(), vec![(1, 1), (3, 3)]);
    }

    #[tokio::test]
    async fn test_remove_missing_line_notifies_once() {
        let h = Harness::new(FakeApi::default());

        let outcome = h.store.remove_product(ProductId::new(99)).await;

        assert!(matches!(outcome.rejection(), Some(CartError::NotFound(_))));
        assert!(h.store.cart().is_empty());
        assert!(h.storage.snapshot().is_none());
        assert_eq!(h.notifier.notices(), vec![Notice::RemoveFailed]);
    }

    // =========================================================================
    // Update
    // =========================================================================

    #[tokio::test]
    async fn test_update_sets_absolute_amount() {
        let h = Harness::seeded(FakeApi::default().with_product(1, 5), vec![line(1, 1)]);

        let outcome = h.store.update_product_amount(ProductId::new(1), 4).await;

        assert!(outcome.is_committed());
        assert_eq!(h.amounts(), vec![(1, 4)]);
        assert_eq!(h.persisted(), Some(h.store.cart()));
    }

    #[tokio::test]
    async fn test_update_to_zero_is_silent_noop() {
        let h = Harness::seeded(FakeApi::default().with_product(1, 5), vec![line(1, 2)]);
        let before = h.storage.snapshot();

        let outcome = h.store.update_product_amount(ProductId::new(1), 0).await;

        assert!(matches!(
            outcome.rejection(),
            Some(CartError::InvalidAmount(0))
        ));
        assert_eq!(h.amounts(), vec![(1, 2)]);
        assert_eq!(h.storage.snapshot(), before);
        assert_eq!(h.api.stock_calls.load(Ordering::SeqCst), 0);
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_update_beyond_stock_is_rejected() {
        let h = Harness::seeded(FakeApi::default().with_product(1, 3), vec![line(1, 1)]);

        let outcome = h.store.update_product_amount(ProductId::new(1), 4).await;

        assert!(!outcome.is_committed());
        assert_eq!(h.amounts(), vec![(1, 1)]);
        assert_eq!(h.notifier.notices(), vec![Notice::OutOfStock]);
    }

    #[tokio::test]
    async fn test_update_missing_line_is_rejected() {
        let h = Harness::new(FakeApi::default().with_product(1, 5));

        let outcome = h.store.update_product_amount(ProductId::new(1), 2).await;

        assert!(matches!(outcome.rejection(), Some(CartError::NotFound(_))));
        assert!(h.store.cart().is_empty());
        assert!(h.storage.snapshot().is_none());
        assert_eq!(h.notifier.notices(), vec![Notice::UpdateFailed]);
    }

    #[tokio::test]
    async fn test_update_when_stock_lookup_fails() {
        let h = Harness::seeded(FakeApi::default().with_product(1, 5), vec![line(1, 1)]);
        h.api.go_offline();

        let outcome = h.store.update_product_amount(ProductId::new(1), 2).await;

        assert!(matches!(outcome.rejection(), Some(CartError::Transport(_))));
        assert_eq!(h.amounts(), vec![(1, 1)]);
        assert_eq!(h.notifier.notices(), vec![Notice::UpdateFailed]);
    }

    #[tokio::test]
    async fn test_update_uses_fresh_stock_each_time() {
        let h = Harness::seeded(FakeApi::default().with_product(1, 5), vec![line(1, 1)]);

        assert!(
            h.store
                .update_product_amount(ProductId::new(1), 5)
                .await
                .is_committed()
        );

        h.api.set_stock(1, 2);
        assert!(
            !h.store
                .update_product_amount(ProductId::new(1), 3)
                .await
                .is_committed()
        );
        assert_eq!(h.amounts(), vec![(1, 5)]);
    }

    // =========================================================================
    // Bootstrap and persistence
    // =========================================================================

    #[tokio::test]
    async fn test_open_restores_snapshot() {
        let h = Harness::seeded(FakeApi::default(), vec![line(1, 2), line(3, 1)]);

        assert_eq!(h.amounts(), vec![(1, 2), (3, 1)]);
        assert_eq!(h.store.amount_of(ProductId::new(1)), Some(2));
        assert_eq!(h.store.amount_of(ProductId::new(2)), None);
    }

    #[tokio::test]
    async fn test_open_ignores_corrupt_snapshot() {
        let h = Harness::with_storage(
            FakeApi::default(),
            MemoryStorage::with_snapshot("{not json"),
        );

        assert!(h.store.cart().is_empty());
        // Left alone until the next commit overwrites it
        assert_eq!(h.storage.snapshot().as_deref(), Some("{not json"));
    }

    #[tokio::test]
    async fn test_open_sanitizes_and_rewrites_snapshot() {
        let h = Harness::seeded(
            FakeApi::default(),
            vec![line(1, 2), line(2, 0), line(1, 7)],
        );

        assert_eq!(h.amounts(), vec![(1, 2)]);
        assert_eq!(h.persisted(), Some(h.store.cart()));
    }

    #[tokio::test]
    async fn test_persistence_failure_still_commits_in_memory() {
        let api = Arc::new(FakeApi::default().with_product(1, 5));
        let notifier = Arc::new(RecordingNotifier::default());
        let store = CartStore::open(
            CartServices::new(api, Arc::new(FailingStorage), notifier.clone()),
            CurrencyCode::BRL,
        );

        let outcome = store.add_product(ProductId::new(1)).await;

        assert!(outcome.is_committed());
        assert_eq!(store.amount_of(ProductId::new(1)), Some(1));
        assert!(notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_operation_sequence_keeps_lines_unique_and_snapshot_in_sync() {
        let h = Harness::new(
            FakeApi::default()
                .with_product(1, 3)
                .with_product(2, 1)
                .with_product(3, 10),
        );

        let p = ProductId::new;
        for step in 0..12 {
            match step % 6 {
                0 => h.store.add_product(p(1)).await,
                1 => h.store.add_product(p(2)).await,
                2 => h.store.update_product_amount(p(3), 4).await,
                3 => h.store.add_product(p(3)).await,
                4 => h.store.update_product_amount(p(1), 2).await,
                _ => h.store.remove_product(p(2)).await,
            };

            let cart = h.store.cart();
            let mut ids: Vec<i32> = cart.items().iter().map(|i| i.id.as_i32()).collect();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(ids.len(), cart.len(), "duplicate line after step {step}");
            assert!(cart.items().iter().all(|i| i.amount >= 1));
            if let Some(persisted) = h.persisted() {
                assert_eq!(persisted, cart, "snapshot out of sync after step {step}");
            }
        }

        assert!(h.store.amount_of(p(1)).unwrap() <= 3);
        assert!(h.store.amount_of(p(3)).unwrap() <= 10);
    }

    // =========================================================================
    // Concurrency
    // =========================================================================

    #[tokio::test]
    async fn test_concurrent_adds_of_same_product_respect_stock() {
        let h = Harness::new(FakeApi::default().with_product(1, 3));
        let id = ProductId::new(1);

        let (a, b, c, d, e) = tokio::join!(
            h.store.add_product(id),
            h.store.add_product(id),
            h.store.add_product(id),
            h.store.add_product(id),
            h.store.add_product(id),
        );

        let committed = [a, b, c, d, e]
            .iter()
            .filter(|outcome| outcome.is_committed())
            .count();
        assert_eq!(committed, 3);
        assert_eq!(h.amounts(), vec![(1, 3)]);
        assert_eq!(
            h.notifier.notices(),
            vec![Notice::OutOfStock, Notice::OutOfStock]
        );
        assert_eq!(h.persisted(), Some(h.store.cart()));
    }

    #[tokio::test]
    async fn test_concurrent_adds_of_different_products_both_survive() {
        let h = Harness::new(FakeApi::default().with_product(1, 5).with_product(2, 5));

        let (a, b) = tokio::join!(
            h.store.add_product(ProductId::new(1)),
            h.store.add_product(ProductId::new(2)),
        );

        assert!(a.is_committed() && b.is_committed());
        let mut amounts = h.amounts();
        amounts.sort_unstable();
        assert_eq!(amounts, vec![(1, 1), (2, 1)]);
        assert_eq!(h.persisted(), Some(h.store.cart()));
    }

    #[tokio::test]
    async fn test_product_locks_are_released_after_operations() {
        let h = Harness::new(FakeApi::default().with_product(1, 2).with_product(2, 5));

        let _ = tokio::join!(
            h.store.add_product(ProductId::new(1)),
            h.store.add_product(ProductId::new(1)),
            h.store.add_product(ProductId::new(1)),
            h.store.add_product(ProductId::new(2)),
            h.store.update_product_amount(ProductId::new(2), 0),
            h.store.remove_product(ProductId::new(3)),
        );

        assert_eq!(h.store.inner.locks.len(), 0);
        assert_eq!(h.store.amount_of(ProductId::new(1)), Some(2));
    }

    #[tokio::test]
    async fn test_clones_share_the_cart() {
        let h = Harness::new(FakeApi::default().with_product(1, 5));
        let other = h.store.clone();

        other.add_product(ProductId::new(1)).await;

        assert_eq!(h.store.amount_of(ProductId::new(1)), Some(1));
    }

    #[tokio::test]
    async fn test_summary_formats_in_store_currency() {
        let h = Harness::seeded(FakeApi::default(), vec![line(1, 2)]);

        let summary = h.store.summary();

        assert_eq!(summary.total_quantity, 2);
        assert_eq!(summary.subtotal, "R$ 359,80");
    }
}
