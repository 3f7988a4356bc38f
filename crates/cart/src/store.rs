//! Persistent cart store.
//!
//! Owns the durable cart record and the in-memory working copy. Mutations
//! are read-modify-write under a single lock, so no partial state is ever
//! observable within a tab. Writes from other tabs arrive through
//! [`LocalCartStore::apply_foreign_write`] and are broadcast to subscribers
//! tagged with their origin, so same-tab writes never re-trigger a
//! storage-read render pass.
//!
//! Failure semantics: an unreadable record resets to an empty cart; an
//! unwritable medium flips the store into memory-only operation for the
//! session (logged once, never surfaced to callers).

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use sugarloaf_core::VariantId;

use crate::config::{CART_SCHEMA_VERSION, CartConfig};
use crate::storage::KeyValueStorage;
use crate::types::{CacheEnvelope, CartItem, LocalCart, StockValidationResult};

/// Broadcast event channel depth. Slow subscribers observe `Lagged` and
/// re-read the cart rather than replaying every missed event.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Where a cart change originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// A mutation performed by this tab.
    Local,
    /// A durable-storage write observed from another tab.
    Foreign,
}

/// A cart change notification.
#[derive(Debug, Clone)]
pub struct CartEvent {
    /// Whether this tab or a foreign tab caused the change.
    pub origin: EventOrigin,
    /// Identifier of the tab that owns this store instance.
    pub tab_id: Uuid,
    /// The cart after the change.
    pub cart: LocalCart,
}

struct StoreState {
    cart: LocalCart,
    /// Set after the first failed write; the store is memory-only from then on.
    degraded: bool,
}

/// Durable store for the local cart.
pub struct LocalCartStore {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
    tab_id: Uuid,
    state: Mutex<StoreState>,
    events: broadcast::Sender<CartEvent>,
}

impl LocalCartStore {
    /// Open the store, loading any persisted cart.
    ///
    /// Never fails: a missing, corrupt, or version-mismatched record yields
    /// an empty cart (the corrupt record is deleted outright), and an
    /// unreadable medium starts the session in memory-only mode.
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>, config: &CartConfig) -> Self {
        let (cart, degraded) = Self::load_initial(storage.as_ref(), config);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            storage,
            key: config.cart_storage_key.clone(),
            tab_id: Uuid::new_v4(),
            state: Mutex::new(StoreState { cart, degraded }),
            events,
        }
    }

    fn load_initial(storage: &dyn KeyValueStorage, config: &CartConfig) -> (LocalCart, bool) {
        match storage.get(&config.cart_storage_key) {
            Ok(Some(raw)) => {
                match CacheEnvelope::<LocalCart>::decode(&raw, CART_SCHEMA_VERSION) {
                    Ok(envelope) => {
                        let mut cart = envelope.payload;
                        // Derived fields are never stored truth
                        cart.recompute_totals();
                        (cart, false)
                    }
                    Err(e) => {
                        warn!(error = %e, "Stored cart failed validation, resetting");
                        if let Err(e) = storage.remove(&config.cart_storage_key) {
                            warn!(error = %e, "Failed to delete corrupt cart record");
                        }
                        (LocalCart::empty(config.currency_code), false)
                    }
                }
            }
            Ok(None) => (LocalCart::empty(config.currency_code), false),
            Err(e) => {
                warn!(error = %e, "Cart storage unavailable, running memory-only");
                (LocalCart::empty(config.currency_code), true)
            }
        }
    }

    /// Identifier of the tab that owns this store instance.
    #[must_use]
    pub const fn tab_id(&self) -> Uuid {
        self.tab_id
    }

    /// Snapshot of the current cart.
    #[must_use]
    pub fn cart(&self) -> LocalCart {
        self.lock_state().cart.clone()
    }

    /// Subscribe to cart change events (local and foreign).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CartEvent> {
        self.events.subscribe()
    }

    /// Add an item, summing quantities when the variant is already present.
    ///
    /// `available` is the best current stock knowledge (from the
    /// reconciliation engine); `None` means no authority is available and the
    /// request is accepted unverified.
    pub fn add_item(
        &self,
        item: CartItem,
        available: Option<i64>,
    ) -> (LocalCart, StockValidationResult) {
        let mut state = self.lock_state();
        let existing = state
            .cart
            .line(&item.product_variant_id)
            .map_or(0, |line| line.quantity);
        let requested = existing.saturating_add(item.quantity);

        let (granted, result) = Self::grant(requested, available);
        if granted > 0 {
            if let Some(line) = state
                .cart
                .items
                .iter_mut()
                .find(|line| line.product_variant_id == item.product_variant_id)
            {
                line.quantity = granted;
            } else {
                let mut line = item;
                line.quantity = granted;
                state.cart.items.push(line);
            }
        }
        state.cart.recompute_totals();
        self.persist(&mut state);
        let cart = state.cart.clone();
        drop(state);
        self.emit(EventOrigin::Local, cart.clone());
        (cart, result)
    }

    /// Set a line's quantity. Zero removes the line; over-stock clamps.
    pub fn update_item_quantity(
        &self,
        variant_id: &VariantId,
        quantity: u32,
        available: Option<i64>,
    ) -> (LocalCart, StockValidationResult) {
        let mut state = self.lock_state();
        if state.cart.line(variant_id).is_none() {
            let cart = state.cart.clone();
            drop(state);
            return (
                cart,
                StockValidationResult {
                    success: false,
                    available_stock: None,
                    error: Some("Item is not in the cart".to_string()),
                },
            );
        }

        let result = if quantity == 0 {
            state
                .cart
                .items
                .retain(|line| &line.product_variant_id != variant_id);
            StockValidationResult::ok()
        } else {
            let (granted, result) = Self::grant(quantity, available);
            if granted == 0 {
                // Zero stock: the line stays as-is, the only remedy is removal
                let cart = state.cart.clone();
                drop(state);
                return (cart, result);
            }
            if let Some(line) = state
                .cart
                .items
                .iter_mut()
                .find(|line| &line.product_variant_id == variant_id)
            {
                line.quantity = granted;
            }
            result
        };

        state.cart.recompute_totals();
        self.persist(&mut state);
        let cart = state.cart.clone();
        drop(state);
        self.emit(EventOrigin::Local, cart.clone());
        (cart, result)
    }

    /// Remove a line. Removing an absent line is a no-op.
    pub fn remove_item(&self, variant_id: &VariantId) -> LocalCart {
        let mut state = self.lock_state();
        let before = state.cart.items.len();
        state
            .cart
            .items
            .retain(|line| &line.product_variant_id != variant_id);
        if state.cart.items.len() == before {
            let cart = state.cart.clone();
            drop(state);
            return cart;
        }
        state.cart.recompute_totals();
        self.persist(&mut state);
        let cart = state.cart.clone();
        drop(state);
        self.emit(EventOrigin::Local, cart.clone());
        cart
    }

    /// Reset to an empty cart.
    pub fn clear(&self) -> LocalCart {
        let mut state = self.lock_state();
        state.cart = LocalCart::empty(state.cart.currency_code);
        self.persist(&mut state);
        let cart = state.cart.clone();
        drop(state);
        self.emit(EventOrigin::Local, cart.clone());
        cart
    }

    /// Reconcile a durable-storage write made by another tab.
    ///
    /// Replaces the in-memory cart and broadcasts a `Foreign`-origin event.
    /// Never re-persists (the foreign tab already owns the durable write), so
    /// no feedback loop between tabs is possible. A payload that fails
    /// validation is ignored: this tab's own state stays authoritative until
    /// its next read.
    pub fn apply_foreign_write(&self, raw: &str) {
        match CacheEnvelope::<LocalCart>::decode(raw, CART_SCHEMA_VERSION) {
            Ok(envelope) => {
                let mut cart = envelope.payload;
                cart.recompute_totals();
                {
                    let mut state = self.lock_state();
                    state.cart = cart.clone();
                }
                debug!(lines = cart.items.len(), "Applied foreign cart write");
                self.emit(EventOrigin::Foreign, cart);
            }
            Err(e) => {
                warn!(error = %e, "Ignoring invalid foreign cart write");
            }
        }
    }

    /// Clamp a requested quantity against the best stock knowledge.
    fn grant(requested: u32, available: Option<i64>) -> (u32, StockValidationResult) {
        match available {
            Some(stock) if stock <= 0 => (0, StockValidationResult::out_of_stock()),
            Some(stock) => {
                let stock_u32 = u32::try_from(stock).unwrap_or(u32::MAX);
                if requested > stock_u32 {
                    (stock_u32, StockValidationResult::clamped(stock))
                } else {
                    (requested, StockValidationResult::ok())
                }
            }
            None => (requested, StockValidationResult::unverified()),
        }
    }

    fn persist(&self, state: &mut MutexGuard<'_, StoreState>) {
        if state.degraded {
            return;
        }
        let envelope = CacheEnvelope::now(CART_SCHEMA_VERSION, state.cart.clone());
        let write = envelope
            .encode()
            .map_err(|e| crate::error::StorageError::Unavailable(e.to_string()))
            .and_then(|raw| self.storage.set(&self.key, &raw));
        if let Err(e) = write {
            // Logged once; subsequent mutations stay memory-only
            warn!(error = %e, "Cart write failed, degrading to memory-only");
            state.degraded = true;
        }
    }

    fn emit(&self, origin: EventOrigin, cart: LocalCart) {
        // No receivers is fine; events are best-effort notifications
        let _ = self.events.send(CartEvent {
            origin,
            tab_id: self.tab_id,
            cart,
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        // A poisoned lock only means another thread panicked mid-mutation;
        // the cart itself is still structurally valid
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, UnavailableStorage};
    use crate::types::{StockLevel, VariantSnapshot};
    use sugarloaf_core::ProductId;

    fn item(id: &str, quantity: u32, price: i64) -> CartItem {
        CartItem {
            product_variant_id: VariantId::new(id),
            quantity,
            product_variant: VariantSnapshot {
                id: VariantId::new(id),
                name: format!("Variant {id}"),
                price,
                stock_level: StockLevel::Quantity(10),
                product_id: ProductId::new("P_1"),
                product_slug: "classic-tee".to_string(),
                options: vec![],
                featured_asset: None,
            },
        }
    }

    fn store() -> (Arc<MemoryStorage>, LocalCartStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = LocalCartStore::new(storage.clone(), &CartConfig::default());
        (storage, store)
    }

    #[test]
    fn test_add_item_new_line() {
        let (_, store) = store();
        let (cart, result) = store.add_item(item("V_1", 3, 1000), Some(5));
        assert!(result.success);
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.total_quantity, 3);
        assert_eq!(cart.sub_total, 3000);
    }

    #[test]
    fn test_add_same_variant_sums_quantities() {
        let (_, store) = store();
        store.add_item(item("V_1", 2, 1000), Some(10));
        let (cart, result) = store.add_item(item("V_1", 3, 1000), Some(10));
        assert!(result.success);
        assert_eq!(cart.items.len(), 1, "no duplicate lines per variant");
        assert_eq!(cart.line(&VariantId::new("V_1")).unwrap().quantity, 5);
    }

    #[test]
    fn test_add_clamps_to_available() {
        let (_, store) = store();
        let (cart, result) = store.add_item(item("V_1", 8, 1000), Some(5));
        assert!(!result.success);
        assert_eq!(result.available_stock, Some(5));
        assert_eq!(cart.line(&VariantId::new("V_1")).unwrap().quantity, 5);
    }

    #[test]
    fn test_add_zero_stock_adds_nothing() {
        let (_, store) = store();
        let (cart, result) = store.add_item(item("V_1", 1, 1000), Some(0));
        assert!(!result.success);
        assert_eq!(result.available_stock, Some(0));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_add_without_stock_knowledge_is_unverified() {
        let (_, store) = store();
        let (cart, result) = store.add_item(item("V_1", 2, 1000), None);
        assert!(result.success);
        assert!(result.error.is_some());
        assert_eq!(cart.total_quantity, 2);
    }

    #[test]
    fn test_update_quantity_clamps() {
        let (_, store) = store();
        store.add_item(item("V_1", 3, 1000), Some(5));
        let (cart, result) = store.update_item_quantity(&VariantId::new("V_1"), 10, Some(5));
        assert!(!result.success);
        assert_eq!(result.available_stock, Some(5));
        assert_eq!(cart.line(&VariantId::new("V_1")).unwrap().quantity, 5);
    }

    #[test]
    fn test_update_to_zero_removes_line() {
        let (_, store) = store();
        store.add_item(item("V_1", 3, 1000), Some(5));
        let (cart, result) = store.update_item_quantity(&VariantId::new("V_1"), 0, Some(5));
        assert!(result.success);
        assert!(cart.is_empty());
        assert_eq!(cart.total_quantity, 0);
        assert_eq!(cart.sub_total, 0);
    }

    #[test]
    fn test_update_with_zero_stock_leaves_line() {
        let (_, store) = store();
        store.add_item(item("V_1", 2, 1000), Some(5));
        let (cart, result) = store.update_item_quantity(&VariantId::new("V_1"), 4, Some(0));
        assert!(!result.success);
        assert_eq!(result.available_stock, Some(0));
        // Line untouched; the only offered remedy is removal
        assert_eq!(cart.line(&VariantId::new("V_1")).unwrap().quantity, 2);
    }

    #[test]
    fn test_update_missing_line() {
        let (_, store) = store();
        let (cart, result) = store.update_item_quantity(&VariantId::new("V_9"), 2, Some(5));
        assert!(!result.success);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (_, store) = store();
        store.add_item(item("V_1", 1, 500), Some(5));
        let after_once = store.remove_item(&VariantId::new("V_1"));
        let after_twice = store.remove_item(&VariantId::new("V_1"));
        assert_eq!(after_once, after_twice);
        assert!(after_twice.is_empty());
    }

    #[test]
    fn test_persists_and_reloads() {
        let (storage, store) = store();
        store.add_item(item("V_1", 2, 1999), Some(5));
        drop(store);

        let reopened = LocalCartStore::new(storage, &CartConfig::default());
        let cart = reopened.cart();
        assert_eq!(cart.total_quantity, 2);
        assert_eq!(cart.sub_total, 3998);
    }

    #[test]
    fn test_corrupt_record_resets_to_empty() {
        let storage = Arc::new(MemoryStorage::new());
        let config = CartConfig::default();
        storage.set(&config.cart_storage_key, "{definitely not a cart").unwrap();

        let store = LocalCartStore::new(storage.clone(), &config);
        assert!(store.cart().is_empty());
        // Full invalidation, not a partial patch
        assert_eq!(storage.get(&config.cart_storage_key).unwrap(), None);
    }

    #[test]
    fn test_version_mismatch_resets_to_empty() {
        let storage = Arc::new(MemoryStorage::new());
        let config = CartConfig::default();
        let stale = CacheEnvelope::now(CART_SCHEMA_VERSION - 1, LocalCart::default());
        storage
            .set(&config.cart_storage_key, &stale.encode().unwrap())
            .unwrap();

        let store = LocalCartStore::new(storage, &config);
        assert!(store.cart().is_empty());
    }

    #[test]
    fn test_unavailable_storage_degrades_to_memory() {
        let store = LocalCartStore::new(Arc::new(UnavailableStorage), &CartConfig::default());
        let (cart, result) = store.add_item(item("V_1", 2, 1000), Some(5));
        assert!(result.success);
        assert_eq!(cart.total_quantity, 2, "mutations keep working in memory");
    }

    #[test]
    fn test_local_mutation_emits_local_event() {
        let (_, store) = store();
        let mut events = store.subscribe();
        store.add_item(item("V_1", 1, 500), Some(5));

        let event = events.try_recv().unwrap();
        assert_eq!(event.origin, EventOrigin::Local);
        assert_eq!(event.tab_id, store.tab_id());
        assert_eq!(event.cart.total_quantity, 1);
    }

    #[test]
    fn test_foreign_write_replaces_cart_without_persisting() {
        let (storage, store) = store();
        store.add_item(item("V_1", 1, 500), Some(5));
        let persisted_before = storage.get("sugarloaf.cart").unwrap();

        // Another tab removed V_1 and wrote an empty cart
        let foreign = CacheEnvelope::now(CART_SCHEMA_VERSION, LocalCart::default());
        let mut events = store.subscribe();
        store.apply_foreign_write(&foreign.encode().unwrap());

        assert!(store.cart().is_empty(), "reflects the foreign removal");
        let event = events.try_recv().unwrap();
        assert_eq!(event.origin, EventOrigin::Foreign);
        // The foreign tab owns the durable write; we did not re-persist
        assert_eq!(storage.get("sugarloaf.cart").unwrap(), persisted_before);
    }

    #[test]
    fn test_invalid_foreign_write_is_ignored() {
        let (_, store) = store();
        store.add_item(item("V_1", 1, 500), Some(5));
        store.apply_foreign_write("garbage");
        assert_eq!(store.cart().total_quantity, 1);
    }
}
