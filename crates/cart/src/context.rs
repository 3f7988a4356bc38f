//! The cart mutation surface.
//!
//! [`CartContext`] is the single entry point UI code talks to. It composes
//! the persistent store, the stock reconciliation engine, and the coupon
//! validator, and holds the ephemeral per-session state (applied coupon,
//! per-variant stock results, the order pending payment).
//!
//! Mutations are serialized by an async lock so a stock lookup and the store
//! write it informs are never interleaved with another mutation.
//!
//! The resilience rule lives here: [`CartContext::convert_to_order`] never
//! clears the cart. Only a settled payment does.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

use sugarloaf_core::{CustomerId, Money, VariantId};

use crate::backend::{CommerceBackend, OrderHandle, OrderLineInput, PaymentOutcome};
use crate::config::CartConfig;
use crate::coupon::CouponValidator;
use crate::error::CartError;
use crate::reconcile::StockReconciler;
use crate::storage::KeyValueStorage;
use crate::store::{CartEvent, LocalCartStore};
use crate::types::{AppliedCoupon, CartItem, CouponValidationResult, LocalCart, StockValidationResult};

/// Result of a stock-affecting cart mutation.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// The cart after the mutation.
    pub cart: LocalCart,
    /// How the requested quantity was resolved against stock.
    pub stock_result: StockValidationResult,
}

struct ContextState {
    applied_coupon: Option<AppliedCoupon>,
    stock_results: HashMap<VariantId, StockValidationResult>,
    pending_order: Option<OrderHandle>,
    customer_id: Option<CustomerId>,
}

/// Facade over the cart subsystem: store, reconciliation, coupons, checkout.
pub struct CartContext<B> {
    store: Arc<LocalCartStore>,
    reconciler: StockReconciler<B>,
    coupons: CouponValidator<B>,
    backend: Arc<B>,
    state: Mutex<ContextState>,
    // One mutation at a time: the availability lookup and the store write it
    // informs must not interleave with another mutation
    mutation_lock: tokio::sync::Mutex<()>,
}

impl<B: CommerceBackend> CartContext<B> {
    /// Build the context, restoring any persisted cart.
    #[must_use]
    pub fn new(backend: Arc<B>, storage: Arc<dyn KeyValueStorage>, config: &CartConfig) -> Self {
        Self {
            store: Arc::new(LocalCartStore::new(storage, config)),
            reconciler: StockReconciler::new(Arc::clone(&backend), config),
            coupons: CouponValidator::new(Arc::clone(&backend)),
            backend,
            state: Mutex::new(ContextState {
                applied_coupon: None,
                stock_results: HashMap::new(),
                pending_order: None,
                customer_id: None,
            }),
            mutation_lock: tokio::sync::Mutex::new(()),
        }
    }

    // =========================================================================
    // Cart mutations
    // =========================================================================

    /// Add an item to the cart, clamping against the best stock knowledge.
    ///
    /// The line's captured stock snapshot serves as the fallback when neither
    /// the cache nor the backend can answer; a fully unknown variant is
    /// accepted unverified rather than granted against infinite stock.
    #[instrument(skip(self, item), fields(variant = %item.product_variant_id, quantity = item.quantity))]
    pub async fn add_to_cart(&self, item: CartItem) -> MutationOutcome {
        let _guard = self.mutation_lock.lock().await;
        let variant_id = item.product_variant_id.clone();
        let fallback = item.product_variant.stock_level.as_quantity();
        let availability = self.reconciler.availability(&variant_id, fallback).await;

        let (cart, stock_result) = self.store.add_item(item, availability.known());
        self.lock_state()
            .stock_results
            .insert(variant_id, stock_result.clone());
        self.revalidate_coupon(&cart).await;
        MutationOutcome { cart, stock_result }
    }

    /// Set a line's quantity. Zero removes the line; over-stock clamps.
    #[instrument(skip(self), fields(variant = %variant_id, quantity))]
    pub async fn update_quantity(&self, variant_id: &VariantId, quantity: u32) -> MutationOutcome {
        let _guard = self.mutation_lock.lock().await;
        let fallback = self
            .store
            .cart()
            .line(variant_id)
            .and_then(|line| line.product_variant.stock_level.as_quantity());
        let availability = self.reconciler.availability(variant_id, fallback).await;

        let (cart, stock_result) =
            self.store
                .update_item_quantity(variant_id, quantity, availability.known());
        self.lock_state()
            .stock_results
            .insert(variant_id.clone(), stock_result.clone());
        self.revalidate_coupon(&cart).await;
        MutationOutcome { cart, stock_result }
    }

    /// Remove a line. Removing an absent line is a no-op.
    #[instrument(skip(self), fields(variant = %variant_id))]
    pub async fn remove_item(&self, variant_id: &VariantId) -> LocalCart {
        let _guard = self.mutation_lock.lock().await;
        let cart = self.store.remove_item(variant_id);
        self.lock_state().stock_results.remove(variant_id);
        self.revalidate_coupon(&cart).await;
        cart
    }

    /// Empty the cart and drop the applied coupon and stock results.
    pub async fn clear(&self) -> LocalCart {
        let _guard = self.mutation_lock.lock().await;
        let cart = self.store.clear();
        let mut state = self.lock_state();
        state.applied_coupon = None;
        state.stock_results.clear();
        cart
    }

    // =========================================================================
    // Coupons
    // =========================================================================

    /// Validate a coupon code and apply it to the cart when it passes.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::Backend`] when validation could not be completed;
    /// any previously applied coupon is left in place.
    pub async fn apply_coupon(&self, code: &str) -> Result<CouponValidationResult, CartError> {
        let cart = self.store.cart();
        let customer_id = self.lock_state().customer_id.clone();
        let result = self
            .coupons
            .validate(
                code,
                Money::new(cart.sub_total, cart.currency_code),
                &cart.items,
                customer_id.as_ref(),
            )
            .await?;
        if result.is_valid {
            self.lock_state().applied_coupon.clone_from(&result.coupon);
        }
        Ok(result)
    }

    /// Drop the applied coupon, if any.
    pub fn remove_coupon(&self) {
        self.lock_state().applied_coupon = None;
    }

    /// The coupon currently applied, if any.
    #[must_use]
    pub fn applied_coupon(&self) -> Option<AppliedCoupon> {
        self.lock_state().applied_coupon.clone()
    }

    /// Cart total after the applied discount, in minor units.
    #[must_use]
    pub fn discounted_total(&self) -> i64 {
        let sub_total = self.store.cart().sub_total;
        let discount = self
            .lock_state()
            .applied_coupon
            .as_ref()
            .map_or(0, |c| c.discount_amount);
        (sub_total - discount).max(0)
    }

    /// Re-run validation for the applied coupon after a cart change.
    ///
    /// An invalid outcome drops the coupon; a backend failure keeps it (the
    /// next mutation or checkout retries).
    async fn revalidate_coupon(&self, cart: &LocalCart) {
        let (code, customer_id) = {
            let state = self.lock_state();
            let Some(coupon) = &state.applied_coupon else {
                return;
            };
            (coupon.code.clone(), state.customer_id.clone())
        };

        match self
            .coupons
            .validate(
                &code,
                Money::new(cart.sub_total, cart.currency_code),
                &cart.items,
                customer_id.as_ref(),
            )
            .await
        {
            Ok(result) if result.is_valid => {
                // Discount follows the new totals
                self.lock_state().applied_coupon.clone_from(&result.coupon);
            }
            Ok(result) => {
                warn!(
                    code = %code,
                    reasons = ?result.validation_errors,
                    "Applied coupon no longer valid, removing"
                );
                self.lock_state().applied_coupon = None;
            }
            Err(e) => {
                warn!(code = %code, error = %e, "Coupon revalidation failed, keeping coupon");
            }
        }
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Convert the cart into a backend order.
    ///
    /// Runs a forced-fresh stock validation first; any shortfall aborts with
    /// per-line messages and no order is created. On success the cart is
    /// deliberately NOT cleared: it survives until payment settles, so a
    /// failed or abandoned payment loses nothing.
    ///
    /// # Errors
    ///
    /// [`CartError::EmptyCart`] for an empty cart,
    /// [`CartError::StockValidation`] when a line cannot be fulfilled, and
    /// [`CartError::Backend`] when the backend is unreachable. All of them
    /// leave the cart unchanged.
    #[instrument(skip(self))]
    pub async fn convert_to_order(&self) -> Result<OrderHandle, CartError> {
        let _guard = self.mutation_lock.lock().await;
        let cart = self.store.cart();
        if cart.is_empty() {
            return Err(CartError::EmptyCart);
        }

        let report = self.reconciler.validate_stock(&cart).await?;
        if !report.valid {
            return Err(CartError::StockValidation(report.errors));
        }

        let lines: Vec<OrderLineInput> = cart
            .items
            .iter()
            .map(|item| OrderLineInput {
                product_variant_id: item.product_variant_id.clone(),
                quantity: item.quantity,
            })
            .collect();
        let coupon_code = self
            .lock_state()
            .applied_coupon
            .as_ref()
            .map(|c| c.code.clone());

        let order = self
            .backend
            .create_order(&lines, coupon_code.as_deref())
            .await?;
        debug!(order_code = %order.code, "Order created, cart retained until payment settles");
        self.lock_state().pending_order = Some(order.clone());
        Ok(order)
    }

    /// Attempt payment for the pending order.
    ///
    /// A settled payment clears the cart, the coupon, and the pending order.
    /// A declined payment preserves all of them so the shopper can retry.
    ///
    /// # Errors
    ///
    /// [`CartError::NoPendingOrder`] when no conversion happened first, and
    /// [`CartError::Backend`] when the payment call itself fails (the order
    /// stays pending).
    #[instrument(skip(self))]
    pub async fn take_payment(&self) -> Result<PaymentOutcome, CartError> {
        let order = self
            .lock_state()
            .pending_order
            .clone()
            .ok_or(CartError::NoPendingOrder)?;

        let outcome = self.backend.create_payment(&order).await?;
        self.on_payment_outcome(&outcome);
        Ok(outcome)
    }

    /// Apply a payment outcome reported by an external payment flow.
    ///
    /// Hosts that drive payment outside [`CartContext::take_payment`] (e.g.,
    /// a redirect-based provider) feed the terminal outcome through here.
    pub fn on_payment_outcome(&self, outcome: &PaymentOutcome) {
        match outcome {
            PaymentOutcome::Settled => {
                self.store.clear();
                let mut state = self.lock_state();
                state.applied_coupon = None;
                state.stock_results.clear();
                state.pending_order = None;
            }
            PaymentOutcome::Declined(reason) => {
                warn!(reason = %reason, "Payment declined, cart preserved");
            }
        }
    }

    /// The order awaiting payment, if a conversion happened.
    #[must_use]
    pub fn pending_order(&self) -> Option<OrderHandle> {
        self.lock_state().pending_order.clone()
    }

    // =========================================================================
    // Session & observation
    // =========================================================================

    /// Set or clear the signed-in customer used for coupon conditions.
    pub fn set_customer(&self, customer_id: Option<CustomerId>) {
        self.lock_state().customer_id = customer_id;
    }

    /// Reconcile a durable-storage write made by another tab, then re-check
    /// the applied coupon against the new contents.
    pub async fn handle_foreign_update(&self, raw: &str) {
        self.store.apply_foreign_write(raw);
        let cart = self.store.cart();
        self.revalidate_coupon(&cart).await;
    }

    /// Snapshot of the current cart.
    #[must_use]
    pub fn cart(&self) -> LocalCart {
        self.store.cart()
    }

    /// Outcome of the last stock-affecting mutation for a variant.
    #[must_use]
    pub fn stock_result(&self, variant_id: &VariantId) -> Option<StockValidationResult> {
        self.lock_state().stock_results.get(variant_id).cloned()
    }

    /// Subscribe to cart change events (local and foreign).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CartEvent> {
        self.store.subscribe()
    }

    fn lock_state(&self) -> MutexGuard<'_, ContextState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
