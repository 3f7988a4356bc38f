//! In-memory commerce backend for tests.
//!
//! Programmable stock, promotions, verifications, and failure injection.
//! Available to downstream crates through the `mock-backend` feature.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use sugarloaf_core::{CustomerId, OrderId, VariantId};

use super::{
    BackendError, CommerceBackend, OrderHandle, OrderLineInput, PaymentOutcome, Promotion,
    StockInfo,
};

/// A recorded order-creation call.
#[derive(Debug, Clone)]
pub struct RecordedOrder {
    /// Lines submitted.
    pub lines: Vec<OrderLineInput>,
    /// Coupon code submitted, if any.
    pub coupon_code: Option<String>,
}

/// Programmable in-memory backend.
#[derive(Debug, Default)]
pub struct MockBackend {
    stock: Mutex<HashMap<VariantId, StockInfo>>,
    promotions: Mutex<Vec<Promotion>>,
    verifications: Mutex<HashMap<CustomerId, Vec<String>>>,
    groups: Mutex<HashMap<CustomerId, Vec<String>>>,
    orders: Mutex<Vec<RecordedOrder>>,
    payment_declines: AtomicBool,
    fail_stock: AtomicBool,
    fail_promotions: AtomicBool,
    fail_orders: AtomicBool,
    stock_calls: AtomicUsize,
    next_order: AtomicUsize,
}

impl MockBackend {
    /// An empty backend; configure with the setters below.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set stock and price for a variant.
    pub fn set_stock(&self, id: impl Into<VariantId>, available: i64, price: i64) {
        self.locked(&self.stock)
            .insert(id.into(), StockInfo { available, price });
    }

    /// Register a promotion.
    pub fn add_promotion(&self, promotion: Promotion) {
        self.locked(&self.promotions).push(promotion);
    }

    /// Grant a customer an active verification category.
    pub fn add_verification(&self, customer: impl Into<CustomerId>, category: impl Into<String>) {
        self.locked(&self.verifications)
            .entry(customer.into())
            .or_default()
            .push(category.into());
    }

    /// Put a customer in a group.
    pub fn add_group(&self, customer: impl Into<CustomerId>, group_id: impl Into<String>) {
        self.locked(&self.groups)
            .entry(customer.into())
            .or_default()
            .push(group_id.into());
    }

    /// Make stock queries fail until turned off.
    pub fn fail_stock(&self, fail: bool) {
        self.fail_stock.store(fail, Ordering::SeqCst);
    }

    /// Make promotion lookups fail until turned off.
    pub fn fail_promotions(&self, fail: bool) {
        self.fail_promotions.store(fail, Ordering::SeqCst);
    }

    /// Make order creation fail until turned off.
    pub fn fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent payment attempts decline.
    pub fn decline_payments(&self, decline: bool) {
        self.payment_declines.store(decline, Ordering::SeqCst);
    }

    /// Orders created so far.
    #[must_use]
    pub fn recorded_orders(&self) -> Vec<RecordedOrder> {
        self.locked(&self.orders).clone()
    }

    /// Number of stock-query round trips.
    #[must_use]
    pub fn stock_call_count(&self) -> usize {
        self.stock_calls.load(Ordering::SeqCst)
    }

    fn locked<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl CommerceBackend for MockBackend {
    async fn stock_levels(
        &self,
        ids: &[VariantId],
    ) -> Result<HashMap<VariantId, StockInfo>, BackendError> {
        self.stock_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stock.load(Ordering::SeqCst) {
            return Err(BackendError::GraphQL(vec![
                "simulated stock outage".to_string(),
            ]));
        }
        let stock = self.locked(&self.stock);
        Ok(ids
            .iter()
            .filter_map(|id| stock.get(id).map(|info| (id.clone(), *info)))
            .collect())
    }

    async fn promotions_by_code(&self, code: &str) -> Result<Vec<Promotion>, BackendError> {
        if self.fail_promotions.load(Ordering::SeqCst) {
            return Err(BackendError::GraphQL(vec![
                "simulated promotion outage".to_string(),
            ]));
        }
        Ok(self
            .locked(&self.promotions)
            .iter()
            .filter(|p| p.coupon_code == code)
            .cloned()
            .collect())
    }

    async fn active_verifications(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<String>, BackendError> {
        Ok(self
            .locked(&self.verifications)
            .get(customer_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn customer_groups(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<String>, BackendError> {
        Ok(self
            .locked(&self.groups)
            .get(customer_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_order(
        &self,
        lines: &[OrderLineInput],
        coupon_code: Option<&str>,
    ) -> Result<OrderHandle, BackendError> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(BackendError::GraphQL(vec![
                "simulated order rejection".to_string(),
            ]));
        }
        self.locked(&self.orders).push(RecordedOrder {
            lines: lines.to_vec(),
            coupon_code: coupon_code.map(String::from),
        });
        let n = self.next_order.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(OrderHandle {
            id: OrderId::new(format!("O_{n}")),
            code: format!("SL{n:05}"),
        })
    }

    async fn create_payment(&self, _order: &OrderHandle) -> Result<PaymentOutcome, BackendError> {
        if self.payment_declines.load(Ordering::SeqCst) {
            Ok(PaymentOutcome::Declined("card declined".to_string()))
        } else {
            Ok(PaymentOutcome::Settled)
        }
    }
}
