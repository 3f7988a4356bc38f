//! Commerce backend collaborator interface.
//!
//! The cart subsystem consumes the backend through the capabilities in
//! [`CommerceBackend`] and nothing else: stock/price queries, promotion
//! lookup, verification status, order creation, and payment. Services are
//! generic over the trait so tests can substitute an in-memory backend.
//!
//! [`VendureClient`] is the production implementation, speaking GraphQL over
//! HTTP to the shop API.

mod vendure;

#[cfg(any(test, feature = "mock-backend"))]
pub mod mock;

pub use vendure::VendureClient;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sugarloaf_core::{CustomerId, OrderId, ProductId, PromotionId, VariantId};

/// Errors from the commerce backend boundary.
///
/// All of these are retryable from the cart's point of view: local cart
/// state is never destroyed as a side effect of a backend failure.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// GraphQL query returned errors.
    #[error("GraphQL errors: {}", .0.join("; "))]
    GraphQL(Vec<String>),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limited by the backend.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),
}

// =============================================================================
// Stock & Orders
// =============================================================================

/// Live stock and price for a variant, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockInfo {
    /// Sellable units right now.
    pub available: i64,
    /// Current unit price in minor currency units.
    pub price: i64,
}

/// One line of an order-creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineInput {
    /// Variant to order.
    pub product_variant_id: VariantId,
    /// Units to order.
    pub quantity: u32,
}

/// Handle to an order the backend created from the local cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderHandle {
    /// Backend order ID.
    pub id: OrderId,
    /// Human-facing order code.
    pub code: String,
}

/// Terminal outcome of a payment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Payment settled; the local cart may now be cleared.
    Settled,
    /// Payment declined; the local cart must be preserved for retry.
    Declined(String),
}

// =============================================================================
// Promotions
// =============================================================================

/// A condition the promotion engine attaches to a coupon.
///
/// Evaluated locally in the order the promotion defines them; see
/// [`crate::coupon`] for which conditions are enforceable client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PromotionCondition {
    /// Cart total must be at least `amount` minor units.
    MinimumOrderAmount { amount: i64 },
    /// Customer must belong to the given group.
    CustomerGroup { group_id: String, group_name: String },
    /// Customer must hold an active verification of the given category.
    RequiresVerification { category: String },
    /// Cart must contain at least one of the allowed variants.
    ///
    /// `variant_ids` may be empty when the promotion was configured at
    /// product level only; that restriction cannot be resolved client-side.
    ContainsProducts {
        variant_ids: Vec<VariantId>,
        product_ids: Vec<ProductId>,
    },
}

/// A discount the promotion applies once its conditions pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PromotionAction {
    /// Percentage off the cart total.
    PercentageDiscount { percentage: Decimal },
    /// Fixed amount off, in minor units.
    FixedDiscount { amount: i64 },
    /// Shipping is waived; layered on top of any amount discount.
    FreeShipping,
}

/// Promotion definition as returned by the promotion lookup capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    /// Backend promotion ID.
    pub id: PromotionId,
    /// Coupon code that activates this promotion.
    pub coupon_code: String,
    /// Display name.
    pub name: String,
    /// Display description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the promotion is enabled.
    pub enabled: bool,
    /// Soft-deletion marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Creation time, used for same-code tie-breaking.
    pub created_at: DateTime<Utc>,
    /// Start of the active window (unbounded when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    /// End of the active window (unbounded when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    /// Conditions, in evaluation order.
    pub conditions: Vec<PromotionCondition>,
    /// Actions applied once conditions pass.
    pub actions: Vec<PromotionAction>,
    /// Total redemption limit. Enforced by the backend only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_limit: Option<u32>,
    /// Per-customer redemption limit. Enforced by the backend only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_customer_usage_limit: Option<u32>,
}

// =============================================================================
// Backend Trait
// =============================================================================

/// Capabilities the cart subsystem consumes from the commerce backend.
#[allow(async_fn_in_trait)]
pub trait CommerceBackend: Send + Sync {
    /// Current stock and price per variant. Absent keys mean unknown -
    /// callers must never treat absence as infinite stock.
    async fn stock_levels(
        &self,
        ids: &[VariantId],
    ) -> Result<HashMap<VariantId, StockInfo>, BackendError>;

    /// All promotions configured with the given coupon code, including
    /// disabled and deleted ones (the validator filters).
    async fn promotions_by_code(&self, code: &str) -> Result<Vec<Promotion>, BackendError>;

    /// Active verification categories held by a customer.
    async fn active_verifications(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<String>, BackendError>;

    /// Group IDs the customer belongs to.
    async fn customer_groups(&self, customer_id: &CustomerId)
    -> Result<Vec<String>, BackendError>;

    /// Create a backend order from validated cart lines.
    async fn create_order(
        &self,
        lines: &[OrderLineInput],
        coupon_code: Option<&str>,
    ) -> Result<OrderHandle, BackendError>;

    /// Attempt payment for a previously created order.
    async fn create_payment(&self, order: &OrderHandle) -> Result<PaymentOutcome, BackendError>;
}
