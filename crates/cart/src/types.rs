//! Domain types for the local cart.
//!
//! These are the shapes that live in durable storage and cross the mutation
//! API. Field names serialize in camelCase so the durable records match what
//! the storefront's web host already persists.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use sugarloaf_core::{CurrencyCode, ProductId, VariantId};

use crate::error::EnvelopeError;

// =============================================================================
// Cart Line Types
// =============================================================================

/// Stock level snapshot as reported when a variant entered the cart.
///
/// The backend reports either an exact count or a coarse label such as
/// `IN_STOCK`. The snapshot is advisory only; checkout-blocking decisions
/// always go through the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StockLevel {
    /// Exact units on hand.
    Quantity(i64),
    /// Coarse availability label (e.g., `IN_STOCK`, `LOW_STOCK`).
    Label(String),
}

impl StockLevel {
    /// The snapshot as a count, when one was captured.
    #[must_use]
    pub const fn as_quantity(&self) -> Option<i64> {
        match self {
            Self::Quantity(n) => Some(*n),
            Self::Label(_) => None,
        }
    }
}

/// A selected option on a variant (e.g., `Size` = `M`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedOption {
    /// Option name.
    pub name: String,
    /// Chosen value.
    pub value: String,
}

/// Variant descriptor snapshot carried on a cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSnapshot {
    /// Variant ID in the commerce backend.
    pub id: VariantId,
    /// Display name (product name plus option values).
    pub name: String,
    /// Unit price in minor currency units at capture time.
    ///
    /// Display-only once in the cart; the final total is recomputed from
    /// the authoritative source at conversion time.
    pub price: i64,
    /// Stock level as known when the line was created.
    pub stock_level: StockLevel,
    /// Owning product.
    pub product_id: ProductId,
    /// Owning product slug, for linking back to the product page.
    pub product_slug: String,
    /// Selected options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectedOption>,
    /// Featured asset URL, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featured_asset: Option<String>,
}

/// One cart line.
///
/// Identity key is [`CartItem::product_variant_id`]; the store never holds
/// two lines for the same variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Variant this line refers to.
    pub product_variant_id: VariantId,
    /// Units requested. Always positive; zero removes the line.
    pub quantity: u32,
    /// Variant snapshot for display and stale-data fallback.
    pub product_variant: VariantSnapshot,
}

impl CartItem {
    /// Line total in minor units, from the snapshot price.
    #[must_use]
    pub const fn line_total(&self) -> i64 {
        self.product_variant.price * self.quantity as i64
    }
}

// =============================================================================
// Cart
// =============================================================================

/// The client-held, pre-order representation of a shopper's selections.
///
/// `total_quantity` and `sub_total` are derived and recomputed on every
/// mutation - they are never independently stored truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCart {
    /// Lines in insertion order, unique per variant.
    pub items: Vec<CartItem>,
    /// Sum of line quantities.
    pub total_quantity: u32,
    /// Sum of `price * quantity` across lines, in minor units.
    pub sub_total: i64,
    /// Currency all line prices are denominated in.
    pub currency_code: CurrencyCode,
}

impl LocalCart {
    /// A cart with no lines.
    #[must_use]
    pub const fn empty(currency_code: CurrencyCode) -> Self {
        Self {
            items: Vec::new(),
            total_quantity: 0,
            sub_total: 0,
            currency_code,
        }
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The line for a variant, if present.
    #[must_use]
    pub fn line(&self, id: &VariantId) -> Option<&CartItem> {
        self.items.iter().find(|item| &item.product_variant_id == id)
    }

    /// Recompute the derived totals from the lines.
    pub fn recompute_totals(&mut self) {
        self.total_quantity = self.items.iter().map(|item| item.quantity).sum();
        self.sub_total = self.items.iter().map(CartItem::line_total).sum();
    }
}

impl Default for LocalCart {
    fn default() -> Self {
        Self::empty(CurrencyCode::default())
    }
}

// =============================================================================
// Validation Results
// =============================================================================

/// Outcome of the last stock-affecting mutation for a variant.
///
/// Ephemeral UI-facing state - attached to the cart context, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockValidationResult {
    /// Whether the requested quantity was honored as-is.
    pub success: bool,
    /// Best-known available stock, when the request could not be honored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_stock: Option<i64>,
    /// Human-readable reason for a non-success outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StockValidationResult {
    /// The requested quantity was honored.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            success: true,
            available_stock: None,
            error: None,
        }
    }

    /// The request exceeded stock and was clamped to `available`.
    #[must_use]
    pub fn clamped(available: i64) -> Self {
        Self {
            success: false,
            available_stock: Some(available),
            error: Some(format!("Only {available} in stock")),
        }
    }

    /// The variant has no stock at all; the only remedy is removal.
    #[must_use]
    pub fn out_of_stock() -> Self {
        Self {
            success: false,
            available_stock: Some(0),
            error: Some("Out of stock".to_string()),
        }
    }

    /// The request was accepted without authoritative stock knowledge.
    #[must_use]
    pub fn unverified() -> Self {
        Self {
            success: true,
            available_stock: None,
            error: Some("Stock level could not be verified".to_string()),
        }
    }
}

// =============================================================================
// Coupons
// =============================================================================

/// A coupon currently applied to the cart.
///
/// Owned by the cart context; recomputed whenever cart contents change and
/// discarded on successful order conversion or explicit removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCoupon {
    /// The coupon code as entered.
    pub code: String,
    /// Discount in minor units. Never exceeds the cart total.
    pub discount_amount: i64,
    /// Percentage the discount was computed from, for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_percentage: Option<Decimal>,
    /// Whether the promotion also waives shipping.
    pub free_shipping: bool,
    /// Promotion display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion_name: Option<String>,
    /// Promotion description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion_description: Option<String>,
}

/// Result of local coupon validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponValidationResult {
    /// Whether every locally checkable rule passed.
    pub is_valid: bool,
    /// Human-readable reasons when invalid.
    pub validation_errors: Vec<String>,
    /// The coupon to apply when valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon: Option<AppliedCoupon>,
}

impl CouponValidationResult {
    /// A passing result carrying the computed coupon.
    #[must_use]
    pub const fn valid(coupon: AppliedCoupon) -> Self {
        Self {
            is_valid: true,
            validation_errors: Vec::new(),
            coupon: Some(coupon),
        }
    }

    /// A failing result with user-facing reasons.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            validation_errors: vec![reason.into()],
            coupon: None,
        }
    }
}

// =============================================================================
// Cache Envelope
// =============================================================================

/// Hit/miss counters carried on the catalog snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads satisfied from the cache.
    pub hits: u64,
    /// Reads that found nothing cached.
    pub misses: u64,
}

/// Versioned wrapper around every durable record.
///
/// A version mismatch or structural failure on read invalidates the whole
/// record - never a partial patch - which bounds corruption blast radius.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEnvelope<T> {
    /// Schema version the payload was written with.
    pub version: u32,
    /// Epoch milliseconds of the last write.
    pub last_update: i64,
    /// The wrapped record.
    pub payload: T,
    /// Optional cache statistics (catalog snapshot only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<CacheStats>,
}

impl<T: Serialize + DeserializeOwned> CacheEnvelope<T> {
    /// Wrap a payload with the current timestamp.
    #[must_use]
    pub fn now(version: u32, payload: T) -> Self {
        Self {
            version,
            last_update: Utc::now().timestamp_millis(),
            payload,
            stats: None,
        }
    }

    /// Serialize for durable storage.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error if the payload cannot be
    /// serialized (practically unreachable for the types stored here).
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a durable record, rejecting unknown schema versions.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] when the record is malformed or was written
    /// by a different schema version. Callers treat either case as full
    /// corruption: delete the record and rebuild.
    pub fn decode(raw: &str, expected_version: u32) -> Result<Self, EnvelopeError> {
        let envelope: Self = serde_json::from_str(raw)?;
        if envelope.version != expected_version {
            return Err(EnvelopeError::VersionMismatch {
                found: envelope.version,
                expected: expected_version,
            });
        }
        Ok(envelope)
    }

    /// Milliseconds since the record was written. Clock skew clamps to zero.
    #[must_use]
    pub fn age_ms(&self) -> i64 {
        (Utc::now().timestamp_millis() - self.last_update).max(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn snapshot(id: &str, price: i64, stock: i64) -> VariantSnapshot {
        VariantSnapshot {
            id: VariantId::new(id),
            name: format!("Variant {id}"),
            price,
            stock_level: StockLevel::Quantity(stock),
            product_id: ProductId::new("P_1"),
            product_slug: "classic-tee".to_string(),
            options: vec![],
            featured_asset: None,
        }
    }

    fn item(id: &str, quantity: u32, price: i64) -> CartItem {
        CartItem {
            product_variant_id: VariantId::new(id),
            quantity,
            product_variant: snapshot(id, price, 10),
        }
    }

    #[test]
    fn test_recompute_totals() {
        let mut cart = LocalCart::empty(CurrencyCode::USD);
        cart.items.push(item("V_1", 3, 1000));
        cart.items.push(item("V_2", 2, 2500));
        cart.recompute_totals();

        assert_eq!(cart.total_quantity, 5);
        assert_eq!(cart.sub_total, 3 * 1000 + 2 * 2500);
    }

    #[test]
    fn test_totals_invariant_after_serde_round_trip() {
        let mut cart = LocalCart::empty(CurrencyCode::USD);
        cart.items.push(item("V_1", 2, 1999));
        cart.recompute_totals();

        let json = serde_json::to_string(&cart).unwrap();
        let back: LocalCart = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cart);
    }

    #[test]
    fn test_cart_serializes_camel_case() {
        let cart = LocalCart::default();
        let json = serde_json::to_value(&cart).unwrap();
        assert!(json.get("totalQuantity").is_some());
        assert!(json.get("subTotal").is_some());
        assert!(json.get("currencyCode").is_some());
    }

    #[test]
    fn test_stock_level_untagged_serde() {
        let exact: StockLevel = serde_json::from_str("7").unwrap();
        assert_eq!(exact, StockLevel::Quantity(7));
        let label: StockLevel = serde_json::from_str("\"IN_STOCK\"").unwrap();
        assert_eq!(label, StockLevel::Label("IN_STOCK".to_string()));
        assert_eq!(label.as_quantity(), None);
    }

    #[test]
    fn test_envelope_round_trip() {
        let mut cart = LocalCart::empty(CurrencyCode::USD);
        cart.items.push(item("V_1", 1, 500));
        cart.recompute_totals();

        let envelope = CacheEnvelope::now(3, cart.clone());
        let raw = envelope.encode().unwrap();
        let back = CacheEnvelope::<LocalCart>::decode(&raw, 3).unwrap();
        assert_eq!(back.payload, cart);
    }

    #[test]
    fn test_envelope_rejects_version_mismatch() {
        let envelope = CacheEnvelope::now(2, LocalCart::default());
        let raw = envelope.encode().unwrap();
        let err = CacheEnvelope::<LocalCart>::decode(&raw, 3).unwrap_err();
        assert!(matches!(
            err,
            EnvelopeError::VersionMismatch {
                found: 2,
                expected: 3
            }
        ));
    }

    #[test]
    fn test_envelope_rejects_garbage() {
        let err = CacheEnvelope::<LocalCart>::decode("{not json", 3).unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));
    }

    #[test]
    fn test_stock_result_constructors() {
        assert!(StockValidationResult::ok().success);
        let clamped = StockValidationResult::clamped(5);
        assert!(!clamped.success);
        assert_eq!(clamped.available_stock, Some(5));
        let oos = StockValidationResult::out_of_stock();
        assert_eq!(oos.available_stock, Some(0));
        assert!(!oos.success);
        assert!(StockValidationResult::unverified().success);
    }
}
