//! End-to-end cart flow scenarios for Sugarloaf.
//!
//! Drives the full cart subsystem (persistent store, stock reconciliation,
//! coupons, checkout) against the programmable in-memory backend from
//! `sugarloaf-cart`'s `mock-backend` feature. No network or real storage is
//! involved, so every scenario is deterministic.
//!
//! # Test Categories
//!
//! - `cart_flow` - Adding, clamping, persistence, and cross-tab sync
//! - `coupon_flow` - Coupon validation against cart contents
//! - `checkout_resilience` - Conversion, payment, and failure recovery

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use rust_decimal::Decimal;

use sugarloaf_cart::backend::mock::MockBackend;
use sugarloaf_cart::backend::{Promotion, PromotionAction, PromotionCondition};
use sugarloaf_cart::storage::{KeyValueStorage, MemoryStorage};
use sugarloaf_cart::{CartConfig, CartContext, CartItem, StockLevel, VariantSnapshot};
use sugarloaf_core::{ProductId, PromotionId, VariantId};

/// A cart context over a fresh in-memory store and the given backend.
#[must_use]
pub fn fresh_context(backend: &Arc<MockBackend>) -> CartContext<MockBackend> {
    CartContext::new(
        Arc::clone(backend),
        Arc::new(MemoryStorage::new()),
        &CartConfig::default(),
    )
}

/// A cart context sharing an existing storage medium (a "second tab").
#[must_use]
pub fn context_over(
    backend: &Arc<MockBackend>,
    storage: &Arc<MemoryStorage>,
) -> CartContext<MockBackend> {
    CartContext::new(
        Arc::clone(backend),
        Arc::clone(storage) as Arc<dyn KeyValueStorage>,
        &CartConfig::default(),
    )
}

/// A cart line for a variant, with the stock snapshot captured on it.
#[must_use]
pub fn line(id: &str, quantity: u32, price: i64, snapshot_stock: i64) -> CartItem {
    CartItem {
        product_variant_id: VariantId::new(id),
        quantity,
        product_variant: VariantSnapshot {
            id: VariantId::new(id),
            name: format!("Classic Tee {id}"),
            price,
            stock_level: StockLevel::Quantity(snapshot_stock),
            product_id: ProductId::new("P_1"),
            product_slug: "classic-tee".to_string(),
            options: vec![],
            featured_asset: None,
        },
    }
}

/// A percentage-off promotion with an optional minimum order amount.
#[must_use]
pub fn percentage_promotion(code: &str, percentage: i64, minimum: Option<i64>) -> Promotion {
    Promotion {
        id: PromotionId::new("1"),
        coupon_code: code.to_string(),
        name: format!("{percentage}% off"),
        description: None,
        enabled: true,
        deleted_at: None,
        created_at: chrono::Utc::now(),
        starts_at: None,
        ends_at: None,
        conditions: minimum
            .map(|amount| vec![PromotionCondition::MinimumOrderAmount { amount }])
            .unwrap_or_default(),
        actions: vec![PromotionAction::PercentageDiscount {
            percentage: Decimal::from(percentage),
        }],
        usage_limit: None,
        per_customer_usage_limit: None,
    }
}
