//! Coupon validation scenarios against live cart contents.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use sugarloaf_cart::backend::mock::MockBackend;
use sugarloaf_core::VariantId;

use sugarloaf_integration_tests::{fresh_context, line, percentage_promotion};

// =============================================================================
// Minimum order amount
// =============================================================================

#[tokio::test]
async fn test_coupon_below_minimum_names_the_threshold() {
    let backend = Arc::new(MockBackend::new());
    backend.set_stock("V_1", 50, 4000);
    backend.add_promotion(percentage_promotion("SAVE10", 10, Some(5000)));
    let cart = fresh_context(&backend);

    // $40.00 cart against a $50.00 minimum
    cart.add_to_cart(line("V_1", 1, 4000, 50)).await;
    let result = cart.apply_coupon("SAVE10").await.unwrap();

    assert!(!result.is_valid);
    assert!(result.validation_errors[0].contains("$50.00"));
    assert!(cart.applied_coupon().is_none());
}

#[tokio::test]
async fn test_coupon_applies_once_minimum_is_met() {
    let backend = Arc::new(MockBackend::new());
    backend.set_stock("V_1", 50, 4000);
    backend.add_promotion(percentage_promotion("SAVE10", 10, Some(5000)));
    let cart = fresh_context(&backend);

    cart.add_to_cart(line("V_1", 1, 4000, 50)).await;
    assert!(!cart.apply_coupon("SAVE10").await.unwrap().is_valid);

    // A second unit lifts the total to $80.00
    cart.add_to_cart(line("V_1", 1, 4000, 50)).await;
    let result = cart.apply_coupon("SAVE10").await.unwrap();
    assert!(result.is_valid);
    assert_eq!(result.coupon.unwrap().discount_amount, 800);
}

#[tokio::test]
async fn test_ten_percent_of_a_hundred_dollar_cart() {
    let backend = Arc::new(MockBackend::new());
    backend.set_stock("V_1", 50, 10_000);
    backend.add_promotion(percentage_promotion("SAVE10", 10, Some(5000)));
    let cart = fresh_context(&backend);

    cart.add_to_cart(line("V_1", 1, 10_000, 50)).await;
    let result = cart.apply_coupon("SAVE10").await.unwrap();

    assert!(result.is_valid);
    assert_eq!(result.coupon.unwrap().discount_amount, 1000);
    assert_eq!(cart.discounted_total(), 9000);
}

// =============================================================================
// Coupon lifecycle across mutations
// =============================================================================

#[tokio::test]
async fn test_coupon_dropped_when_cart_shrinks_below_minimum() {
    let backend = Arc::new(MockBackend::new());
    backend.set_stock("V_1", 50, 3000);
    backend.set_stock("V_2", 50, 3000);
    backend.add_promotion(percentage_promotion("SAVE10", 10, Some(5000)));
    let cart = fresh_context(&backend);

    cart.add_to_cart(line("V_1", 1, 3000, 50)).await;
    cart.add_to_cart(line("V_2", 1, 3000, 50)).await;
    assert!(cart.apply_coupon("SAVE10").await.unwrap().is_valid);

    // Removing one line takes the total to $30.00, under the minimum
    cart.remove_item(&VariantId::new("V_2")).await;
    assert!(cart.applied_coupon().is_none());
    assert_eq!(cart.discounted_total(), 3000, "no stale discount lingers");
}

#[tokio::test]
async fn test_unknown_code_leaves_cart_untouched() {
    let backend = Arc::new(MockBackend::new());
    backend.set_stock("V_1", 50, 4000);
    let cart = fresh_context(&backend);
    cart.add_to_cart(line("V_1", 1, 4000, 50)).await;

    let result = cart.apply_coupon("DOESNOTEXIST").await.unwrap();
    assert!(!result.is_valid);
    assert!(cart.applied_coupon().is_none());
    assert_eq!(cart.cart().total_quantity, 1);
}

#[tokio::test]
async fn test_removing_coupon_restores_full_total() {
    let backend = Arc::new(MockBackend::new());
    backend.set_stock("V_1", 50, 10_000);
    backend.add_promotion(percentage_promotion("SAVE10", 10, None));
    let cart = fresh_context(&backend);

    cart.add_to_cart(line("V_1", 1, 10_000, 50)).await;
    cart.apply_coupon("SAVE10").await.unwrap();
    assert_eq!(cart.discounted_total(), 9000);

    cart.remove_coupon();
    assert_eq!(cart.discounted_total(), 10_000);
}
