//! Cart mutation, persistence, and cross-tab scenarios.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use sugarloaf_cart::backend::mock::MockBackend;
use sugarloaf_cart::storage::{KeyValueStorage, MemoryStorage};
use sugarloaf_cart::{CacheEnvelope, CartConfig, LocalCart};
use sugarloaf_core::VariantId;

use sugarloaf_integration_tests::{context_over, fresh_context, line};

// =============================================================================
// Stock clamping
// =============================================================================

#[tokio::test]
async fn test_request_above_stock_is_clamped_not_rejected() {
    let backend = Arc::new(MockBackend::new());
    backend.set_stock("V_1", 3, 1999);
    let cart = fresh_context(&backend);

    let outcome = cart.add_to_cart(line("V_1", 5, 1999, 3)).await;

    assert!(!outcome.stock_result.success);
    assert_eq!(outcome.stock_result.available_stock, Some(3));
    let item = outcome.cart.line(&VariantId::new("V_1")).unwrap();
    assert_eq!(item.quantity, 3, "granted what stock allows");
    assert_eq!(outcome.cart.sub_total, 3 * 1999);
}

#[tokio::test]
async fn test_repeated_adds_accumulate_until_stock_runs_out() {
    let backend = Arc::new(MockBackend::new());
    backend.set_stock("V_1", 4, 1000);
    let cart = fresh_context(&backend);

    assert!(cart.add_to_cart(line("V_1", 2, 1000, 4)).await.stock_result.success);
    assert!(cart.add_to_cart(line("V_1", 2, 1000, 4)).await.stock_result.success);

    // A fifth unit does not exist; the line is held at four
    let outcome = cart.add_to_cart(line("V_1", 1, 1000, 4)).await;
    assert!(!outcome.stock_result.success);
    assert_eq!(outcome.cart.line(&VariantId::new("V_1")).unwrap().quantity, 4);
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_cart_survives_session_restart() {
    let backend = Arc::new(MockBackend::new());
    backend.set_stock("V_1", 10, 2500);
    let storage = Arc::new(MemoryStorage::new());

    {
        let cart = context_over(&backend, &storage);
        cart.add_to_cart(line("V_1", 2, 2500, 10)).await;
    }

    let reopened = context_over(&backend, &storage);
    let cart = reopened.cart();
    assert_eq!(cart.total_quantity, 2);
    assert_eq!(cart.sub_total, 5000);
}

#[tokio::test]
async fn test_corrupt_record_resets_to_empty_cart() {
    let backend = Arc::new(MockBackend::new());
    let storage = Arc::new(MemoryStorage::new());
    let config = CartConfig::default();
    storage.set(&config.cart_storage_key, "not even json").unwrap();

    let cart = context_over(&backend, &storage);
    assert!(cart.cart().is_empty());
    // The unusable record was invalidated in full
    assert_eq!(storage.get(&config.cart_storage_key).unwrap(), None);
}

#[tokio::test]
async fn test_record_from_older_schema_resets_to_empty_cart() {
    let backend = Arc::new(MockBackend::new());
    let storage = Arc::new(MemoryStorage::new());
    let config = CartConfig::default();
    let old = CacheEnvelope {
        version: 1,
        last_update: 0,
        payload: LocalCart::default(),
        stats: None,
    };
    storage
        .set(&config.cart_storage_key, &old.encode().unwrap())
        .unwrap();

    let cart = context_over(&backend, &storage);
    assert!(cart.cart().is_empty(), "no cross-version migration is attempted");
}

// =============================================================================
// Cross-tab synchronization
// =============================================================================

#[tokio::test]
async fn test_foreign_write_reflected_without_feedback_loop() {
    let backend = Arc::new(MockBackend::new());
    backend.set_stock("V_1", 10, 1000);
    backend.set_stock("V_2", 10, 2000);
    let storage = Arc::new(MemoryStorage::new());
    let config = CartConfig::default();

    let tab_a = context_over(&backend, &storage);
    let tab_b = context_over(&backend, &storage);

    // Tab A adds an item; tab B observes the durable write
    tab_a.add_to_cart(line("V_1", 1, 1000, 10)).await;
    let written = storage.get(&config.cart_storage_key).unwrap().unwrap();
    tab_b.handle_foreign_update(&written).await;
    assert_eq!(tab_b.cart().total_quantity, 1);

    // Applying the foreign write must not have re-persisted: the durable
    // record is still byte-identical to tab A's write
    assert_eq!(
        storage.get(&config.cart_storage_key).unwrap().unwrap(),
        written
    );

    // Tab B keeps mutating on top of the synced state
    backend.set_stock("V_2", 10, 2000);
    let outcome = tab_b.add_to_cart(line("V_2", 1, 2000, 10)).await;
    assert_eq!(outcome.cart.total_quantity, 2);
}

#[tokio::test]
async fn test_garbage_foreign_write_is_ignored() {
    let backend = Arc::new(MockBackend::new());
    backend.set_stock("V_1", 10, 1000);
    let cart = fresh_context(&backend);
    cart.add_to_cart(line("V_1", 2, 1000, 10)).await;

    cart.handle_foreign_update("{torn write").await;
    assert_eq!(cart.cart().total_quantity, 2, "own state stays authoritative");
}
