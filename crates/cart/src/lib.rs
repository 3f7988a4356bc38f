//! Sugarloaf local cart subsystem.
//!
//! The storefront keeps the shopper's cart entirely in client-held durable
//! storage until checkout. This crate owns everything that decides what is
//! in that cart, whether it is still sellable, and when it becomes a real
//! backend order:
//!
//! - [`store`] - Persistent cart store with cross-tab change events
//! - [`reconcile`] - Stock & price reconciliation against the backend
//! - [`coupon`] - Local coupon validation ahead of order creation
//! - [`context`] - The single mutation surface consumed by UI code
//! - [`catalog`] - Read-through catalog cache with live stock merging
//! - [`backend`] - The commerce backend collaborator interface
//!
//! # Resilience guarantee
//!
//! Order creation and cart clearing are deliberately decoupled: the local
//! cart survives a successful conversion and is only cleared once payment
//! settles. A declined or abandoned payment never loses cart contents.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sugarloaf_cart::{CartConfig, CartContext, storage::MemoryStorage};
//! use sugarloaf_cart::backend::VendureClient;
//!
//! let backend = Arc::new(VendureClient::new(&backend_config));
//! let storage = Arc::new(MemoryStorage::new());
//! let cart = CartContext::new(backend, storage, &CartConfig::default());
//!
//! let outcome = cart.add_to_cart(item).await?;
//! assert!(outcome.stock_result.success);
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod backend;
pub mod catalog;
pub mod config;
pub mod context;
pub mod coupon;
pub mod error;
pub mod reconcile;
pub mod storage;
pub mod store;
pub mod types;

pub use catalog::{CachedProduct, CachedVariant, CatalogCache};
pub use config::{BackendConfig, CartConfig, ConfigError};
pub use context::{CartContext, MutationOutcome};
pub use error::{CartError, EnvelopeError, StorageError};
pub use types::{
    AppliedCoupon, CacheEnvelope, CacheStats, CartItem, CouponValidationResult, LocalCart,
    StockLevel, StockValidationResult, VariantSnapshot,
};
