//! Sugarloaf Core - Shared types library.
//!
//! This crate provides common types used across all Sugarloaf components:
//! - `cart` - Client-side local cart with offline stock reconciliation
//! - `integration-tests` - End-to-end cart flow scenarios
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no storage access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs and minor-unit money

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
