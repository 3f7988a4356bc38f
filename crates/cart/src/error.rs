//! Error taxonomy for the cart subsystem.
//!
//! Expected, frequent outcomes (stock shortfall, invalid coupon) are returned
//! as structured result values - see [`crate::types::StockValidationResult`]
//! and [`crate::types::CouponValidationResult`]. The types here cover the
//! faults that genuinely abort an operation: storage loss, corrupted durable
//! records, backend failures, and rejected order conversion. None of them
//! ever destroy local cart state as a side effect.

use thiserror::Error;

use crate::backend::BackendError;

/// Durable storage failures.
///
/// The cart store degrades to memory-only operation on the first failed
/// write; these errors never reach UI callers.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The storage medium cannot be used at all (e.g., persistence disabled).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// An underlying I/O operation failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A durable record failed structural validation on read.
///
/// Always handled by full invalidation of the record, never a partial patch.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The stored payload is not valid JSON for the expected shape.
    #[error("malformed cache record: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The record was written by a different schema version.
    #[error("cache record version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

/// Top-level error type for cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// Durable storage failed in a way the store could not absorb.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The commerce backend was unreachable or rejected the request.
    ///
    /// Retryable; the local cart is preserved unchanged.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Pre-conversion stock validation failed. One message per short line.
    #[error("stock validation failed: {}", .0.join("; "))]
    StockValidation(Vec<String>),

    /// Conversion was requested on an empty cart.
    #[error("cannot convert an empty cart to an order")]
    EmptyCart,

    /// Payment was requested without a pending order.
    #[error("no order pending payment")]
    NoPendingOrder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Unavailable("persistence disabled".to_string());
        assert_eq!(err.to_string(), "storage unavailable: persistence disabled");
    }

    #[test]
    fn test_envelope_version_mismatch_display() {
        let err = EnvelopeError::VersionMismatch {
            found: 1,
            expected: 3,
        };
        assert_eq!(
            err.to_string(),
            "cache record version mismatch: found 1, expected 3"
        );
    }

    #[test]
    fn test_stock_validation_error_joins_lines() {
        let err = CartError::StockValidation(vec![
            "Only 2 of Hoodie available".to_string(),
            "Tee is out of stock".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "stock validation failed: Only 2 of Hoodie available; Tee is out of stock"
        );
    }

    #[test]
    fn test_empty_cart_display() {
        assert_eq!(
            CartError::EmptyCart.to_string(),
            "cannot convert an empty cart to an order"
        );
    }
}
