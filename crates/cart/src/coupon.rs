//! Local coupon validation.
//!
//! Replicates the subset of the promotion engine's rule evaluation that can
//! be decided client-side, so discounts can be previewed before any backend
//! order exists. The first failing rule short-circuits with a user-facing
//! message.
//!
//! Two limitations are deliberate, not bugs:
//!
//! - "Contains products" restrictions configured at product level only
//!   cannot be resolved against a cart that holds variant IDs; they degrade
//!   to "not enforced" with a logged warning. The backend re-checks at order
//!   placement.
//! - Total and per-customer usage limits require authoritative order
//!   history; they are logged and deferred to the backend entirely.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};

use sugarloaf_core::{CustomerId, Money, percentage_of};

use crate::backend::{BackendError, CommerceBackend, Promotion, PromotionAction, PromotionCondition};
use crate::types::{AppliedCoupon, CartItem, CouponValidationResult};

/// Validates coupon codes against the in-memory cart.
pub struct CouponValidator<B> {
    backend: Arc<B>,
}

impl<B: CommerceBackend> CouponValidator<B> {
    /// Create a validator over the given backend.
    #[must_use]
    pub const fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Evaluate a coupon code against the cart.
    ///
    /// Business-rule failures come back as an invalid
    /// [`CouponValidationResult`]; only backend faults are `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the promotion lookup or a condition's
    /// supporting query fails. Retryable; the cart is untouched either way.
    #[instrument(skip(self, items), fields(code = %code, cart_total = cart_total.amount))]
    pub async fn validate(
        &self,
        code: &str,
        cart_total: Money,
        items: &[CartItem],
        customer_id: Option<&CustomerId>,
    ) -> Result<CouponValidationResult, BackendError> {
        // Rule 1: existence. Several promotions may share a code; the most
        // recently created wins, ties broken by highest identifier.
        let candidates = self.backend.promotions_by_code(code).await?;
        let Some(promotion) = candidates
            .into_iter()
            .filter(|p| p.enabled && p.deleted_at.is_none() && p.coupon_code == code)
            .max_by_key(|p| (p.created_at, p.id.as_numeric(), p.id.clone()))
        else {
            return Ok(CouponValidationResult::invalid(format!(
                "Coupon code \"{code}\" is not valid"
            )));
        };

        // Rule 2: active window; missing bounds are unbounded
        let now = Utc::now();
        if promotion.starts_at.is_some_and(|starts| now < starts) {
            return Ok(CouponValidationResult::invalid(format!(
                "Coupon \"{code}\" is not active yet"
            )));
        }
        if promotion.ends_at.is_some_and(|ends| now > ends) {
            return Ok(CouponValidationResult::invalid(format!(
                "Coupon \"{code}\" has expired"
            )));
        }

        // Rule 3: conditions, in the order the promotion defines them
        for condition in &promotion.conditions {
            if let Some(reason) = self
                .check_condition(condition, cart_total, items, customer_id)
                .await?
            {
                return Ok(CouponValidationResult::invalid(reason));
            }
        }

        // Rule 4: usage limits need authoritative order history; the backend
        // enforces them at order creation
        if promotion.usage_limit.is_some() || promotion.per_customer_usage_limit.is_some() {
            debug!(
                promotion = %promotion.id,
                "Usage limits present; enforcement deferred to order placement"
            );
        }

        // Rule 5: discount computation
        Ok(CouponValidationResult::valid(Self::compute_discount(
            &promotion, cart_total,
        )))
    }

    /// Evaluate one condition; `Some(reason)` means it failed.
    async fn check_condition(
        &self,
        condition: &PromotionCondition,
        cart_total: Money,
        items: &[CartItem],
        customer_id: Option<&CustomerId>,
    ) -> Result<Option<String>, BackendError> {
        match condition {
            PromotionCondition::MinimumOrderAmount { amount } => {
                if cart_total.amount < *amount {
                    let minimum = Money::new(*amount, cart_total.currency_code);
                    return Ok(Some(format!(
                        "Order must be at least {} to use this coupon",
                        minimum.display()
                    )));
                }
                Ok(None)
            }
            PromotionCondition::CustomerGroup {
                group_id,
                group_name,
            } => {
                // Fails closed without a signed-in customer
                let Some(customer) = customer_id else {
                    return Ok(Some("Sign in to use this coupon".to_string()));
                };
                let groups = self.backend.customer_groups(customer).await?;
                if groups.iter().any(|g| g == group_id) {
                    Ok(None)
                } else {
                    Ok(Some(format!(
                        "This coupon is limited to {group_name} customers"
                    )))
                }
            }
            PromotionCondition::RequiresVerification { category } => {
                let Some(customer) = customer_id else {
                    return Ok(Some(format!(
                        "Sign in and complete {category} verification to use this coupon"
                    )));
                };
                let verifications = self.backend.active_verifications(customer).await?;
                if verifications
                    .iter()
                    .any(|v| v.eq_ignore_ascii_case(category))
                {
                    Ok(None)
                } else {
                    Ok(Some(format!(
                        "An active {category} verification is required to use this coupon"
                    )))
                }
            }
            PromotionCondition::ContainsProducts {
                variant_ids,
                product_ids,
            } => {
                if variant_ids.is_empty() {
                    if !product_ids.is_empty() {
                        // Product-level-only restriction: the cart holds
                        // variant IDs, so this cannot be resolved locally.
                        // Fail open; the backend enforces at order placement.
                        warn!(
                            products = product_ids.len(),
                            "Product-level coupon restriction cannot be enforced locally"
                        );
                    }
                    return Ok(None);
                }
                let eligible = items
                    .iter()
                    .any(|item| variant_ids.contains(&item.product_variant_id));
                if eligible {
                    Ok(None)
                } else {
                    Ok(Some(
                        "Add an eligible product to your cart to use this coupon".to_string(),
                    ))
                }
            }
        }
    }

    /// Apply the promotion's actions to the cart total.
    ///
    /// The amount discount never exceeds the cart total; free shipping is a
    /// flag layered on top of (not multiplied with) the amount.
    fn compute_discount(promotion: &Promotion, cart_total: Money) -> AppliedCoupon {
        let mut discount: i64 = 0;
        let mut percentage: Option<Decimal> = None;
        let mut free_shipping = false;

        for action in &promotion.actions {
            match action {
                PromotionAction::PercentageDiscount { percentage: pct } => {
                    discount += percentage_of(cart_total.amount, *pct);
                    percentage.get_or_insert(*pct);
                }
                PromotionAction::FixedDiscount { amount } => {
                    discount += (*amount).min(cart_total.amount);
                }
                PromotionAction::FreeShipping => free_shipping = true,
            }
        }

        AppliedCoupon {
            code: promotion.coupon_code.clone(),
            discount_amount: discount.min(cart_total.amount),
            discount_percentage: percentage,
            free_shipping,
            promotion_name: Some(promotion.name.clone()),
            promotion_description: promotion.description.clone(),
        }
    }
}
