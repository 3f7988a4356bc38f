//! Stock & price reconciliation engine.
//!
//! Answers "is quantity Q of variant V currently sellable, and at what
//! price?" with a three-tier lookup: the in-memory variant cache when fresh,
//! an on-demand backend fetch when stale or absent, and the last-known value
//! flagged as possibly stale when the fetch fails. Checkout validation
//! always bypasses the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use moka::future::Cache;
use tracing::{debug, instrument, warn};

use sugarloaf_core::VariantId;

use crate::backend::{BackendError, CommerceBackend, StockInfo};
use crate::config::CartConfig;
use crate::types::LocalCart;

/// Upper bound on cached variants; far above any realistic catalog slice.
const STOCK_CACHE_CAPACITY: u64 = 10_000;

/// How much the engine trusts a stock figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within the variant TTL or fetched just now.
    Fresh,
    /// Last-known value; the backend could not be reached.
    Stale,
    /// Nothing is known about this variant.
    Unknown,
}

/// A stock answer with its trust level.
#[derive(Debug, Clone, Copy)]
pub struct Availability {
    /// Best-known sellable units.
    pub quantity: i64,
    /// How trustworthy `quantity` is.
    pub freshness: Freshness,
}

impl Availability {
    /// The quantity when anything at all is known, `None` when unknown.
    ///
    /// Unknown availability must never be treated as infinite; callers
    /// accept the request unverified instead of granting against it.
    #[must_use]
    pub const fn known(&self) -> Option<i64> {
        match self.freshness {
            Freshness::Fresh | Freshness::Stale => Some(self.quantity),
            Freshness::Unknown => None,
        }
    }
}

/// Result of full-cart validation ahead of order conversion.
#[derive(Debug, Clone)]
pub struct StockCheckReport {
    /// Whether every line can be fulfilled.
    pub valid: bool,
    /// One message per failing line.
    pub errors: Vec<String>,
}

/// Reconciles locally held stock/price assumptions against the backend.
pub struct StockReconciler<B> {
    backend: Arc<B>,
    cache: Cache<VariantId, StockInfo>,
    /// Survives TTL eviction; tier-3 fallback when the backend is down.
    last_known: Mutex<HashMap<VariantId, StockInfo>>,
}

impl<B: CommerceBackend> StockReconciler<B> {
    /// Create a reconciler with the configured variant TTL.
    #[must_use]
    pub fn new(backend: Arc<B>, config: &CartConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(STOCK_CACHE_CAPACITY)
            .time_to_live(config.variant_stock_ttl)
            .build();
        Self {
            backend,
            cache,
            last_known: Mutex::new(HashMap::new()),
        }
    }

    /// Batched stock lookup.
    ///
    /// Returns whatever subset is known; a fetch failure never crashes the
    /// caller. Absent keys mean unknown, never infinite.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn check_variant_stock(&self, ids: &[VariantId]) -> HashMap<VariantId, i64> {
        let mut out = HashMap::with_capacity(ids.len());
        let mut misses = Vec::new();

        for id in ids {
            if let Some(info) = self.cache.get(id).await {
                debug!(variant = %id, "Stock cache hit");
                out.insert(id.clone(), info.available);
            } else {
                misses.push(id.clone());
            }
        }

        if !misses.is_empty() {
            match self.backend.stock_levels(&misses).await {
                Ok(levels) => {
                    for (id, info) in levels {
                        self.remember(&id, info).await;
                        out.insert(id, info.available);
                    }
                }
                Err(e) => {
                    // Partial results are fine; missing keys stay absent
                    warn!(error = %e, missing = misses.len(), "Batch stock fetch failed");
                }
            }
        }

        out
    }

    /// Three-tier availability for a single variant.
    ///
    /// `fallback` is the caller's own last snapshot (e.g., the quantity
    /// captured on the cart line), consulted only when neither the cache nor
    /// the backend can answer.
    pub async fn availability(&self, id: &VariantId, fallback: Option<i64>) -> Availability {
        if let Some(info) = self.cache.get(id).await {
            return Availability {
                quantity: info.available,
                freshness: Freshness::Fresh,
            };
        }

        match self.backend.stock_levels(std::slice::from_ref(id)).await {
            Ok(levels) => {
                if let Some(info) = levels.get(id) {
                    self.remember(id, *info).await;
                    return Availability {
                        quantity: info.available,
                        freshness: Freshness::Fresh,
                    };
                }
                // Backend answered but does not know this variant
                Availability {
                    quantity: 0,
                    freshness: Freshness::Unknown,
                }
            }
            Err(e) => {
                warn!(variant = %id, error = %e, "Stock fetch failed, using last-known");
                let last = self
                    .lock_last_known()
                    .get(id)
                    .map(|info| info.available)
                    .or(fallback);
                last.map_or(
                    Availability {
                        quantity: 0,
                        freshness: Freshness::Unknown,
                    },
                    |quantity| Availability {
                        quantity,
                        freshness: Freshness::Stale,
                    },
                )
            }
        }
    }

    /// Freshest known unit price for a variant, in minor units.
    ///
    /// Conversion-time totals must come from here (or the backend itself),
    /// never from the snapshot captured when the line entered the cart.
    pub async fn fresh_price(&self, id: &VariantId) -> Option<i64> {
        if let Some(info) = self.cache.get(id).await {
            return Some(info.price);
        }
        match self.backend.stock_levels(std::slice::from_ref(id)).await {
            Ok(levels) => {
                let info = levels.get(id).copied()?;
                self.remember(id, info).await;
                Some(info.price)
            }
            Err(e) => {
                warn!(variant = %id, error = %e, "Price fetch failed");
                None
            }
        }
    }

    /// Re-confirm every cart line against forced-fresh stock.
    ///
    /// Run immediately before checkout conversion. Any shortfall fails the
    /// whole validation with a per-line message; nothing is silently
    /// truncated.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the authoritative fetch itself fails -
    /// a retryable condition that leaves the cart untouched.
    #[instrument(skip(self, cart), fields(lines = cart.items.len()))]
    pub async fn validate_stock(&self, cart: &LocalCart) -> Result<StockCheckReport, BackendError> {
        let ids: Vec<VariantId> = cart
            .items
            .iter()
            .map(|item| item.product_variant_id.clone())
            .collect();

        // Forced fresh: drop cached figures before asking the backend
        for id in &ids {
            self.cache.invalidate(id).await;
        }
        let levels = self.backend.stock_levels(&ids).await?;
        for (id, info) in &levels {
            self.remember(id, *info).await;
        }

        let mut errors = Vec::new();
        for item in &cart.items {
            let name = &item.product_variant.name;
            match levels.get(&item.product_variant_id) {
                None => errors.push(format!("{name}: stock could not be verified")),
                Some(info) if info.available <= 0 => {
                    errors.push(format!("{name} is out of stock"));
                }
                Some(info) if i64::from(item.quantity) > info.available => {
                    errors.push(format!(
                        "Only {} of {name} available (requested {})",
                        info.available, item.quantity
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(StockCheckReport {
            valid: errors.is_empty(),
            errors,
        })
    }

    async fn remember(&self, id: &VariantId, info: StockInfo) {
        self.cache.insert(id.clone(), info).await;
        self.lock_last_known().insert(id.clone(), info);
    }

    fn lock_last_known(&self) -> std::sync::MutexGuard<'_, HashMap<VariantId, StockInfo>> {
        self.last_known
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::types::{CartItem, StockLevel, VariantSnapshot};
    use sugarloaf_core::{CurrencyCode, ProductId};

    fn reconciler(backend: Arc<MockBackend>) -> StockReconciler<MockBackend> {
        StockReconciler::new(backend, &CartConfig::default())
    }

    fn cart_with(lines: &[(&str, u32)]) -> LocalCart {
        let mut cart = LocalCart::empty(CurrencyCode::USD);
        for (id, quantity) in lines {
            cart.items.push(CartItem {
                product_variant_id: VariantId::new(*id),
                quantity: *quantity,
                product_variant: VariantSnapshot {
                    id: VariantId::new(*id),
                    name: format!("Variant {id}"),
                    price: 1000,
                    stock_level: StockLevel::Quantity(10),
                    product_id: ProductId::new("P_1"),
                    product_slug: "classic-tee".to_string(),
                    options: vec![],
                    featured_asset: None,
                },
            });
        }
        cart.recompute_totals();
        cart
    }

    #[tokio::test]
    async fn test_batch_returns_known_subset() {
        let backend = Arc::new(MockBackend::new());
        backend.set_stock("V_1", 5, 1000);
        let engine = reconciler(backend);

        let levels = engine
            .check_variant_stock(&[VariantId::new("V_1"), VariantId::new("V_absent")])
            .await;
        assert_eq!(levels.get(&VariantId::new("V_1")), Some(&5));
        // Unknown keys are absent, never defaulted to infinity
        assert!(!levels.contains_key(&VariantId::new("V_absent")));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let backend = Arc::new(MockBackend::new());
        backend.set_stock("V_1", 5, 1000);
        let engine = reconciler(backend.clone());

        engine.check_variant_stock(&[VariantId::new("V_1")]).await;
        engine.check_variant_stock(&[VariantId::new("V_1")]).await;
        assert_eq!(backend.stock_call_count(), 1);
    }

    #[tokio::test]
    async fn test_batch_failure_returns_partial() {
        let backend = Arc::new(MockBackend::new());
        backend.set_stock("V_1", 5, 1000);
        let engine = reconciler(backend.clone());

        // Warm the cache for V_1, then break the backend
        engine.check_variant_stock(&[VariantId::new("V_1")]).await;
        backend.fail_stock(true);

        let levels = engine
            .check_variant_stock(&[VariantId::new("V_1"), VariantId::new("V_2")])
            .await;
        assert_eq!(levels.get(&VariantId::new("V_1")), Some(&5));
        assert!(!levels.contains_key(&VariantId::new("V_2")));
    }

    #[tokio::test]
    async fn test_availability_falls_back_to_last_known() {
        let backend = Arc::new(MockBackend::new());
        backend.set_stock("V_1", 5, 1000);
        let engine = reconciler(backend.clone());

        engine.check_variant_stock(&[VariantId::new("V_1")]).await;
        engine.cache.invalidate(&VariantId::new("V_1")).await;
        backend.fail_stock(true);

        let availability = engine.availability(&VariantId::new("V_1"), None).await;
        assert_eq!(availability.quantity, 5);
        assert_eq!(availability.freshness, Freshness::Stale);
    }

    #[tokio::test]
    async fn test_availability_uses_caller_fallback() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_stock(true);
        let engine = reconciler(backend);

        let availability = engine.availability(&VariantId::new("V_1"), Some(3)).await;
        assert_eq!(availability.quantity, 3);
        assert_eq!(availability.freshness, Freshness::Stale);
    }

    #[tokio::test]
    async fn test_availability_unknown_when_nothing_known() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_stock(true);
        let engine = reconciler(backend);

        let availability = engine.availability(&VariantId::new("V_1"), None).await;
        assert_eq!(availability.known(), None);
    }

    #[tokio::test]
    async fn test_validate_stock_reports_every_shortfall() {
        let backend = Arc::new(MockBackend::new());
        backend.set_stock("V_1", 2, 1000);
        backend.set_stock("V_2", 0, 1000);
        let engine = reconciler(backend);

        let cart = cart_with(&[("V_1", 5), ("V_2", 1), ("V_3", 1)]);
        let report = engine.validate_stock(&cart).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors[0].contains("Only 2 of Variant V_1"));
        assert!(report.errors[1].contains("out of stock"));
        assert!(report.errors[2].contains("could not be verified"));
    }

    #[tokio::test]
    async fn test_validate_stock_forces_fresh_fetch() {
        let backend = Arc::new(MockBackend::new());
        backend.set_stock("V_1", 10, 1000);
        let engine = reconciler(backend.clone());

        // Warm the cache, then change the authoritative figure
        engine.check_variant_stock(&[VariantId::new("V_1")]).await;
        backend.set_stock("V_1", 1, 1000);

        let report = engine.validate_stock(&cart_with(&[("V_1", 5)])).await.unwrap();
        assert!(!report.valid, "validation must not trust the cached figure");
    }

    #[tokio::test]
    async fn test_validate_stock_network_failure_is_error() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_stock(true);
        let engine = reconciler(backend);

        let result = engine.validate_stock(&cart_with(&[("V_1", 1)])).await;
        assert!(result.is_err(), "checkout validation never guesses");
    }

    #[tokio::test]
    async fn test_fresh_price_prefers_backend_figure() {
        let backend = Arc::new(MockBackend::new());
        backend.set_stock("V_1", 5, 2222);
        let engine = reconciler(backend);

        assert_eq!(engine.fresh_price(&VariantId::new("V_1")).await, Some(2222));
        assert_eq!(engine.fresh_price(&VariantId::new("V_9")).await, None);
    }
}
