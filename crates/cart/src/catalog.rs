//! Product detail cache with a persisted snapshot.
//!
//! Holds the variant-level view a product page needs (price, option values,
//! stock on hand) keyed by product slug, and mirrors it to durable storage
//! inside a versioned envelope so a reopened session starts warm. Stock
//! figures carry their own timestamps; refreshes merge per variant and never
//! replace the catalog wholesale.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use sugarloaf_core::{ProductId, VariantId};

use crate::backend::{BackendError, CommerceBackend};
use crate::config::{CATALOG_SCHEMA_VERSION, CartConfig};
use crate::storage::KeyValueStorage;
use crate::types::{CacheEnvelope, CacheStats};

/// A variant as cached for product-page display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedVariant {
    /// Variant ID in the commerce backend.
    pub id: VariantId,
    /// Display name.
    pub name: String,
    /// Unit price in minor currency units.
    pub price: i64,
    /// Size option value, when the product has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Color option value, when the product has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Units on hand at `stock_updated_at`.
    pub stock_on_hand: i64,
    /// Epoch milliseconds when `stock_on_hand` was last confirmed.
    pub stock_updated_at: i64,
}

/// A product as cached for product-page display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedProduct {
    /// Product ID in the commerce backend.
    pub id: ProductId,
    /// URL slug, the cache key.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Variants in backend order.
    pub variants: Vec<CachedVariant>,
}

impl CachedProduct {
    /// Epoch milliseconds of the stalest stock figure on this product.
    fn oldest_stock_update(&self) -> Option<i64> {
        self.variants.iter().map(|v| v.stock_updated_at).min()
    }
}

struct CatalogState {
    products: HashMap<String, CachedProduct>,
    stats: CacheStats,
}

/// Catalog cache backed by durable storage and refreshed from the backend.
pub struct CatalogCache<B> {
    backend: Arc<B>,
    storage: Arc<dyn KeyValueStorage>,
    key: String,
    catalog_refresh_window_ms: i64,
    min_stock_refresh_interval_ms: i64,
    state: RwLock<CatalogState>,
    // Serializes stock refreshes so concurrent callers collapse into one fetch
    refresh_lock: tokio::sync::Mutex<()>,
}

impl<B: CommerceBackend> CatalogCache<B> {
    /// Build the cache, restoring the persisted snapshot when one exists.
    ///
    /// A missing record starts empty; a malformed or version-mismatched
    /// record is deleted and the cache starts empty.
    #[must_use]
    pub fn new(backend: Arc<B>, storage: Arc<dyn KeyValueStorage>, config: &CartConfig) -> Self {
        let key = config.catalog_storage_key.clone();
        let (products, stats) = Self::load_snapshot(storage.as_ref(), &key);
        Self {
            backend,
            storage,
            key,
            catalog_refresh_window_ms: saturating_ms(config.catalog_refresh_window),
            min_stock_refresh_interval_ms: saturating_ms(config.min_stock_refresh_interval),
            state: RwLock::new(CatalogState { products, stats }),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn load_snapshot(
        storage: &dyn KeyValueStorage,
        key: &str,
    ) -> (HashMap<String, CachedProduct>, CacheStats) {
        let raw = match storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return (HashMap::new(), CacheStats::default()),
            Err(e) => {
                warn!(error = %e, "Catalog storage unreadable; starting with an empty cache");
                return (HashMap::new(), CacheStats::default());
            }
        };
        match CacheEnvelope::<Vec<CachedProduct>>::decode(&raw, CATALOG_SCHEMA_VERSION) {
            Ok(envelope) => {
                let stats = envelope.stats.unwrap_or_default();
                let products = envelope
                    .payload
                    .into_iter()
                    .map(|p| (p.slug.clone(), p))
                    .collect();
                (products, stats)
            }
            Err(e) => {
                warn!(error = %e, "Discarding unusable catalog snapshot");
                if let Err(e) = storage.remove(key) {
                    warn!(error = %e, "Failed to delete unusable catalog snapshot");
                }
                (HashMap::new(), CacheStats::default())
            }
        }
    }

    /// Look up a product by slug, counting the hit or miss.
    #[must_use]
    pub fn product(&self, slug: &str) -> Option<CachedProduct> {
        let mut state = self.write_state();
        if let Some(product) = state.products.get(slug).cloned() {
            state.stats.hits += 1;
            Some(product)
        } else {
            state.stats.misses += 1;
            None
        }
    }

    /// Hit/miss counters accumulated so far (persisted with the snapshot).
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.read_state().stats
    }

    /// Insert or replace a product and persist the snapshot.
    pub fn insert(&self, product: CachedProduct) {
        {
            let mut state = self.write_state();
            state.products.insert(product.slug.clone(), product);
        }
        self.persist();
    }

    /// Distinct sizes currently purchasable for a product.
    #[must_use]
    pub fn in_stock_sizes(&self, slug: &str) -> Vec<String> {
        self.in_stock_option(slug, |v| v.size.as_ref())
    }

    /// Distinct colors currently purchasable for a product.
    #[must_use]
    pub fn in_stock_colors(&self, slug: &str) -> Vec<String> {
        self.in_stock_option(slug, |v| v.color.as_ref())
    }

    fn in_stock_option(
        &self,
        slug: &str,
        option: impl Fn(&CachedVariant) -> Option<&String>,
    ) -> Vec<String> {
        let state = self.read_state();
        let Some(product) = state.products.get(slug) else {
            return Vec::new();
        };
        let mut values = Vec::new();
        for variant in product.variants.iter().filter(|v| v.stock_on_hand > 0) {
            if let Some(value) = option(variant)
                && !values.contains(value)
            {
                values.push(value.clone());
            }
        }
        values
    }

    /// Whether the product's stock view is older than the refresh window.
    ///
    /// Unknown products always want a refresh.
    #[must_use]
    pub fn needs_stock_refresh(&self, slug: &str) -> bool {
        let state = self.read_state();
        let Some(oldest) = state
            .products
            .get(slug)
            .and_then(CachedProduct::oldest_stock_update)
        else {
            return true;
        };
        Utc::now().timestamp_millis() - oldest > self.catalog_refresh_window_ms
    }

    /// Refresh stock (and price) for a product's variants from the backend.
    ///
    /// Refreshes are rate limited: if the product's stock view is younger
    /// than the minimum interval the call is skipped, unless `force` names a
    /// variant, which always fetches. Returns whether a fetch happened.
    ///
    /// Results merge per variant; variants absent from the response keep
    /// their last figures.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the stock query fails; cached figures
    /// are left untouched.
    #[instrument(skip(self), fields(slug = %slug))]
    pub async fn update_stock(
        &self,
        slug: &str,
        force: Option<&VariantId>,
    ) -> Result<bool, BackendError> {
        let _refresh = self.refresh_lock.lock().await;

        // Re-checked under the lock: a concurrent caller may have just
        // refreshed, making this call a skip
        let ids: Vec<VariantId> = {
            let state = self.read_state();
            let Some(product) = state.products.get(slug) else {
                return Ok(false);
            };
            if force.is_none() {
                let now = Utc::now().timestamp_millis();
                let fresh = product
                    .oldest_stock_update()
                    .is_some_and(|oldest| now - oldest < self.min_stock_refresh_interval_ms);
                if fresh {
                    debug!("Stock view is fresh; skipping refresh");
                    return Ok(false);
                }
            }
            product.variants.iter().map(|v| v.id.clone()).collect()
        };

        let levels = self.backend.stock_levels(&ids).await?;
        let now = Utc::now().timestamp_millis();
        {
            let mut state = self.write_state();
            if let Some(product) = state.products.get_mut(slug) {
                for variant in &mut product.variants {
                    if let Some(info) = levels.get(&variant.id) {
                        variant.stock_on_hand = info.available;
                        variant.price = info.price;
                        variant.stock_updated_at = now;
                    }
                }
            }
        }
        self.persist();
        Ok(true)
    }

    /// Write the snapshot through to durable storage.
    ///
    /// Failures degrade to in-memory operation; the next successful persist
    /// heals the record.
    fn persist(&self) {
        let (products, stats) = {
            let state = self.read_state();
            (
                state.products.values().cloned().collect::<Vec<_>>(),
                state.stats,
            )
        };
        let mut envelope = CacheEnvelope::now(CATALOG_SCHEMA_VERSION, products);
        envelope.stats = Some(stats);
        let raw = match envelope.encode() {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to encode catalog snapshot");
                return;
            }
        };
        if let Err(e) = self.storage.set(&self.key, &raw) {
            warn!(error = %e, "Failed to persist catalog snapshot");
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, CatalogState> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, CatalogState> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn saturating_ms(duration: std::time::Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
