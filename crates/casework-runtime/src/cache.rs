//! Cache for the evaluation model catalog.
//!
//! Listing models is a provider round trip whose answer changes rarely, so
//! results are kept for `catalog_ttl`. Concurrent misses for the same
//! provider share one load.

use moka::future::Cache;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::client::ModelError;
use crate::judge::ModelDescriptor;

pub type Catalog = Arc<Vec<ModelDescriptor>>;

/// Model catalogs keyed by provider name.
pub struct CatalogCache {
    cache: Cache<String, Catalog>,
}

impl CatalogCache {
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(64).time_to_live(ttl).build();
        Self { cache }
    }

    /// Cached catalog for `provider`, loading it on a miss. Failed loads are
    /// not cached.
    pub async fn get_or_load<F>(&self, provider: &str, load: F) -> Result<Catalog, ModelError>
    where
        F: Future<Output = Result<Vec<ModelDescriptor>, ModelError>> + Send,
    {
        self.cache
            .try_get_with(provider.to_string(), async move { load.await.map(Arc::new) })
            .await
            .map_err(|e| (*e).clone())
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
