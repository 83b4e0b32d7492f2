use dashmap::DashMap;
use std::sync::Arc;

use crate::store::LinkStore;

/// Thread-safe in-memory cache mapping short_code -> original_url.
///
/// Links are immutable and never deleted, so an entry can never go stale and
/// nothing ever has to be evicted. The cache is warmed on startup and
/// backfilled on every store hit.
#[derive(Clone, Debug)]
pub struct LinkCache {
    inner: Arc<DashMap<String, String>>,
}

impl LinkCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    pub fn set(&self, short_code: impl Into<String>, original_url: impl Into<String>) {
        self.inner.insert(short_code.into(), original_url.into());
    }

    /// Look up a short code. Returns a clone of the original URL if present.
    pub fn get(&self, short_code: &str) -> Option<String> {
        self.inner.get(short_code).map(|v| v.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for LinkCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Load every stored link into the cache.
pub async fn warm_cache(store: &dyn LinkStore, cache: &LinkCache) -> anyhow::Result<()> {
    let links = store.all_links().await?;

    let count = links.len();
    for link in links {
        cache.set(link.short_code, link.original_url);
    }

    tracing::info!("Cache warmed with {} link(s)", count);
    Ok(())
}
