//! Cached, de-duplicated raster opens

use std::sync::Arc;

use tracing::debug;

use crate::cache::FutureCache;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::raster::{RasterHandle, RasterOpener};

/// One shared [`RasterHandle`] per source identifier.
///
/// Concurrent first requests for a source share a single `open`. Evicted
/// handles are released when the last request holding them finishes.
pub struct RasterHandleCache {
    opener: Arc<dyn RasterOpener>,
    cache: FutureCache<String, Arc<dyn RasterHandle>>,
}

impl RasterHandleCache {
    #[must_use]
    pub fn new(opener: Arc<dyn RasterOpener>, config: CacheConfig) -> Self {
        Self {
            opener,
            cache: FutureCache::new("handle", config),
        }
    }

    pub async fn get(&self, source_id: &str) -> Result<Arc<dyn RasterHandle>> {
        let opener = Arc::clone(&self.opener);
        let source = source_id.to_string();
        self.cache
            .get_or_insert_with(source.clone(), move || async move {
                debug!(source = %source, "opening raster source");
                opener.open(&source).await
            })
            .await
    }

    pub fn invalidate(&self, source_id: &str) -> bool {
        self.cache.invalidate(&source_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
