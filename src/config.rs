//! Engine configuration
//!
//! Defaults reproduce the cache sizes of a browser tile reader: 16 open handles,
//! 16 metadata records and 1024 decoded tiles, each kept for one hour.
//!
//! The configuration can be overlaid from environment variables:
//! - `COGTILE_HANDLE_CACHE_CAPACITY` - open raster handles kept
//! - `COGTILE_METADATA_CACHE_CAPACITY` - metadata records kept
//! - `COGTILE_TILE_CACHE_CAPACITY` - decoded tiles kept
//! - `COGTILE_CACHE_TTL_SECS` - time-to-live applied to all three caches
//! - `COGTILE_TILE_SIZE` - default output tile size in pixels
//! - `COGTILE_COVERAGE` - set to "true" to synthesize coverage tiles below the
//!   coarsest overview

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TileError};

const ONE_HOUR: Duration = Duration::from_secs(60 * 60);

/// Largest tile edge accepted by the engine
pub const MAX_TILE_SIZE: u32 = 4096;

/// Bounds for one cache tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries before the least recently used one is evicted
    pub capacity: usize,
    /// Age after which an entry is treated as absent
    pub ttl: Duration,
}

impl CacheConfig {
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { capacity, ttl }
    }
}

/// Configuration of a [`crate::TileResolver`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub handle_cache: CacheConfig,
    pub metadata_cache: CacheConfig,
    pub tile_cache: CacheConfig,
    /// Output tile edge in pixels used by [`crate::TileResolver::resolve`]
    pub tile_size: u32,
    /// Synthesize coverage tiles for zooms far below the coarsest overview
    pub coverage: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            handle_cache: CacheConfig::new(16, ONE_HOUR),
            metadata_cache: CacheConfig::new(16, ONE_HOUR),
            tile_cache: CacheConfig::new(1024, ONE_HOUR),
            tile_size: 256,
            coverage: false,
        }
    }
}

impl ReaderConfig {
    /// Defaults overlaid with any `COGTILE_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup. Unparseable values are ignored.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(capacity) = parse_var(&lookup, "COGTILE_HANDLE_CACHE_CAPACITY") {
            self.handle_cache.capacity = capacity;
        }
        if let Some(capacity) = parse_var(&lookup, "COGTILE_METADATA_CACHE_CAPACITY") {
            self.metadata_cache.capacity = capacity;
        }
        if let Some(capacity) = parse_var(&lookup, "COGTILE_TILE_CACHE_CAPACITY") {
            self.tile_cache.capacity = capacity;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "COGTILE_CACHE_TTL_SECS") {
            let ttl = Duration::from_secs(secs);
            self.handle_cache.ttl = ttl;
            self.metadata_cache.ttl = ttl;
            self.tile_cache.ttl = ttl;
        }
        if let Some(tile_size) = parse_var(&lookup, "COGTILE_TILE_SIZE") {
            self.tile_size = tile_size;
        }
        if let Some(flag) = lookup("COGTILE_COVERAGE") {
            self.coverage = matches!(flag.to_lowercase().as_str(), "true" | "1" | "yes");
        }
        self
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        for (name, cache) in [
            ("handle", &self.handle_cache),
            ("metadata", &self.metadata_cache),
            ("tile", &self.tile_cache),
        ] {
            if cache.capacity == 0 {
                return Err(TileError::invalid_request(format!(
                    "{name} cache capacity must be at least 1"
                )));
            }
        }
        validate_tile_size(self.tile_size)
    }
}

pub(crate) fn validate_tile_size(tile_size: u32) -> Result<()> {
    if tile_size == 0 || tile_size > MAX_TILE_SIZE {
        return Err(TileError::invalid_request(format!(
            "tile size {tile_size} outside 1..={MAX_TILE_SIZE}"
        )));
    }
    Ok(())
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable configuration value");
            None
        }
    }
}
