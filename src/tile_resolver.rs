//! Tile request orchestration
//!
//! [`TileResolver`] owns the three cache tiers of one engine instance and
//! decides, per request, between three outcomes:
//!
//! - **coverage**: coverage mode is on and the zoom is two or more levels
//!   coarser than the coarsest overview. A synthetic presence mask is built
//!   from the raster extent, no raster data is read.
//! - **empty**: same zoom condition with coverage mode off. An all-zero buffer
//!   is returned instead of attempting a degenerate decode.
//! - **decode**: everything else. The window is read through the tile cache,
//!   so identical concurrent requests share one decode.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cogtile::{CogOpener, ReaderConfig, TileAddress, TileResolver};
//!
//! # async fn run() -> cogtile::Result<()> {
//! let resolver = TileResolver::new(Arc::new(CogOpener::new()), ReaderConfig::from_env())?;
//! let tile = resolver
//!     .resolve_tile("https://example.com/elevation.tif", TileAddress::new(10, 163, 395)?, 256)
//!     .await?;
//! println!("{} bands, scale {}", tile.buffer.bands, tile.metadata.scale);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use crate::config::{ReaderConfig, validate_tile_size};
use crate::coverage;
use crate::error::Result;
use crate::handle_cache::RasterHandleCache;
use crate::metadata::{CogMetadata, MetadataResolver};
use crate::raster::RasterOpener;
use crate::render::{RenderedTile, TileRenderer, render_checked};
use crate::tile_cache::{DecodeRequest, RasterTileCache, TileKey};
use crate::xyz_tile::{TileAddress, TileBuffer};

/// Per-call overrides of the configured defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub tile_size: u32,
    pub coverage: bool,
}

/// A resolved tile and the metadata needed to colorize it
#[derive(Debug, Clone)]
pub struct ResolvedTile {
    pub buffer: TileBuffer,
    pub metadata: Arc<CogMetadata>,
}

/// Entry counts of the cache tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub handles: usize,
    pub metadata: usize,
    pub tiles: usize,
}

/// Tile engine instance. Caches are owned by the instance, never global.
pub struct TileResolver {
    config: ReaderConfig,
    handles: Arc<RasterHandleCache>,
    metadata: MetadataResolver,
    tiles: RasterTileCache,
}

impl TileResolver {
    /// Build an engine, rejecting invalid configuration
    pub fn new(opener: Arc<dyn RasterOpener>, config: ReaderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(opener, config))
    }

    /// Engine with [`ReaderConfig::default`]
    #[must_use]
    pub fn with_defaults(opener: Arc<dyn RasterOpener>) -> Self {
        Self::build(opener, ReaderConfig::default())
    }

    fn build(opener: Arc<dyn RasterOpener>, config: ReaderConfig) -> Self {
        let handles = Arc::new(RasterHandleCache::new(opener, config.handle_cache));
        let metadata = MetadataResolver::new(Arc::clone(&handles), config.metadata_cache);
        let tiles = RasterTileCache::new(Arc::clone(&handles), config.tile_cache);
        Self {
            config,
            handles,
            metadata,
            tiles,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Options of a call that overrides nothing
    #[must_use]
    pub fn default_options(&self) -> ResolveOptions {
        ResolveOptions {
            tile_size: self.config.tile_size,
            coverage: self.config.coverage,
        }
    }

    /// Resolve with the configured tile size and coverage mode
    pub async fn resolve(&self, source: &str, address: TileAddress) -> Result<ResolvedTile> {
        self.resolve_tile_with(source, address, self.default_options())
            .await
    }

    /// Resolve with the configured coverage mode
    pub async fn resolve_tile(
        &self,
        source: &str,
        address: TileAddress,
        tile_size: u32,
    ) -> Result<ResolvedTile> {
        let options = ResolveOptions {
            tile_size,
            ..self.default_options()
        };
        self.resolve_tile_with(source, address, options).await
    }

    pub async fn resolve_tile_with(
        &self,
        source: &str,
        address: TileAddress,
        options: ResolveOptions,
    ) -> Result<ResolvedTile> {
        address.validate()?;
        validate_tile_size(options.tile_size)?;

        let metadata = self.metadata.get(source).await?;

        let buffer = if metadata.is_below_pyramid(address.zoom) {
            if options.coverage {
                debug!(source, tile = %address, "coverage tile below coarsest overview");
                coverage::generate(&address, &metadata.projected_bbox, options.tile_size)
            } else {
                debug!(source, tile = %address, "empty tile below coarsest overview");
                TileBuffer::empty(options.tile_size, metadata.bands(), metadata.sample_type)
            }
        } else {
            let key = TileKey::new(source, options.tile_size, address);
            let request = DecodeRequest {
                fill: metadata.fill_value(),
                bands: metadata.bands(),
            };
            self.tiles.get(key, request).await?
        };

        Ok(ResolvedTile { buffer, metadata })
    }

    /// Resolve several tiles of one source concurrently, results in input order
    pub async fn resolve_tiles(
        &self,
        source: &str,
        addresses: &[TileAddress],
        tile_size: u32,
    ) -> Vec<Result<ResolvedTile>> {
        join_all(
            addresses
                .iter()
                .map(|&address| self.resolve_tile(source, address, tile_size)),
        )
        .await
    }

    pub async fn metadata(&self, source: &str) -> Result<Arc<CogMetadata>> {
        self.metadata.get(source).await
    }

    /// Resolve a tile and colorize it with `renderer`
    pub async fn render_tile(
        &self,
        source: &str,
        address: TileAddress,
        tile_size: u32,
        renderer: &dyn TileRenderer,
    ) -> Result<RenderedTile> {
        let resolved = self.resolve_tile(source, address, tile_size).await?;
        render_checked(renderer, &resolved.buffer, &resolved.metadata)
    }

    /// Drop every cached handle, metadata record and tile of `source`
    pub fn invalidate(&self, source: &str) -> usize {
        let tiles = self.tiles.invalidate_source(source);
        let metadata = usize::from(self.metadata.invalidate(source));
        let handles = usize::from(self.handles.invalidate(source));
        debug!(source, tiles, metadata, handles, "invalidated source");
        tiles + metadata + handles
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            handles: self.handles.len(),
            metadata: self.metadata.len(),
            tiles: self.tiles.len(),
        }
    }
}
