//! # cogtile - cached XYZ tiles from Cloud Optimized GeoTIFF pyramids
//!
//! Serves square pixel tiles cut from a large, remotely hosted, multi-resolution
//! raster to a map client that asks by `zoom/column/row`.
//!
//! ## Features
//!
//! - **Request coalescing**: concurrent identical requests share one open, one
//!   metadata derivation and one decode
//! - **Three cache tiers**: raster handles, metadata and decoded tiles, each
//!   bounded by entry count (LRU) and age (TTL)
//! - **Coverage tiles**: cheap presence masks for zooms far below the coarsest
//!   overview, instead of degenerate decodes
//! - **Range requests**: only the header and chunk bytes a window needs are
//!   fetched, from local files or HTTP
//! - **Pluggable raster access**: the engine talks to [`RasterOpener`] /
//!   [`RasterHandle`]; [`CogOpener`] is the bundled GeoTIFF implementation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cogtile::{CogOpener, ReaderConfig, TileAddress, TileResolver};
//!
//! # async fn run() -> cogtile::Result<()> {
//! let resolver = TileResolver::new(Arc::new(CogOpener::new()), ReaderConfig::default())?;
//!
//! let address = TileAddress::new(10, 163, 395)?;
//! let tile = resolver.resolve_tile("https://example.com/dem.tif", address, 256).await?;
//! println!(
//!     "{:?} tile, {} bands, no-data {:?}",
//!     tile.buffer.kind, tile.buffer.bands, tile.metadata.no_data
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`tile_resolver`]: request orchestration via [`TileResolver`]
//! - [`cache`]: the de-duplicating [`FutureCache`] every tier is built on
//! - [`handle_cache`], [`metadata`], [`tile_cache`]: the three cache tiers
//! - [`coverage`]: synthetic presence tiles
//! - [`geometry`]: coordinate types and Web Mercator pyramid math
//! - [`raster`]: the raster-access traits and typed sample buffers
//! - [`cog_reader`], [`range_reader`], [`chunk_cache`]: the GeoTIFF backend

// ============================================================================
// Public modules
// ============================================================================

pub mod cache;
pub mod chunk_cache;
pub mod cog_reader;
pub mod config;
pub mod coverage;
pub mod error;
pub mod geometry;
pub mod handle_cache;
pub mod metadata;
pub mod range_reader;
pub mod raster;
pub mod render;
pub mod tile_cache;
pub mod tile_resolver;
pub mod xyz_tile;

#[cfg(test)]
mod test_support;

// ============================================================================
// Engine
// ============================================================================

pub use tile_resolver::{
    CacheStats,
    ResolveOptions,
    ResolvedTile,
    TileResolver,
};

pub use render::{RenderedTile, TileRenderer};

// ============================================================================
// Configuration & Errors
// ============================================================================

pub use config::{CacheConfig, ReaderConfig, MAX_TILE_SIZE};

pub use error::{AnyResult, Result, TileError};

// ============================================================================
// Caching
// ============================================================================

pub use cache::FutureCache;
pub use handle_cache::RasterHandleCache;
pub use metadata::{CogMetadata, MetadataResolver, PyramidLevel, derive_metadata};
pub use tile_cache::{RasterTileCache, TileKey};

// ============================================================================
// Tiles
// ============================================================================

pub use coverage::COVERAGE_MARKER;
pub use xyz_tile::{TileAddress, TileBuffer, TileKind};

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::{BoundingBox, Point};
pub use geometry::projection::{
    geographic_bbox_to_mercator,
    lon_lat_to_mercator,
    mercator_bbox_to_geographic,
    mercator_to_lon_lat,
    resolution_for_zoom,
    tile_containing,
    tile_to_mercator_bbox,
    zoom_from_resolution,
};

// ============================================================================
// Raster Abstraction
// ============================================================================

pub use raster::{
    FillValue,
    RasterHandle,
    RasterOpener,
    ResampleMethod,
    SampleType,
    Samples,
    SubImageInfo,
};

// ============================================================================
// GeoTIFF Backend
// ============================================================================

pub use cog_reader::{CogHandle, CogOpener, CogOptions};

pub use range_reader::{
    BlockCachedReader,
    HttpRangeReader,
    LocalRangeReader,
    MemoryRangeReader,
    RangeCursor,
    RangeReader,
    create_range_reader,
};
