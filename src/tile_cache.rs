use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::cache::FutureCache;
use crate::config::CacheConfig;
use crate::error::{Result, TileError};
use crate::handle_cache::RasterHandleCache;
use crate::raster::{FillValue, ResampleMethod};
use crate::xyz_tile::{TileAddress, TileBuffer, TileKind, pixel_count};

/// Identity of one decoded tile: `source/tile_size/z/x/y`
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TileKey {
    pub source: Arc<str>,
    pub tile_size: u32,
    pub address: TileAddress,
}

impl TileKey {
    #[must_use]
    pub fn new(source: &str, tile_size: u32, address: TileAddress) -> Self {
        TileKey {
            source: Arc::from(source),
            tile_size,
            address,
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source, self.tile_size, self.address)
    }
}

/// What the producer of a missing tile needs to decode it
#[derive(Clone, Copy, Debug)]
pub struct DecodeRequest {
    pub fill: FillValue,
    pub bands: usize,
}

/// Decoded, resampled tiles shared by every caller of the same key
pub struct RasterTileCache {
    handles: Arc<RasterHandleCache>,
    cache: FutureCache<TileKey, TileBuffer>,
}

impl RasterTileCache {
    #[must_use]
    pub fn new(handles: Arc<RasterHandleCache>, config: CacheConfig) -> Self {
        RasterTileCache {
            handles,
            cache: FutureCache::new("tile", config),
        }
    }

    /// Cached tile for `key`, decoding it through the source's handle on a miss
    pub async fn get(&self, key: TileKey, request: DecodeRequest) -> Result<TileBuffer> {
        let handles = Arc::clone(&self.handles);
        self.cache
            .get_or_insert_with(key.clone(), move || decode_tile(handles, key, request))
            .await
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.cache.contains(key)
    }

    /// Drop every tile of `source`, returning how many were removed
    pub fn invalidate_source(&self, source: &str) -> usize {
        self.cache.invalidate_matching(|key| &*key.source == source)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

async fn decode_tile(
    handles: Arc<RasterHandleCache>,
    key: TileKey,
    request: DecodeRequest,
) -> Result<TileBuffer> {
    let handle = handles.get(&key.source).await?;
    let bbox = key.address.mercator_bbox();
    trace!(tile = %key, ?bbox, "decoding tile window");

    let samples = handle
        .read_window(
            bbox,
            key.tile_size,
            key.tile_size,
            request.fill,
            ResampleMethod::Nearest,
        )
        .await?;

    let expected = pixel_count(key.tile_size) * request.bands;
    if samples.len() != expected {
        return Err(TileError::decode(
            &key.source,
            format!(
                "window for {} returned {} samples, expected {expected}",
                key.address,
                samples.len()
            ),
        ));
    }

    Ok(TileBuffer::new(
        samples,
        key.tile_size,
        key.tile_size,
        request.bands,
        TileKind::Decoded,
    ))
}
