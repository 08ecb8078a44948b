//! Normalized per-source metadata
//!
//! [`derive_metadata`] turns the sub-image descriptors of an opened raster into
//! a [`CogMetadata`] record: extent in both projections, value scaling, no-data,
//! band descriptors and the pyramid-level to zoom mapping. [`MetadataResolver`]
//! caches one record per source.

use std::sync::Arc;

use tracing::debug;

use crate::cache::FutureCache;
use crate::config::CacheConfig;
use crate::error::{Result, TileError};
use crate::geometry::BoundingBox;
use crate::geometry::projection::{mercator_bbox_to_geographic, zoom_from_resolution};
use crate::handle_cache::RasterHandleCache;
use crate::raster::{FillValue, RasterHandle, SampleType};

/// Approximate zoom and role of one sub-image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidLevel {
    /// Sub-image index inside the raster
    pub index: usize,
    pub zoom: i32,
    pub is_overview: bool,
    pub is_mask: bool,
}

/// Everything a renderer needs to interpret a source's samples
#[derive(Debug, Clone, PartialEq)]
pub struct CogMetadata {
    pub offset: f64,
    pub scale: f64,
    pub no_data: Option<f64>,
    pub photometric_interpretation: Option<u16>,
    pub bits_per_sample: Vec<u16>,
    pub color_map: Option<Vec<u16>>,
    pub artist: Option<String>,
    pub samples_per_pixel: u16,
    pub sample_type: SampleType,
    /// Extent in longitude/latitude degrees
    pub geographic_bbox: BoundingBox,
    /// Extent in Web Mercator meters
    pub projected_bbox: BoundingBox,
    pub levels: Vec<PyramidLevel>,
    /// Finest zoom among non-mask overviews
    pub max_available_zoom: i32,
    /// Coarsest zoom among non-mask overviews
    pub min_available_zoom: i32,
}

impl CogMetadata {
    /// Fill policy for pixels outside the raster
    #[must_use]
    pub fn fill_value(&self) -> FillValue {
        FillValue::for_no_data(self.no_data)
    }

    #[must_use]
    pub fn bands(&self) -> usize {
        usize::from(self.samples_per_pixel)
    }

    /// Scale and offset applied to a raw sample
    #[must_use]
    pub fn apply_scaling(&self, raw: f64) -> f64 {
        raw * self.scale + self.offset
    }

    /// True when `zoom` is two or more levels coarser than the coarsest overview
    #[must_use]
    pub fn is_below_pyramid(&self, zoom: u32) -> bool {
        i64::from(zoom) < i64::from(self.min_available_zoom) - 1
    }
}

/// Build the metadata record of an opened raster.
///
/// The first sub-image supplies extent, no-data, scaling and band descriptors;
/// absent scale and offset default to 1 and 0. Every sub-image gets a zoom from
/// its resolution. A raster without any non-mask overview has no zoom bounds
/// and is rejected.
pub fn derive_metadata(handle: &dyn RasterHandle) -> Result<CogMetadata> {
    let source_id = handle.identifier();
    let first = handle
        .sub_image_info(0)
        .ok_or_else(|| TileError::metadata(source_id, "raster has no images"))?;

    let projected_bbox = first.bbox;
    if !projected_bbox.is_valid() {
        return Err(TileError::metadata(
            source_id,
            format!("malformed projected extent {:?}", projected_bbox.to_array()),
        ));
    }
    let geographic_bbox = mercator_bbox_to_geographic(&projected_bbox);
    if !geographic_bbox.is_valid() {
        return Err(TileError::metadata(
            source_id,
            format!("malformed geographic extent {:?}", geographic_bbox.to_array()),
        ));
    }

    let mut levels = Vec::with_capacity(handle.sub_image_count());
    for index in 0..handle.sub_image_count() {
        let info = handle.sub_image_info(index).ok_or_else(|| {
            TileError::metadata(source_id, format!("sub-image {index} is missing"))
        })?;
        let zoom = zoom_from_resolution(info.resolution[0]).ok_or_else(|| {
            TileError::metadata(
                source_id,
                format!("sub-image {index} has invalid resolution {}", info.resolution[0]),
            )
        })?;
        levels.push(PyramidLevel {
            index,
            zoom,
            is_overview: info.is_overview(),
            is_mask: info.is_mask(),
        });
    }

    let overview_zooms: Vec<i32> = levels
        .iter()
        .filter(|level| level.is_overview && !level.is_mask)
        .map(|level| level.zoom)
        .collect();
    let (Some(&min_available_zoom), Some(&max_available_zoom)) =
        (overview_zooms.iter().min(), overview_zooms.iter().max())
    else {
        return Err(TileError::metadata(
            source_id,
            "no non-mask overview levels, zoom bounds are undefined",
        ));
    };

    Ok(CogMetadata {
        offset: first.offset.unwrap_or(0.0),
        scale: first.scale.unwrap_or(1.0),
        no_data: first.no_data,
        photometric_interpretation: first.photometric_interpretation,
        bits_per_sample: first.bits_per_sample.clone(),
        color_map: first.color_map.clone(),
        artist: first.artist.clone(),
        samples_per_pixel: first.samples_per_pixel,
        sample_type: first.sample_type,
        geographic_bbox,
        projected_bbox,
        levels,
        max_available_zoom,
        min_available_zoom,
    })
}

/// Cached [`derive_metadata`] per source
pub struct MetadataResolver {
    handles: Arc<RasterHandleCache>,
    cache: FutureCache<String, Arc<CogMetadata>>,
}

impl MetadataResolver {
    #[must_use]
    pub fn new(handles: Arc<RasterHandleCache>, config: CacheConfig) -> Self {
        Self {
            handles,
            cache: FutureCache::new("metadata", config),
        }
    }

    pub async fn get(&self, source_id: &str) -> Result<Arc<CogMetadata>> {
        let handles = Arc::clone(&self.handles);
        let source = source_id.to_string();
        self.cache
            .get_or_insert_with(source.clone(), move || async move {
                let handle = handles.get(&source).await?;
                let metadata = derive_metadata(handle.as_ref())?;
                debug!(
                    source = %source,
                    levels = metadata.levels.len(),
                    min_zoom = metadata.min_available_zoom,
                    max_zoom = metadata.max_available_zoom,
                    "derived metadata"
                );
                Ok(Arc::new(metadata))
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
