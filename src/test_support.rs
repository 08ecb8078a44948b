//! In-memory raster collaborators for unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, TileError};
use crate::geometry::BoundingBox;
use crate::geometry::projection::{resolution_for_zoom, tile_to_mercator_bbox};
use crate::raster::{
    FillValue, RasterHandle, RasterOpener, ResampleMethod, SUBFILE_MASK,
    SUBFILE_REDUCED_RESOLUTION, SampleType, Samples, SubImageInfo,
};

/// Sub-image covering `bbox` at the nominal resolution of `zoom`
pub(crate) fn level(zoom: i32, subfile_type: u32, bbox: BoundingBox) -> SubImageInfo {
    let resolution = resolution_for_zoom(zoom);
    SubImageInfo {
        width: (bbox.width() / resolution).round() as u32,
        height: (bbox.height() / resolution).round() as u32,
        samples_per_pixel: 1,
        sample_type: SampleType::U16,
        resolution: [resolution, resolution],
        bbox,
        no_data: None,
        scale: None,
        offset: None,
        photometric_interpretation: Some(1),
        bits_per_sample: vec![16],
        color_map: None,
        artist: None,
        subfile_type,
    }
}

/// Raster handle that records reads and answers with the fill value
pub(crate) struct MockHandle {
    id: String,
    pub images: Vec<SubImageInfo>,
    pub reads: AtomicUsize,
    pub last_fill: Mutex<Option<FillValue>>,
    pub read_delay: Duration,
    pub fail_reads: bool,
}

impl MockHandle {
    /// Full-resolution image at `base_zoom` over the north-east quadrant,
    /// plus one overview per entry of `overview_zooms` and a mask.
    pub(crate) fn pyramid(id: &str, base_zoom: i32, overview_zooms: &[i32]) -> Self {
        let bbox = Self::extent();
        let mut images = vec![level(base_zoom, 0, bbox)];
        images.extend(
            overview_zooms
                .iter()
                .map(|&zoom| level(zoom, SUBFILE_REDUCED_RESOLUTION, bbox)),
        );
        images.push(level(0, SUBFILE_REDUCED_RESOLUTION | SUBFILE_MASK, bbox));
        Self::with_images(id, images)
    }

    pub(crate) fn with_images(id: &str, images: Vec<SubImageInfo>) -> Self {
        Self {
            id: id.to_string(),
            images,
            reads: AtomicUsize::new(0),
            last_fill: Mutex::new(None),
            read_delay: Duration::from_millis(10),
            fail_reads: false,
        }
    }

    pub(crate) fn extent() -> BoundingBox {
        tile_to_mercator_bbox(1, 1, 0)
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RasterHandle for MockHandle {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn sub_image_count(&self) -> usize {
        self.images.len()
    }

    fn sub_image_info(&self, index: usize) -> Option<&SubImageInfo> {
        self.images.get(index)
    }

    async fn read_window(
        &self,
        _bbox: BoundingBox,
        width: u32,
        height: u32,
        fill: FillValue,
        _resample: ResampleMethod,
    ) -> Result<Samples> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        *self.last_fill.lock().unwrap() = Some(fill);
        tokio::time::sleep(self.read_delay).await;
        if self.fail_reads {
            return Err(TileError::decode(&self.id, "corrupt chunk"));
        }
        let info = &self.images[0];
        let len = width as usize * height as usize * usize::from(info.samples_per_pixel);
        Ok(Samples::filled(info.sample_type, len, fill))
    }
}

/// Opener handing out one shared [`MockHandle`], or failing every open
pub(crate) struct MockOpener {
    handle: Option<Arc<MockHandle>>,
    pub opens: AtomicUsize,
}

impl MockOpener {
    pub(crate) fn new(handle: Arc<MockHandle>) -> Self {
        Self {
            handle: Some(handle),
            opens: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            handle: None,
            opens: AtomicUsize::new(0),
        }
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RasterOpener for MockOpener {
    async fn open(&self, source_id: &str) -> Result<Arc<dyn RasterHandle>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        match &self.handle {
            Some(handle) => Ok(Arc::clone(handle) as Arc<dyn RasterHandle>),
            None => Err(TileError::source_open(source_id, "connection refused")),
        }
    }
}
