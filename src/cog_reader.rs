//! COG (Cloud Optimized `GeoTIFF`) implementation of the raster-access traits
//!
//! - Enumerates every IFD once at open time (typically a few KB of headers)
//! - Reads chunk data through a block-cached range reader, so only the bytes a
//!   window touches are fetched
//! - Keeps decoded chunks in a per-handle LRU shared by neighbouring tiles
//!
//! Geo-referencing comes from the first IFD's `ModelPixelScale` and
//! `ModelTiepoint` tags, which are expected to be in Web Mercator (EPSG:3857).
//! Overviews inherit the first image's origin and scale its resolution by the
//! size ratio.

use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};

use ahash::AHashMap;
use async_trait::async_trait;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::{debug, trace};

use crate::chunk_cache::{ChunkCache, ChunkKey, DEFAULT_CHUNK_CACHE_BYTES};
use crate::error::{AnyResult, Result, TileError};
use crate::geometry::BoundingBox;
use crate::range_reader::{
    BlockCachedReader, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE, RangeCursor, RangeReader,
    create_range_reader,
};
use crate::raster::{
    FillValue, RasterHandle, RasterOpener, ResampleMethod, SampleType, Samples, SubImageInfo,
};

const TAG_NEW_SUBFILE_TYPE: u16 = 254;
const TAG_GDAL_METADATA: u16 = 42112;
const TAG_GDAL_NODATA: u16 = 42113;

const PLANAR_CONFIG_SEPARATE: u16 = 2;

/// Tuning knobs for opened COGs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CogOptions {
    /// Size of each cached byte block
    pub block_size: u64,
    /// Byte blocks kept per handle
    pub block_capacity: usize,
    /// Budget for decoded chunks per handle
    pub chunk_cache_bytes: usize,
}

impl Default for CogOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            chunk_cache_bytes: DEFAULT_CHUNK_CACHE_BYTES,
        }
    }
}

/// Opens local paths, `file://` and `http(s)://` URLs as [`CogHandle`]s
#[derive(Debug, Clone, Default)]
pub struct CogOpener {
    options: CogOptions,
}

impl CogOpener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_options(options: CogOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl RasterOpener for CogOpener {
    async fn open(&self, source_id: &str) -> Result<Arc<dyn RasterHandle>> {
        let source = source_id.to_string();
        let options = self.options;

        let handle = tokio::task::spawn_blocking(move || {
            let reader = create_range_reader(&source)?;
            CogHandle::from_reader(reader, options)
        })
        .await
        .map_err(|e| TileError::source_open(source_id, format!("task join error: {e}")))?
        .map_err(|e| TileError::source_open(source_id, e))?;

        Ok(Arc::new(handle))
    }
}

/// Chunk grid of one IFD
#[derive(Debug, Clone, Copy)]
struct ChunkLayout {
    chunk_width: u32,
    chunk_height: u32,
    chunks_across: u32,
}

impl ChunkLayout {
    /// Chunk index and offset of pixel (`x`, `y`) within the chunk's decoded samples
    fn locate(&self, image_width: u32, x: u32, y: u32) -> (u32, usize) {
        let col = x / self.chunk_width;
        let row = y / self.chunk_height;
        let data_width = self.chunk_width.min(image_width - col * self.chunk_width);
        let within = (y % self.chunk_height) as usize * data_width as usize
            + (x % self.chunk_width) as usize;
        (row * self.chunks_across + col, within)
    }
}

/// Tags of one IFD before geo-referencing is resolved
struct IfdTags {
    width: u32,
    height: u32,
    samples_per_pixel: u16,
    sample_type: SampleType,
    bits_per_sample: Vec<u16>,
    subfile_type: u32,
    photometric_interpretation: Option<u16>,
    color_map: Option<Vec<u16>>,
    artist: Option<String>,
    no_data: Option<f64>,
    scale: Option<f64>,
    offset: Option<f64>,
    pixel_scale: Option<[f64; 2]>,
    tiepoint: Option<[f64; 6]>,
    layout: ChunkLayout,
}

struct DecoderState {
    decoder: Decoder<RangeCursor>,
    current_image: usize,
}

struct CogInner {
    identifier: String,
    images: Vec<SubImageInfo>,
    layouts: Vec<ChunkLayout>,
    decoder: Mutex<DecoderState>,
    chunks: ChunkCache,
}

/// An opened COG. Cloning is cheap and shares the decoder and caches.
#[derive(Clone)]
pub struct CogHandle {
    inner: Arc<CogInner>,
}

impl CogHandle {
    /// Parse every IFD of the TIFF behind `reader`.
    ///
    /// Blocking: performs range reads for the headers.
    pub fn from_reader(reader: Arc<dyn RangeReader>, options: CogOptions) -> AnyResult<Self> {
        let identifier = reader.identifier().to_string();
        let cached: Arc<dyn RangeReader> = Arc::new(BlockCachedReader::with_capacity(
            reader,
            options.block_size,
            options.block_capacity,
        ));

        let mut decoder = Decoder::new(RangeCursor::new(cached))?;
        decoder = decoder.with_limits(Limits::unlimited());

        let mut ifds = vec![read_ifd_tags(&mut decoder)?];
        while decoder.more_images() {
            decoder.next_image()?;
            ifds.push(read_ifd_tags(&mut decoder)?);
        }
        let current_image = ifds.len() - 1;

        let images = georeference(&ifds)?;
        let layouts = ifds.iter().map(|ifd| ifd.layout).collect();

        debug!(
            source = %identifier,
            images = images.len(),
            width = images[0].width,
            height = images[0].height,
            "opened COG"
        );

        Ok(Self {
            inner: Arc::new(CogInner {
                identifier,
                images,
                layouts,
                decoder: Mutex::new(DecoderState {
                    decoder,
                    current_image,
                }),
                chunks: ChunkCache::new(options.chunk_cache_bytes),
            }),
        })
    }

    /// Decoded chunks currently held by this handle
    pub fn cached_chunks(&self) -> usize {
        self.inner.chunks.len()
    }

    fn decode_error(&self, message: impl Display) -> TileError {
        TileError::decode(&self.inner.identifier, message)
    }

    /// Index of the level to read for a window of `bbox` at `width x height`.
    ///
    /// Among the full-resolution image and the non-mask overviews, coarsest
    /// first, pick the first whose resolution is finer than requested.
    fn select_level(&self, bbox: &BoundingBox, width: u32, height: u32) -> usize {
        let requested_x = bbox.width() / f64::from(width);
        let requested_y = bbox.height() / f64::from(height);

        let mut candidates: Vec<usize> = self
            .inner
            .images
            .iter()
            .enumerate()
            .filter(|(index, info)| !info.is_mask() && (*index == 0 || info.is_overview()))
            .map(|(index, _)| index)
            .collect();
        candidates.sort_by_key(|&index| self.inner.images[index].width);

        candidates
            .into_iter()
            .find(|&index| {
                let [res_x, res_y] = self.inner.images[index].resolution;
                requested_x > res_x || requested_y > res_y
            })
            .unwrap_or(0)
    }

    /// Read `bbox` resampled to `width x height`.
    ///
    /// A window narrower than half a source pixel rounds to zero pixels and
    /// fails with [`TileError::Decode`], which heavily over-zoomed requests hit.
    fn read_window_blocking(
        &self,
        bbox: &BoundingBox,
        width: u32,
        height: u32,
        fill: FillValue,
    ) -> Result<Samples> {
        if width == 0 || height == 0 {
            return Err(TileError::invalid_request("window output size must be positive"));
        }
        let level = self.select_level(bbox, width, height);
        let info = &self.inner.images[level];
        let [res_x, res_y] = info.resolution;

        let x0 = ((bbox.minx - info.bbox.minx) / res_x).round();
        let x1 = ((bbox.maxx - info.bbox.minx) / res_x).round();
        let y0 = ((info.bbox.maxy - bbox.maxy) / res_y).round();
        let y1 = ((info.bbox.maxy - bbox.miny) / res_y).round();
        if !(x1 > x0 && y1 > y0) {
            return Err(self.decode_error(format!(
                "empty pixel window [{x0}, {y0}, {x1}, {y1}] at level {level}"
            )));
        }

        trace!(
            source = %self.inner.identifier,
            level,
            window = ?[x0, y0, x1, y1],
            "reading window"
        );

        let columns = nearest_indices(x0, x1, width, info.width);
        let rows = nearest_indices(y0, y1, height, info.height);
        let bands = usize::from(info.samples_per_pixel);
        let layout = self.inner.layouts[level];

        let mut out = Samples::filled(
            info.sample_type,
            width as usize * height as usize * bands,
            fill,
        );
        let mut window_chunks: AHashMap<u32, Arc<Samples>> = AHashMap::new();

        for (out_y, src_y) in rows.iter().enumerate() {
            let Some(src_y) = *src_y else { continue };
            for (out_x, src_x) in columns.iter().enumerate() {
                let Some(src_x) = *src_x else { continue };

                let (chunk_index, within) = layout.locate(info.width, src_x, src_y);
                let chunk = match window_chunks.get(&chunk_index) {
                    Some(chunk) => Arc::clone(chunk),
                    None => {
                        let chunk = self.fetch_chunk(level, chunk_index)?;
                        window_chunks.insert(chunk_index, Arc::clone(&chunk));
                        chunk
                    }
                };

                let dst = (out_y * width as usize + out_x) * bands;
                if !out.copy_from(dst, &chunk, within * bands, bands) {
                    return Err(self.decode_error(format!(
                        "chunk {chunk_index} of level {level} is shorter than its layout"
                    )));
                }
            }
        }

        Ok(out)
    }

    fn fetch_chunk(&self, level: usize, index: u32) -> Result<Arc<Samples>> {
        let key = ChunkKey { level, index };
        if let Some(chunk) = self.inner.chunks.get(&key) {
            return Ok(chunk);
        }

        let chunk = Arc::new(
            self.decode_chunk(level, index)
                .map_err(|e| self.decode_error(format!("chunk {index} of level {level}: {e}")))?,
        );
        self.inner.chunks.insert(key, Arc::clone(&chunk));
        Ok(chunk)
    }

    fn decode_chunk(&self, level: usize, index: u32) -> AnyResult<Samples> {
        let mut state = self
            .inner
            .decoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.current_image != level {
            state.decoder.seek_to_image(level)?;
            state.current_image = level;
        }

        trace!(source = %self.inner.identifier, level, chunk = index, "decoding chunk");
        let samples = samples_from_decoding(state.decoder.read_chunk(index)?);

        let info = &self.inner.images[level];
        if samples.sample_type() != info.sample_type {
            return Err(format!(
                "decoded {:?} samples for a {:?} image",
                samples.sample_type(),
                info.sample_type
            )
            .into());
        }
        Ok(samples)
    }
}

#[async_trait]
impl RasterHandle for CogHandle {
    fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    fn sub_image_count(&self) -> usize {
        self.inner.images.len()
    }

    fn sub_image_info(&self, index: usize) -> Option<&SubImageInfo> {
        self.inner.images.get(index)
    }

    async fn read_window(
        &self,
        bbox: BoundingBox,
        width: u32,
        height: u32,
        fill: FillValue,
        resample: ResampleMethod,
    ) -> Result<Samples> {
        let ResampleMethod::Nearest = resample;
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.read_window_blocking(&bbox, width, height, fill))
            .await
            .map_err(|e| self.decode_error(format!("task join error: {e}")))?
    }
}

/// Source pixel for each of `out` output pixels across window `[start, end)`,
/// or `None` where the window runs past the level's `extent`
fn nearest_indices(start: f64, end: f64, out: u32, extent: u32) -> Vec<Option<u32>> {
    let window = end - start;
    let relative = window / f64::from(out);
    (0..out)
        .map(|i| {
            let within = (relative * f64::from(i)).round().min(window - 1.0);
            let source = start + within;
            (source >= 0.0 && source < f64::from(extent)).then_some(source as u32)
        })
        .collect()
}

fn read_ifd_tags(decoder: &mut Decoder<RangeCursor>) -> AnyResult<IfdTags> {
    let (width, height) = decoder.dimensions()?;

    let samples_per_pixel = decoder
        .find_tag(Tag::SamplesPerPixel)?
        .map(|v| v.into_u16())
        .transpose()?
        .unwrap_or(1);
    let bits_per_sample = decoder
        .find_tag(Tag::BitsPerSample)?
        .map(|v| v.into_u16_vec())
        .transpose()?
        .unwrap_or_else(|| vec![1]);
    let sample_format = decoder
        .find_tag(Tag::SampleFormat)?
        .map(|v| v.into_u16_vec())
        .transpose()?
        .and_then(|formats| formats.first().copied())
        .unwrap_or(1);
    let planar = decoder
        .find_tag(Tag::PlanarConfiguration)?
        .map(|v| v.into_u16())
        .transpose()?
        .unwrap_or(1);
    let subfile_type = decoder
        .find_tag(Tag::from_u16_exhaustive(TAG_NEW_SUBFILE_TYPE))?
        .map(|v| v.into_u32())
        .transpose()?
        .unwrap_or(0);
    let is_mask = subfile_type & crate::raster::SUBFILE_MASK != 0;

    if planar == PLANAR_CONFIG_SEPARATE && samples_per_pixel > 1 && !is_mask {
        return Err("planar (band-separate) images are not supported".into());
    }

    let bits = bits_per_sample.first().copied().unwrap_or(1);
    let sample_type = match SampleType::from_tags(bits, sample_format) {
        Some(sample_type) => sample_type,
        // Masks are commonly 1-bit and never read
        None if is_mask => SampleType::U8,
        None => {
            return Err(format!(
                "unsupported sample layout: {bits} bits, sample format {sample_format}"
            )
            .into());
        }
    };

    let photometric_interpretation = decoder
        .find_tag(Tag::PhotometricInterpretation)?
        .map(|v| v.into_u16())
        .transpose()?;
    let color_map = decoder.get_tag_u16_vec(Tag::ColorMap).ok();
    let artist = decoder.get_tag_ascii_string(Tag::Artist).ok();

    let no_data = decoder
        .get_tag_ascii_string(Tag::from_u16_exhaustive(TAG_GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim_end_matches('\0').trim().parse().ok());
    let gdal_metadata = decoder
        .get_tag_ascii_string(Tag::from_u16_exhaustive(TAG_GDAL_METADATA))
        .ok();
    let scale = gdal_metadata
        .as_deref()
        .and_then(|m| extract_gdal_item(m, "SCALE"));
    let offset = gdal_metadata
        .as_deref()
        .and_then(|m| extract_gdal_item(m, "OFFSET"));

    let pixel_scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .ok()
        .and_then(|v| (v.len() >= 2).then(|| [v[0], v[1]]));
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .ok()
        .and_then(|v| (v.len() >= 6).then(|| [v[0], v[1], v[2], v[3], v[4], v[5]]));

    let (chunk_width, chunk_height) = decoder.chunk_dimensions();
    let chunk_width = chunk_width.max(1);
    let chunk_height = chunk_height.max(1);

    Ok(IfdTags {
        width,
        height,
        samples_per_pixel,
        sample_type,
        bits_per_sample,
        subfile_type,
        photometric_interpretation,
        color_map,
        artist,
        no_data,
        scale,
        offset,
        pixel_scale,
        tiepoint,
        layout: ChunkLayout {
            chunk_width,
            chunk_height,
            chunks_across: width.div_ceil(chunk_width),
        },
    })
}

/// Resolve every IFD's projected extent from the first IFD's geo tags
fn georeference(ifds: &[IfdTags]) -> AnyResult<Vec<SubImageInfo>> {
    let base = &ifds[0];
    let (Some([scale_x, scale_y]), Some(tiepoint)) = (base.pixel_scale, base.tiepoint) else {
        return Err("first image has no ModelPixelScale/ModelTiepoint geo-referencing".into());
    };
    if !(scale_x > 0.0 && scale_y > 0.0) {
        return Err(format!("invalid pixel scale [{scale_x}, {scale_y}]").into());
    }

    let origin_x = tiepoint[3] - tiepoint[0] * scale_x;
    let origin_y = tiepoint[4] + tiepoint[1] * scale_y;

    Ok(ifds
        .iter()
        .map(|ifd| {
            let res_x = scale_x * f64::from(base.width) / f64::from(ifd.width.max(1));
            let res_y = scale_y * f64::from(base.height) / f64::from(ifd.height.max(1));
            SubImageInfo {
                width: ifd.width,
                height: ifd.height,
                samples_per_pixel: ifd.samples_per_pixel,
                sample_type: ifd.sample_type,
                resolution: [res_x, res_y],
                bbox: BoundingBox::new(
                    origin_x,
                    origin_y - f64::from(ifd.height) * res_y,
                    origin_x + f64::from(ifd.width) * res_x,
                    origin_y,
                ),
                no_data: ifd.no_data,
                scale: ifd.scale,
                offset: ifd.offset,
                photometric_interpretation: ifd.photometric_interpretation,
                bits_per_sample: ifd.bits_per_sample.clone(),
                color_map: ifd.color_map.clone(),
                artist: ifd.artist.clone(),
                subfile_type: ifd.subfile_type,
            }
        })
        .collect())
}

/// Value of a `<Item name="KEY">` entry in a GDAL_METADATA XML string
fn extract_gdal_item(metadata: &str, key: &str) -> Option<f64> {
    let needle = format!("name=\"{key}\"");
    let pos = metadata.find(&needle)?;
    let rest = &metadata[pos..];
    let start = rest.find('>')? + 1;
    let rest = &rest[start..];
    let end = rest.find('<')?;
    rest[..end].trim().parse().ok()
}

fn samples_from_decoding(result: DecodingResult) -> Samples {
    match result {
        DecodingResult::U8(data) => Samples::U8(data),
        DecodingResult::U16(data) => Samples::U16(data),
        DecodingResult::U32(data) => Samples::U32(data),
        DecodingResult::U64(data) => Samples::U64(data),
        DecodingResult::I8(data) => Samples::I8(data),
        DecodingResult::I16(data) => Samples::I16(data),
        DecodingResult::I32(data) => Samples::I32(data),
        DecodingResult::I64(data) => Samples::I64(data),
        DecodingResult::F16(data) => Samples::F32(data.into_iter().map(f32::from).collect()),
        DecodingResult::F32(data) => Samples::F32(data),
        DecodingResult::F64(data) => Samples::F64(data),
    }
}
