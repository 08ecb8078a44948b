//! Raster-access abstraction consumed by the tile engine.
//!
//! The engine never decodes pixels itself. It talks to a [`RasterOpener`] that
//! produces shared, read-only [`RasterHandle`]s, enumerates their sub-images
//! (pyramid levels) and asks them for resampled windows. [`crate::cog_reader`]
//! provides the GeoTIFF implementation; tests plug in their own.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::geometry::BoundingBox;

/// NewSubfileType bit marking a reduced-resolution (overview) image
pub const SUBFILE_REDUCED_RESOLUTION: u32 = 1;

/// NewSubfileType bit marking a transparency mask
pub const SUBFILE_MASK: u32 = 4;

const SAMPLE_FORMAT_UINT: u16 = 1;
const SAMPLE_FORMAT_INT: u16 = 2;
const SAMPLE_FORMAT_FLOAT: u16 = 3;

/// Numeric type of a raster sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl SampleType {
    #[must_use]
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleType::U8 | SampleType::I8 => 1,
            SampleType::U16 | SampleType::I16 => 2,
            SampleType::U32 | SampleType::I32 | SampleType::F32 => 4,
            SampleType::U64 | SampleType::I64 | SampleType::F64 => 8,
        }
    }

    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, SampleType::F32 | SampleType::F64)
    }

    /// Detect the sample type from BitsPerSample and SampleFormat tags
    #[must_use]
    pub fn from_tags(bits_per_sample: u16, sample_format: u16) -> Option<Self> {
        match (sample_format, bits_per_sample) {
            (SAMPLE_FORMAT_UINT, 8) => Some(SampleType::U8),
            (SAMPLE_FORMAT_UINT, 16) => Some(SampleType::U16),
            (SAMPLE_FORMAT_UINT, 32) => Some(SampleType::U32),
            (SAMPLE_FORMAT_UINT, 64) => Some(SampleType::U64),
            (SAMPLE_FORMAT_INT, 8) => Some(SampleType::I8),
            (SAMPLE_FORMAT_INT, 16) => Some(SampleType::I16),
            (SAMPLE_FORMAT_INT, 32) => Some(SampleType::I32),
            (SAMPLE_FORMAT_INT, 64) => Some(SampleType::I64),
            // Half floats are widened when decoded
            (SAMPLE_FORMAT_FLOAT, 16 | 32) => Some(SampleType::F32),
            (SAMPLE_FORMAT_FLOAT, 64) => Some(SampleType::F64),
            // Default to unsigned if sample format not specified
            (_, 8) => Some(SampleType::U8),
            (_, 16) => Some(SampleType::U16),
            (_, 32) => Some(SampleType::U32),
            _ => None,
        }
    }
}

/// Value written to output pixels that fall outside the raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillValue {
    /// The raster's own finite no-data value, cast to the sample type.
    NoData(f64),
    /// Empty value of the sample type: 0 for integers, `+inf` for floats.
    TypeDefault,
}

impl FillValue {
    /// Fill policy for a raster with the given no-data value.
    ///
    /// Absent and non-finite (NaN) no-data values fall back to the type default.
    #[must_use]
    pub fn for_no_data(no_data: Option<f64>) -> Self {
        match no_data {
            Some(value) if value.is_finite() => FillValue::NoData(value),
            _ => FillValue::TypeDefault,
        }
    }

    /// Concrete fill value for samples of `sample_type`
    #[must_use]
    pub fn value_for(self, sample_type: SampleType) -> f64 {
        match self {
            FillValue::NoData(value) => value,
            FillValue::TypeDefault if sample_type.is_float() => f64::INFINITY,
            FillValue::TypeDefault => 0.0,
        }
    }
}

/// Resampling used when a source window is scaled to the output size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleMethod {
    #[default]
    Nearest,
}

/// Typed, pixel-interleaved sample storage
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! with_samples {
    ($samples:expr, $values:ident => $body:expr) => {
        match $samples {
            Samples::U8($values) => $body,
            Samples::U16($values) => $body,
            Samples::U32($values) => $body,
            Samples::U64($values) => $body,
            Samples::I8($values) => $body,
            Samples::I16($values) => $body,
            Samples::I32($values) => $body,
            Samples::I64($values) => $body,
            Samples::F32($values) => $body,
            Samples::F64($values) => $body,
        }
    };
}

macro_rules! copy_matching {
    ($dst:expr, $src:expr, $dst_idx:expr, $src_idx:expr, $count:expr; $($variant:ident),+) => {
        match ($dst, $src) {
            $(
                (Samples::$variant(dst), Samples::$variant(src)) => {
                    match (
                        dst.get_mut($dst_idx..$dst_idx + $count),
                        src.get($src_idx..$src_idx + $count),
                    ) {
                        (Some(d), Some(s)) => {
                            d.copy_from_slice(s);
                            true
                        }
                        _ => false,
                    }
                }
            )+
            _ => false,
        }
    };
}

impl Samples {
    /// A buffer of `len` samples all set to `fill`.
    #[must_use]
    pub fn filled(sample_type: SampleType, len: usize, fill: FillValue) -> Self {
        let value = fill.value_for(sample_type);
        match sample_type {
            SampleType::U8 => Samples::U8(vec![value as u8; len]),
            SampleType::U16 => Samples::U16(vec![value as u16; len]),
            SampleType::U32 => Samples::U32(vec![value as u32; len]),
            SampleType::U64 => Samples::U64(vec![value as u64; len]),
            SampleType::I8 => Samples::I8(vec![value as i8; len]),
            SampleType::I16 => Samples::I16(vec![value as i16; len]),
            SampleType::I32 => Samples::I32(vec![value as i32; len]),
            SampleType::I64 => Samples::I64(vec![value as i64; len]),
            SampleType::F32 => Samples::F32(vec![value as f32; len]),
            SampleType::F64 => Samples::F64(vec![value; len]),
        }
    }

    /// An all-zero buffer of `len` samples.
    #[must_use]
    pub fn zeroed(sample_type: SampleType, len: usize) -> Self {
        Self::filled(sample_type, len, FillValue::NoData(0.0))
    }

    #[must_use]
    pub fn sample_type(&self) -> SampleType {
        match self {
            Samples::U8(_) => SampleType::U8,
            Samples::U16(_) => SampleType::U16,
            Samples::U32(_) => SampleType::U32,
            Samples::U64(_) => SampleType::U64,
            Samples::I8(_) => SampleType::I8,
            Samples::I16(_) => SampleType::I16,
            Samples::I32(_) => SampleType::I32,
            Samples::I64(_) => SampleType::I64,
            Samples::F32(_) => SampleType::F32,
            Samples::F64(_) => SampleType::F64,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        with_samples!(self, values => values.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the sample storage in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.len() * self.sample_type().bytes_per_sample()
    }

    /// Sample at `index` widened to `f64`
    #[must_use]
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        with_samples!(self, values => values.get(index).map(|&v| v as f64))
    }

    /// Copy `count` consecutive samples from `src[src_idx..]` into `self[dst_idx..]`.
    ///
    /// Returns `false` without writing when the types differ or either range is
    /// out of bounds.
    pub fn copy_from(&mut self, dst_idx: usize, src: &Samples, src_idx: usize, count: usize) -> bool {
        copy_matching!(self, src, dst_idx, src_idx, count; U8, U16, U32, U64, I8, I16, I32, I64, F32, F64)
    }

    /// True when every sample equals zero
    #[must_use]
    pub fn is_all_zero(&self) -> bool {
        with_samples!(self, values => values.iter().all(|&v| v as f64 == 0.0))
    }
}

/// Descriptor of one sub-image (pyramid level or mask) inside a raster
#[derive(Debug, Clone, PartialEq)]
pub struct SubImageInfo {
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u16,
    pub sample_type: SampleType,
    /// Pixel size `[x, y]` in projected units
    pub resolution: [f64; 2],
    /// Extent in projected (Web Mercator) coordinates
    pub bbox: BoundingBox,
    pub no_data: Option<f64>,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    pub photometric_interpretation: Option<u16>,
    pub bits_per_sample: Vec<u16>,
    pub color_map: Option<Vec<u16>>,
    pub artist: Option<String>,
    /// Raw NewSubfileType flags
    pub subfile_type: u32,
}

impl SubImageInfo {
    #[must_use]
    pub fn is_overview(&self) -> bool {
        self.subfile_type & SUBFILE_REDUCED_RESOLUTION != 0
    }

    #[must_use]
    pub fn is_mask(&self) -> bool {
        self.subfile_type & SUBFILE_MASK != 0
    }
}

/// An opened raster, shared read-only by every request for its source.
#[async_trait]
pub trait RasterHandle: Send + Sync {
    /// Identifier the handle was opened from (for logging/errors)
    fn identifier(&self) -> &str;

    fn sub_image_count(&self) -> usize;

    fn sub_image_info(&self, index: usize) -> Option<&SubImageInfo>;

    /// Read `bbox` (projected coordinates) resampled to `width x height`.
    ///
    /// The result is pixel-interleaved with the source's sample type and band
    /// count. Pixels outside the raster receive `fill`.
    async fn read_window(
        &self,
        bbox: BoundingBox,
        width: u32,
        height: u32,
        fill: FillValue,
        resample: ResampleMethod,
    ) -> Result<Samples>;
}

/// Opens raster sources by identifier.
#[async_trait]
pub trait RasterOpener: Send + Sync {
    async fn open(&self, source_id: &str) -> Result<Arc<dyn RasterHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_type_detection() {
        assert_eq!(SampleType::from_tags(8, 1), Some(SampleType::U8));
        assert_eq!(SampleType::from_tags(16, 2), Some(SampleType::I16));
        assert_eq!(SampleType::from_tags(32, 3), Some(SampleType::F32));
        assert_eq!(SampleType::from_tags(16, 0), Some(SampleType::U16));
        assert_eq!(SampleType::from_tags(16, 3), Some(SampleType::F32));
        assert_eq!(SampleType::from_tags(12, 1), None);
        assert_eq!(SampleType::F64.bytes_per_sample(), 8);
    }

    #[test]
    fn test_fill_policy() {
        assert_eq!(FillValue::for_no_data(None), FillValue::TypeDefault);
        assert_eq!(FillValue::for_no_data(Some(f64::NAN)), FillValue::TypeDefault);
        assert_eq!(FillValue::for_no_data(Some(-9999.0)), FillValue::NoData(-9999.0));
    }

    #[test]
    fn test_type_default_fill() {
        let ints = Samples::filled(SampleType::U16, 4, FillValue::TypeDefault);
        assert_eq!(ints, Samples::U16(vec![0; 4]));

        let floats = Samples::filled(SampleType::F32, 2, FillValue::TypeDefault);
        assert_eq!(floats, Samples::F32(vec![f32::INFINITY; 2]));

        assert_eq!(FillValue::TypeDefault.value_for(SampleType::F64), f64::INFINITY);
        assert_eq!(FillValue::TypeDefault.value_for(SampleType::I32), 0.0);
        assert_eq!(FillValue::NoData(-1.0).value_for(SampleType::F32), -1.0);
    }

    #[test]
    fn test_no_data_fill() {
        let samples = Samples::filled(SampleType::I16, 3, FillValue::NoData(-9999.0));
        assert_eq!(samples, Samples::I16(vec![-9999; 3]));
        assert_eq!(samples.get_f64(1), Some(-9999.0));
        assert_eq!(samples.size_bytes(), 6);
    }

    #[test]
    fn test_copy_from() {
        let mut dst = Samples::zeroed(SampleType::U8, 6);
        let src = Samples::U8(vec![1, 2, 3, 4, 5, 6]);
        assert!(dst.copy_from(3, &src, 0, 3));
        assert_eq!(dst, Samples::U8(vec![0, 0, 0, 1, 2, 3]));

        // Out of range and mismatched types are rejected
        assert!(!dst.copy_from(5, &src, 0, 3));
        assert!(!dst.copy_from(0, &Samples::U16(vec![1, 2, 3]), 0, 3));
    }

    #[test]
    fn test_subfile_flags() {
        let mut info = SubImageInfo {
            width: 1,
            height: 1,
            samples_per_pixel: 1,
            sample_type: SampleType::U8,
            resolution: [1.0, 1.0],
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            no_data: None,
            scale: None,
            offset: None,
            photometric_interpretation: None,
            bits_per_sample: vec![8],
            color_map: None,
            artist: None,
            subfile_type: 0,
        };
        assert!(!info.is_overview());
        assert!(!info.is_mask());

        info.subfile_type = SUBFILE_REDUCED_RESOLUTION | SUBFILE_MASK;
        assert!(info.is_overview());
        assert!(info.is_mask());
    }
}
