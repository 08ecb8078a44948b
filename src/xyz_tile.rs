//! XYZ tile addresses and the pixel buffers produced for them
//!
//! # Example
//!
//! ```rust
//! use cogtile::TileAddress;
//!
//! let address = TileAddress::new(3, 7, 5)?;
//! let bbox = address.mercator_bbox();
//! assert!(bbox.minx < bbox.maxx);
//! # Ok::<(), cogtile::TileError>(())
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, TileError};
use crate::geometry::BoundingBox;
use crate::geometry::projection::{MAX_ZOOM, tile_to_mercator_bbox};
use crate::raster::{SampleType, Samples};

/// One tile of the power-of-two Web Mercator pyramid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileAddress {
    pub zoom: u32,
    pub column: u32,
    pub row: u32,
}

impl TileAddress {
    /// Validated constructor: `zoom <= 30` and `column, row < 2^zoom`
    pub fn new(zoom: u32, column: u32, row: u32) -> Result<Self> {
        let address = Self { zoom, column, row };
        address.validate()?;
        Ok(address)
    }

    /// Check that the address lies inside the pyramid
    pub fn validate(&self) -> Result<()> {
        if self.zoom > MAX_ZOOM {
            return Err(TileError::invalid_request(format!(
                "zoom {} exceeds maximum {MAX_ZOOM}",
                self.zoom
            )));
        }
        let n = 1_u64 << self.zoom;
        if u64::from(self.column) >= n || u64::from(self.row) >= n {
            return Err(TileError::invalid_request(format!(
                "tile {self} outside the {n}x{n} grid of zoom {}",
                self.zoom
            )));
        }
        Ok(())
    }

    /// Projected (EPSG:3857) extent of this tile
    #[must_use]
    pub fn mercator_bbox(&self) -> BoundingBox {
        tile_to_mercator_bbox(self.zoom, self.column, self.row)
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.column, self.row)
    }
}

/// Origin of a tile buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    /// Samples decoded from the raster
    Decoded,
    /// Synthetic presence mask; see [`crate::coverage`]
    Coverage,
    /// All-zero placeholder returned instead of decoding an invalid window
    Empty,
}

/// Square, pixel-interleaved sample buffer for one tile.
///
/// Cloning shares the sample allocation, so every caller of a cached tile
/// receives the same samples.
#[derive(Debug, Clone, PartialEq)]
pub struct TileBuffer {
    pub samples: Arc<Samples>,
    pub width: u32,
    pub height: u32,
    pub bands: usize,
    pub kind: TileKind,
}

impl TileBuffer {
    #[must_use]
    pub fn new(samples: Samples, width: u32, height: u32, bands: usize, kind: TileKind) -> Self {
        Self {
            samples: Arc::new(samples),
            width,
            height,
            bands,
            kind,
        }
    }

    /// All-zero `size x size x bands` buffer
    #[must_use]
    pub fn empty(size: u32, bands: usize, sample_type: SampleType) -> Self {
        let len = pixel_count(size) * bands;
        Self::new(Samples::zeroed(sample_type, len), size, size, bands, TileKind::Empty)
    }

    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Sample of `band` at pixel (`x`, `y`) widened to `f64`
    #[must_use]
    pub fn sample(&self, x: u32, y: u32, band: usize) -> Option<f64> {
        if x >= self.width || y >= self.height || band >= self.bands {
            return None;
        }
        let index = (y as usize * self.width as usize + x as usize) * self.bands + band;
        self.samples.get_f64(index)
    }

    /// True when both buffers point at the same sample allocation
    #[must_use]
    pub fn shares_samples_with(&self, other: &TileBuffer) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }
}

pub(crate) fn pixel_count(size: u32) -> usize {
    size as usize * size as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_validation() {
        assert!(TileAddress::new(0, 0, 0).is_ok());
        assert!(TileAddress::new(3, 7, 7).is_ok());
        assert!(matches!(TileAddress::new(3, 8, 0), Err(TileError::InvalidRequest(_))));
        assert!(TileAddress::new(3, 0, 8).is_err());
        assert!(TileAddress::new(31, 0, 0).is_err());
        assert!(TileAddress::new(30, (1 << 30) - 1, 0).is_ok());
    }

    #[test]
    fn test_address_display() {
        let address = TileAddress::new(10, 163, 395).unwrap();
        assert_eq!(address.to_string(), "10/163/395");
    }

    #[test]
    fn test_mercator_bbox_matches_projection() {
        let address = TileAddress::new(2, 1, 3).unwrap();
        assert_eq!(address.mercator_bbox(), tile_to_mercator_bbox(2, 1, 3));
    }

    #[test]
    fn test_empty_buffer() {
        let tile = TileBuffer::empty(4, 3, SampleType::U8);
        assert_eq!(tile.samples.len(), 48);
        assert!(tile.samples.is_all_zero());
        assert_eq!(tile.kind, TileKind::Empty);
        assert_eq!(tile.pixel_count(), 16);
    }

    #[test]
    fn test_sample_lookup() {
        let samples = Samples::U16((0..8).collect());
        let tile = TileBuffer::new(samples, 2, 2, 2, TileKind::Decoded);
        assert_eq!(tile.sample(0, 0, 0), Some(0.0));
        assert_eq!(tile.sample(1, 0, 1), Some(3.0));
        assert_eq!(tile.sample(1, 1, 1), Some(7.0));
        assert_eq!(tile.sample(2, 0, 0), None);
        assert_eq!(tile.sample(0, 0, 2), None);
    }

    #[test]
    fn test_clones_share_samples() {
        let tile = TileBuffer::empty(2, 1, SampleType::F32);
        let clone = tile.clone();
        assert!(tile.shares_samples_with(&clone));
        assert!(!tile.shares_samples_with(&TileBuffer::empty(2, 1, SampleType::F32)));
    }
}
