//! Synthetic coverage tiles
//!
//! At zoom levels far coarser than the raster's coarsest overview a real decode
//! is wasteful and can produce degenerate windows. A coverage tile instead marks
//! which output pixels fall inside the raster's projected extent, without
//! touching raster data.

use crate::geometry::BoundingBox;
use crate::raster::Samples;
use crate::xyz_tile::{TileAddress, TileBuffer, TileKind, pixel_count};

/// Sample value of pixels covered by the raster
pub const COVERAGE_MARKER: u8 = 255;

/// Build a single-band `u8` coverage tile for `address`.
///
/// The overlap between the tile's bbox and `raster_bbox` is mapped linearly
/// onto `[0, tile_size - 1]` on both axes (rounded to nearest, clamped to the
/// tile) and every pixel inside that inclusive rectangle is set to
/// [`COVERAGE_MARKER`]. Everything else stays zero.
#[must_use]
pub fn generate(address: &TileAddress, raster_bbox: &BoundingBox, tile_size: u32) -> TileBuffer {
    let mut samples = vec![0_u8; pixel_count(tile_size)];

    if tile_size > 0 {
        let tile_bbox = address.mercator_bbox();
        if let Some((x0, y0, x1, y1)) = covered_pixels(&tile_bbox, raster_bbox, tile_size) {
            let width = tile_size as usize;
            for row in y0..=y1 {
                samples[row * width + x0..=row * width + x1].fill(COVERAGE_MARKER);
            }
        }
    }

    TileBuffer::new(Samples::U8(samples), tile_size, tile_size, 1, TileKind::Coverage)
}

/// Inclusive pixel rectangle `(x0, y0, x1, y1)` of the overlap, if any
fn covered_pixels(
    tile_bbox: &BoundingBox,
    raster_bbox: &BoundingBox,
    tile_size: u32,
) -> Option<(usize, usize, usize, usize)> {
    let overlap = tile_bbox.intersection(raster_bbox)?;
    let last = f64::from(tile_size - 1);

    let to_pixel = |fraction: f64| (fraction * last).round().clamp(0.0, last) as usize;

    let x0 = to_pixel((overlap.minx - tile_bbox.minx) / tile_bbox.width());
    let x1 = to_pixel((overlap.maxx - tile_bbox.minx) / tile_bbox.width());
    // Pixel rows grow southwards
    let y0 = to_pixel((tile_bbox.maxy - overlap.maxy) / tile_bbox.height());
    let y1 = to_pixel((tile_bbox.maxy - overlap.miny) / tile_bbox.height());

    Some((x0, y0, x1, y1))
}
