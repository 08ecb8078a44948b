//! Web Mercator (EPSG:3857) tile pyramid math.
//!
//! All functions here are pure. Tiles follow the XYZ convention: row 0 is the
//! northernmost row and each zoom level doubles the number of columns and rows.

use std::f64::consts::PI;

use super::{BoundingBox, Point};

/// Half the earth's circumference in Web Mercator meters
pub const HALF_EARTH: f64 = 20_037_508.342_789_244;

/// Full width (and height) of the Web Mercator world square in meters
pub const WORLD_SIZE: f64 = 2.0 * HALF_EARTH;

/// Latitude at which the Web Mercator square ends
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Pixel size of one tile used by the nominal zoom/resolution relation
pub const NOMINAL_TILE_SIZE: f64 = 256.0;

/// Deepest zoom level the pyramid math supports (`2^30` tiles per axis)
pub const MAX_ZOOM: u32 = 30;

/// Projected bounding box of tile `z/x/y`.
#[must_use]
pub fn tile_to_mercator_bbox(z: u32, x: u32, y: u32) -> BoundingBox {
    let n = f64::from(2_u32.pow(z.min(MAX_ZOOM)));
    let tile_size = WORLD_SIZE / n;

    let minx = -HALF_EARTH + f64::from(x) * tile_size;
    let maxx = minx + tile_size;
    let maxy = HALF_EARTH - f64::from(y) * tile_size;
    let miny = maxy - tile_size;

    BoundingBox { minx, miny, maxx, maxy }
}

/// Column and row of the tile at `zoom` containing a projected point.
///
/// Points outside the world square are clamped onto its edge tiles.
#[must_use]
pub fn tile_containing(point: Point, zoom: u32) -> (u32, u32) {
    let n = f64::from(2_u32.pow(zoom.min(MAX_ZOOM)));
    let max_index = n - 1.0;
    let col = ((point.x + HALF_EARTH) / WORLD_SIZE * n).floor().clamp(0.0, max_index);
    let row = ((HALF_EARTH - point.y) / WORLD_SIZE * n).floor().clamp(0.0, max_index);
    (col as u32, row as u32)
}

/// Web Mercator meters to longitude/latitude degrees
#[inline]
#[must_use]
pub fn mercator_to_lon_lat(x: f64, y: f64) -> (f64, f64) {
    let lon = x * 180.0 / HALF_EARTH;
    let y_rad = y * PI / HALF_EARTH;
    let lat = (2.0 * y_rad.exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

/// Longitude/latitude degrees to Web Mercator meters.
///
/// Latitudes beyond [`MAX_LATITUDE`] are clamped so the result stays finite.
#[inline]
#[must_use]
pub fn lon_lat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = lon * HALF_EARTH / 180.0;
    let y = ((90.0 + lat) * PI / 360.0).tan().ln() * HALF_EARTH / PI;
    (x, y)
}

/// Convert a projected bbox to geographic degrees.
#[must_use]
pub fn mercator_bbox_to_geographic(bbox: &BoundingBox) -> BoundingBox {
    let (west, south) = mercator_to_lon_lat(bbox.minx, bbox.miny);
    let (east, north) = mercator_to_lon_lat(bbox.maxx, bbox.maxy);
    BoundingBox::new(west, south, east, north)
}

/// Convert a geographic bbox to Web Mercator meters.
#[must_use]
pub fn geographic_bbox_to_mercator(bbox: &BoundingBox) -> BoundingBox {
    let (minx, miny) = lon_lat_to_mercator(bbox.minx, bbox.miny);
    let (maxx, maxy) = lon_lat_to_mercator(bbox.maxx, bbox.maxy);
    BoundingBox::new(minx, miny, maxx, maxy)
}

/// Nominal ground resolution (meters per pixel) of a zoom level.
#[must_use]
pub fn resolution_for_zoom(zoom: i32) -> f64 {
    WORLD_SIZE / (NOMINAL_TILE_SIZE * 2_f64.powi(zoom))
}

/// Zoom level whose nominal resolution is closest to `resolution`.
///
/// Works in log space so resolutions spanning many orders of magnitude never
/// overflow; halfway cases round away from zero. Returns `None` for
/// non-positive or non-finite input.
#[must_use]
pub fn zoom_from_resolution(resolution: f64) -> Option<i32> {
    if !resolution.is_finite() || resolution <= 0.0 {
        return None;
    }
    let zoom = (WORLD_SIZE / NOMINAL_TILE_SIZE).log2() - resolution.log2();
    let zoom = zoom.round().clamp(f64::from(i32::MIN), f64::from(i32::MAX));
    Some(zoom as i32)
}
