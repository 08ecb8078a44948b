pub mod projection;

/// A simple 2D point with x and y coordinates.
///
/// Used for Web Mercator meters as well as longitude/latitude degrees; the
/// caller knows which one it holds.
///
/// # Example
///
/// ```rust
/// use cogtile::Point;
///
/// let p = Point::new(-122.4, 37.8);
/// assert_eq!(p.x, -122.4);
///
/// let p2: Point = (-122.4, 37.8).into();
/// assert_eq!(p, p2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// X coordinate (longitude for geographic points)
    pub x: f64,
    /// Y coordinate (latitude for geographic points)
    pub y: f64,
}

impl Point {
    #[inline]
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for Point {
    #[inline]
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

/// Axis-aligned bounding box, `[west, south, east, north]`.
///
/// The same type carries projected Web Mercator meters and geographic degrees.
/// A well-formed box has `minx < maxx` and `miny < maxy`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    #[must_use]
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self { minx, miny, maxx, maxy }
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new((self.minx + self.maxx) / 2.0, (self.miny + self.maxy) / 2.0)
    }

    /// True when all edges are finite and the box has positive area.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        [self.minx, self.miny, self.maxx, self.maxy]
            .iter()
            .all(|v| v.is_finite())
            && self.minx < self.maxx
            && self.miny < self.maxy
    }

    /// Overlap of two boxes, or `None` when they do not share any area.
    #[must_use]
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let bbox = BoundingBox {
            minx: self.minx.max(other.minx),
            miny: self.miny.max(other.miny),
            maxx: self.maxx.min(other.maxx),
            maxy: self.maxy.min(other.maxy),
        };
        (bbox.minx < bbox.maxx && bbox.miny < bbox.maxy).then_some(bbox)
    }

    #[must_use]
    pub fn to_array(&self) -> [f64; 4] {
        [self.minx, self.miny, self.maxx, self.maxy]
    }
}

impl From<[f64; 4]> for BoundingBox {
    #[inline]
    fn from([minx, miny, maxx, maxy]: [f64; 4]) -> Self {
        Self::new(minx, miny, maxx, maxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_from_tuple() {
        let p: Point = (5.0, 10.0).into();
        assert_eq!(p, Point::new(5.0, 10.0));
    }

    #[test]
    fn test_bbox_dimensions() {
        let bbox = BoundingBox::new(-10.0, -5.0, 10.0, 5.0);
        assert_eq!(bbox.width(), 20.0);
        assert_eq!(bbox.height(), 10.0);
        assert_eq!(bbox.center(), Point::new(0.0, 0.0));
        assert!(bbox.is_valid());
    }

    #[test]
    fn test_bbox_invalid() {
        assert!(!BoundingBox::new(1.0, 0.0, 0.0, 1.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, f64::INFINITY, 1.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, 0.0, 1.0).is_valid());
    }

    #[test]
    fn test_bbox_intersection() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, -5.0, 15.0, 5.0);
        let i = a.intersection(&b).unwrap();
        assert_eq!(i.to_array(), [5.0, 0.0, 10.0, 5.0]);

        let c = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert!(a.intersection(&c).is_none());

        // Touching edges share no area
        let d = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
        assert!(a.intersection(&d).is_none());
    }

    #[test]
    fn test_bbox_from_array() {
        let bbox: BoundingBox = [1.0, 2.0, 3.0, 4.0].into();
        assert_eq!(bbox.to_array(), [1.0, 2.0, 3.0, 4.0]);
    }
}
