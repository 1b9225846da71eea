//! Geometry primitives shared by the planner, the raster capability and the tiler.
//!
//! - [`BoundingBox`]: axis-aligned extent in some CRS
//! - [`GeoTransform`]: affine pixel ↔ world mapping of a raster
//! - [`projection`]: EPSG lookups and point transforms (proj4rs)

pub mod projection;

/// EPSG code of the web-mercator reference system used by the tile grid.
pub const WEB_MERCATOR_SRID: u32 = 3857;

/// Half the width of the web-mercator world, in metres.
pub const WEB_MERCATOR_HALF_WORLD: f64 = 20_037_508.342_789_244;

/// Full width (and height) of the web-mercator world, in metres.
pub const WEB_MERCATOR_WORLD_SIZE: f64 = 2.0 * WEB_MERCATOR_HALF_WORLD;

/// Bounding box in a coordinate reference system
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    /// Create a new bounding box
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

    /// Smallest box containing all given points. `None` for an empty input.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        points
            .into_iter()
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .fold(None, |acc: Option<Self>, (x, y)| {
                Some(match acc {
                    None => Self::new(x, y, x, y),
                    Some(b) => Self::new(b.minx.min(x), b.miny.min(y), b.maxx.max(x), b.maxy.max(y)),
                })
            })
    }
}

/// Affine georeference of a raster.
///
/// Maps pixel `(col, row)` to world coordinates:
///
/// ```text
/// x = origin_x + col * scale_x + row * skew_x
/// y = origin_y + col * skew_y  + row * scale_y
/// ```
///
/// North-up rasters have zero skew and a negative `scale_y`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub skew_x: f64,
    pub skew_y: f64,
}

impl GeoTransform {
    /// North-up transform without skew.
    #[must_use]
    pub fn north_up(origin_x: f64, origin_y: f64, scale_x: f64, scale_y: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            scale_x,
            scale_y,
            skew_x: 0.0,
            skew_y: 0.0,
        }
    }

    /// World coordinate of a (fractional) pixel position.
    #[inline]
    #[must_use]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.scale_x + row * self.skew_x,
            self.origin_y + col * self.skew_y + row * self.scale_y,
        )
    }

    /// Fractional pixel position of a world coordinate, or `None` if the
    /// transform is singular.
    #[inline]
    #[must_use]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.scale_x * self.scale_y - self.skew_x * self.skew_y;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = x - self.origin_x;
        let dy = y - self.origin_y;
        let col = (self.scale_y * dx - self.skew_x * dy) / det;
        let row = (self.scale_x * dy - self.skew_y * dx) / det;
        Some((col, row))
    }

    /// Extent covered by a `width` × `height` pixel grid.
    #[must_use]
    pub fn extent(&self, width: usize, height: usize) -> BoundingBox {
        #[allow(clippy::cast_precision_loss)]
        let (w, h) = (width as f64, height as f64);
        let corners = [
            self.pixel_to_world(0.0, 0.0),
            self.pixel_to_world(w, 0.0),
            self.pixel_to_world(0.0, h),
            self.pixel_to_world(w, h),
        ];
        BoundingBox::from_points(corners)
            .unwrap_or_else(|| BoundingBox::new(self.origin_x, self.origin_y, self.origin_x, self.origin_y))
    }
}
