//! Web-mercator tile grid arithmetic.
//!
//! Zoom 0 is a single tile covering the whole world; every further zoom level
//! halves the pixel size. Tile rows count downwards from the northern edge, as
//! in the XYZ scheme used by web maps.

use serde::{Deserialize, Serialize};

use crate::casting::f64_to_tile_index;
use crate::geometry::{BoundingBox, WEB_MERCATOR_HALF_WORLD, WEB_MERCATOR_WORLD_SIZE};

/// Deepest zoom level considered when matching a native resolution.
pub const MAX_NATIVE_ZOOM: u8 = 22;

/// Deepest zoom level whose tile indices fit the grid's `u32` range.
pub const MAX_TILE_ZOOM: u8 = 31;

/// Inclusive range of tile indices at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRange {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl TileRange {
    #[must_use]
    pub fn new(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Tiles per row
    #[must_use]
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    /// Tiles per column
    #[must_use]
    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    /// Number of tiles in the range.
    #[must_use]
    pub fn count(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }

    /// Tile indices in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> {
        let (min_x, max_x) = (self.min_x, self.max_x);
        (self.min_y..=self.max_y).flat_map(move |y| (min_x..=max_x).map(move |x| (x, y)))
    }
}

/// Plans which tiles and quadrants make up each zoom level of a pyramid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomPlanner {
    tile_size: usize,
    zoom_next_higher: bool,
    quadrant_size: u32,
}

impl ZoomPlanner {
    /// # Arguments
    /// * `tile_size` - Tile edge length in pixels
    /// * `zoom_next_higher` - Whether to build one level finer than native resolution
    /// * `quadrant_size` - Maximum tiles per quadrant side
    #[must_use]
    pub fn new(tile_size: usize, zoom_next_higher: bool, quadrant_size: u32) -> Self {
        Self {
            tile_size: tile_size.max(1),
            zoom_next_higher,
            quadrant_size: quadrant_size.max(1),
        }
    }

    #[must_use]
    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    /// Pixel size in metres of a tile pixel at `zoom`.
    #[must_use]
    pub fn tile_scale(&self, zoom: u8) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let pixels = self.tile_size as f64;
        WEB_MERCATOR_WORLD_SIZE / (2_f64.powi(i32::from(zoom)) * pixels)
    }

    /// Zoom level whose pixel size is closest to `pixel_scale`.
    ///
    /// Returns `None` for a non-positive or non-finite scale. Ties resolve to
    /// the coarser level.
    #[must_use]
    pub fn native_zoom(&self, pixel_scale: f64) -> Option<u8> {
        let scale = pixel_scale.abs();
        if !scale.is_finite() || scale == 0.0 {
            return None;
        }
        (0..=MAX_NATIVE_ZOOM).min_by(|&a, &b| {
            let da = (self.tile_scale(a) - scale).abs();
            let db = (self.tile_scale(b) - scale).abs();
            da.total_cmp(&db)
        })
    }

    /// Finest zoom level to generate for a raster of the given pixel size.
    #[must_use]
    pub fn max_zoom(&self, pixel_scale: f64) -> Option<u8> {
        let native = self.native_zoom(pixel_scale)?;
        Some(if self.zoom_next_higher { native + 1 } else { native })
    }

    /// Inclusive tile index bounds covering `extent` at `zoom`.
    ///
    /// A maximum edge lying exactly on a tile boundary does not pull in the
    /// neighbouring tile. Indices are clamped to the grid, and zoom levels
    /// past [`MAX_TILE_ZOOM`] are planned as [`MAX_TILE_ZOOM`].
    #[must_use]
    pub fn tile_index_range(&self, extent: &BoundingBox, zoom: u8) -> TileRange {
        let zoom = zoom.min(MAX_TILE_ZOOM);
        let tile_world = world_per_tile(zoom);
        let last = (1_u32 << zoom) - 1;

        let min_x = f64_to_tile_index((extent.minx + WEB_MERCATOR_HALF_WORLD) / tile_world, last);
        let min_y = f64_to_tile_index((WEB_MERCATOR_HALF_WORLD - extent.maxy) / tile_world, last);
        let max_x = f64_to_tile_index(((extent.maxx + WEB_MERCATOR_HALF_WORLD) / tile_world).ceil() - 1.0, last);
        let max_y = f64_to_tile_index(((WEB_MERCATOR_HALF_WORLD - extent.miny) / tile_world).ceil() - 1.0, last);

        TileRange::new(min_x, min_y, max_x.max(min_x), max_y.max(min_y))
    }

    /// Number of tiles covering `extent` at `zoom`.
    #[must_use]
    pub fn nr_of_tiles(&self, extent: &BoundingBox, zoom: u8) -> u64 {
        self.tile_index_range(extent, zoom).count()
    }

    /// Split the tile range of `extent` into quadrants of at most
    /// `quadrant_size` × `quadrant_size` tiles.
    ///
    /// Quadrants cover the full range exactly once.
    #[must_use]
    pub fn quadrants(&self, extent: &BoundingBox, zoom: u8) -> Vec<TileRange> {
        let range = self.tile_index_range(extent, zoom);
        let step = self.quadrant_size;
        let mut out = Vec::new();

        let mut x = range.min_x;
        while x <= range.max_x {
            let x_end = x.saturating_add(step - 1).min(range.max_x);
            let mut y = range.min_y;
            while y <= range.max_y {
                let y_end = y.saturating_add(step - 1).min(range.max_y);
                out.push(TileRange::new(x, y, x_end, y_end));
                match y_end.checked_add(1) {
                    Some(next) => y = next,
                    None => break,
                }
            }
            match x_end.checked_add(1) {
                Some(next) => x = next,
                None => break,
            }
        }
        out
    }
}

/// Width of one tile in metres at `zoom`.
#[inline]
#[must_use]
pub fn world_per_tile(zoom: u8) -> f64 {
    WEB_MERCATOR_WORLD_SIZE / 2_f64.powi(i32::from(zoom))
}

/// Web-mercator bounds of tile (`x`, `y`) at `zoom`.
#[must_use]
pub fn tile_bounds(x: u32, y: u32, zoom: u8) -> BoundingBox {
    let size = world_per_tile(zoom);
    let minx = -WEB_MERCATOR_HALF_WORLD + f64::from(x) * size;
    let maxy = WEB_MERCATOR_HALF_WORLD - f64::from(y) * size;
    BoundingBox::new(minx, maxy - size, minx + size, maxy)
}
