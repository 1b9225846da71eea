//! Quadrant tiling: one warp per quadrant, then slicing into tiles.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::error::PyramidResult;
use crate::histogram::HistogramAccumulator;
use crate::model::{LayerId, Tile, TileBand, TileRaster};
use crate::raster::{RasterSource, TargetGrid};
use crate::store::TileStore;
use crate::zoom::{tile_bounds, TileRange, ZoomPlanner};

/// Result of one quadrant.
#[derive(Debug, Default)]
pub struct QuadrantOutput {
    pub tiles_written: usize,
    /// Partial histogram, filled only at the finest zoom level
    pub histogram: Option<HistogramAccumulator>,
}

/// Cuts the working raster into tiles for one layer.
#[derive(Clone)]
pub struct QuadrantTiler {
    layer_id: LayerId,
    planner: ZoomPlanner,
    tiles: Arc<dyn TileStore>,
    srid: u32,
}

impl QuadrantTiler {
    #[must_use]
    pub fn new(layer_id: LayerId, planner: ZoomPlanner, tiles: Arc<dyn TileStore>, srid: u32) -> Self {
        Self {
            layer_id,
            planner,
            tiles,
            srid,
        }
    }

    /// Pixel grid that exactly covers `range` at `zoom`.
    #[must_use]
    pub fn target_grid(&self, range: &TileRange, zoom: u8, path: Option<PathBuf>) -> TargetGrid {
        let scale = self.planner.tile_scale(zoom);
        let bounds = tile_bounds(range.min_x, range.min_y, zoom);
        let tile_size = self.planner.tile_size();
        TargetGrid {
            origin: (bounds.minx, bounds.maxy),
            scale: (scale, -scale),
            width: range.width() as usize * tile_size,
            height: range.height() as usize * tile_size,
            srid: Some(self.srid),
            path,
        }
    }

    /// Warp `raster` onto the quadrant grid and store one tile per index.
    ///
    /// When `histogram` is given, every tile's band blocks are added to it
    /// before the tile is stored.
    ///
    /// # Errors
    /// Returns an error if the warp, a band read, or a tile insert fails.
    pub fn process_quadrant(
        &self,
        raster: &dyn RasterSource,
        range: &TileRange,
        zoom: u8,
        mut histogram: Option<&mut HistogramAccumulator>,
        scratch: Option<PathBuf>,
    ) -> PyramidResult<usize> {
        let grid = self.target_grid(range, zoom, scratch);
        let snapped = raster.warp_to(&grid)?;

        let tile_size = self.planner.tile_size();
        let scale = self.planner.tile_scale(zoom);
        let mut written = 0;

        for (x, y) in range.iter() {
            let offset = (
                (x - range.min_x) as usize * tile_size,
                (y - range.min_y) as usize * tile_size,
            );

            let bands = (0..snapped.band_count())
                .map(|band| {
                    Ok(TileBand {
                        data: snapped.read_band(band, offset, (tile_size, tile_size))?,
                        nodata: snapped.nodata(band),
                    })
                })
                .collect::<PyramidResult<Vec<_>>>()?;

            if let Some(hist) = histogram.as_deref_mut() {
                hist.push_tile(&bands);
            }

            let bounds = tile_bounds(x, y, zoom);
            self.tiles.insert(Tile {
                layer_id: self.layer_id,
                x,
                y,
                z: zoom,
                raster: TileRaster {
                    width: tile_size,
                    height: tile_size,
                    origin: (bounds.minx, bounds.maxy),
                    scale: (scale, -scale),
                    srid: self.srid,
                    bands,
                },
            })?;
            written += 1;
        }

        debug!(layer = %self.layer_id, zoom, ?range, tiles = written, "Quadrant tiled");
        Ok(written)
    }
}
