//! In-memory raster with nearest-neighbour resampling.

use std::path::Path;

use tracing::debug;

use super::{GeoTiffWriter, RasterError, RasterResult, RasterSource, TargetGrid};
use crate::casting::f64_to_pixel_index;
use crate::geometry::projection::CoordTransformer;
use crate::geometry::{BoundingBox, GeoTransform};

/// Border samples per edge when estimating a reprojected extent.
const EXTENT_EDGE_SAMPLES: usize = 32;

/// Band-sequential raster held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRaster {
    width: usize,
    height: usize,
    geo_transform: GeoTransform,
    srid: Option<u32>,
    bands: Vec<Vec<f64>>,
    nodata: Vec<Option<f64>>,
}

impl MemoryRaster {
    /// Create a raster from per-band pixel vectors.
    ///
    /// # Errors
    /// Returns [`RasterError::InvalidData`] if there are no bands, a band has the
    /// wrong length, or `nodata` does not have one entry per band.
    pub fn new(
        width: usize,
        height: usize,
        geo_transform: GeoTransform,
        srid: Option<u32>,
        bands: Vec<Vec<f64>>,
        nodata: Vec<Option<f64>>,
    ) -> RasterResult<Self> {
        if bands.is_empty() {
            return Err(RasterError::InvalidData("raster has no bands".to_string()));
        }
        if nodata.len() != bands.len() {
            return Err(RasterError::InvalidData(format!(
                "{} nodata values for {} bands",
                nodata.len(),
                bands.len()
            )));
        }
        if let Some((i, band)) = bands.iter().enumerate().find(|(_, b)| b.len() != width * height) {
            return Err(RasterError::InvalidData(format!(
                "band {i} has {} pixels, expected {width}x{height}",
                band.len()
            )));
        }

        Ok(Self {
            width,
            height,
            geo_transform,
            srid,
            bands,
            nodata,
        })
    }

    /// Raster where every band is filled with one value.
    ///
    /// # Errors
    /// Returns an error if `band_count` is zero.
    pub fn filled(
        width: usize,
        height: usize,
        band_count: usize,
        geo_transform: GeoTransform,
        srid: Option<u32>,
        value: f64,
        nodata: Option<f64>,
    ) -> RasterResult<Self> {
        Self::new(
            width,
            height,
            geo_transform,
            srid,
            vec![vec![value; width * height]; band_count],
            vec![nodata; band_count],
        )
    }

    /// Pixels of one band, row-major.
    #[must_use]
    pub fn band(&self, band: usize) -> Option<&[f64]> {
        self.bands.get(band).map(Vec::as_slice)
    }

    fn check_band(&self, band: usize) -> RasterResult<()> {
        if band < self.bands.len() {
            Ok(())
        } else {
            Err(RasterError::InvalidBand {
                band,
                count: self.bands.len(),
            })
        }
    }

    /// Nearest-neighbour resample onto `grid`.
    ///
    /// Each output pixel takes the source pixel containing its centre. Pixels
    /// whose centre falls outside the source, or fails to transform, get the
    /// band's nodata value (0 when the band has none).
    ///
    /// # Errors
    /// Returns an error for an empty grid, a grid CRS on a raster without one,
    /// or an unsupported CRS pair.
    pub fn resample(&self, grid: &TargetGrid) -> RasterResult<MemoryRaster> {
        if grid.width == 0 || grid.height == 0 {
            return Err(RasterError::InvalidData("target grid has zero dimensions".to_string()));
        }

        let target_srid = grid.srid.or(self.srid);
        let transformer = match (target_srid, self.srid) {
            (Some(target), Some(source)) if target != source => {
                Some(CoordTransformer::new(target, source).map_err(RasterError::Projection)?)
            }
            (Some(target), None) => {
                return Err(RasterError::Unsupported(format!(
                    "cannot warp a raster without spatial reference onto EPSG:{target}"
                )))
            }
            _ => None,
        };

        let out_gt = grid.geo_transform();
        let pixel_count = grid.width * grid.height;
        let mut bands: Vec<Vec<f64>> = self
            .nodata
            .iter()
            .map(|nd| vec![nd.unwrap_or(0.0); pixel_count])
            .collect();

        for row in 0..grid.height {
            for col in 0..grid.width {
                #[allow(clippy::cast_precision_loss)]
                let (wx, wy) = out_gt.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);

                let (sx, sy) = match &transformer {
                    Some(t) => match t.transform(wx, wy) {
                        Ok(p) => p,
                        Err(_) => continue,
                    },
                    None => (wx, wy),
                };

                let Some((px, py)) = self.geo_transform.world_to_pixel(sx, sy) else {
                    continue;
                };
                let (Some(ix), Some(iy)) = (
                    f64_to_pixel_index(px, self.width),
                    f64_to_pixel_index(py, self.height),
                ) else {
                    continue;
                };

                let src_idx = iy * self.width + ix;
                let out_idx = row * grid.width + col;
                for (out, src) in bands.iter_mut().zip(&self.bands) {
                    out[out_idx] = src[src_idx];
                }
            }
        }

        Ok(MemoryRaster {
            width: grid.width,
            height: grid.height,
            geo_transform: out_gt,
            srid: target_srid,
            bands,
            nodata: self.nodata.clone(),
        })
    }

    /// Grid covering exactly this raster's projected extent in `target_srid`
    /// with the same pixel count.
    fn reprojected_grid(&self, source_srid: u32, target_srid: u32) -> RasterResult<TargetGrid> {
        let forward = CoordTransformer::new(source_srid, target_srid).map_err(RasterError::Projection)?;

        #[allow(clippy::cast_precision_loss)]
        let (w, h) = (self.width as f64, self.height as f64);
        let mut samples = Vec::with_capacity(4 * (EXTENT_EDGE_SAMPLES + 1));
        for i in 0..=EXTENT_EDGE_SAMPLES {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f64 / EXTENT_EDGE_SAMPLES as f64;
            samples.push((t * w, 0.0));
            samples.push((t * w, h));
            samples.push((0.0, t * h));
            samples.push((w, t * h));
        }

        let projected = samples.into_iter().filter_map(|(col, row)| {
            let (x, y) = self.geo_transform.pixel_to_world(col, row);
            forward.transform(x, y).ok()
        });
        let bbox = BoundingBox::from_points(projected).ok_or_else(|| {
            RasterError::Projection(format!(
                "no part of the raster could be transformed from EPSG:{source_srid} to EPSG:{target_srid}"
            ))
        })?;

        // Same pixel count as the source, stretched to fit the projected box
        let resolution = (bbox.width() / w, bbox.height() / h);
        if !(resolution.0.is_finite() && resolution.0 > 0.0 && resolution.1.is_finite() && resolution.1 > 0.0) {
            return Err(RasterError::Projection(format!(
                "degenerate extent after transforming to EPSG:{target_srid}"
            )));
        }

        Ok(TargetGrid {
            origin: (bbox.minx, bbox.maxy),
            scale: (resolution.0, -resolution.1),
            width: self.width,
            height: self.height,
            srid: Some(target_srid),
            path: None,
        })
    }
}

impl RasterSource for MemoryRaster {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn geo_transform(&self) -> GeoTransform {
        self.geo_transform
    }

    fn srid(&self) -> Option<u32> {
        self.srid
    }

    fn nodata(&self, band: usize) -> Option<f64> {
        self.nodata.get(band).copied().flatten()
    }

    fn set_nodata(&mut self, band: usize, value: f64) -> RasterResult<()> {
        self.check_band(band)?;
        self.nodata[band] = Some(value);
        Ok(())
    }

    fn read_band(&self, band: usize, offset: (usize, usize), size: (usize, usize)) -> RasterResult<Vec<f64>> {
        self.check_band(band)?;
        let (x0, y0) = offset;
        let (w, h) = size;
        if x0 + w > self.width || y0 + h > self.height {
            return Err(RasterError::OutOfBounds {
                offset,
                size,
                width: self.width,
                height: self.height,
            });
        }

        let data = &self.bands[band];
        let mut out = Vec::with_capacity(w * h);
        for row in y0..y0 + h {
            let start = row * self.width + x0;
            out.extend_from_slice(&data[start..start + w]);
        }
        Ok(out)
    }

    fn warp_to(&self, grid: &TargetGrid) -> RasterResult<Box<dyn RasterSource>> {
        Ok(Box::new(self.resample(grid)?))
    }

    fn reproject_to(&self, srid: u32) -> RasterResult<Box<dyn RasterSource>> {
        let source_srid = self
            .srid
            .ok_or_else(|| RasterError::Unsupported("raster has no spatial reference".to_string()))?;
        if source_srid == srid {
            return Ok(Box::new(self.clone()));
        }

        let grid = self.reprojected_grid(source_srid, srid)?;
        debug!(
            from = source_srid,
            to = srid,
            width = grid.width,
            height = grid.height,
            "Reprojecting in-memory raster"
        );
        Ok(Box::new(self.resample(&grid)?))
    }

    fn persist(&self, path: &Path) -> RasterResult<()> {
        GeoTiffWriter::new(self).write(path)
    }
}
