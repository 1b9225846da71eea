//! Raster dataset capability.
//!
//! The pyramid pipeline never decodes files or warps pixels itself; it talks to
//! a [`RasterSource`] obtained from a [`RasterDriver`]. Two implementations
//! ship with the crate:
//!
//! - [`MemoryRaster`]: band-sequential `f64` pixels held in memory, with
//!   nearest-neighbour warping and proj4rs reprojection
//! - [`GeoTiffDriver`]: opens GeoTIFF files into [`MemoryRaster`]s and
//!   persists rasters back to GeoTIFF

use std::path::{Path, PathBuf};

use crate::geometry::{BoundingBox, GeoTransform};

mod geotiff;
mod memory;

pub use geotiff::{GeoTiffDriver, GeoTiffWriter};
pub use memory::MemoryRaster;

/// Errors raised by the raster capability.
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Unsupported raster: {0}")]
    Unsupported(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Band {band} does not exist (raster has {count} bands)")]
    InvalidBand { band: usize, count: usize },

    #[error("Window {offset:?}+{size:?} exceeds raster size {width}x{height}")]
    OutOfBounds {
        offset: (usize, usize),
        size: (usize, usize),
        width: usize,
        height: usize,
    },

    #[error("Invalid raster data: {0}")]
    InvalidData(String),
}

impl RasterError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type RasterResult<T> = Result<T, RasterError>;

/// Pixel grid a raster is warped onto.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGrid {
    /// Upper-left corner in world coordinates
    pub origin: (f64, f64),
    /// Pixel size; `scale.1` is negative for north-up grids
    pub scale: (f64, f64),
    pub width: usize,
    pub height: usize,
    /// CRS of the grid; `None` keeps the source CRS
    pub srid: Option<u32>,
    /// Scratch location for file-backed implementations
    pub path: Option<PathBuf>,
}

impl TargetGrid {
    #[must_use]
    pub fn geo_transform(&self) -> GeoTransform {
        GeoTransform::north_up(self.origin.0, self.origin.1, self.scale.0, self.scale.1)
    }

    #[must_use]
    pub fn extent(&self) -> BoundingBox {
        self.geo_transform().extent(self.width, self.height)
    }
}

/// Summary statistics of one band, ignoring nodata and NaN pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    /// Number of valid pixels the statistics were computed from
    pub count: u64,
}

impl BandStatistics {
    /// Compute statistics over `values`, skipping `nodata` and NaN.
    ///
    /// Returns `None` when no valid pixel remains.
    #[must_use]
    pub fn from_values(values: &[f64], nodata: Option<f64>) -> Option<Self> {
        let mut count = 0_u64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;

        for &v in values.iter().filter(|v| is_valid(**v, nodata)) {
            count += 1;
            min = min.min(v);
            max = max.max(v);
            sum += v;
            sum_sq += v * v;
        }

        if count == 0 {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let n = count as f64;
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);
        Some(Self {
            min,
            max,
            mean,
            std: variance.sqrt(),
            count,
        })
    }
}

/// Whether a pixel value is data (not NaN, not the band's nodata value).
#[inline]
#[must_use]
pub fn is_valid(value: f64, nodata: Option<f64>) -> bool {
    !value.is_nan() && nodata.map_or(true, |nd| value != nd)
}

/// A georeferenced, multi-band raster dataset.
///
/// Implementations must be shareable across the quadrant workers, so reads
/// take `&self`.
pub trait RasterSource: Send + Sync {
    /// Width in pixels
    fn width(&self) -> usize;

    /// Height in pixels
    fn height(&self) -> usize;

    fn band_count(&self) -> usize;

    /// Affine georeference (origin, scale, skew)
    fn geo_transform(&self) -> GeoTransform;

    /// EPSG code of the raster's spatial reference, if known
    fn srid(&self) -> Option<u32>;

    /// Well-known text of the spatial reference, if known
    fn srs_wkt(&self) -> Option<String> {
        self.srid()
            .and_then(crate::geometry::projection::get_wkt)
            .map(str::to_string)
    }

    /// Nodata value of a band
    fn nodata(&self, band: usize) -> Option<f64>;

    /// Override the nodata value of a band.
    ///
    /// # Errors
    /// Returns [`RasterError::InvalidBand`] for an unknown band.
    fn set_nodata(&mut self, band: usize, value: f64) -> RasterResult<()>;

    /// Read a `size` window of a band starting at pixel `offset`, row-major.
    ///
    /// # Errors
    /// Returns an error if the band does not exist or the window leaves the raster.
    fn read_band(&self, band: usize, offset: (usize, usize), size: (usize, usize)) -> RasterResult<Vec<f64>>;

    /// Resample onto `grid`. Pixels not covered by the source are nodata.
    ///
    /// # Errors
    /// Returns an error if the grid is empty or a coordinate transform fails.
    fn warp_to(&self, grid: &TargetGrid) -> RasterResult<Box<dyn RasterSource>>;

    /// Transform the raster into another spatial reference.
    ///
    /// # Errors
    /// Returns an error if the source has no spatial reference or the
    /// transformation fails.
    fn reproject_to(&self, srid: u32) -> RasterResult<Box<dyn RasterSource>>;

    /// Write the raster to `path` in a format its driver can reopen.
    ///
    /// # Errors
    /// Returns an error on encoding or I/O failure.
    fn persist(&self, path: &Path) -> RasterResult<()>;

    /// Statistics of a whole band.
    ///
    /// # Errors
    /// Returns an error if the band cannot be read.
    fn band_statistics(&self, band: usize) -> RasterResult<Option<BandStatistics>> {
        let values = self.read_band(band, (0, 0), (self.width(), self.height()))?;
        Ok(BandStatistics::from_values(&values, self.nodata(band)))
    }

    /// Extent of the raster in its own CRS
    fn extent(&self) -> BoundingBox {
        self.geo_transform().extent(self.width(), self.height())
    }
}

/// Opens files as [`RasterSource`]s.
pub trait RasterDriver: Send + Sync {
    /// Open a local file.
    ///
    /// # Errors
    /// Returns an error if the file is not a raster this driver understands.
    fn open(&self, path: &Path) -> RasterResult<Box<dyn RasterSource>>;
}
