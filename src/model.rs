//! Records persisted per raster layer.
//!
//! Ownership between records is expressed through [`LayerId`] rather than
//! object references; the [`store`](crate::store) traits look records up by id.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::raster::is_valid;

/// Identifier of a raster layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One logical raster dataset, created before it is parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterLayer {
    pub id: LayerId,
    pub name: String,
    /// Local path of the source file (a raster or a zip archive)
    pub source: PathBuf,
    /// Nodata value applied to every band, overriding the file's own
    pub nodata: Option<f64>,
    /// Title of the layer's default legend
    pub legend: Option<String>,
}

impl RasterLayer {
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            id: LayerId(id),
            name: name.into(),
            source: source.into(),
            nodata: None,
            legend: None,
        }
    }

    #[must_use]
    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    #[must_use]
    pub fn with_legend(mut self, title: impl Into<String>) -> Self {
        self.legend = Some(title.into());
        self
    }
}

/// Georeference of the layer's source raster.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayerMetadata {
    pub origin_x: f64,
    pub origin_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub skew_x: f64,
    pub skew_y: f64,
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub srid: Option<u32>,
    pub srs_wkt: Option<String>,
    /// Finest zoom level generated for the layer
    pub max_zoom: Option<u8>,
}

/// Statistics and histogram of one band.
///
/// `hist_bins` holds bin edges, one more than `hist_values`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BandMetadata {
    pub band: usize,
    pub nodata: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub hist_bins: Vec<f64>,
    pub hist_values: Vec<u64>,
}

/// Cached copy of a layer's source in the pyramid's reference system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprojectedCache {
    pub layer_id: LayerId,
    pub path: PathBuf,
    pub srid: u32,
    pub created_at: DateTime<Utc>,
}

/// Unique key of a tile record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub layer_id: LayerId,
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer {} tile {}/{}/{}", self.layer_id, self.z, self.x, self.y)
    }
}

/// Pixels of one band in a tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileBand {
    pub data: Vec<f64>,
    pub nodata: Option<f64>,
}

impl TileBand {
    /// Pixels that are neither NaN nor nodata.
    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| is_valid(**v, self.nodata)).count()
    }
}

/// Standalone georeferenced pixel block of a tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRaster {
    pub width: usize,
    pub height: usize,
    /// Upper-left corner in web-mercator metres
    pub origin: (f64, f64),
    pub scale: (f64, f64),
    pub srid: u32,
    pub bands: Vec<TileBand>,
}

impl TileRaster {
    /// Number of valid pixels summed over all bands.
    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.bands.iter().map(TileBand::valid_count).sum()
    }

    /// Whether every pixel of every band is nodata.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bands.iter().all(|b| b.valid_count() == 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub layer_id: LayerId,
    pub x: u32,
    pub y: u32,
    pub z: u8,
    pub raster: TileRaster,
}

impl Tile {
    #[must_use]
    pub fn key(&self) -> TileKey {
        TileKey {
            layer_id: self.layer_id,
            z: self.z,
            x: self.x,
            y: self.y,
        }
    }
}
