//! Pipeline configuration.
//!
//! Values come from defaults, a JSON file, or `RASTER_*` environment
//! variables:
//!
//! | Variable                  | Field              | Default               |
//! |---------------------------|--------------------|-----------------------|
//! | `RASTER_TILESIZE`         | `tile_size`        | 256                   |
//! | `RASTER_ZOOM_NEXT_HIGHER` | `zoom_next_higher` | true                  |
//! | `RASTER_QUADRANT_SIZE`    | `quadrant_size`    | 20                    |
//! | `RASTER_WORKDIR`          | `workdir`          | system temp dir       |
//! | `RASTER_REPROJECTED_DIR`  | `reprojected_dir`  | `reprojected`         |
//! | `RASTER_REFERENCE_SRID`   | `reference_srid`   | 3857                  |
//! | `RASTER_WORKERS`          | `workers`          | available parallelism |
//! | `RASTER_HISTOGRAM_BINS`   | `histogram_bins`   | 100                   |
//! | `RASTER_ZOOM_ORDER`       | `zoom_order`       | ascending             |

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::geometry::WEB_MERCATOR_SRID;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Order in which zoom levels are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoomOrder {
    #[default]
    Ascending,
    Descending,
}

impl FromStr for ZoomOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ascending" | "asc" => Ok(Self::Ascending),
            "descending" | "desc" => Ok(Self::Descending),
            other => Err(format!("unknown zoom order {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidConfig {
    /// Tile edge length in pixels
    pub tile_size: usize,
    /// Build one zoom level finer than the raster's native resolution
    pub zoom_next_higher: bool,
    /// Maximum tiles per quadrant side
    pub quadrant_size: u32,
    /// Parent directory of per-run staging areas
    pub workdir: Option<PathBuf>,
    /// Where reprojected copies of sources are cached
    pub reprojected_dir: PathBuf,
    /// EPSG code of the tile grid
    pub reference_srid: u32,
    /// Concurrent quadrant workers
    pub workers: usize,
    /// Equal-width histogram bins per band
    pub histogram_bins: usize,
    pub zoom_order: ZoomOrder,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            tile_size: 256,
            zoom_next_higher: true,
            quadrant_size: 20,
            workdir: None,
            reprojected_dir: PathBuf::from("reprojected"),
            reference_srid: WEB_MERCATOR_SRID,
            workers: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            histogram_bins: 100,
            zoom_order: ZoomOrder::Ascending,
        }
    }
}

fn parse_var<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value }),
    }
}

impl PyramidConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or the result
    /// fails validation.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `RASTER_*` environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable does not parse or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup such as [`std::env::var`].
    ///
    /// # Errors
    /// Returns an error if a value does not parse or validation fails.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RASTER_TILESIZE") {
            self.tile_size = parse_var("RASTER_TILESIZE", v)?;
        }
        if let Some(v) = lookup("RASTER_ZOOM_NEXT_HIGHER") {
            self.zoom_next_higher = parse_bool("RASTER_ZOOM_NEXT_HIGHER", v)?;
        }
        if let Some(v) = lookup("RASTER_QUADRANT_SIZE") {
            self.quadrant_size = parse_var("RASTER_QUADRANT_SIZE", v)?;
        }
        if let Some(v) = lookup("RASTER_WORKDIR") {
            self.workdir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("RASTER_REPROJECTED_DIR") {
            self.reprojected_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RASTER_REFERENCE_SRID") {
            self.reference_srid = parse_var("RASTER_REFERENCE_SRID", v)?;
        }
        if let Some(v) = lookup("RASTER_WORKERS") {
            self.workers = parse_var("RASTER_WORKERS", v)?;
        }
        if let Some(v) = lookup("RASTER_HISTOGRAM_BINS") {
            self.histogram_bins = parse_var("RASTER_HISTOGRAM_BINS", v)?;
        }
        if let Some(v) = lookup("RASTER_ZOOM_ORDER") {
            self.zoom_order = parse_var("RASTER_ZOOM_ORDER", v)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_size == 0 {
            return Err(ConfigError::Invalid("tile_size must be positive".to_string()));
        }
        if self.quadrant_size == 0 {
            return Err(ConfigError::Invalid("quadrant_size must be positive".to_string()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be positive".to_string()));
        }
        if self.histogram_bins == 0 {
            return Err(ConfigError::Invalid("histogram_bins must be positive".to_string()));
        }
        if self.reference_srid != WEB_MERCATOR_SRID {
            return Err(ConfigError::Invalid(format!(
                "reference_srid {} is not supported, the tile grid is EPSG:{WEB_MERCATOR_SRID}",
                self.reference_srid
            )));
        }
        Ok(())
    }
}
