//! Errors of the pyramid pipeline.

use std::path::PathBuf;

use crate::config::ConfigError;
use crate::model::LayerId;
use crate::raster::RasterError;
use crate::status::ParseState;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PyramidError {
    /// Neither the file itself nor any archive member opens as a raster.
    #[error("Could not open rasterfile {path}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("Reprojection to EPSG:{srid} failed: {source}")]
    ReprojectionFailure {
        srid: u32,
        #[source]
        source: RasterError,
    },

    /// A quadrant failed; the zoom level is incomplete.
    #[error("Quadrant {quadrant} at zoom {zoom} failed: {reason}")]
    QuadrantFailure { zoom: u8, quadrant: String, reason: String },

    #[error("Parse of layer {0} was cancelled")]
    Cancelled(LayerId),

    #[error("Raster layer {0} does not exist")]
    LayerNotFound(LayerId),

    #[error("Layer {0} has a raster with an unusable pixel size")]
    InvalidResolution(LayerId),

    #[error("Cannot move parse status from {from} to {to}")]
    InvalidTransition { from: ParseState, to: ParseState },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PyramidError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error aborted the run before any tiles were written.
    #[must_use]
    pub fn is_source_error(&self) -> bool {
        matches!(self, Self::SourceUnreadable { .. } | Self::ReprojectionFailure { .. })
    }
}

pub type PyramidResult<T> = Result<T, PyramidError>;
