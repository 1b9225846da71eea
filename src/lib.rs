#![doc = include_str!("../README.md")]
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`zoom`]: Web-mercator grid arithmetic and quadrant planning via [`ZoomPlanner`]
//! - [`raster`]: Raster capability trait, in-memory rasters and the GeoTIFF driver
//! - [`reproject`]: Transform into the reference system with a persisted cache
//! - [`tiler`]: One warp per quadrant, sliced into tiles by [`QuadrantTiler`]
//! - [`histogram`]: Mergeable per-band histograms
//! - [`pyramid`]: The [`PyramidDriver`] state machine and worker fan-out
//! - [`store`]: Layer and tile repositories with an in-memory backend
//! - [`render`]: TMS rendering with colormap precedence via [`TmsRenderer`]
//! - [`tile_cache`]: Byte-bounded LRU of rendered tiles
//! - [`config`]: [`PyramidConfig`] from JSON files and `RASTER_*` variables

// ============================================================================
// Public modules
// ============================================================================

pub mod casting;
pub mod config;
pub mod error;
pub mod geometry;
pub mod histogram;
pub mod legend;
pub mod metadata;
pub mod model;
pub mod pool;
pub mod pyramid;
pub mod raster;
pub mod render;
pub mod reproject;
pub mod staging;
pub mod status;
pub mod store;
pub mod tile_cache;
pub mod tiler;
pub mod zoom;

// ============================================================================
// Tile Grid
// ============================================================================

pub use zoom::{
    TileRange,
    ZoomPlanner,
    tile_bounds,
    world_per_tile,
};

// ============================================================================
// Pipeline
// ============================================================================
// Primary API: PyramidDriver::new(config, layers, tiles, driver)?.parse(id, options).await

pub use pyramid::{
    ParseEvent,
    ParseOptions,
    ParseReport,
    PyramidDriver,
};
pub use reproject::{Reprojector, WorkingRaster};
pub use tiler::{QuadrantOutput, QuadrantTiler};
pub use histogram::{Histogram, HistogramAccumulator};
pub use status::{ParseState, ParseStatus, StatusRecorder};
pub use pool::{JobError, WorkerPool};

// ============================================================================
// Rendering
// ============================================================================
// Primary API: TmsRenderer::new(layers, tiles, 256).render("layer", z, x, y, "png", &request)

pub use render::{
    ImageFormat,
    RenderError,
    RenderedTile,
    TileRequest,
    TmsRenderer,
};
pub use legend::{Colormap, Legend, LegendEntry, LegendError};
pub use tile_cache::RenderCache;

// ============================================================================
// Data Model & Storage
// ============================================================================

pub use model::{
    BandMetadata,
    LayerId,
    LayerMetadata,
    RasterLayer,
    ReprojectedCache,
    Tile,
    TileBand,
    TileKey,
    TileRaster,
};
pub use store::{LayerStore, MemoryStore, StoreError, TileStore};

// ============================================================================
// Raster Abstraction
// ============================================================================

pub use raster::{
    GeoTiffDriver,
    GeoTiffWriter,
    MemoryRaster,
    RasterDriver,
    RasterError,
    RasterSource,
    TargetGrid,
};

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::{BoundingBox, GeoTransform};
pub use geometry::projection::{
    CoordTransformer,
    project_point,
    get_proj_string,
    is_geographic_crs,
};

// ============================================================================
// Configuration & Errors
// ============================================================================

pub use config::{ConfigError, PyramidConfig, ZoomOrder};
pub use error::{PyramidError, PyramidResult};
