//! Repositories for layer records and tiles.
//!
//! The pipeline only depends on these traits. [`MemoryStore`] implements both
//! on concurrent hash maps; a relational backend would implement the same
//! interface with one table per record type and a unique index on
//! `(layer, z, x, y)` for tiles.

use std::sync::Arc;

use crate::legend::Legend;
use crate::model::{BandMetadata, LayerId, LayerMetadata, RasterLayer, ReprojectedCache, Tile, TileKey};
use crate::status::ParseStatus;

mod memory;

pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Layers and the per-layer records hanging off them.
pub trait LayerStore: Send + Sync {
    fn layer(&self, id: LayerId) -> StoreResult<Option<RasterLayer>>;

    /// Exact match on the layer name.
    fn layer_by_name(&self, name: &str) -> StoreResult<Option<RasterLayer>>;

    /// Insert or replace a layer.
    fn put_layer(&self, layer: RasterLayer) -> StoreResult<()>;

    fn metadata(&self, id: LayerId) -> StoreResult<Option<LayerMetadata>>;

    /// Overwrite the layer's metadata wholesale.
    fn put_metadata(&self, id: LayerId, metadata: LayerMetadata) -> StoreResult<()>;

    /// Band records sorted by band index.
    fn band_metadata(&self, id: LayerId) -> StoreResult<Vec<BandMetadata>>;

    /// Insert or replace the record of `metadata.band`.
    fn put_band_metadata(&self, id: LayerId, metadata: BandMetadata) -> StoreResult<()>;

    fn reprojected(&self, id: LayerId) -> StoreResult<Option<ReprojectedCache>>;

    fn put_reprojected(&self, cache: ReprojectedCache) -> StoreResult<()>;

    /// Current status; a default status for layers never parsed.
    fn status(&self, id: LayerId) -> StoreResult<ParseStatus>;

    /// Apply `update` to the status record atomically and return the result.
    fn update_status(&self, id: LayerId, update: &mut dyn FnMut(&mut ParseStatus)) -> StoreResult<ParseStatus>;

    /// Case-insensitive match on the legend title.
    fn legend_by_title(&self, title: &str) -> StoreResult<Option<Legend>>;

    fn put_legend(&self, legend: Legend) -> StoreResult<()>;
}

/// Tile records keyed by `(layer, z, x, y)`.
pub trait TileStore: Send + Sync {
    /// Insert a new tile.
    ///
    /// Fails with [`StoreError::Duplicate`] if the key already exists.
    fn insert(&self, tile: Tile) -> StoreResult<()>;

    fn get(&self, key: TileKey) -> StoreResult<Option<Arc<Tile>>>;

    /// Delete every tile of a layer, returning how many were removed.
    fn delete_layer(&self, layer: LayerId) -> StoreResult<usize>;

    /// Delete the tiles of one zoom level.
    fn delete_zoom(&self, layer: LayerId, zoom: u8) -> StoreResult<usize>;

    /// Delete tiles whose pixels are nodata in every band.
    fn delete_empty(&self, layer: LayerId) -> StoreResult<usize>;

    fn count_empty(&self, layer: LayerId) -> StoreResult<usize>;

    /// Number of tiles of a layer, optionally restricted to one zoom level.
    fn count(&self, layer: LayerId, zoom: Option<u8>) -> StoreResult<usize>;
}
