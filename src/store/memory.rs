//! In-process store backed by `DashMap`.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{LayerStore, StoreError, StoreResult, TileStore};
use crate::legend::Legend;
use crate::model::{BandMetadata, LayerId, LayerMetadata, RasterLayer, ReprojectedCache, Tile, TileKey};
use crate::status::ParseStatus;

/// Layer records and tiles held in concurrent maps.
///
/// Tile inserts from concurrent quadrant workers only lock the shard of the
/// key being written.
#[derive(Debug, Default)]
pub struct MemoryStore {
    layers: DashMap<LayerId, RasterLayer>,
    metadata: DashMap<LayerId, LayerMetadata>,
    bands: DashMap<(LayerId, usize), BandMetadata>,
    reprojected: DashMap<LayerId, ReprojectedCache>,
    statuses: DashMap<LayerId, ParseStatus>,
    /// Keyed by lowercased title
    legends: DashMap<String, Legend>,
    tiles: DashMap<TileKey, Arc<Tile>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys of a layer's tiles, sorted.
    #[must_use]
    pub fn tile_keys(&self, layer: LayerId) -> Vec<TileKey> {
        let mut keys: Vec<TileKey> = self
            .tiles
            .iter()
            .filter(|e| e.key().layer_id == layer)
            .map(|e| *e.key())
            .collect();
        keys.sort_unstable();
        keys
    }

    fn retain_tiles(&self, mut remove: impl FnMut(&TileKey, &Tile) -> bool) -> usize {
        let mut removed = 0;
        self.tiles.retain(|key, tile| {
            if remove(key, &**tile) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }
}

impl LayerStore for MemoryStore {
    fn layer(&self, id: LayerId) -> StoreResult<Option<RasterLayer>> {
        Ok(self.layers.get(&id).map(|l| l.value().clone()))
    }

    fn layer_by_name(&self, name: &str) -> StoreResult<Option<RasterLayer>> {
        Ok(self
            .layers
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value().clone()))
    }

    fn put_layer(&self, layer: RasterLayer) -> StoreResult<()> {
        self.layers.insert(layer.id, layer);
        Ok(())
    }

    fn metadata(&self, id: LayerId) -> StoreResult<Option<LayerMetadata>> {
        Ok(self.metadata.get(&id).map(|m| m.value().clone()))
    }

    fn put_metadata(&self, id: LayerId, metadata: LayerMetadata) -> StoreResult<()> {
        self.metadata.insert(id, metadata);
        Ok(())
    }

    fn band_metadata(&self, id: LayerId) -> StoreResult<Vec<BandMetadata>> {
        let mut bands: Vec<BandMetadata> = self
            .bands
            .iter()
            .filter(|e| e.key().0 == id)
            .map(|e| e.value().clone())
            .collect();
        bands.sort_by_key(|b| b.band);
        Ok(bands)
    }

    fn put_band_metadata(&self, id: LayerId, metadata: BandMetadata) -> StoreResult<()> {
        self.bands.insert((id, metadata.band), metadata);
        Ok(())
    }

    fn reprojected(&self, id: LayerId) -> StoreResult<Option<ReprojectedCache>> {
        Ok(self.reprojected.get(&id).map(|r| r.value().clone()))
    }

    fn put_reprojected(&self, cache: ReprojectedCache) -> StoreResult<()> {
        self.reprojected.insert(cache.layer_id, cache);
        Ok(())
    }

    fn status(&self, id: LayerId) -> StoreResult<ParseStatus> {
        Ok(self.statuses.get(&id).map(|s| s.value().clone()).unwrap_or_default())
    }

    fn update_status(&self, id: LayerId, update: &mut dyn FnMut(&mut ParseStatus)) -> StoreResult<ParseStatus> {
        let mut status = self.statuses.entry(id).or_default();
        update(&mut *status);
        Ok(status.value().clone())
    }

    fn legend_by_title(&self, title: &str) -> StoreResult<Option<Legend>> {
        Ok(self.legends.get(&title.to_lowercase()).map(|l| l.value().clone()))
    }

    fn put_legend(&self, legend: Legend) -> StoreResult<()> {
        self.legends.insert(legend.title.to_lowercase(), legend);
        Ok(())
    }
}

impl TileStore for MemoryStore {
    fn insert(&self, tile: Tile) -> StoreResult<()> {
        let key = tile.key();
        match self.tiles.entry(key) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(key.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(tile));
                Ok(())
            }
        }
    }

    fn get(&self, key: TileKey) -> StoreResult<Option<Arc<Tile>>> {
        Ok(self.tiles.get(&key).map(|t| Arc::clone(t.value())))
    }

    fn delete_layer(&self, layer: LayerId) -> StoreResult<usize> {
        Ok(self.retain_tiles(|key, _| key.layer_id == layer))
    }

    fn delete_zoom(&self, layer: LayerId, zoom: u8) -> StoreResult<usize> {
        Ok(self.retain_tiles(|key, _| key.layer_id == layer && key.z == zoom))
    }

    fn delete_empty(&self, layer: LayerId) -> StoreResult<usize> {
        Ok(self.retain_tiles(|key, tile| key.layer_id == layer && tile.raster.is_empty()))
    }

    fn count_empty(&self, layer: LayerId) -> StoreResult<usize> {
        Ok(self
            .tiles
            .iter()
            .filter(|e| e.key().layer_id == layer && e.value().raster.is_empty())
            .count())
    }

    fn count(&self, layer: LayerId, zoom: Option<u8>) -> StoreResult<usize> {
        Ok(self
            .tiles
            .iter()
            .filter(|e| e.key().layer_id == layer && zoom.map_or(true, |z| e.key().z == z))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TileBand, TileRaster};

    fn tile(layer: u64, z: u8, x: u32, y: u32, values: Vec<f64>) -> Tile {
        Tile {
            layer_id: LayerId(layer),
            x,
            y,
            z,
            raster: TileRaster {
                width: values.len(),
                height: 1,
                origin: (0.0, 0.0),
                scale: (1.0, -1.0),
                srid: 3857,
                bands: vec![TileBand { data: values, nodata: Some(0.0) }],
            },
        }
    }

    #[test]
    fn test_duplicate_tile_rejected() {
        let store = MemoryStore::new();
        store.insert(tile(1, 3, 4, 5, vec![1.0])).unwrap();
        let err = store.insert(tile(1, 3, 4, 5, vec![2.0])).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        // Same index on another layer is fine
        store.insert(tile(2, 3, 4, 5, vec![2.0])).unwrap();
    }

    #[test]
    fn test_get_tile() {
        let store = MemoryStore::new();
        store.insert(tile(1, 3, 4, 5, vec![1.0])).unwrap();
        let key = TileKey { layer_id: LayerId(1), z: 3, x: 4, y: 5 };
        assert_eq!(store.get(key).unwrap().unwrap().raster.bands[0].data, vec![1.0]);
        assert!(store.get(TileKey { x: 0, ..key }).unwrap().is_none());
    }

    #[test]
    fn test_delete_scopes() {
        let store = MemoryStore::new();
        store.insert(tile(1, 3, 0, 0, vec![1.0])).unwrap();
        store.insert(tile(1, 4, 0, 0, vec![1.0])).unwrap();
        store.insert(tile(1, 4, 1, 0, vec![1.0])).unwrap();
        store.insert(tile(2, 4, 0, 0, vec![1.0])).unwrap();

        assert_eq!(store.delete_zoom(LayerId(1), 4).unwrap(), 2);
        assert_eq!(store.count(LayerId(1), None).unwrap(), 1);
        assert_eq!(store.delete_layer(LayerId(1)).unwrap(), 1);
        assert_eq!(store.count(LayerId(2), Some(4)).unwrap(), 1);
    }

    #[test]
    fn test_delete_empty_only_touches_empty_tiles() {
        let store = MemoryStore::new();
        store.insert(tile(1, 2, 0, 0, vec![0.0, 0.0])).unwrap();
        store.insert(tile(1, 2, 1, 0, vec![0.0, 5.0])).unwrap();
        store.insert(tile(2, 2, 0, 0, vec![0.0, 0.0])).unwrap();

        assert_eq!(store.count_empty(LayerId(1)).unwrap(), 1);
        assert_eq!(store.delete_empty(LayerId(1)).unwrap(), 1);
        assert_eq!(store.tile_keys(LayerId(1)), vec![TileKey { layer_id: LayerId(1), z: 2, x: 1, y: 0 }]);
        assert_eq!(store.count_empty(LayerId(2)).unwrap(), 1);
    }

    #[test]
    fn test_legend_lookup_is_case_insensitive() {
        let store = MemoryStore::new();
        store.put_legend(Legend::new("Land Cover", Vec::new())).unwrap();
        assert!(store.legend_by_title("land cover").unwrap().is_some());
        assert!(store.legend_by_title("LAND COVER").unwrap().is_some());
        assert!(store.legend_by_title("land").unwrap().is_none());
    }

    #[test]
    fn test_band_metadata_sorted() {
        let store = MemoryStore::new();
        for band in [2, 0, 1] {
            store
                .put_band_metadata(LayerId(1), BandMetadata { band, ..BandMetadata::default() })
                .unwrap();
        }
        let bands: Vec<_> = store.band_metadata(LayerId(1)).unwrap().iter().map(|b| b.band).collect();
        assert_eq!(bands, vec![0, 1, 2]);
    }

    #[test]
    fn test_status_defaults_and_updates() {
        let store = MemoryStore::new();
        assert_eq!(store.status(LayerId(9)).unwrap(), ParseStatus::default());
        let updated = store
            .update_status(LayerId(9), &mut |s| s.append_log("hello"))
            .unwrap();
        assert_eq!(updated.log, "hello");
        assert_eq!(store.status(LayerId(9)).unwrap().log, "hello");
    }
}
