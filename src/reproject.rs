//! Bringing a layer's source into the tile grid's reference system.
//!
//! The first parse of a layer whose source is in another CRS transforms it and
//! persists the result as the layer's [`ReprojectedCache`]. Later parses open
//! the cached copy and skip the transform.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{PyramidError, PyramidResult};
use crate::metadata::extract_metadata;
use crate::model::{RasterLayer, ReprojectedCache};
use crate::raster::{RasterDriver, RasterSource};
use crate::staging::StagingArea;
use crate::status::{ParseState, StatusRecorder};
use crate::store::LayerStore;

/// Raster the tiler works from.
pub struct WorkingRaster {
    pub raster: Box<dyn RasterSource>,
    /// Opened from the layer's reprojected cache
    pub from_cache: bool,
    /// Transformed during this run
    pub reprojected: bool,
}

pub struct Reprojector {
    driver: Arc<dyn RasterDriver>,
    layers: Arc<dyn LayerStore>,
    reference_srid: u32,
    cache_dir: PathBuf,
    histogram_bins: usize,
}

impl Reprojector {
    #[must_use]
    pub fn new(
        driver: Arc<dyn RasterDriver>,
        layers: Arc<dyn LayerStore>,
        reference_srid: u32,
        cache_dir: impl Into<PathBuf>,
        histogram_bins: usize,
    ) -> Self {
        Self {
            driver,
            layers,
            reference_srid,
            cache_dir: cache_dir.into(),
            histogram_bins,
        }
    }

    /// Open the layer's raster, preferring a valid reprojected cache.
    ///
    /// Returns the raster and whether it came from the cache.
    ///
    /// # Errors
    /// Returns [`PyramidError::SourceUnreadable`] if the source (or every
    /// archive member) fails to open.
    pub fn open_source(
        &self,
        layer: &RasterLayer,
        staging: &StagingArea,
    ) -> PyramidResult<(Box<dyn RasterSource>, bool)> {
        if let Some(cache) = self.layers.reprojected(layer.id)? {
            if cache.srid == self.reference_srid {
                match self.driver.open(&cache.path) {
                    Ok(raster) if raster.srid() == Some(self.reference_srid) => {
                        debug!(layer = %layer.id, path = %cache.path.display(), "Using reprojected cache");
                        return Ok((raster, true));
                    }
                    Ok(_) => warn!(layer = %layer.id, "Reprojected cache has the wrong spatial reference, ignoring it"),
                    Err(e) => warn!(layer = %layer.id, error = %e, "Reprojected cache is unreadable, ignoring it"),
                }
            }
        }

        let local = staging.materialize(&layer.source)?;
        let candidates = staging.candidates(&local)?;
        let raster = staging.open_first(self.driver.as_ref(), &layer.source, &candidates)?;
        Ok((raster, false))
    }

    /// Transform `raster` into the reference system and cache the result.
    ///
    /// Rasters already in the reference system are returned unchanged with
    /// `false`.
    ///
    /// # Errors
    /// Returns [`PyramidError::ReprojectionFailure`] if the transform or the
    /// cache write fails.
    pub fn to_reference_system(
        &self,
        layer: &RasterLayer,
        raster: Box<dyn RasterSource>,
        recorder: &StatusRecorder,
    ) -> PyramidResult<(Box<dyn RasterSource>, bool)> {
        let srid = self.reference_srid;
        if raster.srid() == Some(srid) {
            return Ok((raster, false));
        }

        recorder.enter(ParseState::Reprojecting, &format!("Transforming raster to SRID {srid}"))?;
        let failure = |source| PyramidError::ReprojectionFailure { srid, source };

        let transformed = raster.reproject_to(srid).map_err(failure)?;

        std::fs::create_dir_all(&self.cache_dir).map_err(|e| PyramidError::io(&self.cache_dir, e))?;
        let path = self.cache_dir.join(format!("layer-{}.tif", layer.id));
        transformed.persist(&path).map_err(failure)?;
        self.layers.put_reprojected(ReprojectedCache {
            layer_id: layer.id,
            path,
            srid,
            created_at: Utc::now(),
        })?;

        recorder.note("Finished transforming raster.")?;
        Ok((transformed, true))
    }

    /// Produce the layer's working raster in the reference system.
    ///
    /// Opens the cache or the source, records metadata when the source itself
    /// was opened (or none exists yet), reprojects if needed and applies the
    /// layer's nodata override to every band.
    ///
    /// # Errors
    /// Returns [`PyramidError::SourceUnreadable`] or
    /// [`PyramidError::ReprojectionFailure`], or a store error.
    pub fn ensure_reference_system(
        &self,
        layer: &RasterLayer,
        staging: &StagingArea,
        recorder: &StatusRecorder,
    ) -> PyramidResult<WorkingRaster> {
        let (mut raster, from_cache) = self.open_source(layer, staging)?;
        apply_nodata(layer, raster.as_mut())?;

        if !from_cache || self.layers.metadata(layer.id)?.is_none() {
            extract_metadata(layer.id, raster.as_ref(), self.layers.as_ref(), self.histogram_bins, recorder)?;
        }

        let (mut raster, reprojected) = self.to_reference_system(layer, raster, recorder)?;
        apply_nodata(layer, raster.as_mut())?;

        Ok(WorkingRaster {
            raster,
            from_cache,
            reprojected,
        })
    }
}

/// Set the layer's nodata override on every band.
fn apply_nodata(layer: &RasterLayer, raster: &mut dyn RasterSource) -> PyramidResult<()> {
    if let Some(nodata) = layer.nodata {
        for band in 0..raster.band_count() {
            raster.set_nodata(band, nodata)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoTransform;
    use crate::model::LayerId;
    use crate::raster::{GeoTiffDriver, MemoryRaster};
    use crate::store::MemoryStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        reprojector: Reprojector,
        layer: RasterLayer,
    }

    fn fixture(srid: u32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.tif");
        MemoryRaster::filled(10, 10, 1, GeoTransform::north_up(5.0, 50.0, 0.1, -0.1), Some(srid), 3.0, Some(0.0))
            .unwrap()
            .persist(&source)
            .unwrap();

        let store = Arc::new(MemoryStore::new());
        let reprojector = Reprojector::new(Arc::new(GeoTiffDriver), store.clone(), 3857, dir.path().join("cache"), 10);
        let layer = RasterLayer::new(1, "source", source).with_nodata(-5.0);
        Fixture {
            _dir: dir,
            store,
            reprojector,
            layer,
        }
    }

    #[test]
    fn test_reprojects_once_and_reuses_cache() {
        let f = fixture(4326);
        let recorder = StatusRecorder::new(LayerId(1), f.store.clone());
        f.store
            .update_status(LayerId(1), &mut |s| s.state = ParseState::Pending)
            .unwrap();

        let staging = StagingArea::new(None).unwrap();
        let first = f.reprojector.ensure_reference_system(&f.layer, &staging, &recorder).unwrap();
        assert!(first.reprojected);
        assert!(!first.from_cache);
        assert_eq!(first.raster.srid(), Some(3857));
        assert_eq!(first.raster.nodata(0), Some(-5.0));

        let cache = f.store.reprojected(LayerId(1)).unwrap().unwrap();
        let bytes = std::fs::read(&cache.path).unwrap();

        let staging = StagingArea::new(None).unwrap();
        let second = f.reprojector.ensure_reference_system(&f.layer, &staging, &recorder).unwrap();
        assert!(!second.reprojected);
        assert!(second.from_cache);
        assert_eq!(f.store.reprojected(LayerId(1)).unwrap().unwrap(), cache);
        assert_eq!(std::fs::read(&cache.path).unwrap(), bytes);

        // Metadata describes the source in its own CRS
        assert_eq!(f.store.metadata(LayerId(1)).unwrap().unwrap().srid, Some(4326));
    }

    #[test]
    fn test_reference_system_source_is_not_cached() {
        let f = fixture(3857);
        let recorder = StatusRecorder::new(LayerId(1), f.store.clone());
        let staging = StagingArea::new(None).unwrap();

        let working = f.reprojector.ensure_reference_system(&f.layer, &staging, &recorder).unwrap();
        assert!(!working.reprojected);
        assert!(f.store.reprojected(LayerId(1)).unwrap().is_none());
        assert!(f.store.metadata(LayerId(1)).unwrap().is_some());
    }

    #[test]
    fn test_unreadable_source() {
        let f = fixture(3857);
        std::fs::write(&f.layer.source, b"garbage").unwrap();
        let recorder = StatusRecorder::new(LayerId(1), f.store.clone());
        let staging = StagingArea::new(None).unwrap();

        let err = f
            .reprojector
            .ensure_reference_system(&f.layer, &staging, &recorder)
            .err()
            .unwrap();
        assert!(matches!(err, PyramidError::SourceUnreadable { .. }));
    }
}
