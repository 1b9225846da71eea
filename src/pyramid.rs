//! Pyramid driver.
//!
//! A parse moves a layer through
//! `Pending → OpeningSource → Reprojecting → CreatingTiles(z)… →
//! DroppingEmptyTiles → Finished`
//! (`Failed` from anywhere). Each zoom level fans its quadrants out to the
//! [`WorkerPool`] and waits for all of them before the next level starts.
//! At the finest level every quadrant returns a partial histogram and the
//! driver sums them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{PyramidConfig, ZoomOrder};
use crate::error::{PyramidError, PyramidResult};
use crate::geometry::BoundingBox;
use crate::histogram::HistogramAccumulator;
use crate::model::{LayerId, RasterLayer};
use crate::pool::{JobError, WorkerPool};
use crate::raster::{RasterDriver, RasterSource};
use crate::reproject::{Reprojector, WorkingRaster};
use crate::staging::StagingArea;
use crate::status::{ParseState, StatusRecorder};
use crate::store::{LayerStore, TileStore};
use crate::tiler::{QuadrantOutput, QuadrantTiler};
use crate::zoom::ZoomPlanner;

const EVENT_CAPACITY: usize = 64;

/// Notifications for downstream consumers such as render caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    Finished { layer_id: LayerId },
    Failed { layer_id: LayerId, message: String },
    TilesDropped { layer_id: LayerId },
}

impl ParseEvent {
    #[must_use]
    pub fn layer_id(&self) -> LayerId {
        match self {
            Self::Finished { layer_id } | Self::Failed { layer_id, .. } | Self::TilesDropped { layer_id } => *layer_id,
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOptions {
    /// Delete all tiles before building. When false, completed zoom levels
    /// are skipped and the remaining ones rebuilt from scratch.
    pub drop_existing: bool,
    /// Zoom levels to build; all levels up to the max zoom when `None`
    pub zoom_levels: Option<Vec<u8>>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            drop_existing: true,
            zoom_levels: None,
        }
    }
}

impl ParseOptions {
    /// Continue an interrupted run.
    #[must_use]
    pub fn resume() -> Self {
        Self {
            drop_existing: false,
            zoom_levels: None,
        }
    }
}

/// Summary of a successful parse.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ParseReport {
    pub layer_id: Option<LayerId>,
    pub max_zoom: u8,
    /// Levels built in this run, in build order
    pub zoom_levels: Vec<u8>,
    pub tiles_created: BTreeMap<u8, usize>,
    pub empty_tiles_dropped: usize,
    pub reprojected: bool,
    pub from_cache: bool,
}

impl ParseReport {
    #[must_use]
    pub fn total_tiles(&self) -> usize {
        self.tiles_created.values().sum()
    }
}

pub struct PyramidDriver {
    config: PyramidConfig,
    planner: ZoomPlanner,
    layers: Arc<dyn LayerStore>,
    tiles: Arc<dyn TileStore>,
    driver: Arc<dyn RasterDriver>,
    pool: WorkerPool,
    events: broadcast::Sender<ParseEvent>,
    /// Cancellation tokens of running parses
    runs: DashMap<LayerId, CancellationToken>,
}

impl PyramidDriver {
    /// # Errors
    /// Returns [`PyramidError::Config`] if the configuration is invalid.
    pub fn new(
        config: PyramidConfig,
        layers: Arc<dyn LayerStore>,
        tiles: Arc<dyn TileStore>,
        driver: Arc<dyn RasterDriver>,
    ) -> PyramidResult<Self> {
        config.validate()?;
        let planner = ZoomPlanner::new(config.tile_size, config.zoom_next_higher, config.quadrant_size);
        let pool = WorkerPool::new(config.workers);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            config,
            planner,
            layers,
            tiles,
            driver,
            pool,
            events,
            runs: DashMap::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &PyramidConfig {
        &self.config
    }

    #[must_use]
    pub fn planner(&self) -> &ZoomPlanner {
        &self.planner
    }

    /// Receive [`ParseEvent`]s from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ParseEvent> {
        self.events.subscribe()
    }

    /// Abort the running parse of a layer between quadrants and zoom levels.
    ///
    /// Returns false if the layer has no parse in progress. Later parses are
    /// not affected.
    pub fn cancel(&self, layer_id: LayerId) -> bool {
        match self.runs.get(&layer_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn publish(&self, event: ParseEvent) {
        // No subscribers is fine
        self.events.send(event).ok();
    }

    fn layer(&self, layer_id: LayerId) -> PyramidResult<RasterLayer> {
        self.layers.layer(layer_id)?.ok_or(PyramidError::LayerNotFound(layer_id))
    }

    /// Build the tile pyramid of a layer.
    ///
    /// # Errors
    /// Any failure is logged to the layer's status, which moves to `Failed`,
    /// and returned.
    pub async fn parse(&self, layer_id: LayerId, options: ParseOptions) -> PyramidResult<ParseReport> {
        self.parse_with_cancel(layer_id, options, CancellationToken::new()).await
    }

    /// Like [`parse`](Self::parse), aborting with [`PyramidError::Cancelled`]
    /// once `cancel` fires. Quadrants already running finish first.
    ///
    /// # Errors
    /// See [`parse`](Self::parse).
    pub async fn parse_with_cancel(
        &self,
        layer_id: LayerId,
        options: ParseOptions,
        cancel: CancellationToken,
    ) -> PyramidResult<ParseReport> {
        let layer = self.layer(layer_id)?;
        let recorder = StatusRecorder::new(layer_id, Arc::clone(&self.layers));
        recorder.enter(ParseState::Pending, "Started parsing raster file.")?;

        let staging = Arc::new(StagingArea::new(self.config.workdir.as_deref())?);
        self.runs.insert(layer_id, cancel.clone());
        let result = self.run(&layer, &options, &recorder, &staging, &cancel).await;
        self.runs.remove(&layer_id);

        match Arc::try_unwrap(staging) {
            Ok(staging) => {
                if let Err(e) = staging.close() {
                    warn!(layer = %layer_id, error = %e, "Failed to remove staging area");
                }
            }
            Err(_) => warn!(layer = %layer_id, "Staging area still in use, removing it on last drop"),
        }

        match result {
            Ok(mut report) => {
                report.layer_id = Some(layer_id);
                recorder.enter(ParseState::Finished, "Successfully finished parsing raster")?;
                info!(layer = %layer_id, tiles = report.total_tiles(), max_zoom = report.max_zoom, "Parse finished");
                self.publish(ParseEvent::Finished { layer_id });
                Ok(report)
            }
            Err(e) => {
                error!(layer = %layer_id, error = %e, "Parse failed");
                if let Err(log_err) = recorder.enter(ParseState::Failed, &format!("Failed parsing raster: {e}")) {
                    warn!(layer = %layer_id, error = %log_err, "Could not record failure");
                }
                self.publish(ParseEvent::Failed {
                    layer_id,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        layer: &RasterLayer,
        options: &ParseOptions,
        recorder: &StatusRecorder,
        staging: &Arc<StagingArea>,
        cancel: &CancellationToken,
    ) -> PyramidResult<ParseReport> {
        let working = self.working_raster(layer, recorder, staging).await?;
        let raster: Arc<dyn RasterSource> = Arc::from(working.raster);

        let max_zoom = self
            .planner
            .max_zoom(raster.geo_transform().scale_x)
            .ok_or(PyramidError::InvalidResolution(layer.id))?;
        if let Some(mut meta) = self.layers.metadata(layer.id)? {
            meta.max_zoom = Some(max_zoom);
            self.layers.put_metadata(layer.id, meta)?;
        }

        if options.drop_existing {
            self.drop_all_tiles(layer.id)?;
        }

        let mut report = ParseReport {
            max_zoom,
            reprojected: working.reprojected,
            from_cache: working.from_cache,
            ..ParseReport::default()
        };

        let completed = if options.drop_existing {
            Vec::new()
        } else {
            self.layers.status(layer.id)?.tile_levels
        };
        let extent = raster.extent();

        for zoom in self.zoom_plan(options, max_zoom) {
            if completed.contains(&zoom) {
                debug!(layer = %layer.id, zoom, "Zoom level already complete, skipping");
                continue;
            }
            if cancel.is_cancelled() {
                return Err(PyramidError::Cancelled(layer.id));
            }
            if !options.drop_existing {
                self.tiles.delete_zoom(layer.id, zoom)?;
            }

            let created = self
                .populate_tile_level(layer.id, &raster, &extent, zoom, max_zoom, recorder, staging, cancel)
                .await?;
            report.zoom_levels.push(zoom);
            report.tiles_created.insert(zoom, created);
        }

        recorder.enter(ParseState::DroppingEmptyTiles, "Dropping empty raster tiles.")?;
        report.empty_tiles_dropped = self.tiles.delete_empty(layer.id)?;
        recorder.note(&format!(
            "Finished dropping {} empty raster tiles.",
            report.empty_tiles_dropped
        ))?;

        Ok(report)
    }

    /// Open and reproject on the blocking pool.
    async fn working_raster(
        &self,
        layer: &RasterLayer,
        recorder: &StatusRecorder,
        staging: &Arc<StagingArea>,
    ) -> PyramidResult<WorkingRaster> {
        let reprojector = Reprojector::new(
            Arc::clone(&self.driver),
            Arc::clone(&self.layers),
            self.config.reference_srid,
            self.config.reprojected_dir.clone(),
            self.config.histogram_bins,
        );
        recorder.enter(ParseState::OpeningSource, "Opening raster source.")?;
        let layer = layer.clone();
        let recorder = recorder.clone();
        let staging = Arc::clone(staging);

        tokio::task::spawn_blocking(move || reprojector.ensure_reference_system(&layer, &staging, &recorder))
            .await
            .map_err(|e| PyramidError::ReprojectionFailure {
                srid: self.config.reference_srid,
                source: crate::raster::RasterError::InvalidData(format!("reprojection task failed: {e}")),
            })?
    }

    /// Zoom levels to build, deduplicated, capped at `max_zoom` and ordered
    /// as configured.
    fn zoom_plan(&self, options: &ParseOptions, max_zoom: u8) -> Vec<u8> {
        let mut zooms: Vec<u8> = match &options.zoom_levels {
            Some(levels) => levels.clone(),
            None => (0..=max_zoom).collect(),
        };
        zooms.sort_unstable();
        zooms.dedup();
        // Levels finer than the raster are skipped, not an error
        zooms.retain(|z| *z <= max_zoom);
        if self.config.zoom_order == ZoomOrder::Descending {
            zooms.reverse();
        }
        zooms
    }

    #[allow(clippy::too_many_arguments)]
    async fn populate_tile_level(
        &self,
        layer_id: LayerId,
        raster: &Arc<dyn RasterSource>,
        extent: &BoundingBox,
        zoom: u8,
        max_zoom: u8,
        recorder: &StatusRecorder,
        staging: &StagingArea,
        cancel: &CancellationToken,
    ) -> PyramidResult<usize> {
        let mut histogram = if zoom == max_zoom {
            Some(HistogramAccumulator::from_band_metadata(
                &self.layers.band_metadata(layer_id)?,
                self.config.histogram_bins,
            ))
        } else {
            None
        };

        let quadrants = self.planner.quadrants(extent, zoom);
        recorder.log(
            &format!(
                "Creating {} tiles in {} quadrants at zoom {zoom}.",
                self.planner.nr_of_tiles(extent, zoom),
                quadrants.len()
            ),
            Some(ParseState::CreatingTiles { zoom }),
            None,
        )?;

        let tiler = QuadrantTiler::new(
            layer_id,
            self.planner,
            Arc::clone(&self.tiles),
            self.config.reference_srid,
        );
        let level_cancel = cancel.child_token();
        // Progress numbering only; workers race on it
        let started = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = quadrants
            .into_iter()
            .map(|range| {
                let tiler = tiler.clone();
                let raster = Arc::clone(raster);
                let recorder = recorder.clone();
                let started = Arc::clone(&started);
                let mut partial = histogram.as_ref().map(HistogramAccumulator::partial);
                let scratch = staging.quadrant_path(zoom, &range);

                let handle = self.pool.submit(level_cancel.clone(), move || -> PyramidResult<QuadrantOutput> {
                    let n = started.fetch_add(1, Ordering::Relaxed) + 1;
                    recorder.note(&format!("Starting tile creation for quadrant {n} at zoom level {zoom}"))?;
                    let tiles_written =
                        tiler.process_quadrant(raster.as_ref(), &range, zoom, partial.as_mut(), Some(scratch))?;
                    Ok(QuadrantOutput {
                        tiles_written,
                        histogram: partial,
                    })
                });
                (range, handle)
            })
            .collect();

        let mut written = 0;
        let mut failure = None;
        for (range, handle) in handles {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(JobError::Panicked(e.to_string())));

            let reason = match outcome {
                Ok(Ok(output)) => {
                    written += output.tiles_written;
                    if let (Some(total), Some(part)) = (histogram.as_mut(), output.histogram.as_ref()) {
                        total.merge(part);
                    }
                    continue;
                }
                Err(JobError::Cancelled) if failure.is_none() => {
                    failure = Some(PyramidError::Cancelled(layer_id));
                    continue;
                }
                Err(JobError::Cancelled) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };

            warn!(layer = %layer_id, zoom, ?range, %reason, "Quadrant failed");
            if failure.is_none() || matches!(failure, Some(PyramidError::Cancelled(_))) {
                level_cancel.cancel();
                failure = Some(PyramidError::QuadrantFailure {
                    zoom,
                    quadrant: format!("{}-{}/{}-{}", range.min_x, range.max_x, range.min_y, range.max_y),
                    reason,
                });
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        if let Some(histogram) = histogram {
            let mut metas = self.layers.band_metadata(layer_id)?;
            histogram.write_to(&mut metas);
            for meta in metas {
                self.layers.put_band_metadata(layer_id, meta)?;
            }
        }

        recorder.log(&format!("Finished parsing at zoom level {zoom}."), None, Some(zoom))?;
        Ok(written)
    }

    /// Delete every tile of a layer.
    ///
    /// # Errors
    /// Returns an error if the layer does not exist or the store fails.
    pub fn drop_all_tiles(&self, layer_id: LayerId) -> PyramidResult<usize> {
        self.layer(layer_id)?;
        let recorder = StatusRecorder::new(layer_id, Arc::clone(&self.layers));
        recorder.note("Clearing all existing tiles.")?;
        let removed = self.tiles.delete_layer(layer_id)?;
        self.layers.update_status(layer_id, &mut |s| s.tile_levels.clear())?;
        recorder.note(&format!("Finished clearing {removed} existing tiles."))?;
        self.publish(ParseEvent::TilesDropped { layer_id });
        Ok(removed)
    }

    /// Delete the tiles of a layer that are nodata in every band.
    ///
    /// # Errors
    /// Returns an error if the layer does not exist or the store fails.
    pub fn drop_empty_tiles(&self, layer_id: LayerId) -> PyramidResult<usize> {
        self.layer(layer_id)?;
        let recorder = StatusRecorder::new(layer_id, Arc::clone(&self.layers));
        recorder.note("Dropping empty raster tiles.")?;
        let removed = self.tiles.delete_empty(layer_id)?;
        recorder.note(&format!("Finished dropping {removed} empty raster tiles."))?;
        if removed > 0 {
            self.publish(ParseEvent::TilesDropped { layer_id });
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoTransform;
    use crate::model::TileKey;
    use crate::raster::{GeoTiffDriver, MemoryRaster};
    use crate::store::MemoryStore;
    use crate::zoom::tile_bounds;

    struct Setup {
        dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        driver: PyramidDriver,
    }

    fn config(dir: &std::path::Path) -> PyramidConfig {
        PyramidConfig {
            tile_size: 8,
            zoom_next_higher: false,
            quadrant_size: 2,
            workdir: Some(dir.join("work")),
            reprojected_dir: dir.join("reprojected"),
            workers: 2,
            histogram_bins: 4,
            ..PyramidConfig::default()
        }
    }

    /// 3857 raster spanning tiles (0..4, 0..4) at zoom 3 with native zoom 3.
    fn setup(config_fn: impl FnOnce(&mut PyramidConfig)) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config_fn(&mut config);

        let planner = ZoomPlanner::new(config.tile_size, false, 2);
        let scale = planner.tile_scale(3);
        let origin = tile_bounds(0, 0, 3);
        let width = 4 * config.tile_size;
        let data = (0..width * width).map(|i| (i % 4) as f64 + 1.0).collect();
        let raster = MemoryRaster::new(
            width,
            width,
            GeoTransform::north_up(origin.minx, origin.maxy, scale, -scale),
            Some(3857),
            vec![data],
            vec![Some(0.0)],
        )
        .unwrap();
        let source = dir.path().join("source.tif");
        raster.persist(&source).unwrap();

        let store = Arc::new(MemoryStore::new());
        store.put_layer(RasterLayer::new(1, "grid", source)).unwrap();
        let driver = PyramidDriver::new(config, store.clone(), store.clone(), Arc::new(GeoTiffDriver)).unwrap();
        Setup { dir, store, driver }
    }

    #[tokio::test]
    async fn test_parse_builds_every_level() {
        let s = setup(|_| {});
        let mut events = s.driver.subscribe();
        let report = s.driver.parse(LayerId(1), ParseOptions::default()).await.unwrap();

        assert_eq!(report.max_zoom, 3);
        assert_eq!(report.zoom_levels, vec![0, 1, 2, 3]);
        assert_eq!(report.tiles_created[&3], 16);
        assert_eq!(report.tiles_created[&0], 1);
        assert!(!report.reprojected);

        let status = s.store.status(LayerId(1)).unwrap();
        assert_eq!(status.state, ParseState::Finished);
        assert_eq!(status.tile_levels, vec![0, 1, 2, 3]);
        assert_eq!(events.recv().await.unwrap(), ParseEvent::TilesDropped { layer_id: LayerId(1) });
        assert_eq!(events.recv().await.unwrap(), ParseEvent::Finished { layer_id: LayerId(1) });

        let meta = s.store.metadata(LayerId(1)).unwrap().unwrap();
        assert_eq!(meta.max_zoom, Some(3));

        // Staging areas are gone
        let leftovers = std::fs::read_dir(s.dir.path().join("work")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_descending_order_and_explicit_levels() {
        let s = setup(|c| c.zoom_order = ZoomOrder::Descending);
        let options = ParseOptions {
            drop_existing: true,
            zoom_levels: Some(vec![1, 3, 9, 1]),
        };
        let report = s.driver.parse(LayerId(1), options).await.unwrap();
        assert_eq!(report.zoom_levels, vec![3, 1]);
        assert_eq!(s.store.count(LayerId(1), Some(2)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resume_skips_completed_levels() {
        let s = setup(|_| {});
        let options = ParseOptions {
            drop_existing: true,
            zoom_levels: Some(vec![0, 1]),
        };
        s.driver.parse(LayerId(1), options).await.unwrap();
        assert_eq!(s.store.status(LayerId(1)).unwrap().tile_levels, vec![0, 1]);

        let report = s.driver.parse(LayerId(1), ParseOptions::resume()).await.unwrap();
        assert_eq!(report.zoom_levels, vec![2, 3]);
        assert_eq!(s.store.count(LayerId(1), None).unwrap(), 1 + 1 + 4 + 16);
    }

    #[tokio::test]
    async fn test_cancelled_parse_fails() {
        let s = setup(|_| {});
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = s
            .driver
            .parse_with_cancel(LayerId(1), ParseOptions::default(), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PyramidError::Cancelled(_)));
        assert_eq!(s.store.status(LayerId(1)).unwrap().state, ParseState::Failed);
    }

    #[tokio::test]
    async fn test_cancellation_ends_with_its_run() {
        let s = setup(|_| {});
        let cancel = CancellationToken::new();
        cancel.cancel();
        let first = s.driver.parse_with_cancel(LayerId(1), ParseOptions::default(), cancel).await;
        assert!(matches!(first, Err(PyramidError::Cancelled(_))));

        // Nothing is running, and the next run starts clean
        assert!(!s.driver.cancel(LayerId(1)));
        let report = s.driver.parse(LayerId(1), ParseOptions::default()).await.unwrap();
        assert_eq!(report.zoom_levels, vec![0, 1, 2, 3]);
        assert_eq!(s.store.status(LayerId(1)).unwrap().state, ParseState::Finished);
    }

    #[tokio::test]
    async fn test_unknown_layer() {
        let s = setup(|_| {});
        let err = s.driver.parse(LayerId(42), ParseOptions::default()).await.unwrap_err();
        assert!(matches!(err, PyramidError::LayerNotFound(LayerId(42))));
    }

    #[tokio::test]
    async fn test_histogram_counts_finest_level_pixels() {
        let s = setup(|_| {});
        s.driver.parse(LayerId(1), ParseOptions::default()).await.unwrap();
        let bands = s.store.band_metadata(LayerId(1)).unwrap();
        let total: u64 = bands[0].hist_values.iter().sum();
        // 16 tiles of 8x8 pixels, all valid
        assert_eq!(total, 16 * 64);
        assert_eq!(bands[0].hist_values, vec![256; 4]);
    }

    #[tokio::test]
    async fn test_histogram_survives_runs_that_skip_finest_level() {
        let s = setup(|_| {});
        s.driver.parse(LayerId(1), ParseOptions::default()).await.unwrap();
        let before = s.store.band_metadata(LayerId(1)).unwrap()[0].hist_values.clone();
        assert_eq!(before.iter().sum::<u64>(), 16 * 64);

        let resumed = s.driver.parse(LayerId(1), ParseOptions::resume()).await.unwrap();
        assert!(resumed.zoom_levels.is_empty());
        assert_eq!(s.store.band_metadata(LayerId(1)).unwrap()[0].hist_values, before);

        let coarse = ParseOptions {
            drop_existing: false,
            zoom_levels: Some(vec![0, 1]),
        };
        s.driver.parse(LayerId(1), coarse).await.unwrap();
        assert_eq!(s.store.band_metadata(LayerId(1)).unwrap()[0].hist_values, before);
    }

    /// Tile store that rejects the south-east quadrant of zoom 3 while `fail` is set.
    struct FailingTiles {
        inner: Arc<MemoryStore>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl TileStore for FailingTiles {
        fn insert(&self, tile: crate::model::Tile) -> crate::store::StoreResult<()> {
            if self.fail.load(Ordering::SeqCst) && tile.z == 3 && tile.x >= 2 && tile.y >= 2 {
                return Err(crate::store::StoreError::Backend("disk full".to_string()));
            }
            self.inner.insert(tile)
        }

        fn get(&self, key: TileKey) -> crate::store::StoreResult<Option<Arc<crate::model::Tile>>> {
            self.inner.get(key)
        }

        fn delete_layer(&self, layer: LayerId) -> crate::store::StoreResult<usize> {
            self.inner.delete_layer(layer)
        }

        fn delete_zoom(&self, layer: LayerId, zoom: u8) -> crate::store::StoreResult<usize> {
            self.inner.delete_zoom(layer, zoom)
        }

        fn delete_empty(&self, layer: LayerId) -> crate::store::StoreResult<usize> {
            self.inner.delete_empty(layer)
        }

        fn count_empty(&self, layer: LayerId) -> crate::store::StoreResult<usize> {
            self.inner.count_empty(layer)
        }

        fn count(&self, layer: LayerId, zoom: Option<u8>) -> crate::store::StoreResult<usize> {
            self.inner.count(layer, zoom)
        }
    }

    #[tokio::test]
    async fn test_quadrant_failure_fails_level_and_resume_rebuilds_it() {
        let s = setup(|_| {});
        let tiles = Arc::new(FailingTiles {
            inner: s.store.clone(),
            fail: std::sync::atomic::AtomicBool::new(true),
        });
        let driver = PyramidDriver::new(
            config(s.dir.path()),
            s.store.clone(),
            tiles.clone(),
            Arc::new(GeoTiffDriver),
        )
        .unwrap();

        let err = driver.parse(LayerId(1), ParseOptions::default()).await.unwrap_err();
        match err {
            PyramidError::QuadrantFailure { zoom, quadrant, reason } => {
                assert_eq!(zoom, 3);
                assert_eq!(quadrant, "2-3/2-3");
                assert!(reason.contains("disk full"));
            }
            other => panic!("expected a quadrant failure, got {other:?}"),
        }
        let status = s.store.status(LayerId(1)).unwrap();
        assert_eq!(status.state, ParseState::Failed);
        assert_eq!(status.tile_levels, vec![0, 1, 2]);

        tiles.fail.store(false, Ordering::SeqCst);
        let report = driver.parse(LayerId(1), ParseOptions::resume()).await.unwrap();
        assert_eq!(report.zoom_levels, vec![3]);
        assert_eq!(report.tiles_created[&3], 16);
        assert_eq!(s.store.count(LayerId(1), Some(3)).unwrap(), 16);
        assert_eq!(s.store.status(LayerId(1)).unwrap().tile_levels, vec![0, 1, 2, 3]);
        assert_eq!(s.store.band_metadata(LayerId(1)).unwrap()[0].hist_values, vec![256; 4]);
    }

    #[tokio::test]
    async fn test_tiles_use_tile_grid_georeference() {
        let s = setup(|_| {});
        s.driver.parse(LayerId(1), ParseOptions::default()).await.unwrap();
        let tile = s
            .store
            .get(TileKey { layer_id: LayerId(1), z: 3, x: 2, y: 1 })
            .unwrap()
            .unwrap();
        let bounds = tile_bounds(2, 1, 3);
        assert_eq!(tile.raster.origin, (bounds.minx, bounds.maxy));
        assert_eq!(tile.raster.width, 8);
        assert_eq!(tile.raster.srid, 3857);
    }
}
