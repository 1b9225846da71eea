//! Layer and band metadata extraction.

use tracing::debug;

use crate::error::PyramidResult;
use crate::histogram::Histogram;
use crate::model::{BandMetadata, LayerId, LayerMetadata};
use crate::raster::RasterSource;
use crate::status::StatusRecorder;
use crate::store::LayerStore;

/// Georeference of `raster` as a metadata record. `max_zoom` is left unset.
#[must_use]
pub fn layer_metadata(raster: &dyn RasterSource) -> LayerMetadata {
    let gt = raster.geo_transform();
    LayerMetadata {
        origin_x: gt.origin_x,
        origin_y: gt.origin_y,
        scale_x: gt.scale_x,
        scale_y: gt.scale_y,
        skew_x: gt.skew_x,
        skew_y: gt.skew_y,
        width: raster.width(),
        height: raster.height(),
        band_count: raster.band_count(),
        srid: raster.srid(),
        srs_wkt: raster.srs_wkt(),
        max_zoom: None,
    }
}

/// Statistics of one band with empty histogram bins spanning `[min, max]`.
///
/// # Errors
/// Returns an error if the band cannot be read.
pub fn band_metadata(raster: &dyn RasterSource, band: usize, bins: usize) -> PyramidResult<BandMetadata> {
    let stats = raster.band_statistics(band)?;
    let hist = stats.map_or_else(Histogram::default, |s| Histogram::with_range(s.min, s.max, bins));
    Ok(BandMetadata {
        band,
        nodata: raster.nodata(band),
        min: stats.map(|s| s.min),
        max: stats.map(|s| s.max),
        mean: stats.map(|s| s.mean),
        std: stats.map(|s| s.std),
        hist_bins: hist.edges().to_vec(),
        hist_values: hist.counts().to_vec(),
    })
}

/// Overwrite the layer's metadata and band records from `raster`.
///
/// Histogram counts of a band are kept when its bin edges are unchanged.
///
/// # Errors
/// Returns an error if a band cannot be read or the store fails.
pub fn extract_metadata(
    layer_id: LayerId,
    raster: &dyn RasterSource,
    layers: &dyn LayerStore,
    bins: usize,
    recorder: &StatusRecorder,
) -> PyramidResult<()> {
    recorder.note("Extracting metadata from raster.")?;

    let mut meta = layer_metadata(raster);
    if let Some(previous) = layers.metadata(layer_id)? {
        meta.max_zoom = previous.max_zoom;
    }
    layers.put_metadata(layer_id, meta)?;

    let previous = layers.band_metadata(layer_id)?;
    for band in 0..raster.band_count() {
        let mut record = band_metadata(raster, band, bins)?;
        // Counts from the last finest-level build stay valid while the bins do
        if let Some(prev) = previous.iter().find(|p| p.band == band) {
            if prev.hist_bins == record.hist_bins && prev.hist_values.len() == record.hist_values.len() {
                record.hist_values.clone_from(&prev.hist_values);
            }
        }
        debug!(layer = %layer_id, band, min = ?record.min, max = ?record.max, "Band statistics");
        layers.put_band_metadata(layer_id, record)?;
    }

    recorder.note("Finished extracting metadata from raster.")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoTransform;
    use crate::raster::MemoryRaster;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_extract_metadata() {
        let raster = MemoryRaster::new(
            2,
            2,
            GeoTransform::north_up(100.0, 200.0, 10.0, -10.0),
            Some(3857),
            vec![vec![1.0, 2.0, 3.0, -1.0], vec![-1.0; 4]],
            vec![Some(-1.0), Some(-1.0)],
        )
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        let recorder = StatusRecorder::new(LayerId(3), store.clone());

        extract_metadata(LayerId(3), &raster, store.as_ref(), 4, &recorder).unwrap();

        let meta = store.metadata(LayerId(3)).unwrap().unwrap();
        assert_eq!(meta.width, 2);
        assert_eq!(meta.band_count, 2);
        assert_eq!(meta.origin_x, 100.0);
        assert_eq!(meta.srid, Some(3857));
        assert!(meta.srs_wkt.is_some());

        let bands = store.band_metadata(LayerId(3)).unwrap();
        assert_eq!(bands[0].min, Some(1.0));
        assert_eq!(bands[0].max, Some(3.0));
        assert_eq!(bands[0].hist_bins, vec![1.0, 1.5, 2.0, 2.5, 3.0]);
        assert_eq!(bands[0].hist_values, vec![0; 4]);
        assert_eq!(bands[1].min, None);
        assert!(bands[1].hist_bins.is_empty());

        assert_eq!(store.status(LayerId(3)).unwrap().log_lines().count(), 2);
    }

    #[test]
    fn test_reextract_keeps_counts_of_unchanged_bins() {
        let raster = MemoryRaster::new(
            2,
            1,
            GeoTransform::north_up(0.0, 0.0, 1.0, -1.0),
            Some(3857),
            vec![vec![0.0, 4.0]],
            vec![None],
        )
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        let recorder = StatusRecorder::new(LayerId(4), store.clone());
        extract_metadata(LayerId(4), &raster, store.as_ref(), 2, &recorder).unwrap();

        let mut counted = store.band_metadata(LayerId(4)).unwrap().remove(0);
        counted.hist_values = vec![5, 7];
        store.put_band_metadata(LayerId(4), counted).unwrap();

        extract_metadata(LayerId(4), &raster, store.as_ref(), 2, &recorder).unwrap();
        assert_eq!(store.band_metadata(LayerId(4)).unwrap()[0].hist_values, vec![5, 7]);

        // New edges start from zero
        extract_metadata(LayerId(4), &raster, store.as_ref(), 4, &recorder).unwrap();
        assert_eq!(store.band_metadata(LayerId(4)).unwrap()[0].hist_values, vec![0; 4]);
    }
}
