//! Per-band value histograms over the finest zoom level.
//!
//! Bin edges are fixed from each band's min/max before tiling starts. Every
//! quadrant fills its own partial [`HistogramAccumulator`]; the driver merges
//! the partials once the zoom level's quadrants are done, so no counts are
//! shared between workers.
//!
//! Bins are half-open `[e_i, e_i+1)` except the last, which also includes its
//! right edge. NaN, nodata and values outside `[min, max]` are not counted.

use serde::{Deserialize, Serialize};

use crate::model::{BandMetadata, TileBand};
use crate::raster::is_valid;

/// Fixed-edge frequency histogram.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Histogram {
    edges: Vec<f64>,
    counts: Vec<u64>,
}

impl Histogram {
    /// `bins` equal-width bins spanning `[min, max]`.
    ///
    /// A constant band (`min == max`) gets a single bin `[v - 0.5, v + 0.5]`.
    /// Non-finite bounds give a histogram without bins.
    #[must_use]
    pub fn with_range(min: f64, max: f64, bins: usize) -> Self {
        if !(min.is_finite() && max.is_finite()) || max < min || bins == 0 {
            return Self::default();
        }
        if min == max {
            return Self::from_edges(vec![min - 0.5, max + 0.5]);
        }

        #[allow(clippy::cast_precision_loss)]
        let width = (max - min) / bins as f64;
        let mut edges: Vec<f64> = (0..bins)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let offset = i as f64 * width;
                min + offset
            })
            .collect();
        edges.push(max);
        Self::from_edges(edges)
    }

    /// Histogram with the given edges and zero counts.
    #[must_use]
    pub fn from_edges(edges: Vec<f64>) -> Self {
        let bins = edges.len().saturating_sub(1);
        Self {
            edges,
            counts: vec![0; bins],
        }
    }

    #[must_use]
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    #[must_use]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Same edges, zero counts.
    #[must_use]
    pub fn cleared(&self) -> Self {
        Self::from_edges(self.edges.clone())
    }

    /// Sum of all bin counts.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Bin a value falls into, if it lies within the edges.
    #[inline]
    #[must_use]
    pub fn bin_index(&self, value: f64) -> Option<usize> {
        let (first, last) = (*self.edges.first()?, *self.edges.last()?);
        if self.counts.is_empty() || value.is_nan() || value < first || value > last {
            return None;
        }
        if value == last {
            return Some(self.counts.len() - 1);
        }
        // Number of edges <= value, minus one, is the bin index
        Some(self.edges.partition_point(|e| *e <= value) - 1)
    }

    /// Count `values`, skipping NaN and `nodata`. Returns how many were binned.
    pub fn add(&mut self, values: &[f64], nodata: Option<f64>) -> u64 {
        let mut added = 0;
        for &v in values.iter().filter(|v| is_valid(**v, nodata)) {
            if let Some(i) = self.bin_index(v) {
                self.counts[i] += 1;
                added += 1;
            }
        }
        added
    }

    /// Add another histogram's counts. Histograms with different edges are
    /// left untouched and `false` is returned.
    pub fn merge(&mut self, other: &Histogram) -> bool {
        if self.edges != other.edges {
            return false;
        }
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine += theirs;
        }
        true
    }
}

/// One histogram per band.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistogramAccumulator {
    bands: Vec<Histogram>,
}

impl HistogramAccumulator {
    /// Start from the stored bin edges of each band with counts reset to zero.
    ///
    /// Bands whose record has no edges get `bins` bins from their min/max.
    #[must_use]
    pub fn from_band_metadata(bands: &[BandMetadata], bins: usize) -> Self {
        let bands = bands
            .iter()
            .map(|meta| {
                if meta.hist_bins.len() >= 2 {
                    Histogram::from_edges(meta.hist_bins.clone())
                } else {
                    match (meta.min, meta.max) {
                        (Some(min), Some(max)) => Histogram::with_range(min, max, bins),
                        _ => Histogram::default(),
                    }
                }
            })
            .collect();
        Self { bands }
    }

    /// Empty accumulator with the same edges, for one quadrant worker.
    #[must_use]
    pub fn partial(&self) -> Self {
        Self {
            bands: self.bands.iter().map(Histogram::cleared).collect(),
        }
    }

    #[must_use]
    pub fn bands(&self) -> &[Histogram] {
        &self.bands
    }

    /// Add one tile's band blocks.
    pub fn push_tile(&mut self, bands: &[TileBand]) {
        for (hist, band) in self.bands.iter_mut().zip(bands) {
            hist.add(&band.data, band.nodata);
        }
    }

    /// Sum a partial accumulator into this one.
    pub fn merge(&mut self, partial: &HistogramAccumulator) {
        for (mine, theirs) in self.bands.iter_mut().zip(&partial.bands) {
            mine.merge(theirs);
        }
    }

    /// Copy edges and counts into the matching band records.
    pub fn write_to(&self, metas: &mut [BandMetadata]) {
        for meta in metas.iter_mut() {
            if let Some(hist) = self.bands.get(meta.band) {
                meta.hist_bins = hist.edges.clone();
                meta.hist_values = hist.counts.clone();
            }
        }
    }

    /// Total binned values across all bands.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.bands.iter().map(Histogram::total).sum()
    }
}
