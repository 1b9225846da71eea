//! Benchmarks for rasterpyramid tiling and rendering.
//!
//! Run with: `cargo bench`
//!
//! These benchmarks measure the hot paths of a parse and a tile request:
//! - Warping and slicing one quadrant into tiles
//! - Histogram accumulation over tile blocks
//! - Colormap rendering to PNG
//! - Zoom planning over large extents

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;

use rasterpyramid::{
    tile_bounds, BandMetadata, GeoTransform, HistogramAccumulator, LayerId, LayerStore, Legend, LegendEntry,
    MemoryRaster, MemoryStore, QuadrantTiler, RasterLayer, TileRange, TileRequest, TmsRenderer, ZoomPlanner,
};

const TILE_SIZE: usize = 256;

/// Class raster covering `tiles` x `tiles` tiles at `zoom` with native resolution.
fn class_raster(planner: &ZoomPlanner, zoom: u8, tiles: u32) -> MemoryRaster {
    let scale = planner.tile_scale(zoom);
    let origin = tile_bounds(0, 0, zoom);
    let side = tiles as usize * TILE_SIZE;
    let data = (0..side * side).map(|i| ((i / 7) % 5) as f64).collect();
    MemoryRaster::new(
        side,
        side,
        GeoTransform::north_up(origin.minx, origin.maxy, scale, -scale),
        Some(3857),
        vec![data],
        vec![Some(0.0)],
    )
    .unwrap()
}

/// Benchmark one quadrant at different quadrant sizes
fn bench_process_quadrant(c: &mut Criterion) {
    let planner = ZoomPlanner::new(TILE_SIZE, false, 20);
    let mut group = c.benchmark_group("process_quadrant");
    group.sample_size(10);

    for tiles in [1_u32, 2, 4] {
        let raster = class_raster(&planner, 6, tiles);
        let range = TileRange::new(0, 0, tiles - 1, tiles - 1);

        group.bench_with_input(BenchmarkId::new("tiles_per_side", tiles), &range, |b, range| {
            b.iter(|| {
                let store = Arc::new(MemoryStore::new());
                let tiler = QuadrantTiler::new(LayerId(1), planner, store, 3857);
                tiler.process_quadrant(black_box(&raster), range, 6, None, None).unwrap()
            });
        });
    }

    group.finish();
}

/// Benchmark histogram accumulation over finished tiles
fn bench_histogram(c: &mut Criterion) {
    let planner = ZoomPlanner::new(TILE_SIZE, false, 20);
    let raster = class_raster(&planner, 6, 2);
    let store = Arc::new(MemoryStore::new());
    let tiler = QuadrantTiler::new(LayerId(1), planner, store.clone(), 3857);
    tiler
        .process_quadrant(&raster, &TileRange::new(0, 0, 1, 1), 6, None, None)
        .unwrap();
    let tiles: Vec<_> = store
        .tile_keys(LayerId(1))
        .into_iter()
        .filter_map(|key| rasterpyramid::TileStore::get(store.as_ref(), key).unwrap())
        .collect();

    let metas = vec![BandMetadata {
        band: 0,
        min: Some(0.0),
        max: Some(4.0),
        ..BandMetadata::default()
    }];
    let empty = HistogramAccumulator::from_band_metadata(&metas, 100);

    c.bench_function("histogram_push_4_tiles", |b| {
        b.iter(|| {
            let mut hist = empty.partial();
            for tile in &tiles {
                hist.push_tile(black_box(&tile.raster.bands));
            }
            hist.total()
        });
    });
}

/// Benchmark rendering a stored tile through a legend
fn bench_render(c: &mut Criterion) {
    let planner = ZoomPlanner::new(TILE_SIZE, false, 20);
    let raster = class_raster(&planner, 6, 1);
    let store = Arc::new(MemoryStore::new());
    store
        .put_layer(RasterLayer::new(1, "classes", "/dev/null").with_legend("Classes"))
        .unwrap();
    store
        .put_legend(Legend::new(
            "Classes",
            (1..5)
                .map(|v| LegendEntry::new(format!("class {v}"), v.to_string(), format!("#{:02x}8040", v * 50)))
                .collect(),
        ))
        .unwrap();
    QuadrantTiler::new(LayerId(1), planner, store.clone(), 3857)
        .process_quadrant(&raster, &TileRange::new(0, 0, 0, 0), 6, None, None)
        .unwrap();

    let renderer = TmsRenderer::new(store.clone(), store, 256);
    let mut group = c.benchmark_group("render");

    group.bench_function("legend_png", |b| {
        b.iter(|| renderer.render("classes", 6, 0, 0, "png", black_box(&TileRequest::default())).unwrap());
    });

    let inline = TileRequest::default().with_colormap(r##"{"1": "#ff0000", "3": [0, 0, 255]}"##);
    group.bench_function("inline_colormap_jpeg", |b| {
        b.iter(|| renderer.render("classes", 6, 0, 0, "jpg", black_box(&inline)).unwrap());
    });

    group.bench_function("transparent_png", |b| {
        b.iter(|| renderer.render("classes", 6, 9, 9, "png", black_box(&TileRequest::default())).unwrap());
    });

    group.finish();
}

/// Benchmark zoom planning for a continental extent
fn bench_zoom_planning(c: &mut Criterion) {
    let planner = ZoomPlanner::new(TILE_SIZE, true, 20);
    let extent = rasterpyramid::BoundingBox::new(-1_500_000.0, 4_000_000.0, 3_500_000.0, 8_000_000.0);
    let mut group = c.benchmark_group("zoom_planning");

    for zoom in [6_u8, 10, 14] {
        group.bench_with_input(BenchmarkId::new("quadrants", zoom), &zoom, |b, &z| {
            b.iter(|| planner.quadrants(black_box(&extent), z).len());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_process_quadrant,
    bench_histogram,
    bench_render,
    bench_zoom_planning,
);

criterion_main!(benches);
