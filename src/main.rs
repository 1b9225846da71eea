//! rasterpyramid CLI
//!
//! Builds the tile pyramid of a raster in memory and writes the rendered
//! tiles as a `{z}/{x}/{y}.{format}` directory tree.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rasterpyramid::{
    GeoTiffDriver, LayerId, LayerStore, Legend, MemoryStore, ParseOptions, PyramidConfig, PyramidDriver, RasterDriver,
    RasterLayer, RasterSource, TileRequest, TmsRenderer, ZoomOrder, ZoomPlanner,
};

const LAYER_ID: u64 = 1;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Png,
    Jpg,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
        }
    }
}

#[derive(Parser)]
#[command(name = "rasterpyramid")]
#[command(about = "Build web-mercator tile pyramids from georeferenced rasters", long_about = None)]
struct Cli {
    /// JSON configuration file (RASTER_* variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a raster and write rendered tiles
    Build {
        /// GeoTIFF file, or a zip archive containing one
        raster: PathBuf,

        /// Output directory
        #[arg(long, short, default_value = "tiles")]
        out: PathBuf,

        /// Image format of the written tiles
        #[arg(long, value_enum, default_value = "png")]
        format: OutputFormat,

        /// Override the nodata value of every band
        #[arg(long)]
        nodata: Option<f64>,

        /// Legend JSON file ({"title": ..., "entries": [...]})
        #[arg(long)]
        legend: Option<PathBuf>,

        /// Inline colormap, e.g. '{"1": "#ff0000"}'
        #[arg(long)]
        colormap: Option<String>,

        /// Only build these zoom levels (comma-separated)
        #[arg(long, value_delimiter = ',')]
        zoom: Option<Vec<u8>>,

        /// Build the finest zoom level first
        #[arg(long)]
        descending: bool,
    },

    /// Print the georeference and zoom plan of a raster
    Info {
        raster: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<PyramidConfig, rasterpyramid::ConfigError> {
    let base = match path {
        Some(path) => PyramidConfig::from_json_file(path)?,
        None => PyramidConfig::default(),
    };
    base.with_overrides(|key| std::env::var(key).ok())
}

fn layer_name(raster: &Path) -> String {
    raster
        .file_stem()
        .map_or_else(|| "raster".to_string(), |s| s.to_string_lossy().into_owned())
}

#[allow(clippy::too_many_arguments)]
async fn build(
    mut config: PyramidConfig,
    raster: PathBuf,
    out: PathBuf,
    format: OutputFormat,
    nodata: Option<f64>,
    legend: Option<PathBuf>,
    colormap: Option<String>,
    zoom: Option<Vec<u8>>,
    descending: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if descending {
        config.zoom_order = ZoomOrder::Descending;
    }
    let tile_size = u32::try_from(config.tile_size)?;
    let store = Arc::new(MemoryStore::new());

    let name = layer_name(&raster);
    let mut layer = RasterLayer::new(LAYER_ID, &name, raster);
    if let Some(nodata) = nodata {
        layer = layer.with_nodata(nodata);
    }
    if let Some(path) = legend {
        let legend: Legend = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        layer = layer.with_legend(legend.title.clone());
        store.put_legend(legend)?;
    }
    store.put_layer(layer)?;

    let driver = PyramidDriver::new(config, store.clone(), store.clone(), Arc::new(GeoTiffDriver))?;
    let options = ParseOptions {
        drop_existing: true,
        zoom_levels: zoom,
    };
    let report = driver.parse(LayerId(LAYER_ID), options).await?;

    let renderer = TmsRenderer::new(store.clone(), store.clone(), tile_size);
    let request = TileRequest {
        colormap,
        ..TileRequest::default()
    };
    let mut written = 0_usize;
    for key in store.tile_keys(LayerId(LAYER_ID)) {
        let tile = renderer.render(&name, key.z, key.x, key.y, format.extension(), &request)?;
        let dir = out.join(key.z.to_string()).join(key.x.to_string());
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(format!("{}.{}", key.y, format.extension())), tile.bytes.as_slice())?;
        written += 1;
    }

    info!(tiles = written, out = %out.display(), "Wrote rendered tiles");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn info(config: &PyramidConfig, raster: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let source = GeoTiffDriver.open(raster)?;
    let planner = ZoomPlanner::new(config.tile_size, config.zoom_next_higher, config.quadrant_size);
    let scale = source.geo_transform().scale_x;
    let extent = source.extent();

    println!("Size:        {} x {} ({} bands)", source.width(), source.height(), source.band_count());
    println!("SRID:        {}", source.srid().map_or_else(|| "unknown".to_string(), |s| s.to_string()));
    println!("Pixel size:  {scale}");
    println!("Extent:      {extent:?}");
    match planner.native_zoom(scale) {
        Some(native) if source.srid() == Some(config.reference_srid) => {
            let max = planner.max_zoom(scale).unwrap_or(native);
            println!("Native zoom: {native} (building up to {max})");
            for z in 0..=max {
                println!(
                    "  zoom {z:>2}: {} tiles in {} quadrants",
                    planner.nr_of_tiles(&extent, z),
                    planner.quadrants(&extent, z).len()
                );
            }
        }
        Some(native) => println!("Native zoom: ~{native} (raster is reprojected before tiling)"),
        None => println!("Native zoom: invalid pixel size"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Build {
            raster,
            out,
            format,
            nodata,
            legend,
            colormap,
            zoom,
            descending,
        } => build(config, raster, out, format, nodata, legend, colormap, zoom, descending).await,
        Command::Info { raster } => info(&config, &raster),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
