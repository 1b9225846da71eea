//! TMS tile rendering.
//!
//! Tiles are colored through a colormap taken, in order of precedence, from
//! an inline JSON colormap, a legend requested by title, or the layer's own
//! legend. A tile that does not exist, or a request without any colormap,
//! renders as a fully transparent image.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;

use image::{DynamicImage, Rgba, RgbaImage};
use tracing::{debug, trace};

use crate::legend::{Colormap, LegendError};
use crate::model::{RasterLayer, Tile, TileKey};
use crate::raster::is_valid;
use crate::store::{LayerStore, StoreError, TileStore};
use crate::tile_cache::{RenderCache, RenderKey};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unknown image format: {0}")]
    UnknownFormat(String),

    #[error("layer not found: {0}")]
    LayerNotFound(String),

    #[error("legend not found: {0}")]
    LegendNotFound(String),

    #[error("invalid colormap: {0}")]
    InvalidColormap(#[source] LegendError),

    #[error("stored legend is invalid: {0}")]
    InvalidLegend(#[source] LegendError),

    #[error("failed to encode tile: {0}")]
    Encode(#[from] image::ImageError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RenderError {
    /// HTTP status code this error maps to.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownFormat(_) | Self::InvalidColormap(_) => 400,
            Self::LayerNotFound(_) | Self::LegendNotFound(_) => 404,
            Self::InvalidLegend(_) | Self::Encode(_) | Self::Store(_) => 500,
        }
    }

    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            _ => Err(RenderError::UnknownFormat(s.to_string())),
        }
    }
}

/// Optional coloring parameters of a tile request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileRequest {
    /// Inline JSON colormap with integer keys
    pub colormap: Option<String>,
    /// Legend title, matched case-insensitively
    pub legend: Option<String>,
    /// Comma-separated legend keys to keep
    pub entries: Option<String>,
}

impl TileRequest {
    #[must_use]
    pub fn with_colormap(mut self, json: impl Into<String>) -> Self {
        self.colormap = Some(json.into());
        self
    }

    #[must_use]
    pub fn with_legend(mut self, title: impl Into<String>) -> Self {
        self.legend = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_entries(mut self, entries: impl Into<String>) -> Self {
        self.entries = Some(entries.into());
        self
    }
}

/// Cache variant of a rendering: the format plus a digest of the resolved
/// colormap, so a replaced legend never serves images of the old one.
fn cache_variant(format: ImageFormat, colormap: Option<&Colormap>) -> String {
    match colormap {
        Some(colormap) => {
            let mut hasher = DefaultHasher::new();
            format!("{colormap:?}").hash(&mut hasher);
            format!("{}|{:016x}", format.extension(), hasher.finish())
        }
        None => format!("{}|transparent", format.extension()),
    }
}

/// An encoded tile image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTile {
    pub bytes: Arc<Vec<u8>>,
    pub format: ImageFormat,
}

impl RenderedTile {
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

pub struct TmsRenderer {
    layers: Arc<dyn LayerStore>,
    tiles: Arc<dyn TileStore>,
    tile_size: u32,
    cache: Option<Arc<RenderCache>>,
}

impl TmsRenderer {
    /// Renderer whose transparent tiles are `tile_size` pixels wide.
    #[must_use]
    pub fn new(layers: Arc<dyn LayerStore>, tiles: Arc<dyn TileStore>, tile_size: u32) -> Self {
        Self {
            layers,
            tiles,
            tile_size,
            cache: None,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<RenderCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Render tile `z/x/y` of the layer named `layer` as `format`
    /// (`png`, `jpg` or `jpeg`).
    ///
    /// # Errors
    /// Unknown format or malformed inline colormap are client errors; an
    /// unknown layer is not-found.
    pub fn render(
        &self,
        layer: &str,
        z: u8,
        x: u32,
        y: u32,
        format: &str,
        request: &TileRequest,
    ) -> RenderResult<RenderedTile> {
        let format: ImageFormat = format.parse()?;
        let layer = self
            .layers
            .layer_by_name(layer)?
            .ok_or_else(|| RenderError::LayerNotFound(layer.to_string()))?;

        let colormap = self.colormap(&layer, request)?;
        let cache_key = self.cache.as_ref().map(|_| RenderKey {
            layer_id: layer.id,
            z,
            x,
            y,
            variant: cache_variant(format, colormap.as_ref()),
        });
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(bytes) = cache.get(key) {
                trace!(layer = %layer.id, z, x, y, "Render cache hit");
                return Ok(RenderedTile { bytes, format });
            }
        }

        let tile = self.tiles.get(TileKey { layer_id: layer.id, z, x, y })?;

        let image = match (tile, colormap) {
            (Some(tile), Some(colormap)) => colorize(&tile, &colormap),
            (tile, _) => {
                debug!(layer = %layer.id, z, x, y, found = tile.is_some(), "Rendering transparent tile");
                RgbaImage::from_pixel(self.tile_size, self.tile_size, TRANSPARENT)
            }
        };

        let bytes = Arc::new(encode(image, format)?);
        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.insert(key, Arc::clone(&bytes));
        }
        Ok(RenderedTile { bytes, format })
    }

    /// Colormap for a request, or `None` when nothing applies.
    ///
    /// # Errors
    /// Returns an error for a malformed inline colormap or stored legend.
    pub fn colormap(&self, layer: &RasterLayer, request: &TileRequest) -> RenderResult<Option<Colormap>> {
        if let Some(json) = &request.colormap {
            let colormap = Colormap::from_json(json).map_err(RenderError::InvalidColormap)?;
            return Ok(Some(colormap).filter(|c| !c.is_empty()));
        }

        // A requested legend that does not exist means no colormap
        let title = request.legend.as_deref().or(layer.legend.as_deref());
        let legend = match title {
            Some(title) => self.layers.legend_by_title(title)?,
            None => None,
        };
        let Some(legend) = legend else {
            return Ok(None);
        };

        let mut colormap = legend.colormap().map_err(RenderError::InvalidLegend)?;
        if let Some(entries) = &request.entries {
            let keys: Vec<&str> = entries.split(',').collect();
            colormap = colormap.filtered(&keys);
        }
        Ok(Some(colormap).filter(|c| !c.is_empty()))
    }

    /// Legend entries as JSON for a layer name, or else a legend title.
    ///
    /// # Errors
    /// Returns [`RenderError::LegendNotFound`] if neither resolves.
    pub fn legend_json(&self, name: &str) -> RenderResult<String> {
        let layer_legend = self.layers.layer_by_name(name)?.and_then(|l| l.legend);
        let title = layer_legend.as_deref().unwrap_or(name);
        let legend = self
            .layers
            .legend_by_title(title)?
            .ok_or_else(|| RenderError::LegendNotFound(name.to_string()))?;
        legend.to_json().map_err(|e| RenderError::InvalidLegend(LegendError::Json(e)))
    }
}

/// Color the first band of `tile`; nodata and unmatched values stay transparent.
fn colorize(tile: &Tile, colormap: &Colormap) -> RgbaImage {
    let raster = &tile.raster;
    let width = u32::try_from(raster.width).unwrap_or(u32::MAX);
    let height = u32::try_from(raster.height).unwrap_or(u32::MAX);
    let Some(band) = raster.bands.first() else {
        return RgbaImage::from_pixel(width, height, TRANSPARENT);
    };

    RgbaImage::from_fn(width, height, |col, row| {
        let idx = row as usize * raster.width + col as usize;
        band.data
            .get(idx)
            .copied()
            .filter(|v| is_valid(*v, band.nodata))
            .and_then(|v| colormap.color_for(v))
            .unwrap_or(TRANSPARENT)
    })
}

fn encode(image: RgbaImage, format: ImageFormat) -> RenderResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    match format {
        ImageFormat::Png => image.write_to(&mut buffer, image::ImageFormat::Png)?,
        ImageFormat::Jpeg => {
            // JPEG has no alpha; transparent pixels come out black
            let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
            rgb.write_to(&mut buffer, image::ImageFormat::Jpeg)?;
        }
    }
    Ok(buffer.into_inner())
}
