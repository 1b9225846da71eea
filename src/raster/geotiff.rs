//! GeoTIFF reading and writing.
//!
//! Rasters are written with one `Float64` page per band so that any band count
//! survives a round trip. Georeferencing uses ModelPixelScale + ModelTiepoint
//! for north-up rasters and ModelTransformation otherwise; the CRS goes into
//! the GeoKeyDirectory and nodata into the `GDAL_NODATA` ASCII tag.
//!
//! Reading accepts both that layout and ordinary chunky single-page GeoTIFFs
//! (8/16/32/64-bit integer or float samples). Pages whose dimensions differ
//! from the first one are treated as overviews and ignored.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray64Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;
use tracing::debug;

use super::{MemoryRaster, RasterDriver, RasterError, RasterResult, RasterSource};
use crate::casting::usize_to_u32;
use crate::geometry::projection::is_geographic_crs;
use crate::geometry::GeoTransform;

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const USER_DEFINED: u16 = 32767;

/// Writes any [`RasterSource`] as a GeoTIFF.
pub struct GeoTiffWriter<'a> {
    raster: &'a dyn RasterSource,
}

impl<'a> GeoTiffWriter<'a> {
    #[must_use]
    pub fn new(raster: &'a dyn RasterSource) -> Self {
        Self { raster }
    }

    /// Write to a file path
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or encoding fails.
    pub fn write(self, path: &Path) -> RasterResult<()> {
        let file = File::create(path).map_err(|e| RasterError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush().map_err(|e| RasterError::io(path, e))
    }

    /// Write to any writer that implements Write + Seek
    ///
    /// # Errors
    /// Returns an error for empty rasters or encoder failures.
    pub fn write_to<W: Write + Seek>(self, writer: W) -> RasterResult<()> {
        let raster = self.raster;
        if raster.width() == 0 || raster.height() == 0 {
            return Err(RasterError::InvalidData("Raster has zero dimensions".to_string()));
        }

        let width = usize_to_u32(raster.width()).map_err(RasterError::InvalidData)?;
        let height = usize_to_u32(raster.height()).map_err(RasterError::InvalidData)?;
        let geokeys = build_geokey_directory(raster.srid());
        let gt = raster.geo_transform();

        let mut encoder = TiffEncoder::new(writer)?;
        for band in 0..raster.band_count() {
            let pixels = raster.read_band(band, (0, 0), (raster.width(), raster.height()))?;
            let mut image = encoder.new_image::<Gray64Float>(width, height)?;
            {
                let dir = image.encoder();
                if gt.skew_x == 0.0 && gt.skew_y == 0.0 && gt.scale_y < 0.0 {
                    let pixel_scale = [gt.scale_x, -gt.scale_y, 0.0];
                    dir.write_tag(Tag::ModelPixelScaleTag, &pixel_scale[..])?;
                    // Ties pixel (0, 0) to the upper-left corner
                    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
                    dir.write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
                } else {
                    let matrix = [
                        gt.scale_x, gt.skew_x, 0.0, gt.origin_x,
                        gt.skew_y, gt.scale_y, 0.0, gt.origin_y,
                        0.0, 0.0, 0.0, 0.0,
                        0.0, 0.0, 0.0, 1.0,
                    ];
                    dir.write_tag(Tag::ModelTransformationTag, &matrix[..])?;
                }
                dir.write_tag(Tag::GeoKeyDirectoryTag, geokeys.as_slice())?;
                if let Some(nodata) = raster.nodata(band) {
                    let text = nodata.to_string();
                    dir.write_tag(Tag::GdalNodata, text.as_str())?;
                }
            }
            image.write_data(&pixels)?;
        }
        Ok(())
    }
}

fn build_geokey_directory(srid: Option<u32>) -> Vec<u16> {
    // [KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys,
    //  KeyID1, TIFFTagLocation1, Count1, Value_Offset1, ...]
    let code = srid.and_then(|s| u16::try_from(s).ok());
    let mut keys = vec![1, 1, 0, if code.is_some() { 3 } else { 1 }];

    match code {
        Some(code) => {
            let geographic = is_geographic_crs(u32::from(code));
            let model = if geographic { MODEL_TYPE_GEOGRAPHIC } else { MODEL_TYPE_PROJECTED };
            keys.extend_from_slice(&[GT_MODEL_TYPE_GEO_KEY, 0, 1, model]);
            keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
            let key = if geographic { GEOGRAPHIC_TYPE_GEO_KEY } else { PROJECTED_CS_TYPE_GEO_KEY };
            keys.extend_from_slice(&[key, 0, 1, code]);
        }
        None => keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]),
    }
    keys
}

/// EPSG code from a GeoKeyDirectory, preferring the projected CS key.
fn srid_from_geokeys(keys: &[u16]) -> Option<u32> {
    let entries = keys.get(4..)?;
    let mut geographic = None;
    let mut projected = None;
    for entry in entries.chunks_exact(4) {
        let (id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 || value == USER_DEFINED || value == 0 {
            continue;
        }
        match id {
            PROJECTED_CS_TYPE_GEO_KEY => projected = Some(u32::from(value)),
            GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(u32::from(value)),
            _ => {}
        }
    }
    projected.or(geographic)
}

#[allow(clippy::cast_precision_loss)]
fn decoding_result_to_f64(result: DecodingResult) -> Vec<f64> {
    match result {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        #[allow(unreachable_patterns)]
        _ => Vec::new(),
    }
}

/// Split chunky (interleaved) samples into per-band vectors.
fn deinterleave(samples: Vec<f64>, bands: usize) -> Vec<Vec<f64>> {
    if bands <= 1 {
        return vec![samples];
    }
    let mut out = vec![Vec::with_capacity(samples.len() / bands); bands];
    for (i, v) in samples.into_iter().enumerate() {
        out[i % bands].push(v);
    }
    out
}

struct Page {
    dimensions: (u32, u32),
    bands: Vec<Vec<f64>>,
    nodata: Option<f64>,
}

fn read_page<R: Read + Seek>(decoder: &mut Decoder<R>) -> RasterResult<Page> {
    let dimensions = decoder.dimensions()?;
    let samples = decoder.get_tag_u32(Tag::SamplesPerPixel).unwrap_or(1) as usize;
    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse().ok());
    let data = decoding_result_to_f64(decoder.read_image()?);
    if data.is_empty() {
        return Err(RasterError::Unsupported("unsupported sample format".to_string()));
    }
    Ok(Page {
        dimensions,
        bands: deinterleave(data, samples),
        nodata,
    })
}

fn read_geo_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    if let Ok(m) = decoder.get_tag_f64_vec(Tag::ModelTransformationTag) {
        if m.len() >= 8 {
            return Some(GeoTransform {
                origin_x: m[3],
                origin_y: m[7],
                scale_x: m[0],
                scale_y: m[5],
                skew_x: m[1],
                skew_y: m[4],
            });
        }
    }

    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    let tie = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;
    if scale.len() < 2 || tie.len() < 6 {
        return None;
    }
    // Tiepoint (i, j, k, x, y, z) maps pixel (i, j) to world (x, y)
    Some(GeoTransform::north_up(
        tie[3] - tie[0] * scale[0],
        tie[4] + tie[1] * scale[1],
        scale[0],
        -scale[1],
    ))
}

/// Opens GeoTIFF files as [`MemoryRaster`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTiffDriver;

impl GeoTiffDriver {
    /// Decode a GeoTIFF from any seekable reader.
    ///
    /// # Errors
    /// Returns an error if the data is not a TIFF, lacks georeferencing, or
    /// uses an unsupported sample layout.
    pub fn read<R: Read + Seek>(reader: R) -> RasterResult<MemoryRaster> {
        let mut decoder = Decoder::new(reader)?;
        let geo_transform = read_geo_transform(&mut decoder)
            .ok_or_else(|| RasterError::Unsupported("TIFF has no georeferencing tags".to_string()))?;
        let srid = decoder
            .get_tag_u16_vec(Tag::GeoKeyDirectoryTag)
            .ok()
            .as_deref()
            .and_then(srid_from_geokeys);

        let first = read_page(&mut decoder)?;
        let (width, height) = first.dimensions;
        let mut nodata = vec![first.nodata; first.bands.len()];
        let mut bands = first.bands;

        while decoder.more_images() {
            decoder.next_image()?;
            if decoder.dimensions()? != (width, height) {
                break;
            }
            let page = read_page(&mut decoder)?;
            nodata.extend(std::iter::repeat(page.nodata).take(page.bands.len()));
            bands.extend(page.bands);
        }

        MemoryRaster::new(width as usize, height as usize, geo_transform, srid, bands, nodata)
    }
}

impl RasterDriver for GeoTiffDriver {
    fn open(&self, path: &Path) -> RasterResult<Box<dyn RasterSource>> {
        let file = File::open(path).map_err(|e| RasterError::io(path, e))?;
        let raster = Self::read(BufReader::new(file))?;
        debug!(
            path = %path.display(),
            width = raster.width(),
            height = raster.height(),
            bands = raster.band_count(),
            srid = ?raster.srid(),
            "Opened GeoTIFF"
        );
        Ok(Box::new(raster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_raster(bands: usize, srid: Option<u32>) -> MemoryRaster {
        let data = (0..bands)
            .map(|b| (0..12).map(|i| (b * 100 + i) as f64).collect())
            .collect();
        MemoryRaster::new(
            4,
            3,
            GeoTransform::north_up(500_000.0, 4_010_000.0, 10.0, -10.0),
            srid,
            data,
            vec![Some(-9999.0); bands],
        )
        .unwrap()
    }

    fn to_bytes(raster: &MemoryRaster) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        GeoTiffWriter::new(raster).write_to(&mut buffer).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_geokey_directory_projected() {
        let geokeys = build_geokey_directory(Some(32610));
        assert_eq!(&geokeys[..4], &[1, 1, 0, 3]);
        assert_eq!(geokeys[4], GT_MODEL_TYPE_GEO_KEY);
        assert_eq!(geokeys[7], MODEL_TYPE_PROJECTED);
        assert_eq!(geokeys[12], PROJECTED_CS_TYPE_GEO_KEY);
        assert_eq!(geokeys[15], 32610);
        assert_eq!(srid_from_geokeys(&geokeys), Some(32610));
    }

    #[test]
    fn test_geokey_directory_geographic() {
        let geokeys = build_geokey_directory(Some(4326));
        assert_eq!(geokeys[7], MODEL_TYPE_GEOGRAPHIC);
        assert_eq!(geokeys[12], GEOGRAPHIC_TYPE_GEO_KEY);
        assert_eq!(srid_from_geokeys(&geokeys), Some(4326));
    }

    #[test]
    fn test_geokey_directory_without_crs() {
        let geokeys = build_geokey_directory(None);
        assert_eq!(geokeys[3], 1);
        assert_eq!(srid_from_geokeys(&geokeys), None);
    }

    #[test]
    fn test_multiband_roundtrip() {
        let raster = sample_raster(3, Some(3857));
        let back = GeoTiffDriver::read(Cursor::new(to_bytes(&raster))).unwrap();
        assert_eq!(back, raster);
    }

    #[test]
    fn test_written_georeference_tags_decode_by_name() {
        let raster = sample_raster(1, Some(3857));
        let mut decoder = Decoder::new(Cursor::new(to_bytes(&raster))).unwrap();

        assert_eq!(Tag::ModelPixelScaleTag.to_u16(), 33550);
        assert_eq!(Tag::GdalNodata.to_u16(), 42113);
        let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).unwrap();
        assert_eq!(&scale[..2], &[10.0, 10.0]);
        let tie = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).unwrap();
        assert_eq!(&tie[3..5], &[500_000.0, 4_010_000.0]);
        let geokeys = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).unwrap();
        assert_eq!(srid_from_geokeys(&geokeys), Some(3857));
        assert!(decoder.get_tag_ascii_string(Tag::GdalNodata).unwrap().contains("-9999"));
    }

    #[test]
    fn test_skewed_transform_uses_model_transformation() {
        let mut raster = sample_raster(1, Some(3857));
        raster = MemoryRaster::new(
            4,
            3,
            GeoTransform {
                skew_x: 0.5,
                ..raster.geo_transform()
            },
            Some(3857),
            vec![raster.band(0).unwrap().to_vec()],
            vec![None],
        )
        .unwrap();
        let back = GeoTiffDriver::read(Cursor::new(to_bytes(&raster))).unwrap();
        assert_eq!(back.geo_transform().skew_x, 0.5);
        assert_eq!(back.nodata(0), None);
    }

    #[test]
    fn test_plain_tiff_is_rejected() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buffer).unwrap();
            encoder
                .write_image::<tiff::encoder::colortype::Gray8>(2, 2, &[0, 1, 2, 3])
                .unwrap();
        }
        let result = GeoTiffDriver::read(Cursor::new(buffer.into_inner()));
        assert!(matches!(result, Err(RasterError::Unsupported(_))));
    }

    #[test]
    fn test_not_a_tiff() {
        let result = GeoTiffDriver::read(Cursor::new(b"definitely not a tiff".to_vec()));
        assert!(matches!(result, Err(RasterError::Tiff(_))));
    }

    #[test]
    fn test_open_and_persist_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raster.tif");
        let raster = sample_raster(2, Some(3857));
        raster.persist(&path).unwrap();

        let opened = GeoTiffDriver.open(&path).unwrap();
        assert_eq!(opened.band_count(), 2);
        assert_eq!(opened.srid(), Some(3857));
        assert_eq!(opened.nodata(1), Some(-9999.0));
        assert_eq!(opened.read_band(1, (0, 0), (2, 1)).unwrap(), vec![100.0, 101.0]);
    }
}
