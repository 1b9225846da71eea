//! EPSG lookups and coordinate transforms using pure Rust (proj4rs + crs-definitions).
//!
//! proj4rs works in radians for geographic systems; every function here takes
//! and returns degrees for geographic CRS and native units otherwise.

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

/// Get PROJ4 string for an EPSG code using the crs-definitions database
#[inline]
#[must_use]
pub fn get_proj_string(epsg: u32) -> Option<&'static str> {
    u16::try_from(epsg)
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// Get the well-known text of an EPSG code, if the database knows it.
#[inline]
#[must_use]
pub fn get_wkt(epsg: u32) -> Option<&'static str> {
    u16::try_from(epsg)
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.wkt)
}

/// Check if an EPSG code represents a geographic (lon/lat) CRS
#[inline]
#[must_use]
pub fn is_geographic_crs(epsg: u32) -> bool {
    if let Some(proj_str) = get_proj_string(epsg) {
        proj_str.contains("+proj=longlat")
    } else {
        // Geographic codes live in the 4000 range when the database has no entry
        epsg == 4326 || (4000..5000).contains(&epsg)
    }
}

/// Reusable transformer between two EPSG codes.
///
/// Building a [`Proj`] parses the PROJ string, so rasters that transform every
/// pixel construct one transformer and reuse it.
pub struct CoordTransformer {
    source_proj: Proj,
    target_proj: Proj,
    source_epsg: u32,
    target_epsg: u32,
    source_is_geographic: bool,
    target_is_geographic: bool,
}

impl CoordTransformer {
    /// Create a transformer from `source_epsg` to `target_epsg`.
    ///
    /// # Errors
    /// Returns an error if either code is missing from the crs-definitions
    /// database or its PROJ string cannot be parsed.
    pub fn new(source_epsg: u32, target_epsg: u32) -> Result<Self, String> {
        let source_str = get_proj_string(source_epsg)
            .ok_or_else(|| format!("EPSG:{source_epsg} is not in the crs-definitions database"))?;
        let target_str = get_proj_string(target_epsg)
            .ok_or_else(|| format!("EPSG:{target_epsg} is not in the crs-definitions database"))?;

        let source_proj = Proj::from_proj_string(source_str)
            .map_err(|e| format!("Invalid source projection EPSG:{source_epsg}: {e:?}"))?;
        let target_proj = Proj::from_proj_string(target_str)
            .map_err(|e| format!("Invalid target projection EPSG:{target_epsg}: {e:?}"))?;

        Ok(Self {
            source_proj,
            target_proj,
            source_epsg,
            target_epsg,
            source_is_geographic: is_geographic_crs(source_epsg),
            target_is_geographic: is_geographic_crs(target_epsg),
        })
    }

    /// Transform coordinates from source CRS to target CRS
    ///
    /// # Errors
    /// Returns an error if proj4rs rejects the point (e.g. outside the
    /// projection's domain).
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), String> {
        let (x_in, y_in) = if self.source_is_geographic {
            (x.to_radians(), y.to_radians())
        } else {
            (x, y)
        };

        let mut point = (x_in, y_in, 0.0);
        transform(&self.source_proj, &self.target_proj, &mut point).map_err(|e| {
            format!(
                "Transform from EPSG:{} to EPSG:{} failed: {e:?}",
                self.source_epsg, self.target_epsg
            )
        })?;

        let (out_x, out_y) = if self.target_is_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if out_x.is_finite() && out_y.is_finite() {
            Ok((out_x, out_y))
        } else {
            Err(format!(
                "Transform from EPSG:{} to EPSG:{} produced a non-finite point",
                self.source_epsg, self.target_epsg
            ))
        }
    }
}

/// Project a single point from one CRS to another.
///
/// # Errors
/// Returns an error if the EPSG code is not supported or the projection transformation fails.
#[inline]
pub fn project_point(source_epsg: u32, target_epsg: u32, x: f64, y: f64) -> Result<(f64, f64), String> {
    if source_epsg == target_epsg {
        return Ok((x, y));
    }
    CoordTransformer::new(source_epsg, target_epsg)?.transform(x, y)
}
