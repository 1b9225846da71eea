//! Checked numeric conversions used by the tile grid and the raster capability.
//!
//! # Assumptions
//!
//! ## Pixel counts (`usize` ↔ `f64`)
//! Raster and quadrant dimensions are far below 2^53, so `usize` to `f64`
//! conversions are done with a plain cast and an `allow` at the call site.
//!
//! ## Pixel positions (`f64` → `usize`)
//! Fractional pixel positions may be negative, NaN, or past the raster edge
//! after a warp, so they always go through [`f64_to_pixel_index`].
//!
//! ## Tile indices (`f64` → `u32`)
//! Tile indices are clamped into the grid of the zoom level, which has at
//! most 2^22 tiles per side.

use std::convert::TryFrom;

/// Convert a `usize` to `u32`, failing on 64-bit overflow.
///
/// # Errors
/// Returns an error string if the value exceeds `u32::MAX`.
#[inline]
pub fn usize_to_u32(value: usize) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("Value {value} exceeds u32 maximum"))
}

/// Convert a float to a pixel index, returning `None` if out of bounds.
///
/// # Arguments
/// * `value` - The floating point coordinate
/// * `max_value` - The maximum valid index (exclusive)
#[inline]
#[must_use]
pub fn f64_to_pixel_index(value: f64, max_value: usize) -> Option<usize> {
    if value.is_nan() || value < 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = value as usize;
    if index >= max_value {
        None
    } else {
        Some(index)
    }
}

/// Floor a fractional tile position and clamp it to `0..=max_index`.
///
/// NaN maps to 0.
#[inline]
#[must_use]
pub fn f64_to_tile_index(value: f64, max_index: u32) -> u32 {
    if value.is_nan() || value < 0.0 {
        return 0;
    }
    let floored = value.floor();
    if floored >= f64::from(max_index) {
        max_index
    } else {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = floored as u32;
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usize_to_u32() {
        assert_eq!(usize_to_u32(256), Ok(256));
        #[cfg(target_pointer_width = "64")]
        assert!(usize_to_u32(usize::MAX).is_err());
    }

    #[test]
    fn test_f64_to_pixel_index() {
        assert_eq!(f64_to_pixel_index(0.0, 100), Some(0));
        assert_eq!(f64_to_pixel_index(50.5, 100), Some(50));
        assert_eq!(f64_to_pixel_index(99.9, 100), Some(99));
        assert_eq!(f64_to_pixel_index(100.0, 100), None);
        assert_eq!(f64_to_pixel_index(-1.0, 100), None);
        assert_eq!(f64_to_pixel_index(f64::NAN, 100), None);
    }

    #[test]
    fn test_f64_to_tile_index() {
        assert_eq!(f64_to_tile_index(3.7, 7), 3);
        assert_eq!(f64_to_tile_index(-0.2, 7), 0);
        assert_eq!(f64_to_tile_index(8.0, 7), 7);
        assert_eq!(f64_to_tile_index(7.0, 7), 7);
        assert_eq!(f64_to_tile_index(f64::NAN, 7), 0);
    }
}
