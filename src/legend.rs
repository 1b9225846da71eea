//! Legends and colormaps.
//!
//! A [`Legend`] is the stored, human-facing form: ordered entries with a
//! label, a value expression and a color string. A [`Colormap`] is the parsed
//! form the renderer evaluates per pixel.
//!
//! Expressions are either a single number (`"3"`, `"-1.5"`) matched exactly or
//! a half-open range `"min..max"` matching `min <= v < max`. Colors are
//! `"#rrggbb"`, `"#rrggbbaa"`, or an `[r, g, b]` / `[r, g, b, a]` array.

use image::Rgba;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum LegendError {
    #[error("Colormap is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Colormap must be a JSON object")]
    NotAnObject,

    #[error("Colormap key {0:?} is not an integer")]
    InvalidKey(String),

    #[error("Invalid color {0}")]
    InvalidColor(String),

    #[error("Invalid legend expression {0:?}")]
    InvalidExpression(String),
}

/// One row of a legend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub name: String,
    pub expression: String,
    pub color: String,
}

impl LegendEntry {
    #[must_use]
    pub fn new(name: impl Into<String>, expression: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            color: color.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Legend {
    pub title: String,
    pub entries: Vec<LegendEntry>,
}

impl Legend {
    #[must_use]
    pub fn new(title: impl Into<String>, entries: Vec<LegendEntry>) -> Self {
        Self {
            title: title.into(),
            entries,
        }
    }

    /// Parse the entries into a colormap.
    ///
    /// # Errors
    /// Returns an error for an unparseable expression or color.
    pub fn colormap(&self) -> Result<Colormap, LegendError> {
        let rules = self
            .entries
            .iter()
            .map(|e| {
                let expression = e.expression.trim();
                Ok(ColorRule {
                    key: expression.to_string(),
                    matcher: ValueMatcher::parse(expression)?,
                    color: parse_color_str(&e.color)?,
                })
            })
            .collect::<Result<Vec<_>, LegendError>>()?;
        Ok(Colormap { rules })
    }

    /// Entries as a JSON array of `{name, expression, color}` objects.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.entries)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ValueMatcher {
    Exact(f64),
    Range { min: f64, max: f64 },
}

impl ValueMatcher {
    fn parse(expression: &str) -> Result<Self, LegendError> {
        let invalid = || LegendError::InvalidExpression(expression.to_string());
        if let Some((min, max)) = expression.split_once("..") {
            let min: f64 = min.trim().parse().map_err(|_| invalid())?;
            let max: f64 = max.trim().parse().map_err(|_| invalid())?;
            if min >= max {
                return Err(invalid());
            }
            return Ok(Self::Range { min, max });
        }
        expression.parse().map(Self::Exact).map_err(|_| invalid())
    }

    fn matches(self, value: f64) -> bool {
        match self {
            Self::Exact(v) => v == value,
            Self::Range { min, max } => (min..max).contains(&value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ColorRule {
    key: String,
    matcher: ValueMatcher,
    color: Rgba<u8>,
}

/// Ordered value-to-color rules; the first matching rule wins.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Colormap {
    rules: Vec<ColorRule>,
}

impl Colormap {
    /// Parse an inline colormap such as `{"1": "#ff0000", "2": [0, 0, 255]}`.
    ///
    /// Keys must be integers.
    ///
    /// # Errors
    /// Returns an error for invalid JSON, non-integer keys, or bad colors.
    pub fn from_json(json: &str) -> Result<Self, LegendError> {
        let value: Value = serde_json::from_str(json)?;
        let Value::Object(map) = value else {
            return Err(LegendError::NotAnObject);
        };

        let mut rules = Vec::with_capacity(map.len());
        for (key, color) in &map {
            let int: i64 = key.trim().parse().map_err(|_| LegendError::InvalidKey(key.clone()))?;
            #[allow(clippy::cast_precision_loss)]
            let value = int as f64;
            rules.push(ColorRule {
                key: int.to_string(),
                matcher: ValueMatcher::Exact(value),
                color: parse_color(color)?,
            });
        }
        Ok(Self { rules })
    }

    /// Keep only rules whose key is in `keys`, compared as strings.
    #[must_use]
    pub fn filtered(mut self, keys: &[&str]) -> Self {
        self.rules.retain(|r| keys.iter().any(|k| k.trim() == r.key));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Color of `value`, if any rule matches.
    #[inline]
    #[must_use]
    pub fn color_for(&self, value: f64) -> Option<Rgba<u8>> {
        self.rules.iter().find(|r| r.matcher.matches(value)).map(|r| r.color)
    }
}

fn parse_color(value: &Value) -> Result<Rgba<u8>, LegendError> {
    match value {
        Value::String(s) => parse_color_str(s),
        Value::Array(items) if items.len() == 3 || items.len() == 4 => {
            let mut channels = [0_u8, 0, 0, 255];
            for (slot, item) in channels.iter_mut().zip(items) {
                *slot = item
                    .as_u64()
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or_else(|| LegendError::InvalidColor(value.to_string()))?;
            }
            Ok(Rgba(channels))
        }
        other => Err(LegendError::InvalidColor(other.to_string())),
    }
}

fn parse_color_str(color: &str) -> Result<Rgba<u8>, LegendError> {
    let invalid = || LegendError::InvalidColor(color.to_string());
    let hex = color.trim().strip_prefix('#').ok_or_else(invalid)?;
    if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
        return Err(invalid());
    }

    let mut channels = [0_u8, 0, 0, 255];
    for (i, slot) in channels.iter_mut().enumerate().take(hex.len() / 2) {
        *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
    }
    Ok(Rgba(channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landcover() -> Legend {
        Legend::new(
            "Landcover",
            vec![
                LegendEntry::new("Water", "1", "#0000ff"),
                LegendEntry::new("Forest", "2", "#00ff00"),
                LegendEntry::new("Urban", "3", "#ff000080"),
            ],
        )
    }

    #[test]
    fn test_inline_colormap() {
        let colormap = Colormap::from_json(r##"{"1": "#ff0000", "2": [0, 0, 255]}"##).unwrap();
        assert_eq!(colormap.len(), 2);
        assert_eq!(colormap.color_for(1.0), Some(Rgba([255, 0, 0, 255])));
        assert_eq!(colormap.color_for(2.0), Some(Rgba([0, 0, 255, 255])));
        assert_eq!(colormap.color_for(3.0), None);
    }

    #[test]
    fn test_inline_colormap_rejects_non_integer_keys() {
        assert!(matches!(Colormap::from_json(r##"{"a": "#ff0000"}"##), Err(LegendError::InvalidKey(_))));
        assert!(matches!(Colormap::from_json("[1, 2]"), Err(LegendError::NotAnObject)));
        assert!(matches!(Colormap::from_json("{"), Err(LegendError::Json(_))));
    }

    #[test]
    fn test_color_parsing() {
        assert_eq!(parse_color_str("#102030").unwrap(), Rgba([16, 32, 48, 255]));
        assert_eq!(parse_color_str("#10203040").unwrap(), Rgba([16, 32, 48, 64]));
        assert!(parse_color_str("102030").is_err());
        assert!(parse_color_str("#12345").is_err());
        assert!(parse_color_str("#gg0000").is_err());
        assert!(parse_color(&serde_json::json!([1, 2, 300])).is_err());
    }

    #[test]
    fn test_legend_colormap_and_filter() {
        let colormap = landcover().colormap().unwrap();
        assert_eq!(colormap.color_for(3.0), Some(Rgba([255, 0, 0, 128])));

        let subset = colormap.filtered(&["1", " 3"]);
        assert_eq!(subset.len(), 2);
        assert!(subset.color_for(2.0).is_none());
    }

    #[test]
    fn test_range_expression() {
        let legend = Legend::new(
            "Elevation",
            vec![
                LegendEntry::new("Low", "0..100", "#00ff00"),
                LegendEntry::new("High", "100..1e4", "#ffffff"),
            ],
        );
        let colormap = legend.colormap().unwrap();
        assert_eq!(colormap.color_for(99.9), Some(Rgba([0, 255, 0, 255])));
        assert_eq!(colormap.color_for(100.0), Some(Rgba([255, 255, 255, 255])));
        assert_eq!(colormap.color_for(-1.0), None);
    }

    #[test]
    fn test_invalid_expression() {
        let legend = Legend::new("Bad", vec![LegendEntry::new("x", "5..1", "#000000")]);
        assert!(matches!(legend.colormap(), Err(LegendError::InvalidExpression(_))));
    }

    #[test]
    fn test_legend_json() {
        let json = landcover().to_json().unwrap();
        let parsed: Vec<LegendEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(json.starts_with(r##"[{"name":"Water","expression":"1","color":"#0000ff"}"##));
    }
}
