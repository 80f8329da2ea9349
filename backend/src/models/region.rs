//! Bounding regions used to restrict both the climate grid and the feature query.

use geo::{BoundingRect, Coord, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::feature::FeatureGeometry;

/// Errors raised while reading or validating a bounding region.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegionError {
    #[error("Invalid region JSON at line {line}, column {column}: {message}")]
    InvalidJson {
        message: String,
        line: usize,
        column: usize,
    },
    #[error("Region must provide xmin/xmax/ymin/ymax or a FeatureCollection of polygons")]
    UnrecognizedShape,
    #[error("{axis} coordinate {value} is outside the valid range [{min}, {max}]")]
    OutOfRange {
        axis: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{axis} minimum {min} is greater than maximum {max}")]
    Inverted { axis: &'static str, min: f64, max: f64 },
    #[error("Region feature {index} is not a polygon: {reason}")]
    NotPolygon { index: usize, reason: String },
    #[error("Region FeatureCollection contains no polygons")]
    Empty,
}

/// Axis-aligned longitude/latitude box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    /// Validate and build a box. Longitudes must lie in [-180, 180] and
    /// latitudes in [-90, 90].
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Result<Self, RegionError> {
        check_range("x", x_min, -180.0, 180.0)?;
        check_range("x", x_max, -180.0, 180.0)?;
        check_range("y", y_min, -90.0, 90.0)?;
        check_range("y", y_max, -90.0, 90.0)?;
        if x_min > x_max {
            return Err(RegionError::Inverted {
                axis: "x",
                min: x_min,
                max: x_max,
            });
        }
        if y_min > y_max {
            return Err(RegionError::Inverted {
                axis: "y",
                min: y_min,
                max: y_max,
            });
        }
        Ok(Self {
            x_min,
            y_min,
            x_max,
            y_max,
        })
    }

    /// Build from `[x_min, y_min, x_max, y_max]`.
    pub fn from_array(bounds: [f64; 4]) -> Result<Self, RegionError> {
        Self::new(bounds[0], bounds[1], bounds[2], bounds[3])
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.x_min,
                y: self.y_min,
            },
            Coord {
                x: self.x_max,
                y: self.y_max,
            },
        )
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        self.to_rect().to_polygon()
    }
}

fn check_range(axis: &'static str, value: f64, min: f64, max: f64) -> Result<(), RegionError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(RegionError::OutOfRange {
            axis,
            value,
            min,
            max,
        })
    }
}

#[derive(Deserialize)]
struct RawBox {
    xmin: f64,
    xmax: f64,
    ymin: f64,
    ymax: f64,
}

/// Caller-supplied spatial restriction.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundingRegion {
    Box(BoundingBox),
    Polygons(MultiPolygon<f64>),
}

impl BoundingRegion {
    /// Parse region JSON: either `{"xmin":..,"xmax":..,"ymin":..,"ymax":..}` or a
    /// FeatureCollection whose features are all polygons.
    pub fn parse(json: &str) -> Result<Self, RegionError> {
        let value: Value = serde_json::from_str(json).map_err(|e| RegionError::InvalidJson {
            message: e.to_string(),
            line: e.line(),
            column: e.column(),
        })?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, RegionError> {
        if let Ok(raw) = serde_json::from_value::<RawBox>(value.clone()) {
            return BoundingBox::new(raw.xmin, raw.ymin, raw.xmax, raw.ymax)
                .map(BoundingRegion::Box);
        }

        if value.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
            return Err(RegionError::UnrecognizedShape);
        }
        let features = value
            .get("features")
            .and_then(Value::as_array)
            .ok_or(RegionError::UnrecognizedShape)?;

        let mut polygons = Vec::new();
        for (index, feature) in features.iter().enumerate() {
            let geometry = feature.get("geometry").unwrap_or(&Value::Null);
            match FeatureGeometry::from_geojson(geometry) {
                Ok(FeatureGeometry::Polygon(mp)) => polygons.extend(mp.0),
                Ok(other) => {
                    return Err(RegionError::NotPolygon {
                        index,
                        reason: format!("found {} geometry", other.kind()),
                    })
                }
                Err(e) => {
                    return Err(RegionError::NotPolygon {
                        index,
                        reason: e.to_string(),
                    })
                }
            }
        }
        if polygons.is_empty() {
            return Err(RegionError::Empty);
        }
        let region = MultiPolygon::new(polygons);
        if let Some(rect) = region.bounding_rect() {
            // Reuse the box validation for the envelope.
            BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)?;
        }
        Ok(BoundingRegion::Polygons(region))
    }

    /// Smallest box enclosing the region.
    pub fn envelope(&self) -> Option<BoundingBox> {
        match self {
            BoundingRegion::Box(b) => Some(*b),
            BoundingRegion::Polygons(mp) => mp.bounding_rect().map(|r| BoundingBox {
                x_min: r.min().x,
                y_min: r.min().y,
                x_max: r.max().x,
                y_max: r.max().y,
            }),
        }
    }

    /// The region as polygons.
    pub fn to_multipolygon(&self) -> MultiPolygon<f64> {
        match self {
            BoundingRegion::Box(b) => MultiPolygon::new(vec![b.to_polygon()]),
            BoundingRegion::Polygons(mp) => mp.clone(),
        }
    }

    /// One GeoJSON geometry string per polygon, for binding into spatial filters.
    pub fn geojson_polygons(&self) -> Vec<String> {
        self.to_multipolygon()
            .0
            .into_iter()
            .map(|p| FeatureGeometry::Polygon(MultiPolygon::new(vec![p])).to_geojson().to_string())
            .collect()
    }
}
