//! Vector infrastructure features and their GeoJSON form.
//!
//! Geometries are normalized into a closed set of three variants holding
//! multi-part `geo` types, so the aggregation engine matches exhaustively on
//! [`FeatureGeometry`] instead of inspecting type names at runtime.

use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

/// Geometry kind used for table sharding and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
}

impl GeometryKind {
    pub const ALL: [GeometryKind; 3] = [
        GeometryKind::Point,
        GeometryKind::Line,
        GeometryKind::Polygon,
    ];

    /// Suffix of the shard table holding this kind, e.g. `power_line`.
    pub fn table_suffix(self) -> &'static str {
        match self {
            GeometryKind::Point => "point",
            GeometryKind::Line => "line",
            GeometryKind::Polygon => "polygon",
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_suffix())
    }
}

impl FromStr for GeometryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "point" => Ok(GeometryKind::Point),
            "line" => Ok(GeometryKind::Line),
            "polygon" => Ok(GeometryKind::Polygon),
            _ => Err(format!("Unknown geometry kind: {}", s)),
        }
    }
}

/// Errors raised while reading a GeoJSON geometry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("Missing geometry")]
    Missing,
    #[error("Unsupported or malformed geometry: {0}")]
    Malformed(String),
    #[error("Coordinate must have at least two ordinates, found {0}")]
    ShortCoordinate(usize),
    #[error("Geometry has no parts")]
    Empty,
}

/// Feature geometry, one variant per aggregation strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    Point(MultiPoint<f64>),
    Line(MultiLineString<f64>),
    Polygon(MultiPolygon<f64>),
}

impl FeatureGeometry {
    pub fn kind(&self) -> GeometryKind {
        match self {
            FeatureGeometry::Point(_) => GeometryKind::Point,
            FeatureGeometry::Line(_) => GeometryKind::Line,
            FeatureGeometry::Polygon(_) => GeometryKind::Polygon,
        }
    }

    /// Points and multipoints are sampled directly rather than coverage-weighted.
    pub fn is_point_like(&self) -> bool {
        matches!(self, FeatureGeometry::Point(_))
    }

    /// Convert into a general `geo::Geometry` for predicates.
    pub fn to_geo(&self) -> Geometry<f64> {
        match self {
            FeatureGeometry::Point(points) => Geometry::MultiPoint(points.clone()),
            FeatureGeometry::Line(lines) => Geometry::MultiLineString(lines.clone()),
            FeatureGeometry::Polygon(polygons) => Geometry::MultiPolygon(polygons.clone()),
        }
    }

    /// Parse a GeoJSON geometry object.
    pub fn from_geojson(value: &Value) -> Result<Self, GeometryError> {
        if value.is_null() {
            return Err(GeometryError::Missing);
        }
        let raw: RawGeometry = serde_json::from_value(value.clone())
            .map_err(|e| GeometryError::Malformed(e.to_string()))?;

        let geometry = match raw {
            RawGeometry::Point(c) => {
                FeatureGeometry::Point(MultiPoint::new(vec![Point::from(coord(&c)?)]))
            }
            RawGeometry::MultiPoint(cs) => FeatureGeometry::Point(MultiPoint::new(
                cs.iter().map(|c| coord(c).map(Point::from)).collect::<Result<_, _>>()?,
            )),
            RawGeometry::LineString(cs) => {
                FeatureGeometry::Line(MultiLineString::new(vec![line_string(&cs)?]))
            }
            RawGeometry::MultiLineString(lines) => FeatureGeometry::Line(MultiLineString::new(
                lines.iter().map(|l| line_string(l)).collect::<Result<_, _>>()?,
            )),
            RawGeometry::Polygon(rings) => {
                FeatureGeometry::Polygon(MultiPolygon::new(vec![polygon(&rings)?]))
            }
            RawGeometry::MultiPolygon(polys) => FeatureGeometry::Polygon(MultiPolygon::new(
                polys.iter().map(|p| polygon(p)).collect::<Result<_, _>>()?,
            )),
        };

        let empty = match &geometry {
            FeatureGeometry::Point(p) => p.0.is_empty(),
            FeatureGeometry::Line(l) => l.0.is_empty(),
            FeatureGeometry::Polygon(p) => p.0.is_empty(),
        };
        if empty {
            return Err(GeometryError::Empty);
        }
        Ok(geometry)
    }

    /// Serialize as a GeoJSON geometry object (always the multi-part form,
    /// except single points which stay `Point`).
    pub fn to_geojson(&self) -> Value {
        match self {
            FeatureGeometry::Point(points) if points.0.len() == 1 => {
                let p = points.0[0];
                json!({"type": "Point", "coordinates": [p.x(), p.y()]})
            }
            FeatureGeometry::Point(points) => json!({
                "type": "MultiPoint",
                "coordinates": points.0.iter().map(|p| vec![p.x(), p.y()]).collect::<Vec<_>>(),
            }),
            FeatureGeometry::Line(lines) => json!({
                "type": "MultiLineString",
                "coordinates": lines.0.iter().map(ring_coords).collect::<Vec<_>>(),
            }),
            FeatureGeometry::Polygon(polygons) => json!({
                "type": "MultiPolygon",
                "coordinates": polygons
                    .0
                    .iter()
                    .map(|p| {
                        std::iter::once(p.exterior())
                            .chain(p.interiors())
                            .map(ring_coords)
                            .collect::<Vec<_>>()
                    })
                    .collect::<Vec<_>>(),
            }),
        }
    }
}

impl From<Point<f64>> for FeatureGeometry {
    fn from(point: Point<f64>) -> Self {
        FeatureGeometry::Point(MultiPoint::new(vec![point]))
    }
}

impl From<LineString<f64>> for FeatureGeometry {
    fn from(line: LineString<f64>) -> Self {
        FeatureGeometry::Line(MultiLineString::new(vec![line]))
    }
}

impl From<Polygon<f64>> for FeatureGeometry {
    fn from(polygon: Polygon<f64>) -> Self {
        FeatureGeometry::Polygon(MultiPolygon::new(vec![polygon]))
    }
}

impl From<MultiPolygon<f64>> for FeatureGeometry {
    fn from(polygons: MultiPolygon<f64>) -> Self {
        FeatureGeometry::Polygon(polygons)
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", content = "coordinates")]
enum RawGeometry {
    Point(Vec<f64>),
    MultiPoint(Vec<Vec<f64>>),
    LineString(Vec<Vec<f64>>),
    MultiLineString(Vec<Vec<Vec<f64>>>),
    Polygon(Vec<Vec<Vec<f64>>>),
    MultiPolygon(Vec<Vec<Vec<Vec<f64>>>>),
}

fn coord(ordinates: &[f64]) -> Result<Coord<f64>, GeometryError> {
    match ordinates {
        [x, y, ..] => Ok(Coord { x: *x, y: *y }),
        _ => Err(GeometryError::ShortCoordinate(ordinates.len())),
    }
}

fn line_string(coords: &[Vec<f64>]) -> Result<LineString<f64>, GeometryError> {
    Ok(LineString::new(
        coords.iter().map(|c| coord(c)).collect::<Result<_, _>>()?,
    ))
}

fn polygon(rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>, GeometryError> {
    let (exterior, interiors) = rings.split_first().ok_or(GeometryError::Empty)?;
    Ok(Polygon::new(
        line_string(exterior)?,
        interiors
            .iter()
            .map(|r| line_string(r))
            .collect::<Result<_, _>>()?,
    ))
}

fn ring_coords(ring: &LineString<f64>) -> Vec<Vec<f64>> {
    ring.0.iter().map(|c| vec![c.x, c.y]).collect()
}

/// Descriptive tags attached to a feature.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureTags {
    /// Backing category (e.g. "power")
    pub category: String,
    /// Type within the category (e.g. "line", "substation")
    pub feature_type: Option<String>,
    /// Optional subtype, only present for tables carrying the column
    pub subtype: Option<String>,
    /// Flattened free-form tags and joined attributes
    pub properties: Map<String, Value>,
}

/// An infrastructure feature read from the feature store. Immutable once queried.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorFeature {
    pub id: i64,
    pub geometry: FeatureGeometry,
    pub tags: FeatureTags,
}

impl VectorFeature {
    pub fn new(id: i64, geometry: impl Into<FeatureGeometry>, tags: FeatureTags) -> Self {
        Self {
            id,
            geometry: geometry.into(),
            tags,
        }
    }

    /// GeoJSON `Feature` with the id and tags flattened into `properties`.
    pub fn to_geojson(&self) -> Value {
        let mut properties = self.tags.properties.clone();
        properties.insert("id".to_string(), json!(self.id));
        properties.insert("feature_type".to_string(), json!(self.tags.feature_type));
        properties.insert("feature_subtype".to_string(), json!(self.tags.subtype));
        json!({
            "type": "Feature",
            "geometry": self.geometry.to_geojson(),
            "properties": Value::Object(properties),
        })
    }

    /// Read a GeoJSON `Feature` produced by the feature query.
    pub fn from_geojson(value: &Value, category: &str) -> Result<Self, GeometryError> {
        let geometry =
            FeatureGeometry::from_geojson(value.get("geometry").unwrap_or(&Value::Null))?;
        let mut properties = match value.get("properties") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        let id = properties
            .remove("id")
            .and_then(|v| v.as_i64())
            .or_else(|| value.get("id").and_then(Value::as_i64))
            .ok_or_else(|| GeometryError::Malformed("feature has no integer id".to_string()))?;
        let feature_type = take_string(&mut properties, "feature_type");
        let subtype = take_string(&mut properties, "feature_subtype");

        // Tags arrive as a nested object from the tags side table; flatten them.
        if let Some(Value::Object(tags)) = properties.remove("tags") {
            for (k, v) in tags {
                properties.entry(k).or_insert(v);
            }
        }

        Ok(Self {
            id,
            geometry,
            tags: FeatureTags {
                category: category.to_string(),
                feature_type,
                subtype,
                properties,
            },
        })
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

/// GeoJSON FeatureCollection as returned by the feature query.
///
/// `features` is never null: a null or missing array deserializes as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub collection_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub features: Vec<Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl FeatureCollection {
    /// An empty-but-valid collection.
    pub fn empty() -> Self {
        Self {
            collection_type: "FeatureCollection".to_string(),
            features: Vec::new(),
        }
    }

    pub fn from_features<'a>(features: impl IntoIterator<Item = &'a VectorFeature>) -> Self {
        Self {
            collection_type: "FeatureCollection".to_string(),
            features: features.into_iter().map(VectorFeature::to_geojson).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Parse every feature; unreadable ones are skipped and returned with their error.
    pub fn to_features(&self, category: &str) -> (Vec<VectorFeature>, Vec<(usize, GeometryError)>) {
        let mut features = Vec::with_capacity(self.features.len());
        let mut rejected = Vec::new();
        for (idx, raw) in self.features.iter().enumerate() {
            match VectorFeature::from_geojson(raw, category) {
                Ok(feature) => features.push(feature),
                Err(e) => rejected.push((idx, e)),
            }
        }
        (features, rejected)
    }
}
