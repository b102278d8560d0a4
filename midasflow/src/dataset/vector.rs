//! GeoJSON output layers.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde_json::{json, Map, Value};

use crate::coord::Point;
use crate::error::{MidasError, Result};

/// Feature geometry. Polygon rings are closed by the writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Point),
    LineString(Vec<Point>),
    Polygon(Vec<Vec<Point>>),
    MultiPolygon(Vec<Vec<Vec<Point>>>),
}

fn position(p: &Point) -> Value {
    json!([p.x, p.y])
}

fn line(points: &[Point]) -> Value {
    Value::Array(points.iter().map(position).collect())
}

fn ring(points: &[Point]) -> Value {
    let mut coords: Vec<Value> = points.iter().map(position).collect();
    if let (Some(first), Some(last)) = (points.first(), points.last()) {
        if first != last {
            coords.push(position(first));
        }
    }
    Value::Array(coords)
}

fn polygon(rings: &[Vec<Point>]) -> Value {
    Value::Array(rings.iter().map(|r| ring(r)).collect())
}

impl Geometry {
    pub fn to_json(&self) -> Value {
        match self {
            Geometry::Point(p) => json!({"type": "Point", "coordinates": position(p)}),
            Geometry::LineString(points) => {
                json!({"type": "LineString", "coordinates": line(points)})
            }
            Geometry::Polygon(rings) => json!({"type": "Polygon", "coordinates": polygon(rings)}),
            Geometry::MultiPolygon(polygons) => json!({
                "type": "MultiPolygon",
                "coordinates": polygons.iter().map(|p| polygon(p)).collect::<Vec<_>>(),
            }),
        }
    }
}

/// One output feature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feature {
    pub geometry: Option<Geometry>,
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Option<Geometry>) -> Self {
        Self {
            geometry,
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    fn to_json(&self) -> Value {
        json!({
            "type": "Feature",
            "properties": Value::Object(self.properties.clone()),
            "geometry": self.geometry.as_ref().map_or(Value::Null, Geometry::to_json),
        })
    }
}

/// Writes a named FeatureCollection.
pub fn write_feature_collection(path: &Path, name: &str, features: &[Feature]) -> Result<()> {
    let collection = json!({
        "type": "FeatureCollection",
        "name": name,
        "features": features.iter().map(Feature::to_json).collect::<Vec<_>>(),
    });

    let write_err = |source| MidasError::WriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = BufWriter::new(File::create(path).map_err(write_err)?);
    serde_json::to_writer(&mut writer, &collection).map_err(|e| MidasError::EncodeFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    writer.flush().map_err(write_err)
}
