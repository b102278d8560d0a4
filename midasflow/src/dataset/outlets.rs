//! Outlet layers in GeoJSON.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::coord::Point;
use crate::diagnostics::{Diagnostics, Issue};
use crate::error::{MidasError, Result};
use crate::outlets::OutletRecord;

use super::{parse_number, parse_pairs};

/// Layer name used when none is given.
pub const DEFAULT_OUTLETS_LAYER: &str = "outlets";

const GEOJSON_EXT: &str = "geojson";

/// Parsed outlets-read options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutletOptions {
    /// Maximum snapping distance for table networks.
    pub snap: Option<f64>,
    /// Property holding x when a feature has no point geometry.
    pub x_field: Option<String>,
    /// Property holding y when a feature has no point geometry.
    pub y_field: Option<String>,
}

impl OutletOptions {
    pub fn parse(options: &str, diagnostics: &mut Diagnostics) -> Result<Self> {
        let mut parsed = OutletOptions::default();
        for (key, value) in parse_pairs(options)? {
            match key.as_str() {
                "snap" => {
                    let distance = parse_number(&key, &value)?;
                    if distance < 0.0 {
                        return Err(MidasError::InvalidOption {
                            name: key,
                            value,
                            reason: "must not be negative".to_string(),
                        });
                    }
                    parsed.snap = Some(distance);
                }
                "x" => parsed.x_field = Some(value),
                "y" => parsed.y_field = Some(value),
                _ => diagnostics.push(Issue::UnknownOption {
                    source: "outlets",
                    key,
                }),
            }
        }
        Ok(parsed)
    }
}

/// Finds the GeoJSON file for a layer.
///
/// A directory holds `<layer>.geojson`. A file is used as is, but a given
/// layer name must match its stem or its collection name.
fn locate_layer(path: &Path, layer: Option<&str>) -> Result<PathBuf> {
    if path.is_dir() {
        let name = layer.unwrap_or(DEFAULT_OUTLETS_LAYER);
        let file = path.join(format!("{}.{}", name, GEOJSON_EXT));
        if file.is_file() {
            return Ok(file);
        }
        return Err(MidasError::LayerNotFound {
            path: path.to_path_buf(),
            layer: name.to_string(),
        });
    }
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    Err(MidasError::DatasetNotFound(path.to_path_buf()))
}

/// Reads outlet records from a GeoJSON layer.
///
/// `id_col` names the basin id property; without it, ids are the 1-based
/// feature order. Values that are not positive integers are kept as record
/// errors so they can be reported per outlet. A named column that no feature
/// carries is an error.
pub fn read_outlets(
    path: &Path,
    layer: Option<&str>,
    options: &OutletOptions,
    id_col: Option<&str>,
    oid_col: Option<&str>,
) -> Result<Vec<OutletRecord>> {
    let file = locate_layer(path, layer)?;
    let text = std::fs::read_to_string(&file).map_err(|source| MidasError::ReadFailed {
        path: file.clone(),
        source,
    })?;
    let root: Value =
        serde_json::from_str(&text).map_err(|e| MidasError::invalid_dataset(&file, e.to_string()))?;

    if root.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
        return Err(MidasError::invalid_dataset(&file, "not a FeatureCollection"));
    }
    if let (Some(layer), true) = (layer, path.is_file()) {
        let stem = file.file_stem().and_then(|s| s.to_str());
        let name = root.get("name").and_then(Value::as_str);
        if stem != Some(layer) && name != Some(layer) {
            return Err(MidasError::LayerNotFound {
                path: file,
                layer: layer.to_string(),
            });
        }
    }
    let features = root
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| MidasError::invalid_dataset(&file, "missing features array"))?;

    let empty = Map::new();
    let properties: Vec<&Map<String, Value>> = features
        .iter()
        .map(|f| f.get("properties").and_then(Value::as_object).unwrap_or(&empty))
        .collect();
    for column in [id_col, oid_col].into_iter().flatten() {
        if !features.is_empty() && !properties.iter().any(|p| p.contains_key(column)) {
            return Err(MidasError::MissingColumn {
                column: column.to_string(),
            });
        }
    }

    let records: Vec<OutletRecord> = features
        .iter()
        .zip(&properties)
        .enumerate()
        .map(|(i, (feature, props))| {
            let ordinal = i + 1;
            let id = match id_col {
                Some(column) => parse_id(props.get(column)),
                None => u32::try_from(ordinal).map_err(|_| "too many outlets".to_string()),
            };
            OutletRecord {
                ordinal,
                id,
                oid: oid_col.and_then(|column| parse_oid(props.get(column))),
                point: point_of(feature, props, options),
            }
        })
        .collect();

    debug!(path = %file.display(), outlets = records.len(), "outlets read");
    Ok(records)
}

fn parse_id(value: Option<&Value>) -> std::result::Result<u32, String> {
    let value = match value {
        None | Some(Value::Null) => return Err("missing".to_string()),
        Some(value) => value,
    };
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.fract() == 0.0 && n >= 1.0 && n <= u32::MAX as f64 => Ok(n as u32),
        _ => Err(format!("{} is not a positive integer", value)),
    }
}

fn parse_oid(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn point_of(feature: &Value, props: &Map<String, Value>, options: &OutletOptions) -> Option<Point> {
    let geometry = feature.get("geometry").filter(|g| !g.is_null());
    if let Some(geometry) = geometry {
        if geometry.get("type").and_then(Value::as_str) == Some("Point") {
            let coords = geometry.get("coordinates")?.as_array()?;
            let x = coords.first()?.as_f64()?;
            let y = coords.get(1)?.as_f64()?;
            return Some(Point::new(x, y));
        }
        return None;
    }
    let x = props.get(options.x_field.as_deref()?)?;
    let y = props.get(options.y_field.as_deref()?)?;
    Some(Point::new(number_of(x)?, number_of(y)?))
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
