//! # Field Loading
//!
//! Field boundaries from a GeoJSON `FeatureCollection`. Each feature needs a
//! `Polygon` (or single-part `MultiPolygon`) geometry and an id property.
//! Interior rings are ignored.

use agrs_core::{AgrsError, FieldBoundary, Polygon};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

/// Maximum size of a fields file (50 MB).
const MAX_FIELDS_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum number of fields in one run.
pub const MAX_FIELDS: usize = 100_000;

/// Load fields from a GeoJSON file.
pub fn load_fields(path: &Path, id_property: &str) -> Result<Vec<FieldBoundary>, AgrsError> {
    let validated = crate::cli::validate_file_path(path)?;
    crate::cli::validate_file_size(&validated, MAX_FIELDS_FILE_SIZE)?;
    let text = std::fs::read_to_string(&validated)
        .map_err(|e| AgrsError::IoError(format!("Read fields: {}", e)))?;
    parse_fields(&text, id_property)
}

/// Parse a GeoJSON `FeatureCollection` into fields, keeping feature order.
pub fn parse_fields(text: &str, id_property: &str) -> Result<Vec<FieldBoundary>, AgrsError> {
    let doc: Value = serde_json::from_str(text)
        .map_err(|e| AgrsError::SerializationError(format!("Invalid GeoJSON: {}", e)))?;

    let features = doc["features"].as_array().ok_or_else(|| {
        AgrsError::SerializationError("GeoJSON must be a FeatureCollection".to_string())
    })?;

    if features.len() > MAX_FIELDS {
        return Err(AgrsError::SerializationError(format!(
            "Field count {} exceeds maximum allowed {}",
            features.len(),
            MAX_FIELDS
        )));
    }

    let mut seen = BTreeSet::new();
    let mut fields = Vec::with_capacity(features.len());
    for (i, feature) in features.iter().enumerate() {
        let id = match &feature["properties"][id_property] {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => {
                return Err(AgrsError::MissingInput(format!(
                    "Feature {} has no '{}' property",
                    i, id_property
                )));
            }
        };
        if !seen.insert(id.clone()) {
            tracing::warn!(field = %id, "duplicate field id");
        }

        let polygon = parse_polygon(&feature["geometry"])
            .map_err(|e| AgrsError::SerializationError(format!("Field '{}': {}", id, e)))?;
        fields.push(FieldBoundary::new(id, polygon));
    }

    tracing::debug!(count = fields.len(), "fields loaded");
    Ok(fields)
}

fn parse_polygon(geometry: &Value) -> Result<Polygon, AgrsError> {
    let rings = match geometry["type"].as_str() {
        Some("Polygon") => &geometry["coordinates"],
        Some("MultiPolygon") => {
            let parts = geometry["coordinates"]
                .as_array()
                .ok_or_else(|| malformed("MultiPolygon coordinates"))?;
            if parts.len() != 1 {
                return Err(AgrsError::SerializationError(format!(
                    "MultiPolygon with {} parts is not supported",
                    parts.len()
                )));
            }
            &parts[0]
        }
        Some(other) => {
            return Err(AgrsError::SerializationError(format!(
                "Unsupported geometry type '{}'",
                other
            )));
        }
        None => return Err(malformed("geometry")),
    };

    let exterior = rings
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("exterior ring"))?;

    let mut vertices = Vec::with_capacity(exterior.len());
    for position in exterior {
        let x = position[0].as_f64().ok_or_else(|| malformed("position"))?;
        let y = position[1].as_f64().ok_or_else(|| malformed("position"))?;
        vertices.push((x, y));
    }
    Polygon::new(vertices)
}

fn malformed(what: &str) -> AgrsError {
    AgrsError::SerializationError(format!("Malformed GeoJSON {}", what))
}
