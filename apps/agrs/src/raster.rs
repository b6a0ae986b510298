//! # Grid Raster Clipper
//!
//! A [`BandClipper`] over single-band rasters stored as JSON grids:
//!
//! ```json
//! { "origin": [500000.0, 4200000.0], "pixel_size": [10.0, 10.0],
//!   "data": [[0.12, 0.13], [null, 0.11]] }
//! ```
//!
//! `origin` is the top-left corner, rows run towards decreasing `y`, and
//! `null` marks nodata. Polygons must be in the raster's coordinates.

use agrs_core::{AgrsError, AssetRef, BandClipper, BandCode, BandSet, Polygon, Raster};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Maximum size of a single raster file (200 MB).
const MAX_RASTER_FILE_SIZE: u64 = 200 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct GridDocument {
    origin: [f64; 2],
    pixel_size: [f64; 2],
    data: Vec<Vec<Option<f64>>>,
}

/// A georeferenced single-band grid; nodata cells are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRaster {
    origin: (f64, f64),
    pixel_size: (f64, f64),
    values: Raster,
}

impl GridRaster {
    /// Parse the JSON grid format.
    pub fn from_json_str(text: &str) -> Result<Self, AgrsError> {
        let doc: GridDocument = serde_json::from_str(text)
            .map_err(|e| AgrsError::Raster(format!("Invalid raster JSON: {}", e)))?;

        let [dx, dy] = doc.pixel_size;
        if !(dx.is_finite() && dy.is_finite() && dx > 0.0 && dy > 0.0) {
            return Err(AgrsError::Raster(format!(
                "pixel_size must be positive, got [{}, {}]",
                dx, dy
            )));
        }

        let rows = doc.data.len();
        let cols = doc.data.first().map_or(0, Vec::len);
        if doc.data.iter().any(|row| row.len() != cols) {
            return Err(AgrsError::Raster("raster rows differ in length".to_string()));
        }

        let flat: Vec<f64> = doc
            .data
            .into_iter()
            .flatten()
            .map(|cell| cell.unwrap_or(f64::NAN))
            .collect();
        let values = Raster::from_shape_vec((rows, cols), flat)
            .map_err(|e| AgrsError::Raster(format!("Invalid raster shape: {}", e)))?;

        Ok(Self {
            origin: (doc.origin[0], doc.origin[1]),
            pixel_size: (dx, dy),
            values,
        })
    }

    /// Read a grid from disk.
    pub fn from_path(path: &Path) -> Result<Self, AgrsError> {
        let validated = crate::cli::validate_file_path(path)?;
        crate::cli::validate_file_size(&validated, MAX_RASTER_FILE_SIZE)?;
        let text = std::fs::read_to_string(&validated)
            .map_err(|e| AgrsError::IoError(format!("Read raster {:?}: {}", validated, e)))?;
        Self::from_json_str(&text)
    }

    #[must_use]
    pub fn values(&self) -> &Raster {
        &self.values
    }

    /// Crop to the polygon's bounding box and mask cells whose centers fall
    /// outside the polygon. `None` when the box misses the grid entirely.
    #[must_use]
    pub fn clip(&self, polygon: &Polygon) -> Option<Raster> {
        let (x0, y0) = self.origin;
        let (dx, dy) = self.pixel_size;
        let (rows, cols) = self.values.dim();
        let bbox = polygon.bbox();

        let c0 = ((bbox.min_x - x0) / dx).floor().clamp(0.0, cols as f64) as usize;
        let c1 = ((bbox.max_x - x0) / dx).ceil().clamp(0.0, cols as f64) as usize;
        let r0 = ((y0 - bbox.max_y) / dy).floor().clamp(0.0, rows as f64) as usize;
        let r1 = ((y0 - bbox.min_y) / dy).ceil().clamp(0.0, rows as f64) as usize;
        if c0 >= c1 || r0 >= r1 {
            return None;
        }

        Some(Raster::from_shape_fn((r1 - r0, c1 - c0), |(i, j)| {
            let (r, c) = (r0 + i, c0 + j);
            let cx = x0 + (c as f64 + 0.5) * dx;
            let cy = y0 - (r as f64 + 0.5) * dy;
            if polygon.contains(cx, cy) {
                self.values[[r, c]]
            } else {
                f64::NAN
            }
        }))
    }
}

/// Reads every referenced grid from disk and clips it to the field.
///
/// If any band misses the polygon, the whole item yields an empty set.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridRasterClipper;

impl GridRasterClipper {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BandClipper for GridRasterClipper {
    fn clip(
        &self,
        polygon: &Polygon,
        refs: &BTreeMap<BandCode, AssetRef>,
    ) -> Result<BandSet, AgrsError> {
        let mut bands = BandSet::new();
        for (band, href) in refs {
            let grid = GridRaster::from_path(Path::new(href.as_str()))?;
            match grid.clip(polygon) {
                Some(raster) => bands.insert(*band, raster),
                None => {
                    tracing::debug!(band = %band, href = href.as_str(), "polygon outside raster");
                    return Ok(BandSet::new());
                }
            }
        }
        Ok(bands)
    }
}
