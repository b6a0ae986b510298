//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the feature engine:
//! - Sentinel-2 band codes and the typed optional-band container (`BandCode`, `BandSet`)
//! - Catalog records (`CatalogItem`, `AssetRef`)
//! - The season window and temporal fractions (`SeasonWindow`)
//! - Field geometry (`Polygon`, `BoundingBox`, `FieldBoundary`)
//! - Error types (`AgrsError`)
//!
//! ## Numeric Conventions
//!
//! All rasters are `ndarray::Array2<f64>`. Invalid or masked pixels are `NaN`;
//! no type in this module ever uses a sentinel value other than `NaN`.

mod geometry;

pub use geometry::{BoundingBox, FieldBoundary, Polygon};

use chrono::{DateTime, Duration, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A single-band 2-D array clipped to one field.
pub type Raster = Array2<f64>;

// =============================================================================
// BAND CODES
// =============================================================================

/// Sentinel-2 L2A reflectance bands, keyed by their STAC asset names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BandCode {
    /// Coastal aerosol (60 m)
    B01,
    /// Blue
    B02,
    /// Green
    B03,
    /// Red
    B04,
    /// Red edge 1
    B05,
    /// Red edge 2
    B06,
    /// Red edge 3
    B07,
    /// Near infrared (broad)
    B08,
    /// Near infrared (narrow)
    B8A,
    /// Water vapour
    B09,
    /// Short-wave infrared 1
    B11,
    /// Short-wave infrared 2
    B12,
}

impl BandCode {
    /// Every band, in asset-key order.
    pub const ALL: [BandCode; 12] = [
        BandCode::B01,
        BandCode::B02,
        BandCode::B03,
        BandCode::B04,
        BandCode::B05,
        BandCode::B06,
        BandCode::B07,
        BandCode::B08,
        BandCode::B8A,
        BandCode::B09,
        BandCode::B11,
        BandCode::B12,
    ];

    /// The STAC asset key for this band.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BandCode::B01 => "B01",
            BandCode::B02 => "B02",
            BandCode::B03 => "B03",
            BandCode::B04 => "B04",
            BandCode::B05 => "B05",
            BandCode::B06 => "B06",
            BandCode::B07 => "B07",
            BandCode::B08 => "B08",
            BandCode::B8A => "B8A",
            BandCode::B09 => "B09",
            BandCode::B11 => "B11",
            BandCode::B12 => "B12",
        }
    }
}

impl fmt::Display for BandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BandCode {
    type Err = AgrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        BandCode::ALL
            .iter()
            .copied()
            .find(|b| b.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AgrsError::InvalidConfiguration(format!("Unknown band code: {}", s)))
    }
}

// =============================================================================
// BAND SET (typed optional-band container)
// =============================================================================

/// Clipped band arrays for one (item, field) pair.
///
/// Bands are optional; callers ask for what they need and fall back through
/// ordered chains with [`BandSet::first_available`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandSet {
    bands: BTreeMap<BandCode, Raster>,
}

impl BandSet {
    /// Create an empty band set (the "no spatial overlap" sentinel).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a band.
    pub fn insert(&mut self, band: BandCode, raster: Raster) {
        self.bands.insert(band, raster);
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, band: BandCode, raster: Raster) -> Self {
        self.insert(band, raster);
        self
    }

    /// Remove a band, returning its raster if present.
    pub fn remove(&mut self, band: BandCode) -> Option<Raster> {
        self.bands.remove(&band)
    }

    #[must_use]
    pub fn get(&self, band: BandCode) -> Option<&Raster> {
        self.bands.get(&band)
    }

    #[must_use]
    pub fn contains(&self, band: BandCode) -> bool {
        self.bands.contains_key(&band)
    }

    /// First band of `chain` that is present, in chain order.
    #[must_use]
    pub fn first_available(&self, chain: &[BandCode]) -> Option<(BandCode, &Raster)> {
        chain
            .iter()
            .find_map(|band| self.bands.get(band).map(|raster| (*band, raster)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bands.len()
    }

    /// Bands present, in band-code order.
    pub fn codes(&self) -> impl Iterator<Item = BandCode> + '_ {
        self.bands.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BandCode, &Raster)> {
        self.bands.iter().map(|(band, raster)| (*band, raster))
    }
}

impl FromIterator<(BandCode, Raster)> for BandSet {
    fn from_iter<I: IntoIterator<Item = (BandCode, Raster)>>(iter: I) -> Self {
        Self {
            bands: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// CATALOG ITEMS
// =============================================================================

/// Retrievable reference to one asset of a catalog item (usually an href).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetRef(pub String);

impl AssetRef {
    #[must_use]
    pub fn new(href: impl Into<String>) -> Self {
        Self(href.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One acquisition returned by a catalog search.
///
/// Immutable once fetched; the pipeline only ever holds `&CatalogItem`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Catalog identifier of the acquisition.
    pub id: String,
    /// Acquisition time.
    pub timestamp: DateTime<Utc>,
    /// Scene cloud cover in percent (0-100), when the catalog reports it.
    pub cloud_cover: Option<f64>,
    /// Asset key to reference. Non-band assets (previews, masks) may be present.
    pub assets: BTreeMap<String, AssetRef>,
}

impl CatalogItem {
    /// Create an item without cloud-cover metadata or assets.
    #[must_use]
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            cloud_cover: None,
            assets: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_cloud_cover(mut self, percent: f64) -> Self {
        self.cloud_cover = Some(percent);
        self
    }

    #[must_use]
    pub fn with_asset(mut self, key: impl Into<String>, href: impl Into<String>) -> Self {
        self.assets.insert(key.into(), AssetRef::new(href));
        self
    }

    /// Band codes for which this item carries an asset, in band-code order.
    #[must_use]
    pub fn available_bands(&self) -> Vec<BandCode> {
        let mut bands: Vec<BandCode> = self
            .assets
            .keys()
            .filter_map(|key| key.parse::<BandCode>().ok())
            .collect();
        bands.sort();
        bands.dedup();
        bands
    }

    /// References for the requested bands that this item actually carries.
    #[must_use]
    pub fn band_refs(&self, bands: &[BandCode]) -> BTreeMap<BandCode, AssetRef> {
        bands
            .iter()
            .filter_map(|band| {
                self.assets
                    .get(band.as_str())
                    .map(|asset| (*band, asset.clone()))
            })
            .collect()
    }
}

// =============================================================================
// SEASON WINDOW
// =============================================================================

/// The `[start, end]` season that normalizes acquisition times to fractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SeasonWindowRepr")]
pub struct SeasonWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct SeasonWindowRepr {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<SeasonWindowRepr> for SeasonWindow {
    type Error = AgrsError;

    fn try_from(repr: SeasonWindowRepr) -> Result<Self, Self::Error> {
        SeasonWindow::new(repr.start, repr.end)
    }
}

impl SeasonWindow {
    /// Create a window; `start` must be strictly before `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, AgrsError> {
        if start >= end {
            return Err(AgrsError::InvalidConfiguration(format!(
                "Season start {} must be before season end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Whether `ts` lies inside the closed window.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// `(ts - start) / (end - start)`, not clamped.
    #[must_use]
    pub fn fraction_of(&self, ts: DateTime<Utc>) -> f64 {
        let offset = (ts - self.start).num_milliseconds() as f64;
        let span = self.duration().num_milliseconds() as f64;
        offset / span
    }

    /// Absolute time at fraction `f` of the season (millisecond resolution).
    #[must_use]
    pub fn at_fraction(&self, f: f64) -> DateTime<Utc> {
        let span = self.duration().num_milliseconds() as f64;
        let offset = (f * span).round() as i64;
        self.start + Duration::milliseconds(offset)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in agrs.
///
/// - Data-quality conditions (missing bands, empty stages, no overlap) are
///   NOT errors; they surface as NaN values or skipped samples.
/// - Numeric edge cases never produce errors.
#[derive(Debug, Error)]
pub enum AgrsError {
    /// Required input is absent: no catalog items, no selected snapshots, no fields.
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// The request or configuration cannot be executed as given.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The catalog search collaborator failed.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// The raster read/clip collaborator failed.
    #[error("Raster error: {0}")]
    Raster(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::array;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, day, 0, 0, 0)
            .single()
            .expect("valid date")
    }

    #[test]
    fn band_code_round_trips_through_asset_key() {
        for band in BandCode::ALL {
            assert_eq!(band.as_str().parse::<BandCode>().expect("parse"), band);
        }
        assert_eq!("b8a".parse::<BandCode>().expect("parse"), BandCode::B8A);
        assert!("B10".parse::<BandCode>().is_err());
    }

    #[test]
    fn first_available_respects_chain_order() {
        let set = BandSet::new()
            .with(BandCode::B8A, array![[1.0]])
            .with(BandCode::B06, array![[2.0]]);

        let (nir, _) = set
            .first_available(&[BandCode::B08, BandCode::B8A])
            .expect("fallback");
        assert_eq!(nir, BandCode::B8A);

        let (re, _) = set
            .first_available(&[BandCode::B05, BandCode::B06, BandCode::B07])
            .expect("fallback");
        assert_eq!(re, BandCode::B06);

        assert!(set.first_available(&[BandCode::B11]).is_none());
    }

    #[test]
    fn catalog_item_ignores_non_band_assets() {
        let item = CatalogItem::new("S2A_1", ts(1))
            .with_asset("visual", "visual.tif")
            .with_asset("B04", "b04.tif")
            .with_asset("B02", "b02.tif")
            .with_asset("SCL", "scl.tif");

        assert_eq!(item.available_bands(), vec![BandCode::B02, BandCode::B04]);

        let refs = item.band_refs(&[BandCode::B04, BandCode::B08]);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[&BandCode::B04].as_str(), "b04.tif");
    }

    #[test]
    fn season_window_rejects_inverted_range() {
        assert!(SeasonWindow::new(ts(10), ts(1)).is_err());
        assert!(SeasonWindow::new(ts(1), ts(1)).is_err());
        assert!(SeasonWindow::new(ts(1), ts(10)).is_ok());
    }

    #[test]
    fn season_window_deserialize_checks_order() {
        let season: SeasonWindow = serde_json::from_str(
            r#"{"start": "2024-04-01T00:00:00Z", "end": "2024-04-11T00:00:00Z"}"#,
        )
        .expect("ordered window");
        assert_eq!(season.fraction_of(ts(6)), 0.5);

        let inverted = serde_json::from_str::<SeasonWindow>(
            r#"{"start": "2024-04-11T00:00:00Z", "end": "2024-04-01T00:00:00Z"}"#,
        );
        assert!(inverted.is_err());
        let empty = serde_json::from_str::<SeasonWindow>(
            r#"{"start": "2024-04-01T00:00:00Z", "end": "2024-04-01T00:00:00Z"}"#,
        );
        assert!(empty.is_err());
    }

    #[test]
    fn fraction_is_not_clamped() {
        let season = SeasonWindow::new(ts(1), ts(11)).expect("window");
        assert_eq!(season.fraction_of(ts(1)), 0.0);
        assert_eq!(season.fraction_of(ts(6)), 0.5);
        assert_eq!(season.fraction_of(ts(11)), 1.0);
        assert!(season.fraction_of(ts(21)) > 1.0);
        assert_eq!(season.at_fraction(0.5), ts(6));
    }
}
