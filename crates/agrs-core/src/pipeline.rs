//! # Feature Pipeline
//!
//! Drives selection, clipping, index computation and aggregation, one field
//! at a time.
//!
//! ```text
//! CatalogSource::search ──► SelectionPolicy::select ──► Snapshot list
//!                                                          │
//!           for each field ◄───────────────────────────────┘
//!             for each snapshot: BandClipper::clip ──► compute_indices
//!             StageAggregator::aggregate ──► FeatureRow
//! ```
//!
//! ## Collaborators
//!
//! Catalog search and raster clipping are I/O and live outside this crate.
//! They enter through the [`CatalogSource`] and [`BandClipper`] traits.
//! Implementors should be blocking and stateless; the pipeline never retries.
//!
//! ## Error Surface
//!
//! - No fields, no catalog items, or no selected snapshots: `MissingInput`.
//! - Collaborator failures propagate unchanged.
//! - A field with no overlap, missing bands or empty stages still gets a row.

use crate::aggregation::{FeatureRow, IndexSample, IndexTimeSeries};
use crate::config::FeatureConfig;
use crate::indices::compute_indices;
use crate::selection::SelectionPolicy;
use crate::{
    AgrsError, AssetRef, BandCode, BandSet, BoundingBox, CatalogItem, FieldBoundary, Polygon,
    SeasonWindow,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// COLLABORATOR TRAITS
// =============================================================================

/// Catalog search: acquisitions intersecting an area within a season.
pub trait CatalogSource: Send + Sync {
    /// Return at most `limit` items. An empty result is not an error here.
    fn search(
        &self,
        bbox: &BoundingBox,
        season: &SeasonWindow,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, AgrsError>;
}

/// Raster read + clip: per-band arrays of one item restricted to a polygon.
pub trait BandClipper: Send + Sync {
    /// Clip every referenced band to `polygon`.
    ///
    /// Returns an empty [`BandSet`] when the polygon does not overlap the
    /// rasters; the pipeline skips the item for that field.
    fn clip(
        &self,
        polygon: &Polygon,
        refs: &BTreeMap<BandCode, AssetRef>,
    ) -> Result<BandSet, AgrsError>;
}

// =============================================================================
// RETURN MODE
// =============================================================================

/// Which tables a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnMode {
    /// Index features only.
    #[default]
    Features,
    /// Raw band statistics only.
    Bands,
    /// Both tables.
    Both,
}

impl ReturnMode {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ReturnMode::Features => "features",
            ReturnMode::Bands => "bands",
            ReturnMode::Both => "both",
        }
    }

    #[must_use]
    pub fn includes_features(&self) -> bool {
        matches!(self, ReturnMode::Features | ReturnMode::Both)
    }

    #[must_use]
    pub fn includes_bands(&self) -> bool {
        matches!(self, ReturnMode::Bands | ReturnMode::Both)
    }
}

impl fmt::Display for ReturnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReturnMode {
    type Err = AgrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "features" => Ok(ReturnMode::Features),
            "bands" => Ok(ReturnMode::Bands),
            "both" => Ok(ReturnMode::Both),
            other => Err(AgrsError::InvalidConfiguration(format!(
                "Unknown return mode: {}. Use: features, bands, both",
                other
            ))),
        }
    }
}

// =============================================================================
// SNAPSHOTS & TABLES
// =============================================================================

/// A selected item with its clamped season fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot<'a> {
    pub item: &'a CatalogItem,
    pub fraction: f64,
}

impl Snapshot<'_> {
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.item.timestamp
    }
}

/// Output of a run; a table is `None` when the return mode excludes it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTables {
    pub features: Option<Vec<FeatureRow>>,
    pub bands: Option<Vec<FeatureRow>>,
}

/// Fields, season and resolved policy of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRequest {
    pub fields: Vec<FieldBoundary>,
    pub season: SeasonWindow,
    pub policy: SelectionPolicy,
}

impl FeatureRequest {
    /// Fails with `MissingInput` when `fields` is empty.
    pub fn new(
        fields: Vec<FieldBoundary>,
        season: SeasonWindow,
        policy: SelectionPolicy,
    ) -> Result<Self, AgrsError> {
        if fields.is_empty() {
            return Err(AgrsError::MissingInput("no fields given".to_string()));
        }
        Ok(Self {
            fields,
            season,
            policy,
        })
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Feature extraction over a catalog source and a band clipper.
pub struct FeaturePipeline<C: CatalogSource, K: BandClipper> {
    catalog: C,
    clipper: K,
    config: FeatureConfig,
}

impl<C: CatalogSource, K: BandClipper> FeaturePipeline<C, K> {
    /// Create a pipeline; the configuration is validated here, before any I/O.
    pub fn new(catalog: C, clipper: K, config: FeatureConfig) -> Result<Self, AgrsError> {
        config.validate()?;
        Ok(Self {
            catalog,
            clipper,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Search the catalog over the union bounding box of `fields`.
    pub fn search(
        &self,
        fields: &[FieldBoundary],
        season: &SeasonWindow,
    ) -> Result<Vec<CatalogItem>, AgrsError> {
        let bbox = FieldBoundary::union_bbox(fields)
            .ok_or_else(|| AgrsError::MissingInput("no fields given".to_string()))?;

        let items = self.catalog.search(&bbox, season, self.config.stac_limit)?;
        tracing::info!(count = items.len(), "catalog search finished");

        if items.is_empty() {
            return Err(AgrsError::MissingInput(
                "no catalog items found for the given area and date range".to_string(),
            ));
        }
        Ok(items)
    }

    /// Apply `policy` and attach clamped season fractions.
    pub fn select<'a>(
        &self,
        items: &'a [CatalogItem],
        season: &SeasonWindow,
        policy: &SelectionPolicy,
    ) -> Result<Vec<Snapshot<'a>>, AgrsError> {
        let chosen = policy.select(items, season);
        if chosen.is_empty() {
            return Err(AgrsError::MissingInput(format!(
                "no snapshots selected by strategy '{}'",
                policy.strategy()
            )));
        }

        tracing::info!(
            strategy = %policy.strategy(),
            selected = chosen.len(),
            "snapshots selected"
        );

        Ok(chosen
            .into_iter()
            .map(|item| Snapshot {
                item,
                fraction: season.fraction_of(item.timestamp).clamp(0.0, 1.0),
            })
            .collect())
    }

    /// Bands to fetch: configured list, or every band asset of the first snapshot.
    #[must_use]
    pub fn bands_for(&self, snapshots: &[Snapshot<'_>]) -> Vec<BandCode> {
        match &self.config.bands {
            Some(bands) => bands.clone(),
            None => snapshots
                .first()
                .map(|snapshot| snapshot.item.available_bands())
                .unwrap_or_default(),
        }
    }

    /// Clip, compute and aggregate every field over the given snapshots.
    pub fn extract(
        &self,
        fields: &[FieldBoundary],
        season: &SeasonWindow,
        snapshots: &[Snapshot<'_>],
    ) -> Result<FeatureTables, AgrsError> {
        let mode = self.config.return_mode;
        let bands = self.bands_for(snapshots);
        let aggregator = self.config.aggregator();

        let mut feature_rows = Vec::with_capacity(fields.len());
        let mut band_rows = Vec::with_capacity(fields.len());

        for (i, field) in fields.iter().enumerate() {
            tracing::info!(field = %field.id, "field {}/{}", i + 1, fields.len());

            let mut index_series =
                IndexTimeSeries::with_names(self.config.indices.iter().map(|index| index.name()));
            let mut band_series = IndexTimeSeries::with_names(bands.iter().map(BandCode::as_str));

            for snapshot in snapshots {
                let refs = snapshot.item.band_refs(&bands);
                if refs.is_empty() {
                    tracing::debug!(item = %snapshot.item.id, "item carries none of the requested bands");
                    continue;
                }

                let clipped = self.clipper.clip(&field.polygon, &refs)?;
                if clipped.is_empty() {
                    tracing::debug!(
                        field = %field.id,
                        item = %snapshot.item.id,
                        "no spatial overlap, item skipped for field"
                    );
                    continue;
                }

                if mode.includes_features() {
                    let mut computed = compute_indices(&clipped);
                    for index in &self.config.indices {
                        if let Some(array) = computed.take(*index) {
                            index_series.push(
                                index.name(),
                                IndexSample::new(snapshot.timestamp(), snapshot.fraction, array),
                            );
                        }
                    }
                }

                if mode.includes_bands() {
                    for (band, raster) in clipped.iter() {
                        if bands.contains(&band) {
                            band_series.push(
                                band.as_str(),
                                IndexSample::new(
                                    snapshot.timestamp(),
                                    snapshot.fraction,
                                    raster.clone(),
                                ),
                            );
                        }
                    }
                }
            }

            if mode.includes_features() {
                feature_rows.push(aggregator.aggregate(&field.id, &index_series, season));
            }
            if mode.includes_bands() {
                band_rows.push(aggregator.aggregate(&field.id, &band_series, season));
            }
        }

        Ok(FeatureTables {
            features: mode.includes_features().then_some(feature_rows),
            bands: mode.includes_bands().then_some(band_rows),
        })
    }

    /// Search, select and extract in one call.
    pub fn run(&self, request: &FeatureRequest) -> Result<FeatureTables, AgrsError> {
        let items = self.search(&request.fields, &request.season)?;
        let snapshots = self.select(&items, &request.season, &request.policy)?;
        self.extract(&request.fields, &request.season, &snapshots)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_mode_parse() {
        assert_eq!("both".parse::<ReturnMode>().expect("parse"), ReturnMode::Both);
        assert!(matches!(
            "table".parse::<ReturnMode>(),
            Err(AgrsError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn request_needs_fields() {
        let season = SeasonWindow::new(
            "2023-04-01T00:00:00Z".parse().expect("date"),
            "2023-10-01T00:00:00Z".parse().expect("date"),
        )
        .expect("season");
        let result = FeatureRequest::new(Vec::new(), season, SelectionPolicy::All);
        assert!(matches!(result, Err(AgrsError::MissingInput(_))));
    }

    #[test]
    fn return_mode_flags() {
        assert!(ReturnMode::Features.includes_features());
        assert!(!ReturnMode::Features.includes_bands());
        assert!(ReturnMode::Both.includes_features() && ReturnMode::Both.includes_bands());
        assert_eq!(ReturnMode::default(), ReturnMode::Features);
    }
}
