//! # Feature Configuration
//!
//! One immutable value that carries every tunable of a feature run. It is
//! passed explicitly into each call; there is no global default state.
//!
//! The struct derives `serde` so the binary can load it from TOML. Missing
//! keys take their defaults, unknown keys are rejected.

use crate::aggregation::{StageAggregator, StageBound, SummaryStat, default_stage_bounds};
use crate::indices::SpectralIndex;
use crate::pipeline::ReturnMode;
use crate::primitives::{DEFAULT_MAX_CLOUD, DEFAULT_N_SNAPSHOTS, DEFAULT_STAC_LIMIT};
use crate::selection::SnapshotStrategy;
use crate::{AgrsError, BandCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Indices computed when the request does not name any.
pub const DEFAULT_INDICES: [SpectralIndex; 10] = [
    SpectralIndex::Ndvi,
    SpectralIndex::Evi,
    SpectralIndex::Savi,
    SpectralIndex::Ndwi,
    SpectralIndex::Ndmi,
    SpectralIndex::Gci,
    SpectralIndex::Ndre,
    SpectralIndex::Reci,
    SpectralIndex::Nbr,
    SpectralIndex::Nbr2,
];

/// Every tunable of a feature run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureConfig {
    /// Indices to aggregate, in output column order.
    pub indices: Vec<SpectralIndex>,
    /// Statistics per (index, stage), in output column order.
    pub summary_stats: Vec<SummaryStat>,
    /// Stage buckets, in output column order.
    pub stage_bounds: Vec<StageBound>,
    /// Snapshot selection strategy.
    pub strategy: SnapshotStrategy,
    /// Snapshot count for fractional (without explicit fractions) and top-N.
    pub n_snapshots: usize,
    /// Explicit fractional sampling points.
    pub fractions: Option<Vec<f64>>,
    /// Which tables to produce.
    pub return_mode: ReturnMode,
    /// Bands to fetch; `None` means every band asset of the first snapshot.
    pub bands: Option<Vec<BandCode>>,
    /// Maximum scene cloud cover as a fraction in `[0, 1]`.
    pub max_cloud: f64,
    /// Cap on catalog search results.
    pub stac_limit: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            indices: DEFAULT_INDICES.to_vec(),
            summary_stats: SummaryStat::ALL.to_vec(),
            stage_bounds: default_stage_bounds(),
            strategy: SnapshotStrategy::default(),
            n_snapshots: DEFAULT_N_SNAPSHOTS,
            fractions: None,
            return_mode: ReturnMode::default(),
            bands: None,
            max_cloud: DEFAULT_MAX_CLOUD,
            stac_limit: DEFAULT_STAC_LIMIT,
        }
    }
}

impl FeatureConfig {
    /// Check the configuration before any I/O happens.
    ///
    /// Stage buckets must have finite `lo < hi`, unique non-empty names and
    /// must not overlap. Gaps between buckets are allowed.
    pub fn validate(&self) -> Result<(), AgrsError> {
        if self.indices.is_empty() {
            return Err(invalid("at least one index is required"));
        }
        if has_duplicates(&self.indices) {
            return Err(invalid("index list contains duplicates"));
        }
        if self.summary_stats.is_empty() {
            return Err(invalid("at least one summary statistic is required"));
        }
        if has_duplicates(&self.summary_stats) {
            return Err(invalid("summary statistic list contains duplicates"));
        }
        if let Some(bands) = &self.bands {
            if bands.is_empty() {
                return Err(invalid("band list is empty"));
            }
        }
        if let Some(fractions) = &self.fractions {
            if fractions.iter().any(|f| !f.is_finite()) {
                return Err(invalid("fractions must be finite numbers"));
            }
        }
        if !(0.0..=1.0).contains(&self.max_cloud) {
            return Err(invalid(&format!(
                "max_cloud must be within [0, 1], got {}",
                self.max_cloud
            )));
        }
        if self.stac_limit == 0 {
            return Err(invalid("stac_limit must be positive"));
        }
        validate_stage_bounds(&self.stage_bounds)
    }

    /// Aggregator for this configuration's statistics and stages.
    #[must_use]
    pub fn aggregator(&self) -> StageAggregator {
        StageAggregator::new(self.summary_stats.clone(), self.stage_bounds.clone())
    }
}

/// Validate a stage bucket list. See [`FeatureConfig::validate`].
pub fn validate_stage_bounds(stages: &[StageBound]) -> Result<(), AgrsError> {
    if stages.is_empty() {
        return Err(invalid("at least one stage bound is required"));
    }

    let mut names = BTreeSet::new();
    for stage in stages {
        if stage.name.trim().is_empty() {
            return Err(invalid("stage names must not be empty"));
        }
        if !names.insert(stage.name.as_str()) {
            return Err(invalid(&format!("duplicate stage name '{}'", stage.name)));
        }
        if !stage.lo.is_finite() || !stage.hi.is_finite() || stage.lo >= stage.hi {
            return Err(invalid(&format!(
                "stage '{}' needs finite lo < hi, got [{}, {})",
                stage.name, stage.lo, stage.hi
            )));
        }
    }

    for (i, a) in stages.iter().enumerate() {
        for b in &stages[i + 1..] {
            if a.overlaps(b) {
                return Err(invalid(&format!(
                    "stages '{}' and '{}' overlap",
                    a.name, b.name
                )));
            }
        }
    }

    Ok(())
}

fn has_duplicates<T: Ord>(values: &[T]) -> bool {
    let mut seen = BTreeSet::new();
    values.iter().any(|value| !seen.insert(value))
}

fn invalid(message: &str) -> AgrsError {
    AgrsError::InvalidConfiguration(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = FeatureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.indices.len(), 10);
        assert_eq!(config.stage_bounds.len(), 3);
        assert_eq!(config.summary_stats.len(), 5);
    }

    #[test]
    fn overlapping_stages_rejected() {
        let config = FeatureConfig {
            stage_bounds: vec![StageBound::new("a", 0.0, 0.5), StageBound::new("b", 0.4, 1.0)],
            ..FeatureConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AgrsError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn gaps_between_stages_allowed() {
        let stages = vec![StageBound::new("a", 0.0, 0.3), StageBound::new("b", 0.6, 1.0)];
        assert!(validate_stage_bounds(&stages).is_ok());
    }

    #[test]
    fn inverted_and_duplicate_stages_rejected() {
        assert!(validate_stage_bounds(&[StageBound::new("a", 0.5, 0.5)]).is_err());
        assert!(
            validate_stage_bounds(&[
                StageBound::new("a", 0.0, 0.2),
                StageBound::new("a", 0.3, 0.4)
            ])
            .is_err()
        );
        assert!(validate_stage_bounds(&[StageBound::new(" ", 0.0, 0.2)]).is_err());
        assert!(validate_stage_bounds(&[]).is_err());
    }

    #[test]
    fn duplicate_indices_rejected() {
        let config = FeatureConfig {
            indices: vec![SpectralIndex::Ndvi, SpectralIndex::Ndvi],
            ..FeatureConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn max_cloud_must_be_fraction() {
        let config = FeatureConfig {
            max_cloud: 30.0,
            ..FeatureConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn aggregator_carries_config() {
        let config = FeatureConfig {
            summary_stats: vec![SummaryStat::Median],
            ..FeatureConfig::default()
        };
        let aggregator = config.aggregator();
        assert_eq!(aggregator.stats(), &[SummaryStat::Median]);
        assert_eq!(aggregator.stages().len(), 3);
    }
}
