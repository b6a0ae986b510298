//! # Stage Aggregation
//!
//! Folds per-series samples `(timestamp, fraction, raster)` into one scalar per
//! (series, stage, statistic).
//!
//! ## Algorithm
//!
//! 1. Assign each sample to the first stage whose `[lo, hi)` contains its
//!    fraction. Unassigned samples are dropped.
//! 2. Per stage, stack the rasters and take the NaN-aware mean along time.
//! 3. Drop non-finite cells of the mean raster and compute the requested
//!    statistics over what remains.
//! 4. Empty stages and stages without finite cells give NaN for every statistic.
//!
//! Columns are named `{series}_{stage}_{stat}` and ordered by series supply
//! order, then stage order, then statistic order. The column set depends only
//! on the series names, stages and statistics, never on the data.

use crate::primitives::UNASSIGNED_STAGE;
use crate::{AgrsError, Raster, SeasonWindow};
use chrono::{DateTime, Utc};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// SUMMARY STATISTICS
// =============================================================================

/// Spatial summary statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStat {
    Mean,
    Median,
    Min,
    Max,
    /// Population standard deviation.
    Std,
}

impl SummaryStat {
    pub const ALL: [SummaryStat; 5] = [
        SummaryStat::Mean,
        SummaryStat::Median,
        SummaryStat::Min,
        SummaryStat::Max,
        SummaryStat::Std,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SummaryStat::Mean => "mean",
            SummaryStat::Median => "median",
            SummaryStat::Min => "min",
            SummaryStat::Max => "max",
            SummaryStat::Std => "std",
        }
    }
}

impl fmt::Display for SummaryStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SummaryStat {
    type Err = AgrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        SummaryStat::ALL
            .iter()
            .copied()
            .find(|stat| stat.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                AgrsError::InvalidConfiguration(format!(
                    "Unknown summary statistic: {}. Use: mean, median, min, max, std",
                    s
                ))
            })
    }
}

/// Requested statistics over the finite cells of `raster`, in `stats` order.
///
/// Every value is NaN when no finite cell exists.
#[must_use]
pub fn summarize(raster: &Raster, stats: &[SummaryStat]) -> Vec<f64> {
    let mut values: Vec<f64> = raster.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return vec![f64::NAN; stats.len()];
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;

    let mut sorted = false;
    stats
        .iter()
        .map(|stat| match stat {
            SummaryStat::Mean => mean,
            SummaryStat::Median => {
                if !sorted {
                    values.sort_by(f64::total_cmp);
                    sorted = true;
                }
                let mid = values.len() / 2;
                if values.len() % 2 == 0 {
                    (values[mid - 1] + values[mid]) / 2.0
                } else {
                    values[mid]
                }
            }
            SummaryStat::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            SummaryStat::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            SummaryStat::Std => {
                let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
                (ss / n).sqrt()
            }
        })
        .collect()
}

// =============================================================================
// STAGE BOUNDS
// =============================================================================

/// A named half-open fraction interval `[lo, hi)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageBound {
    pub name: String,
    pub lo: f64,
    pub hi: f64,
}

impl StageBound {
    #[must_use]
    pub fn new(name: impl Into<String>, lo: f64, hi: f64) -> Self {
        Self {
            name: name.into(),
            lo,
            hi,
        }
    }

    #[must_use]
    pub fn contains(&self, fraction: f64) -> bool {
        self.lo <= fraction && fraction < self.hi
    }

    /// Whether the two intervals share any fraction.
    #[must_use]
    pub fn overlaps(&self, other: &StageBound) -> bool {
        self.lo < other.hi && other.lo < self.hi
    }
}

/// early `[0, 0.33)`, mid `[0.33, 0.66)`, late `[0.66, 1.01)`.
///
/// The late bound exceeds 1 so that a fraction of exactly 1.0 is kept.
#[must_use]
pub fn default_stage_bounds() -> Vec<StageBound> {
    vec![
        StageBound::new("early", 0.0, 0.33),
        StageBound::new("mid", 0.33, 0.66),
        StageBound::new("late", 0.66, 1.01),
    ]
}

/// Name of the first stage containing `fraction`, or `"other"`.
#[must_use]
pub fn stage_for_fraction(fraction: f64, stages: &[StageBound]) -> &str {
    stages
        .iter()
        .find(|stage| stage.contains(fraction))
        .map_or(UNASSIGNED_STAGE, |stage| stage.name.as_str())
}

// =============================================================================
// TIME SERIES
// =============================================================================

/// One observation of a series for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSample {
    pub timestamp: DateTime<Utc>,
    pub fraction: f64,
    pub array: Raster,
}

impl IndexSample {
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, fraction: f64, array: Raster) -> Self {
        Self {
            timestamp,
            fraction,
            array,
        }
    }
}

/// Named series of samples, kept in the order the names were first supplied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexTimeSeries {
    series: Vec<(String, Vec<IndexSample>)>,
}

impl IndexTimeSeries {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register series names so they appear in the output even without samples.
    #[must_use]
    pub fn with_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Self::new();
        for name in names {
            out.entry(name.into());
        }
        out
    }

    fn entry(&mut self, name: String) -> &mut Vec<IndexSample> {
        let position = match self.series.iter().position(|(n, _)| *n == name) {
            Some(position) => position,
            None => {
                self.series.push((name, Vec::new()));
                self.series.len() - 1
            }
        };
        &mut self.series[position].1
    }

    /// Append a sample, registering the series name on first use.
    pub fn push(&mut self, name: impl Into<String>, sample: IndexSample) {
        self.entry(name.into()).push(sample);
    }

    #[must_use]
    pub fn samples(&self, name: &str) -> Option<&[IndexSample]> {
        self.series
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, samples)| samples.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[IndexSample])> {
        self.series
            .iter()
            .map(|(name, samples)| (name.as_str(), samples.as_slice()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.series.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

// =============================================================================
// FEATURE ROW
// =============================================================================

/// One output row: identity columns plus ordered feature columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    field_id: String,
    season_start: DateTime<Utc>,
    season_end: DateTime<Utc>,
    columns: Vec<(String, f64)>,
}

impl FeatureRow {
    #[must_use]
    pub fn field_id(&self) -> &str {
        &self.field_id
    }

    #[must_use]
    pub fn season_start(&self) -> DateTime<Utc> {
        self.season_start
    }

    #[must_use]
    pub fn season_end(&self) -> DateTime<Utc> {
        self.season_end
    }

    /// Value of a feature column, `None` if the column does not exist.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<f64> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| *value)
    }

    #[must_use]
    pub fn columns(&self) -> &[(String, f64)] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

// =============================================================================
// STAGE AGGREGATOR
// =============================================================================

/// Stage aggregation with a fixed set of statistics and stages.
#[derive(Debug, Clone, PartialEq)]
pub struct StageAggregator {
    stats: Vec<SummaryStat>,
    stages: Vec<StageBound>,
}

impl Default for StageAggregator {
    fn default() -> Self {
        Self::new(SummaryStat::ALL.to_vec(), default_stage_bounds())
    }
}

impl StageAggregator {
    /// Create an aggregator. Overlapping stages are tolerated (first match wins).
    #[must_use]
    pub fn new(stats: Vec<SummaryStat>, stages: Vec<StageBound>) -> Self {
        Self { stats, stages }
    }

    #[must_use]
    pub fn stats(&self) -> &[SummaryStat] {
        &self.stats
    }

    #[must_use]
    pub fn stages(&self) -> &[StageBound] {
        &self.stages
    }

    /// Column names produced for the given series names, in output order.
    #[must_use]
    pub fn column_names<'a>(&self, series: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut names = Vec::new();
        for name in series {
            for stage in &self.stages {
                for stat in &self.stats {
                    names.push(column_name(name, &stage.name, *stat));
                }
            }
        }
        names
    }

    /// Aggregate all series of one field into a feature row. Never fails.
    #[must_use]
    pub fn aggregate(
        &self,
        field_id: &str,
        series: &IndexTimeSeries,
        season: &SeasonWindow,
    ) -> FeatureRow {
        let mut columns = Vec::with_capacity(series.len() * self.stages.len() * self.stats.len());

        for (name, samples) in series.iter() {
            let mut buckets: Vec<Vec<&Raster>> = vec![Vec::new(); self.stages.len()];
            for sample in samples {
                match self
                    .stages
                    .iter()
                    .position(|stage| stage.contains(sample.fraction))
                {
                    Some(i) => buckets[i].push(&sample.array),
                    None => tracing::trace!(
                        series = name,
                        fraction = sample.fraction,
                        "sample outside every stage"
                    ),
                }
            }

            for (stage, bucket) in self.stages.iter().zip(&buckets) {
                let values = self.reduce_bucket(name, &stage.name, bucket);
                for (stat, value) in self.stats.iter().zip(values) {
                    columns.push((column_name(name, &stage.name, *stat), value));
                }
            }
        }

        FeatureRow {
            field_id: field_id.to_string(),
            season_start: season.start(),
            season_end: season.end(),
            columns,
        }
    }

    fn reduce_bucket(&self, series: &str, stage: &str, bucket: &[&Raster]) -> Vec<f64> {
        let Some(first) = bucket.first() else {
            return vec![f64::NAN; self.stats.len()];
        };

        let shape = first.shape();
        let aligned: Vec<&Raster> = bucket
            .iter()
            .copied()
            .filter(|raster| raster.shape() == shape)
            .collect();
        if aligned.len() < bucket.len() {
            tracing::warn!(
                series,
                stage,
                dropped = bucket.len() - aligned.len(),
                "samples with mismatched shape left out of stage mean"
            );
        }

        match nanmean_stack(&aligned) {
            Some(mean) => summarize(&mean, &self.stats),
            None => vec![f64::NAN; self.stats.len()],
        }
    }
}

/// `{series}_{stage}_{stat}`
#[must_use]
pub fn column_name(series: &str, stage: &str, stat: SummaryStat) -> String {
    format!("{}_{}_{}", series, stage, stat.name())
}

/// NaN-aware mean along a new leading (time) axis.
///
/// All rasters must share one shape. Cells that are NaN in every raster stay NaN.
/// Returns `None` for an empty slice.
#[must_use]
pub fn nanmean_stack(rasters: &[&Raster]) -> Option<Raster> {
    let first = rasters.first()?;
    let mut sum = Raster::zeros(first.raw_dim());
    let mut count = Array2::<u32>::zeros(first.raw_dim());

    for raster in rasters {
        Zip::from(&mut sum)
            .and(&mut count)
            .and(*raster)
            .for_each(|s, c, &v| {
                if !v.is_nan() {
                    *s += v;
                    *c += 1;
                }
            });
    }

    Some(Zip::from(&sum).and(&count).map_collect(|&s, &c| {
        if c == 0 { f64::NAN } else { s / f64::from(c) }
    }))
}

/// Aggregate one field's series with the given aggregator.
#[must_use]
pub fn aggregate_field_indices(
    field_id: &str,
    series: &IndexTimeSeries,
    season: &SeasonWindow,
    aggregator: &StageAggregator,
) -> FeatureRow {
    aggregator.aggregate(field_id, series, season)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::array;

    fn season() -> SeasonWindow {
        let start = Utc
            .with_ymd_and_hms(2022, 5, 1, 0, 0, 0)
            .single()
            .expect("valid date");
        let end = Utc
            .with_ymd_and_hms(2022, 9, 1, 0, 0, 0)
            .single()
            .expect("valid date");
        SeasonWindow::new(start, end).expect("window")
    }

    fn sample(fraction: f64, array: Raster) -> IndexSample {
        let season = season();
        IndexSample::new(season.at_fraction(fraction), fraction, array)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn summarize_ignores_non_finite() {
        let raster = array![[1.0, f64::NAN], [3.0, f64::INFINITY]];
        let values = summarize(&raster, &SummaryStat::ALL);
        assert!(close(values[0], 2.0)); // mean
        assert!(close(values[1], 2.0)); // median
        assert!(close(values[2], 1.0)); // min
        assert!(close(values[3], 3.0)); // max
        assert!(close(values[4], 1.0)); // std
    }

    #[test]
    fn summarize_odd_median() {
        let raster = array![[5.0, 1.0, 3.0]];
        assert_eq!(summarize(&raster, &[SummaryStat::Median]), vec![3.0]);
    }

    #[test]
    fn summarize_all_nan() {
        let raster = array![[f64::NAN, f64::NEG_INFINITY]];
        let values = summarize(&raster, &[SummaryStat::Mean, SummaryStat::Max]);
        assert!(values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn nanmean_skips_nan_per_cell() {
        let a = array![[1.0, f64::NAN, f64::NAN]];
        let b = array![[3.0, 4.0, f64::NAN]];
        let mean = nanmean_stack(&[&a, &b]).expect("mean");
        assert!(close(mean[[0, 0]], 2.0));
        assert!(close(mean[[0, 1]], 4.0));
        assert!(mean[[0, 2]].is_nan());
        assert!(nanmean_stack(&[]).is_none());
    }

    #[test]
    fn stage_partition_default_bounds() {
        let stages = default_stage_bounds();
        assert_eq!(stage_for_fraction(0.0, &stages), "early");
        assert_eq!(stage_for_fraction(0.329, &stages), "early");
        assert_eq!(stage_for_fraction(0.33, &stages), "mid");
        assert_eq!(stage_for_fraction(0.66, &stages), "late");
        assert_eq!(stage_for_fraction(1.0, &stages), "late");
        assert_eq!(stage_for_fraction(1.01, &stages), "other");
        assert_eq!(stage_for_fraction(-0.1, &stages), "other");
    }

    #[test]
    fn overlapping_stages_first_match_wins() {
        let stages = vec![StageBound::new("a", 0.0, 0.6), StageBound::new("b", 0.4, 1.0)];
        assert_eq!(stage_for_fraction(0.5, &stages), "a");
        assert!(stages[0].overlaps(&stages[1]));
    }

    #[test]
    fn end_to_end_ndvi_ndwi_example() {
        let mut series = IndexTimeSeries::with_names(["NDVI", "NDWI"]);
        series.push("NDVI", sample(0.1, Raster::from_elem((2, 2), 0.2)));
        series.push("NDVI", sample(0.5, Raster::from_elem((2, 2), 0.5)));
        series.push("NDVI", sample(0.9, Raster::from_elem((2, 2), 0.8)));

        let aggregator = StageAggregator::new(vec![SummaryStat::Mean], default_stage_bounds());
        let row = aggregate_field_indices("field-1", &series, &season(), &aggregator);

        assert_eq!(row.field_id(), "field-1");
        assert_eq!(row.season_start(), season().start());
        assert!(close(row.get("NDVI_early_mean").expect("col"), 0.2));
        assert!(close(row.get("NDVI_mid_mean").expect("col"), 0.5));
        assert!(close(row.get("NDVI_late_mean").expect("col"), 0.8));
        for stage in ["early", "mid", "late"] {
            let value = row.get(&format!("NDWI_{}_mean", stage)).expect("col");
            assert!(value.is_nan());
        }
        let names: Vec<&str> = row.column_names().collect();
        assert_eq!(
            names,
            vec![
                "NDVI_early_mean",
                "NDVI_mid_mean",
                "NDVI_late_mean",
                "NDWI_early_mean",
                "NDWI_mid_mean",
                "NDWI_late_mean",
            ]
        );
    }

    #[test]
    fn temporal_mean_precedes_spatial_stats() {
        let mut series = IndexTimeSeries::new();
        series.push("NDVI", sample(0.05, array![[0.0, 1.0]]));
        series.push("NDVI", sample(0.10, array![[1.0, f64::NAN]]));

        let aggregator = StageAggregator::new(
            vec![SummaryStat::Mean, SummaryStat::Max],
            default_stage_bounds(),
        );
        let row = aggregator.aggregate("f", &series, &season());
        // cell means: [0.5, 1.0]
        assert!(close(row.get("NDVI_early_mean").expect("col"), 0.75));
        assert!(close(row.get("NDVI_early_max").expect("col"), 1.0));
    }

    #[test]
    fn samples_outside_stages_are_dropped() {
        let stages = vec![StageBound::new("first_half", 0.0, 0.5)];
        let mut series = IndexTimeSeries::new();
        series.push("EVI", sample(0.9, array![[0.7]]));
        let aggregator = StageAggregator::new(vec![SummaryStat::Mean], stages);
        let row = aggregator.aggregate("f", &series, &season());
        assert_eq!(row.len(), 1);
        assert!(row.get("EVI_first_half_mean").expect("col").is_nan());
        assert!(row.get("EVI_other_mean").is_none());
    }

    #[test]
    fn mismatched_shapes_do_not_panic() {
        let mut series = IndexTimeSeries::new();
        series.push("NDVI", sample(0.1, array![[0.2, 0.4]]));
        series.push("NDVI", sample(0.2, array![[0.9]]));
        let row = StageAggregator::default().aggregate("f", &series, &season());
        assert!(close(row.get("NDVI_early_mean").expect("col"), 0.3));
    }

    #[test]
    fn column_names_match_aggregate_output() {
        let aggregator = StageAggregator::default();
        let series = IndexTimeSeries::with_names(["NBR", "NDMI"]);
        let row = aggregator.aggregate("f", &series, &season());
        let expected = aggregator.column_names(["NBR", "NDMI"]);
        let actual: Vec<String> = row.column_names().map(str::to_string).collect();
        assert_eq!(actual, expected);
        assert_eq!(actual.len(), 2 * 3 * 5);
    }

    #[test]
    fn stat_names_parse() {
        assert_eq!("STD".parse::<SummaryStat>().expect("parse"), SummaryStat::Std);
        assert!("p90".parse::<SummaryStat>().is_err());
    }
}
