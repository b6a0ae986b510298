//! # Snapshot Selection
//!
//! Policies that pick the catalog items representing a season.
//!
//! Every policy is a pure function over borrowed items and returns borrowed
//! items; nothing is cloned. An empty item list always yields an empty result
//! (or `None` for the single-item policy), never an error.
//!
//! ## Nearest-Date Matching
//!
//! Fractional and by-date selection sort items by acquisition time (stable),
//! then for each target pick the item with the smallest absolute time
//! difference, first encountered on ties. An item is used at most once: if a
//! target's nearest item was already taken by an earlier target, that target
//! contributes nothing and the result is shorter than the target list.

use crate::primitives::{DEFAULT_N_SNAPSHOTS, default_fractions};
use crate::{AgrsError, CatalogItem, SeasonWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// POLICY FUNCTIONS
// =============================================================================

/// Items ordered by acquisition time; equal timestamps keep input order.
fn sorted_by_time(items: &[CatalogItem]) -> Vec<&CatalogItem> {
    let mut sorted: Vec<&CatalogItem> = items.iter().collect();
    sorted.sort_by_key(|item| item.timestamp);
    sorted
}

/// Position of the item nearest to `target`, first minimum wins.
fn nearest(sorted: &[&CatalogItem], target: DateTime<Utc>) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (i, item) in sorted.iter().enumerate() {
        let diff = (item.timestamp - target).num_milliseconds().unsigned_abs();
        if best.is_none_or(|(_, best_diff)| diff < best_diff) {
            best = Some((i, diff));
        }
    }
    best.map(|(i, _)| i)
}

/// Nearest-date matching with the no-reuse rule.
fn match_targets<'a>(
    items: &'a [CatalogItem],
    targets: impl IntoIterator<Item = DateTime<Utc>>,
) -> Vec<&'a CatalogItem> {
    let sorted = sorted_by_time(items);
    let mut used = vec![false; sorted.len()];
    let mut chosen = Vec::new();

    for target in targets {
        if let Some(i) = nearest(&sorted, target) {
            if !used[i] {
                used[i] = true;
                chosen.push(sorted[i]);
            }
        }
    }

    chosen
}

/// Items nearest to the given fractions of the season.
///
/// Fractions are clamped to `[0, 1]` before conversion to absolute targets.
#[must_use]
pub fn select_snapshots_fractional<'a>(
    items: &'a [CatalogItem],
    season: &SeasonWindow,
    fractions: &[f64],
) -> Vec<&'a CatalogItem> {
    if items.is_empty() {
        return Vec::new();
    }
    let targets = fractions
        .iter()
        .map(|f| season.at_fraction(f.clamp(0.0, 1.0)));
    match_targets(items, targets)
}

/// The single item nearest to `target`.
#[must_use]
pub fn select_snapshot_fixed_date(
    items: &[CatalogItem],
    target: DateTime<Utc>,
) -> Option<&CatalogItem> {
    let sorted = sorted_by_time(items);
    nearest(&sorted, target).map(|i| sorted[i])
}

/// The `n` items with the lowest cloud cover; missing cloud cover sorts as 0.
#[must_use]
pub fn select_top_n_cloudfree(items: &[CatalogItem], n: usize) -> Vec<&CatalogItem> {
    if n == 0 {
        return Vec::new();
    }
    let mut sorted: Vec<&CatalogItem> = items.iter().collect();
    sorted.sort_by(|a, b| {
        a.cloud_cover
            .unwrap_or(0.0)
            .total_cmp(&b.cloud_cover.unwrap_or(0.0))
    });
    sorted.truncate(n);
    sorted
}

/// The `n` items with the lowest cloud cover among items that report it.
#[must_use]
pub fn select_top_n_cloudfree_strict(items: &[CatalogItem], n: usize) -> Vec<&CatalogItem> {
    if n == 0 {
        return Vec::new();
    }
    let mut rated: Vec<(f64, &CatalogItem)> = items
        .iter()
        .filter_map(|item| item.cloud_cover.map(|cc| (cc, item)))
        .collect();
    rated.sort_by(|a, b| a.0.total_cmp(&b.0));
    rated.into_iter().take(n).map(|(_, item)| item).collect()
}

/// Every item, in input order.
#[must_use]
pub fn select_snapshots_all(items: &[CatalogItem]) -> Vec<&CatalogItem> {
    items.iter().collect()
}

/// Items nearest to explicit target dates.
#[must_use]
pub fn select_snapshots_by_dates<'a>(
    items: &'a [CatalogItem],
    dates: &[DateTime<Utc>],
) -> Vec<&'a CatalogItem> {
    if items.is_empty() || dates.is_empty() {
        return Vec::new();
    }
    match_targets(items, dates.iter().copied())
}

// =============================================================================
// STRATEGY NAMES
// =============================================================================

/// Strategy names accepted on the command line and in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStrategy {
    #[default]
    Fractional,
    FixedDate,
    TopNCloudfree,
    TopNCloudfreeStrict,
    All,
    Dates,
}

impl SnapshotStrategy {
    pub const ALL: [SnapshotStrategy; 6] = [
        SnapshotStrategy::Fractional,
        SnapshotStrategy::FixedDate,
        SnapshotStrategy::TopNCloudfree,
        SnapshotStrategy::TopNCloudfreeStrict,
        SnapshotStrategy::All,
        SnapshotStrategy::Dates,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SnapshotStrategy::Fractional => "fractional",
            SnapshotStrategy::FixedDate => "fixed_date",
            SnapshotStrategy::TopNCloudfree => "top_n_cloudfree",
            SnapshotStrategy::TopNCloudfreeStrict => "top_n_cloudfree_strict",
            SnapshotStrategy::All => "all",
            SnapshotStrategy::Dates => "dates",
        }
    }
}

impl fmt::Display for SnapshotStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SnapshotStrategy {
    type Err = AgrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SnapshotStrategy::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.name() == s.trim())
            .ok_or_else(|| {
                let known: Vec<&str> = SnapshotStrategy::ALL.iter().map(|s| s.name()).collect();
                AgrsError::InvalidConfiguration(format!(
                    "Unknown snapshot strategy: {}. Use: {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

// =============================================================================
// SELECTION POLICY
// =============================================================================

/// How items lacking cloud-cover metadata are ranked by top-N selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingCloudCover {
    /// Rank as 0 % cloud cover.
    AssumeClear,
    /// Leave out of the ranking.
    Exclude,
}

/// Parameters a strategy may need; unused ones are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionParams {
    pub n_snapshots: Option<usize>,
    pub fractions: Option<Vec<f64>>,
    pub target_date: Option<DateTime<Utc>>,
    pub dates: Option<Vec<DateTime<Utc>>>,
}

/// A resolved selection policy with all of its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionPolicy {
    Fractional { fractions: Vec<f64> },
    FixedDate { target: DateTime<Utc> },
    TopNCloudfree { n: usize, missing: MissingCloudCover },
    All,
    ByDates { dates: Vec<DateTime<Utc>> },
}

impl SelectionPolicy {
    /// Resolve a strategy name plus parameters into a policy.
    ///
    /// Fails fast on missing required parameters and non-finite fractions.
    pub fn from_strategy(
        strategy: SnapshotStrategy,
        params: &SelectionParams,
    ) -> Result<Self, AgrsError> {
        let n = params.n_snapshots.unwrap_or(DEFAULT_N_SNAPSHOTS);
        match strategy {
            SnapshotStrategy::Fractional => {
                let fractions = params
                    .fractions
                    .clone()
                    .unwrap_or_else(|| default_fractions(n));
                if let Some(bad) = fractions.iter().find(|f| !f.is_finite()) {
                    return Err(AgrsError::InvalidConfiguration(format!(
                        "Fraction {} is not a finite number",
                        bad
                    )));
                }
                Ok(SelectionPolicy::Fractional { fractions })
            }
            SnapshotStrategy::FixedDate => {
                let target = params.target_date.ok_or_else(|| {
                    AgrsError::InvalidConfiguration(
                        "target_date must be provided for 'fixed_date' strategy".to_string(),
                    )
                })?;
                Ok(SelectionPolicy::FixedDate { target })
            }
            SnapshotStrategy::TopNCloudfree => Ok(SelectionPolicy::TopNCloudfree {
                n,
                missing: MissingCloudCover::AssumeClear,
            }),
            SnapshotStrategy::TopNCloudfreeStrict => Ok(SelectionPolicy::TopNCloudfree {
                n,
                missing: MissingCloudCover::Exclude,
            }),
            SnapshotStrategy::All => Ok(SelectionPolicy::All),
            SnapshotStrategy::Dates => match &params.dates {
                Some(dates) if !dates.is_empty() => Ok(SelectionPolicy::ByDates {
                    dates: dates.clone(),
                }),
                _ => Err(AgrsError::InvalidConfiguration(
                    "dates must be provided for 'dates' strategy".to_string(),
                )),
            },
        }
    }

    /// Strategy name this policy was built from.
    #[must_use]
    pub fn strategy(&self) -> SnapshotStrategy {
        match self {
            SelectionPolicy::Fractional { .. } => SnapshotStrategy::Fractional,
            SelectionPolicy::FixedDate { .. } => SnapshotStrategy::FixedDate,
            SelectionPolicy::TopNCloudfree {
                missing: MissingCloudCover::AssumeClear,
                ..
            } => SnapshotStrategy::TopNCloudfree,
            SelectionPolicy::TopNCloudfree {
                missing: MissingCloudCover::Exclude,
                ..
            } => SnapshotStrategy::TopNCloudfreeStrict,
            SelectionPolicy::All => SnapshotStrategy::All,
            SelectionPolicy::ByDates { .. } => SnapshotStrategy::Dates,
        }
    }

    /// Apply the policy.
    #[must_use]
    pub fn select<'a>(
        &self,
        items: &'a [CatalogItem],
        season: &SeasonWindow,
    ) -> Vec<&'a CatalogItem> {
        let chosen = match self {
            SelectionPolicy::Fractional { fractions } => {
                select_snapshots_fractional(items, season, fractions)
            }
            SelectionPolicy::FixedDate { target } => select_snapshot_fixed_date(items, *target)
                .into_iter()
                .collect(),
            SelectionPolicy::TopNCloudfree {
                n,
                missing: MissingCloudCover::AssumeClear,
            } => select_top_n_cloudfree(items, *n),
            SelectionPolicy::TopNCloudfree {
                n,
                missing: MissingCloudCover::Exclude,
            } => select_top_n_cloudfree_strict(items, *n),
            SelectionPolicy::All => select_snapshots_all(items),
            SelectionPolicy::ByDates { dates } => select_snapshots_by_dates(items, dates),
        };

        let requested = match self {
            SelectionPolicy::Fractional { fractions } => Some(fractions.len()),
            SelectionPolicy::ByDates { dates } => Some(dates.len()),
            _ => None,
        };
        if let Some(requested) = requested {
            if !items.is_empty() && chosen.len() < requested {
                tracing::debug!(
                    strategy = %self.strategy(),
                    requested,
                    selected = chosen.len(),
                    "targets shared a nearest item; later targets dropped"
                );
            }
        }

        chosen
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 3, 1, 10, 0, 0)
            .single()
            .expect("valid date")
    }

    fn day(n: i64) -> DateTime<Utc> {
        t0() + Duration::days(n)
    }

    fn item(id: &str, days: i64) -> CatalogItem {
        CatalogItem::new(id, day(days))
    }

    fn ids(items: &[&CatalogItem]) -> Vec<String> {
        items.iter().map(|i| i.id.clone()).collect()
    }

    fn season() -> SeasonWindow {
        SeasonWindow::new(day(0), day(30)).expect("window")
    }

    #[test]
    fn fractional_picks_nearest_each_once() {
        let items = vec![item("d0", 0), item("d10", 10), item("d20", 20), item("d30", 30)];
        let chosen = select_snapshots_fractional(&items, &season(), &[0.0, 0.33, 1.0]);
        assert_eq!(ids(&chosen), vec!["d0", "d10", "d30"]);
    }

    #[test]
    fn fractional_sorts_unordered_input() {
        let items = vec![item("d30", 30), item("d0", 0), item("d20", 20)];
        let chosen = select_snapshots_fractional(&items, &season(), &[0.0, 0.7]);
        assert_eq!(ids(&chosen), vec!["d0", "d20"]);
    }

    #[test]
    fn fractional_drops_fraction_sharing_nearest_item() {
        let items = vec![item("d0", 0), item("d30", 30)];
        let chosen = select_snapshots_fractional(&items, &season(), &[0.1, 0.2, 0.9]);
        assert_eq!(ids(&chosen), vec!["d0", "d30"]);
    }

    #[test]
    fn fractional_clamps_out_of_range_fractions() {
        let items = vec![item("d0", 0), item("d15", 15), item("d30", 30)];
        let chosen = select_snapshots_fractional(&items, &season(), &[-0.5, 2.0]);
        assert_eq!(ids(&chosen), vec!["d0", "d30"]);
    }

    #[test]
    fn fractional_tie_takes_earliest() {
        let items = vec![item("d10", 10), item("d20", 20)];
        let chosen = select_snapshots_fractional(&items, &season(), &[0.5]);
        assert_eq!(ids(&chosen), vec!["d10"]);
    }

    #[test]
    fn fixed_date_nearest() {
        let items = vec![item("d0", 0), item("d12", 12), item("d30", 30)];
        let chosen = select_snapshot_fixed_date(&items, day(9)).expect("some");
        assert_eq!(chosen.id, "d12");
        assert!(select_snapshot_fixed_date(&[], day(9)).is_none());
    }

    #[test]
    fn top_n_lenient_treats_missing_as_clear() {
        let items = vec![
            item("c40", 0).with_cloud_cover(40.0),
            item("none", 1),
            item("c5", 2).with_cloud_cover(5.0),
            item("c10", 3).with_cloud_cover(10.0),
        ];
        let chosen = select_top_n_cloudfree(&items, 3);
        assert_eq!(ids(&chosen), vec!["none", "c5", "c10"]);
        assert!(select_top_n_cloudfree(&items, 0).is_empty());
    }

    #[test]
    fn top_n_strict_excludes_missing() {
        let items = vec![
            item("c40", 0).with_cloud_cover(40.0),
            item("none", 1),
            item("c5", 2).with_cloud_cover(5.0),
        ];
        let chosen = select_top_n_cloudfree_strict(&items, 5);
        assert_eq!(ids(&chosen), vec!["c5", "c40"]);
    }

    #[test]
    fn all_preserves_input_order() {
        let items = vec![item("b", 5), item("a", 1)];
        assert_eq!(ids(&select_snapshots_all(&items)), vec!["b", "a"]);
    }

    #[test]
    fn by_dates_no_reuse() {
        let items = vec![item("d0", 0), item("d10", 10), item("d20", 20)];
        let chosen = select_snapshots_by_dates(&items, &[day(9), day(11), day(19)]);
        assert_eq!(ids(&chosen), vec!["d10", "d20"]);
        assert!(select_snapshots_by_dates(&items, &[]).is_empty());
    }

    #[test]
    fn every_policy_is_empty_on_empty_items() {
        let empty: Vec<CatalogItem> = Vec::new();
        assert!(select_snapshots_fractional(&empty, &season(), &[0.5]).is_empty());
        assert!(select_snapshot_fixed_date(&empty, day(3)).is_none());
        assert!(select_top_n_cloudfree(&empty, 3).is_empty());
        assert!(select_top_n_cloudfree_strict(&empty, 3).is_empty());
        assert!(select_snapshots_all(&empty).is_empty());
        assert!(select_snapshots_by_dates(&empty, &[day(1)]).is_empty());
    }

    #[test]
    fn strategy_names_round_trip() {
        for strategy in SnapshotStrategy::ALL {
            assert_eq!(
                strategy.name().parse::<SnapshotStrategy>().expect("parse"),
                strategy
            );
        }
        assert!(matches!(
            "nearest".parse::<SnapshotStrategy>(),
            Err(AgrsError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn fixed_date_policy_requires_target() {
        let result =
            SelectionPolicy::from_strategy(SnapshotStrategy::FixedDate, &SelectionParams::default());
        assert!(matches!(result, Err(AgrsError::InvalidConfiguration(_))));
    }

    #[test]
    fn dates_policy_requires_dates() {
        let params = SelectionParams {
            dates: Some(Vec::new()),
            ..SelectionParams::default()
        };
        let result = SelectionPolicy::from_strategy(SnapshotStrategy::Dates, &params);
        assert!(matches!(result, Err(AgrsError::InvalidConfiguration(_))));
    }

    #[test]
    fn fractional_policy_defaults_to_even_spacing() {
        let params = SelectionParams {
            n_snapshots: Some(5),
            ..SelectionParams::default()
        };
        let policy =
            SelectionPolicy::from_strategy(SnapshotStrategy::Fractional, &params).expect("policy");
        assert!(matches!(
            policy,
            SelectionPolicy::Fractional { ref fractions } if fractions.len() == 5
        ));
    }

    #[test]
    fn fractional_policy_rejects_nan() {
        let params = SelectionParams {
            fractions: Some(vec![0.2, f64::NAN]),
            ..SelectionParams::default()
        };
        assert!(SelectionPolicy::from_strategy(SnapshotStrategy::Fractional, &params).is_err());
    }

    #[test]
    fn policy_select_dispatches() {
        let items = vec![
            item("d0", 0).with_cloud_cover(50.0),
            item("d15", 15).with_cloud_cover(1.0),
            item("d30", 30),
        ];
        let strict = SelectionPolicy::from_strategy(
            SnapshotStrategy::TopNCloudfreeStrict,
            &SelectionParams {
                n_snapshots: Some(1),
                ..SelectionParams::default()
            },
        )
        .expect("policy");
        assert_eq!(ids(&strict.select(&items, &season())), vec!["d15"]);
        assert_eq!(strict.strategy(), SnapshotStrategy::TopNCloudfreeStrict);

        let fixed = SelectionPolicy::FixedDate { target: day(29) };
        assert_eq!(ids(&fixed.select(&items, &season())), vec!["d30"]);
    }
}
