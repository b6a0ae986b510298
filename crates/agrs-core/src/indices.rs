//! # Index Engine
//!
//! Spectral indices computed from whatever subset of Sentinel-2 bands is
//! available for one (item, field) pair.
//!
//! ## Index Table
//!
//! Every index is one row of [`INDEX_TABLE`]: the index, its inputs and its
//! formula. Inputs are single bands, ordered fallback chains (NIR, red edge)
//! or previously computed indices. The engine walks the table in order and
//! evaluates a row only when every input resolves; otherwise the index is
//! skipped and the omission logged at `debug`.
//!
//! ## Numeric Policy
//!
//! Ratios go through [`safe_quotient`]: a denominator with magnitude below
//! [`SAFE_DIVIDE_EPSILON`] or a non-finite quotient yields `NaN`. Negative
//! radicands (MSAVI) yield `NaN`. Nothing in this module panics or returns an
//! error for numeric reasons.

use crate::primitives::{
    EVI_GAIN, MCARI2_OFFSET, NIR_CHAIN, OSAVI_L, RED_EDGE_CHAIN, SAFE_DIVIDE_EPSILON, SAVI_L,
};
use crate::{AgrsError, BandCode, BandSet, Raster};
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// SAFE DIVISION
// =============================================================================

/// Scalar safe division: `NaN` when `|den| < eps` or the quotient is not finite.
#[inline]
#[must_use]
pub fn safe_quotient(num: f64, den: f64) -> f64 {
    if den.abs() < SAFE_DIVIDE_EPSILON {
        return f64::NAN;
    }
    let q = num / den;
    if q.is_finite() { q } else { f64::NAN }
}

/// Elementwise safe division of two equally shaped rasters.
///
/// Returns `None` when the shapes differ.
#[must_use]
pub fn safe_divide(num: &Raster, den: &Raster) -> Option<Raster> {
    if num.shape() != den.shape() {
        return None;
    }
    Some(Zip::from(num).and(den).map_collect(|&n, &d| safe_quotient(n, d)))
}

#[inline]
fn finite_or_nan(v: f64) -> f64 {
    if v.is_finite() { v } else { f64::NAN }
}

// =============================================================================
// SPECTRAL INDEX CATALOG
// =============================================================================

/// The supported spectral indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpectralIndex {
    Ndvi,
    Evi,
    Evi2,
    Savi,
    Msavi,
    Osavi,
    Gndvi,
    Vari,
    Gci,
    Ndre,
    Reci,
    Arvi,
    Mcari,
    Mcari2,
    Ndwi,
    Mndwi,
    Ndmi,
    Nbr,
    Nbr2,
}

impl SpectralIndex {
    /// Every supported index, in table order.
    pub const ALL: [SpectralIndex; 19] = [
        SpectralIndex::Ndvi,
        SpectralIndex::Evi,
        SpectralIndex::Evi2,
        SpectralIndex::Savi,
        SpectralIndex::Msavi,
        SpectralIndex::Osavi,
        SpectralIndex::Gndvi,
        SpectralIndex::Vari,
        SpectralIndex::Gci,
        SpectralIndex::Ndre,
        SpectralIndex::Reci,
        SpectralIndex::Arvi,
        SpectralIndex::Mcari,
        SpectralIndex::Mcari2,
        SpectralIndex::Ndwi,
        SpectralIndex::Mndwi,
        SpectralIndex::Ndmi,
        SpectralIndex::Nbr,
        SpectralIndex::Nbr2,
    ];

    /// Column-name prefix of this index.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "NDVI",
            SpectralIndex::Evi => "EVI",
            SpectralIndex::Evi2 => "EVI2",
            SpectralIndex::Savi => "SAVI",
            SpectralIndex::Msavi => "MSAVI",
            SpectralIndex::Osavi => "OSAVI",
            SpectralIndex::Gndvi => "GNDVI",
            SpectralIndex::Vari => "VARI",
            SpectralIndex::Gci => "GCI",
            SpectralIndex::Ndre => "NDRE",
            SpectralIndex::Reci => "RECI",
            SpectralIndex::Arvi => "ARVI",
            SpectralIndex::Mcari => "MCARI",
            SpectralIndex::Mcari2 => "MCARI2",
            SpectralIndex::Ndwi => "NDWI",
            SpectralIndex::Mndwi => "MNDWI",
            SpectralIndex::Ndmi => "NDMI",
            SpectralIndex::Nbr => "NBR",
            SpectralIndex::Nbr2 => "NBR2",
        }
    }

    /// Short human description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "Normalized difference vegetation index",
            SpectralIndex::Evi => "Enhanced vegetation index (3-band)",
            SpectralIndex::Evi2 => "Enhanced vegetation index (2-band)",
            SpectralIndex::Savi => "Soil-adjusted vegetation index (L=0.5)",
            SpectralIndex::Msavi => "Modified soil-adjusted vegetation index",
            SpectralIndex::Osavi => "Optimized soil-adjusted vegetation index (L=0.16)",
            SpectralIndex::Gndvi => "Green NDVI",
            SpectralIndex::Vari => "Visible atmospherically resistant index",
            SpectralIndex::Gci => "Green chlorophyll index",
            SpectralIndex::Ndre => "Normalized difference red edge",
            SpectralIndex::Reci => "Red-edge chlorophyll index",
            SpectralIndex::Arvi => "Atmospherically resistant vegetation index",
            SpectralIndex::Mcari => "Modified chlorophyll absorption ratio index",
            SpectralIndex::Mcari2 => "MCARI scaled by OSAVI",
            SpectralIndex::Ndwi => "Normalized difference water index (McFeeters)",
            SpectralIndex::Mndwi => "Modified NDWI (Xu)",
            SpectralIndex::Ndmi => "Normalized difference moisture index",
            SpectralIndex::Nbr => "Normalized burn ratio",
            SpectralIndex::Nbr2 => "Normalized burn ratio 2",
        }
    }

    /// The table row for this index.
    #[must_use]
    pub fn spec(&self) -> &'static IndexSpec {
        // INDEX_TABLE rows are in declaration order of this enum.
        &INDEX_TABLE[*self as usize]
    }

    /// Whether this index can be computed from `available` bands.
    #[must_use]
    pub fn is_computable_from(&self, available: &[BandCode]) -> bool {
        self.spec().inputs.iter().all(|input| match input {
            Input::Band(band) => available.contains(band),
            Input::Chain(chain) => chain.iter().any(|band| available.contains(band)),
            Input::Index(index) => index.is_computable_from(available),
        })
    }
}

impl fmt::Display for SpectralIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpectralIndex {
    type Err = AgrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        SpectralIndex::ALL
            .iter()
            .copied()
            .find(|index| index.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                AgrsError::InvalidConfiguration(format!("Unknown spectral index: {}", s))
            })
    }
}

// =============================================================================
// INDEX TABLE
// =============================================================================

/// One input of an index formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// A specific band.
    Band(BandCode),
    /// First available band of an ordered fallback chain.
    Chain(&'static [BandCode]),
    /// An index computed earlier in the table.
    Index(SpectralIndex),
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Band(band) => write!(f, "{}", band),
            Input::Chain(chain) => {
                let names: Vec<&str> = chain.iter().map(BandCode::as_str).collect();
                write!(f, "{}", names.join("|"))
            }
            Input::Index(index) => write!(f, "{}", index),
        }
    }
}

type Formula = fn(&[&Raster]) -> Raster;

/// One row of the index table.
pub struct IndexSpec {
    pub index: SpectralIndex,
    pub inputs: &'static [Input],
    formula: Formula,
}

impl fmt::Debug for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSpec")
            .field("index", &self.index)
            .field("inputs", &self.inputs)
            .finish()
    }
}

const NIR: Input = Input::Chain(NIR_CHAIN);
const RED_EDGE: Input = Input::Chain(RED_EDGE_CHAIN);
const BLUE: Input = Input::Band(BandCode::B02);
const GREEN: Input = Input::Band(BandCode::B03);
const RED: Input = Input::Band(BandCode::B04);
const SWIR1: Input = Input::Band(BandCode::B11);
const SWIR2: Input = Input::Band(BandCode::B12);

/// The index catalog. Composite rows come after the rows they consume.
pub static INDEX_TABLE: [IndexSpec; 19] = [
    IndexSpec {
        index: SpectralIndex::Ndvi,
        inputs: &[NIR, RED],
        formula: |r| normalized_difference(r[0], r[1]),
    },
    IndexSpec {
        index: SpectralIndex::Evi,
        inputs: &[NIR, RED, BLUE],
        formula: |r| {
            Zip::from(r[0]).and(r[1]).and(r[2]).map_collect(|&n, &red, &blue| {
                safe_quotient(EVI_GAIN * (n - red), n + 6.0 * red - 7.5 * blue + 1.0)
            })
        },
    },
    IndexSpec {
        index: SpectralIndex::Evi2,
        inputs: &[NIR, RED],
        formula: |r| {
            Zip::from(r[0])
                .and(r[1])
                .map_collect(|&n, &red| safe_quotient(EVI_GAIN * (n - red), n + 2.4 * red + 1.0))
        },
    },
    IndexSpec {
        index: SpectralIndex::Savi,
        inputs: &[NIR, RED],
        formula: |r| {
            Zip::from(r[0]).and(r[1]).map_collect(|&n, &red| {
                safe_quotient((1.0 + SAVI_L) * (n - red), n + red + SAVI_L)
            })
        },
    },
    IndexSpec {
        index: SpectralIndex::Msavi,
        inputs: &[NIR, RED],
        formula: |r| {
            Zip::from(r[0]).and(r[1]).map_collect(|&n, &red| {
                let a = 2.0 * n + 1.0;
                // sqrt of a negative radicand is NaN, which is the intended result
                finite_or_nan(0.5 * (a - (a * a - 8.0 * (n - red)).sqrt()))
            })
        },
    },
    IndexSpec {
        index: SpectralIndex::Osavi,
        inputs: &[NIR, RED],
        formula: |r| {
            Zip::from(r[0])
                .and(r[1])
                .map_collect(|&n, &red| safe_quotient(n - red, n + red + OSAVI_L))
        },
    },
    IndexSpec {
        index: SpectralIndex::Gndvi,
        inputs: &[NIR, GREEN],
        formula: |r| normalized_difference(r[0], r[1]),
    },
    IndexSpec {
        index: SpectralIndex::Vari,
        inputs: &[GREEN, RED, BLUE],
        formula: |r| {
            Zip::from(r[0])
                .and(r[1])
                .and(r[2])
                .map_collect(|&g, &red, &blue| safe_quotient(g - red, g + red - blue))
        },
    },
    IndexSpec {
        index: SpectralIndex::Gci,
        inputs: &[NIR, GREEN],
        formula: |r| chlorophyll_index(r[0], r[1]),
    },
    IndexSpec {
        index: SpectralIndex::Ndre,
        inputs: &[NIR, RED_EDGE],
        formula: |r| normalized_difference(r[0], r[1]),
    },
    IndexSpec {
        index: SpectralIndex::Reci,
        inputs: &[NIR, RED_EDGE],
        formula: |r| chlorophyll_index(r[0], r[1]),
    },
    IndexSpec {
        index: SpectralIndex::Arvi,
        inputs: &[NIR, RED, BLUE],
        formula: |r| {
            Zip::from(r[0]).and(r[1]).and(r[2]).map_collect(|&n, &red, &blue| {
                let rb = 2.0 * red - blue;
                safe_quotient(n - rb, n + rb)
            })
        },
    },
    IndexSpec {
        index: SpectralIndex::Mcari,
        inputs: &[RED_EDGE, RED, GREEN],
        formula: |r| {
            Zip::from(r[0]).and(r[1]).and(r[2]).map_collect(|&re, &red, &g| {
                ((re - red) - 0.2 * (re - g)) * safe_quotient(re, red)
            })
        },
    },
    IndexSpec {
        index: SpectralIndex::Mcari2,
        inputs: &[
            Input::Index(SpectralIndex::Mcari),
            Input::Index(SpectralIndex::Osavi),
        ],
        formula: |r| {
            Zip::from(r[0]).and(r[1]).map_collect(|&mcari, &osavi| {
                mcari * safe_quotient(osavi, osavi + MCARI2_OFFSET)
            })
        },
    },
    IndexSpec {
        index: SpectralIndex::Ndwi,
        inputs: &[GREEN, NIR],
        formula: |r| normalized_difference(r[0], r[1]),
    },
    IndexSpec {
        index: SpectralIndex::Mndwi,
        inputs: &[GREEN, SWIR1],
        formula: |r| normalized_difference(r[0], r[1]),
    },
    IndexSpec {
        index: SpectralIndex::Ndmi,
        inputs: &[NIR, SWIR1],
        formula: |r| normalized_difference(r[0], r[1]),
    },
    IndexSpec {
        index: SpectralIndex::Nbr,
        inputs: &[NIR, SWIR2],
        formula: |r| normalized_difference(r[0], r[1]),
    },
    IndexSpec {
        index: SpectralIndex::Nbr2,
        inputs: &[SWIR1, SWIR2],
        formula: |r| normalized_difference(r[0], r[1]),
    },
];

/// `(a - b) / (a + b)`
fn normalized_difference(a: &Raster, b: &Raster) -> Raster {
    Zip::from(a)
        .and(b)
        .map_collect(|&a, &b| safe_quotient(a - b, a + b))
}

/// `a / b - 1`
fn chlorophyll_index(a: &Raster, b: &Raster) -> Raster {
    Zip::from(a)
        .and(b)
        .map_collect(|&a, &b| safe_quotient(a, b) - 1.0)
}

// =============================================================================
// INDEX SET
// =============================================================================

/// Index arrays computed for one (item, field) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSet {
    arrays: BTreeMap<SpectralIndex, Raster>,
}

impl IndexSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, index: SpectralIndex) -> Option<&Raster> {
        self.arrays.get(&index)
    }

    #[must_use]
    pub fn contains(&self, index: SpectralIndex) -> bool {
        self.arrays.contains_key(&index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Computed indices, in table order.
    pub fn indices(&self) -> impl Iterator<Item = SpectralIndex> + '_ {
        self.arrays.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SpectralIndex, &Raster)> {
        self.arrays.iter().map(|(index, raster)| (*index, raster))
    }

    /// Move one index array out of the set.
    pub fn take(&mut self, index: SpectralIndex) -> Option<Raster> {
        self.arrays.remove(&index)
    }

    fn insert(&mut self, index: SpectralIndex, raster: Raster) {
        self.arrays.insert(index, raster);
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Compute every index of [`INDEX_TABLE`] whose inputs are available.
///
/// Pure and deterministic. Indices with a missing input, or whose resolved
/// inputs disagree in shape, are left out of the result.
#[must_use]
pub fn compute_indices(bands: &BandSet) -> IndexSet {
    let mut out = IndexSet::new();

    for spec in &INDEX_TABLE {
        let mut resolved: Vec<&Raster> = Vec::with_capacity(spec.inputs.len());
        let mut missing: Option<Input> = None;

        for input in spec.inputs {
            let raster = match input {
                Input::Band(band) => bands.get(*band),
                Input::Chain(chain) => bands.first_available(chain).map(|(_, raster)| raster),
                Input::Index(index) => out.get(*index),
            };
            match raster {
                Some(raster) => resolved.push(raster),
                None => {
                    missing = Some(*input);
                    break;
                }
            }
        }

        if let Some(input) = missing {
            tracing::debug!(index = %spec.index, missing = %input, "index skipped, input absent");
            continue;
        }

        if let Some(first) = resolved.first() {
            let shape = first.shape();
            if resolved.iter().any(|raster| raster.shape() != shape) {
                tracing::warn!(index = %spec.index, "index skipped, input shapes differ");
                continue;
            }
        }

        let raster = (spec.formula)(&resolved);
        out.insert(spec.index, raster);
    }

    out
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn full_bands() -> BandSet {
        BandSet::new()
            .with(BandCode::B02, array![[0.05, 0.06]])
            .with(BandCode::B03, array![[0.08, 0.09]])
            .with(BandCode::B04, array![[0.06, 0.07]])
            .with(BandCode::B05, array![[0.12, 0.13]])
            .with(BandCode::B06, array![[0.20, 0.21]])
            .with(BandCode::B07, array![[0.25, 0.26]])
            .with(BandCode::B08, array![[0.40, 0.42]])
            .with(BandCode::B8A, array![[0.41, 0.43]])
            .with(BandCode::B11, array![[0.22, 0.23]])
            .with(BandCode::B12, array![[0.12, 0.13]])
    }

    #[test]
    fn table_order_matches_catalog() {
        for (spec, index) in INDEX_TABLE.iter().zip(SpectralIndex::ALL) {
            assert_eq!(spec.index, index);
            assert_eq!(index.spec().index, index);
        }
    }

    #[test]
    fn composite_rows_follow_their_inputs() {
        for (position, spec) in INDEX_TABLE.iter().enumerate() {
            for input in spec.inputs {
                if let Input::Index(dep) = input {
                    let dep_position = SpectralIndex::ALL
                        .iter()
                        .position(|i| i == dep)
                        .expect("dependency in catalog");
                    assert!(dep_position < position);
                }
            }
        }
    }

    #[test]
    fn full_band_set_yields_every_index() {
        let out = compute_indices(&full_bands());
        assert_eq!(out.len(), SpectralIndex::ALL.len());
    }

    #[test]
    fn ndvi_value() {
        let bands = BandSet::new()
            .with(BandCode::B08, array![[0.5]])
            .with(BandCode::B04, array![[0.1]]);
        let out = compute_indices(&bands);
        let ndvi = out.get(SpectralIndex::Ndvi).expect("ndvi");
        assert!(close(ndvi[[0, 0]], 0.4 / 0.6));
    }

    #[test]
    fn nir_falls_back_to_narrow_band() {
        let bands = BandSet::new()
            .with(BandCode::B8A, array![[0.5]])
            .with(BandCode::B04, array![[0.1]]);
        let out = compute_indices(&bands);
        assert!(out.contains(SpectralIndex::Ndvi));
        assert!(!out.contains(SpectralIndex::Gndvi));
    }

    #[test]
    fn broad_nir_preferred_when_both_present() {
        let bands = BandSet::new()
            .with(BandCode::B08, array![[0.5]])
            .with(BandCode::B8A, array![[0.9]])
            .with(BandCode::B04, array![[0.1]]);
        let ndvi = compute_indices(&bands);
        let ndvi = ndvi.get(SpectralIndex::Ndvi).expect("ndvi");
        assert!(close(ndvi[[0, 0]], 0.4 / 0.6));
    }

    #[test]
    fn red_edge_chain_order() {
        let bands = BandSet::new()
            .with(BandCode::B08, array![[0.5]])
            .with(BandCode::B07, array![[0.3]])
            .with(BandCode::B06, array![[0.1]]);
        let out = compute_indices(&bands);
        let ndre = out.get(SpectralIndex::Ndre).expect("ndre");
        // B06 precedes B07 in the chain
        assert!(close(ndre[[0, 0]], 0.4 / 0.6));
    }

    #[test]
    fn zero_denominator_is_nan_not_infinite() {
        let bands = BandSet::new()
            .with(BandCode::B08, array![[0.0, 0.3]])
            .with(BandCode::B04, array![[0.0, 0.1]])
            .with(BandCode::B03, array![[0.0, 0.2]]);
        let out = compute_indices(&bands);
        for (_, raster) in out.iter() {
            assert!(raster.iter().all(|v| !v.is_infinite()));
        }
        assert!(out.get(SpectralIndex::Ndvi).expect("ndvi")[[0, 0]].is_nan());
        assert!(out.get(SpectralIndex::Gci).expect("gci")[[0, 0]].is_nan());
        assert!(close(out.get(SpectralIndex::Gci).expect("gci")[[0, 1]], 0.5));
    }

    #[test]
    fn msavi_negative_radicand_is_nan() {
        // (2n+1)^2 - 8(n - r) < 0 for n = 0, r = -1: 1 - 8 = -7
        let bands = BandSet::new()
            .with(BandCode::B08, array![[0.0]])
            .with(BandCode::B04, array![[-1.0]]);
        let out = compute_indices(&bands);
        assert!(out.get(SpectralIndex::Msavi).expect("msavi")[[0, 0]].is_nan());
    }

    #[test]
    fn mcari2_uses_computed_components() {
        let out = compute_indices(&full_bands());
        let mcari = out.get(SpectralIndex::Mcari).expect("mcari");
        let osavi = out.get(SpectralIndex::Osavi).expect("osavi");
        let mcari2 = out.get(SpectralIndex::Mcari2).expect("mcari2");
        for ((m, o), m2) in mcari.iter().zip(osavi.iter()).zip(mcari2.iter()) {
            assert!(close(*m2, m * (o / (o + MCARI2_OFFSET))));
        }
    }

    #[test]
    fn mcari2_absent_without_osavi_inputs() {
        let bands = BandSet::new()
            .with(BandCode::B05, array![[0.12]])
            .with(BandCode::B04, array![[0.06]])
            .with(BandCode::B03, array![[0.08]]);
        let out = compute_indices(&bands);
        assert!(out.contains(SpectralIndex::Mcari));
        assert!(!out.contains(SpectralIndex::Osavi));
        assert!(!out.contains(SpectralIndex::Mcari2));
    }

    #[test]
    fn mismatched_shapes_skip_index_without_panicking() {
        let bands = BandSet::new()
            .with(BandCode::B08, array![[0.5, 0.5]])
            .with(BandCode::B04, array![[0.1]]);
        let out = compute_indices(&bands);
        assert!(out.is_empty());
    }

    #[test]
    fn safe_divide_shape_guard() {
        let a = array![[1.0, 2.0]];
        let b = array![[0.0, 4.0]];
        let q = safe_divide(&a, &b).expect("same shape");
        assert!(q[[0, 0]].is_nan());
        assert!(close(q[[0, 1]], 0.5));
        assert!(safe_divide(&a, &array![[1.0]]).is_none());
    }

    #[test]
    fn index_names_parse_case_insensitively() {
        assert_eq!(
            "ndvi".parse::<SpectralIndex>().expect("parse"),
            SpectralIndex::Ndvi
        );
        assert_eq!(
            " Mcari2 ".parse::<SpectralIndex>().expect("parse"),
            SpectralIndex::Mcari2
        );
        assert!(matches!(
            "NDXI".parse::<SpectralIndex>(),
            Err(AgrsError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn computability_follows_fallback_chains() {
        assert!(SpectralIndex::Ndvi.is_computable_from(&[BandCode::B8A, BandCode::B04]));
        assert!(!SpectralIndex::Ndvi.is_computable_from(&[BandCode::B04]));
        assert!(SpectralIndex::Mcari2.is_computable_from(&[
            BandCode::B07,
            BandCode::B04,
            BandCode::B03,
            BandCode::B08
        ]));
    }
}
