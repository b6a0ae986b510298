//! # Primitives
//!
//! Fixed numeric constants of the feature engine.
//!
//! These values are compiled into the binary. Anything a user may reasonably
//! want to change (index list, statistics, stage bounds) lives in
//! [`crate::config::FeatureConfig`] instead.

use crate::BandCode;

/// Denominators with a magnitude below this produce NaN in safe division.
pub const SAFE_DIVIDE_EPSILON: f64 = 1e-10;

/// Near-infrared fallback chain: broad NIR first, narrow NIR second.
pub const NIR_CHAIN: &[BandCode] = &[BandCode::B08, BandCode::B8A];

/// Red-edge fallback chain, first available wins.
pub const RED_EDGE_CHAIN: &[BandCode] = &[BandCode::B05, BandCode::B06, BandCode::B07];

/// Soil brightness correction for SAVI.
pub const SAVI_L: f64 = 0.5;

/// Soil brightness correction for OSAVI (Rondeaux 1996).
pub const OSAVI_L: f64 = 0.16;

/// Offset in the MCARI2 ratio `OSAVI / (OSAVI + 0.08)`.
pub const MCARI2_OFFSET: f64 = 0.08;

/// Gain shared by EVI and EVI2.
pub const EVI_GAIN: f64 = 2.5;

/// Name reported for samples that fall in no stage bucket. Never persisted.
pub const UNASSIGNED_STAGE: &str = "other";

/// First default fractional sampling point.
pub const DEFAULT_FRACTION_FIRST: f64 = 0.2;

/// Last default fractional sampling point.
pub const DEFAULT_FRACTION_LAST: f64 = 1.0;

/// Default number of snapshots for fractional and top-N strategies.
pub const DEFAULT_N_SNAPSHOTS: usize = 3;

/// Default maximum scene cloud cover, as a fraction (0.3 = 30 %).
pub const DEFAULT_MAX_CLOUD: f64 = 0.3;

/// Default cap on catalog search results.
pub const DEFAULT_STAC_LIMIT: usize = 100;

/// `n` evenly spaced fractions from [`DEFAULT_FRACTION_FIRST`] to
/// [`DEFAULT_FRACTION_LAST`] inclusive. `n == 1` gives the first point only.
#[must_use]
pub fn default_fractions(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![DEFAULT_FRACTION_FIRST],
        _ => {
            let step = (DEFAULT_FRACTION_LAST - DEFAULT_FRACTION_FIRST) / (n - 1) as f64;
            (0..n)
                .map(|i| DEFAULT_FRACTION_FIRST + step * i as f64)
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fractions_are_evenly_spaced() {
        let fractions = default_fractions(3);
        assert_eq!(fractions.len(), 3);
        assert!((fractions[0] - 0.2).abs() < 1e-12);
        assert!((fractions[1] - 0.6).abs() < 1e-12);
        assert!((fractions[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn default_fractions_edge_counts() {
        assert!(default_fractions(0).is_empty());
        assert_eq!(default_fractions(1), vec![DEFAULT_FRACTION_FIRST]);
    }

    #[test]
    fn nir_chain_prefers_broad_band() {
        assert_eq!(NIR_CHAIN.first(), Some(&BandCode::B08));
        assert_eq!(RED_EDGE_CHAIN.len(), 3);
    }
}
