//! # Run Settings
//!
//! Effective [`FeatureConfig`]: defaults, then an optional TOML file, then
//! command-line overrides. Also the date parsing shared by all commands.

use agrs_core::{
    AgrsError, BandCode, FeatureConfig, ReturnMode, SnapshotStrategy, SpectralIndex,
};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use std::path::Path;
use std::str::FromStr;

/// Maximum size of a TOML configuration file (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// OVERRIDES
// =============================================================================

/// Configuration flags shared by the run commands.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Snapshot strategy (fractional, fixed_date, top_n_cloudfree, top_n_cloudfree_strict, all, dates)
    #[arg(long)]
    pub strategy: Option<String>,

    /// Number of snapshots for fractional and top-N strategies
    #[arg(long)]
    pub n_snapshots: Option<usize>,

    /// Season fractions for the fractional strategy (comma-separated)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub fractions: Option<Vec<f64>>,

    /// Indices to compute (comma-separated, e.g. NDVI,EVI)
    #[arg(long)]
    pub indices: Option<String>,

    /// Bands to fetch (comma-separated, e.g. B04,B08)
    #[arg(long)]
    pub bands: Option<String>,

    /// Tables to produce (features, bands, both)
    #[arg(long)]
    pub return_mode: Option<String>,

    /// Maximum scene cloud cover as a fraction in [0, 1]
    #[arg(long)]
    pub max_cloud: Option<f64>,

    /// Maximum number of catalog items to consider
    #[arg(long)]
    pub stac_limit: Option<usize>,
}

impl ConfigOverrides {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, mut config: FeatureConfig) -> Result<FeatureConfig, AgrsError> {
        if let Some(strategy) = &self.strategy {
            config.strategy = strategy.parse::<SnapshotStrategy>()?;
        }
        if let Some(n) = self.n_snapshots {
            config.n_snapshots = n;
        }
        if let Some(fractions) = &self.fractions {
            config.fractions = Some(fractions.clone());
        }
        if let Some(indices) = &self.indices {
            config.indices = parse_list::<SpectralIndex>(indices)?;
        }
        if let Some(bands) = &self.bands {
            config.bands = Some(parse_list::<BandCode>(bands)?);
        }
        if let Some(mode) = &self.return_mode {
            config.return_mode = mode.parse::<ReturnMode>()?;
        }
        if let Some(max_cloud) = self.max_cloud {
            config.max_cloud = max_cloud;
        }
        if let Some(limit) = self.stac_limit {
            config.stac_limit = limit;
        }
        Ok(config)
    }
}

// =============================================================================
// LOADING
// =============================================================================

/// Parse a TOML configuration document; missing keys keep their defaults.
pub fn config_from_toml(text: &str) -> Result<FeatureConfig, AgrsError> {
    toml::from_str(text)
        .map_err(|e| AgrsError::InvalidConfiguration(format!("Invalid config file: {}", e)))
}

/// Defaults, optionally replaced by a TOML file, then the command-line flags.
///
/// The result is validated before it is returned.
pub fn effective_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<FeatureConfig, AgrsError> {
    let base = match path {
        Some(path) => {
            let validated = crate::cli::validate_file_path(path)?;
            crate::cli::validate_file_size(&validated, MAX_CONFIG_FILE_SIZE)?;
            let text = std::fs::read_to_string(&validated)
                .map_err(|e| AgrsError::IoError(format!("Read config: {}", e)))?;
            tracing::debug!("Loaded configuration from {:?}", validated);
            config_from_toml(&text)?
        }
        None => FeatureConfig::default(),
    };

    let config = overrides.apply(base)?;
    config.validate()?;
    Ok(config)
}

// =============================================================================
// PARSING HELPERS
// =============================================================================

/// Comma-separated list of values parsed with their `FromStr`.
pub fn parse_list<T>(text: &str) -> Result<Vec<T>, AgrsError>
where
    T: FromStr<Err = AgrsError>,
{
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(T::from_str)
        .collect()
}

/// A `YYYY-MM-DD` date (midnight UTC) or an RFC 3339 timestamp.
pub fn parse_datetime(text: &str) -> Result<DateTime<Utc>, AgrsError> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            AgrsError::InvalidConfiguration(format!(
                "Invalid date '{}': expected YYYY-MM-DD or RFC 3339",
                text
            ))
        })
}
