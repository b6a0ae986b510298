//! # agrs-core
//!
//! Per-field, per-stage spectral index features from Sentinel-2 imagery.
//!
//! This crate is the pure part of agrs: index computation, snapshot
//! selection, stage aggregation and the pipeline that strings them together.
//!
//! ## Components
//!
//! - `indices` computes the spectral index catalog from whatever bands exist.
//! - `selection` picks the acquisitions that represent a season.
//! - `aggregation` folds index time series into `{index}_{stage}_{stat}` columns.
//! - `pipeline` drives the three over the catalog and raster collaborators.
//!
//! ## Architectural Constraints
//!
//! - No I/O: catalog search and raster clipping enter through traits
//! - No async, no global state: configuration is passed into each call
//! - Numeric edge cases become NaN, never panics or errors

// =============================================================================
// MODULES
// =============================================================================

pub mod aggregation;
pub mod config;
pub mod indices;
pub mod pipeline;
pub mod primitives;
pub mod selection;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AgrsError, AssetRef, BandCode, BandSet, BoundingBox, CatalogItem, FieldBoundary, Polygon,
    Raster, SeasonWindow,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use aggregation::{
    FeatureRow, IndexSample, IndexTimeSeries, StageAggregator, StageBound, SummaryStat,
    aggregate_field_indices, default_stage_bounds,
};
pub use config::{DEFAULT_INDICES, FeatureConfig};
pub use indices::{IndexSet, SpectralIndex, compute_indices, safe_divide};
pub use pipeline::{
    BandClipper, CatalogSource, FeaturePipeline, FeatureRequest, FeatureTables, ReturnMode,
    Snapshot,
};
pub use selection::{
    SelectionParams, SelectionPolicy, SnapshotStrategy, select_snapshot_fixed_date,
    select_snapshots_all, select_snapshots_by_dates, select_snapshots_fractional,
    select_top_n_cloudfree, select_top_n_cloudfree_strict,
};
