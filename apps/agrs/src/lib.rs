//! # agrs
//!
//! The agrs binary as a library: CLI commands and the file-backed
//! collaborators that feed `agrs-core`.
//!
//! - `catalog` serves catalog searches from a STAC item file
//! - `raster` clips JSON grid rasters to field polygons
//! - `fields` loads field boundaries from GeoJSON
//! - `settings` merges TOML configuration with command-line flags
//! - `output` writes feature tables as CSV or JSON

pub mod catalog;
pub mod cli;
pub mod fields;
pub mod output;
pub mod raster;
pub mod settings;
