//! # agrs CLI Module
//!
//! This module implements the CLI interface for agrs.
//!
//! ## Available Commands
//!
//! - `features` - Extract per-field stage features
//! - `select` - Dry-run snapshot selection against a catalog
//! - `indices` - List the supported spectral indices
//! - `config` - Show the effective configuration

mod commands;

use crate::settings::{ConfigOverrides, effective_config};
use agrs_core::AgrsError;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// agrs - Sentinel-2 field feature extraction
///
/// Selects representative acquisitions for a season, computes spectral
/// indices per field and aggregates them into early/mid/late statistics.
#[derive(Parser, Debug)]
#[command(name = "agrs")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// TOML configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Inputs shared by the commands that search a catalog.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// GeoJSON FeatureCollection with the field polygons
    #[arg(long)]
    pub fields: PathBuf,

    /// Feature property holding the field id
    #[arg(long, default_value = "field_id")]
    pub field_id_col: String,

    /// STAC item JSON file (array or FeatureCollection)
    #[arg(long)]
    pub catalog: PathBuf,

    /// Season start (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub start: String,

    /// Season end (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub end: String,

    /// Target date for the fixed_date strategy
    #[arg(long)]
    pub target_date: Option<String>,

    /// Target dates for the dates strategy (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub dates: Option<Vec<String>>,

    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract per-field stage features
    Features {
        #[command(flatten)]
        run: RunArgs,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format (csv, json)
        #[arg(short = 't', long, default_value = "csv")]
        format: String,
    },

    /// Show which snapshots a strategy would pick, without reading rasters
    Select {
        #[command(flatten)]
        run: RunArgs,
    },

    /// List the supported spectral indices
    Indices,

    /// Show the effective configuration
    Config {
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), AgrsError> {
    let json_mode = cli.json_mode;
    let config_path = cli.config.as_deref();

    match cli.command {
        Some(Commands::Features {
            run,
            output,
            format,
        }) => {
            let config = effective_config(config_path, &run.overrides)?;
            cmd_features(&config, &run, output.as_deref(), &format)
        }
        Some(Commands::Select { run }) => {
            let config = effective_config(config_path, &run.overrides)?;
            cmd_select(&config, &run, json_mode)
        }
        Some(Commands::Indices) => cmd_indices(json_mode),
        Some(Commands::Config { overrides }) => {
            let config = effective_config(config_path, &overrides)?;
            cmd_config(&config, json_mode)
        }
        None => {
            // No subcommand - show the effective configuration
            let config = effective_config(config_path, &ConfigOverrides::default())?;
            cmd_config(&config, json_mode)
        }
    }
}
