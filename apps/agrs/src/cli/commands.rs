//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::RunArgs;
use crate::catalog::StacFileCatalog;
use crate::fields::load_fields;
use crate::output::{OutputFormat, bands_path, write_table, write_table_file};
use crate::raster::GridRasterClipper;
use crate::settings::parse_datetime;
use agrs_core::{
    AgrsError, DEFAULT_INDICES, FeatureConfig, FeaturePipeline, FeatureRequest, FeatureTables,
    SeasonWindow, SelectionParams, SelectionPolicy, SpectralIndex,
};
use std::path::{Path, PathBuf};

// =============================================================================
// FILE VALIDATION
// =============================================================================

/// Validate file size before reading.
pub fn validate_file_size(path: &Path, max_size: u64) -> Result<(), AgrsError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| AgrsError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(AgrsError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path and make sure it is a regular file.
pub fn validate_file_path(path: &Path) -> Result<PathBuf, AgrsError> {
    // Canonicalize resolves "..", symlinks, and validates existence
    let canonical = path.canonicalize().map_err(|e| {
        AgrsError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(AgrsError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path; its parent directory must exist.
pub fn validate_output_path(path: &Path) -> Result<PathBuf, AgrsError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        AgrsError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(AgrsError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| AgrsError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// REQUEST HELPERS
// =============================================================================

/// Season window from the `--start`/`--end` flags.
pub fn season_from(run: &RunArgs) -> Result<SeasonWindow, AgrsError> {
    SeasonWindow::new(parse_datetime(&run.start)?, parse_datetime(&run.end)?)
}

/// Resolve the configured strategy with the run's date parameters.
pub fn policy_from(config: &FeatureConfig, run: &RunArgs) -> Result<SelectionPolicy, AgrsError> {
    let target_date = run
        .target_date
        .as_deref()
        .map(parse_datetime)
        .transpose()?;
    let dates = run
        .dates
        .as_ref()
        .map(|dates| {
            dates
                .iter()
                .map(|d| parse_datetime(d))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;

    let params = SelectionParams {
        n_snapshots: Some(config.n_snapshots),
        fractions: config.fractions.clone(),
        target_date,
        dates,
    };
    SelectionPolicy::from_strategy(config.strategy, &params)
}

/// The pipeline over the file-backed collaborators.
pub type FilePipeline = FeaturePipeline<StacFileCatalog, GridRasterClipper>;

/// Validate everything that does not need the catalog, then build the pipeline.
fn prepare(
    config: &FeatureConfig,
    run: &RunArgs,
) -> Result<(FilePipeline, FeatureRequest), AgrsError> {
    let season = season_from(run)?;
    let policy = policy_from(config, run)?;
    let fields = load_fields(&run.fields, &run.field_id_col)?;
    let request = FeatureRequest::new(fields, season, policy)?;

    let catalog = StacFileCatalog::from_path(&run.catalog, config.max_cloud)?;
    let pipeline = FeaturePipeline::new(catalog, GridRasterClipper::new(), config.clone())?;

    tracing::info!(
        fields = request.fields.len(),
        strategy = %config.strategy,
        "Prepared run for season {} .. {}",
        request.season.start().date_naive(),
        request.season.end().date_naive()
    );
    Ok((pipeline, request))
}

// =============================================================================
// FEATURES COMMAND
// =============================================================================

/// Run the pipeline and write the resulting tables.
pub fn cmd_features(
    config: &FeatureConfig,
    run: &RunArgs,
    output: Option<&Path>,
    format: &str,
) -> Result<(), AgrsError> {
    let format: OutputFormat = format.parse()?;
    let output = output.map(validate_output_path).transpose()?;

    let (pipeline, request) = prepare(config, run)?;
    let tables = pipeline.run(&request)?;

    match output {
        Some(path) => write_tables_to_files(&tables, format, &path),
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            if let Some(rows) = &tables.features {
                write_table(rows, format, &mut lock)?;
            }
            if let Some(rows) = &tables.bands {
                write_table(rows, format, &mut lock)?;
            }
            Ok(())
        }
    }
}

/// Features go to `path`; band statistics go to `path` in bands-only mode,
/// or to the `_bands` sibling when both tables are produced.
pub fn write_tables_to_files(
    tables: &FeatureTables,
    format: OutputFormat,
    path: &Path,
) -> Result<(), AgrsError> {
    if let Some(rows) = &tables.features {
        write_table_file(rows, format, path)?;
        tracing::info!(rows = rows.len(), "Wrote feature table to {}", path.display());
    }
    if let Some(rows) = &tables.bands {
        let target = if tables.features.is_some() {
            bands_path(path)
        } else {
            path.to_path_buf()
        };
        write_table_file(rows, format, &target)?;
        tracing::info!(rows = rows.len(), "Wrote band table to {}", target.display());
    }
    Ok(())
}

// =============================================================================
// SELECT COMMAND
// =============================================================================

/// Dry-run catalog search and snapshot selection.
pub fn cmd_select(config: &FeatureConfig, run: &RunArgs, json_mode: bool) -> Result<(), AgrsError> {
    let (pipeline, request) = prepare(config, run)?;
    let items = pipeline.search(&request.fields, &request.season)?;
    let snapshots = pipeline.select(&items, &request.season, &request.policy)?;
    let bands = pipeline.bands_for(&snapshots);

    if json_mode {
        let output = serde_json::json!({
            "strategy": request.policy.strategy().name(),
            "candidates": items.len(),
            "bands": bands.iter().map(|b| b.as_str()).collect::<Vec<_>>(),
            "snapshots": snapshots.iter().map(|s| serde_json::json!({
                "id": s.item.id,
                "datetime": s.timestamp().to_rfc3339(),
                "fraction": s.fraction,
                "cloud_cover": s.item.cloud_cover,
            })).collect::<Vec<_>>(),
        });
        let text = serde_json::to_string_pretty(&output)
            .map_err(|e| AgrsError::SerializationError(format!("JSON: {}", e)))?;
        println!("{}", text);
        return Ok(());
    }

    println!("Snapshot Selection");
    println!("==================");
    println!("Strategy:   {}", request.policy.strategy());
    println!("Candidates: {}", items.len());
    println!(
        "Bands:      {}",
        bands.iter().map(|b| b.as_str()).collect::<Vec<_>>().join(", ")
    );
    println!();
    for snapshot in &snapshots {
        let cloud = snapshot
            .item
            .cloud_cover
            .map_or_else(|| "-".to_string(), |cc| format!("{:.1}%", cc));
        println!(
            "  {}  {}  fraction {:.3}  cloud {}",
            snapshot.timestamp().format("%Y-%m-%d %H:%M"),
            snapshot.item.id,
            snapshot.fraction,
            cloud
        );
    }

    Ok(())
}

// =============================================================================
// INDICES COMMAND
// =============================================================================

fn inputs_of(index: SpectralIndex) -> Vec<String> {
    index.spec().inputs.iter().map(ToString::to_string).collect()
}

/// The index catalog as JSON: name, description, inputs and default flag.
#[must_use]
pub fn index_catalog() -> Vec<serde_json::Value> {
    SpectralIndex::ALL
        .iter()
        .map(|index| {
            serde_json::json!({
                "name": index.name(),
                "description": index.description(),
                "inputs": inputs_of(*index),
                "default": DEFAULT_INDICES.contains(index),
            })
        })
        .collect()
}

/// List the index catalog with the bands each index needs.
pub fn cmd_indices(json_mode: bool) -> Result<(), AgrsError> {
    if json_mode {
        let text = serde_json::to_string_pretty(&index_catalog())
            .map_err(|e| AgrsError::SerializationError(format!("JSON: {}", e)))?;
        println!("{}", text);
        return Ok(());
    }

    println!("Spectral Indices");
    println!("================");
    println!("(* = computed by default; a|b = first available band)");
    println!();
    for index in SpectralIndex::ALL {
        let marker = if DEFAULT_INDICES.contains(&index) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {:<7} {:<48} [{}]",
            marker,
            index.name(),
            index.description(),
            inputs_of(index).join(", ")
        );
    }

    Ok(())
}

// =============================================================================
// CONFIG COMMAND
// =============================================================================

/// The configuration as TOML, or as pretty JSON in JSON mode.
pub fn render_config(config: &FeatureConfig, json_mode: bool) -> Result<String, AgrsError> {
    if json_mode {
        serde_json::to_string_pretty(config)
            .map_err(|e| AgrsError::SerializationError(format!("JSON: {}", e)))
    } else {
        toml::to_string(config).map_err(|e| AgrsError::SerializationError(format!("TOML: {}", e)))
    }
}

/// Print the effective configuration.
pub fn cmd_config(config: &FeatureConfig, json_mode: bool) -> Result<(), AgrsError> {
    println!("{}", render_config(config, json_mode)?);
    Ok(())
}
