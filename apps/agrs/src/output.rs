//! # Table Writers
//!
//! Feature tables as CSV or JSON. Identity columns come first (`field_id`,
//! `season_start`, `season_end`), then the feature columns in row order.
//! NaN is written as an empty CSV cell and as `null` in JSON.

use agrs_core::{AgrsError, FeatureRow};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Identity columns preceding the feature columns.
pub const IDENTITY_COLUMNS: [&str; 3] = ["field_id", "season_start", "season_end"];

/// Output encoding of a feature table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl FromStr for OutputFormat {
    type Err = AgrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            other => Err(AgrsError::InvalidConfiguration(format!(
                "Unknown format: {}. Use: csv, json",
                other
            ))),
        }
    }
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// =============================================================================
// CSV
// =============================================================================

/// Write rows as CSV. The header comes from the first row; an empty table
/// writes only the identity header.
pub fn write_csv<W: Write>(rows: &[FeatureRow], writer: W) -> Result<(), AgrsError> {
    let mut csv = csv::Writer::from_writer(writer);

    let mut header: Vec<&str> = IDENTITY_COLUMNS.to_vec();
    if let Some(first) = rows.first() {
        header.extend(first.column_names());
    }
    csv.write_record(&header).map_err(csv_error)?;

    for row in rows {
        let mut record = vec![
            row.field_id().to_string(),
            timestamp(row.season_start()),
            timestamp(row.season_end()),
        ];
        record.extend(row.columns().iter().map(|(_, value)| {
            if value.is_finite() {
                value.to_string()
            } else {
                String::new()
            }
        }));
        csv.write_record(&record).map_err(csv_error)?;
    }

    csv.flush()
        .map_err(|e| AgrsError::IoError(format!("Flush CSV: {}", e)))
}

fn csv_error(e: csv::Error) -> AgrsError {
    AgrsError::SerializationError(format!("CSV: {}", e))
}

// =============================================================================
// JSON
// =============================================================================

/// One JSON object per row, keys in column order.
#[must_use]
pub fn row_to_json(row: &FeatureRow) -> Value {
    let mut object = Map::new();
    object.insert("field_id".to_string(), Value::from(row.field_id()));
    object.insert(
        "season_start".to_string(),
        Value::from(timestamp(row.season_start())),
    );
    object.insert(
        "season_end".to_string(),
        Value::from(timestamp(row.season_end())),
    );
    for (name, value) in row.columns() {
        let json = Number::from_f64(*value).map_or(Value::Null, Value::Number);
        object.insert(name.clone(), json);
    }
    Value::Object(object)
}

/// Write rows as a pretty-printed JSON array.
pub fn write_json<W: Write>(rows: &[FeatureRow], mut writer: W) -> Result<(), AgrsError> {
    let array = Value::Array(rows.iter().map(row_to_json).collect());
    serde_json::to_writer_pretty(&mut writer, &array)
        .map_err(|e| AgrsError::SerializationError(format!("JSON: {}", e)))?;
    writeln!(writer).map_err(|e| AgrsError::IoError(format!("Write JSON: {}", e)))
}

// =============================================================================
// FILES
// =============================================================================

/// Write one table in `format` to `writer`.
pub fn write_table<W: Write>(
    rows: &[FeatureRow],
    format: OutputFormat,
    writer: W,
) -> Result<(), AgrsError> {
    match format {
        OutputFormat::Csv => write_csv(rows, writer),
        OutputFormat::Json => write_json(rows, writer),
    }
}

/// Write one table to a file, creating or truncating it.
pub fn write_table_file(
    rows: &[FeatureRow],
    format: OutputFormat,
    path: &Path,
) -> Result<(), AgrsError> {
    let file = std::fs::File::create(path)
        .map_err(|e| AgrsError::IoError(format!("Create {:?}: {}", path, e)))?;
    write_table(rows, format, std::io::BufWriter::new(file))
}

/// Sibling path for the band table: `features.csv` becomes `features_bands.csv`.
#[must_use]
pub fn bands_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_bands.{}", stem, ext.to_string_lossy()),
        None => format!("{}_bands", stem),
    };
    path.with_file_name(name)
}
