//! # agrs - Sentinel-2 Field Features
//!
//! Command-line entry point for per-field, per-stage spectral index features.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      apps/agrs (THE BINARY)                     │
//! │                                                                 │
//! │  ┌─────────────┐    ┌──────────────────┐    ┌───────────────┐   │
//! │  │   CLI       │    │  StacFileCatalog │    │ GridRaster    │   │
//! │  │  (clap)     │    │  (STAC JSON)     │    │ Clipper       │   │
//! │  └──────┬──────┘    └────────┬─────────┘    └───────┬───────┘   │
//! │         │                    │                      │           │
//! │         └────────────────────┼──────────────────────┘           │
//! │                              ▼                                  │
//! │                      ┌───────────────┐                          │
//! │                      │   agrs-core   │                          │
//! │                      │  (THE LOGIC)  │                          │
//! │                      └───────────────┘                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! agrs features --fields fields.geojson --catalog items.json \
//!     --start 2023-04-01 --end 2023-10-01 --output features.csv
//!
//! agrs select --fields fields.geojson --catalog items.json \
//!     --start 2023-04-01 --end 2023-10-01 --strategy top_n_cloudfree
//!
//! agrs indices
//! ```

use agrs::cli;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Initialize tracing. AGRS_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("AGRS_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "agrs=debug,agrs_core=debug"
    } else {
        "agrs=info,agrs_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    // Display startup banner
    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    // Execute command
    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the agrs startup banner to stderr, keeping stdout for tables.
fn print_banner() {
    eprintln!(
        r#"
   █████╗  ██████╗ ██████╗ ███████╗
  ██╔══██╗██╔════╝ ██╔══██╗██╔════╝
  ███████║██║  ███╗██████╔╝███████╗
  ██╔══██║██║   ██║██╔══██╗╚════██║
  ██║  ██║╚██████╔╝██║  ██║███████║
  ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝╚══════╝

  Sentinel-2 Field Features v{}

  Snapshots • Indices • Stages
"#,
        env!("CARGO_PKG_VERSION")
    );
}
