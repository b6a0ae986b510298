//! # STAC File Catalog
//!
//! A [`CatalogSource`] over STAC items stored in a local JSON file, either a
//! plain array of items or a `FeatureCollection`.
//!
//! Only the fields the pipeline needs are read: `id`, `bbox`,
//! `properties.datetime`, `properties["eo:cloud_cover"]` and `assets[k].href`.
//! Relative asset hrefs are resolved against the catalog file's directory.

use agrs_core::{AgrsError, BoundingBox, CatalogItem, CatalogSource, SeasonWindow};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Maximum size of a catalog file (50 MB).
const MAX_CATALOG_FILE_SIZE: u64 = 50 * 1024 * 1024;

// =============================================================================
// WIRE FORMAT
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StacDocument {
    Collection { features: Vec<StacItem> },
    Items(Vec<StacItem>),
}

#[derive(Debug, Deserialize)]
struct StacItem {
    id: String,
    #[serde(default)]
    bbox: Option<Vec<f64>>,
    properties: StacProperties,
    #[serde(default)]
    assets: BTreeMap<String, StacAsset>,
}

#[derive(Debug, Deserialize)]
struct StacProperties {
    datetime: String,
    #[serde(rename = "eo:cloud_cover", default)]
    cloud_cover: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StacAsset {
    href: String,
}

// =============================================================================
// CATALOG
// =============================================================================

/// One parsed item plus its footprint, when the file carries one.
#[derive(Debug, Clone)]
struct Entry {
    item: CatalogItem,
    footprint: Option<BoundingBox>,
}

/// Catalog search served from a STAC item file.
///
/// Items are returned in file order. An item is kept when its acquisition
/// time lies in the search window (see [`in_search_window`]), its footprint
/// (if any) intersects the search area, and its cloud cover (if reported) is
/// below `max_cloud * 100`.
#[derive(Debug, Clone)]
pub struct StacFileCatalog {
    entries: Vec<Entry>,
    max_cloud: f64,
}

impl StacFileCatalog {
    /// Load a catalog file. `max_cloud` is a fraction in `[0, 1]`.
    pub fn from_path(path: &Path, max_cloud: f64) -> Result<Self, AgrsError> {
        let validated = crate::cli::validate_file_path(path)?;
        crate::cli::validate_file_size(&validated, MAX_CATALOG_FILE_SIZE)?;

        let text = std::fs::read_to_string(&validated)
            .map_err(|e| AgrsError::IoError(format!("Read catalog: {}", e)))?;
        let base = validated.parent().unwrap_or(Path::new("."));
        Self::from_json_str(&text, base, max_cloud)
    }

    /// Parse catalog JSON; relative hrefs are joined onto `base`.
    pub fn from_json_str(text: &str, base: &Path, max_cloud: f64) -> Result<Self, AgrsError> {
        let document: StacDocument = serde_json::from_str(text)
            .map_err(|e| AgrsError::Catalog(format!("Invalid STAC JSON: {}", e)))?;
        let raw = match document {
            StacDocument::Collection { features } => features,
            StacDocument::Items(items) => items,
        };

        let mut entries = Vec::with_capacity(raw.len());
        for stac in raw {
            let timestamp = crate::settings::parse_datetime(&stac.properties.datetime)
                .map_err(|_| {
                    AgrsError::Catalog(format!(
                        "Item '{}' has an invalid datetime '{}'",
                        stac.id, stac.properties.datetime
                    ))
                })?;

            let footprint = match stac.bbox.as_deref() {
                Some([min_x, min_y, max_x, max_y]) => {
                    Some(BoundingBox::new(*min_x, *min_y, *max_x, *max_y))
                }
                Some(other) => {
                    return Err(AgrsError::Catalog(format!(
                        "Item '{}' has a bbox with {} values, expected 4",
                        stac.id,
                        other.len()
                    )));
                }
                None => None,
            };

            let mut item = CatalogItem::new(stac.id, timestamp);
            if let Some(cc) = stac.properties.cloud_cover {
                item = item.with_cloud_cover(cc);
            }
            for (key, asset) in stac.assets {
                item = item.with_asset(key, resolve_href(base, &asset.href));
            }

            entries.push(Entry { item, footprint });
        }

        tracing::debug!(count = entries.len(), "catalog items loaded");
        Ok(Self { entries, max_cloud })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn accepts(&self, entry: &Entry, bbox: &BoundingBox, season: &SeasonWindow) -> bool {
        if !in_search_window(season, entry.item.timestamp) {
            return false;
        }
        if let Some(footprint) = &entry.footprint {
            if !footprint.intersects(bbox) {
                return false;
            }
        }
        entry
            .item
            .cloud_cover
            .is_none_or(|cc| cc < self.max_cloud * 100.0)
    }
}

impl CatalogSource for StacFileCatalog {
    fn search(
        &self,
        bbox: &BoundingBox,
        season: &SeasonWindow,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, AgrsError> {
        let items: Vec<CatalogItem> = self
            .entries
            .iter()
            .filter(|entry| self.accepts(entry, bbox, season))
            .take(limit)
            .map(|entry| entry.item.clone())
            .collect();

        tracing::info!(
            found = items.len(),
            total = self.entries.len(),
            "Found {} items in catalog search",
            items.len()
        );
        Ok(items)
    }
}

/// Season membership as a date-range catalog query sees it: a season ending
/// exactly at midnight covers that whole calendar day, so `--end 2023-05-31`
/// still finds the 10:30 acquisition of the 31st.
#[must_use]
pub fn in_search_window(season: &SeasonWindow, ts: DateTime<Utc>) -> bool {
    if ts < season.start() {
        return false;
    }
    let end = season.end();
    if end.time() == NaiveTime::MIN {
        ts < end + Duration::days(1)
    } else {
        ts <= end
    }
}

/// Absolute paths and URLs pass through; anything else is joined onto `base`.
fn resolve_href(base: &Path, href: &str) -> String {
    if href.contains("://") || Path::new(href).is_absolute() {
        href.to_string()
    } else {
        base.join(href).to_string_lossy().into_owned()
    }
}
