//! Granule tables built from catalog search results
//!
//! A [`GranuleTable`] is the flat view of a search: one row per matching asset,
//! carrying the acquisition time, the asset URL and the MGRS tile the file
//! covers. The tile is decoded from the OPERA filename grammar rather than
//! taken from a fixed field position.

use crate::catalog::SearchResult;
use crate::errors::{OperaError, Result};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

static OPERA_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<producer>[A-Za-z0-9]+)_(?P<level>L[0-9][A-Za-z0-9]*)_(?P<product>[A-Za-z0-9-]+)_(?P<tile>T[0-9]{2}[A-Z]{3})_(?P<acquired>[0-9]{8}T[0-9]{6}Z)_(?P<processed>[0-9]{8}T[0-9]{6}Z)_(?P<sensor>[A-Za-z0-9]+)_(?P<resolution>[0-9]+)_(?P<version>v[0-9]+(?:\.[0-9]+)*)_(?P<band>[A-Za-z0-9_-]+)\.tiff?$",
    )
    .expect("OPERA filename pattern is valid")
});

/// Fields of an OPERA granule filename
///
/// `OPERA_L3_DSWx-HLS_T11SQA_20230828T181921Z_20230831T000636Z_L8_30_v1.0_B01_WTR.tif`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperaFilename {
    pub producer: String,
    pub level: String,
    pub product: String,
    pub tile: String,
    pub acquired: DateTime<Utc>,
    pub processed: DateTime<Utc>,
    pub sensor: String,
    pub resolution_m: u32,
    pub version: String,
    pub band: String,
}

impl OperaFilename {
    /// Decode a bare filename
    pub fn parse(name: &str) -> Result<Self> {
        let unrecognized = || OperaError::UnrecognizedFilename {
            name: name.to_string(),
        };
        let caps = OPERA_FILENAME.captures(name).ok_or_else(unrecognized)?;
        let stamp = |key: &str| -> Result<DateTime<Utc>> {
            NaiveDateTime::parse_from_str(&caps[key], "%Y%m%dT%H%M%SZ")
                .map(|naive| Utc.from_utc_datetime(&naive))
                .map_err(|_| unrecognized())
        };

        Ok(Self {
            producer: caps["producer"].to_string(),
            level: caps["level"].to_string(),
            product: caps["product"].to_string(),
            tile: caps["tile"].to_string(),
            acquired: stamp("acquired")?,
            processed: stamp("processed")?,
            sensor: caps["sensor"].to_string(),
            resolution_m: caps["resolution"].parse().map_err(|_| unrecognized())?,
            version: caps["version"].to_string(),
            band: caps["band"].to_string(),
        })
    }

    /// Decode the filename at the end of a URL or path, ignoring any query string
    pub fn from_href(href: &str) -> Result<Self> {
        Self::parse(file_name(href))
    }
}

/// Final path segment of a URL or filesystem path
pub fn file_name(href: &str) -> &str {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// One row of a granule table
#[derive(Debug, Clone, PartialEq)]
pub struct GranuleRecord {
    pub time: DateTime<Utc>,
    pub href: String,
    pub tile_id: String,
    pub asset_key: String,
}

/// Ordered table of granules, usually all for one layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GranuleTable {
    records: Vec<GranuleRecord>,
}

impl GranuleTable {
    /// Tabulate search results, keeping every asset whose key contains `layer`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A matching asset's filename does not follow the OPERA grammar
    /// - The same href appears twice
    pub fn from_search(results: &[SearchResult], layer: &str) -> Result<Self> {
        let mut records = Vec::new();
        for result in results {
            for (key, asset) in result.assets_matching(layer) {
                let name = OperaFilename::from_href(&asset.href)?;
                records.push(GranuleRecord {
                    time: result.datetime,
                    href: asset.href.clone(),
                    tile_id: name.tile,
                    asset_key: key.clone(),
                });
            }
        }
        debug!(
            results = results.len(),
            layer,
            granules = records.len(),
            "Tabulated search results"
        );
        Self::from_records(records)
    }

    /// Build a table from rows, rejecting duplicate hrefs
    pub fn from_records(records: Vec<GranuleRecord>) -> Result<Self> {
        let mut seen = HashSet::new();
        for record in &records {
            if !seen.insert(record.href.as_str()) {
                return Err(OperaError::DuplicateGranule {
                    href: record.href.clone(),
                });
            }
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[GranuleRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GranuleRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows for one tile, original order kept
    #[must_use]
    pub fn for_tile(&self, tile_id: &str) -> Self {
        self.filtered(|r| r.tile_id == tile_id)
    }

    /// Rows acquired within `tolerance` of `time`
    #[must_use]
    pub fn near_time(&self, time: DateTime<Utc>, tolerance: Duration) -> Self {
        self.filtered(|r| (r.time - time).abs() <= tolerance)
    }

    /// Rows acquired on the given UTC calendar day
    #[must_use]
    pub fn on_date(&self, date: chrono::NaiveDate) -> Self {
        self.filtered(|r| r.time.date_naive() == date)
    }

    /// Distinct tile identifiers, sorted
    pub fn tiles(&self) -> BTreeSet<String> {
        self.records.iter().map(|r| r.tile_id.clone()).collect()
    }

    /// Distinct acquisition times, ascending
    pub fn times(&self) -> BTreeSet<DateTime<Utc>> {
        self.records.iter().map(|r| r.time).collect()
    }

    /// Stable sort by acquisition time
    #[must_use]
    pub fn sorted_by_time(mut self) -> Self {
        self.records.sort_by_key(|r| r.time);
        self
    }

    fn filtered(&self, keep: impl Fn(&GranuleRecord) -> bool) -> Self {
        Self {
            records: self.records.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a GranuleTable {
    type Item = &'a GranuleRecord;
    type IntoIter = std::slice::Iter<'a, GranuleRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl fmt::Display for GranuleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<22} {:<8} href", "time", "tile")?;
        for record in &self.records {
            writeln!(
                f,
                "{:<22} {:<8} {}",
                record.time.format("%Y-%m-%dT%H:%M:%SZ"),
                record.tile_id,
                record.href
            )?;
        }
        Ok(())
    }
}
