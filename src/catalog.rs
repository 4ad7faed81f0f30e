//! Catalog boundary: typed STAC search results and local catalog search
//!
//! Search results arrive as STAC Item JSON produced by whatever client ran the
//! query. They are validated once, here, into [`SearchResult`] so the rest of
//! the crate never digs through untyped maps.

use crate::errors::{OperaError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

/// One downloadable file attached to a search result
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub href: String,
    pub title: Option<String>,
}

/// One catalog record: a single OPERA granule
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub collection: Option<String>,
    /// Acquisition time
    pub datetime: DateTime<Utc>,
    /// `[west, south, east, north]` in WGS84 degrees
    pub bbox: Option<[f64; 4]>,
    /// Asset key to asset, ordered by key
    pub assets: BTreeMap<String, Asset>,
    /// `eo:cloud_cover` percentage, when the producer recorded it
    pub cloud_cover: Option<f64>,
    /// Remaining item properties, untouched
    pub properties: HashMap<String, JsonValue>,
}

impl SearchResult {
    /// Parse a single STAC Item JSON document
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawItem = serde_json::from_str(text)?;
        raw.try_into()
    }

    /// Assets whose key contains `layer`, in key order
    pub fn assets_matching<'a>(
        &'a self,
        layer: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Asset)> + 'a {
        self.assets.iter().filter(move |(key, _)| key.contains(layer))
    }

    fn intersects(&self, bbox: &[f64; 4]) -> bool {
        match &self.bbox {
            Some(own) => own[0] <= bbox[2] && own[2] >= bbox[0] && own[1] <= bbox[3] && own[3] >= bbox[1],
            None => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawAsset {
    href: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: String,
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    bbox: Option<Vec<f64>>,
    #[serde(default)]
    properties: HashMap<String, JsonValue>,
    #[serde(default)]
    assets: BTreeMap<String, RawAsset>,
}

impl TryFrom<RawItem> for SearchResult {
    type Error = OperaError;

    fn try_from(raw: RawItem) -> Result<Self> {
        let invalid = |message: String| OperaError::InvalidSearchResult {
            id: raw.id.clone(),
            message,
        };

        let mut properties = raw.properties.clone();
        let stamp = ["datetime", "start_datetime"]
            .iter()
            .find_map(|key| properties.get(*key).and_then(JsonValue::as_str))
            .ok_or_else(|| invalid("no datetime or start_datetime property".to_string()))?;
        let datetime = DateTime::parse_from_rfc3339(stamp)
            .map_err(|e| invalid(format!("bad datetime '{stamp}': {e}")))?
            .with_timezone(&Utc);
        properties.remove("datetime");

        let cloud_cover = match properties.remove("eo:cloud_cover") {
            None | Some(JsonValue::Null) => None,
            Some(value) => Some(
                value
                    .as_f64()
                    .ok_or_else(|| invalid(format!("eo:cloud_cover is not a number: {value}")))?,
            ),
        };

        // 3D bboxes carry elevation at indices 2 and 5
        let bbox = match raw.bbox.as_deref() {
            None => None,
            Some([w, s, e, n]) => Some([*w, *s, *e, *n]),
            Some([w, s, _, e, n, _]) => Some([*w, *s, *e, *n]),
            Some(other) => return Err(invalid(format!("bbox has {} values", other.len()))),
        };

        let mut assets = BTreeMap::new();
        for (key, asset) in &raw.assets {
            let href = asset
                .href
                .clone()
                .ok_or_else(|| invalid(format!("asset '{key}' has no href")))?;
            assets.insert(
                key.clone(),
                Asset {
                    href,
                    title: asset.title.clone(),
                },
            );
        }

        Ok(SearchResult {
            id: raw.id,
            collection: raw.collection,
            datetime,
            bbox,
            assets,
            cloud_cover,
            properties,
        })
    }
}

/// Catalog query: bounding box, inclusive date range and collection list
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub bbox: Option<[f64; 4]>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Empty means any collection
    pub collections: Vec<String>,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bbox(mut self, bbox: [f64; 4]) -> Self {
        self.bbox = Some(bbox);
        self
    }

    #[must_use]
    pub fn datetime_range(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    #[must_use]
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collections.push(collection.into());
        self
    }

    /// Whether a search result satisfies every constraint of this request
    pub fn matches(&self, result: &SearchResult) -> bool {
        if !self.collections.is_empty() {
            let in_list = result
                .collection
                .as_ref()
                .is_some_and(|c| self.collections.iter().any(|wanted| wanted == c));
            if !in_list {
                return false;
            }
        }
        if self.start.is_some_and(|start| result.datetime < start) {
            return false;
        }
        if self.end.is_some_and(|end| result.datetime > end) {
            return false;
        }
        self.bbox.as_ref().map_or(true, |bbox| result.intersects(bbox))
    }
}

/// Something that answers catalog searches
pub trait CatalogSearch {
    /// Run a search and return the matching records
    fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>>;
}

/// A saved STAC ItemCollection, searched in memory
#[derive(Debug, Clone, Default)]
pub struct ItemCollection {
    items: Vec<SearchResult>,
}

impl ItemCollection {
    /// Parse an ItemCollection (GeoJSON FeatureCollection) or a bare array of items
    ///
    /// Items are validated one at a time so an error names the offending item.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw_items = match serde_json::from_str::<JsonValue>(text)? {
            JsonValue::Array(items) => items,
            JsonValue::Object(mut doc) => match doc.remove("features") {
                Some(JsonValue::Array(features)) => features,
                _ => {
                    return Err(OperaError::InvalidSearchResult {
                        id: "<collection>".to_string(),
                        message: "expected a FeatureCollection with a 'features' array".to_string(),
                    })
                }
            },
            _ => {
                return Err(OperaError::InvalidSearchResult {
                    id: "<collection>".to_string(),
                    message: "expected a FeatureCollection or an array of items".to_string(),
                })
            }
        };

        let items = raw_items
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                let id = value
                    .get("id")
                    .and_then(JsonValue::as_str)
                    .map_or_else(|| format!("#{index}"), str::to_string);
                let raw: RawItem = serde_json::from_value(value).map_err(|e| {
                    OperaError::InvalidSearchResult {
                        id,
                        message: e.to_string(),
                    }
                })?;
                SearchResult::try_from(raw)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(items = items.len(), "Parsed item collection");
        Ok(Self { items })
    }

    /// Load an ItemCollection document from disk
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let collection = Self::from_json(&text)?;
        info!(path = %path.display(), items = collection.len(), "Loaded item collection");
        Ok(collection)
    }

    pub fn from_items(items: Vec<SearchResult>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[SearchResult] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl CatalogSearch for ItemCollection {
    fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let hits: Vec<SearchResult> = self
            .items
            .iter()
            .filter(|item| request.matches(item))
            .cloned()
            .collect();
        debug!(hits = hits.len(), total = self.items.len(), "Catalog search");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEM: &str = r#"{
        "type": "Feature",
        "id": "OPERA_L3_DSWx-HLS_T11SQA_20230828T181921Z_20230831T000636Z_L8_30_v1.0",
        "collection": "OPERA_L3_DSWX-HLS_V1",
        "bbox": [-114.8, 35.1, -113.6, 36.1],
        "properties": {"datetime": "2023-08-28T18:19:21Z", "eo:cloud_cover": 12.5, "platform": "LANDSAT-8"},
        "assets": {
            "0_B01_WTR": {"href": "https://example.com/OPERA_L3_DSWx-HLS_T11SQA_20230828T181921Z_20230831T000636Z_L8_30_v1.0_B01_WTR.tif", "title": "Water classification"},
            "0_B02_BWTR": {"href": "https://example.com/OPERA_L3_DSWx-HLS_T11SQA_20230828T181921Z_20230831T000636Z_L8_30_v1.0_B02_BWTR.tif"}
        }
    }"#;

    #[test]
    fn test_item_is_typed_at_the_boundary() {
        let item = SearchResult::from_json(ITEM).unwrap();
        assert_eq!(item.collection.as_deref(), Some("OPERA_L3_DSWX-HLS_V1"));
        assert_eq!(item.datetime.to_rfc3339(), "2023-08-28T18:19:21+00:00");
        assert_eq!(item.cloud_cover, Some(12.5));
        assert_eq!(item.assets.len(), 2);
        assert_eq!(item.assets["0_B01_WTR"].title.as_deref(), Some("Water classification"));
        assert!(item.properties.contains_key("platform"));
    }

    #[test]
    fn test_layer_substring_selects_one_asset() {
        let item = SearchResult::from_json(ITEM).unwrap();
        let keys: Vec<&String> = item.assets_matching("B01_WTR").map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["0_B01_WTR"]);
    }

    #[test]
    fn test_missing_datetime_is_rejected() {
        let text = r#"{"id": "x", "properties": {}, "assets": {}}"#;
        match SearchResult::from_json(text) {
            Err(OperaError::InvalidSearchResult { id, .. }) => assert_eq!(id, "x"),
            other => panic!("expected InvalidSearchResult, got {other:?}"),
        }
    }

    #[test]
    fn test_asset_without_href_is_rejected() {
        let text = r#"{"id": "x", "properties": {"datetime": "2024-01-01T00:00:00Z"}, "assets": {"a": {"title": "t"}}}"#;
        assert!(SearchResult::from_json(text).is_err());
    }

    #[test]
    fn test_search_filters_by_collection_date_and_bbox() {
        let collection = ItemCollection::from_json(&format!("[{ITEM}]")).unwrap();
        let hit = SearchRequest::new()
            .collection("OPERA_L3_DSWX-HLS_V1")
            .bbox([-114.0, 35.5, -113.0, 36.5]);
        assert_eq!(collection.search(&hit).unwrap().len(), 1);

        let elsewhere = SearchRequest::new().bbox([10.0, 10.0, 11.0, 11.0]);
        assert!(collection.search(&elsewhere).unwrap().is_empty());

        let later = SearchRequest::new().datetime_range(
            Some("2023-09-01T00:00:00Z".parse().unwrap()),
            None,
        );
        assert!(collection.search(&later).unwrap().is_empty());

        let other = SearchRequest::new().collection("OPERA_L3_DIST-ALERT-HLS_V1");
        assert!(collection.search(&other).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_feature_is_named() {
        let text = format!(
            r#"{{"type": "FeatureCollection", "features": [{ITEM}, {{"properties": {{}}, "assets": {{}}}}]}}"#
        );
        match ItemCollection::from_json(&text) {
            Err(OperaError::InvalidSearchResult { id, message }) => {
                assert_eq!(id, "#1");
                assert!(message.contains("id"), "{message}");
            }
            other => panic!("expected InvalidSearchResult, got {other:?}"),
        }

        let bad_date = r#"[{"id": "late", "properties": {"datetime": "yesterday"}, "assets": {}}]"#;
        match ItemCollection::from_json(bad_date) {
            Err(OperaError::InvalidSearchResult { id, .. }) => assert_eq!(id, "late"),
            other => panic!("expected InvalidSearchResult, got {other:?}"),
        }

        assert!(matches!(
            ItemCollection::from_json(r#"{"type": "Feature"}"#),
            Err(OperaError::InvalidSearchResult { .. })
        ));
    }
}
