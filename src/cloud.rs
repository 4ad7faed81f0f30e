//! Cloud-cover filtering of search results
//!
//! DSWx items do not always carry `eo:cloud_cover`. When it is missing, the
//! water classification layer is read and the share of pixels flagged as
//! cloud is used instead.

use crate::catalog::SearchResult;
use crate::errors::Result;
use crate::store::RasterStore;
use tracing::{debug, warn};

/// DSWx WTR class for cloud or cloud shadow
pub const DSWX_CLOUD_CLASS: f32 = 253.0;

/// Where to look when an item has no cloud-cover property
#[derive(Debug, Clone)]
pub struct CloudFallback {
    /// Asset read to count cloud pixels
    pub asset_key: String,
    /// Pixel value marking cloud
    pub cloud_value: f32,
}

impl Default for CloudFallback {
    fn default() -> Self {
        Self {
            asset_key: "0_B01_WTR".to_string(),
            cloud_value: DSWX_CLOUD_CLASS,
        }
    }
}

/// Keep results whose cloud cover is at most `threshold` percent
///
/// # Errors
///
/// Propagates store errors from fallback reads.
pub fn filter_by_cloud_cover<S: RasterStore + ?Sized>(
    results: &[SearchResult],
    threshold: f64,
    store: &S,
    fallback: &CloudFallback,
) -> Result<Vec<SearchResult>> {
    let mut kept = Vec::new();
    for result in results {
        let Some(cover) = cloud_cover(result, store, fallback)? else {
            warn!(id = %result.id, asset = %fallback.asset_key, "No cloud cover and no fallback asset; dropping");
            continue;
        };
        if cover <= threshold {
            kept.push(result.clone());
        } else {
            debug!(id = %result.id, cover, threshold, "Dropped cloudy result");
        }
    }
    Ok(kept)
}

/// Cloud cover in percent, from metadata or from the fallback raster
pub fn cloud_cover<S: RasterStore + ?Sized>(
    result: &SearchResult,
    store: &S,
    fallback: &CloudFallback,
) -> Result<Option<f64>> {
    if let Some(cover) = result.cloud_cover {
        return Ok(Some(cover));
    }
    let Some(asset) = result.assets.get(&fallback.asset_key) else {
        return Ok(None);
    };
    let frame = store.open(&asset.href)?;
    let band = frame.band(0);
    if band.is_empty() {
        return Ok(Some(0.0));
    }
    let cloudy = band.iter().filter(|&&v| v == fallback.cloud_value).count();
    let cover = 100.0 * cloudy as f64 / band.len() as f64;
    debug!(id = %result.id, cover, "Computed cloud cover from pixels");
    Ok(Some(cover))
}
