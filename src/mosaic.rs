//! Mosaicking adjacent tiles of one acquisition onto a single grid

use crate::cube::{check_north_up, check_same_crs, check_same_resolution, grid_coords, AssembledCube};
use crate::errors::{OperaError, Result};
use crate::granule::GranuleTable;
use crate::parallel::ParallelConfig;
use crate::raster::{is_nodata, Bounds, GeoTransform, RasterFrame};
use crate::store::RasterStore;
use chrono::Duration;
use ndarray::{s, Array3, Array4, Axis};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// How overlapping valid pixels are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMethod {
    /// Earliest input in table order wins
    #[default]
    First,
    /// Latest input in table order wins
    Last,
    /// Largest value wins
    Max,
}

impl MergeMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Last => "last",
            Self::Max => "max",
        }
    }
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            "max" => Ok(Self::Max),
            other => Err(format!("unknown merge method '{other}' (expected first, last or max)")),
        }
    }
}

/// Options for [`mosaic`]
#[derive(Debug, Clone)]
pub struct MosaicOptions {
    pub method: MergeMethod,
    /// Maximum spread between the earliest and latest granule time
    pub time_tolerance: Duration,
}

impl Default for MosaicOptions {
    fn default() -> Self {
        Self {
            method: MergeMethod::First,
            time_tolerance: Duration::hours(1),
        }
    }
}

/// Stitch the granules of one acquisition into one cube with a single time step
///
/// # Errors
///
/// Returns an error if:
/// - The table is empty or spans more than `time_tolerance`
/// - Any tile cannot be read
/// - Tiles disagree on CRS, resolution or band count
pub fn mosaic<S: RasterStore + ?Sized>(
    table: &GranuleTable,
    store: &S,
    parallel: &ParallelConfig,
    options: &MosaicOptions,
) -> Result<AssembledCube> {
    let first = table.records().first().ok_or(OperaError::EmptyTable)?;
    let times = table.times();
    if let (Some(earliest), Some(latest)) = (times.first(), times.last()) {
        if *latest - *earliest > options.time_tolerance {
            return Err(OperaError::MixedAcquisitions {
                message: format!(
                    "{} to {} exceeds {} minutes",
                    earliest.to_rfc3339(),
                    latest.to_rfc3339(),
                    options.time_tolerance.num_minutes()
                ),
            });
        }
    }
    let time = *times.first().unwrap_or(&first.time);

    let locations: Vec<&str> = table.iter().map(|r| r.href.as_str()).collect();
    let frames = parallel.read_all(store, &locations)?;
    let (data, transform) = merge_frames(&frames, options.method)?;

    let (x, y) = grid_coords(&transform, data.len_of(Axis(2)), data.len_of(Axis(1)));
    let reference = &frames[0];
    let bands = data.len_of(Axis(0));
    let data: Array4<f32> = data.insert_axis(Axis(0));

    let cube = AssembledCube {
        name: first.asset_key.clone(),
        data,
        time: vec![time],
        band: (0..bands).collect(),
        y,
        x,
        crs: reference.crs,
        transform,
        nodata: Some(reference.nodata.unwrap_or(f64::NAN)),
    };
    info!(
        tiles = frames.len(),
        method = %options.method,
        shape = ?cube.shape(),
        crs = %cube.crs,
        "Mosaicked tiles"
    );
    Ok(cube)
}

/// Composite frames onto the union of their extents
///
/// Every frame must share the first frame's CRS, resolution and band count.
/// Returns `(band, row, col)` pixels and the transform of the merged grid.
pub fn merge_frames(frames: &[RasterFrame], method: MergeMethod) -> Result<(Array3<f32>, GeoTransform)> {
    let reference = frames.first().ok_or(OperaError::EmptyTable)?;
    check_north_up(reference)?;
    for frame in &frames[1..] {
        check_same_crs(reference, frame)?;
        check_same_resolution(reference, frame)?;
        if frame.bands() != reference.bands() {
            return Err(OperaError::GridMismatch {
                location: frame.location.clone(),
                message: format!(
                    "{} bands, expected {}",
                    frame.bands(),
                    reference.bands()
                ),
            });
        }
    }

    let bounds = frames
        .iter()
        .map(RasterFrame::bounds)
        .reduce(|a, b| a.union(&b))
        .ok_or(OperaError::EmptyTable)?;
    let (dx, dy) = reference.transform.resolution();
    let width = (bounds.width() / dx).round() as usize;
    let height = (bounds.height() / dy).round() as usize;
    let transform = GeoTransform::north_up(bounds.min_x, bounds.max_y, dx, dy);

    let fill = reference.nodata.unwrap_or(f64::NAN) as f32;
    let out_nodata = Some(f64::from(fill));
    let mut merged = Array3::from_elem((reference.bands(), height, width), fill);

    for frame in frames {
        let (col0, row0) = placement(&bounds, frame, dx, dy);
        let cols = frame.width().min(width.saturating_sub(col0));
        let rows = frame.height().min(height.saturating_sub(row0));
        debug!(
            location = %frame.location,
            col0,
            row0,
            "Placing tile"
        );

        let source = frame.data.slice(s![.., ..rows, ..cols]);
        let mut target = merged.slice_mut(s![.., row0..row0 + rows, col0..col0 + cols]);
        ndarray::Zip::from(&mut target).and(&source).for_each(|out, &value| {
            if frame.is_nodata(value) {
                return;
            }
            let empty = is_nodata(*out, out_nodata);
            match method {
                MergeMethod::First if empty => *out = value,
                MergeMethod::First => {}
                MergeMethod::Last => *out = value,
                MergeMethod::Max if empty || value > *out => *out = value,
                MergeMethod::Max => {}
            }
        });
    }

    Ok((merged, transform))
}

/// Pixel offset of a frame's upper-left corner on the merged grid, snapped to the nearest pixel
fn placement(bounds: &Bounds, frame: &RasterFrame, dx: f64, dy: f64) -> (usize, usize) {
    let (x0, y0) = frame.transform.origin();
    let col = ((x0 - bounds.min_x) / dx).round().max(0.0) as usize;
    let row = ((bounds.max_y - y0) / dy).round().max(0.0) as usize;
    (col, row)
}
