//! Time-indexed raster cubes assembled from a granule table
//!
//! [`assemble`] reads every granule of one tile and stacks the frames along a
//! new leading time axis, giving an [`AssembledCube`] with dimensions
//! `(time, band, y, x)` and coordinate vectors for each axis.

use crate::errors::{OperaError, Result};
use crate::granule::GranuleTable;
use crate::parallel::ParallelConfig;
use crate::raster::{axis_coords, is_nodata, Bounds, Crs, GeoTransform, RasterFrame};
use crate::store::RasterStore;
use chrono::{DateTime, Utc};
use ndarray::{stack, Array4, ArrayView3, Axis};
use tracing::info;

/// Relative tolerance when comparing pixel sizes and origins
const GRID_TOLERANCE: f64 = 1e-6;

/// Labeled `(time, band, y, x)` array on a single pixel grid
#[derive(Debug, Clone)]
pub struct AssembledCube {
    /// Layer name, e.g. `B01_WTR`
    pub name: String,
    pub data: Array4<f32>,
    pub time: Vec<DateTime<Utc>>,
    pub band: Vec<usize>,
    /// Northing of each row, decreasing
    pub y: Vec<f64>,
    /// Easting of each column, increasing
    pub x: Vec<f64>,
    pub crs: Crs,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
}

impl AssembledCube {
    /// Wrap frames that share one grid, one per time step
    ///
    /// Coordinates come from the first frame; every other frame must match it.
    pub fn from_frames(
        name: &str,
        frames: &[RasterFrame],
        times: Vec<DateTime<Utc>>,
    ) -> Result<Self> {
        let first = frames.first().ok_or(OperaError::EmptyTable)?;
        if frames.len() != times.len() {
            return Err(OperaError::GridMismatch {
                location: first.location.clone(),
                message: format!("{} frames but {} timestamps", frames.len(), times.len()),
            });
        }
        check_north_up(first)?;
        for frame in &frames[1..] {
            check_same_grid(first, frame)?;
        }

        let views: Vec<ArrayView3<'_, f32>> = frames.iter().map(|f| f.data.view()).collect();
        let data = stack(Axis(0), &views)?;

        Ok(Self {
            name: name.to_string(),
            data,
            time: times,
            band: (0..first.bands()).collect(),
            y: first.y_coords(),
            x: first.x_coords(),
            crs: first.crs,
            transform: first.transform,
            nodata: first.nodata,
        })
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Ground extent of the grid
    pub fn bounds(&self) -> Bounds {
        let (x0, y0) = self.transform.origin();
        let (dx, dy) = self.transform.resolution();
        Bounds {
            min_x: x0,
            min_y: y0 - dy * self.y.len() as f64,
            max_x: x0 + dx * self.x.len() as f64,
            max_y: y0,
        }
    }

    /// One time step as `(band, y, x)`
    pub fn at_time(&self, index: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(0), index)
    }

    /// Count of pixels that are not nodata
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&v| !is_nodata(v, self.nodata)).count()
    }

    /// Pixel index of a projected coordinate, if it falls on the grid
    pub fn pixel_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (col, row) = self.transform.inverse()?.apply(x, y);
        let (col, row) = (snap_floor(col), snap_floor(row));
        if col < 0.0 || row < 0.0 || col >= self.x.len() as f64 || row >= self.y.len() as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }
}

/// Read a single-tile granule table into one cube, stacked in table order
///
/// # Errors
///
/// Returns an error if:
/// - The table is empty
/// - Any raster cannot be opened or decoded
/// - Any raster differs from the first in CRS, resolution, origin or shape
pub fn assemble<S: RasterStore + ?Sized>(
    table: &GranuleTable,
    store: &S,
    parallel: &ParallelConfig,
) -> Result<AssembledCube> {
    let first = table.records().first().ok_or(OperaError::EmptyTable)?;
    let locations: Vec<&str> = table.iter().map(|r| r.href.as_str()).collect();
    let frames = parallel.read_all(store, &locations)?;
    let times = table.iter().map(|r| r.time).collect();

    let cube = AssembledCube::from_frames(&first.asset_key, &frames, times)?;
    info!(
        tile = %first.tile_id,
        times = cube.time.len(),
        shape = ?cube.shape(),
        crs = %cube.crs,
        "Assembled cube"
    );
    Ok(cube)
}

/// Fail unless `frame` lies on exactly the same grid as `reference`
pub fn check_same_grid(reference: &RasterFrame, frame: &RasterFrame) -> Result<()> {
    check_same_crs(reference, frame)?;
    check_same_resolution(reference, frame)?;

    let mismatch = |message: String| OperaError::GridMismatch {
        location: frame.location.clone(),
        message,
    };
    let (rx, ry) = reference.transform.origin();
    let (fx, fy) = frame.transform.origin();
    let (dx, dy) = reference.transform.resolution();
    if (rx - fx).abs() > dx * GRID_TOLERANCE || (ry - fy).abs() > dy * GRID_TOLERANCE {
        return Err(mismatch(format!(
            "origin ({fx}, {fy}) differs from ({rx}, {ry})"
        )));
    }
    if reference.data.shape() != frame.data.shape() {
        return Err(mismatch(format!(
            "shape {:?} differs from {:?}",
            frame.data.shape(),
            reference.data.shape()
        )));
    }
    Ok(())
}

pub(crate) fn check_same_crs(reference: &RasterFrame, frame: &RasterFrame) -> Result<()> {
    if reference.crs != frame.crs {
        return Err(OperaError::CrsMismatch {
            location: frame.location.clone(),
            expected: reference.crs.to_string(),
            found: frame.crs.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn check_same_resolution(reference: &RasterFrame, frame: &RasterFrame) -> Result<()> {
    let (rdx, rdy) = reference.transform.resolution();
    let (fdx, fdy) = frame.transform.resolution();
    check_north_up(reference)?;
    check_north_up(frame)?;
    if (rdx - fdx).abs() > rdx * GRID_TOLERANCE || (rdy - fdy).abs() > rdy * GRID_TOLERANCE {
        return Err(OperaError::GridMismatch {
            location: frame.location.clone(),
            message: format!("resolution ({fdx}, {fdy}) differs from ({rdx}, {rdy})"),
        });
    }
    Ok(())
}

/// Fail if the frame's transform carries rotation or shear terms
pub(crate) fn check_north_up(frame: &RasterFrame) -> Result<()> {
    if !frame.transform.is_north_up() {
        return Err(OperaError::GridMismatch {
            location: frame.location.clone(),
            message: "rotated transforms are not supported".to_string(),
        });
    }
    Ok(())
}

/// Floor, except that values within rounding error of an integer land on it
fn snap_floor(value: f64) -> f64 {
    let nearest = value.round();
    if (value - nearest).abs() < GRID_TOLERANCE {
        nearest
    } else {
        value.floor()
    }
}

/// Coordinates for a grid of `width x height` pixels under `transform`
pub(crate) fn grid_coords(transform: &GeoTransform, width: usize, height: usize) -> (Vec<f64>, Vec<f64>) {
    let (x0, y0) = transform.origin();
    let (dx, dy) = transform.resolution();
    (axis_coords(x0, dx, width), axis_coords(y0, -dy, height))
}
