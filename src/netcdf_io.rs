//! NetCDF export of assembled cubes
//!
//! Writes an [`AssembledCube`] as a CF-style NetCDF file with dimensions
//! `time, band, y, x`, one coordinate variable per dimension and a data
//! variable named after the cube layer.

use crate::cube::AssembledCube;
use crate::errors::Result;
use chrono::Utc;
use netcdf::create;
use std::{fs, path::Path};
use tracing::info;

/// Dimension names, outermost first
pub const CUBE_DIMENSIONS: [&str; 4] = ["time", "band", "y", "x"];

/// NetCDF writer for assembled cubes
pub struct NetCDFWriter<'a> {
    cube: &'a AssembledCube,
    output_path: &'a Path,
}

impl<'a> NetCDFWriter<'a> {
    /// Create a new NetCDF writer
    pub fn new(cube: &'a AssembledCube, output_path: &'a Path) -> Self {
        Self { cube, output_path }
    }

    /// Write the cube, replacing any existing file at the output path
    ///
    /// # Errors
    ///
    /// Returns an error if the old file cannot be removed or the NetCDF
    /// library rejects a dimension, variable or attribute.
    pub fn write(&self) -> Result<()> {
        let cube = self.cube;
        if self.output_path.exists() {
            fs::remove_file(self.output_path)?;
        }

        let mut file = create(self.output_path)?;
        let shape = cube.shape();
        for (name, &len) in CUBE_DIMENSIONS.iter().zip(shape) {
            file.add_dimension(name, len)?;
        }

        let seconds: Vec<i64> = cube.time.iter().map(|t| t.timestamp()).collect();
        let mut time = file.add_variable::<i64>("time", &["time"])?;
        time.put_attribute("units", "seconds since 1970-01-01 00:00:00")?;
        time.put_attribute("calendar", "standard")?;
        time.put_attribute("standard_name", "time")?;
        time.put_values(&seconds, ..)?;

        let bands: Vec<i32> = cube.band.iter().map(|&b| b as i32).collect();
        let mut band = file.add_variable::<i32>("band", &["band"])?;
        band.put_values(&bands, ..)?;

        let (x_name, y_name) = if cube.crs.is_geographic() {
            ("longitude", "latitude")
        } else {
            ("projection_x_coordinate", "projection_y_coordinate")
        };
        let units = if cube.crs.is_geographic() { "degrees" } else { "m" };

        let mut y = file.add_variable::<f64>("y", &["y"])?;
        y.put_attribute("standard_name", y_name)?;
        y.put_attribute("units", units)?;
        y.put_values(&cube.y, ..)?;

        let mut x = file.add_variable::<f64>("x", &["x"])?;
        x.put_attribute("standard_name", x_name)?;
        x.put_attribute("units", units)?;
        x.put_values(&cube.x, ..)?;

        let mut var = file.add_variable::<f32>(&cube.name, &CUBE_DIMENSIONS)?;
        if let Some(fill) = cube.nodata {
            var.put_attribute("_FillValue", fill as f32)?;
        }
        var.put_attribute("crs", cube.crs.to_string())?;
        var.put_attribute("GeoTransform", cube.transform.0.to_vec())?;
        var.put(cube.data.view(), ..)?;

        file.add_attribute("crs", cube.crs.to_string())?;
        file.add_attribute(
            "history",
            format!("Created by opera_cube on {}", Utc::now().to_rfc3339()),
        )?;

        info!(
            path = %self.output_path.display(),
            variable = %cube.name,
            shape = ?shape,
            "Wrote NetCDF"
        );
        Ok(())
    }
}

/// Writes an assembled cube to a new NetCDF file.
pub fn write_cube_to_netcdf(cube: &AssembledCube, output_path: &Path) -> Result<()> {
    NetCDFWriter::new(cube, output_path).write()
}
