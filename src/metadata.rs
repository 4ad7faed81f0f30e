//! Inspection of rasters, cubes and exported NetCDF files
//!
//! The `describe_*` and `print_*` functions write human-readable reports to
//! stdout for the CLI; [`summarize_cube`] returns the same numbers as a struct.

use crate::cube::AssembledCube;
use crate::errors::Result;
use crate::raster::{is_nodata, RasterFrame};
use chrono::{DateTime, Utc};
use netcdf::{AttributeValue, File};

/// Structured summary of an assembled cube
#[derive(Debug, Clone)]
pub struct CubeSummary {
    pub name: String,
    pub shape: Vec<usize>,
    pub crs: String,
    pub first_time: Option<DateTime<Utc>>,
    pub last_time: Option<DateTime<Utc>>,
    pub total_pixels: usize,
    pub valid_pixels: usize,
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub mean: Option<f64>,
    pub estimated_size_bytes: usize,
}

impl CubeSummary {
    /// Share of pixels that are not nodata, in percent
    pub fn valid_percent(&self) -> f64 {
        if self.total_pixels == 0 {
            return 0.0;
        }
        100.0 * self.valid_pixels as f64 / self.total_pixels as f64
    }
}

/// Compute shape, time range and valid-pixel statistics for a cube
pub fn summarize_cube(cube: &AssembledCube) -> CubeSummary {
    let mut valid = 0usize;
    let mut sum = 0.0f64;
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in cube.data.iter().filter(|&&v| !is_nodata(v, cube.nodata)) {
        valid += 1;
        sum += f64::from(v);
        min = min.min(v);
        max = max.max(v);
    }

    let total = cube.data.len();
    CubeSummary {
        name: cube.name.clone(),
        shape: cube.shape().to_vec(),
        crs: cube.crs.to_string(),
        first_time: cube.time.iter().min().copied(),
        last_time: cube.time.iter().max().copied(),
        total_pixels: total,
        valid_pixels: valid,
        min: (valid > 0).then_some(min),
        max: (valid > 0).then_some(max),
        mean: (valid > 0).then(|| sum / valid as f64),
        estimated_size_bytes: total * std::mem::size_of::<f32>(),
    }
}

/// Prints the summary of an assembled cube.
pub fn print_cube_summary(cube: &AssembledCube) {
    let summary = summarize_cube(cube);

    println!("\n Cube: {}", summary.name);
    println!("={}", "=".repeat(summary.name.len() + 7));
    println!(" Dimensions: [time, band, y, x]");
    println!(" Shape: ({})", join_shape(&summary.shape));
    println!(" CRS: {}", summary.crs);
    let bounds = cube.bounds();
    println!(
        " Bounds: x {:.3}..{:.3}, y {:.3}..{:.3}",
        bounds.min_x, bounds.max_x, bounds.min_y, bounds.max_y
    );
    if let (Some(first), Some(last)) = (summary.first_time, summary.last_time) {
        println!(" Time range: {} to {}", first.to_rfc3339(), last.to_rfc3339());
    }
    for (i, t) in cube.time.iter().enumerate() {
        println!("    [{}] {}", i, t.to_rfc3339());
    }

    println!("\n Pixel Statistics:");
    println!(
        "    Valid pixels: {} / {} ({:.1}%)",
        summary.valid_pixels,
        summary.total_pixels,
        summary.valid_percent()
    );
    match (summary.min, summary.max, summary.mean) {
        (Some(min), Some(max), Some(mean)) => {
            println!("    Min: {}", min);
            println!("    Max: {}", max);
            println!("    Mean: {:.2}", mean);
        }
        _ => println!("    ⚠ No valid pixels"),
    }
    println!("    In memory: {}", format_size(summary.estimated_size_bytes));
}

/// Prints shape, CRS, transform, bounds and nodata of a single raster.
pub fn describe_raster(frame: &RasterFrame) {
    println!("\n Raster: {}", frame.location);
    println!("================================");
    println!(
        " Shape: ({} × {} × {})  [band, y, x]",
        frame.bands(),
        frame.height(),
        frame.width()
    );
    println!(" CRS: {}", frame.crs);
    let t = frame.transform.0;
    println!(
        " Transform: ({}, {}, {}, {}, {}, {})",
        t[0], t[1], t[2], t[3], t[4], t[5]
    );
    let (dx, dy) = frame.transform.resolution();
    println!(" Resolution: {} × {}", dx, dy);
    let bounds = frame.bounds();
    println!(
        " Bounds: x {:.3}..{:.3}, y {:.3}..{:.3}",
        bounds.min_x, bounds.max_x, bounds.min_y, bounds.max_y
    );
    match frame.nodata {
        Some(nodata) => println!(" Nodata: {}", nodata),
        None => println!(" Nodata: (none)"),
    }

    for band in 0..frame.bands() {
        let view = frame.band(band);
        let valid = view.iter().filter(|&&v| !frame.is_nodata(v)).count();
        println!(
            "    band {}: {} / {} valid pixels",
            band,
            valid,
            view.len()
        );
    }
}

/// Lists dimensions and variables of a NetCDF file written by this crate.
pub fn print_netcdf_contents(file: &File) -> Result<()> {
    println!("\n Dimensions");
    println!("==============");
    let mut dimensions: Vec<_> = file.dimensions().collect();
    dimensions.sort_by_key(|d| d.name());
    for dim in dimensions {
        println!("    {} = {}", dim.name(), dim.len());
    }

    println!("\n Variables");
    println!("=============");
    for var in file.variables() {
        let dims: Vec<String> = var
            .dimensions()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        println!(
            "    {} ({}): [{}] = ({})",
            var.name(),
            format!("{:?}", var.vartype()).to_lowercase(),
            dims.join(", "),
            join_shape(&shape)
        );

        let mut key_attrs = Vec::new();
        for name in ["units", "crs", "_FillValue"] {
            if let Some(attr) = var.attribute(name) {
                match attr.value()? {
                    AttributeValue::Str(s) => key_attrs.push(format!("{name}: {s}")),
                    AttributeValue::Float(f) => key_attrs.push(format!("{name}: {f}")),
                    AttributeValue::Double(d) => key_attrs.push(format!("{name}: {d}")),
                    _ => {}
                }
            }
        }
        if !key_attrs.is_empty() {
            println!("      └─ {}", key_attrs.join(", "));
        }
    }

    println!("\n Global Attributes");
    println!("=====================");
    for attr in file.attributes() {
        println!("    {}: {:?}", attr.name(), attr.value()?);
    }
    Ok(())
}

fn join_shape(shape: &[usize]) -> String {
    shape
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(" × ")
}

/// Human-readable byte count
pub fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Crs, GeoTransform};
    use ndarray::Array4;

    #[test]
    fn test_summary_skips_nodata() {
        let mut data = Array4::from_elem((2, 1, 2, 2), 255.0f32);
        data[[0, 0, 0, 0]] = 1.0;
        data[[1, 0, 1, 1]] = 3.0;
        let cube = AssembledCube {
            name: "B01_WTR".to_string(),
            data,
            time: vec![
                "2024-03-02T00:00:00Z".parse().unwrap(),
                "2024-03-01T00:00:00Z".parse().unwrap(),
            ],
            band: vec![0],
            y: vec![20.0, 10.0],
            x: vec![0.0, 10.0],
            crs: Crs::Projected(32611),
            transform: GeoTransform::north_up(0.0, 20.0, 10.0, 10.0),
            nodata: Some(255.0),
        };
        let summary = summarize_cube(&cube);
        assert_eq!(summary.valid_pixels, 2);
        assert_eq!(summary.total_pixels, 8);
        assert_eq!(summary.min, Some(1.0));
        assert_eq!(summary.max, Some(3.0));
        assert_eq!(summary.mean, Some(2.0));
        assert_eq!(summary.valid_percent(), 25.0);
        assert_eq!(summary.first_time, Some(cube.time[1]));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
