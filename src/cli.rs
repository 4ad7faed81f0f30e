//! Defines command-line interface options using `clap` for the opera_cube application.

use crate::mosaic::MergeMethod;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// A CLI tool for turning OPERA search results into time cubes and mosaics
#[derive(Parser, Debug)]
#[command(
    version,
    name = "opera_cube",
    about = "Assemble OPERA DSWx and DIST granules into time cubes and mosaics"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// JSON file with HTTP store settings (timeouts, retries, netrc path)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of threads for raster reads. Defaults to number of CPU cores.
    #[arg(short = 't', long, global = true)]
    pub threads: Option<usize>,

    /// Enable verbose (debug) logging.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the granule table for saved search results
    Tabulate {
        #[command(flatten)]
        search: SearchArgs,
    },

    /// Stack every granule of one tile into a time cube and write it as NetCDF
    Assemble {
        #[command(flatten)]
        search: SearchArgs,

        /// Tile to assemble, e.g. T11SQA. Required when the results span several tiles.
        #[arg(long)]
        tile: Option<String>,

        /// Output NetCDF path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Stitch adjacent tiles of one acquisition into a single GeoTIFF
    Mosaic {
        #[command(flatten)]
        search: SearchArgs,

        /// Only use granules acquired on this UTC day (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date_arg)]
        date: Option<NaiveDate>,

        /// How overlapping valid pixels are resolved: first, last or max
        #[arg(long, default_value_t = MergeMethod::First)]
        method: MergeMethod,

        /// Largest spread in minutes allowed between granule times
        #[arg(long, default_value_t = 60)]
        tolerance_minutes: i64,

        /// Output GeoTIFF path
        #[arg(short, long)]
        output: PathBuf,

        /// Also write the mosaic as NetCDF
        #[arg(long)]
        output_netcdf: Option<PathBuf>,

        /// GeoTIFF compression: none, lzw or deflate
        #[arg(long, default_value = "none", value_parser = ["none", "lzw", "deflate"])]
        compression: String,
    },

    /// Describe a GeoTIFF (local path or URL) or a NetCDF cube
    Describe {
        /// Raster location or `.nc` file
        location: String,
    },

    /// Write Earthdata credentials to a new .netrc file
    Netrc {
        #[arg(long, env = "EARTHDATA_USERNAME")]
        username: String,

        #[arg(long, env = "EARTHDATA_PASSWORD", hide_env_values = true)]
        password: String,

        /// Defaults to ~/.netrc
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

/// Where the search results come from and which of them to keep
#[derive(ClapArgs, Debug, Clone)]
pub struct SearchArgs {
    /// STAC ItemCollection JSON (FeatureCollection or array of items)
    #[arg(short, long)]
    pub items: PathBuf,

    /// Substring selecting asset keys, e.g. B01_WTR or VEG-DIST-STATUS
    #[arg(short, long, default_value = "B01_WTR")]
    pub layer: String,

    /// Bounding box as west,south,east,north in degrees
    #[arg(long, value_parser = parse_bbox_arg, allow_hyphen_values = true)]
    pub bbox: Option<[f64; 4]>,

    /// Earliest acquisition, RFC 3339 or YYYY-MM-DD
    #[arg(long, value_parser = parse_start_arg)]
    pub start: Option<DateTime<Utc>>,

    /// Latest acquisition, RFC 3339 or YYYY-MM-DD (whole day included)
    #[arg(long, value_parser = parse_end_arg)]
    pub end: Option<DateTime<Utc>>,

    /// Collection ids to keep; repeat for several
    #[arg(long = "collection")]
    pub collections: Vec<String>,

    /// Drop results with more cloud cover than this percentage
    #[arg(long)]
    pub max_cloud: Option<f64>,
}

fn parse_bbox_arg(s: &str) -> Result<[f64; 4], String> {
    let values: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Invalid bbox number: {e}"))?;
    match values.as_slice() {
        &[west, south, east, north] if west <= east && south <= north => {
            Ok([west, south, east, north])
        }
        &[_, _, _, _] => Err("Invalid bbox: expected west <= east and south <= north".to_string()),
        _ => Err("Invalid format: Expected 'west,south,east,north'.".to_string()),
    }
}

fn parse_date_arg(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date '{s}': {e}"))
}

fn parse_datetime(s: &str, day_time: NaiveTime) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = parse_date_arg(s)?;
    Ok(date.and_time(day_time).and_utc())
}

fn parse_start_arg(s: &str) -> Result<DateTime<Utc>, String> {
    parse_datetime(s, NaiveTime::MIN)
}

fn parse_end_arg(s: &str) -> Result<DateTime<Utc>, String> {
    let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
        .ok_or_else(|| "invalid end-of-day time".to_string())?;
    parse_datetime(s, end_of_day)
}
