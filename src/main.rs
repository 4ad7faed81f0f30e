//! Entry point for the opera_cube application.
//! Handles CLI parsing, logging setup, and dispatches tabulate, assemble, mosaic, describe and netrc.

use clap::Parser;
use opera_cube::cli::{Args, Command, SearchArgs};
use opera_cube::prelude::*;
use opera_cube::{
    assemble, default_netrc_path, describe_raster, filter_by_cloud_cover, mosaic,
    print_cube_summary, print_netcdf_contents, write_cube_to_netcdf, write_netrc, CloudFallback,
    GeoTiffCompression, MosaicOptions,
};
use std::path::Path;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let args = Args::parse();
    init_logging(args.verbose);

    let parallel = ParallelConfig::new(args.threads);
    debug!(threads = parallel.threads(), "Read pool configured");

    match args.command {
        Command::Tabulate { search } => {
            let store = open_store(args.config.as_deref())?;
            let table = load_table(&search, &store)?;
            print!("{table}");
            println!(
                "\n✅ {} granules across {} tiles and {} acquisitions",
                table.len(),
                table.tiles().len(),
                table.times().len()
            );
        }
        Command::Assemble {
            search,
            tile,
            output,
        } => {
            let store = open_store(args.config.as_deref())?;
            let table = load_table(&search, &store)?;
            let tiles = table.tiles();
            let tile = match tile {
                Some(tile) => tile,
                None if tiles.len() == 1 => tiles.into_iter().next().unwrap_or_default(),
                None => {
                    return Err(OperaError::InvalidArgument(format!(
                        "results span tiles {}; choose one with --tile",
                        tiles.into_iter().collect::<Vec<_>>().join(", ")
                    ))
                    .into())
                }
            };
            let table = table.for_tile(&tile);
            println!("⚡ Assembling {} granules of tile {}...", table.len(), tile);

            let cube = assemble(&table, &store, &parallel)?;
            print_cube_summary(&cube);
            write_cube_to_netcdf(&cube, &output)?;
            println!("✅ Saved cube to {}", output.display());
        }
        Command::Mosaic {
            search,
            date,
            method,
            tolerance_minutes,
            output,
            output_netcdf,
            compression,
        } => {
            let store = open_store(args.config.as_deref())?;
            let mut table = load_table(&search, &store)?;
            if let Some(date) = date {
                table = table.on_date(date);
            }
            println!(
                "⚡ Mosaicking {} granules over {} tiles ({})...",
                table.len(),
                table.tiles().len(),
                method
            );

            let options = MosaicOptions {
                method,
                time_tolerance: chrono::Duration::minutes(tolerance_minutes),
            };
            let cube = mosaic(&table, &store, &parallel, &options)?;
            print_cube_summary(&cube);

            let compression = match compression.as_str() {
                "lzw" => GeoTiffCompression::Lzw,
                "deflate" => GeoTiffCompression::Deflate,
                _ => GeoTiffCompression::None,
            };
            cube.geotiff_writer().compression(compression).write(&output)?;
            println!("✅ Saved mosaic to {}", output.display());

            if let Some(path) = output_netcdf {
                write_cube_to_netcdf(&cube, &path)?;
                println!("✅ Saved mosaic to {}", path.display());
            }
        }
        Command::Describe { location } => {
            if location.ends_with(".nc") {
                let file = netcdf::open(&location)?;
                println!("Successfully opened NetCDF file: {}", location);
                print_netcdf_contents(&file)?;
            } else {
                let store = open_store(args.config.as_deref())?;
                let frame = store.open(&location)?;
                describe_raster(&frame);
            }
        }
        Command::Netrc {
            username,
            password,
            path,
        } => {
            let path = path.or_else(default_netrc_path).ok_or_else(|| {
                OperaError::NetrcError("HOME is not set; pass --path".to_string())
            })?;
            write_netrc(&path, &username, &password)?;
            println!("✅ Wrote Earthdata credentials to {}", path.display());
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: Option<&Path>) -> Result<GeoTiffStore> {
    let config = match config {
        Some(path) => StoreConfig::from_path(path)?,
        None => StoreConfig::default(),
    };
    GeoTiffStore::new(config)
}

/// Search the saved collection, drop cloudy results, tabulate and sort by time
fn load_table(search: &SearchArgs, store: &GeoTiffStore) -> Result<GranuleTable> {
    let catalog = ItemCollection::from_path(&search.items)?;
    let mut request = SearchRequest::new().datetime_range(search.start, search.end);
    if let Some(bbox) = search.bbox {
        request = request.bbox(bbox);
    }
    for collection in &search.collections {
        request = request.collection(collection.clone());
    }

    let mut results = catalog.search(&request)?;
    if let Some(threshold) = search.max_cloud {
        let before = results.len();
        results = filter_by_cloud_cover(&results, threshold, store, &CloudFallback::default())?;
        info!(before, after = results.len(), threshold, "Applied cloud filter");
    }

    let table = GranuleTable::from_search(&results, &search.layer)?;
    if table.is_empty() {
        return Err(OperaError::EmptyTable);
    }
    Ok(table.sorted_by_time())
}
