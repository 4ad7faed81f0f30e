//! opera_cube: OPERA DSWx and DIST granules as labeled time cubes and mosaics
//!
//! Turns STAC search results for OPERA surface-water (DSWx) and disturbance
//! (DIST) products into analysis-ready arrays. Granules are tabulated from
//! their asset filenames, read from local disk or over HTTP(S), and either
//! stacked along time for one MGRS tile or mosaicked across adjacent tiles for
//! one acquisition.
//!
//! ## Key Features
//!
//! - **Tabulation**: Asset hrefs to a time-ordered granule table via the OPERA filename grammar
//! - **Cube Assembly**: `(time, band, y, x)` arrays with coordinate vectors and CRS
//! - **Mosaicking**: Adjacent tiles composited onto the union of their extents
//! - **Remote Reads**: HTTP(S) GeoTIFFs with retries, timeouts and Earthdata `.netrc` credentials
//! - **Parallel Processing**: Bounded Rayon pools with ordered reassembly
//! - **Export**: NetCDF cubes and GeoTIFF time slices
//!
//! ## Module Organization
//!
//! - [`catalog`]: Typed STAC search results and local catalog search
//! - [`granule`]: OPERA filename grammar and granule tables
//! - [`raster`]: GeoTIFF decoding, transforms and CRS
//! - [`store`]: Local and HTTP raster access
//! - [`netrc`]: Earthdata credential files
//! - [`cloud`]: Cloud-cover filtering of search results
//! - [`cube`]: Time-cube assembly
//! - [`mosaic`]: Multi-tile mosaics
//! - [`netcdf_io`] and [`geotiff_writer`]: Export
//! - [`metadata`]: Inspection and summaries
//! - [`parallel`]: Parallel processing configuration
//! - [`errors`]: Centralized error handling
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use opera_cube::prelude::*;
//!
//! let catalog = ItemCollection::from_path("search.json").unwrap();
//! let results = catalog.search(&SearchRequest::new()).unwrap();
//! let table = GranuleTable::from_search(&results, "B01_WTR").unwrap().sorted_by_time();
//!
//! let store = GeoTiffStore::new(StoreConfig::default()).unwrap();
//! let cube = opera_cube::assemble(&table.for_tile("T11SQA"), &store, &ParallelConfig::default()).unwrap();
//! opera_cube::write_cube_to_netcdf(&cube, std::path::Path::new("cube.nc")).unwrap();
//! ```

pub mod catalog;
pub mod cli;
pub mod cloud;
pub mod cube;
pub mod errors;
pub mod geotiff_writer;
pub mod granule;
pub mod metadata;
pub mod mosaic;
pub mod netcdf_io;
pub mod netrc;
pub mod parallel;
pub mod raster;
pub mod store;

// Direct re-exports for the public API
pub use catalog::*;
pub use cloud::*;
pub use cube::*;
pub use errors::*;
pub use geotiff_writer::*;
pub use granule::*;
pub use metadata::*;
pub use mosaic::*;
pub use netcdf_io::*;
pub use netrc::*;
pub use parallel::*;
pub use raster::*;
pub use store::*;

// High-level convenience API
pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::catalog::{CatalogSearch, ItemCollection, SearchRequest, SearchResult};
    pub use crate::cube::AssembledCube;
    pub use crate::errors::{OperaError, Result};
    pub use crate::granule::{GranuleRecord, GranuleTable, OperaFilename};
    pub use crate::mosaic::{MergeMethod, MosaicOptions};
    pub use crate::netcdf_io::NetCDFWriter;
    pub use crate::parallel::ParallelConfig;
    pub use crate::raster::{Crs, GeoTransform, RasterFrame};
    pub use crate::store::{GeoTiffStore, RasterStore, StoreConfig};
}
