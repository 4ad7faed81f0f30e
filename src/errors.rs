//! Centralized error handling for opera_cube
//!
//! Every fallible operation in the crate returns [`Result`], so callers get one
//! error type whether a failure came from the catalog boundary, the network,
//! GeoTIFF decoding or NetCDF export.

use thiserror::Error;

/// Main error type for opera_cube operations
#[derive(Debug, Error)]
pub enum OperaError {
    /// I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Malformed raster URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Redirect chain did not end within the configured limit
    #[error("Too many redirects fetching '{url}'")]
    TooManyRedirects { url: String },

    /// Non-success HTTP status for a raster request
    #[error("HTTP status {status} fetching '{url}'")]
    HttpStatus { url: String, status: u16 },

    /// TIFF decoding or encoding errors
    #[error("TIFF error: {0}")]
    TiffError(#[from] tiff::TiffError),

    /// NetCDF file operation errors
    #[error("NetCDF error: {0}")]
    NetCDFError(#[from] netcdf::Error),

    /// JSON decoding errors (STAC items, config files)
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Array shape or dimension error
    #[error("Array error: {0}")]
    ArrayError(#[from] ndarray::ShapeError),

    /// Asset filename does not follow the OPERA naming convention
    #[error("Unrecognized filename format: '{name}'")]
    UnrecognizedFilename { name: String },

    /// A catalog record failed validation at the boundary
    #[error("Invalid search result '{id}': {message}")]
    InvalidSearchResult { id: String, message: String },

    /// A GeoTIFF is missing the tags needed to place it on the ground
    #[error("Missing georeferencing in '{location}': {message}")]
    MissingGeoreference { location: String, message: String },

    /// Pixel layout the decoder does not handle
    #[error("Unsupported raster layout in '{location}': {message}")]
    UnsupportedRaster { location: String, message: String },

    /// Inputs that must share a coordinate reference system do not
    #[error("CRS mismatch: '{location}' is {found}, expected {expected}")]
    CrsMismatch {
        location: String,
        expected: String,
        found: String,
    },

    /// Inputs that must share a pixel grid do not
    #[error("Grid mismatch in '{location}': {message}")]
    GridMismatch { location: String, message: String },

    /// Mosaic inputs span more than one acquisition
    #[error("Granules span more than one acquisition: {message}")]
    MixedAcquisitions { message: String },

    /// Nothing to assemble
    #[error("Granule table is empty")]
    EmptyTable,

    /// The same asset URL appears twice in a granule table
    #[error("Duplicate granule href '{href}'")]
    DuplicateGranule { href: String },

    /// `.netrc` parsing or writing errors
    #[error("netrc error: {0}")]
    NetrcError(String),

    /// Caller passed an argument outside the valid range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration values
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Thread pool configuration error
    #[error("Thread pool error: {0}")]
    ThreadPoolError(String),
}

/// Result type alias for opera_cube operations
pub type Result<T> = std::result::Result<T, OperaError>;
