//! In-memory rasters decoded from GeoTIFF
//!
//! [`RasterFrame`] holds everything read from one file: the pixels as `f32`
//! in `(band, row, col)` order, the affine transform, the CRS and the nodata
//! sentinel. Decoding is pure Rust through the `tiff` crate; the GeoTIFF
//! georeferencing tags are read directly.

use crate::errors::{OperaError, Result};
use ndarray::{Array3, ArrayView2, Axis};
use std::fmt;
use std::io::{Read, Seek};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

// GeoTIFF tag IDs (not named in every tiff crate release)
pub(crate) const GEOTIFF_MODELPIXELSCALE: u16 = 33550;
pub(crate) const GEOTIFF_MODELTIEPOINT: u16 = 33922;
pub(crate) const GEOTIFF_MODELTRANSFORMATION: u16 = 34264;
pub(crate) const GEOTIFF_GEOKEYDIRECTORY: u16 = 34735;
pub(crate) const GDAL_NODATA: u16 = 42113;

// GeoKey IDs
pub(crate) const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
pub(crate) const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
pub(crate) const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
pub(crate) const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

pub(crate) const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

/// Six-coefficient affine transform in GDAL order `(x0, dx, rx, y0, ry, dy)`
///
/// `x = x0 + col * dx + row * rx` and `y = y0 + col * ry + row * dy`,
/// where `(col, row)` addresses the upper-left corner of a pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform from an upper-left origin and positive pixel sizes
    pub fn north_up(x0: f64, y0: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self([x0, pixel_width, 0.0, y0, 0.0, -pixel_height])
    }

    /// Upper-left corner of pixel (0, 0)
    pub fn origin(&self) -> (f64, f64) {
        (self.0[0], self.0[3])
    }

    /// Absolute pixel width and height
    pub fn resolution(&self) -> (f64, f64) {
        (self.0[1].abs(), self.0[5].abs())
    }

    pub fn is_north_up(&self) -> bool {
        self.0[2] == 0.0 && self.0[4] == 0.0
    }

    /// Map a (possibly fractional) pixel index to projected coordinates
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let [x0, dx, rx, y0, ry, dy] = self.0;
        (x0 + col * dx + row * rx, y0 + col * ry + row * dy)
    }

    /// Inverse transform, mapping projected coordinates back to pixel space
    pub fn inverse(&self) -> Option<GeoTransform> {
        let [x0, dx, rx, y0, ry, dy] = self.0;
        let det = dx * dy - rx * ry;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let (a, b, c, d) = (dy / det, -rx / det, -ry / det, dx / det);
        Some(GeoTransform([
            -(a * x0 + b * y0),
            a,
            b,
            -(c * x0 + d * y0),
            c,
            d,
        ]))
    }
}

/// Coordinate reference system identified by EPSG code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    Projected(u32),
    Geographic(u32),
}

impl Crs {
    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Projected(code) | Crs::Geographic(code) => *code,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Geographic(_))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Axis-aligned extent in projected coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// One fully-read raster
#[derive(Debug, Clone)]
pub struct RasterFrame {
    /// Pixels in `(band, row, col)` order
    pub data: Array3<f32>,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub nodata: Option<f64>,
    /// Path or URL the frame was read from
    pub location: String,
}

impl RasterFrame {
    /// Decode a GeoTIFF from any seekable reader
    ///
    /// The reader is consumed; nothing keeps it alive once the frame is built.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The TIFF cannot be decoded
    /// - Samples are stored planar-separate or in an unsupported format
    /// - Georeferencing tags (transform or EPSG code) are missing
    pub fn from_geotiff<R: Read + Seek>(reader: R, location: &str) -> Result<Self> {
        let mut decoder = Decoder::new(reader)?.with_limits(Limits::unlimited());
        let (width, height) = decoder.dimensions()?;
        let (width, height) = (width as usize, height as usize);

        let samples = match find_tag(&mut decoder, Tag::SamplesPerPixel.to_u16())? {
            Some(value) => value.into_u16()? as usize,
            None => 1,
        };
        let planar = match find_tag(&mut decoder, Tag::PlanarConfiguration.to_u16())? {
            Some(value) => value.into_u16()?,
            None => 1,
        };
        if samples > 1 && planar != 1 {
            return Err(OperaError::UnsupportedRaster {
                location: location.to_string(),
                message: "planar-separate band layout".to_string(),
            });
        }

        let geokeys = match find_tag(&mut decoder, GEOTIFF_GEOKEYDIRECTORY)? {
            Some(value) => GeoKeys::parse(&value.into_u16_vec()?),
            None => GeoKeys::default(),
        };
        let crs = geokeys.crs(location)?;
        let mut transform = read_transform(&mut decoder, location)?;
        if geokeys.get(GT_RASTER_TYPE_GEO_KEY) == Some(RASTER_PIXEL_IS_POINT) {
            // Tie points name pixel centres; shift to the corner convention
            let (cx, cy) = transform.apply(-0.5, -0.5);
            transform.0[0] = cx;
            transform.0[3] = cy;
        }

        let nodata = match find_tag(&mut decoder, GDAL_NODATA)? {
            Some(value) => parse_nodata(&value.into_string()?),
            None => None,
        };

        let pixels = samples_to_f32(decoder.read_image()?).ok_or_else(|| {
            OperaError::UnsupportedRaster {
                location: location.to_string(),
                message: "unsupported sample format".to_string(),
            }
        })?;
        if pixels.len() != width * height * samples {
            return Err(OperaError::UnsupportedRaster {
                location: location.to_string(),
                message: format!(
                    "decoded {} samples, expected {} x {} x {}",
                    pixels.len(),
                    samples,
                    height,
                    width
                ),
            });
        }

        // Chunky samples arrive as (row, col, band)
        let data = Array3::from_shape_vec((height, width, samples), pixels)?
            .permuted_axes([2, 0, 1])
            .as_standard_layout()
            .into_owned();

        Ok(Self {
            data,
            transform,
            crs,
            nodata,
            location: location.to_string(),
        })
    }

    pub fn bands(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn height(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn width(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn band(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), index)
    }

    /// Ground extent covered by the pixel grid
    pub fn bounds(&self) -> Bounds {
        let corners = [
            self.transform.apply(0.0, 0.0),
            self.transform.apply(self.width() as f64, 0.0),
            self.transform.apply(0.0, self.height() as f64),
            self.transform.apply(self.width() as f64, self.height() as f64),
        ];
        corners.iter().fold(
            Bounds {
                min_x: f64::INFINITY,
                min_y: f64::INFINITY,
                max_x: f64::NEG_INFINITY,
                max_y: f64::NEG_INFINITY,
            },
            |b, &(x, y)| Bounds {
                min_x: b.min_x.min(x),
                min_y: b.min_y.min(y),
                max_x: b.max_x.max(x),
                max_y: b.max_y.max(y),
            },
        )
    }

    /// Column coordinates: `x[i] = x0 + i * |dx|`
    pub fn x_coords(&self) -> Vec<f64> {
        axis_coords(self.transform.origin().0, self.transform.resolution().0, self.width())
    }

    /// Row coordinates: `y[j] = y0 - j * |dy|`, decreasing downward
    pub fn y_coords(&self) -> Vec<f64> {
        axis_coords(self.transform.origin().1, -self.transform.resolution().1, self.height())
    }

    /// Whether a pixel value is this frame's nodata sentinel
    pub fn is_nodata(&self, value: f32) -> bool {
        is_nodata(value, self.nodata)
    }
}

/// `origin + i * step` for `i` in `0..len`
pub fn axis_coords(origin: f64, step: f64, len: usize) -> Vec<f64> {
    (0..len).map(|i| origin + i as f64 * step).collect()
}

/// Nodata test that treats a NaN sentinel (and any NaN pixel) as missing
pub fn is_nodata(value: f32, nodata: Option<f64>) -> bool {
    if value.is_nan() {
        return true;
    }
    match nodata {
        Some(nd) if nd.is_nan() => false,
        Some(nd) => f64::from(value) == nd,
        None => false,
    }
}

fn find_tag<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    code: u16,
) -> Result<Option<tiff::decoder::ifd::Value>> {
    Ok(decoder.find_tag(Tag::from_u16_exhaustive(code))?)
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>, location: &str) -> Result<GeoTransform> {
    if let Some(value) = find_tag(decoder, GEOTIFF_MODELTRANSFORMATION)? {
        let m = value.into_f64_vec()?;
        if m.len() >= 8 {
            return Ok(GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]]));
        }
    }

    let scale = find_tag(decoder, GEOTIFF_MODELPIXELSCALE)?
        .map(|v| v.into_f64_vec())
        .transpose()?;
    let tiepoint = find_tag(decoder, GEOTIFF_MODELTIEPOINT)?
        .map(|v| v.into_f64_vec())
        .transpose()?;
    match (scale, tiepoint) {
        (Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => {
            let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
            Ok(GeoTransform::north_up(
                x - i * scale[0],
                y + j * scale[1],
                scale[0],
                scale[1],
            ))
        }
        _ => Err(OperaError::MissingGeoreference {
            location: location.to_string(),
            message: "no ModelTransformation or ModelPixelScale/ModelTiepoint tags".to_string(),
        }),
    }
}

fn parse_nodata(text: &str) -> Option<f64> {
    text.trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .parse()
        .ok()
}

fn samples_to_f32(result: DecodingResult) -> Option<Vec<f32>> {
    // Widening to f32 is lossy only for 32/64-bit integers, which OPERA layers do not use
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let pixels = match result {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(pixels)
}

/// Inline-valued entries of a GeoKeyDirectory
#[derive(Debug, Default)]
struct GeoKeys {
    entries: Vec<(u16, u16)>,
}

impl GeoKeys {
    /// `[version, revision, minor, count, (id, location, count, value)*]`
    fn parse(raw: &[u16]) -> Self {
        let count = raw.get(3).copied().unwrap_or(0) as usize;
        let entries = raw
            .get(4..)
            .unwrap_or(&[])
            .chunks_exact(4)
            .take(count)
            .filter(|key| key[1] == 0)
            .map(|key| (key[0], key[3]))
            .collect();
        Self { entries }
    }

    fn get(&self, id: u16) -> Option<u16> {
        self.entries.iter().find(|(k, _)| *k == id).map(|(_, v)| *v)
    }

    fn crs(&self, location: &str) -> Result<Crs> {
        let missing = |message: &str| OperaError::MissingGeoreference {
            location: location.to_string(),
            message: message.to_string(),
        };
        match (self.get(PROJECTED_CS_TYPE_GEO_KEY), self.get(GEOGRAPHIC_TYPE_GEO_KEY)) {
            (Some(USER_DEFINED), _) => Err(missing("user-defined projected CRS")),
            (Some(code), _) => Ok(Crs::Projected(u32::from(code))),
            (None, Some(USER_DEFINED)) => Err(missing("user-defined geographic CRS")),
            (None, Some(code)) => Ok(Crs::Geographic(u32::from(code))),
            (None, None) => Err(missing("no EPSG code in GeoKeyDirectory")),
        }
    }
}
