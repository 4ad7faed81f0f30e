//! GeoTIFF writer for cube time slices
//!
//! Writes one time step of an [`AssembledCube`] (typically a mosaic) as a
//! 32-bit float GeoTIFF with pixel scale, tie point, GeoKeyDirectory and GDAL
//! nodata tags, readable by [`RasterFrame::from_geotiff`](crate::raster::RasterFrame::from_geotiff)
//! and by GDAL.

use crate::cube::AssembledCube;
use crate::errors::{OperaError, Result};
use crate::raster::{
    GDAL_NODATA, GEOGRAPHIC_TYPE_GEO_KEY, GEOTIFF_GEOKEYDIRECTORY, GEOTIFF_MODELPIXELSCALE,
    GEOTIFF_MODELTIEPOINT, GT_MODEL_TYPE_GEO_KEY, GT_RASTER_TYPE_GEO_KEY,
    PROJECTED_CS_TYPE_GEO_KEY, RASTER_PIXEL_IS_AREA,
};
use ndarray::Axis;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::{Compression, TiffEncoder};
use tiff::tags::Tag;
use tracing::info;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;

/// Compression method for GeoTIFF output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeoTiffCompression {
    /// No compression - fastest but largest files
    #[default]
    None,
    /// LZW compression - good balance of speed and size
    Lzw,
    /// Deflate (zlib) compression - better compression, slower
    Deflate,
}

/// Builder for configuring GeoTIFF output
pub struct GeoTiffWriter<'a> {
    cube: &'a AssembledCube,
    time_index: usize,
    compression: GeoTiffCompression,
}

impl<'a> GeoTiffWriter<'a> {
    /// Writer for the first time step of `cube`
    #[must_use]
    pub fn new(cube: &'a AssembledCube) -> Self {
        Self {
            cube,
            time_index: 0,
            compression: GeoTiffCompression::default(),
        }
    }

    /// Select which time step to write
    #[must_use]
    pub fn time_index(mut self, index: usize) -> Self {
        self.time_index = index;
        self
    }

    /// Set the compression method (single-band output only; multi-band is stored raw)
    #[must_use]
    pub fn compression(mut self, compression: GeoTiffCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Write to a file path
    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        info!(path = %path.display(), "Wrote GeoTIFF");
        Ok(())
    }

    /// Write to any writer that implements Write + Seek
    pub fn write_to<W: Write + Seek>(self, writer: W) -> Result<()> {
        let cube = self.cube;
        if self.time_index >= cube.time.len() {
            return Err(OperaError::InvalidArgument(format!(
                "time index {} out of range for {} time steps",
                self.time_index,
                cube.time.len()
            )));
        }
        if cube.x.is_empty() || cube.y.is_empty() {
            return Err(OperaError::InvalidArgument(
                "cube has zero width or height".to_string(),
            ));
        }

        let width = u32::try_from(cube.x.len())
            .map_err(|_| OperaError::InvalidArgument("cube too wide for TIFF".to_string()))?;
        let height = u32::try_from(cube.y.len())
            .map_err(|_| OperaError::InvalidArgument("cube too tall for TIFF".to_string()))?;

        // (band, y, x) -> interleaved (y, x, band)
        let slice = cube.at_time(self.time_index);
        let pixels: Vec<f32> = slice
            .view()
            .permuted_axes([1, 2, 0])
            .iter()
            .copied()
            .collect();
        let bands = slice.len_of(Axis(0));

        if bands == 1 {
            let compression = match self.compression {
                GeoTiffCompression::None => Compression::Uncompressed,
                GeoTiffCompression::Lzw => Compression::Lzw,
                GeoTiffCompression::Deflate => {
                    Compression::Deflate(tiff::encoder::DeflateLevel::Fast)
                }
            };
            let mut encoder = TiffEncoder::new(writer)?.with_compression(compression);
            let mut image = encoder.new_image::<Gray32Float>(width, height)?;
            self.write_geotiff_tags(image.encoder())?;
            image.write_data(&pixels)?;
        } else {
            self.write_multiband(TiffEncoder::new(writer)?, width, height, bands, &pixels)?;
        }
        Ok(())
    }

    /// Write a multi-band image using the low-level DirectoryEncoder API.
    fn write_multiband<W: Write + Seek>(
        &self,
        mut encoder: TiffEncoder<W>,
        width: u32,
        height: u32,
        bands: usize,
        pixels: &[f32],
    ) -> Result<()> {
        let samples = u16::try_from(bands)
            .map_err(|_| OperaError::InvalidArgument(format!("{bands} bands is too many")))?;
        let mut dir = encoder.image_directory()?;

        dir.write_tag(Tag::ImageWidth, width)?;
        dir.write_tag(Tag::ImageLength, height)?;
        dir.write_tag(Tag::BitsPerSample, vec![32u16; bands].as_slice())?;
        dir.write_tag(Tag::Compression, 1u16)?;
        // BlackIsZero
        dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
        dir.write_tag(Tag::SamplesPerPixel, samples)?;
        // IEEE floating point
        dir.write_tag(Tag::SampleFormat, vec![3u16; bands].as_slice())?;
        // Chunky
        dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
        dir.write_tag(Tag::RowsPerStrip, height)?;
        dir.write_tag(Tag::ExtraSamples, vec![0u16; bands - 1].as_slice())?;

        self.write_geotiff_tags(&mut dir)?;

        let bytes: Vec<u8> = pixels.iter().flat_map(|v| v.to_le_bytes()).collect();
        let offset = dir.write_data(bytes.as_slice())?;
        let offset = u32::try_from(offset)
            .map_err(|_| OperaError::InvalidArgument("raster exceeds classic TIFF size".to_string()))?;
        let byte_count = u32::try_from(bytes.len())
            .map_err(|_| OperaError::InvalidArgument("raster exceeds classic TIFF size".to_string()))?;
        dir.write_tag(Tag::StripOffsets, offset)?;
        dir.write_tag(Tag::StripByteCounts, byte_count)?;
        dir.finish()?;
        Ok(())
    }

    fn write_geotiff_tags<W: Write + Seek, K: tiff::encoder::TiffKind>(
        &self,
        dir: &mut tiff::encoder::DirectoryEncoder<'_, W, K>,
    ) -> Result<()> {
        let cube = self.cube;
        let (x0, y0) = cube.transform.origin();
        let (dx, dy) = cube.transform.resolution();

        // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
        let pixel_scale = [dx, dy, 0.0];
        dir.write_tag(Tag::Unknown(GEOTIFF_MODELPIXELSCALE), pixel_scale.as_slice())?;

        // ModelTiepoint ties pixel (0, 0) to the upper-left corner
        let tiepoint = [0.0, 0.0, 0.0, x0, y0, 0.0];
        dir.write_tag(Tag::Unknown(GEOTIFF_MODELTIEPOINT), tiepoint.as_slice())?;

        let geokeys = self.build_geokey_directory()?;
        dir.write_tag(Tag::Unknown(GEOTIFF_GEOKEYDIRECTORY), geokeys.as_slice())?;

        if let Some(nodata) = cube.nodata {
            let text = if nodata.is_nan() {
                "nan".to_string()
            } else {
                nodata.to_string()
            };
            dir.write_tag(Tag::Unknown(GDAL_NODATA), text.as_str())?;
        }
        Ok(())
    }

    fn build_geokey_directory(&self) -> Result<Vec<u16>> {
        let crs = self.cube.crs;
        let code = u16::try_from(crs.epsg()).map_err(|_| {
            OperaError::InvalidArgument(format!("{crs} does not fit a GeoKey"))
        })?;
        let (model, crs_key) = if crs.is_geographic() {
            (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_GEO_KEY)
        } else {
            (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_GEO_KEY)
        };

        // [KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys,
        //  KeyID, TIFFTagLocation, Count, Value_Offset, ...]
        Ok(vec![
            1,
            1,
            0,
            3,
            GT_MODEL_TYPE_GEO_KEY,
            0,
            1,
            model,
            GT_RASTER_TYPE_GEO_KEY,
            0,
            1,
            RASTER_PIXEL_IS_AREA,
            crs_key,
            0,
            1,
            code,
        ])
    }
}

impl AssembledCube {
    /// Write the first time step to a GeoTIFF file
    pub fn write_geotiff<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        GeoTiffWriter::new(self).write(path)
    }

    /// Get a GeoTIFF writer builder for more control over output options
    pub fn geotiff_writer(&self) -> GeoTiffWriter<'_> {
        GeoTiffWriter::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Crs, GeoTransform, RasterFrame};
    use chrono::Utc;
    use ndarray::Array4;
    use std::io::Cursor;

    fn cube(bands: usize) -> AssembledCube {
        let data = Array4::from_shape_fn((1, bands, 3, 4), |(_, b, y, x)| (b * 100 + y * 10 + x) as f32);
        AssembledCube {
            name: "test".to_string(),
            data,
            time: vec![Utc::now()],
            band: (0..bands).collect(),
            y: vec![3000.0, 2970.0, 2940.0],
            x: vec![600.0, 630.0, 660.0, 690.0],
            crs: Crs::Projected(32611),
            transform: GeoTransform::north_up(600.0, 3000.0, 30.0, 30.0),
            nodata: Some(255.0),
        }
    }

    fn roundtrip(cube: &AssembledCube, compression: GeoTiffCompression) -> RasterFrame {
        let mut buffer = Cursor::new(Vec::new());
        cube.geotiff_writer()
            .compression(compression)
            .write_to(&mut buffer)
            .unwrap();
        buffer.set_position(0);
        RasterFrame::from_geotiff(buffer, "memory").unwrap()
    }

    #[test]
    fn test_single_band_roundtrip() {
        let original = cube(1);
        for compression in [GeoTiffCompression::None, GeoTiffCompression::Lzw, GeoTiffCompression::Deflate] {
            let frame = roundtrip(&original, compression);
            assert_eq!(frame.data, original.at_time(0));
            assert_eq!(frame.crs, Crs::Projected(32611));
            assert_eq!(frame.transform, original.transform);
            assert_eq!(frame.nodata, Some(255.0));
        }
    }

    #[test]
    fn test_multiband_roundtrip() {
        let original = cube(3);
        let frame = roundtrip(&original, GeoTiffCompression::None);
        assert_eq!(frame.bands(), 3);
        assert_eq!(frame.data, original.at_time(0));
    }

    #[test]
    fn test_time_index_out_of_range() {
        let original = cube(1);
        let result = original
            .geotiff_writer()
            .time_index(5)
            .write_to(Cursor::new(Vec::new()));
        assert!(matches!(result, Err(OperaError::InvalidArgument(_))));
    }
}
