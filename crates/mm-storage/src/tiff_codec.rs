//! TIFF encoding and decoding for image payloads.
//!
//! One image per file. Bit depth is preserved:
//!
//! - `GRAY8`: 8-bit grayscale TIFF
//! - `GRAY16`: 16-bit grayscale TIFF
//! - `RGB32`: 8-bit RGBA TIFF holding the BGRA bytes unchanged, so decoding
//!   returns exactly the bytes that were written

use image::codecs::tiff::TiffEncoder;
use image::{DynamicImage, ExtendedColorType, ImageFormat};
use mm_core::{MmError, MmResult, PixelBuffer, PixelType};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// TIFF reader/writer for [`PixelBuffer`]s.
pub struct TiffCodec;

impl TiffCodec {
    /// Write one image to `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the buffer length does not match `width * height`
    /// - the file cannot be created
    /// - TIFF encoding fails
    pub fn write<P: AsRef<Path>>(
        pixels: &PixelBuffer,
        width: u32,
        height: u32,
        path: P,
    ) -> MmResult<()> {
        let path = path.as_ref();

        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(MmError::PixelSizeMismatch {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }

        let (bytes, color_type): (std::borrow::Cow<'_, [u8]>, ExtendedColorType) = match pixels {
            PixelBuffer::U8(data) => (data.as_slice().into(), ExtendedColorType::L8),
            PixelBuffer::U16(data) => (
                data.iter()
                    .flat_map(|v| v.to_ne_bytes())
                    .collect::<Vec<u8>>()
                    .into(),
                ExtendedColorType::L16,
            ),
            PixelBuffer::Rgb32(data) => (data.as_slice().into(), ExtendedColorType::Rgba8),
        };

        let file = File::create(path)?;
        let writer = BufWriter::new(file);

        TiffEncoder::new(writer)
            .encode(&bytes, width, height, color_type)
            .map_err(|e| MmError::Codec(format!("failed to encode {}: {}", path.display(), e)))?;

        tracing::trace!(
            path = ?path,
            dimensions = format!("{}x{}", width, height),
            pixel_type = %pixels.pixel_type(),
            "Wrote TIFF"
        );

        Ok(())
    }

    /// Read an image written by [`TiffCodec::write`].
    ///
    /// `pixel_type` selects how the decoded samples are interpreted; a file
    /// whose color layout does not match is a codec error.
    pub fn read<P: AsRef<Path>>(path: P, pixel_type: PixelType) -> MmResult<PixelBuffer> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);

        let decoded = image::load(reader, ImageFormat::Tiff)
            .map_err(|e| MmError::Codec(format!("failed to decode {}: {}", path.display(), e)))?;

        match (pixel_type, decoded) {
            (PixelType::Gray8, DynamicImage::ImageLuma8(img)) => Ok(PixelBuffer::U8(img.into_raw())),
            (PixelType::Gray16, DynamicImage::ImageLuma16(img)) => {
                Ok(PixelBuffer::U16(img.into_raw()))
            }
            (PixelType::Rgb32, DynamicImage::ImageRgba8(img)) => {
                Ok(PixelBuffer::Rgb32(img.into_raw()))
            }
            (expected, other) => Err(MmError::Codec(format!(
                "{} holds {:?} data, expected {}",
                path.display(),
                other.color(),
                expected
            ))),
        }
    }
}
