//! Pixel payloads and tagged images.

use crate::error::{MmError, MmResult};
use crate::key::ImageKey;
use crate::metadata::ImageTags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Camera pixel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelType {
    /// 8-bit grayscale
    #[serde(rename = "GRAY8")]
    Gray8,
    /// 16-bit grayscale
    #[serde(rename = "GRAY16")]
    Gray16,
    /// 32-bit color, BGRA byte order
    #[serde(rename = "RGB32")]
    Rgb32,
}

impl PixelType {
    /// Bytes used to store one pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelType::Gray8 => 1,
            PixelType::Gray16 => 2,
            PixelType::Rgb32 => 4,
        }
    }

    /// Number of color components shown as separate gray channels.
    pub fn num_components(self) -> u32 {
        match self {
            PixelType::Rgb32 => 3,
            _ => 1,
        }
    }

    /// True for color pixel types.
    pub fn is_rgb(self) -> bool {
        self == PixelType::Rgb32
    }

    /// Native bit depth of one component.
    pub fn default_bit_depth(self) -> u32 {
        match self {
            PixelType::Gray16 => 16,
            _ => 8,
        }
    }

    /// Pixel type of a single displayed component.
    pub fn single_channel_type(self) -> PixelType {
        match self {
            PixelType::Rgb32 => PixelType::Gray8,
            other => other,
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PixelType::Gray8 => "GRAY8",
            PixelType::Gray16 => "GRAY16",
            PixelType::Rgb32 => "RGB32",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for PixelType {
    type Err = MmError;

    fn from_str(s: &str) -> MmResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GRAY8" => Ok(PixelType::Gray8),
            "GRAY16" => Ok(PixelType::Gray16),
            "RGB32" => Ok(PixelType::Rgb32),
            other => Err(MmError::UnsupportedPixelType(other.to_string())),
        }
    }
}

/// Memory-efficient pixel storage in the camera's native format.
///
/// - U8: 1 byte/pixel
/// - U16: 2 bytes/pixel, the common scientific camera format
/// - Rgb32: 4 bytes/pixel in B, G, R, A order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelBuffer {
    /// 8-bit grayscale pixels
    U8(Vec<u8>),
    /// 16-bit grayscale pixels
    U16(Vec<u16>),
    /// Packed BGRA pixels, four bytes each
    Rgb32(Vec<u8>),
}

impl PixelBuffer {
    /// A zero-filled buffer of the given type and size.
    pub fn blank(pixel_type: PixelType, width: u32, height: u32) -> Self {
        let pixels = width as usize * height as usize;
        match pixel_type {
            PixelType::Gray8 => PixelBuffer::U8(vec![0; pixels]),
            PixelType::Gray16 => PixelBuffer::U16(vec![0; pixels]),
            PixelType::Rgb32 => PixelBuffer::Rgb32(vec![0; pixels * 4]),
        }
    }

    /// Pixel type of this buffer.
    pub fn pixel_type(&self) -> PixelType {
        match self {
            PixelBuffer::U8(_) => PixelType::Gray8,
            PixelBuffer::U16(_) => PixelType::Gray16,
            PixelBuffer::Rgb32(_) => PixelType::Rgb32,
        }
    }

    /// Get the number of pixels
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(data) => data.len(),
            PixelBuffer::U16(data) => data.len(),
            PixelBuffer::Rgb32(data) => data.len() / 4,
        }
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get memory usage in bytes
    pub fn memory_bytes(&self) -> usize {
        match self {
            PixelBuffer::U8(data) => data.len(),
            PixelBuffer::U16(data) => data.len() * 2,
            PixelBuffer::Rgb32(data) => data.len(),
        }
    }

    /// Minimum and maximum intensity, `None` for an empty buffer.
    ///
    /// Color buffers report over all three color components, ignoring alpha.
    pub fn min_max(&self) -> Option<(u32, u32)> {
        fn fold(iter: impl Iterator<Item = u32>) -> Option<(u32, u32)> {
            iter.fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
        }

        match self {
            PixelBuffer::U8(data) => fold(data.iter().map(|&v| v as u32)),
            PixelBuffer::U16(data) => fold(data.iter().map(|&v| v as u32)),
            PixelBuffer::Rgb32(data) => fold(
                data.chunks_exact(4)
                    .flat_map(|px| px[..3].iter().map(|&v| v as u32)),
            ),
        }
    }

    /// Extract one color plane from a BGRA buffer.
    ///
    /// `component` 0 is red, 1 green and 2 blue. Returns `None` for gray
    /// buffers or an out-of-range component.
    pub fn single_channel_from_rgb32(&self, component: usize) -> Option<PixelBuffer> {
        let PixelBuffer::Rgb32(data) = self else {
            return None;
        };
        if component > 2 {
            return None;
        }
        // BGRA: red lives at byte 2, blue at byte 0
        let offset = 2 - component;
        Some(PixelBuffer::U8(
            data.chunks_exact(4).map(|px| px[offset]).collect(),
        ))
    }
}

/// An image payload plus its metadata tags.
///
/// Cloning a `TaggedImage` shares the pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedImage {
    /// Shared pixel payload
    pub pixels: Arc<PixelBuffer>,
    /// Metadata tags
    pub tags: ImageTags,
}

impl TaggedImage {
    /// Create a tagged image, taking ownership of the pixels.
    pub fn new(pixels: PixelBuffer, tags: ImageTags) -> Self {
        Self {
            pixels: Arc::new(pixels),
            tags,
        }
    }

    /// Create a tagged image from an already shared buffer.
    pub fn from_shared(pixels: Arc<PixelBuffer>, tags: ImageTags) -> Self {
        Self { pixels, tags }
    }

    /// Image key derived from the tags.
    pub fn key(&self) -> MmResult<ImageKey> {
        self.tags.key()
    }

    /// True when the pixel payload is color.
    pub fn is_rgb(&self) -> bool {
        self.pixels.pixel_type().is_rgb()
    }

    /// Check the pixel count against `Width`/`Height` tags when both exist.
    pub fn validate(&self) -> MmResult<()> {
        if let (Some(width), Some(height)) = (self.tags.width(), self.tags.height()) {
            let expected = width as usize * height as usize;
            let actual = self.pixels.len();
            if expected != actual {
                return Err(MmError::PixelSizeMismatch {
                    width,
                    height,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}
