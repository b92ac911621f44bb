//! Acquisition-level ("summary") metadata.
//!
//! One `SummaryMetadata` describes a whole dataset: image geometry, pixel
//! format, the size of each dimension, and per-channel names, colors and
//! contrast. Serialized field names follow the on-disk metadata format.

use crate::image::PixelType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Metadata format version written to new datasets.
pub const METADATA_VERSION: u32 = 4;

/// Source string written to new datasets.
pub const METADATA_SOURCE: &str = "mm_acquire";

/// Dataset-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetadata {
    /// Dataset name (directory prefix)
    #[serde(rename = "Prefix", default)]
    pub prefix: String,
    /// Image width in pixels
    #[serde(rename = "Width")]
    pub width: u32,
    /// Image height in pixels
    #[serde(rename = "Height")]
    pub height: u32,
    /// Pixel layout of every image
    #[serde(rename = "PixelType")]
    pub pixel_type: PixelType,
    /// Significant bits per component
    #[serde(rename = "BitDepth", default = "default_bit_depth")]
    pub bit_depth: u32,
    /// Number of channels
    #[serde(rename = "Channels", default = "default_dimension")]
    pub channels: u32,
    /// Number of Z slices
    #[serde(rename = "Slices", default = "default_dimension")]
    pub slices: u32,
    /// Number of time points
    #[serde(rename = "Frames", default = "default_dimension")]
    pub frames: u32,
    /// Number of stage positions
    #[serde(rename = "Positions", default = "default_dimension")]
    pub positions: u32,
    /// Channel names
    #[serde(rename = "ChNames", default)]
    pub ch_names: Vec<String>,
    /// Channel display colors as packed 0xRRGGBB
    #[serde(rename = "ChColors", default)]
    pub ch_colors: Vec<u32>,
    /// Channel contrast minimum
    #[serde(rename = "ChContrastMin", default)]
    pub ch_contrast_min: Vec<i64>,
    /// Channel contrast maximum
    #[serde(rename = "ChContrastMax", default)]
    pub ch_contrast_max: Vec<i64>,
    /// Free-form acquisition comment
    #[serde(rename = "Comment", default)]
    pub comment: String,
    /// Pixel size calibration
    #[serde(rename = "PixelSize_um", default)]
    pub pixel_size_um: f64,
    /// Z step between slices
    #[serde(rename = "z-step_um", default)]
    pub z_step_um: f64,
    /// Interval between time points
    #[serde(rename = "Interval_ms", default)]
    pub interval_ms: f64,
    /// Dataset identifier
    #[serde(rename = "GUID", default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<Uuid>,
    /// Acquisition start time
    #[serde(rename = "Time", default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    /// Position this dataset is restricted to, if any
    #[serde(rename = "PositionIndex", default, skip_serializing_if = "Option::is_none")]
    pub position_index: Option<u32>,
    /// Metadata format version
    #[serde(rename = "MetadataVersion", default = "default_version")]
    pub metadata_version: u32,
    /// Writer identification
    #[serde(rename = "Source", default = "default_source")]
    pub source: String,
    /// Keys not covered above, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_bit_depth() -> u32 {
    16
}

fn default_dimension() -> u32 {
    1
}

fn default_version() -> u32 {
    METADATA_VERSION
}

fn default_source() -> String {
    METADATA_SOURCE.to_string()
}

impl SummaryMetadata {
    /// Summary for a single-image dataset of the given geometry.
    pub fn new(prefix: impl Into<String>, width: u32, height: u32, pixel_type: PixelType) -> Self {
        Self {
            prefix: prefix.into(),
            width,
            height,
            pixel_type,
            bit_depth: pixel_type.default_bit_depth(),
            channels: 1,
            slices: 1,
            frames: 1,
            positions: 1,
            ch_names: Vec::new(),
            ch_colors: Vec::new(),
            ch_contrast_min: Vec::new(),
            ch_contrast_max: Vec::new(),
            comment: String::new(),
            pixel_size_um: 0.0,
            z_step_um: 0.0,
            interval_ms: 0.0,
            guid: Some(Uuid::new_v4()),
            time: Some(Utc::now()),
            position_index: None,
            metadata_version: METADATA_VERSION,
            source: default_source(),
            extra: Map::new(),
        }
    }

    /// Set the size of each dimension.
    pub fn with_dimensions(mut self, channels: u32, slices: u32, frames: u32, positions: u32) -> Self {
        self.channels = channels;
        self.slices = slices;
        self.frames = frames;
        self.positions = positions;
        self
    }

    /// Channel count, at least 1.
    pub fn num_channels(&self) -> u32 {
        self.channels.max(1)
    }

    /// Slice count, at least 1.
    pub fn num_slices(&self) -> u32 {
        self.slices.max(1)
    }

    /// Frame count, at least 1.
    pub fn num_frames(&self) -> u32 {
        self.frames.max(1)
    }

    /// Position count, at least 1.
    pub fn num_positions(&self) -> u32 {
        self.positions.max(1)
    }

    /// Color components per pixel (3 for RGB, else 1).
    pub fn num_components(&self) -> u32 {
        self.pixel_type.num_components()
    }

    /// True for color datasets.
    pub fn is_rgb(&self) -> bool {
        self.pixel_type.is_rgb()
    }

    /// Channels as displayed: each color component counts separately.
    pub fn num_gray_channels(&self) -> u32 {
        self.num_channels() * self.num_components()
    }

    /// Number of images the full acquisition holds.
    pub fn total_images(&self) -> u64 {
        self.num_channels() as u64
            * self.num_slices() as u64
            * self.num_frames() as u64
            * self.num_positions() as u64
    }
}
