//! Per-image metadata tags.
//!
//! Tags are an ordered key→value map carried alongside every image. A small
//! set of well-known names place the image in the acquisition (see
//! [`tags`]); everything else is free-form device and system state recorded
//! at snap time.

use crate::error::{MmError, MmResult};
use crate::image::PixelType;
use crate::key::ImageKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known tag names.
pub mod tags {
    /// Channel index within the acquisition
    pub const CHANNEL_INDEX: &str = "ChannelIndex";
    /// Z slice index
    pub const SLICE_INDEX: &str = "SliceIndex";
    /// Time point index
    pub const FRAME_INDEX: &str = "FrameIndex";
    /// Stage position index
    pub const POSITION_INDEX: &str = "PositionIndex";
    /// Channel name
    pub const CHANNEL: &str = "Channel";
    /// Image width in pixels
    pub const WIDTH: &str = "Width";
    /// Image height in pixels
    pub const HEIGHT: &str = "Height";
    /// Pixel type string (GRAY8, GRAY16, RGB32)
    pub const PIXEL_TYPE: &str = "PixelType";
    /// Focus position in micrometers
    pub const Z_POSITION_UM: &str = "ZPositionUm";
    /// Milliseconds since acquisition start
    pub const ELAPSED_TIME_MS: &str = "ElapsedTime-ms";
    /// Wall-clock timestamp
    pub const TIME: &str = "Time";
    /// Unique image identifier
    pub const UUID: &str = "UUID";
    /// Camera exposure in milliseconds
    pub const EXPOSURE_MS: &str = "Exposure-ms";
    /// Camera device label
    pub const CAMERA: &str = "Camera";
    /// Stage position label
    pub const POSITION_NAME: &str = "PositionName";
    /// Stage X in micrometers
    pub const X_POSITION_UM: &str = "XPositionUm";
    /// Stage Y in micrometers
    pub const Y_POSITION_UM: &str = "YPositionUm";
}

/// Ordered metadata map attached to an image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageTags(Map<String, Value>);

impl ImageTags {
    /// Create an empty tag map.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap an existing JSON object.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Unwrap into the underlying JSON object.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// Insert or replace a tag, returning `self` for chaining.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a tag.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Raw tag value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// True when the tag exists (even if null).
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// True when the tag is absent or explicitly null.
    pub fn is_null(&self, name: &str) -> bool {
        matches!(self.0.get(name), None | Some(Value::Null))
    }

    /// Iterate tags in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Tag names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no tags are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Comparable string form of a tag value.
    ///
    /// Strings yield their content, other values their JSON text. Absent and
    /// null tags yield `None`.
    pub fn value_string(&self, name: &str) -> Option<String> {
        match self.0.get(name)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Read a non-negative integer index tag.
    ///
    /// Accepts integral JSON numbers and strings that parse as `u32`.
    pub fn index(&self, name: &str) -> MmResult<u32> {
        let value = self
            .0
            .get(name)
            .ok_or_else(|| MmError::MalformedTags(format!("missing tag '{name}'")))?;

        let parsed = match value {
            Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            Value::String(s) => s.trim().parse::<u32>().ok(),
            _ => None,
        };

        parsed.ok_or_else(|| {
            MmError::MalformedTags(format!("tag '{name}' is not a valid index: {value}"))
        })
    }

    /// Channel index tag.
    pub fn channel_index(&self) -> MmResult<u32> {
        self.index(tags::CHANNEL_INDEX)
    }

    /// Slice index tag.
    pub fn slice_index(&self) -> MmResult<u32> {
        self.index(tags::SLICE_INDEX)
    }

    /// Frame index tag.
    pub fn frame_index(&self) -> MmResult<u32> {
        self.index(tags::FRAME_INDEX)
    }

    /// Position index tag, 0 when absent.
    pub fn position_index(&self) -> MmResult<u32> {
        if self.is_null(tags::POSITION_INDEX) {
            return Ok(0);
        }
        self.index(tags::POSITION_INDEX)
    }

    /// Derive the image key from the index tags.
    pub fn key(&self) -> MmResult<ImageKey> {
        Ok(ImageKey::new(
            self.channel_index()?,
            self.slice_index()?,
            self.frame_index()?,
            self.position_index()?,
        ))
    }

    /// Label of the image key.
    pub fn label(&self) -> MmResult<String> {
        self.key().map(|k| k.label())
    }

    /// Write the four index tags from `key`.
    pub fn set_key(&mut self, key: ImageKey) {
        self.insert(tags::CHANNEL_INDEX, key.channel);
        self.insert(tags::SLICE_INDEX, key.slice);
        self.insert(tags::FRAME_INDEX, key.frame);
        self.insert(tags::POSITION_INDEX, key.position);
    }

    /// Width tag, if present.
    pub fn width(&self) -> Option<u32> {
        self.index(tags::WIDTH).ok()
    }

    /// Height tag, if present.
    pub fn height(&self) -> Option<u32> {
        self.index(tags::HEIGHT).ok()
    }

    /// Pixel type tag.
    pub fn pixel_type(&self) -> MmResult<PixelType> {
        let raw = self
            .value_string(tags::PIXEL_TYPE)
            .ok_or_else(|| MmError::MalformedTags(format!("missing tag '{}'", tags::PIXEL_TYPE)))?;
        raw.parse()
    }

    /// Channel name tag.
    pub fn channel_name(&self) -> Option<String> {
        self.value_string(tags::CHANNEL)
    }
}

impl From<Map<String, Value>> for ImageTags {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_from_numeric_and_string_tags() {
        let tags = ImageTags::new()
            .with(tags::CHANNEL_INDEX, 1)
            .with(tags::SLICE_INDEX, "2")
            .with(tags::FRAME_INDEX, 3)
            .with(tags::POSITION_INDEX, 4);
        assert_eq!(tags.key().unwrap(), ImageKey::new(1, 2, 3, 4));
        assert_eq!(tags.label().unwrap(), "1_2_3_4");
    }

    #[test]
    fn test_position_defaults_to_zero() {
        let tags = ImageTags::new()
            .with(tags::CHANNEL_INDEX, 0)
            .with(tags::SLICE_INDEX, 0)
            .with(tags::FRAME_INDEX, 7);
        assert_eq!(tags.key().unwrap(), ImageKey::new(0, 0, 7, 0));
    }

    #[test]
    fn test_malformed_indices() {
        let missing = ImageTags::new().with(tags::CHANNEL_INDEX, 0);
        assert!(matches!(missing.key(), Err(MmError::MalformedTags(_))));

        let negative = ImageTags::new()
            .with(tags::CHANNEL_INDEX, -1)
            .with(tags::SLICE_INDEX, 0)
            .with(tags::FRAME_INDEX, 0);
        assert!(matches!(negative.key(), Err(MmError::MalformedTags(_))));

        let fractional = ImageTags::new()
            .with(tags::CHANNEL_INDEX, 0)
            .with(tags::SLICE_INDEX, 0.5)
            .with(tags::FRAME_INDEX, 0);
        assert!(fractional.key().is_err());
    }

    #[test]
    fn test_value_string() {
        let tags = ImageTags::new()
            .with("Camera", "Andor")
            .with("Exposure-ms", 10.5)
            .with("Binning", json!(null));
        assert_eq!(tags.value_string("Camera").as_deref(), Some("Andor"));
        assert_eq!(tags.value_string("Exposure-ms").as_deref(), Some("10.5"));
        assert_eq!(tags.value_string("Binning"), None);
        assert_eq!(tags.value_string("Missing"), None);
        assert!(tags.is_null("Binning"));
    }

    #[test]
    fn test_insertion_order_preserved() {
        let tags = ImageTags::new().with("z", 1).with("a", 2).with("m", 3);
        let names: Vec<&str> = tags.names().map(String::as_str).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }
}
