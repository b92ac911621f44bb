//! Four-dimensional image coordinates and their string labels.

use crate::error::{MmError, MmResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Position of one image inside a multi-dimensional acquisition.
///
/// Every store holds at most one image per key. The string form
/// `"{channel}_{slice}_{frame}_{position}"` is the label used in metadata
/// files and comments.
///
/// Keys sort in acquisition order: position, then frame, then slice, then
/// channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImageKey {
    /// Channel index
    pub channel: u32,
    /// Z slice index
    pub slice: u32,
    /// Time point index
    pub frame: u32,
    /// Stage position index
    pub position: u32,
}

impl ImageKey {
    /// Create a key from its four coordinates.
    pub const fn new(channel: u32, slice: u32, frame: u32, position: u32) -> Self {
        Self {
            channel,
            slice,
            frame,
            position,
        }
    }

    /// The unique string label for this key.
    pub fn label(&self) -> String {
        self.to_string()
    }

    /// Parse a label produced by [`ImageKey::label`].
    pub fn from_label(label: &str) -> MmResult<Self> {
        label.parse()
    }

    fn order_tuple(&self) -> (u32, u32, u32, u32) {
        (self.position, self.frame, self.slice, self.channel)
    }
}

impl Ord for ImageKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_tuple().cmp(&other.order_tuple())
    }
}

impl PartialOrd for ImageKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.channel, self.slice, self.frame, self.position
        )
    }
}

impl FromStr for ImageKey {
    type Err = MmError;

    fn from_str(label: &str) -> MmResult<Self> {
        let mut parts = label.split('_');
        let mut next = || -> MmResult<u32> {
            parts
                .next()
                .filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|p| p.parse::<u32>().ok())
                .ok_or_else(|| MmError::InvalidLabel(label.to_string()))
        };

        let key = ImageKey::new(next()?, next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(MmError::InvalidLabel(label.to_string()));
        }
        Ok(key)
    }
}

impl Serialize for ImageKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ImageKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_format() {
        let key = ImageKey::new(0, 2, 5, 1);
        assert_eq!(key.label(), "0_2_5_1");
        assert_eq!(ImageKey::from_label("0_2_5_1").unwrap(), key);
        assert_eq!(ImageKey::from_label("00_2_05_1").unwrap(), key);
    }

    #[test]
    fn test_invalid_labels() {
        for bad in [
            "",
            "1_2_3",
            "1_2_3_4_5",
            "a_2_3_4",
            "-1_0_0_0",
            "1__2_3",
            "+1_0_0_0",
            "0_0_+2_0",
            " 1_0_0_0",
            "0_0_0_99999999999",
        ] {
            assert!(
                matches!(ImageKey::from_label(bad), Err(MmError::InvalidLabel(_))),
                "label {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_acquisition_ordering() {
        let mut keys = vec![
            ImageKey::new(1, 0, 0, 0),
            ImageKey::new(0, 0, 1, 0),
            ImageKey::new(0, 1, 0, 0),
            ImageKey::new(0, 0, 0, 1),
            ImageKey::new(0, 0, 0, 0),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                ImageKey::new(0, 0, 0, 0),
                ImageKey::new(1, 0, 0, 0),
                ImageKey::new(0, 1, 0, 0),
                ImageKey::new(0, 0, 1, 0),
                ImageKey::new(0, 0, 0, 1),
            ]
        );
    }

    #[test]
    fn test_serde_as_label() {
        let key = ImageKey::new(3, 1, 4, 0);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"3_1_4_0\"");
        let back: ImageKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
