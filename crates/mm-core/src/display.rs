//! Display settings and comments stored with a dataset.
//!
//! These are plain data: the renderer that consumes them is not part of this
//! workspace.

use crate::summary::SummaryMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Packed 0xRRGGBB white.
pub const WHITE: u32 = 0x00FF_FFFF;

/// Per-channel display state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDisplaySettings {
    /// Channel name
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Display color, packed 0xRRGGBB
    #[serde(rename = "Color", default = "default_color")]
    pub color: u32,
    /// Contrast minimum
    #[serde(rename = "Min", default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    /// Contrast maximum
    #[serde(rename = "Max", default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    /// Display gamma
    #[serde(rename = "Gamma", default = "default_gamma")]
    pub gamma: f64,
    /// Upper bound of the histogram axis
    #[serde(rename = "HistogramMax", default, skip_serializing_if = "Option::is_none")]
    pub histogram_max: Option<i64>,
}

fn default_color() -> u32 {
    WHITE
}

fn default_gamma() -> f64 {
    1.0
}

impl ChannelDisplaySettings {
    /// A white channel with the given name and no contrast set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for ChannelDisplaySettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            color: WHITE,
            min: None,
            max: None,
            gamma: 1.0,
            histogram_max: None,
        }
    }
}

/// Dataset and per-image comments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comments {
    /// Dataset-wide comment
    #[serde(rename = "Summary", default)]
    pub summary: String,
    /// Comments keyed by image label
    #[serde(flatten)]
    pub images: BTreeMap<String, String>,
}

/// Everything a viewer persists alongside the images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayAndComments {
    /// One entry per channel
    #[serde(rename = "Channels", default)]
    pub channels: Vec<ChannelDisplaySettings>,
    /// Dataset and image comments
    #[serde(rename = "Comments", default)]
    pub comments: Comments,
}

impl DisplayAndComments {
    /// Initial display settings derived from summary metadata.
    ///
    /// One channel per `ChNames` entry, taking color and contrast from the
    /// parallel arrays. Missing colors fall back to white and missing
    /// contrast to the full range of the bit depth. With no channel names a
    /// single white "Default" channel is produced.
    pub fn from_summary(summary: &SummaryMetadata) -> Self {
        let full_range = (1i64 << summary.bit_depth.min(32)) - 1;

        let mut channels: Vec<ChannelDisplaySettings> = summary
            .ch_names
            .iter()
            .enumerate()
            .map(|(i, name)| ChannelDisplaySettings {
                name: name.clone(),
                color: summary.ch_colors.get(i).copied().unwrap_or(WHITE),
                min: Some(summary.ch_contrast_min.get(i).copied().unwrap_or(0)),
                max: Some(summary.ch_contrast_max.get(i).copied().unwrap_or(full_range)),
                gamma: 1.0,
                histogram_max: None,
            })
            .collect();

        if channels.is_empty() {
            channels.push(ChannelDisplaySettings::named("Default"));
        }

        Self {
            channels,
            comments: Comments {
                summary: summary.comment.clone(),
                images: BTreeMap::new(),
            },
        }
    }

    /// Settings for `channel`, if present.
    pub fn channel(&self, channel: usize) -> Option<&ChannelDisplaySettings> {
        self.channels.get(channel)
    }

    /// Mutable settings for `channel`, growing the list with defaults.
    pub fn channel_mut(&mut self, channel: usize) -> &mut ChannelDisplaySettings {
        if self.channels.len() <= channel {
            self.channels
                .resize_with(channel + 1, ChannelDisplaySettings::default);
        }
        &mut self.channels[channel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PixelType;

    #[test]
    fn test_from_summary_with_channels() {
        let mut summary = SummaryMetadata::new("run", 8, 8, PixelType::Gray16);
        summary.ch_names = vec!["DAPI".into(), "FITC".into()];
        summary.ch_colors = vec![0x0000FF];
        summary.ch_contrast_min = vec![10, 20];
        summary.ch_contrast_max = vec![1000];
        summary.comment = "first run".into();

        let display = DisplayAndComments::from_summary(&summary);
        assert_eq!(display.channels.len(), 2);
        assert_eq!(display.channels[0].color, 0x0000FF);
        assert_eq!(display.channels[1].color, WHITE);
        assert_eq!(display.channels[1].min, Some(20));
        assert_eq!(display.channels[1].max, Some(65535));
        assert_eq!(display.comments.summary, "first run");
    }

    #[test]
    fn test_from_summary_default_channel() {
        let summary = SummaryMetadata::new("run", 8, 8, PixelType::Gray8);
        let display = DisplayAndComments::from_summary(&summary);
        assert_eq!(display.channels.len(), 1);
        assert_eq!(display.channels[0].name, "Default");
        assert_eq!(display.channels[0].gamma, 1.0);
    }

    #[test]
    fn test_comments_json_shape() {
        let mut display = DisplayAndComments::default();
        display.comments.summary = "overall".into();
        display
            .comments
            .images
            .insert("0_0_1_0".into(), "bubble".into());
        let value = serde_json::to_value(&display).unwrap();
        assert_eq!(value["Comments"]["Summary"], "overall");
        assert_eq!(value["Comments"]["0_0_1_0"], "bubble");

        let back: DisplayAndComments = serde_json::from_value(value).unwrap();
        assert_eq!(back, display);
    }

    #[test]
    fn test_channel_mut_grows() {
        let mut display = DisplayAndComments::default();
        display.channel_mut(2).name = "Cy5".into();
        assert_eq!(display.channels.len(), 3);
        assert_eq!(display.channel(2).unwrap().name, "Cy5");
        assert_eq!(display.channel(0).unwrap().color, WHITE);
    }
}
