//! Multi-dimensional acquisition settings.
//!
//! A [`SequenceSettings`] describes which time points, Z slices, channels
//! and stage positions to acquire and in which nesting order. Everything the
//! engine needs (the ordered event list, Z positions, frame timing and the
//! dataset summary) is derived from it here.

use chrono::Utc;
use mm_core::{display::WHITE, ImageKey, MmError, MmResult, PixelType, SummaryMetadata};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use uuid::Uuid;

/// One channel of an acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Channel (configuration) name
    pub name: String,
    /// Camera exposure for this channel
    #[serde(default = "default_exposure_ms")]
    pub exposure_ms: f64,
    /// Display color, packed 0xRRGGBB
    #[serde(default = "default_color")]
    pub color: u32,
    /// Whether the channel is acquired
    #[serde(default = "default_true")]
    pub use_channel: bool,
}

impl ChannelSpec {
    /// An enabled white channel.
    pub fn new(name: impl Into<String>, exposure_ms: f64) -> Self {
        Self {
            name: name.into(),
            exposure_ms,
            color: WHITE,
            use_channel: true,
        }
    }

    /// Set the display color.
    pub fn with_color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }
}

/// A labeled XY stage position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePosition {
    /// Position label, e.g. "Pos0"
    pub label: String,
    /// Stage X in micrometers
    #[serde(default)]
    pub x_um: f64,
    /// Stage Y in micrometers
    #[serde(default)]
    pub y_um: f64,
}

/// Ordered list of stage positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionList(Vec<StagePosition>);

impl PositionList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a position.
    pub fn push(&mut self, label: impl Into<String>, x_um: f64, y_um: f64) {
        self.0.push(StagePosition {
            label: label.into(),
            x_um,
            y_um,
        });
    }

    /// Position at `index`.
    pub fn get(&self, index: usize) -> Option<&StagePosition> {
        self.0.get(index)
    }

    /// Number of positions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no positions are defined.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over positions in order.
    pub fn iter(&self) -> impl Iterator<Item = &StagePosition> {
        self.0.iter()
    }
}

/// Nesting order of the four acquisition loops, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum AcqOrderMode {
    /// time, position, slice, channel
    #[default]
    TimePosSliceChannel,
    /// time, position, channel, slice
    TimePosChannelSlice,
    /// position, time, slice, channel
    PosTimeSliceChannel,
    /// position, time, channel, slice
    PosTimeChannelSlice,
}

impl AcqOrderMode {
    /// True when every time point is collected at one position before
    /// moving to the next.
    pub fn time_first(self) -> bool {
        matches!(
            self,
            AcqOrderMode::PosTimeSliceChannel | AcqOrderMode::PosTimeChannelSlice
        )
    }

    /// True when a whole Z stack is collected before switching channel.
    pub fn slices_first(self) -> bool {
        matches!(
            self,
            AcqOrderMode::TimePosChannelSlice | AcqOrderMode::PosTimeChannelSlice
        )
    }
}

/// Full description of one acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceSettings {
    /// Acquire a time series
    pub use_frames: bool,
    /// Number of time points
    pub num_frames: u32,
    /// Interval between time points
    pub interval_ms: f64,
    /// Per-frame intervals; overrides `num_frames` and `interval_ms`
    pub custom_intervals_ms: Vec<f64>,

    /// Acquire a Z stack
    pub use_slices: bool,
    /// First Z position
    pub z_bottom_um: f64,
    /// Last Z position
    pub z_top_um: f64,
    /// Distance between slices; the sign is ignored
    pub z_step_um: f64,

    /// Acquire the channels in `channels`
    pub use_channels: bool,
    /// Channel definitions
    pub channels: Vec<ChannelSpec>,
    /// Exposure used when no channel is acquired
    pub default_exposure_ms: f64,

    /// Visit every position in `positions`
    pub use_positions: bool,
    /// Stage positions
    pub positions: PositionList,

    /// Loop nesting
    pub order: AcqOrderMode,

    /// Write the dataset to disk
    pub save: bool,
    /// Dataset root directory
    pub root: std::path::PathBuf,
    /// Dataset name
    pub prefix: String,
    /// Acquisition comment
    pub comment: String,
}

impl Default for SequenceSettings {
    fn default() -> Self {
        Self {
            use_frames: false,
            num_frames: 1,
            interval_ms: 0.0,
            custom_intervals_ms: Vec::new(),
            use_slices: false,
            z_bottom_um: 0.0,
            z_top_um: 0.0,
            z_step_um: 1.0,
            use_channels: false,
            channels: Vec::new(),
            default_exposure_ms: default_exposure_ms(),
            use_positions: false,
            positions: PositionList::new(),
            order: AcqOrderMode::default(),
            save: false,
            root: std::path::PathBuf::from("data"),
            prefix: "acq".to_string(),
            comment: String::new(),
        }
    }
}

fn default_exposure_ms() -> f64 {
    10.0
}

fn default_color() -> u32 {
    WHITE
}

fn default_true() -> bool {
    true
}

impl SequenceSettings {
    /// Number of time points; 1 when time lapse is off.
    pub fn num_frames(&self) -> u32 {
        if !self.use_frames {
            return 1;
        }
        if !self.custom_intervals_ms.is_empty() {
            return self.custom_intervals_ms.len() as u32;
        }
        self.num_frames.max(1)
    }

    /// Number of Z slices: `1 + |top - bottom| / step`.
    ///
    /// # Errors
    ///
    /// A zero step with slices enabled is a configuration error.
    pub fn num_slices(&self) -> MmResult<u32> {
        if !self.use_slices {
            return Ok(1);
        }
        let step = self.z_step_um.abs();
        if step == 0.0 || !step.is_finite() {
            return Err(MmError::Configuration("zero Z step size".to_string()));
        }
        Ok(1 + ((self.z_top_um - self.z_bottom_um).abs() / step) as u32)
    }

    /// Channels that will be acquired.
    ///
    /// With channels off, or none enabled, this is a single "Default"
    /// channel at `default_exposure_ms`.
    pub fn active_channels(&self) -> Vec<ChannelSpec> {
        let used: Vec<ChannelSpec> = if self.use_channels {
            self.channels
                .iter()
                .filter(|c| c.use_channel)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        if used.is_empty() {
            vec![ChannelSpec::new("Default", self.default_exposure_ms)]
        } else {
            used
        }
    }

    /// Number of acquired channels, at least 1.
    pub fn num_channels(&self) -> u32 {
        self.active_channels().len() as u32
    }

    /// Number of stage positions, at least 1.
    pub fn num_positions(&self) -> u32 {
        if !self.use_positions {
            return 1;
        }
        self.positions.len().max(1) as u32
    }

    /// Stage position visited for position index `index`.
    pub fn position(&self, index: u32) -> Option<&StagePosition> {
        if !self.use_positions {
            return None;
        }
        self.positions.get(index as usize)
    }

    /// Total number of images.
    pub fn total_images(&self) -> MmResult<u64> {
        Ok(self.num_frames() as u64
            * self.num_slices()? as u64
            * self.num_channels() as u64
            * self.num_positions() as u64)
    }

    /// Total pixel data in bytes.
    pub fn total_bytes(&self, width: u32, height: u32, bytes_per_pixel: usize) -> MmResult<u64> {
        Ok(width as u64 * height as u64 * bytes_per_pixel as u64 * self.total_images()?)
    }

    /// Z positions from bottom toward top, one per slice.
    ///
    /// `[0.0]` when Z stacks are off.
    pub fn slice_positions(&self) -> MmResult<Vec<f64>> {
        if !self.use_slices {
            return Ok(vec![0.0]);
        }
        let count = self.num_slices()?;
        let mut step = self.z_step_um.abs();
        if self.z_bottom_um > self.z_top_um {
            step = -step;
        }
        Ok((0..count)
            .map(|i| self.z_bottom_um + i as f64 * step)
            .collect())
    }

    /// Offset of time point `frame` from the start of its time series.
    pub fn frame_offset_ms(&self, frame: u32) -> f64 {
        if !self.use_frames {
            return 0.0;
        }
        if self.custom_intervals_ms.is_empty() {
            return frame as f64 * self.interval_ms;
        }
        self.custom_intervals_ms
            .iter()
            .take(frame as usize)
            .sum()
    }

    /// Expected duration of the time series.
    pub fn duration_ms(&self) -> f64 {
        if !self.use_frames {
            return 0.0;
        }
        if self.custom_intervals_ms.is_empty() {
            self.interval_ms * self.num_frames() as f64
        } else {
            self.custom_intervals_ms.iter().sum()
        }
    }

    /// See [`AcqOrderMode::time_first`].
    pub fn time_first(&self) -> bool {
        self.order.time_first()
    }

    /// See [`AcqOrderMode::slices_first`].
    pub fn slices_first(&self) -> bool {
        self.order.slices_first()
    }

    /// Every image key in acquisition order.
    pub fn events(&self) -> MmResult<Vec<ImageKey>> {
        let frames = self.num_frames();
        let slices = self.num_slices()?;
        let channels = self.num_channels();
        let positions = self.num_positions();

        let capacity = frames as usize * slices as usize * channels as usize * positions as usize;
        let mut events = Vec::with_capacity(capacity);

        let inner = |frame: u32, position: u32, events: &mut Vec<ImageKey>| {
            if self.slices_first() {
                for channel in 0..channels {
                    for slice in 0..slices {
                        events.push(ImageKey::new(channel, slice, frame, position));
                    }
                }
            } else {
                for slice in 0..slices {
                    for channel in 0..channels {
                        events.push(ImageKey::new(channel, slice, frame, position));
                    }
                }
            }
        };

        if self.time_first() {
            for position in 0..positions {
                for frame in 0..frames {
                    inner(frame, position, &mut events);
                }
            }
        } else {
            for frame in 0..frames {
                for position in 0..positions {
                    inner(frame, position, &mut events);
                }
            }
        }

        Ok(events)
    }

    /// Human-readable summary of the acquisition.
    pub fn verbose_summary(&self, width: u32, height: u32, bytes_per_pixel: usize) -> MmResult<String> {
        let total_images = self.total_images()?;
        let total_mb = self.total_bytes(width, height, bytes_per_pixel)? / 1_048_576;

        let total_sec = self.duration_ms() / 1000.0;
        let hours = (total_sec / 3600.0) as u64;
        let mut remain = total_sec - hours as f64 * 3600.0;
        let minutes = (remain / 60.0) as u64;
        remain -= minutes as f64 * 60.0;

        let memory = if total_mb <= 1024 {
            format!("{} MB", total_mb)
        } else {
            format!("{} GB", display_number(total_mb as f64 / 1024.0))
        };

        let mut text = String::new();
        // Writing to a String cannot fail
        let _ = write!(
            text,
            "Number of time points: {}\n\
             Number of positions: {}\n\
             Number of slices: {}\n\
             Number of channels: {}\n\
             Total images: {}\n\
             Total memory: {}\n\
             Duration: {}h {}m {}s",
            self.num_frames(),
            self.num_positions(),
            self.num_slices()?,
            self.num_channels(),
            total_images,
            memory,
            hours,
            minutes,
            display_number(remain)
        );

        if let Some(order) = self.order_description() {
            let _ = write!(text, "\nOrder: {}", order);
        }
        Ok(text)
    }

    fn order_description(&self) -> Option<String> {
        let frames = self.use_frames;
        let positions = self.use_positions;
        let channels = self.use_channels;
        let slices = self.use_slices;
        if !(frames || positions || channels || slices) {
            return None;
        }

        let mut parts: Vec<&str> = Vec::new();
        match (frames, positions) {
            (true, true) if self.time_first() => parts.extend(["Position", "Time"]),
            (true, true) => parts.extend(["Time", "Position"]),
            (true, false) => parts.push("Time"),
            (false, true) => parts.push("Position"),
            (false, false) => {}
        }
        match (channels, slices) {
            (true, true) if self.slices_first() => parts.extend(["Channel", "Slice"]),
            (true, true) => parts.extend(["Slice", "Channel"]),
            (true, false) => parts.push("Channel"),
            (false, true) => parts.push("Slice"),
            (false, false) => {}
        }
        Some(parts.join(", "))
    }

    /// Summary metadata for a dataset acquired with these settings.
    pub fn summary_metadata(
        &self,
        width: u32,
        height: u32,
        pixel_type: PixelType,
        bit_depth: u32,
    ) -> MmResult<SummaryMetadata> {
        let channels = self.active_channels();
        let mut summary = SummaryMetadata::new(self.prefix.clone(), width, height, pixel_type)
            .with_dimensions(
                channels.len() as u32,
                self.num_slices()?,
                self.num_frames(),
                self.num_positions(),
            );
        summary.bit_depth = bit_depth;
        summary.ch_names = channels.iter().map(|c| c.name.clone()).collect();
        summary.ch_colors = channels.iter().map(|c| c.color).collect();
        summary.comment = self.comment.clone();
        summary.z_step_um = if self.use_slices { self.z_step_um.abs() } else { 0.0 };
        summary.interval_ms = if self.use_frames { self.interval_ms } else { 0.0 };
        summary.guid = Some(Uuid::new_v4());
        summary.time = Some(Utc::now());
        if self.use_positions && !self.positions.is_empty() {
            let labels: Vec<serde_json::Value> = self
                .positions
                .iter()
                .map(|p| p.label.clone().into())
                .collect();
            summary
                .extra
                .insert("PositionLabels".to_string(), labels.into());
        }
        Ok(summary)
    }
}

/// Up to two decimals, trailing zeros removed.
fn display_number(value: f64) -> String {
    let text = format!("{:.2}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() || text == "-" {
        "0".to_string()
    } else {
        text.to_string()
    }
}
