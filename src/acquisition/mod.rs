//! Multi-dimensional acquisition.
//!
//! - [`settings`]: what to acquire and in which order
//! - [`engine`]: runs the settings against a camera into an image cache

pub mod engine;
pub mod settings;

pub use engine::{AcquisitionEngine, AcquisitionReport, EngineState};
pub use settings::{AcqOrderMode, ChannelSpec, PositionList, SequenceSettings, StagePosition};
