//! # mm_acquire
//!
//! Multi-dimensional microscope acquisition on top of a tagged-image cache.
//!
//! Images are stored as pixels plus a JSON tag map and addressed by their
//! (channel, slice, frame, position) coordinates. The storage layer lives in
//! the workspace crates and is re-exported here:
//!
//! - [`mm_core`]: image keys, tags, pixel buffers, summary and display metadata
//! - [`mm_storage`]: RAM and disk stores, the [`ImageCache`] and virtual stacks
//!
//! This crate adds the acquisition side:
//!
//! - **`acquisition`**: sequence settings and the async acquisition engine
//! - **`config`**: layered configuration (defaults, TOML file, environment)
//! - **`hardware`**: the [`hardware::ImageSource`] trait and a mock camera
//! - **`tracing_setup`**: structured logging initialization

pub mod acquisition;
pub mod config;
pub mod hardware;
pub mod tracing_setup;

pub use mm_core::{
    tags, ImageKey, ImageTags, MmError, MmResult, PixelBuffer, PixelType, SummaryMetadata,
    TaggedImage,
};
pub use mm_storage::{
    AcquisitionVirtualStack, CacheOptions, ImageCache, ImageCacheListener, TaggedImageStorage,
    TaggedImageStorageDisk, TaggedImageStorageRam,
};
