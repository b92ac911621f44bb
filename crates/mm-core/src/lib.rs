//! `mm-core`
//!
//! Core types for multi-dimensional image acquisition.
//!
//! An acquisition produces images along four axes: channel, slice (Z),
//! frame (time) and stage position. This crate defines how such an image is
//! addressed, what travels with it, and how the dataset as a whole is
//! described. Storage and caching live in `mm-storage`.
//!
//! ## Key Types
//!
//! - [`ImageKey`]: the (channel, slice, frame, position) coordinate and its
//!   `"c_s_f_p"` label
//! - [`ImageTags`]: ordered per-image metadata
//! - [`PixelBuffer`] / [`TaggedImage`]: pixel payload plus tags
//! - [`SummaryMetadata`]: dataset-level description
//! - [`DisplayAndComments`]: persisted viewer state
//! - [`MmError`]: shared error type
//!
//! ## Example
//!
//! ```rust
//! use mm_core::{ImageKey, ImageTags, PixelBuffer, TaggedImage};
//!
//! let mut tags = ImageTags::new();
//! tags.set_key(ImageKey::new(1, 0, 3, 0));
//! let image = TaggedImage::new(PixelBuffer::U16(vec![0; 16]), tags);
//! assert_eq!(image.key().unwrap().label(), "1_0_3_0");
//! ```

pub mod display;
pub mod error;
pub mod image;
pub mod key;
pub mod metadata;
pub mod summary;

pub use display::{ChannelDisplaySettings, Comments, DisplayAndComments};
pub use error::{MmError, MmResult};
pub use image::{PixelBuffer, PixelType, TaggedImage};
pub use key::ImageKey;
pub use metadata::{tags, ImageTags};
pub use summary::SummaryMetadata;
