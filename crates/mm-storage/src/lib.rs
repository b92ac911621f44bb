//! `mm-storage`
//!
//! Image storage backends and the tagged-image cache.
//!
//! ## Key Types
//!
//! - [`TaggedImageStorage`]: trait implemented by every backend
//! - [`TaggedImageStorageRam`]: in-memory store
//! - [`TaggedImageStorageDisk`]: one TIFF per image plus JSON metadata
//! - [`ImageCache`]: RAM-mirrored cache with background preload, changing
//!   tag tracking and listener notification
//! - [`AcquisitionVirtualStack`]: flat-index view for hyperstack viewers
//!
//! ## Example
//!
//! ```rust
//! use mm_core::{ImageKey, ImageTags, PixelBuffer, TaggedImage};
//! use mm_storage::{ImageCache, TaggedImageStorageRam};
//! use std::sync::Arc;
//!
//! let cache = ImageCache::new(Arc::new(TaggedImageStorageRam::new(None)), false);
//! let mut tags = ImageTags::new();
//! tags.set_key(ImageKey::new(0, 0, 0, 0));
//! cache.put_image(TaggedImage::new(PixelBuffer::U8(vec![0; 4]), tags)).unwrap();
//! assert!(cache.get_image(0, 0, 0, 0).is_some());
//! ```

pub mod disk_storage;
pub mod image_cache;
pub mod listener;
pub mod ram_storage;
pub mod storage;
pub mod tiff_codec;
pub mod virtual_stack;

pub use disk_storage::TaggedImageStorageDisk;
pub use image_cache::{CacheOptions, ImageCache, TapSubscription};
pub use listener::{ImageCacheListener, ImageTap, ListenerId, ListenerRegistry};
pub use ram_storage::TaggedImageStorageRam;
pub use storage::TaggedImageStorage;
pub use tiff_codec::TiffCodec;
pub use virtual_stack::AcquisitionVirtualStack;
