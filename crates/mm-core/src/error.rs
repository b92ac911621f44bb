//! Custom error types for the image cache.
//!
//! `MmError` is the primary error type shared by the core data model, the
//! storage backends and the image cache. It is built with `thiserror` so the
//! underlying I/O and serialization errors convert with `?`.
//!
//! ## Error Categories
//!
//! - **Metadata errors** (`MalformedTags`, `InvalidLabel`, `UnsupportedPixelType`):
//!   an image or label does not carry the information needed to place it in
//!   the 4D index. These are permanent for the offending image; callers log
//!   them and skip the image.
//! - **Payload errors** (`PixelSizeMismatch`, `Codec`): the pixel buffer does
//!   not agree with its tags or could not be encoded/decoded.
//! - **Storage errors** (`StorageFinished`, `Io`, `Json`): the backing store
//!   rejected the operation.
//! - **Setup errors** (`Configuration`, `Acquisition`): invalid settings or a
//!   failed acquisition step.

use thiserror::Error;

/// Convenience alias for results using the image cache error type.
pub type MmResult<T> = std::result::Result<T, MmError>;

/// Primary error type for image storage and caching.
#[derive(Error, Debug)]
pub enum MmError {
    /// Image tags are missing or carry invalid coordinate information.
    ///
    /// Raised when `ChannelIndex`, `SliceIndex` or `FrameIndex` is absent,
    /// negative or not an integer.
    #[error("Malformed image tags: {0}")]
    MalformedTags(String),

    /// A string label could not be parsed back into an image key.
    #[error("Invalid image label '{0}'")]
    InvalidLabel(String),

    /// Pixel type string not understood.
    #[error("Unsupported pixel type: {0}")]
    UnsupportedPixelType(String),

    /// The pixel buffer length disagrees with the image dimensions.
    #[error(
        "Pixel buffer size mismatch: expected {expected} pixels for {width}x{height}, got {actual}"
    )]
    PixelSizeMismatch {
        /// Image width from tags
        width: u32,
        /// Image height from tags
        height: u32,
        /// Expected number of pixels
        expected: usize,
        /// Actual number of pixels in the buffer
        actual: usize,
    },

    /// Image encoding or decoding failed.
    #[error("Image codec error: {0}")]
    Codec(String),

    /// The store has been marked finished and accepts no more images.
    #[error("Storage '{0}' is finished; no further images accepted")]
    StorageFinished(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization of metadata failed.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration values parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// An acquisition step failed.
    #[error("Acquisition error: {0}")]
    Acquisition(String),
}

impl MmError {
    /// Returns true when the error concerns a single image's metadata rather
    /// than the store as a whole.
    pub fn is_per_image(&self) -> bool {
        matches!(
            self,
            MmError::MalformedTags(_)
                | MmError::InvalidLabel(_)
                | MmError::PixelSizeMismatch { .. }
                | MmError::UnsupportedPixelType(_)
        )
    }
}
