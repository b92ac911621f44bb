//! Device capability traits.
//!
//! The acquisition engine only needs one capability from a camera: take a
//! single exposure and hand back the pixels. Devices implement
//! [`ImageSource`] with `#[async_trait]`; the engine drives them through
//! `Arc<dyn ImageSource>`.
//!
//! # Example
//!
//! ```rust,ignore
//! struct MyCamera;
//!
//! #[async_trait]
//! impl ImageSource for MyCamera {
//!     async fn snap(&self, exposure_ms: f64) -> Result<PixelBuffer> { ... }
//!     fn width(&self) -> u32 { 512 }
//!     fn height(&self) -> u32 { 512 }
//!     fn pixel_type(&self) -> PixelType { PixelType::Gray16 }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use mm_core::{PixelBuffer, PixelType};

/// A camera that can take single exposures.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Expose for `exposure_ms` and read out one image.
    ///
    /// The returned buffer holds `width() * height()` pixels of
    /// `pixel_type()`.
    async fn snap(&self, exposure_ms: f64) -> Result<PixelBuffer>;

    /// Image width in pixels
    fn width(&self) -> u32;

    /// Image height in pixels
    fn height(&self) -> u32;

    /// Pixel layout of every image
    fn pixel_type(&self) -> PixelType;

    /// Significant bits per component
    fn bit_depth(&self) -> u32 {
        self.pixel_type().default_bit_depth()
    }

    /// Device label written into image tags
    fn name(&self) -> &str {
        "Camera"
    }
}
