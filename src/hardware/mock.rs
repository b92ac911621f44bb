//! Mock Hardware Implementations
//!
//! Simulated devices for running acquisitions without physical hardware.
//! Timing uses `tokio::time::sleep`, never `std::thread::sleep`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mm_core::{PixelBuffer, PixelType};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{sleep, Duration};

use crate::hardware::capabilities::ImageSource;

/// Mock camera producing a deterministic test pattern
///
/// Pixel `i` of snap number `n` (starting at 1) has intensity `i + n`,
/// wrapped to the pixel type's range. Color images put that value in blue,
/// twice it in green and three times it in red.
///
/// # Example
///
/// ```rust,ignore
/// let camera = MockCamera::new(64, 64, PixelType::Gray16);
/// let pixels = camera.snap(10.0).await?; // takes ~10 ms
/// ```
#[derive(Debug)]
pub struct MockCamera {
    width: u32,
    height: u32,
    pixel_type: PixelType,
    simulate_exposure: bool,
    snap_count: AtomicU64,
}

impl MockCamera {
    /// Create a mock camera that sleeps for each exposure
    pub fn new(width: u32, height: u32, pixel_type: PixelType) -> Self {
        Self {
            width,
            height,
            pixel_type,
            simulate_exposure: true,
            snap_count: AtomicU64::new(0),
        }
    }

    /// Return images immediately instead of sleeping for the exposure
    pub fn without_exposure_delay(mut self) -> Self {
        self.simulate_exposure = false;
        self
    }

    /// Number of images taken so far
    pub fn snap_count(&self) -> u64 {
        self.snap_count.load(Ordering::SeqCst)
    }

    /// Test pattern for snap number `n`
    pub fn pattern(&self, n: u64) -> PixelBuffer {
        let pixels = self.width as u64 * self.height as u64;
        match self.pixel_type {
            PixelType::Gray8 => PixelBuffer::U8((0..pixels).map(|i| ((i + n) % 256) as u8).collect()),
            PixelType::Gray16 => {
                PixelBuffer::U16((0..pixels).map(|i| ((i + n) % 65536) as u16).collect())
            }
            PixelType::Rgb32 => PixelBuffer::Rgb32(
                (0..pixels)
                    .flat_map(|i| {
                        let v = i + n;
                        [(v % 256) as u8, ((2 * v) % 256) as u8, ((3 * v) % 256) as u8, 255]
                    })
                    .collect(),
            ),
        }
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new(512, 512, PixelType::Gray16)
    }
}

#[async_trait]
impl ImageSource for MockCamera {
    async fn snap(&self, exposure_ms: f64) -> Result<PixelBuffer> {
        if !exposure_ms.is_finite() || exposure_ms < 0.0 {
            return Err(anyhow!("MockCamera: invalid exposure {} ms", exposure_ms));
        }

        if self.simulate_exposure {
            sleep(Duration::from_secs_f64(exposure_ms / 1000.0)).await;
        }

        let n = self.snap_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(snap = n, exposure_ms, "MockCamera: snapped");
        Ok(self.pattern(n))
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    fn name(&self) -> &str {
        "MockCamera"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snap_pattern_and_count() {
        let camera = MockCamera::new(4, 2, PixelType::Gray16).without_exposure_delay();
        let first = camera.snap(5.0).await.unwrap();
        let second = camera.snap(5.0).await.unwrap();

        assert_eq!(first, PixelBuffer::U16(vec![1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(second, PixelBuffer::U16(vec![2, 3, 4, 5, 6, 7, 8, 9]));
        assert_eq!(camera.snap_count(), 2);
    }

    #[tokio::test]
    async fn test_rgb_pattern() {
        let camera = MockCamera::new(1, 1, PixelType::Rgb32).without_exposure_delay();
        let pixels = camera.snap(1.0).await.unwrap();
        assert_eq!(pixels, PixelBuffer::Rgb32(vec![1, 2, 3, 255]));
        assert_eq!(camera.bit_depth(), 8);
    }

    #[tokio::test]
    async fn test_invalid_exposure() {
        let camera = MockCamera::default().without_exposure_delay();
        assert!(camera.snap(-1.0).await.is_err());
        assert_eq!(camera.snap_count(), 0);
    }

    #[tokio::test]
    async fn test_exposure_takes_time() {
        let camera = MockCamera::new(2, 2, PixelType::Gray8);
        let start = std::time::Instant::now();
        camera.snap(20.0).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
