//! Flat-index view of one stage position for hyperstack viewers.
//!
//! Viewers address planes by a single 1-based index over
//! (channel, slice, frame) with channel varying fastest. Color images occupy
//! three consecutive gray planes, one per component.

use crate::image_cache::ImageCache;
use mm_core::{tags, ImageKey, ImageTags, MmResult, PixelBuffer, PixelType, SummaryMetadata, TaggedImage};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps 1-based stack indices to images in an [`ImageCache`].
#[derive(Debug)]
pub struct AcquisitionVirtualStack {
    cache: Arc<ImageCache>,
    width: u32,
    height: u32,
    pixel_type: PixelType,
    components: u32,
    gray_channels: u32,
    slices: u32,
    frames: u32,
    position: u32,
    planes: HashMap<usize, ImageKey>,
}

impl AcquisitionVirtualStack {
    /// Build a stack shaped by `summary`, showing position 0.
    pub fn new(cache: Arc<ImageCache>, summary: &SummaryMetadata) -> Self {
        Self {
            cache,
            width: summary.width,
            height: summary.height,
            pixel_type: summary.pixel_type,
            components: summary.num_components(),
            gray_channels: summary.num_gray_channels(),
            slices: summary.num_slices(),
            frames: summary.num_frames(),
            position: 0,
            planes: HashMap::new(),
        }
    }

    /// Number of planes.
    pub fn size(&self) -> usize {
        self.gray_channels as usize * self.slices as usize * self.frames as usize
    }

    /// Plane width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Plane height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel type of one displayed plane.
    pub fn plane_type(&self) -> PixelType {
        self.pixel_type.single_channel_type()
    }

    /// Position whose images are shown.
    pub fn position_index(&self) -> u32 {
        self.position
    }

    /// Show another stage position.
    pub fn set_position_index(&mut self, position: u32) {
        self.position = position;
    }

    /// 1-based index of a 0-based (gray channel, slice, frame).
    ///
    /// Each coordinate is clamped to its dimension.
    pub fn stack_index(&self, channel: u32, slice: u32, frame: u32) -> usize {
        let c = channel.min(self.gray_channels - 1) as usize;
        let z = slice.min(self.slices - 1) as usize;
        let t = frame.min(self.frames - 1) as usize;
        let nc = self.gray_channels as usize;
        let nz = self.slices as usize;
        t * nc * nz + z * nc + c + 1
    }

    fn flat_index(&self, tags: &ImageTags) -> MmResult<usize> {
        let key = tags.key()?;
        Ok(self.stack_index(key.channel * self.components, key.slice, key.frame))
    }

    fn map(&mut self, flat: usize, key: ImageKey) {
        self.planes.insert(flat, key);
        if self.components > 1 {
            for offset in 1..self.components as usize {
                self.planes.insert(flat + offset, key);
            }
        }
    }

    /// Store `image` in the cache and map its planes.
    ///
    /// Returns the flat index of its first plane.
    pub fn insert_image(&mut self, image: TaggedImage) -> MmResult<usize> {
        let flat = self.flat_index(&image.tags)?;
        let key = self.cache.put_image(image)?;
        self.map(flat, key);
        Ok(flat)
    }

    /// Map the planes of an image that is already in the cache.
    pub fn remember_image(&mut self, tags: &ImageTags) -> MmResult<usize> {
        let flat = self.flat_index(tags)?;
        self.map(flat, tags.key()?);
        Ok(flat)
    }

    fn key_at(&self, flat: usize) -> Option<ImageKey> {
        self.planes.get(&flat).map(|key| ImageKey {
            position: self.position,
            ..*key
        })
    }

    /// Image behind plane `flat` at the current position.
    pub fn get_tagged_image(&self, flat: usize) -> Option<TaggedImage> {
        self.cache.get_image_by_key(self.key_at(flat)?)
    }

    /// Pixels of plane `flat`.
    ///
    /// Unmapped planes are blank. Color images yield component
    /// `(flat - 1) % 3` as 8-bit gray.
    pub fn get_pixels(&self, flat: usize) -> Arc<PixelBuffer> {
        let Some(image) = self.get_tagged_image(flat) else {
            return Arc::new(PixelBuffer::blank(self.plane_type(), self.width, self.height));
        };

        if !image.is_rgb() {
            return image.pixels;
        }
        let component = flat.saturating_sub(1) % 3;
        match image.pixels.single_channel_from_rgb32(component) {
            Some(plane) => Arc::new(plane),
            None => Arc::new(PixelBuffer::blank(self.plane_type(), self.width, self.height)),
        }
    }

    /// `"<channel>, <z> um(z), <elapsed> s"` for plane `flat`, empty when
    /// unmapped or when any of the three tags is missing.
    pub fn slice_label(&self, flat: usize) -> String {
        let Some(image) = self.get_tagged_image(flat) else {
            return String::new();
        };
        let tags = &image.tags;
        match (
            tags.channel_name(),
            tags.value_string(tags::Z_POSITION_UM),
            tags.value_string(tags::ELAPSED_TIME_MS),
        ) {
            (Some(channel), Some(z), Some(elapsed)) => {
                format!("{}, {} um(z), {} s", channel, z, elapsed)
            }
            _ => String::new(),
        }
    }
}
