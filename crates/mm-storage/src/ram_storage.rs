//! In-memory image store.
//!
//! Used on its own for acquisitions that are never saved, and as the RAM
//! mirror inside [`ImageCache`](crate::ImageCache).

use crate::storage::TaggedImageStorage;
use mm_core::{DisplayAndComments, ImageKey, MmResult, SummaryMetadata, TaggedImage};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct RamInner {
    images: HashMap<ImageKey, TaggedImage>,
    summary: Option<SummaryMetadata>,
    display: DisplayAndComments,
    last_frame: Option<u32>,
    bytes: u64,
}

impl RamInner {
    fn insert(&mut self, key: ImageKey, image: TaggedImage) {
        let added = image.pixels.memory_bytes() as u64;
        if let Some(old) = self.images.insert(key, image) {
            self.bytes -= old.pixels.memory_bytes() as u64;
        }
        self.bytes += added;
        self.last_frame = self.last_frame.max(Some(key.frame));
    }
}

/// Stores every tagged image in a hash map.
#[derive(Default)]
pub struct TaggedImageStorageRam {
    inner: RwLock<RamInner>,
    finished: AtomicBool,
}

impl TaggedImageStorageRam {
    /// Create an empty store carrying `summary`.
    pub fn new(summary: Option<SummaryMetadata>) -> Self {
        Self {
            inner: RwLock::new(RamInner {
                summary,
                ..RamInner::default()
            }),
            finished: AtomicBool::new(false),
        }
    }

    /// Store `image` only if its key is still empty.
    ///
    /// Returns `true` when the image was inserted. The check and insert
    /// happen under one lock so a concurrent `put_image` is never
    /// overwritten by older data.
    pub fn put_image_if_absent(&self, image: TaggedImage) -> MmResult<bool> {
        let key = image.key()?;
        let mut inner = self.inner.write();
        if inner.images.contains_key(&key) {
            return Ok(false);
        }
        inner.insert(key, image);
        Ok(true)
    }

    /// Number of images held.
    pub fn len(&self) -> usize {
        self.inner.read().images.len()
    }

    /// True when no images are held.
    pub fn is_empty(&self) -> bool {
        self.inner.read().images.is_empty()
    }

    /// Dataset comment.
    pub fn comment(&self) -> String {
        self.inner.read().display.comments.summary.clone()
    }

    /// Set the dataset comment.
    pub fn set_comment(&self, text: impl Into<String>) {
        self.inner.write().display.comments.summary = text.into();
    }
}

impl std::fmt::Debug for TaggedImageStorageRam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("TaggedImageStorageRam")
            .field("images", &inner.images.len())
            .field("bytes", &inner.bytes)
            .field("last_frame", &inner.last_frame)
            .field("finished", &self.finished.load(Ordering::Relaxed))
            .finish()
    }
}

impl TaggedImageStorage for TaggedImageStorageRam {
    fn put_image(&self, image: TaggedImage) -> MmResult<ImageKey> {
        let key = image.key()?;
        self.inner.write().insert(key, image);
        Ok(key)
    }

    fn get_image(&self, key: ImageKey) -> MmResult<Option<TaggedImage>> {
        Ok(self.inner.read().images.get(&key).cloned())
    }

    fn contains(&self, key: ImageKey) -> bool {
        self.inner.read().images.contains_key(&key)
    }

    fn image_keys(&self) -> Vec<ImageKey> {
        let mut keys: Vec<ImageKey> = self.inner.read().images.keys().copied().collect();
        keys.sort();
        keys
    }

    fn summary_metadata(&self) -> Option<SummaryMetadata> {
        self.inner.read().summary.clone()
    }

    fn set_summary_metadata(&self, summary: SummaryMetadata) {
        self.inner.write().summary = Some(summary);
    }

    fn display_and_comments(&self) -> DisplayAndComments {
        self.inner.read().display.clone()
    }

    fn update_display_and_comments(&self, update: &mut dyn FnMut(&mut DisplayAndComments)) {
        update(&mut self.inner.write().display);
    }

    fn finished(&self) -> MmResult<()> {
        self.finished.store(true, Ordering::Release);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn close(&self) -> MmResult<()> {
        Ok(())
    }

    fn last_acquired_frame(&self) -> Option<u32> {
        self.inner.read().last_frame
    }

    fn disk_location(&self) -> Option<PathBuf> {
        None
    }

    fn data_set_size(&self) -> u64 {
        self.inner.read().bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mm_core::{ImageTags, PixelBuffer};

    fn image(key: ImageKey, value: u16) -> TaggedImage {
        let mut tags = ImageTags::new();
        tags.set_key(key);
        TaggedImage::new(PixelBuffer::U16(vec![value; 4]), tags)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = TaggedImageStorageRam::new(None);
        let key = ImageKey::new(1, 2, 3, 0);
        let img = image(key, 7);

        assert_eq!(store.put_image(img.clone()).unwrap(), key);
        let back = store.get_image(key).unwrap().unwrap();
        assert_eq!(back, img);
        assert!(std::sync::Arc::ptr_eq(&back.pixels, &img.pixels));
        assert!(store.get_image(ImageKey::new(0, 0, 0, 0)).unwrap().is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let store = TaggedImageStorageRam::new(None);
        let key = ImageKey::new(0, 0, 0, 0);
        store.put_image(image(key, 1)).unwrap();
        store.put_image(image(key, 2)).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.data_set_size(), 8);
        let back = store.get_image(key).unwrap().unwrap();
        assert_eq!(*back.pixels, PixelBuffer::U16(vec![2; 4]));
    }

    #[test]
    fn test_put_if_absent_keeps_existing() {
        let store = TaggedImageStorageRam::new(None);
        let key = ImageKey::new(0, 0, 1, 0);
        assert!(store.put_image_if_absent(image(key, 1)).unwrap());
        assert!(!store.put_image_if_absent(image(key, 9)).unwrap());
        let back = store.get_image(key).unwrap().unwrap();
        assert_eq!(*back.pixels, PixelBuffer::U16(vec![1; 4]));
    }

    #[test]
    fn test_keys_sorted_and_last_frame() {
        let store = TaggedImageStorageRam::new(None);
        assert_eq!(store.last_acquired_frame(), None);
        for key in [
            ImageKey::new(0, 0, 4, 0),
            ImageKey::new(1, 0, 0, 0),
            ImageKey::new(0, 0, 2, 0),
        ] {
            store.put_image(image(key, 0)).unwrap();
        }
        assert_eq!(store.last_acquired_frame(), Some(4));
        assert_eq!(
            store.image_keys(),
            vec![
                ImageKey::new(1, 0, 0, 0),
                ImageKey::new(0, 0, 2, 0),
                ImageKey::new(0, 0, 4, 0),
            ]
        );
    }

    #[test]
    fn test_rejects_malformed_tags() {
        let store = TaggedImageStorageRam::new(None);
        let img = TaggedImage::new(PixelBuffer::U8(vec![0]), ImageTags::new());
        assert!(store.put_image(img).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_comment_and_finished() {
        let store = TaggedImageStorageRam::new(None);
        store.set_comment("hello");
        assert_eq!(store.comment(), "hello");
        assert!(!store.is_finished());
        store.finished().unwrap();
        assert!(store.is_finished());
        assert!(store.disk_location().is_none());
    }
}
