//! The storage abstraction shared by every image backend.

use mm_core::{DisplayAndComments, ImageKey, ImageTags, MmResult, SummaryMetadata, TaggedImage};
use std::path::PathBuf;

/// A keyed collection of tagged images plus dataset-level metadata.
///
/// Implementations use interior mutability so a store can be shared as
/// `Arc<dyn TaggedImageStorage>` between the cache, its preload thread and
/// readers. Each [`ImageKey`] maps to at most one image; a second
/// `put_image` for the same key replaces the first.
pub trait TaggedImageStorage: Send + Sync {
    /// Store an image under the key derived from its tags.
    fn put_image(&self, image: TaggedImage) -> MmResult<ImageKey>;

    /// Fetch an image. A missing key is `Ok(None)`, not an error.
    fn get_image(&self, key: ImageKey) -> MmResult<Option<TaggedImage>>;

    /// Fetch only the tags of an image.
    fn get_image_tags(&self, key: ImageKey) -> MmResult<Option<ImageTags>> {
        Ok(self.get_image(key)?.map(|image| image.tags))
    }

    /// All stored keys in acquisition order.
    fn image_keys(&self) -> Vec<ImageKey>;

    /// True when an image is stored under `key`.
    fn contains(&self, key: ImageKey) -> bool {
        self.image_keys().contains(&key)
    }

    /// Dataset-level metadata, if set.
    fn summary_metadata(&self) -> Option<SummaryMetadata>;

    /// Replace the dataset-level metadata.
    fn set_summary_metadata(&self, summary: SummaryMetadata);

    /// Snapshot of the persisted display settings and comments.
    fn display_and_comments(&self) -> DisplayAndComments;

    /// Edit the display settings and comments in place.
    fn update_display_and_comments(&self, update: &mut dyn FnMut(&mut DisplayAndComments));

    /// Replace the display settings and comments.
    fn set_display_and_comments(&self, settings: DisplayAndComments) {
        let mut settings = Some(settings);
        self.update_display_and_comments(&mut |current| {
            if let Some(next) = settings.take() {
                *current = next;
            }
        });
    }

    /// Mark the dataset complete. Backends flush their metadata here.
    fn finished(&self) -> MmResult<()>;

    /// True once [`finished`](Self::finished) has run.
    fn is_finished(&self) -> bool;

    /// Release resources. The store must not be used afterwards.
    fn close(&self) -> MmResult<()>;

    /// Highest frame index stored, `None` when empty.
    fn last_acquired_frame(&self) -> Option<u32>;

    /// Directory holding the dataset, `None` for memory-only stores.
    fn disk_location(&self) -> Option<PathBuf>;

    /// Bytes of image data held by the store.
    fn data_set_size(&self) -> u64;
}
