//! Tagged-image cache in front of a backing store.
//!
//! `ImageCache` is the single entry point acquisition and viewing code use
//! for image data. Every image goes to the backing store; when RAM caching
//! is enabled it is also mirrored in a [`TaggedImageStorageRam`] so repeat
//! reads never touch the disk.
//!
//! # Preload
//!
//! With RAM caching on, a background thread named `mm-preload` walks the
//! keys already present in the backing store and copies each image into the
//! RAM mirror, sleeping `preload_delay` between images. It inserts with
//! put-if-absent so an image written by `put_image` meanwhile is never
//! replaced by an older read. The thread stops when the cache is closed or
//! dropped.
//!
//! # Changing keys
//!
//! The first image seen (stored or read back) becomes the reference. Every
//! later image adds to [`ImageCache::changing_keys`] each tag whose value is
//! set and either missing from the reference or different from it. The set
//! only grows.

use crate::listener::{ImageCacheListener, ImageTap, ListenerId, ListenerRegistry, DEFAULT_TAP_CAPACITY};
use crate::ram_storage::TaggedImageStorageRam;
use crate::storage::TaggedImageStorage;
use mm_core::{
    ChannelDisplaySettings, DisplayAndComments, ImageKey, ImageTags, MmResult, PixelType,
    SummaryMetadata, TaggedImage,
};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

/// Delay between two preloaded images.
pub const DEFAULT_PRELOAD_DELAY: Duration = Duration::from_millis(10);

/// Bit depth reported when the summary does not carry one.
pub const DEFAULT_BIT_DEPTH: u32 = 16;

const RGB_NAMES: [&str; 3] = ["Red", "Green", "Blue"];
const RGB_COLORS: [u32; 3] = [0xFF_0000, 0x00_FF00, 0x00_00FF];

/// Construction options for [`ImageCache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Mirror images in RAM and preload existing ones
    pub ram_cache: bool,
    /// Pause between preloaded images
    pub preload_delay: Duration,
    /// Channel capacity for taps created with [`ImageCache::add_tap`]
    pub tap_capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ram_cache: true,
            preload_delay: DEFAULT_PRELOAD_DELAY,
            tap_capacity: DEFAULT_TAP_CAPACITY,
        }
    }
}

/// Reference tags plus the names of tags seen to change.
#[derive(Debug, Default)]
struct TagTracker {
    first_tags: Option<ImageTags>,
    changing_keys: BTreeSet<String>,
}

impl TagTracker {
    fn observe(&mut self, tags: &ImageTags) {
        let Some(first) = &self.first_tags else {
            self.first_tags = Some(tags.clone());
            return;
        };

        for name in tags.names() {
            let Some(value) = tags.value_string(name) else {
                continue;
            };
            let changed = match first.value_string(name) {
                None => true,
                Some(reference) => reference != value,
            };
            if changed && !self.changing_keys.contains(name) {
                self.changing_keys.insert(name.clone());
            }
        }
    }
}

struct PreloadHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<usize>,
}

/// A listener registration that delivers images over a channel.
#[derive(Debug)]
pub struct TapSubscription {
    /// Registration handle, for [`ImageCache::remove_listener`]
    pub id: ListenerId,
    /// The tap itself, for its dropped-image count
    pub tap: Arc<ImageTap>,
    /// Receiving end of the tap's channel
    pub receiver: mpsc::Receiver<TaggedImage>,
}

/// Cache of tagged images over a swappable backing store.
pub struct ImageCache {
    storage: RwLock<Arc<dyn TaggedImageStorage>>,
    ram: Option<Arc<TaggedImageStorageRam>>,
    tracker: Arc<Mutex<TagTracker>>,
    last_frame: Mutex<Option<u32>>,
    last_tags: Mutex<Option<ImageTags>>,
    listeners: ListenerRegistry,
    options: CacheOptions,
    preload: Mutex<Option<PreloadHandle>>,
}

impl ImageCache {
    /// Cache over `storage`, optionally mirrored in RAM.
    pub fn new(storage: Arc<dyn TaggedImageStorage>, ram_cache: bool) -> Self {
        Self::with_options(
            storage,
            CacheOptions {
                ram_cache,
                ..CacheOptions::default()
            },
        )
    }

    /// Cache over `storage` with explicit options.
    pub fn with_options(storage: Arc<dyn TaggedImageStorage>, options: CacheOptions) -> Self {
        let ram = options
            .ram_cache
            .then(|| Arc::new(TaggedImageStorageRam::new(storage.summary_metadata())));

        let cache = Self {
            storage: RwLock::new(storage),
            ram,
            tracker: Arc::new(Mutex::new(TagTracker::default())),
            last_frame: Mutex::new(None),
            last_tags: Mutex::new(None),
            listeners: ListenerRegistry::new(),
            options,
            preload: Mutex::new(None),
        };
        cache.start_preload();
        cache
    }

    fn start_preload(&self) {
        let Some(ram) = self.ram.clone() else {
            return;
        };
        let storage = self.storage();
        let tracker = Arc::clone(&self.tracker);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let delay = self.options.preload_delay;

        let spawned = std::thread::Builder::new()
            .name("mm-preload".into())
            .spawn(move || preload(storage.as_ref(), &ram, &tracker, &thread_stop, delay));

        match spawned {
            Ok(thread) => *self.preload.lock() = Some(PreloadHandle { stop, thread }),
            Err(e) => tracing::error!(error = %e, "Failed to start preload thread"),
        }
    }

    /// Block until the preload thread has finished.
    ///
    /// Returns the number of images it copied into RAM; 0 when RAM caching
    /// is disabled or the preload already completed.
    pub fn wait_for_preload(&self) -> usize {
        let Some(handle) = self.preload.lock().take() else {
            return 0;
        };
        match handle.thread.join() {
            Ok(count) => count,
            Err(_) => {
                tracing::error!("Preload thread panicked");
                0
            }
        }
    }

    fn stop_preload(&self) {
        if let Some(handle) = self.preload.lock().take() {
            handle.stop.store(true, Ordering::Release);
            if handle.thread.join().is_err() {
                tracing::error!("Preload thread panicked");
            }
        }
    }

    /// The current backing store.
    pub fn storage(&self) -> Arc<dyn TaggedImageStorage> {
        Arc::clone(&self.storage.read())
    }

    /// True when images are mirrored in RAM.
    pub fn ram_cache_enabled(&self) -> bool {
        self.ram.is_some()
    }

    /// Store an image and notify listeners.
    ///
    /// An image whose tags do not yield a key is not stored anywhere; the
    /// failure is logged and returned.
    pub fn put_image(&self, image: TaggedImage) -> MmResult<ImageKey> {
        let key = match image.key() {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping image with malformed tags");
                return Err(e);
            }
        };

        if let Err(e) = self.storage().put_image(image.clone()) {
            tracing::warn!(label = %key, error = %e, "Backing store rejected image");
            return Err(e);
        }
        self.tracker.lock().observe(&image.tags);
        if let Some(ram) = &self.ram {
            ram.put_image(image.clone())?;
        }

        {
            let mut last_frame = self.last_frame.lock();
            *last_frame = (*last_frame).max(Some(key.frame));
        }
        *self.last_tags.lock() = Some(image.tags.clone());

        tracing::trace!(label = %key, "Image stored");
        self.listeners.notify_image(&image);
        Ok(key)
    }

    /// Fetch the image at the given coordinates.
    pub fn get_image(&self, channel: u32, slice: u32, frame: u32, position: u32) -> Option<TaggedImage> {
        self.get_image_by_key(ImageKey::new(channel, slice, frame, position))
    }

    /// Fetch an image, RAM mirror first.
    ///
    /// Read errors are logged and reported as a missing image.
    pub fn get_image_by_key(&self, key: ImageKey) -> Option<TaggedImage> {
        if let Some(ram) = &self.ram {
            match ram.get_image(key) {
                Ok(Some(image)) => return Some(image),
                Ok(None) => {}
                Err(e) => tracing::warn!(label = %key, error = %e, "RAM cache read failed"),
            }
        }

        match self.storage().get_image(key) {
            Ok(Some(image)) => {
                self.tracker.lock().observe(&image.tags);
                Some(image)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(label = %key, error = %e, "Failed to read image");
                None
            }
        }
    }

    /// Fetch only the tags at the given coordinates, RAM mirror first.
    pub fn get_image_tags(&self, channel: u32, slice: u32, frame: u32, position: u32) -> Option<ImageTags> {
        let key = ImageKey::new(channel, slice, frame, position);
        if let Some(tags) = self.ram.as_ref().and_then(|ram| ram.get_image_tags(key).ok().flatten()) {
            return Some(tags);
        }
        match self.storage().get_image_tags(key) {
            Ok(tags) => tags,
            Err(e) => {
                tracing::warn!(label = %key, error = %e, "Failed to read image tags");
                None
            }
        }
    }

    /// Tags of the most recently stored image.
    pub fn last_image_tags(&self) -> Option<ImageTags> {
        self.last_tags.lock().clone()
    }

    /// Names of tags whose value differs from the first image seen.
    pub fn changing_keys(&self) -> BTreeSet<String> {
        self.tracker.lock().changing_keys.clone()
    }

    /// Highest frame index stored so far. Never decreases.
    pub fn last_acquired_frame(&self) -> Option<u32> {
        let stored = self.storage().last_acquired_frame();
        let mut last_frame = self.last_frame.lock();
        *last_frame = (*last_frame).max(stored);
        *last_frame
    }

    /// Backing-store keys in acquisition order.
    pub fn image_keys(&self) -> Vec<ImageKey> {
        self.storage().image_keys()
    }

    /// Copy the dataset into `target` and make it the backing store.
    ///
    /// Returns the number of images copied.
    pub fn save_as(&self, target: Arc<dyn TaggedImageStorage>) -> usize {
        let copied = self.copy_into(target.as_ref());
        *self.storage.write() = target;
        copied
    }

    /// Copy the dataset into `target`, keeping the current backing store.
    pub fn save_copy(&self, target: &dyn TaggedImageStorage) -> usize {
        self.copy_into(target)
    }

    fn copy_into(&self, target: &dyn TaggedImageStorage) -> usize {
        let source = self.storage();
        if let Some(summary) = source.summary_metadata() {
            target.set_summary_metadata(summary);
        }

        let keys = source.image_keys();
        let mut copied = 0;
        for &key in &keys {
            let Some(image) = self.get_image_by_key(key) else {
                tracing::warn!(label = %key, "Image vanished during copy");
                continue;
            };
            match target.put_image(image) {
                Ok(_) => copied += 1,
                Err(e) => tracing::warn!(label = %key, error = %e, "Failed to copy image"),
            }
        }

        target.set_display_and_comments(source.display_and_comments());

        tracing::info!(
            copied,
            total = keys.len(),
            target = ?target.disk_location(),
            "Copied dataset"
        );
        copied
    }

    /// Finish the backing store and tell listeners where the data lives.
    pub fn finished(&self) -> MmResult<()> {
        let storage = self.storage();
        storage.finished()?;
        let location = storage.disk_location();
        self.listeners.notify_finished(location.as_deref());
        Ok(())
    }

    /// True once the backing store is finished.
    pub fn is_finished(&self) -> bool {
        self.storage().is_finished()
    }

    /// Stop preloading and close the backing store.
    pub fn close(&self) -> MmResult<()> {
        self.stop_preload();
        self.storage().close()
    }

    /// Directory of the backing store, if on disk.
    pub fn disk_location(&self) -> Option<PathBuf> {
        self.storage().disk_location()
    }

    /// Bytes of image data held by the backing store.
    pub fn data_set_size(&self) -> u64 {
        self.storage().data_set_size()
    }

    // ---- summary metadata ----

    /// Summary metadata, from the RAM mirror when enabled.
    pub fn summary_metadata(&self) -> Option<SummaryMetadata> {
        match &self.ram {
            Some(ram) => ram.summary_metadata(),
            None => self.storage().summary_metadata(),
        }
    }

    /// Replace the summary metadata in the backing store and RAM mirror.
    pub fn set_summary_metadata(&self, summary: SummaryMetadata) {
        if let Some(ram) = &self.ram {
            ram.set_summary_metadata(summary.clone());
        }
        self.storage().set_summary_metadata(summary);
    }

    /// Pixel type from the summary metadata.
    pub fn pixel_type(&self) -> Option<PixelType> {
        self.summary_metadata().map(|s| s.pixel_type)
    }

    fn is_rgb(&self) -> bool {
        self.pixel_type().is_some_and(PixelType::is_rgb)
    }

    /// Bit depth from the backing store's summary, 16 when unknown.
    pub fn bit_depth(&self) -> u32 {
        match self.storage().summary_metadata() {
            Some(summary) => summary.bit_depth,
            None => {
                tracing::debug!("No summary metadata, assuming bit depth {}", DEFAULT_BIT_DEPTH);
                DEFAULT_BIT_DEPTH
            }
        }
    }

    // ---- display settings and comments ----

    /// Display settings and comments of the backing store.
    pub fn display_and_comments(&self) -> DisplayAndComments {
        self.storage().display_and_comments()
    }

    /// Replace the display settings and comments of the backing store.
    pub fn set_display_and_comments(&self, settings: DisplayAndComments) {
        self.storage().set_display_and_comments(settings);
    }

    fn update_display(&self, mut update: impl FnMut(&mut DisplayAndComments)) {
        self.storage().update_display_and_comments(&mut update);
    }

    /// Set the dataset comment.
    pub fn set_comment(&self, text: &str) {
        self.update_display(|d| d.comments.summary = text.to_string());
    }

    /// Dataset comment, empty when unset.
    pub fn comment(&self) -> String {
        self.display_and_comments().comments.summary
    }

    /// Attach a comment to the image identified by `tags`.
    pub fn set_image_comment(&self, comment: &str, tags: &ImageTags) -> MmResult<()> {
        let label = tags.label()?;
        self.update_display(|d| {
            d.comments.images.insert(label.clone(), comment.to_string());
        });
        Ok(())
    }

    /// Comment of the image identified by `tags`, empty when absent.
    pub fn image_comment(&self, tags: &ImageTags) -> String {
        let Ok(label) = tags.label() else {
            return String::new();
        };
        self.display_and_comments()
            .comments
            .images
            .get(&label)
            .cloned()
            .unwrap_or_default()
    }

    /// Record contrast and gamma for a channel.
    pub fn store_channel_display_settings(
        &self,
        channel: usize,
        min: i64,
        max: i64,
        gamma: f64,
        histogram_max: i64,
    ) {
        self.update_display(|d| {
            let settings = d.channel_mut(channel);
            settings.min = Some(min);
            settings.max = Some(max);
            settings.gamma = gamma;
            settings.histogram_max = Some(histogram_max);
        });
    }

    /// Display settings of a channel, if recorded.
    pub fn channel_setting(&self, channel: usize) -> Option<ChannelDisplaySettings> {
        self.display_and_comments().channel(channel).cloned()
    }

    /// Channel name; fixed Red/Green/Blue for color datasets.
    pub fn channel_name(&self, channel: usize) -> String {
        if self.is_rgb() {
            return RGB_NAMES.get(channel).unwrap_or(&RGB_NAMES[2]).to_string();
        }
        self.channel_setting(channel)
            .map(|s| s.name)
            .unwrap_or_default()
    }

    /// Name a channel that has no name yet. Ignored for color datasets.
    pub fn set_channel_name(&self, channel: usize, name: &str) {
        if self.is_rgb() {
            return;
        }
        self.update_display(|d| {
            let settings = d.channel_mut(channel);
            if settings.name.is_empty() {
                settings.name = name.to_string();
            }
        });
    }

    /// Channel color as 0xRRGGBB; white when unknown.
    pub fn channel_color(&self, channel: usize) -> u32 {
        if self.is_rgb() {
            return *RGB_COLORS.get(channel).unwrap_or(&RGB_COLORS[2]);
        }
        self.channel_setting(channel)
            .map_or(mm_core::display::WHITE, |s| s.color)
    }

    /// Set the color of an existing channel.
    pub fn set_channel_color(&self, channel: usize, rgb: u32) {
        self.update_display(|d| {
            if let Some(settings) = d.channels.get_mut(channel) {
                settings.color = rgb;
            }
        });
    }

    /// Contrast minimum, 0 when unset.
    pub fn channel_min(&self, channel: usize) -> i64 {
        self.channel_setting(channel).and_then(|s| s.min).unwrap_or(0)
    }

    /// Contrast maximum, -1 when unset.
    pub fn channel_max(&self, channel: usize) -> i64 {
        self.channel_setting(channel).and_then(|s| s.max).unwrap_or(-1)
    }

    /// Display gamma, 1.0 when unset.
    pub fn channel_gamma(&self, channel: usize) -> f64 {
        self.channel_setting(channel).map_or(1.0, |s| s.gamma)
    }

    /// Histogram range, -1 when unset.
    pub fn channel_histogram_max(&self, channel: usize) -> i64 {
        self.channel_setting(channel)
            .and_then(|s| s.histogram_max)
            .unwrap_or(-1)
    }

    /// Number of channels with display settings, at least 1.
    pub fn num_channels(&self) -> usize {
        self.display_and_comments().channels.len().max(1)
    }

    // ---- listeners ----

    /// Register a listener for stored images and dataset completion.
    pub fn add_listener(&self, listener: Arc<dyn ImageCacheListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.count()
    }

    /// Register a tap delivering every `nth_image`th stored image.
    pub fn add_tap(&self, nth_image: usize) -> TapSubscription {
        let (tap, receiver) = ImageTap::new(nth_image, self.options.tap_capacity);
        let id = self.listeners.register(tap.clone());
        TapSubscription { id, tap, receiver }
    }
}

fn preload(
    storage: &dyn TaggedImageStorage,
    ram: &TaggedImageStorageRam,
    tracker: &Mutex<TagTracker>,
    stop: &AtomicBool,
    delay: Duration,
) -> usize {
    let keys = storage.image_keys();
    tracing::debug!(images = keys.len(), "Preloading images into RAM");

    let mut loaded = 0;
    for key in keys {
        if stop.load(Ordering::Acquire) {
            tracing::debug!(loaded, "Preload stopped");
            return loaded;
        }
        match storage.get_image(key) {
            Ok(Some(image)) => {
                tracker.lock().observe(&image.tags);
                match ram.put_image_if_absent(image) {
                    Ok(true) => loaded += 1,
                    Ok(false) => {}
                    Err(e) => tracing::warn!(label = %key, error = %e, "Preload insert failed"),
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(label = %key, error = %e, "Preload read failed"),
        }
        std::thread::sleep(delay);
    }

    tracing::debug!(loaded, "Preload complete");
    loaded
}

impl Drop for ImageCache {
    fn drop(&mut self) {
        if let Some(handle) = self.preload.get_mut().as_ref() {
            handle.stop.store(true, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("ram_cache", &self.ram.is_some())
            .field("disk_location", &self.disk_location())
            .field("listeners", &self.listeners.count())
            .finish()
    }
}
