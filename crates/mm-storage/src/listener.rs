//! Cache event listeners.
//!
//! Listeners are called synchronously from `ImageCache::put_image` and
//! `ImageCache::finished`. [`ImageTap`] bridges into async consumers: it
//! forwards every Nth image over a bounded tokio channel and drops images
//! instead of blocking when the consumer falls behind. A tap whose receiver
//! was dropped reports itself closed and is removed from the registry after
//! the next notification.

use mm_core::TaggedImage;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default channel capacity for taps (number of images buffered).
pub const DEFAULT_TAP_CAPACITY: usize = 16;

/// Receives cache events.
pub trait ImageCacheListener: Send + Sync {
    /// An image was stored in the cache.
    fn image_received(&self, image: &TaggedImage);

    /// The dataset was finished. `location` is its directory, if on disk.
    fn imaging_finished(&self, location: Option<&Path>);

    /// True once the listener will never accept another event.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Handle returned by [`ListenerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Ordered set of listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<BTreeMap<ListenerId, Arc<dyn ImageCacheListener>>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Listeners are notified in registration order.
    pub fn register(&self, listener: Arc<dyn ImageCacheListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().insert(id, listener);
        id
    }

    /// Remove a listener. Returns `false` if `id` was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        self.listeners.write().remove(&id).is_some()
    }

    /// Number of registered listeners.
    pub fn count(&self) -> usize {
        self.listeners.read().len()
    }

    // Snapshot so a listener may (un)register from inside its callback.
    fn snapshot(&self) -> Vec<(ListenerId, Arc<dyn ImageCacheListener>)> {
        self.listeners
            .read()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect()
    }

    /// Notify every listener of a stored image.
    ///
    /// Listeners that report themselves closed afterwards are unregistered.
    pub fn notify_image(&self, image: &TaggedImage) {
        let mut closed = Vec::new();
        for (id, listener) in self.snapshot() {
            listener.image_received(image);
            if listener.is_closed() {
                closed.push(id);
            }
        }
        if !closed.is_empty() {
            let mut listeners = self.listeners.write();
            for id in &closed {
                listeners.remove(id);
            }
            tracing::debug!(removed = closed.len(), "Removed closed listeners");
        }
    }

    /// Notify every listener that the dataset is finished.
    pub fn notify_finished(&self, location: Option<&Path>) {
        for (_, listener) in self.snapshot() {
            listener.imaging_finished(location);
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("count", &self.count())
            .finish()
    }
}

/// Listener that forwards every Nth image into a bounded channel.
#[derive(Debug)]
pub struct ImageTap {
    /// Deliver every nth image (1 = every image)
    nth_image: u64,
    image_count: AtomicU64,
    sender: mpsc::Sender<TaggedImage>,
    dropped_images: AtomicU64,
    closed: AtomicBool,
}

impl ImageTap {
    /// Create a tap and the receiving end of its channel.
    pub fn new(nth_image: usize, capacity: usize) -> (Arc<Self>, mpsc::Receiver<TaggedImage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let tap = Arc::new(Self {
            nth_image: nth_image.max(1) as u64,
            image_count: AtomicU64::new(0),
            sender,
            dropped_images: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        (tap, receiver)
    }

    /// Number of images dropped because the channel was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_images.load(Ordering::Relaxed)
    }

    fn should_deliver(&self) -> bool {
        let count = self.image_count.fetch_add(1, Ordering::Relaxed);
        count % self.nth_image == 0
    }
}

impl ImageCacheListener for ImageTap {
    fn image_received(&self, image: &TaggedImage) {
        if !self.should_deliver() {
            return;
        }
        // Pixels are shared, so this clone only copies the tags
        match self.sender.try_send(image.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_images.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(dropped, "Image tap full, dropping image");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                if !self.closed.swap(true, Ordering::Relaxed) {
                    tracing::debug!("Image tap receiver dropped");
                }
            }
        }
    }

    fn imaging_finished(&self, _location: Option<&Path>) {}

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed) || self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mm_core::{ImageKey, ImageTags, PixelBuffer};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        labels: Mutex<Vec<String>>,
        finished: Mutex<Option<Option<std::path::PathBuf>>>,
    }

    impl ImageCacheListener for Recorder {
        fn image_received(&self, image: &TaggedImage) {
            self.labels.lock().push(image.tags.label().unwrap());
        }

        fn imaging_finished(&self, location: Option<&Path>) {
            *self.finished.lock() = Some(location.map(Path::to_path_buf));
        }
    }

    fn image(frame: u32) -> TaggedImage {
        let mut tags = ImageTags::new();
        tags.set_key(ImageKey::new(0, 0, frame, 0));
        TaggedImage::new(PixelBuffer::U8(vec![0; 4]), tags)
    }

    #[test]
    fn test_register_notify_unregister() {
        let registry = ListenerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let id = registry.register(recorder.clone());
        assert_eq!(registry.count(), 1);

        registry.notify_image(&image(0));
        registry.notify_image(&image(1));
        registry.notify_finished(Some(Path::new("/data/run")));

        assert_eq!(*recorder.labels.lock(), vec!["0_0_0_0", "0_0_1_0"]);
        assert_eq!(
            *recorder.finished.lock(),
            Some(Some(std::path::PathBuf::from("/data/run")))
        );

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        registry.notify_image(&image(2));
        assert_eq!(recorder.labels.lock().len(), 2);
    }

    #[test]
    fn test_tap_nth_image() {
        let (tap, mut rx) = ImageTap::new(2, 8);
        for frame in 0..5 {
            tap.image_received(&image(frame));
        }
        let frames: Vec<u32> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|img| img.key().unwrap().frame)
            .collect();
        assert_eq!(frames, vec![0, 2, 4]);
    }

    #[test]
    fn test_tap_drops_on_backpressure() {
        let (tap, _rx) = ImageTap::new(1, 2);
        for frame in 0..5 {
            tap.image_received(&image(frame));
        }
        assert_eq!(tap.dropped_count(), 3);
    }

    #[test]
    fn test_tap_with_dropped_receiver_is_unregistered() {
        let registry = ListenerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.register(recorder.clone());
        let (tap, rx) = ImageTap::new(1, 4);
        registry.register(tap.clone());
        assert_eq!(registry.count(), 2);

        registry.notify_image(&image(0));
        assert_eq!(registry.count(), 2);

        drop(rx);
        registry.notify_image(&image(1));
        assert!(tap.is_closed());
        assert_eq!(registry.count(), 1);
        assert_eq!(tap.dropped_count(), 0);

        registry.notify_image(&image(2));
        assert_eq!(recorder.labels.lock().len(), 3);
    }
}
