//! End-to-end behaviour of the image cache over real backends.

use mm_core::{tags, ImageKey, ImageTags, PixelBuffer, PixelType, SummaryMetadata, TaggedImage};
use mm_storage::{
    CacheOptions, ImageCache, ImageCacheListener, TaggedImageStorage, TaggedImageStorageDisk,
    TaggedImageStorageRam,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WIDTH: u32 = 8;
const HEIGHT: u32 = 4;

fn summary() -> SummaryMetadata {
    let mut summary = SummaryMetadata::new("cells", WIDTH, HEIGHT, PixelType::Gray16)
        .with_dimensions(2, 2, 3, 1);
    summary.ch_names = vec!["DAPI".into(), "FITC".into()];
    summary
}

fn image(key: ImageKey) -> TaggedImage {
    let mut tags = ImageTags::new()
        .with(tags::CHANNEL, if key.channel == 0 { "DAPI" } else { "FITC" })
        .with(tags::WIDTH, WIDTH)
        .with(tags::HEIGHT, HEIGHT)
        .with(tags::PIXEL_TYPE, "GRAY16")
        .with(tags::EXPOSURE_MS, 10.0);
    tags.set_key(key);
    let seed = (key.frame * 100 + key.slice * 10 + key.channel) as u16;
    let pixels = (0..WIDTH * HEIGHT).map(|i| seed + i as u16).collect();
    TaggedImage::new(PixelBuffer::U16(pixels), tags)
}

fn all_keys() -> Vec<ImageKey> {
    let mut keys = Vec::new();
    for frame in 0..3 {
        for slice in 0..2 {
            for channel in 0..2 {
                keys.push(ImageKey::new(channel, slice, frame, 0));
            }
        }
    }
    keys
}

fn disk_cache(root: &Path, ram_cache: bool) -> ImageCache {
    let store = TaggedImageStorageDisk::create(root, "cells", Some(summary())).unwrap();
    ImageCache::new(Arc::new(store), ram_cache)
}

#[test]
fn put_then_get_returns_identical_image() {
    let root = TempDir::new().unwrap();
    for ram_cache in [true, false] {
        let cache = disk_cache(root.path(), ram_cache);
        for key in all_keys() {
            cache.put_image(image(key)).unwrap();
        }
        for key in all_keys() {
            let back = cache.get_image_by_key(key).unwrap();
            assert_eq!(back, image(key));
        }
    }
}

#[test]
fn last_acquired_frame_never_decreases() {
    let root = TempDir::new().unwrap();
    let cache = disk_cache(root.path(), false);

    let mut previous = cache.last_acquired_frame();
    for frame in [0, 2, 1, 2, 0] {
        cache.put_image(image(ImageKey::new(0, 0, frame, 0))).unwrap();
        let current = cache.last_acquired_frame();
        assert!(current >= previous);
        previous = current;
    }
    assert_eq!(previous, Some(2));
}

#[test]
fn changing_keys_match_differing_tags() {
    let cache = ImageCache::new(Arc::new(TaggedImageStorageRam::new(Some(summary()))), true);
    for key in all_keys() {
        cache.put_image(image(key)).unwrap();
    }

    let keys: Vec<String> = cache.changing_keys().into_iter().collect();
    assert_eq!(
        keys,
        vec!["Channel", "ChannelIndex", "FrameIndex", "SliceIndex"]
    );
}

#[test]
fn save_as_copies_every_key_to_disk() {
    let root = TempDir::new().unwrap();
    let source_summary = summary();
    let cache = ImageCache::new(
        Arc::new(TaggedImageStorageRam::new(Some(source_summary.clone()))),
        true,
    );
    for key in all_keys() {
        cache.put_image(image(key)).unwrap();
    }
    cache.set_comment("mitosis");
    cache.store_channel_display_settings(0, 10, 900, 1.0, 4095);

    let target = Arc::new(TaggedImageStorageDisk::create(root.path(), "copy", None).unwrap());
    let source_keys = cache.image_keys();
    assert_eq!(cache.save_as(target.clone()), source_keys.len());
    assert_eq!(target.image_keys(), source_keys);
    assert_eq!(cache.disk_location(), Some(root.path().join("copy")));

    cache.finished().unwrap();
    let reopened = TaggedImageStorageDisk::open(root.path().join("copy")).unwrap();
    assert_eq!(reopened.image_keys(), source_keys);
    assert_eq!(reopened.summary_metadata(), Some(source_summary));
    assert_eq!(reopened.display_and_comments().comments.summary, "mitosis");
    assert_eq!(reopened.display_and_comments().channels[0].max, Some(900));
    let key = ImageKey::new(1, 1, 2, 0);
    assert_eq!(reopened.get_image(key).unwrap().unwrap(), image(key));
}

#[test]
fn preload_mirrors_existing_dataset() {
    let root = TempDir::new().unwrap();
    let written_summary = summary();
    let dir = {
        let store =
            TaggedImageStorageDisk::create(root.path(), "cells", Some(written_summary.clone())).unwrap();
        for key in all_keys() {
            store.put_image(image(key)).unwrap();
        }
        store.finished().unwrap();
        store.dir().to_path_buf()
    };

    let cache = ImageCache::with_options(
        Arc::new(TaggedImageStorageDisk::open(&dir).unwrap()),
        CacheOptions {
            preload_delay: Duration::from_millis(1),
            ..CacheOptions::default()
        },
    );
    assert_eq!(cache.wait_for_preload(), all_keys().len());
    assert_eq!(cache.summary_metadata(), Some(written_summary));

    // Files are gone; reads must be served from RAM.
    std::fs::remove_dir_all(&dir).unwrap();
    for key in all_keys() {
        assert_eq!(cache.get_image_by_key(key).unwrap(), image(key));
    }
}

#[test]
fn close_stops_preload() {
    let root = TempDir::new().unwrap();
    let store = TaggedImageStorageDisk::create(root.path(), "cells", Some(summary())).unwrap();
    for key in all_keys() {
        store.put_image(image(key)).unwrap();
    }

    let cache = ImageCache::with_options(
        Arc::new(store),
        CacheOptions {
            preload_delay: Duration::from_millis(50),
            ..CacheOptions::default()
        },
    );
    cache.close().unwrap();
    assert_eq!(cache.wait_for_preload(), 0);
}

#[derive(Default)]
struct Recorder {
    received: Mutex<Vec<ImageKey>>,
    finished: Mutex<Vec<Option<PathBuf>>>,
}

impl ImageCacheListener for Recorder {
    fn image_received(&self, image: &TaggedImage) {
        self.received.lock().push(image.key().unwrap());
    }

    fn imaging_finished(&self, location: Option<&Path>) {
        self.finished.lock().push(location.map(Path::to_path_buf));
    }
}

#[test]
fn listeners_see_puts_and_finish() {
    let root = TempDir::new().unwrap();
    let cache = disk_cache(root.path(), false);
    let recorder = Arc::new(Recorder::default());
    let id = cache.add_listener(recorder.clone());

    cache.put_image(image(ImageKey::new(0, 0, 0, 0))).unwrap();
    cache.put_image(image(ImageKey::new(1, 0, 0, 0))).unwrap();
    cache.finished().unwrap();

    assert!(cache.is_finished());
    assert_eq!(recorder.received.lock().len(), 2);
    assert_eq!(
        *recorder.finished.lock(),
        vec![Some(root.path().join("cells"))]
    );

    assert!(cache.remove_listener(id));
    assert_eq!(cache.listener_count(), 0);
}

#[tokio::test]
async fn tap_delivers_without_blocking_puts() {
    let cache = ImageCache::with_options(
        Arc::new(TaggedImageStorageRam::new(Some(summary()))),
        CacheOptions {
            ram_cache: false,
            tap_capacity: 4,
            ..CacheOptions::default()
        },
    );
    let mut subscription = cache.add_tap(1);

    for key in all_keys() {
        cache.put_image(image(key)).unwrap();
    }

    let mut delivered = Vec::new();
    while let Ok(image) = subscription.receiver.try_recv() {
        delivered.push(image.key().unwrap());
    }
    assert_eq!(delivered, all_keys()[..4].to_vec());
    assert_eq!(subscription.tap.dropped_count(), (all_keys().len() - 4) as u64);
}

#[test]
fn dropped_tap_receiver_unregisters_the_tap() {
    let cache = ImageCache::new(Arc::new(TaggedImageStorageRam::new(Some(summary()))), false);
    let subscription = cache.add_tap(1);
    assert_eq!(cache.listener_count(), 1);

    let keys = all_keys();
    cache.put_image(image(keys[0])).unwrap();
    assert_eq!(cache.listener_count(), 1);

    drop(subscription.receiver);
    cache.put_image(image(keys[1])).unwrap();
    assert_eq!(cache.listener_count(), 0);
    assert!(!cache.remove_listener(subscription.id));
    assert_eq!(subscription.tap.dropped_count(), 0);
}
