//! End-to-end acquisitions with the mock camera into disk datasets.

use async_trait::async_trait;
use mm_acquire::acquisition::{AcqOrderMode, AcquisitionEngine, ChannelSpec, SequenceSettings};
use mm_acquire::config::Config;
use mm_acquire::hardware::{ImageSource, MockCamera};
use mm_acquire::{
    tags, AcquisitionVirtualStack, ImageCache, ImageKey, PixelBuffer, PixelType,
    TaggedImageStorage, TaggedImageStorageDisk,
};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn camera() -> Arc<MockCamera> {
    Arc::new(MockCamera::new(8, 6, PixelType::Gray16).without_exposure_delay())
}

fn two_position_settings(root: &Path) -> SequenceSettings {
    let mut settings = SequenceSettings {
        use_frames: true,
        num_frames: 2,
        use_channels: true,
        channels: vec![
            ChannelSpec::new("DAPI", 1.0).with_color(0x0000FF),
            ChannelSpec::new("Cy5", 2.0).with_color(0xFF0000),
        ],
        use_positions: true,
        order: AcqOrderMode::PosTimeSliceChannel,
        save: true,
        root: root.to_path_buf(),
        prefix: "cells".into(),
        comment: "two wells".into(),
        ..SequenceSettings::default()
    };
    settings.positions.push("A1", 100.0, 200.0);
    settings.positions.push("B1", 9100.0, 200.0);
    settings
}

async fn acquire_to_disk(settings: &SequenceSettings, camera: Arc<MockCamera>) -> std::path::PathBuf {
    let storage = TaggedImageStorageDisk::create(&settings.root, &settings.prefix, None).unwrap();
    let cache = Arc::new(ImageCache::new(Arc::new(storage), true));
    let engine = AcquisitionEngine::new();

    let report = engine.run(settings, camera, cache.clone()).await.unwrap();
    assert!(!report.aborted);
    assert_eq!(report.images, settings.total_images().unwrap());
    cache.close().unwrap();
    report.location.unwrap()
}

#[tokio::test]
async fn acquisition_writes_a_reopenable_dataset() {
    let root = tempfile::tempdir().unwrap();
    let settings = two_position_settings(root.path());
    let location = acquire_to_disk(&settings, camera()).await;
    assert_eq!(location, root.path().join("cells"));

    let reopened = TaggedImageStorageDisk::open(&location).unwrap();
    assert!(reopened.is_finished());
    assert_eq!(reopened.image_keys(), {
        let mut expected = settings.events().unwrap();
        expected.sort();
        expected
    });

    let summary = reopened.summary_metadata().unwrap();
    assert_eq!(summary.num_channels(), 2);
    assert_eq!(summary.num_frames(), 2);
    assert_eq!(summary.num_positions(), 2);
    assert_eq!(summary.ch_names, vec!["DAPI".to_string(), "Cy5".to_string()]);
    assert_eq!(
        summary.extra.get("PositionLabels"),
        Some(&serde_json::json!(["A1", "B1"]))
    );

    let display = reopened.display_and_comments();
    assert_eq!(display.comments.summary, "two wells");
    assert_eq!(display.channels[1].name, "Cy5");
    assert_eq!(display.channels[1].color, 0xFF0000);

    let image = reopened
        .get_image(ImageKey::new(1, 0, 1, 1))
        .unwrap()
        .unwrap();
    assert_eq!(image.tags.value_string(tags::POSITION_NAME).as_deref(), Some("B1"));
    assert_eq!(image.tags.value_string(tags::X_POSITION_UM).as_deref(), Some("9100.0"));
    assert_eq!(image.tags.channel_name().as_deref(), Some("Cy5"));
    assert_eq!(image.tags.pixel_type().unwrap(), PixelType::Gray16);
}

#[tokio::test]
async fn position_first_order_matches_snap_sequence() {
    let root = tempfile::tempdir().unwrap();
    let settings = two_position_settings(root.path());
    let camera = camera();
    let location = acquire_to_disk(&settings, camera.clone()).await;

    let cache = Arc::new(ImageCache::new(
        Arc::new(TaggedImageStorageDisk::open(&location).unwrap()),
        false,
    ));
    let summary = cache.summary_metadata().unwrap();
    let mut stack = AcquisitionVirtualStack::new(cache.clone(), &summary);
    for key in cache.image_keys() {
        let tags = cache.get_image_tags(key.channel, key.slice, key.frame, key.position).unwrap();
        stack.remember_image(&tags).unwrap();
    }
    assert_eq!(stack.size(), 4);

    // Position 0 is acquired completely before position 1
    for (flat, snap) in [(1usize, 1u64), (2, 2), (3, 3), (4, 4)] {
        assert_eq!(*stack.get_pixels(flat), camera.pattern(snap));
    }
    stack.set_position_index(1);
    for (flat, snap) in [(1usize, 5u64), (2, 6), (3, 7), (4, 8)] {
        assert_eq!(*stack.get_pixels(flat), camera.pattern(snap));
    }
    assert!(stack.slice_label(3).starts_with("DAPI, 0"));
}

#[tokio::test]
async fn settings_file_drives_an_acquisition() {
    let root = tempfile::tempdir().unwrap();
    let settings_toml = format!(
        r#"
        use_slices = true
        z_bottom_um = 5.0
        z_top_um = 3.0
        z_step_um = 1.0
        order = "TimePosChannelSlice"
        save = true
        root = "{}"
        prefix = "stack"

        [[channels]]
        name = "GFP"
        exposure_ms = 3.0
        "#,
        root.path().display()
    );
    let mut settings: SequenceSettings = toml::from_str(&settings_toml).unwrap();
    settings.use_channels = true;

    let location = acquire_to_disk(&settings, camera()).await;
    let reopened = TaggedImageStorageDisk::open(location).unwrap();
    assert_eq!(reopened.image_keys().len(), 3);

    let top = reopened.get_image_tags(ImageKey::new(0, 2, 0, 0)).unwrap().unwrap();
    assert_eq!(top.value_string(tags::Z_POSITION_UM).as_deref(), Some("3.0"));
    assert_eq!(top.channel_name().as_deref(), Some("GFP"));
}

#[tokio::test]
async fn saved_dataset_copies_into_new_directory() {
    let root = tempfile::tempdir().unwrap();
    let settings = two_position_settings(root.path());
    let location = acquire_to_disk(&settings, camera()).await;

    let config = Config::default();
    let mut options = config.cache.cache_options();
    options.ram_cache = false;
    let cache = ImageCache::with_options(
        Arc::new(TaggedImageStorageDisk::open(&location).unwrap()),
        options,
    );

    // The same prefix again gets a fresh directory
    let target = Arc::new(TaggedImageStorageDisk::create(root.path(), "cells", None).unwrap());
    assert_eq!(target.dir(), root.path().join("cells_1"));
    assert_eq!(cache.save_as(target), 8);
    cache.finished().unwrap();

    let copy = TaggedImageStorageDisk::open(root.path().join("cells_1")).unwrap();
    let original = TaggedImageStorageDisk::open(&location).unwrap();
    assert_eq!(copy.image_keys(), original.image_keys());
    assert_eq!(copy.summary_metadata(), original.summary_metadata());
    for key in original.image_keys() {
        assert_eq!(copy.get_image(key).unwrap(), original.get_image(key).unwrap());
    }
}

#[tokio::test]
async fn ram_acquisition_reports_no_location() {
    let engine = AcquisitionEngine::new();
    let cache = Arc::new(ImageCache::new(
        Arc::new(mm_acquire::TaggedImageStorageRam::new(None)),
        false,
    ));
    let source: Arc<dyn ImageSource> = camera();
    let report = engine
        .run(&SequenceSettings::default(), source, cache.clone())
        .await
        .unwrap();

    assert_eq!(report.images, 1);
    assert_eq!(report.location, None);
    assert_eq!(cache.last_acquired_frame(), Some(0));
    assert_eq!(cache.channel_name(0), "Default");
}

/// Camera whose `fail_on`-th snap (1-based) errors.
struct FlakyCamera {
    inner: MockCamera,
    snaps: AtomicU64,
    fail_on: u64,
}

#[async_trait]
impl ImageSource for FlakyCamera {
    async fn snap(&self, exposure_ms: f64) -> anyhow::Result<PixelBuffer> {
        let n = self.snaps.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            anyhow::bail!("sensor readout timed out");
        }
        self.inner.snap(exposure_ms).await
    }

    fn width(&self) -> u32 {
        self.inner.width()
    }

    fn height(&self) -> u32 {
        self.inner.height()
    }

    fn pixel_type(&self) -> PixelType {
        self.inner.pixel_type()
    }
}

#[tokio::test]
async fn failed_snap_still_leaves_a_reopenable_dataset() {
    let root = tempfile::tempdir().unwrap();
    let settings = SequenceSettings {
        use_frames: true,
        num_frames: 5,
        save: true,
        root: root.path().to_path_buf(),
        prefix: "flaky".into(),
        ..SequenceSettings::default()
    };
    let camera = Arc::new(FlakyCamera {
        inner: MockCamera::new(8, 6, PixelType::Gray16).without_exposure_delay(),
        snaps: AtomicU64::new(0),
        fail_on: 3,
    });
    let storage = TaggedImageStorageDisk::create(root.path(), "flaky", None).unwrap();
    let location = storage.dir().to_path_buf();
    let cache = Arc::new(ImageCache::new(Arc::new(storage), false));
    let engine = AcquisitionEngine::new();

    let err = engine.run(&settings, camera, cache.clone()).await.unwrap_err();
    assert!(format!("{:#}", err).contains("Snap failed for image 0_0_2_0"));
    assert_eq!(engine.images_acquired(), 2);
    assert!(cache.is_finished());
    assert!(location.join("metadata.json").exists());

    let reopened = TaggedImageStorageDisk::open(&location).unwrap();
    assert_eq!(
        reopened.image_keys(),
        vec![ImageKey::new(0, 0, 0, 0), ImageKey::new(0, 0, 1, 0)]
    );
    assert_eq!(reopened.summary_metadata().unwrap().num_frames(), 5);
}

#[tokio::test]
async fn interrupt_finishes_the_dataset_before_returning() {
    let root = tempfile::tempdir().unwrap();
    let settings = SequenceSettings {
        use_frames: true,
        num_frames: 100,
        interval_ms: 20.0,
        save: true,
        root: root.path().to_path_buf(),
        prefix: "interrupted".into(),
        ..SequenceSettings::default()
    };
    let storage = TaggedImageStorageDisk::create(root.path(), "interrupted", None).unwrap();
    let location = storage.dir().to_path_buf();
    let cache = Arc::new(ImageCache::new(Arc::new(storage), false));
    let engine = AcquisitionEngine::new();

    let interrupt = async {
        while engine.images_acquired() < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
    };
    let report = engine
        .run_until(&settings, camera(), cache.clone(), interrupt)
        .await
        .unwrap();

    assert!(report.aborted);
    assert!(report.images >= 2 && report.images < 100);
    assert!(cache.is_finished());
    let reopened = TaggedImageStorageDisk::open(&location).unwrap();
    assert_eq!(reopened.image_keys().len() as u64, report.images);
}
