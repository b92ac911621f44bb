//! Directory-backed image store.
//!
//! Layout of a dataset directory:
//!
//! ```text
//! <root>/<prefix>/
//!     img_000000000_000_000_000.tif      one TIFF per image
//!     ...
//!     metadata.json                      {"Summary": {...}, "FrameKey-c_s_f_p": {...}, ...}
//!     display_and_comments.json          display settings and comments
//! ```
//!
//! Pixels go to disk on every `put_image`; tags are indexed in memory and
//! flushed together with the summary on `finished()` and `close()`.

use crate::storage::TaggedImageStorage;
use crate::tiff_codec::TiffCodec;
use mm_core::{
    DisplayAndComments, ImageKey, ImageTags, MmError, MmResult, PixelType, SummaryMetadata,
    TaggedImage,
};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Name of the tag index file.
pub const METADATA_FILE: &str = "metadata.json";
/// Name of the display settings file.
pub const DISPLAY_FILE: &str = "display_and_comments.json";

const SUMMARY_ENTRY: &str = "Summary";
const FRAME_KEY_PREFIX: &str = "FrameKey-";

/// File name of the TIFF holding `key`.
pub fn image_file_name(key: ImageKey) -> String {
    format!(
        "img_{:09}_{:03}_{:03}_{:03}.tif",
        key.frame, key.channel, key.slice, key.position
    )
}

#[derive(Debug, Clone)]
struct DiskEntry {
    tags: ImageTags,
    pixel_type: PixelType,
    width: u32,
    height: u32,
    bytes: u64,
}

#[derive(Default)]
struct DiskInner {
    entries: BTreeMap<ImageKey, DiskEntry>,
    summary: Option<SummaryMetadata>,
    display: DisplayAndComments,
    last_frame: Option<u32>,
    bytes: u64,
}

/// Stores every image as a TIFF file inside one dataset directory.
pub struct TaggedImageStorageDisk {
    dir: PathBuf,
    inner: RwLock<DiskInner>,
    finished: AtomicBool,
}

impl TaggedImageStorageDisk {
    /// Create a new dataset directory `root/prefix`.
    ///
    /// If that directory already exists `_1`, `_2`, ... is appended until a
    /// free name is found.
    pub fn create<P: AsRef<Path>>(
        root: P,
        prefix: &str,
        summary: Option<SummaryMetadata>,
    ) -> MmResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;

        let dir = unique_dir(root, prefix);
        fs::create_dir(&dir)?;

        let display = summary
            .as_ref()
            .map(DisplayAndComments::from_summary)
            .unwrap_or_default();

        tracing::info!(dir = %dir.display(), "Created dataset directory");

        Ok(Self {
            dir,
            inner: RwLock::new(DiskInner {
                summary,
                display,
                ..DiskInner::default()
            }),
            finished: AtomicBool::new(false),
        })
    }

    /// Reopen a dataset written earlier.
    ///
    /// The reopened store is finished: it can be read and copied but not
    /// extended.
    pub fn open<P: AsRef<Path>>(dir: P) -> MmResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let metadata_path = dir.join(METADATA_FILE);
        let mut raw: Map<String, Value> =
            serde_json::from_str(&fs::read_to_string(&metadata_path)?)?;

        let mut inner = DiskInner::default();
        if let Some(summary) = raw.remove(SUMMARY_ENTRY) {
            inner.summary = Some(serde_json::from_value(summary)?);
        }
        for (name, value) in raw {
            let Some(label) = name.strip_prefix(FRAME_KEY_PREFIX) else {
                tracing::debug!(entry = %name, "Ignoring unknown metadata entry");
                continue;
            };
            let (key, entry) = match read_entry(label, value, inner.summary.as_ref()) {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(entry = %name, error = %e, "Skipping malformed image entry");
                    continue;
                }
            };
            let bytes = fs::metadata(dir.join(image_file_name(key)))
                .map(|m| m.len())
                .unwrap_or(0);
            inner.bytes += bytes;
            inner.last_frame = inner.last_frame.max(Some(key.frame));
            inner.entries.insert(key, DiskEntry { bytes, ..entry });
        }

        let display_path = dir.join(DISPLAY_FILE);
        if display_path.exists() {
            inner.display = serde_json::from_str(&fs::read_to_string(&display_path)?)?;
        } else if let Some(summary) = &inner.summary {
            inner.display = DisplayAndComments::from_summary(summary);
        }

        tracing::info!(
            dir = %dir.display(),
            images = inner.entries.len(),
            "Opened dataset"
        );

        Ok(Self {
            dir,
            inner: RwLock::new(inner),
            finished: AtomicBool::new(true),
        })
    }

    /// Dataset directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_metadata(&self) -> MmResult<()> {
        let inner = self.inner.read();

        let mut root = Map::new();
        if let Some(summary) = &inner.summary {
            root.insert(SUMMARY_ENTRY.to_string(), serde_json::to_value(summary)?);
        }
        for (key, entry) in &inner.entries {
            root.insert(
                format!("{}{}", FRAME_KEY_PREFIX, key.label()),
                serde_json::to_value(&entry.tags)?,
            );
        }

        fs::write(
            self.dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&Value::Object(root))?,
        )?;
        fs::write(
            self.dir.join(DISPLAY_FILE),
            serde_json::to_string_pretty(&inner.display)?,
        )?;

        tracing::debug!(
            dir = %self.dir.display(),
            images = inner.entries.len(),
            "Wrote dataset metadata"
        );
        Ok(())
    }
}

fn unique_dir(root: &Path, prefix: &str) -> PathBuf {
    let mut candidate = root.join(prefix);
    let mut n = 1u32;
    while candidate.exists() {
        candidate = root.join(format!("{}_{}", prefix, n));
        n += 1;
    }
    candidate
}

/// Key and index entry of one `FrameKey-<label>` metadata entry.
fn read_entry(
    label: &str,
    value: Value,
    summary: Option<&SummaryMetadata>,
) -> MmResult<(ImageKey, DiskEntry)> {
    let key = ImageKey::from_label(label)?;
    let tags: ImageTags = serde_json::from_value(value)?;
    if tags.key()? != key {
        return Err(MmError::MalformedTags(format!(
            "tags of entry '{}' name image {}",
            label,
            tags.label()?
        )));
    }
    Ok((key, describe(&tags, summary, None)?))
}

/// Resolve pixel type and dimensions from the tags, falling back to the
/// summary and then to the buffer itself.
fn describe(
    tags: &ImageTags,
    summary: Option<&SummaryMetadata>,
    buffer_type: Option<PixelType>,
) -> MmResult<DiskEntry> {
    let pixel_type = buffer_type
        .or_else(|| tags.pixel_type().ok())
        .or_else(|| summary.map(|s| s.pixel_type))
        .ok_or_else(|| MmError::MalformedTags("no pixel type in tags or summary".into()))?;
    let width = tags
        .width()
        .or_else(|| summary.map(|s| s.width))
        .ok_or_else(|| MmError::MalformedTags("no width in tags or summary".into()))?;
    let height = tags
        .height()
        .or_else(|| summary.map(|s| s.height))
        .ok_or_else(|| MmError::MalformedTags("no height in tags or summary".into()))?;

    Ok(DiskEntry {
        tags: tags.clone(),
        pixel_type,
        width,
        height,
        bytes: 0,
    })
}

impl std::fmt::Debug for TaggedImageStorageDisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("TaggedImageStorageDisk")
            .field("dir", &self.dir)
            .field("images", &inner.entries.len())
            .field("finished", &self.finished.load(Ordering::Relaxed))
            .finish()
    }
}

impl TaggedImageStorage for TaggedImageStorageDisk {
    fn put_image(&self, image: TaggedImage) -> MmResult<ImageKey> {
        if self.is_finished() {
            return Err(MmError::StorageFinished(self.dir.display().to_string()));
        }

        let key = image.key()?;
        let summary = self.inner.read().summary.clone();
        let entry = describe(
            &image.tags,
            summary.as_ref(),
            Some(image.pixels.pixel_type()),
        )?;

        let path = self.dir.join(image_file_name(key));
        TiffCodec::write(&image.pixels, entry.width, entry.height, &path)?;
        let bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

        let mut inner = self.inner.write();
        if let Some(old) = inner.entries.insert(key, DiskEntry { bytes, ..entry }) {
            inner.bytes -= old.bytes;
        }
        inner.bytes += bytes;
        inner.last_frame = inner.last_frame.max(Some(key.frame));
        Ok(key)
    }

    fn get_image(&self, key: ImageKey) -> MmResult<Option<TaggedImage>> {
        let Some(entry) = self.inner.read().entries.get(&key).cloned() else {
            return Ok(None);
        };
        let pixels = TiffCodec::read(self.dir.join(image_file_name(key)), entry.pixel_type)?;
        Ok(Some(TaggedImage::new(pixels, entry.tags)))
    }

    fn get_image_tags(&self, key: ImageKey) -> MmResult<Option<ImageTags>> {
        Ok(self.inner.read().entries.get(&key).map(|e| e.tags.clone()))
    }

    fn image_keys(&self) -> Vec<ImageKey> {
        self.inner.read().entries.keys().copied().collect()
    }

    fn contains(&self, key: ImageKey) -> bool {
        self.inner.read().entries.contains_key(&key)
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
        self.write_metadata()?;
        self.finished.store(true, Ordering::Release);
        tracing::info!(dir = %self.dir.display(), "Dataset finished");
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn close(&self) -> MmResult<()> {
        self.write_metadata()
    }

    fn last_acquired_frame(&self) -> Option<u32> {
        self.inner.read().last_frame
    }

    fn disk_location(&self) -> Option<PathBuf> {
        Some(self.dir.clone())
    }

    fn data_set_size(&self) -> u64 {
        self.inner.read().bytes
    }
}
