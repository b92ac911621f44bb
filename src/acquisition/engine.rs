//! AcquisitionEngine - runs a [`SequenceSettings`] against a camera
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐    run()    ┌─────────┐
//! │ Idle │────────────▶│ Running │
//! └──────┘             └────┬────┘
//!    ▲                      │
//!    │  completed           │ pause() between images
//!    │                      ▼
//!    │                 ┌────────┐
//!    │◀────resume()────│ Paused │
//!    │                 └────────┘
//!    │
//!    │  abort()  (Aborting until the current image is stored)
//!    └────────────────────────────
//! ```
//!
//! Each event snaps one image from the [`ImageSource`], tags it with its
//! coordinates and acquisition state, and stores it in the [`ImageCache`].
//! The dataset is finished when the run ends, aborted or not.

use anyhow::{Context, Result};
use chrono::Utc;
use mm_core::{tags, ImageKey, ImageTags, TaggedImage};
use mm_storage::ImageCache;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::settings::SequenceSettings;
use crate::hardware::ImageSource;

/// Polling period while paused or waiting for the next time point.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No acquisition running
    Idle,
    /// Acquiring images
    Running,
    /// Paused between two images, can resume or abort
    Paused,
    /// Abort requested; stops before the next image
    Aborting,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
            EngineState::Aborting => write!(f, "aborting"),
        }
    }
}

/// Outcome of one [`AcquisitionEngine::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionReport {
    /// Images stored
    pub images: u64,
    /// Images the settings asked for
    pub expected: u64,
    /// True when the run was aborted early
    pub aborted: bool,
    /// Dataset directory, for disk-backed caches
    pub location: Option<PathBuf>,
    /// Wall-clock duration
    pub elapsed: Duration,
}

/// Drives acquisitions
pub struct AcquisitionEngine {
    state: RwLock<EngineState>,
    pause_requested: RwLock<bool>,
    abort_requested: RwLock<bool>,
    images_acquired: AtomicU64,
}

impl Default for AcquisitionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AcquisitionEngine {
    /// Create an idle engine
    pub fn new() -> Self {
        Self {
            state: RwLock::new(EngineState::Idle),
            pause_requested: RwLock::new(false),
            abort_requested: RwLock::new(false),
            images_acquired: AtomicU64::new(0),
        }
    }

    /// Get current engine state
    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Images stored by the current or last run
    pub fn images_acquired(&self) -> u64 {
        self.images_acquired.load(Ordering::SeqCst)
    }

    /// Request a pause before the next image
    pub async fn pause(&self) -> Result<()> {
        let current_state = *self.state.read().await;
        if current_state != EngineState::Running {
            anyhow::bail!("Cannot pause: engine is {}", current_state);
        }

        info!("Pause requested");
        *self.pause_requested.write().await = true;
        Ok(())
    }

    /// Resume a paused acquisition
    pub async fn resume(&self) -> Result<()> {
        let current_state = *self.state.read().await;
        if current_state != EngineState::Paused {
            anyhow::bail!("Cannot resume: engine is {}", current_state);
        }

        info!("Resuming from pause");
        *self.pause_requested.write().await = false;
        *self.state.write().await = EngineState::Running;
        Ok(())
    }

    /// Abort the acquisition before the next image
    pub async fn abort(&self, reason: &str) -> Result<()> {
        let current_state = *self.state.read().await;
        match current_state {
            EngineState::Running | EngineState::Paused => {
                info!(reason = %reason, "Abort requested");
                *self.abort_requested.write().await = true;
                *self.state.write().await = EngineState::Aborting;
                Ok(())
            }
            _ => anyhow::bail!("Cannot abort: engine is {}", current_state),
        }
    }

    /// Run an acquisition to completion, abort, or error.
    ///
    /// Writes the summary metadata and channel display settings into
    /// `cache`, stores one image per event, then finishes the cache.
    pub async fn run(
        &self,
        settings: &SequenceSettings,
        source: Arc<dyn ImageSource>,
        cache: Arc<ImageCache>,
    ) -> Result<AcquisitionReport> {
        {
            let mut state = self.state.write().await;
            if *state != EngineState::Idle {
                anyhow::bail!("Cannot start: engine is {}", *state);
            }
            *state = EngineState::Running;
        }
        *self.pause_requested.write().await = false;
        *self.abort_requested.write().await = false;
        self.images_acquired.store(0, Ordering::SeqCst);

        let result = self.execute(settings, source.as_ref(), &cache).await;
        *self.state.write().await = EngineState::Idle;

        if let Err(e) = &result {
            warn!(error = %e, "Acquisition failed");
        }
        result
    }

    /// [`run`](Self::run), aborting when `interrupt` completes.
    ///
    /// The acquisition keeps being driven after the abort request, so the
    /// dataset is finished before this returns.
    pub async fn run_until<F>(
        &self,
        settings: &SequenceSettings,
        source: Arc<dyn ImageSource>,
        cache: Arc<ImageCache>,
        interrupt: F,
    ) -> Result<AcquisitionReport>
    where
        F: Future<Output = ()>,
    {
        let run = self.run(settings, source, cache);
        tokio::pin!(run);

        tokio::select! {
            biased;
            result = &mut run => return result,
            () = interrupt => {}
        }

        if let Err(e) = self.abort("interrupted").await {
            debug!(error = %e, "Interrupt arrived after the run stopped");
        }
        run.await
    }

    async fn execute(
        &self,
        settings: &SequenceSettings,
        source: &dyn ImageSource,
        cache: &ImageCache,
    ) -> Result<AcquisitionReport> {
        let events = settings.events().context("Invalid acquisition settings")?;
        let channels = settings.active_channels();

        let summary = settings.summary_metadata(
            source.width(),
            source.height(),
            source.pixel_type(),
            source.bit_depth(),
        )?;
        cache.set_summary_metadata(summary);
        for (index, channel) in channels.iter().enumerate() {
            cache.set_channel_name(index, &channel.name);
            cache.set_channel_color(index, channel.color);
        }
        if !settings.comment.is_empty() {
            cache.set_comment(&settings.comment);
        }

        info!(
            images = events.len(),
            prefix = %settings.prefix,
            order = ?settings.order,
            "Starting acquisition"
        );

        let start = Instant::now();
        let outcome = self
            .acquire_events(settings, source, cache, &events, start)
            .await;

        // Finish even after a failed image so the dataset stays readable
        let finished = cache.finished().context("Failed to finish dataset");
        let aborted = match outcome {
            Ok(aborted) => aborted,
            Err(e) => {
                if let Err(finish_error) = finished {
                    warn!(error = %finish_error, "Dataset left unfinished");
                }
                return Err(e);
            }
        };
        finished?;

        let report = AcquisitionReport {
            images: self.images_acquired(),
            expected: events.len() as u64,
            aborted,
            location: cache.disk_location(),
            elapsed: start.elapsed(),
        };
        if aborted {
            warn!(images = report.images, expected = report.expected, "Acquisition aborted");
        } else {
            info!(
                images = report.images,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Acquisition complete"
            );
        }
        Ok(report)
    }

    /// Acquire `events` in order. Returns `true` when stopped by an abort.
    async fn acquire_events(
        &self,
        settings: &SequenceSettings,
        source: &dyn ImageSource,
        cache: &ImageCache,
        events: &[ImageKey],
        start: Instant,
    ) -> Result<bool> {
        let slice_positions = settings.slice_positions()?;
        let channels = settings.active_channels();
        let mut series_start = start;
        let mut previous: Option<ImageKey> = None;

        for key in events.iter().copied() {
            if !self.checkpoint().await {
                return Ok(true);
            }

            // Each position starts its own time series in time-first order
            let new_series = settings.time_first()
                && previous.is_some_and(|p| p.position != key.position);
            if new_series {
                series_start = Instant::now();
            }
            let new_frame = previous.map_or(true, |p| p.frame != key.frame || new_series);
            if new_frame {
                let offset_ms = settings.frame_offset_ms(key.frame).max(0.0);
                let offset = Duration::from_secs_f64(offset_ms / 1000.0);
                if !self.wait_until(series_start + offset).await {
                    return Ok(true);
                }
            }

            let channel = &channels[key.channel as usize];
            let pixels = source
                .snap(channel.exposure_ms)
                .await
                .with_context(|| format!("Snap failed for image {}", key))?;

            let mut image_tags = ImageTags::new();
            image_tags.set_key(key);
            image_tags.insert(tags::CHANNEL, channel.name.clone());
            image_tags.insert(tags::EXPOSURE_MS, channel.exposure_ms);
            image_tags.insert(
                tags::Z_POSITION_UM,
                slice_positions[key.slice as usize],
            );
            image_tags.insert(tags::ELAPSED_TIME_MS, start.elapsed().as_millis() as u64);
            image_tags.insert(tags::WIDTH, source.width());
            image_tags.insert(tags::HEIGHT, source.height());
            image_tags.insert(tags::PIXEL_TYPE, source.pixel_type().to_string());
            image_tags.insert(tags::CAMERA, source.name().to_string());
            image_tags.insert(tags::UUID, Uuid::new_v4().to_string());
            image_tags.insert(tags::TIME, Utc::now().to_rfc3339());
            if let Some(position) = settings.position(key.position) {
                image_tags.insert(tags::POSITION_NAME, position.label.clone());
                image_tags.insert(tags::X_POSITION_UM, position.x_um);
                image_tags.insert(tags::Y_POSITION_UM, position.y_um);
            }

            cache
                .put_image(TaggedImage::new(pixels, image_tags))
                .with_context(|| format!("Failed to store image {}", key))?;
            let acquired = self.images_acquired.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(label = %key, acquired, "Image acquired");

            previous = Some(key);
        }
        Ok(false)
    }

    /// Honor pause and abort requests. Returns `false` to stop.
    async fn checkpoint(&self) -> bool {
        if *self.abort_requested.read().await {
            return false;
        }

        if *self.pause_requested.read().await {
            {
                let mut state = self.state.write().await;
                if *state == EngineState::Running {
                    info!("Pausing acquisition");
                    *state = EngineState::Paused;
                }
            }
            loop {
                if *self.abort_requested.read().await {
                    return false;
                }
                if *self.state.read().await == EngineState::Running {
                    break;
                }
                sleep(POLL_INTERVAL).await;
            }
        }
        true
    }

    /// Sleep until `deadline`, waking early on abort. Returns `false` when
    /// aborted.
    async fn wait_until(&self, deadline: Instant) -> bool {
        loop {
            if *self.abort_requested.read().await {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            sleep((deadline - now).min(POLL_INTERVAL)).await;
        }
    }
}
