//! CLI Entry Point for mm_acquire
//!
//! Provides command-line interface for:
//! - Running a multi-dimensional acquisition against the mock camera
//! - Inspecting a dataset written to disk
//! - Copying a dataset into a new directory
//!
//! # Usage
//!
//! Acquire 5 time points of a 3-slice stack in two channels:
//! ```bash
//! mm_acquire acquire --frames 5 --interval-ms 500 \
//!     --z-bottom 0 --z-top 2 --z-step 1 \
//!     --channel DAPI:10 --channel FITC:20 --save
//! ```
//!
//! Acquire from a settings file:
//! ```bash
//! mm_acquire acquire --settings sequence.toml
//! ```
//!
//! Inspect a dataset:
//! ```bash
//! mm_acquire inspect data/acq_1
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mm_acquire::acquisition::{AcqOrderMode, AcquisitionEngine, ChannelSpec, SequenceSettings};
use mm_acquire::config::{Config, DEFAULT_CONFIG_PATH};
use mm_acquire::hardware::{ImageSource, MockCamera};
use mm_acquire::tracing_setup::{self, OutputFormat, TracingConfig};
use mm_core::PixelType;
use mm_storage::{ImageCache, TaggedImageStorage, TaggedImageStorageDisk, TaggedImageStorageRam};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "mm_acquire")]
#[command(about = "Multi-dimensional image acquisition with a tagged-image cache", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an acquisition with the mock camera
    Acquire(AcquireArgs),

    /// Print the contents of a dataset directory
    Inspect {
        /// Dataset directory
        dir: PathBuf,
    },

    /// Copy a dataset into a new directory under `dest_root`
    Copy {
        /// Source dataset directory
        src: PathBuf,
        /// Directory that receives the copy
        dest_root: PathBuf,
        /// Name of the copy; defaults to the configured prefix
        #[arg(long)]
        prefix: Option<String>,
    },
}

#[derive(clap::Args)]
struct AcquireArgs {
    /// TOML file with sequence settings; other acquisition flags are ignored
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Number of time points
    #[arg(long)]
    frames: Option<u32>,

    /// Interval between time points
    #[arg(long, default_value_t = 0.0)]
    interval_ms: f64,

    /// First Z position
    #[arg(long, requires = "z_top")]
    z_bottom: Option<f64>,

    /// Last Z position
    #[arg(long, requires = "z_bottom")]
    z_top: Option<f64>,

    /// Z step
    #[arg(long, default_value_t = 1.0)]
    z_step: f64,

    /// Channel as NAME:EXPOSURE_MS; repeat for more channels
    #[arg(long = "channel", value_parser = parse_channel)]
    channels: Vec<ChannelSpec>,

    /// Exposure when no channel is given
    #[arg(long, default_value_t = 10.0)]
    exposure_ms: f64,

    /// Loop nesting
    #[arg(long, value_enum, default_value_t = AcqOrderMode::TimePosSliceChannel)]
    order: AcqOrderMode,

    /// Write the dataset to disk
    #[arg(long)]
    save: bool,

    /// Dataset root directory; defaults to the configured root
    #[arg(long)]
    root: Option<PathBuf>,

    /// Dataset name; defaults to the configured prefix
    #[arg(long)]
    prefix: Option<String>,

    /// Acquisition comment
    #[arg(long, default_value = "")]
    comment: String,

    /// Mock camera width
    #[arg(long, default_value_t = 512)]
    width: u32,

    /// Mock camera height
    #[arg(long, default_value_t = 512)]
    height: u32,

    /// Mock camera pixel type (GRAY8, GRAY16, RGB32)
    #[arg(long, default_value = "GRAY16")]
    pixel_type: PixelType,
}

fn parse_channel(raw: &str) -> Result<ChannelSpec, String> {
    let (name, exposure) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("expected NAME:EXPOSURE_MS, got '{}'", raw))?;
    let exposure_ms: f64 = exposure
        .parse()
        .map_err(|_| format!("invalid exposure '{}'", exposure))?;
    if name.is_empty() {
        return Err("channel name must not be empty".to_string());
    }
    Ok(ChannelSpec::new(name, exposure_ms))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate()?;
    tracing_setup::init(TracingConfig::from_config(&config)?.with_format(cli.log_format))?;

    match cli.command {
        Commands::Acquire(args) => acquire(&config, args).await,
        Commands::Inspect { dir } => inspect(&config, dir),
        Commands::Copy {
            src,
            dest_root,
            prefix,
        } => copy(&config, src, dest_root, prefix),
    }
}

fn sequence_from_args(config: &Config, args: &AcquireArgs) -> Result<SequenceSettings> {
    let mut settings = match &args.settings {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings {}", path.display()))?;
            return toml::from_str(&text)
                .with_context(|| format!("Failed to parse settings {}", path.display()));
        }
        None => SequenceSettings::default(),
    };

    if let Some(frames) = args.frames {
        settings.use_frames = true;
        settings.num_frames = frames;
        settings.interval_ms = args.interval_ms;
    }
    if let (Some(bottom), Some(top)) = (args.z_bottom, args.z_top) {
        settings.use_slices = true;
        settings.z_bottom_um = bottom;
        settings.z_top_um = top;
        settings.z_step_um = args.z_step;
    }
    if !args.channels.is_empty() {
        settings.use_channels = true;
        settings.channels = args.channels.clone();
    }
    settings.default_exposure_ms = args.exposure_ms;
    settings.order = args.order;
    settings.save = args.save;
    settings.root = args.root.clone().unwrap_or_else(|| config.storage.root.clone());
    settings.prefix = args
        .prefix
        .clone()
        .unwrap_or_else(|| config.storage.prefix.clone());
    settings.comment = args.comment.clone();
    Ok(settings)
}

async fn acquire(config: &Config, args: AcquireArgs) -> Result<()> {
    let settings = sequence_from_args(config, &args)?;
    let camera: Arc<dyn ImageSource> =
        Arc::new(MockCamera::new(args.width, args.height, args.pixel_type));

    println!(
        "{}",
        settings.verbose_summary(
            camera.width(),
            camera.height(),
            camera.pixel_type().bytes_per_pixel()
        )?
    );
    println!();

    let storage: Arc<dyn TaggedImageStorage> = if settings.save {
        Arc::new(TaggedImageStorageDisk::create(&settings.root, &settings.prefix, None)?)
    } else {
        Arc::new(TaggedImageStorageRam::new(None))
    };
    let cache = Arc::new(ImageCache::with_options(storage, config.cache.cache_options()));

    let engine = AcquisitionEngine::new();
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
        info!("Interrupted, stopping after the current image");
    };
    let report = engine
        .run_until(&settings, camera, cache.clone(), interrupt)
        .await?;

    println!(
        "Acquired {} of {} images in {:.1} s{}",
        report.images,
        report.expected,
        report.elapsed.as_secs_f64(),
        if report.aborted { " (aborted)" } else { "" }
    );
    if let Some(location) = &report.location {
        println!("Dataset: {}", location.display());
    }
    cache.close()?;
    Ok(())
}

fn inspect(config: &Config, dir: PathBuf) -> Result<()> {
    let storage = TaggedImageStorageDisk::open(&dir)
        .with_context(|| format!("Failed to open dataset {}", dir.display()))?;
    let mut options = config.cache.cache_options();
    options.ram_cache = false;
    let cache = ImageCache::with_options(Arc::new(storage), options);

    let keys = cache.image_keys();
    println!("Dataset: {}", dir.display());
    if let Some(summary) = cache.summary_metadata() {
        println!("Prefix: {}", summary.prefix);
        println!(
            "Image size: {} x {} {}",
            summary.width, summary.height, summary.pixel_type
        );
        println!(
            "Dimensions: {} channels, {} slices, {} frames, {} positions",
            summary.num_channels(),
            summary.num_slices(),
            summary.num_frames(),
            summary.num_positions()
        );
    }
    println!("Images: {}", keys.len());
    println!("Size on disk: {} bytes", cache.data_set_size());
    if let Some(frame) = cache.last_acquired_frame() {
        println!("Last frame: {}", frame);
    }
    for channel in 0..cache.num_channels() {
        println!("Channel {}: {}", channel, cache.channel_name(channel));
    }
    let comment = cache.comment();
    if !comment.is_empty() {
        println!("Comment: {}", comment);
    }

    for key in &keys {
        if cache.get_image_by_key(*key).is_none() {
            println!("Unreadable image: {}", key);
        }
    }
    let changing: Vec<String> = cache.changing_keys().into_iter().collect();
    println!("Changing tags: {}", changing.join(", "));

    info!(images = keys.len(), "Inspection complete");
    Ok(())
}

fn copy(config: &Config, src: PathBuf, dest_root: PathBuf, prefix: Option<String>) -> Result<()> {
    let source = TaggedImageStorageDisk::open(&src)
        .with_context(|| format!("Failed to open dataset {}", src.display()))?;
    let mut options = config.cache.cache_options();
    options.ram_cache = false;
    let cache = ImageCache::with_options(Arc::new(source), options);

    let prefix = prefix.unwrap_or_else(|| config.storage.prefix.clone());
    let target = Arc::new(TaggedImageStorageDisk::create(&dest_root, &prefix, None)?);
    let location = target.dir().to_path_buf();

    let copied = cache.save_as(target);
    cache.finished().context("Failed to finish copy")?;

    println!("Copied {} images to {}", copied, location.display());
    Ok(())
}
