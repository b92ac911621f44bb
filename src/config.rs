//! Configuration using Figment
//!
//! Configuration is layered:
//! 1. built-in defaults
//! 2. a TOML file (`config/mm_acquire.toml` unless another path is given)
//! 3. environment variables prefixed with `MM_ACQUIRE_`, using `__` between
//!    nesting levels, e.g. `MM_ACQUIRE_CACHE__RAM_CACHE=false`
//!
//! # Example
//! ```no_run
//! use mm_acquire::config::Config;
//!
//! let config = Config::load()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), figment::Error>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use mm_core::{MmError, MmResult};
use mm_storage::CacheOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/mm_acquire.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "MM_ACQUIRE_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Image cache settings
    #[serde(default)]
    pub cache: CacheConfig,
    /// Dataset location settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "mm_acquire".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Image cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Mirror images in RAM
    #[serde(default = "default_ram_cache")]
    pub ram_cache: bool,
    /// Pause between preloaded images in milliseconds
    #[serde(default = "default_preload_delay_ms")]
    pub preload_delay_ms: u64,
    /// Buffered images per tap
    #[serde(default = "default_tap_capacity")]
    pub tap_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ram_cache: default_ram_cache(),
            preload_delay_ms: default_preload_delay_ms(),
            tap_capacity: default_tap_capacity(),
        }
    }
}

impl CacheConfig {
    /// Options for [`mm_storage::ImageCache::with_options`].
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            ram_cache: self.ram_cache,
            preload_delay: Duration::from_millis(self.preload_delay_ms),
            tap_capacity: self.tap_capacity,
        }
    }
}

/// Dataset location configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory that receives dataset directories
    pub root: PathBuf,
    /// Default dataset name
    pub prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            prefix: "acq".to_string(),
        }
    }
}

// Default value functions
fn default_ram_cache() -> bool {
    true
}

fn default_preload_delay_ms() -> u64 {
    10
}

fn default_tap_capacity() -> usize {
    mm_storage::listener::DEFAULT_TAP_CAPACITY
}

impl Config {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and the environment still
    /// apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> MmResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(MmError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.cache.tap_capacity == 0 {
            return Err(MmError::Configuration(
                "cache.tap_capacity must be at least 1".to_string(),
            ));
        }

        if self.storage.prefix.trim().is_empty() {
            return Err(MmError::Configuration(
                "storage.prefix must not be empty".to_string(),
            ));
        }
        if self.storage.prefix.contains(['/', '\\']) {
            return Err(MmError::Configuration(format!(
                "storage.prefix '{}' must not contain path separators",
                self.storage.prefix
            )));
        }

        Ok(())
    }
}
