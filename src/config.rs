//! Tuning knobs for an embedded hub instance.
//!
//! Sizing mirrors a bounded deployment: allocation pools have fixed
//! capacities chosen up front, and the snapshot machinery is bounded by a
//! configurable pass limit. Values load from a TOML file (explicit path, then
//! the user config directory, then built-in defaults).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Byte capacity of medium-tier pooled strings.
pub const MED_STRING_BYTES: usize = 300;
/// Byte capacity of small-tier pooled strings.
pub const SMALL_STRING_BYTES: usize = 50;

/// Default byte capacity of large-tier pooled strings (and so the largest
/// accepted textual payload).
pub const DEFAULT_MAX_STRING_BYTES: usize = 50_000;
/// Default number of data sample slots.
pub const DEFAULT_SAMPLE_POOL_SIZE: usize = 1000;
/// Default number of large string pool entries.
pub const DEFAULT_LARGE_STRING_POOL_SIZE: usize = 5;
/// Default byte capacity of the snapshot stream pipe.
pub const DEFAULT_PIPE_CAPACITY: usize = 4096;
/// Default upper limit on formatter-requested passes through the tree.
pub const DEFAULT_MAX_PASSES: u32 = 10;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// Hub instance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    /// Largest accepted textual payload, which is also the large string pool
    /// tier size and the formatter buffer size.
    pub max_string_bytes: usize,
    /// Number of data sample slots available before allocation is fatal.
    pub sample_pool_size: usize,
    /// Number of large string pool entries.
    pub large_string_pool_size: usize,
    /// Byte capacity of the snapshot stream pipe.
    pub pipe_capacity: usize,
    /// Upper limit on the number of passes a formatter may request.
    pub max_passes: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_string_bytes: DEFAULT_MAX_STRING_BYTES,
            sample_pool_size: DEFAULT_SAMPLE_POOL_SIZE,
            large_string_pool_size: DEFAULT_LARGE_STRING_POOL_SIZE,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

impl HubConfig {
    /// Loads configuration from `explicit` if given, else from the default
    /// config location, else returns built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(default_config_path);
        match path {
            Some(config_path) if config_path.exists() => read_file(&config_path),
            _ => Ok(Self::default()),
        }
    }

    /// Number of medium string pool entries, derived so the medium tier
    /// occupies half the byte capacity of the large tier.
    pub fn medium_string_pool_size(&self) -> usize {
        ((self.large_string_pool_size / 2) * self.max_string_bytes) / MED_STRING_BYTES
    }

    /// Number of small string pool entries, half the byte capacity of the
    /// medium tier.
    pub fn small_string_pool_size(&self) -> usize {
        ((self.medium_string_pool_size() / 2) * MED_STRING_BYTES) / SMALL_STRING_BYTES
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("datahub").join("config.toml"))
}

fn read_file(path: &Path) -> Result<HubConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
