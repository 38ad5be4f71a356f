//! Configuration types for transfer operations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::TransferKind;

/// Configuration for transfer operations.
///
/// Every field has a default, so a TOML file only needs to name the values it
/// overrides:
///
/// ```toml
/// download_debounce_ms = 250
/// user_agent = "my-tool/1.0"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Minimum spacing between progress events of a download, in milliseconds.
    pub download_debounce_ms: u64,
    /// Minimum spacing between progress events of an in-memory upload, in milliseconds.
    pub upload_debounce_ms: u64,
    /// Minimum spacing between progress events of a file upload, in milliseconds.
    pub file_upload_debounce_ms: u64,
    /// Publish the first known total size without waiting for the debounce window.
    pub seed_expected_immediately: bool,
    /// Capacity of the per-transfer event channel.
    pub event_buffer: usize,
    /// Size of the slices an in-memory upload body is sent in.
    pub chunk_size: usize,
    /// Directory for temporary download files. Uses the system default when unset.
    pub temp_dir: Option<PathBuf>,
    /// TCP connect timeout for the HTTP client, in seconds.
    pub connect_timeout_secs: u64,
    /// `User-Agent` header sent by the HTTP client.
    pub user_agent: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_debounce_ms: 100,
            upload_debounce_ms: 100,
            file_upload_debounce_ms: 1,
            seed_expected_immediately: true,
            event_buffer: 32,
            chunk_size: 64 * 1024,
            temp_dir: None,
            connect_timeout_secs: 30,
            user_agent: concat!("rxfer/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TransferConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text is not valid TOML for this type.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Loads the configuration from [`default_path`](Self::default_path),
    /// falling back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                log::debug!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Location of the user configuration file.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rxfer").join("config.toml"))
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Returns the debounce interval used for a transfer kind.
    #[must_use]
    pub const fn debounce_for(&self, kind: TransferKind) -> Duration {
        let ms = match kind {
            TransferKind::Download => self.download_debounce_ms,
            TransferKind::Upload => self.upload_debounce_ms,
            TransferKind::FileUpload => self.file_upload_debounce_ms,
        };
        Duration::from_millis(ms)
    }

    /// Sets the debounce interval for a transfer kind.
    ///
    /// The interval is stored in whole milliseconds, rounded up, so a
    /// non-zero interval never disables throttling.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_debounce(mut self, kind: TransferKind, interval: Duration) -> Self {
        let ms = interval.as_nanos().div_ceil(1_000_000);
        let ms = if ms > u64::MAX as u128 { u64::MAX } else { ms as u64 };
        match kind {
            TransferKind::Download => self.download_debounce_ms = ms,
            TransferKind::Upload => self.upload_debounce_ms = ms,
            TransferKind::FileUpload => self.file_upload_debounce_ms = ms,
        }
        self
    }

    /// Sets whether the first known total size skips the debounce window.
    #[must_use]
    pub const fn with_seed_expected_immediately(mut self, seed: bool) -> Self {
        self.seed_expected_immediately = seed;
        self
    }

    /// Sets the event channel capacity.
    #[must_use]
    pub const fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Sets the upload slice size.
    #[must_use]
    pub const fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the directory for temporary download files.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Channel capacity, never zero.
    pub(crate) fn event_capacity(&self) -> usize {
        self.event_buffer.max(1)
    }
}
