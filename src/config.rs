//! Game host configuration.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::cache::DownloadPolicy;
use crate::channel::DEFAULT_CHANNEL_TIMEOUT;
use crate::plugin::PluginSettings;

pub const ENV_CACHE_DIR: &str = "ARCADE_CACHE_DIR";
pub const ENV_API_URL: &str = "ARCADE_API_URL";
pub const ENV_API_KEY: &str = "ARCADE_API_KEY";
pub const ENV_HID_DEVICE: &str = "ARCADE_HID_DEVICE";

/// Configuration for the game host.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Directory where extracted games are cached
    pub cache_dir: PathBuf,

    /// Catalog service base URL (None = local manifests and overrides only)
    pub api_url: Option<Url>,

    /// Cabinet API key for the catalog
    pub api_key: Option<String>,

    /// Per-attempt deadline for content downloads
    pub download_timeout: Duration,

    /// Retries after a transient download failure
    pub download_retries: u32,

    /// How long a game waits for a plugin channel
    pub channel_timeout: Duration,

    /// Raw HID device for cabinet controls
    pub hid_device: Option<PathBuf>,

    /// Spinner steps per revolution
    pub step_resolution: u32,

    /// `name@version=url` development overrides
    pub overrides: Vec<String>,
}

impl HostConfig {
    /// Create a new configuration with the given cache directory.
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            ..Self::default()
        }
    }

    /// Defaults, then anything set in the `ARCADE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = std::env::var_os(ENV_CACHE_DIR) {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(raw) = std::env::var(ENV_API_URL) {
            match Url::parse(&raw) {
                Ok(url) => config.api_url = Some(url),
                Err(e) => tracing::warn!(var = ENV_API_URL, error = %e, "Ignoring invalid catalog URL"),
            }
        }
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            config.api_key = Some(key);
        }
        if let Some(device) = std::env::var_os(ENV_HID_DEVICE) {
            config.hid_device = Some(PathBuf::from(device));
        }
        config
    }

    /// Set the catalog URL.
    pub fn with_api(mut self, url: Url) -> Self {
        self.api_url = Some(url);
        self
    }

    /// Set the catalog API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the download deadline and retry budget.
    pub fn with_download_policy(mut self, timeout: Duration, retries: u32) -> Self {
        self.download_timeout = timeout;
        self.download_retries = retries;
        self
    }

    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout = timeout;
        self
    }

    /// Read cabinet controls from a HID device.
    pub fn with_hid_device(mut self, device: impl Into<PathBuf>) -> Self {
        self.hid_device = Some(device.into());
        self
    }

    /// Add a development override.
    pub fn with_override(mut self, spec: impl Into<String>) -> Self {
        self.overrides.push(spec.into());
        self
    }

    /// Add multiple overrides.
    pub fn with_overrides(mut self, specs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.overrides.extend(specs.into_iter().map(Into::into));
        self
    }

    pub fn download_policy(&self) -> DownloadPolicy {
        DownloadPolicy {
            timeout: self.download_timeout,
            retries: self.download_retries,
            ..DownloadPolicy::default()
        }
    }

    pub fn plugin_settings(&self) -> PluginSettings {
        PluginSettings {
            hid_device: self.hid_device.clone(),
            step_resolution: self.step_resolution,
        }
    }

    /// Ensure directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.cache_dir)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        // Use platform-appropriate default directories
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        let download = DownloadPolicy::default();
        let plugins = PluginSettings::default();

        Self {
            cache_dir: cache_dir.join("arcade-host").join("games"),
            api_url: None,
            api_key: None,
            download_timeout: download.timeout,
            download_retries: download.retries,
            channel_timeout: DEFAULT_CHANNEL_TIMEOUT,
            hid_device: plugins.hid_device,
            step_resolution: plugins.step_resolution,
            overrides: Vec::new(),
        }
    }
}
