//! Error types for game host operations.

use semver::{Version, VersionReq};
use thiserror::Error;

/// Errors from the local game cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Fetching the game archive failed
    #[error("Download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    /// Unpacking the game archive failed
    #[error("Failed to extract game archive: {0}")]
    Extract(String),

    /// IO error while preparing the cache directory
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the local content servers.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The OS refused to hand out a loopback port
    #[error("No local port available: {0}")]
    PortUnavailable(#[source] std::io::Error),

    /// Binding or serving failed for another reason
    #[error("Failed to start content server: {0}")]
    ListenFailed(#[source] std::io::Error),
}

/// Errors from plugin resolution, lifecycle and channel acquisition.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No installed plugin with that name
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    /// The installed implementation does not satisfy the requested range
    #[error("Version mismatch for {name}: has {have}, expected {want}")]
    VersionMismatch {
        name: String,
        have: Version,
        want: VersionReq,
    },

    /// The requested version range could not be parsed
    #[error("Invalid version range '{range}': {source}")]
    InvalidVersionRange {
        range: String,
        #[source]
        source: semver::Error,
    },

    /// The plugin's start entry point failed
    #[error("Plugin {name} failed to start: {reason}")]
    StartFailed { name: String, reason: String },

    /// No channel arrived before the client-side deadline
    #[error("Timeout waiting for plugin channel: {name}@{version} (nonce: {nonce})")]
    ChannelTimeout {
        name: String,
        version: String,
        nonce: String,
    },

    /// The host answered the acquisition with an explicit error
    #[error("Plugin channel denied: {0}")]
    ChannelDenied(String),

    /// The other side of a channel or control link went away
    #[error("Plugin channel closed")]
    ChannelClosed,
}

/// Errors from the shared-memory input region.
#[derive(Debug, Error)]
pub enum ShmemError {
    /// Mapping or sizing the backing file failed
    #[error("Shared memory IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The region is too small for the requested field
    #[error("Shared memory region too small: need {required} data bytes, have {actual}")]
    RegionTooSmall { required: usize, actual: usize },
}

/// A malformed `name@version=url` override.
#[derive(Debug, Error)]
#[error("Invalid override '{spec}': {reason}")]
pub struct OverrideError {
    pub spec: String,
    pub reason: String,
}

/// Errors talking to the remote game catalog.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport or decode failure
    #[error("Catalog request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The catalog answered with a non-success status
    #[error("Catalog returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// The catalog base URL could not be joined with a path
    #[error("Invalid catalog URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Errors that can occur during game host operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// Game cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Content server error
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Plugin error
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Shared memory error
    #[error(transparent)]
    Shmem(#[from] ShmemError),

    /// Catalog error
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Malformed override
    #[error(transparent)]
    InvalidOverride(#[from] OverrideError),

    /// No usable (unexpired) content URL for an uncached game
    #[error("No content URL available for {0}")]
    ContentUnavailable(String),

    /// Game has neither an id nor an override to address it by
    #[error("Game {0} is not published and has no override")]
    UnknownGame(String),

    /// Manifest could not be decoded
    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for game host operations
pub type Result<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_message() {
        let err = PluginError::VersionMismatch {
            name: "@host/input-classic".into(),
            have: Version::new(1, 2, 0),
            want: VersionReq::parse("^2.0.0").unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "Version mismatch for @host/input-classic: has 1.2.0, expected ^2.0.0"
        );
    }

    #[test]
    fn test_timeout_distinct_from_denial() {
        let timeout = PluginError::ChannelTimeout {
            name: "a".into(),
            version: "1".into(),
            nonce: "n".into(),
        };
        let denied = PluginError::ChannelDenied("Unknown plugin: a".into());
        assert!(matches!(timeout, PluginError::ChannelTimeout { .. }));
        assert!(matches!(denied, PluginError::ChannelDenied(_)));
        assert_ne!(timeout.to_string(), denied.to_string());
    }

    #[test]
    fn test_host_error_is_transparent() {
        let err: HostError = CacheError::Extract("bad gzip header".into()).into();
        assert_eq!(err.to_string(), "Failed to extract game archive: bad gzip header");
        assert!(matches!(err, HostError::Cache(CacheError::Extract(_))));
    }

    #[test]
    fn test_override_error_message() {
        let err = OverrideError {
            spec: "pong=http://x".into(),
            reason: "expected package@version".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid override 'pong=http://x': expected package@version"
        );
    }
}
