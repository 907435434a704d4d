//! On-disk cache of extracted game bundles.
//!
//! Entries live at `root/<id>/<version>/`. An entry only appears through a
//! rename of a fully extracted staging directory, so a directory that
//! exists is a complete entry and a failed `ensure` leaves nothing behind.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flate2::read::GzDecoder;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::error::CacheError;

const ARCHIVE_NAME: &str = "game.tar.gz";
const CONTENT_DIR: &str = "content";

/// Bounds for fetching a content archive.
#[derive(Debug, Clone)]
pub struct DownloadPolicy {
    /// Per-attempt deadline, covering connect and body
    pub timeout: Duration,
    /// Extra attempts after a transient failure
    pub retries: u32,
    /// Delay before retry `n` is `backoff * n`
    pub backoff: Duration,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

enum Attempt {
    Retry(CacheError),
    Fatal(CacheError),
}

/// Game bundle cache rooted at one directory.
pub struct GameCache {
    root: PathBuf,
    policy: DownloadPolicy,
    http: reqwest::Client,
    in_flight: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl GameCache {
    pub fn new(root: impl Into<PathBuf>, policy: DownloadPolicy) -> Self {
        Self::with_client(root, policy, reqwest::Client::new())
    }

    /// Use a preconfigured HTTP client (proxies, custom TLS roots).
    pub fn with_client(root: impl Into<PathBuf>, policy: DownloadPolicy, http: reqwest::Client) -> Self {
        Self {
            root: root.into(),
            policy,
            http,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &DownloadPolicy {
        &self.policy
    }

    /// Directory an entry lives (or would live) in.
    pub fn path_for(&self, id: &str, version: &str) -> PathBuf {
        self.root.join(path_component(id)).join(path_component(version))
    }

    pub fn is_cached(&self, id: &str, version: &str) -> bool {
        self.path_for(id, version).is_dir()
    }

    /// Make sure the bundle for `id@version` is on disk, downloading and
    /// extracting it from `content_url` on a miss.
    pub async fn ensure(&self, id: &str, version: &str, content_url: &Url) -> Result<PathBuf, CacheError> {
        let target = self.path_for(id, version);
        if target.is_dir() {
            tracing::debug!(id, version, "Game cache hit");
            return Ok(target);
        }

        let lock = self.key_lock(&target);
        let _guard = lock.lock().await;
        let result = self.fill(id, version, content_url, &target).await;
        self.release_key(&target, &lock);
        result
    }

    async fn fill(&self, id: &str, version: &str, url: &Url, target: &Path) -> Result<PathBuf, CacheError> {
        // Another caller may have filled it while we waited.
        if target.is_dir() {
            return Ok(target.to_path_buf());
        }

        let parent = target.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(parent).await?;
        let staging = tempfile::Builder::new().prefix(".staging-").tempdir_in(parent)?;

        tracing::info!(id, version, url = %redact(url), "Downloading game");
        let archive = staging.path().join(ARCHIVE_NAME);
        let bytes = self.download(url, &archive).await?;

        let content = staging.path().join(CONTENT_DIR);
        let files = {
            let archive = archive.clone();
            let content = content.clone();
            tokio::task::spawn_blocking(move || extract_archive(&archive, &content))
                .await
                .map_err(|e| CacheError::Extract(e.to_string()))??
        };
        tokio::fs::remove_file(&archive).await?;
        tokio::fs::rename(&content, target).await?;

        tracing::info!(id, version, bytes, files, path = %target.display(), "Game cached");
        Ok(target.to_path_buf())
    }

    fn key_lock(&self, target: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.entry(target.to_path_buf()).or_default().clone()
    }

    fn release_key(&self, target: &Path, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        // Two references: the map's and ours. Anyone else is still queued.
        if Arc::strong_count(lock) <= 2 {
            in_flight.remove(target);
        }
    }

    async fn download(&self, url: &Url, dest: &Path) -> Result<u64, CacheError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.download_once(url, dest).await {
                Ok(bytes) => return Ok(bytes),
                Err(Attempt::Retry(e)) if attempt <= self.policy.retries => {
                    let delay = self.policy.backoff * attempt;
                    tracing::warn!(url = %redact(url), attempt, error = %e, ?delay, "Download failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(Attempt::Retry(e)) | Err(Attempt::Fatal(e)) => return Err(e),
            }
        }
    }

    async fn download_once(&self, url: &Url, dest: &Path) -> Result<u64, Attempt> {
        let failed = |reason: String| CacheError::Download {
            url: redact(url),
            reason,
        };

        let mut response = self
            .http
            .get(url.clone())
            .timeout(self.policy.timeout)
            .send()
            .await
            .map_err(|e| Attempt::Retry(failed(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let err = failed(format!("HTTP {status}"));
            // 4xx means an expired or revoked URL; asking again will not help.
            return Err(if status.is_client_error() {
                Attempt::Fatal(err)
            } else {
                Attempt::Retry(err)
            });
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Attempt::Fatal(e.into()))?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Attempt::Retry(failed(e.to_string())))?
        {
            file.write_all(&chunk).await.map_err(|e| Attempt::Fatal(e.into()))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| Attempt::Fatal(e.into()))?;

        if written == 0 {
            return Err(Attempt::Fatal(failed("empty response body".to_string())));
        }
        Ok(written)
    }
}

/// Map an id or version onto a single safe path component.
fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => format!("_{cleaned}"),
        _ => cleaned,
    }
}

/// Signed URLs carry credentials in the query string.
fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.set_fragment(None);
    shown.to_string()
}

/// Unpack a gzipped tarball into `dest`, dropping the archive's single
/// top-level directory. Returns the number of entries written.
fn extract_archive(archive: &Path, dest: &Path) -> Result<usize, CacheError> {
    let extract_err = |e: std::io::Error| CacheError::Extract(e.to_string());

    let file = File::open(archive)?;
    let mut tarball = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    fs::create_dir_all(dest)?;

    let mut written = 0;
    for entry in tarball.entries().map_err(extract_err)? {
        let mut entry = entry.map_err(extract_err)?;
        let path = entry.path().map_err(extract_err)?.into_owned();
        let Some(relative) = strip_top_level(&path)? else {
            continue;
        };

        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            tracing::warn!(path = %path.display(), "Skipping link in game archive");
            continue;
        }

        let out = dest.join(&relative);
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&out).map_err(extract_err)?;
        written += 1;
    }

    if written == 0 {
        return Err(CacheError::Extract("archive contains no files".to_string()));
    }
    Ok(written)
}

/// `pong/assets/a.png` → `assets/a.png`. `None` for the top-level
/// directory itself.
fn strip_top_level(path: &Path) -> Result<Option<PathBuf>, CacheError> {
    let mut normal = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normal.push(part),
            Component::CurDir => {}
            _ => {
                return Err(CacheError::Extract(format!(
                    "unsafe path in archive: {}",
                    path.display()
                )))
            }
        }
    }
    let relative: PathBuf = normal.into_iter().skip(1).collect();
    Ok((!relative.as_os_str().is_empty()).then_some(relative))
}
