//! Loads and unloads games: cache, content server and plugin session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::GameCache;
use crate::channel::{self, ChannelClient};
use crate::config::HostConfig;
use crate::error::{HostError, Result};
use crate::game::{GameDescriptor, GameKey};
use crate::overrides::OverrideTable;
use crate::plugin::{PluginHandle, PluginManager, PluginRegistry, PluginSettings, PluginState, RenderSurface};
use crate::provider::{ContentProvider, HttpContentProvider};
use crate::server::GameServerRegistry;

/// A game ready to be shown.
pub struct LoadedGame {
    /// Where the game's content is served
    pub url: Url,
    pub key: GameKey,
    /// Control link the game uses to acquire plugin channels
    pub channels: ChannelClient,
}

struct Session {
    manager: Arc<PluginManager>,
    cancel: CancellationToken,
    broker: JoinHandle<()>,
}

impl Session {
    async fn end(self, key: &GameKey) {
        self.manager.destroy();
        self.cancel.cancel();
        if let Err(e) = self.broker.await {
            tracing::warn!(%key, error = %e, "Channel broker ended abnormally");
        }
        tracing::debug!(%key, "Plugin session ended");
    }
}

/// Coordinates the cache, content servers and plugin sessions.
pub struct HostOrchestrator {
    cache: GameCache,
    servers: GameServerRegistry,
    registry: Arc<PluginRegistry>,
    provider: Option<Arc<dyn ContentProvider>>,
    overrides: OverrideTable,
    settings: Arc<PluginSettings>,
    channel_timeout: Duration,
    sessions: Mutex<HashMap<GameKey, Session>>,
    // Loads and unloads of one key run one at a time.
    transitions: Mutex<HashMap<GameKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl HostOrchestrator {
    /// Build a host from configuration, with the builtin plugins and, if an
    /// API URL is configured, the HTTP catalog.
    pub fn new(config: &HostConfig) -> Self {
        let provider = config.api_url.clone().map(|url| {
            let mut provider = HttpContentProvider::new(url);
            if let Some(key) = &config.api_key {
                provider = provider.with_api_key(key.clone());
            }
            Arc::new(provider) as Arc<dyn ContentProvider>
        });

        let overrides = OverrideTable::from_specs(&config.overrides);
        let servers = GameServerRegistry::new();
        for (key, url) in overrides.iter() {
            servers.register_override(key.clone(), url.clone());
        }

        Self {
            cache: GameCache::new(&config.cache_dir, config.download_policy()),
            servers,
            registry: Arc::new(PluginRegistry::builtin()),
            provider,
            overrides,
            settings: Arc::new(config.plugin_settings()),
            channel_timeout: config.channel_timeout,
            sessions: Mutex::new(HashMap::new()),
            transitions: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the game catalog.
    pub fn with_provider(mut self, provider: Arc<dyn ContentProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Replace the installed plugin table.
    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn cache(&self) -> &GameCache {
        &self.cache
    }

    pub fn servers(&self) -> &GameServerRegistry {
        &self.servers
    }

    pub fn overrides(&self) -> &OverrideTable {
        &self.overrides
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<GameKey, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key_lock(&self, key: &GameKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut transitions = self.transitions.lock().unwrap_or_else(|e| e.into_inner());
        transitions.entry(key.clone()).or_default().clone()
    }

    fn release_key(&self, key: &GameKey, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut transitions = self.transitions.lock().unwrap_or_else(|e| e.into_inner());
        // Two references: the map's and ours. Anyone else is still queued.
        if Arc::strong_count(lock) <= 2 {
            transitions.remove(key);
        }
    }

    /// Games available from the catalog. Empty without one.
    pub async fn get_games(&self) -> Result<Vec<GameDescriptor>> {
        match &self.provider {
            Some(provider) => Ok(provider.list_games().await?),
            None => Ok(Vec::new()),
        }
    }

    /// Make `descriptor` playable on `surface` and return where it is served.
    ///
    /// Overrides short-circuit the cache and server. Loading a key that is
    /// already loaded replaces its plugin session and reuses its server;
    /// concurrent loads of one key run in turn, the last one wins.
    pub async fn load_game(&self, descriptor: &GameDescriptor, surface: Arc<RenderSurface>) -> Result<LoadedGame> {
        let key = descriptor.key();
        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.load_locked(descriptor, surface, key.clone()).await
        };
        self.release_key(&key, &lock);
        result
    }

    async fn load_locked(&self, descriptor: &GameDescriptor, surface: Arc<RenderSurface>, key: GameKey) -> Result<LoadedGame> {
        tracing::info!(%key, "Loading game");

        let previous = self.sessions().remove(&key);
        if let Some(session) = previous {
            session.end(&key).await;
        }

        let (url, served) = match self.overrides.get(&descriptor.override_key()) {
            Some(url) => {
                tracing::info!(%key, %url, "Using override");
                (url.clone(), false)
            }
            None => {
                let dir = self.ensure_content(descriptor, &key).await?;
                (self.servers.start(&key, &dir).await?, true)
            }
        };

        let cancel = CancellationToken::new();
        let manager = PluginManager::load_into(
            self.registry.clone(),
            surface,
            self.settings.clone(),
            &descriptor.dependencies,
            cancel.clone(),
        );
        let manager = match manager {
            Ok(manager) => Arc::new(manager),
            Err(e) => {
                tracing::warn!(%key, error = %e, "Plugin resolution failed, aborting load");
                if served {
                    self.servers.stop(&key).await;
                }
                return Err(e.into());
            }
        };

        let (channels, broker) = channel::link(self.channel_timeout);
        let broker = broker.spawn(manager.clone(), cancel.clone());
        let displaced = self.sessions().insert(
            key.clone(),
            Session {
                manager,
                cancel,
                broker,
            },
        );
        if let Some(session) = displaced {
            tracing::warn!(%key, "Replaced a plugin session loaded concurrently");
            session.end(&key).await;
        }

        tracing::info!(%key, %url, "Game loaded");
        Ok(LoadedGame { url, key, channels })
    }

    async fn ensure_content(&self, descriptor: &GameDescriptor, key: &GameKey) -> Result<PathBuf> {
        if key.is_local() {
            return Err(HostError::UnknownGame(key.to_string()));
        }
        if self.cache.is_cached(&key.ident, &key.version) {
            // A cached game needs no (possibly expired) URL.
            return Ok(self.cache.path_for(&key.ident, &key.version));
        }

        let url = self
            .content_url(descriptor)
            .await?
            .ok_or_else(|| HostError::ContentUnavailable(key.to_string()))?;
        Ok(self.cache.ensure(&key.ident, &key.version, &url).await?)
    }

    /// A fresh URL from the catalog when the game is published, else the
    /// one the descriptor carries.
    async fn content_url(&self, descriptor: &GameDescriptor) -> Result<Option<Url>> {
        match (&self.provider, &descriptor.id) {
            (Some(provider), Some(id)) => Ok(provider.content_url(id).await?),
            _ => Ok(descriptor.content_url.clone()),
        }
    }

    /// Stop a game's plugin session and content server. The cache entry
    /// stays.
    pub async fn unload_game(&self, ident: &str, version: &str) {
        let key = GameKey::new(ident, version);
        let lock = self.key_lock(&key);
        {
            let _guard = lock.lock().await;
            let session = self.sessions().remove(&key);
            match session {
                Some(session) => session.end(&key).await,
                None => tracing::debug!(%key, "No plugin session to end"),
            }
            self.servers.stop(&key).await;
        }
        self.release_key(&key, &lock);
        tracing::info!(%key, "Game unloaded");
    }

    pub fn is_loaded(&self, key: &GameKey) -> bool {
        self.sessions().contains_key(key)
    }

    /// Plugin instances of a loaded game.
    pub fn plugin_instances(&self, key: &GameKey) -> Vec<(PluginHandle, PluginState)> {
        self.sessions()
            .get(key)
            .map(|s| s.manager.instances())
            .unwrap_or_default()
    }

    /// Unload everything.
    pub async fn shutdown(&self) {
        let sessions: Vec<(GameKey, Session)> = self.sessions().drain().collect();
        for (key, session) in sessions {
            session.end(&key).await;
        }
        self.servers.stop_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use crate::plugin::INPUT_CLASSIC;
    use semver::Version;

    fn host(dir: &tempfile::TempDir) -> HostOrchestrator {
        let config = HostConfig::new(dir.path().join("games"))
            .with_override("pong@LOCAL=http://localhost:5173")
            .with_override("not an override");
        HostOrchestrator::new(&config)
    }

    fn seed_cache(host: &HostOrchestrator, ident: &str, version: &str) {
        let path = host.cache().path_for(ident, version);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("index.html"), "<html><head></head></html>").unwrap();
    }

    #[tokio::test]
    async fn test_override_bypasses_cache_and_server() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(&dir);
        assert_eq!(host.overrides().len(), 1);

        let game = GameDescriptor::new("pong").with_dependency(INPUT_CLASSIC, "^1.0.0");
        let loaded = host.load_game(&game, Arc::new(RenderSurface::new("pong"))).await.unwrap();

        assert_eq!(loaded.url.as_str(), "http://localhost:5173/");
        assert!(!dir.path().join("games").exists());
        assert!(!host.servers().is_running(&loaded.key));
        assert!(host.is_loaded(&loaded.key));

        host.unload_game("pong", "LOCAL").await;
        assert!(!host.is_loaded(&loaded.key));
    }

    #[tokio::test]
    async fn test_local_game_without_override_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(&dir);
        let err = host
            .load_game(&GameDescriptor::new("snake"), Arc::new(RenderSurface::default()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HostError::UnknownGame(key) if key == "snake@LOCAL"));
    }

    #[tokio::test]
    async fn test_uncached_without_url_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(&dir);
        let game = GameDescriptor::new("snake").with_version(Version::new(1, 0, 0));
        let err = host
            .load_game(&game, Arc::new(RenderSurface::default()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HostError::ContentUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cached_game_loads_without_url() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(&dir);
        seed_cache(&host, "g1", "2.0.0");

        let game = GameDescriptor::new("snake")
            .with_id("g1")
            .with_version(Version::new(2, 0, 0))
            .with_dependency(INPUT_CLASSIC, "1.0.0");
        let loaded = host.load_game(&game, Arc::new(RenderSurface::default())).await.unwrap();
        assert_eq!(loaded.key, GameKey::new("g1", "2.0.0"));
        assert!(host.servers().is_running(&loaded.key));

        let channel = loaded.channels.acquire(INPUT_CLASSIC, "^1.0.0").await.unwrap();
        assert_eq!(channel.version, "1.0.0");
        assert_eq!(host.plugin_instances(&loaded.key)[0].1, PluginState::Started);

        // Reloading keeps the server and replaces the plugin session.
        let again = host.load_game(&game, Arc::new(RenderSurface::default())).await.unwrap();
        assert_eq!(again.url, loaded.url);
        assert_eq!(host.plugin_instances(&loaded.key)[0].1, PluginState::Stopped);
        assert!(loaded.channels.acquire(INPUT_CLASSIC, "^1.0.0").await.is_err());

        host.shutdown().await;
        assert!(!host.servers().is_running(&loaded.key));
        assert!(host.cache().is_cached("g1", "2.0.0"));
    }

    #[tokio::test]
    async fn test_overlapping_loads_leave_one_session() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(&dir);
        seed_cache(&host, "g1", "1.0.0");
        let surface = Arc::new(RenderSurface::new("main"));

        let game = GameDescriptor::new("snake")
            .with_id("g1")
            .with_version(Version::new(1, 0, 0))
            .with_dependency(INPUT_CLASSIC, "^1.0.0");
        let (a, b) = tokio::join!(
            host.load_game(&game, surface.clone()),
            host.load_game(&game, surface.clone())
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.url, b.url);

        let acquired = [
            a.channels.acquire(INPUT_CLASSIC, "^1.0.0").await,
            b.channels.acquire(INPUT_CLASSIC, "^1.0.0").await,
        ];
        assert_eq!(acquired.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(surface.listener_count(), 1);

        host.unload_game("g1", "1.0.0").await;
        assert_eq!(surface.listener_count(), 0);
        assert!(a.channels.acquire(INPUT_CLASSIC, "^1.0.0").await.is_err());
        assert!(b.channels.acquire(INPUT_CLASSIC, "^1.0.0").await.is_err());
        assert!(!host.is_loaded(&game.key()));
        assert!(host.transitions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsatisfiable_plugin_fails_load_and_stops_server() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(&dir);
        seed_cache(&host, "g1", "1.0.0");

        let game = GameDescriptor::new("snake")
            .with_id("g1")
            .with_version(Version::new(1, 0, 0))
            .with_dependency(INPUT_CLASSIC, "^2.0.0");
        let err = host
            .load_game(&game, Arc::new(RenderSurface::default()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HostError::Plugin(PluginError::VersionMismatch { .. })));
        assert!(!host.servers().is_running(&game.key()));
        assert!(!host.is_loaded(&game.key()));
    }
}
