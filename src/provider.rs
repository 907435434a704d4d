//! Where game descriptors and download URLs come from.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use semver::Version;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::error::ProviderError;
use crate::game::{Dependency, GameDescriptor};

/// Catalog of published games.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Every game visible to this cabinet, at its latest version.
    async fn list_games(&self) -> Result<Vec<GameDescriptor>, ProviderError>;

    /// A currently valid download URL for the latest version of `id`, or
    /// `None` if there is none (unpublished or expired).
    async fn content_url(&self, id: &str) -> Result<Option<Url>, ProviderError>;
}

/// A fixed list of games; content URLs are taken from the descriptors as is.
#[derive(Debug, Clone, Default)]
pub struct StaticContentProvider {
    games: Vec<GameDescriptor>,
}

impl StaticContentProvider {
    pub fn new(games: Vec<GameDescriptor>) -> Self {
        Self { games }
    }
}

#[async_trait]
impl ContentProvider for StaticContentProvider {
    async fn list_games(&self) -> Result<Vec<GameDescriptor>, ProviderError> {
        Ok(self.games.clone())
    }

    async fn content_url(&self, id: &str) -> Result<Option<Url>, ProviderError> {
        Ok(self
            .games
            .iter()
            .find(|g| g.id.as_deref() == Some(id))
            .and_then(|g| g.content_url.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct GameResponse {
    id: String,
    name: String,
    #[serde(default)]
    versions: Vec<VersionResponse>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
    #[serde(default)]
    dependencies: Vec<Dependency>,
    contents: Option<ContentsResponse>,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    url: String,
    /// Milliseconds since the Unix epoch
    expires: i64,
}

impl ContentsResponse {
    fn live_url(&self, now_ms: i64) -> Option<Url> {
        if now_ms > self.expires {
            return None;
        }
        Url::parse(&self.url).ok()
    }
}

impl GameResponse {
    fn latest(&self) -> Option<(Version, &VersionResponse)> {
        self.versions
            .iter()
            .filter_map(|v| Version::parse(&v.version).ok().map(|parsed| (parsed, v)))
            .max_by(|a, b| a.0.cmp(&b.0))
    }

    fn into_descriptor(self, now_ms: i64) -> GameDescriptor {
        let latest = self.latest().map(|(version, v)| {
            (
                version,
                v.dependencies.clone(),
                v.contents.as_ref().and_then(|c| c.live_url(now_ms)),
            )
        });
        let (version, dependencies, content_url) = match latest {
            Some((version, deps, url)) => (Some(version), deps, url),
            None => (None, Vec::new(), None),
        };
        GameDescriptor {
            id: Some(self.id),
            name: self.name,
            version,
            dependencies,
            content_url,
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Catalog client for the game web service.
#[derive(Debug, Clone)]
pub struct HttpContentProvider {
    base: Url,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl HttpContentProvider {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            api_key: None,
            http: reqwest::Client::new(),
        }
    }

    /// Authenticate as a cabinet.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let url = self.base.join(path)?;
        let mut request = self.http.get(url.clone());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ContentProvider for HttpContentProvider {
    async fn list_games(&self) -> Result<Vec<GameDescriptor>, ProviderError> {
        let games: Vec<GameResponse> = self.get_json("api/v1/games").await?;
        let now = now_ms();
        tracing::debug!(count = games.len(), "Fetched game catalog");
        Ok(games.into_iter().map(|g| g.into_descriptor(now)).collect())
    }

    async fn content_url(&self, id: &str) -> Result<Option<Url>, ProviderError> {
        let game: GameResponse = self.get_json(&format!("api/v1/games/{id}")).await?;
        Ok(game.into_descriptor(now_ms()).content_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    fn game_json(expires: i64) -> Value {
        json!({
            "id": "g1",
            "name": "pong",
            "git": {"ssh": "", "https": ""},
            "owner_rc_id": "1",
            "versions": [
                {"version": "1.2.0", "description": "", "visibility": "public", "authors": [],
                 "dependencies": [{"name": "@host/input-classic", "version": "1.0.0"}],
                 "categories": [], "contents": {"url": "http://cdn.test/pong-1.2.0.tar.gz", "expires": expires}},
                {"version": "1.10.0", "description": "", "visibility": "public", "authors": [],
                 "dependencies": [], "categories": [],
                 "contents": {"url": "http://cdn.test/pong-1.10.0.tar.gz", "expires": expires}},
                {"version": "not-semver", "dependencies": []}
            ]
        })
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer cabinet-key")
    }

    async fn list(headers: HeaderMap) -> Response {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Json(json!([game_json(i64::MAX)])).into_response()
    }

    async fn one(Path(id): Path<String>) -> Response {
        match id.as_str() {
            "g1" => Json(game_json(0)).into_response(),
            _ => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn catalog() -> Url {
        let app = Router::new()
            .route("/api/v1/games", get(list))
            .route("/api/v1/games/{id}", get(one));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[tokio::test]
    async fn test_lists_latest_versions() {
        let provider = HttpContentProvider::new(catalog().await).with_api_key("cabinet-key");
        let games = provider.list_games().await.unwrap();
        assert_eq!(games.len(), 1);
        let pong = &games[0];
        assert_eq!(pong.id.as_deref(), Some("g1"));
        // Semver order, not string order.
        assert_eq!(pong.version, Some(Version::new(1, 10, 0)));
        assert!(pong.dependencies.is_empty());
        assert_eq!(
            pong.content_url.as_ref().map(Url::as_str),
            Some("http://cdn.test/pong-1.10.0.tar.gz")
        );
    }

    #[tokio::test]
    async fn test_status_errors_and_expiry() {
        let base = catalog().await;

        let anonymous = HttpContentProvider::new(base.clone());
        assert!(matches!(
            anonymous.list_games().await,
            Err(ProviderError::Status { status: 401, .. })
        ));

        let provider = HttpContentProvider::new(base);
        // Expired at the epoch.
        assert_eq!(provider.content_url("g1").await.unwrap(), None);
        assert!(matches!(
            provider.content_url("missing").await,
            Err(ProviderError::Status { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_static_provider() {
        let url = Url::parse("http://cdn.test/a.tar.gz").unwrap();
        let provider = StaticContentProvider::new(vec![GameDescriptor::new("a")
            .with_id("a1")
            .with_content_url(url.clone())]);
        assert_eq!(provider.list_games().await.unwrap().len(), 1);
        assert_eq!(provider.content_url("a1").await.unwrap(), Some(url));
        assert_eq!(provider.content_url("b").await.unwrap(), None);
    }
}
