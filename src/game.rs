//! Game descriptors and the keys games are cached, served and loaded under.

use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};
use url::Url;

/// Version label for games without a published version.
pub const LOCAL_VERSION: &str = "LOCAL";

/// A plugin a game needs, with a semver range (`^1.0.0`, or `1.0.0` for an
/// exact pin).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub version: String,
}

impl Dependency {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// A game as the catalog (or a local manifest) describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameDescriptor {
    /// Catalog id; `None` for local, unpublished games
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Download URL for the content archive, possibly time-limited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<Url>,
}

impl GameDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            version: None,
            dependencies: Vec::new(),
            content_url: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.dependencies.push(Dependency::new(name, version));
        self
    }

    pub fn with_content_url(mut self, url: Url) -> Self {
        self.content_url = Some(url);
        self
    }

    /// Key the game is cached, served and unloaded under.
    pub fn key(&self) -> GameKey {
        GameKey::new(self.id.as_deref().unwrap_or(&self.name), self.version_label())
    }

    /// Key an override for this game is registered under (`name@version`).
    pub fn override_key(&self) -> GameKey {
        GameKey::new(&self.name, self.version_label())
    }

    fn version_label(&self) -> String {
        self.version
            .as_ref()
            .map(Version::to_string)
            .unwrap_or_else(|| LOCAL_VERSION.to_string())
    }
}

/// `ident@version`, where `ident` is the catalog id (or name for local
/// games) and `version` is the semver string or `LOCAL`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GameKey {
    pub ident: String,
    pub version: String,
}

impl GameKey {
    pub fn new(ident: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            ident: ident.into(),
            version: version.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.version == LOCAL_VERSION
    }
}

impl fmt::Display for GameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ident, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        let local = GameDescriptor::new("pong");
        assert_eq!(local.key().to_string(), "pong@LOCAL");
        assert!(local.key().is_local());

        let published = GameDescriptor::new("pong")
            .with_id("g_123")
            .with_version(Version::new(1, 0, 0));
        assert_eq!(published.key(), GameKey::new("g_123", "1.0.0"));
        assert_eq!(published.override_key(), GameKey::new("pong", "1.0.0"));
    }

    #[test]
    fn test_manifest_shape() {
        let game: GameDescriptor = serde_json::from_str(
            r#"{"name":"pong","version":"1.0.0","dependencies":[{"name":"@host/input-classic","version":"^1.0.0"}]}"#,
        )
        .unwrap();
        assert_eq!(game.version, Some(Version::new(1, 0, 0)));
        assert_eq!(game.dependencies, vec![Dependency::new("@host/input-classic", "^1.0.0")]);
        assert!(game.id.is_none());

        let bare: GameDescriptor = serde_json::from_str(r#"{"name":"snake"}"#).unwrap();
        assert!(bare.dependencies.is_empty());
    }
}
