//! Development overrides: `name@version=url` pairs that route a game to an
//! externally hosted dev server instead of the cache and local server.

use std::collections::HashMap;
use std::str::FromStr;

use url::Url;

use crate::error::OverrideError;
use crate::game::GameKey;

/// One parsed override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub key: GameKey,
    pub url: Url,
}

impl Override {
    /// Parse `name@version=url`. The first `=` separates key and URL, the
    /// first `@` after a leading scope separates name and version.
    pub fn parse(spec: &str) -> Result<Self, OverrideError> {
        let invalid = |reason: &str| OverrideError {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (package, url) = spec.split_once('=').ok_or_else(|| invalid("expected package@version=url"))?;
        // `@scope/name@1.0.0`: the scope's `@` is part of the name.
        let split_at = package
            .char_indices()
            .skip(1)
            .find(|&(_, c)| c == '@')
            .map(|(i, _)| i)
            .ok_or_else(|| invalid("expected package@version"))?;
        let (name, version) = (&package[..split_at], &package[split_at + 1..]);

        if name.is_empty() || version.is_empty() {
            return Err(invalid("package name and version are both required"));
        }
        let url = Url::parse(url.trim()).map_err(|e| invalid(&format!("invalid url: {e}")))?;

        Ok(Self {
            key: GameKey::new(name, version),
            url,
        })
    }
}

impl FromStr for Override {
    type Err = OverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Overrides by `name@version`.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: HashMap<GameKey, Url>,
}

impl OverrideTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every spec, logging and skipping malformed ones.
    pub fn from_specs<I, S>(specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::new();
        for spec in specs {
            match Override::parse(spec.as_ref()) {
                Ok(entry) => table.insert(entry),
                Err(e) => tracing::warn!(error = %e, "Skipping override"),
            }
        }
        table
    }

    pub fn insert(&mut self, entry: Override) {
        self.entries.insert(entry.key, entry.url);
    }

    pub fn get(&self, key: &GameKey) -> Option<&Url> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GameKey, &Url)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
