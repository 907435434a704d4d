//! Installed plugin table: capability name to implementation version and
//! factory.

use std::collections::HashMap;

use semver::{Version, VersionReq};

use super::input_classic::{InputClassic, INPUT_CLASSIC};
use super::input_spinners::{InputSpinners, INPUT_SPINNERS};
use super::Plugin;
use crate::error::PluginError;

/// Constructor for a fresh, unstarted plugin.
pub type PluginFactory = fn() -> Box<dyn Plugin>;

/// Name and implementation version of an installed plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: Version,
}

struct Installed {
    descriptor: PluginDescriptor,
    factory: PluginFactory,
}

/// Plugins available to sessions. Read-only once built.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Installed>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the builtin input plugins.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(INPUT_CLASSIC, Version::new(1, 0, 0), || Box::new(InputClassic::new()));
        registry.register(INPUT_SPINNERS, Version::new(1, 0, 0), || {
            Box::new(InputSpinners::new())
        });
        registry
    }

    /// Install (or replace) a plugin
    pub fn register(&mut self, name: impl Into<String>, version: Version, factory: PluginFactory) {
        let name = name.into();
        tracing::debug!(plugin = %name, %version, "Registered plugin");
        self.plugins.insert(
            name.clone(),
            Installed {
                descriptor: PluginDescriptor { name, version },
                factory,
            },
        );
    }

    pub fn descriptor(&self, name: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(name).map(|p| &p.descriptor)
    }

    /// All installed plugins, sorted by name
    pub fn list(&self) -> Vec<PluginDescriptor> {
        let mut all: Vec<_> = self.plugins.values().map(|p| p.descriptor.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Check `range` against the installed version and build a fresh instance.
    pub fn create(&self, name: &str, range: &str) -> Result<(PluginDescriptor, Box<dyn Plugin>), PluginError> {
        let installed = self
            .plugins
            .get(name)
            .ok_or_else(|| PluginError::UnknownPlugin(name.to_string()))?;
        let want = parse_range(range)?;
        if !want.matches(&installed.descriptor.version) {
            return Err(PluginError::VersionMismatch {
                name: name.to_string(),
                have: installed.descriptor.version.clone(),
                want,
            });
        }
        Ok((installed.descriptor.clone(), (installed.factory)()))
    }

    /// Whether `name` is installed at a version satisfying `range`.
    pub fn resolve(&self, name: &str, range: &str) -> Result<&PluginDescriptor, PluginError> {
        let installed = self
            .plugins
            .get(name)
            .ok_or_else(|| PluginError::UnknownPlugin(name.to_string()))?;
        let want = parse_range(range)?;
        if want.matches(&installed.descriptor.version) {
            Ok(&installed.descriptor)
        } else {
            Err(PluginError::VersionMismatch {
                name: name.to_string(),
                have: installed.descriptor.version.clone(),
                want,
            })
        }
    }
}

/// Parse a dependency range.
///
/// A bare version (`1.0.0`) pins that exact version; anything with an
/// operator (`^1.0.0`, `>=1, <2`, `*`) is a regular range.
pub fn parse_range(range: &str) -> Result<VersionReq, PluginError> {
    let trimmed = range.trim();
    let invalid = |source| PluginError::InvalidVersionRange {
        range: range.to_string(),
        source,
    };
    if let Ok(exact) = Version::parse(trimmed) {
        return VersionReq::parse(&format!("={exact}")).map_err(invalid);
    }
    VersionReq::parse(trimmed).map_err(invalid)
}
