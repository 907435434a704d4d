//! Per-session plugin manager.
//!
//! A session owns at most one instance per capability name. Channels to a
//! capability share that instance: the first `start` runs the plugin, later
//! ones attach another port to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use semver::Version;
use tokio_util::sync::CancellationToken;

use super::instance::{Instance, PluginState, Started, Stopped};
use super::registry::{parse_range, PluginRegistry};
use super::{PluginEnvironment, PluginSettings, RenderSurface};
use crate::channel::{self, ChannelEnd};
use crate::error::PluginError;
use crate::game::Dependency;

/// Reference to a loaded instance within one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginHandle {
    pub id: usize,
    pub name: String,
    pub version: Version,
}

enum Lifecycle {
    Stopped(Instance<Stopped>),
    Started(Instance<Started>),
}

impl Lifecycle {
    fn state(&self) -> PluginState {
        match self {
            Lifecycle::Stopped(_) => PluginState::Stopped,
            Lifecycle::Started(_) => PluginState::Started,
        }
    }
}

struct Entry {
    handle: PluginHandle,
    // Only `None` while a transition is in progress under the lock.
    instance: Option<Lifecycle>,
}

/// Plugin instances of one game session.
pub struct PluginManager {
    registry: Arc<PluginRegistry>,
    surface: Arc<RenderSurface>,
    settings: Arc<PluginSettings>,
    cancel: CancellationToken,
    entries: Mutex<Vec<Entry>>,
    destroyed: AtomicBool,
}

impl PluginManager {
    /// Create an empty session.
    pub fn new(
        registry: Arc<PluginRegistry>,
        surface: Arc<RenderSurface>,
        settings: Arc<PluginSettings>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            surface,
            settings,
            cancel,
            entries: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Create a session and eagerly load every dependency.
    pub fn load_into(
        registry: Arc<PluginRegistry>,
        surface: Arc<RenderSurface>,
        settings: Arc<PluginSettings>,
        dependencies: &[Dependency],
        cancel: CancellationToken,
    ) -> Result<Self, PluginError> {
        let manager = Self::new(registry, surface, settings, cancel);
        for dep in dependencies {
            manager.load(&dep.name, &dep.version)?;
        }
        Ok(manager)
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_live(&self, name: &str) -> Result<(), PluginError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(PluginError::StartFailed {
                name: name.to_string(),
                reason: "session destroyed".to_string(),
            });
        }
        Ok(())
    }

    /// Find or create the session's instance of `name` satisfying `range`.
    pub fn load(&self, name: &str, range: &str) -> Result<PluginHandle, PluginError> {
        let mut entries = self.entries();
        // Checked under the lock: `destroy` flags first, then clears entries.
        self.ensure_live(name)?;
        let index = self.load_locked(&mut entries, name, range)?;
        Ok(entries[index].handle.clone())
    }

    fn load_locked(&self, entries: &mut Vec<Entry>, name: &str, range: &str) -> Result<usize, PluginError> {
        let want = parse_range(range)?;
        if let Some(index) = entries
            .iter()
            .position(|e| e.handle.name == name && want.matches(&e.handle.version))
        {
            return Ok(index);
        }

        let (descriptor, plugin) = self.registry.create(name, range)?;
        let handle = PluginHandle {
            id: entries.len(),
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
        };
        tracing::debug!(plugin = %handle.name, version = %handle.version, "Loaded plugin");
        entries.push(Entry {
            handle,
            instance: Some(Lifecycle::Stopped(Instance::new(descriptor, plugin))),
        });
        Ok(entries.len() - 1)
    }

    /// Open a private channel to `name`, starting the instance if needed.
    ///
    /// Returns the end meant for the requester and the concrete version.
    pub fn start(&self, name: &str, range: &str) -> Result<(ChannelEnd, Version), PluginError> {
        let mut entries = self.entries();
        // Checked under the lock: `destroy` flags first, then clears entries.
        self.ensure_live(name)?;
        let index = self.load_locked(&mut entries, name, range)?;
        let entry = &mut entries[index];
        let version = entry.handle.version.clone();
        let (near, far) = channel::pair();

        let next = match entry.instance.take() {
            Some(Lifecycle::Stopped(stopped)) => {
                let env = PluginEnvironment {
                    surface: self.surface.clone(),
                    port: near,
                    cancel: self.cancel.child_token(),
                    settings: self.settings.clone(),
                };
                match stopped.start(env) {
                    Ok(started) => Lifecycle::Started(started),
                    Err((stopped, e)) => {
                        entry.instance = Some(Lifecycle::Stopped(stopped));
                        return Err(e);
                    }
                }
            }
            Some(Lifecycle::Started(mut started)) => {
                started.attach(near);
                Lifecycle::Started(started)
            }
            None => {
                return Err(PluginError::StartFailed {
                    name: name.to_string(),
                    reason: "instance unavailable".to_string(),
                })
            }
        };
        entry.instance = Some(next);
        Ok((far, version))
    }

    /// Loaded instances and their state.
    pub fn instances(&self) -> Vec<(PluginHandle, PluginState)> {
        self.entries()
            .iter()
            .filter_map(|e| e.instance.as_ref().map(|i| (e.handle.clone(), i.state())))
            .collect()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Tear the session down: revoke the broker and stop every instance.
    /// Safe to call more than once.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        let mut entries = self.entries();
        for entry in entries.iter_mut() {
            if let Some(Lifecycle::Started(started)) = entry.instance.take() {
                entry.instance = Some(Lifecycle::Stopped(started.stop()));
            }
        }
        tracing::debug!(instances = entries.len(), "Plugin session destroyed");
        entries.clear();
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.destroy();
    }
}
