//! A plugin implementation bound to one session.
//!
//! The lifecycle is encoded in the type: only an `Instance<Stopped>` can be
//! started and only an `Instance<Started>` can take more channels or be
//! stopped.

use std::marker::PhantomData;

use super::{Plugin, PluginDescriptor, PluginEnvironment};
use crate::channel::ChannelEnd;
use crate::error::PluginError;

/// Marker for an instance that has not been started (or has been stopped).
#[derive(Debug)]
pub struct Stopped;

/// Marker for a running instance.
#[derive(Debug)]
pub struct Started;

/// Runtime view of the typestate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Stopped,
    Started,
}

pub struct Instance<S> {
    descriptor: PluginDescriptor,
    plugin: Box<dyn Plugin>,
    _state: PhantomData<S>,
}

impl<S> Instance<S> {
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn transition<T>(self) -> Instance<T> {
        Instance {
            descriptor: self.descriptor,
            plugin: self.plugin,
            _state: PhantomData,
        }
    }
}

impl Instance<Stopped> {
    pub fn new(descriptor: PluginDescriptor, plugin: Box<dyn Plugin>) -> Self {
        Self {
            descriptor,
            plugin,
            _state: PhantomData,
        }
    }

    /// Run the plugin's start entry point.
    ///
    /// On failure the plugin is stopped again so nothing it half set up
    /// outlives the attempt, and the instance is handed back.
    pub fn start(mut self, env: PluginEnvironment) -> Result<Instance<Started>, (Self, PluginError)> {
        match self.plugin.start(env) {
            Ok(()) => {
                tracing::info!(
                    plugin = %self.descriptor.name,
                    version = %self.descriptor.version,
                    "Plugin started"
                );
                Ok(self.transition())
            }
            Err(e) => {
                tracing::warn!(plugin = %self.descriptor.name, error = %e, "Plugin failed to start");
                self.plugin.stop();
                Err((self, e))
            }
        }
    }
}

impl Instance<Started> {
    /// Hand another private channel to the running plugin.
    pub fn attach(&mut self, port: ChannelEnd) {
        tracing::debug!(plugin = %self.descriptor.name, "Attaching plugin channel");
        self.plugin.attach(port);
    }

    pub fn stop(mut self) -> Instance<Stopped> {
        self.plugin.stop();
        tracing::info!(plugin = %self.descriptor.name, "Plugin stopped");
        self.transition()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::port;
    use crate::plugin::{PluginSettings, RenderSurface};
    use semver::Version;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Counters {
        starts: AtomicUsize,
        attaches: AtomicUsize,
        stops: AtomicUsize,
    }

    struct Probe {
        counters: Arc<Counters>,
        fail: bool,
    }

    impl Plugin for Probe {
        fn start(&mut self, _env: PluginEnvironment) -> Result<(), PluginError> {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PluginError::StartFailed {
                    name: "probe".into(),
                    reason: "refused".into(),
                });
            }
            Ok(())
        }

        fn attach(&mut self, _port: ChannelEnd) {
            self.counters.attaches.fetch_add(1, Ordering::SeqCst);
        }

        fn stop(&mut self) {
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn env() -> PluginEnvironment {
        PluginEnvironment {
            surface: Arc::new(RenderSurface::new("test")),
            port: port::pair().0,
            cancel: CancellationToken::new(),
            settings: Arc::new(PluginSettings::default()),
        }
    }

    fn instance(counters: &Arc<Counters>, fail: bool) -> Instance<Stopped> {
        Instance::new(
            PluginDescriptor {
                name: "probe".into(),
                version: Version::new(1, 0, 0),
            },
            Box::new(Probe {
                counters: counters.clone(),
                fail,
            }),
        )
    }

    #[test]
    fn test_lifecycle() {
        let counters = Arc::new(Counters::default());
        let mut started = instance(&counters, false).start(env()).ok().unwrap();
        started.attach(port::pair().0);
        let stopped = started.stop();
        assert_eq!(stopped.descriptor().name, "probe");
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counters.attaches.load(Ordering::SeqCst), 1);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_start_is_cleaned_up() {
        let counters = Arc::new(Counters::default());
        let Err((_stopped, err)) = instance(&counters, true).start(env()) else {
            panic!("start should fail");
        };
        assert!(matches!(err, PluginError::StartFailed { .. }));
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    }
}
