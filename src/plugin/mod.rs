//! Plugin runtime: the installed plugin table, per-session instances and
//! the builtin input plugins.

pub mod hid;
mod input_classic;
mod input_spinners;
mod instance;
mod manager;
mod registry;
mod surface;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelEnd, PortSender};
use crate::error::PluginError;
use crate::input::InputMessage;

pub use input_classic::{InputClassic, INPUT_CLASSIC};
pub use input_spinners::{InputSpinners, INPUT_SPINNERS};
pub use instance::{Instance, PluginState, Started, Stopped};
pub use manager::{PluginHandle, PluginManager};
pub use registry::{parse_range, PluginDescriptor, PluginFactory, PluginRegistry};
pub use surface::{KeyInput, KeyKind, ListenerId, RenderSurface};

/// A capability implementation.
///
/// `start` runs once per session with the first channel; later requests for
/// the same capability arrive through `attach`. `stop` must undo exactly
/// what `start` set up and must tolerate a `start` that failed halfway.
pub trait Plugin: Send {
    fn start(&mut self, env: PluginEnvironment) -> Result<(), PluginError>;

    fn attach(&mut self, port: ChannelEnd);

    fn stop(&mut self);
}

/// Host-wide knobs handed to every plugin.
#[derive(Debug, Clone)]
pub struct PluginSettings {
    /// Raw HID device for cabinet hardware (e.g. `/dev/hidraw0`)
    pub hid_device: Option<PathBuf>,
    /// Spinner steps per revolution reported to clients
    pub step_resolution: u32,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            hid_device: None,
            step_resolution: 64,
        }
    }
}

/// What a plugin gets when it starts.
pub struct PluginEnvironment {
    /// The surface the game renders into
    pub surface: Arc<RenderSurface>,
    /// Private end of the first channel
    pub port: ChannelEnd,
    /// Fires when the session is torn down
    pub cancel: CancellationToken,
    pub settings: Arc<PluginSettings>,
}

/// Fan-out of input messages to every attached channel.
#[derive(Clone, Default)]
pub(crate) struct Broadcast {
    senders: Arc<Mutex<Vec<PortSender>>>,
}

impl Broadcast {
    pub(crate) fn add(&self, sender: PortSender) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(sender);
        }
    }

    pub(crate) fn send(&self, message: &InputMessage) {
        let value = message.to_value();
        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|s| s.send(value.clone()).is_ok());
        }
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.clear();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.senders.lock().map(|s| s.len()).unwrap_or(0)
    }
}
