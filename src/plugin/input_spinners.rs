//! Rotary spinner input.
//!
//! Deltas come from the cabinet's HID board when one is configured, with a
//! keyboard fallback (`Q`/`E` for spinner 1, `U`/`O` for spinner 2) that is
//! always active.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::hid;
use super::{Broadcast, KeyInput, ListenerId, Plugin, PluginEnvironment, RenderSurface};
use crate::channel::{ChannelEnd, PortReceiver, PortSender};
use crate::error::PluginError;
use crate::input::InputMessage;

pub const INPUT_SPINNERS: &str = "@host/input-spinners";

/// Steps per keypress for the keyboard fallback.
const KEY_STEP: i32 = 1;

fn key_message(input: &KeyInput) -> Option<InputMessage> {
    if !input.pressed() {
        return None;
    }
    let (spinner1, spinner2) = match input.code.as_str() {
        "KeyQ" => (-KEY_STEP, 0),
        "KeyE" => (KEY_STEP, 0),
        "KeyU" => (0, -KEY_STEP),
        "KeyO" => (0, KEY_STEP),
        _ => return None,
    };
    Some(InputMessage::Spinners {
        spinner1_step_delta: spinner1,
        spinner2_step_delta: spinner2,
    })
}

/// Reply to a `get_config` request, echoing its `nonce` if it carried one.
fn config_reply(request: &Value, step_resolution: u32) -> Option<Value> {
    if request.get("type").and_then(Value::as_str) != Some("get_config") {
        return None;
    }
    let mut reply = json!({
        "type": "config",
        "step_resolution": step_resolution,
    });
    if let Some(nonce) = request.get("nonce") {
        reply["nonce"] = nonce.clone();
    }
    Some(reply)
}

async fn answer_requests(
    mut rx: PortReceiver,
    tx: PortSender,
    step_resolution: u32,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        if let Some(reply) = config_reply(&request, step_resolution) {
            if tx.send(reply).is_err() {
                break;
            }
        } else {
            tracing::trace!(?request, "Ignoring message to spinner plugin");
        }
    }
}

/// Posts spinner deltas to every attached channel and answers config
/// requests on each.
#[derive(Default)]
pub struct InputSpinners {
    broadcast: Broadcast,
    step_resolution: u32,
    cancel: CancellationToken,
    responders: Vec<JoinHandle<()>>,
    hook: Option<(Arc<RenderSurface>, ListenerId)>,
    hid_task: Option<JoinHandle<()>>,
}

impl InputSpinners {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_port(&mut self, port: ChannelEnd) {
        let (tx, rx) = port.split();
        self.broadcast.add(tx.clone());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.responders.push(handle.spawn(answer_requests(
                    rx,
                    tx,
                    self.step_resolution,
                    self.cancel.clone(),
                )));
            }
            Err(_) => tracing::warn!("No runtime, spinner config requests will go unanswered"),
        }
    }
}

impl Plugin for InputSpinners {
    fn start(&mut self, env: PluginEnvironment) -> Result<(), PluginError> {
        self.step_resolution = env.settings.step_resolution;
        self.cancel = env.cancel.child_token();
        self.add_port(env.port);

        let broadcast = self.broadcast.clone();
        let id = env.surface.on_input(move |input| {
            if let Some(message) = key_message(input) {
                broadcast.send(&message);
            }
        });
        self.hook = Some((env.surface, id));

        if let Some(device) = &env.settings.hid_device {
            let broadcast = self.broadcast.clone();
            self.hid_task = hid::spawn_reader(device, self.cancel.clone(), move |report, _| {
                if let Some(message) = report.spinner_message() {
                    broadcast.send(&message);
                }
            });
        }
        Ok(())
    }

    fn attach(&mut self, port: ChannelEnd) {
        self.add_port(port);
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        if let Some((surface, id)) = self.hook.take() {
            surface.off_input(id);
        }
        if let Some(task) = self.hid_task.take() {
            task.abort();
        }
        for task in self.responders.drain(..) {
            task.abort();
        }
        self.broadcast.clear();
    }
}
