//! Classic joystick-and-buttons input for two players.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::hid;
use super::{Broadcast, KeyInput, ListenerId, Plugin, PluginEnvironment, RenderSurface};
use crate::channel::{ChannelEnd, PortReceiver};
use crate::error::PluginError;
use crate::input::{Button, InputMessage, Player, SystemButton};

pub const INPUT_CLASSIC: &str = "@host/input-classic";

enum Mapped {
    Player(Player, Button),
    System(SystemButton),
}

/// Cabinet keyboard encoder layout.
fn map_key(code: &str) -> Option<Mapped> {
    use Button::*;
    use Player::*;
    let mapped = match code {
        "ArrowUp" => Mapped::Player(One, Up),
        "ArrowDown" => Mapped::Player(One, Down),
        "ArrowLeft" => Mapped::Player(One, Left),
        "ArrowRight" => Mapped::Player(One, Right),
        "ControlLeft" => Mapped::Player(One, A),
        "AltLeft" => Mapped::Player(One, B),
        "KeyR" => Mapped::Player(Two, Up),
        "KeyF" => Mapped::Player(Two, Down),
        "KeyD" => Mapped::Player(Two, Left),
        "KeyG" => Mapped::Player(Two, Right),
        "KeyA" => Mapped::Player(Two, A),
        "KeyS" => Mapped::Player(Two, B),
        "Digit1" => Mapped::System(SystemButton::OnePlayer),
        "Digit2" => Mapped::System(SystemButton::TwoPlayer),
        _ => return None,
    };
    Some(mapped)
}

/// Translate a raw key event into an input message, if the key is mapped.
pub fn key_message(input: &KeyInput) -> Option<InputMessage> {
    let pressed = input.pressed();
    map_key(&input.code).map(|mapped| match mapped {
        Mapped::Player(player, button) => InputMessage::Button {
            player,
            button,
            pressed,
        },
        Mapped::System(button) => InputMessage::system(button, pressed),
    })
}

/// Read and discard what a game posts to the plugin until the port closes.
async fn discard_inbound(mut rx: PortReceiver, cancel: CancellationToken) -> usize {
    let mut discarded = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(_) => discarded += 1,
                None => break,
            },
        }
    }
    discarded
}

/// Posts button and system edges to every attached channel.
#[derive(Default)]
pub struct InputClassic {
    broadcast: Broadcast,
    cancel: CancellationToken,
    // One per attached port; games may post to the plugin, nothing is kept.
    drains: Vec<JoinHandle<usize>>,
    hook: Option<(Arc<RenderSurface>, ListenerId)>,
    hid_task: Option<JoinHandle<()>>,
}

impl InputClassic {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_port(&mut self, port: ChannelEnd) {
        let (tx, rx) = port.split();
        self.broadcast.add(tx);
        self.drains.retain(|task| !task.is_finished());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => self.drains.push(handle.spawn(discard_inbound(rx, self.cancel.clone()))),
            // Without a runtime the receiver is dropped and game posts fail.
            Err(_) => tracing::warn!("No runtime, closing inbound half of classic input channel"),
        }
    }
}

impl Plugin for InputClassic {
    fn start(&mut self, env: PluginEnvironment) -> Result<(), PluginError> {
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
            self.hid_task = hid::spawn_reader(device, self.cancel.clone(), move |report, previous| {
                for message in report.changes_since(previous) {
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
        for task in self.drains.drain(..) {
            task.abort();
        }
        self.broadcast.clear();
    }
}
