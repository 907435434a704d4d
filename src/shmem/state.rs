//! Typed readers and writers over the shared input layout.

use std::sync::Arc;

use super::layout::{Field, Spinner, CLASSIC_DATA_LEN};
use super::region::{MemoryGuard, Role, SharedRegion};
use crate::error::ShmemError;
use crate::input::{InputMessage, Player};

/// Snapshot of every boolean field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControllerState {
    pub connected: bool,
    pub system_one_player: bool,
    pub system_two_player: bool,
    pub player1_up: bool,
    pub player1_down: bool,
    pub player1_left: bool,
    pub player1_right: bool,
    pub player1_a: bool,
    pub player1_b: bool,
    pub player2_up: bool,
    pub player2_down: bool,
    pub player2_left: bool,
    pub player2_right: bool,
    pub player2_a: bool,
    pub player2_b: bool,
}

impl ControllerState {
    fn from_bytes(bytes: &[u8]) -> Self {
        let at = |field: Field| bytes.get(field.offset()).is_some_and(|b| *b != 0);
        Self {
            connected: at(Field::Connected),
            system_one_player: at(Field::SystemOnePlayer),
            system_two_player: at(Field::SystemTwoPlayer),
            player1_up: at(Field::Player1Up),
            player1_down: at(Field::Player1Down),
            player1_left: at(Field::Player1Left),
            player1_right: at(Field::Player1Right),
            player1_a: at(Field::Player1A),
            player1_b: at(Field::Player1B),
            player2_up: at(Field::Player2Up),
            player2_down: at(Field::Player2Down),
            player2_left: at(Field::Player2Left),
            player2_right: at(Field::Player2Right),
            player2_a: at(Field::Player2A),
            player2_b: at(Field::Player2B),
        }
    }
}

/// A spinner's delta and cumulative position, read as one pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpinnerState {
    pub delta: i16,
    pub position: i32,
}

fn read_spinner(guard: &MemoryGuard<'_>, spinner: Spinner) -> Result<SpinnerState, ShmemError> {
    Ok(SpinnerState {
        delta: guard.read_i16(spinner.delta_offset())?,
        position: guard.read_i32(spinner.position_offset())?,
    })
}

/// Host side of the region.
#[derive(Clone)]
pub struct InputStateWriter {
    region: Arc<SharedRegion>,
}

impl InputStateWriter {
    pub fn new(region: Arc<SharedRegion>) -> Result<Self, ShmemError> {
        if region.data_len() < CLASSIC_DATA_LEN {
            return Err(ShmemError::RegionTooSmall {
                required: CLASSIC_DATA_LEN,
                actual: region.data_len(),
            });
        }
        Ok(Self { region })
    }

    pub fn region(&self) -> &Arc<SharedRegion> {
        &self.region
    }

    /// Mark the region live. Done once, before anything else is written.
    pub fn announce_connected(&self) -> Result<(), ShmemError> {
        self.write(Field::Connected, true)
    }

    pub fn write(&self, field: Field, value: bool) -> Result<(), ShmemError> {
        self.region.lock(Role::Writer).write_bool(field.offset(), value)
    }

    /// Overwrite the delta and advance the position under one lock hold.
    /// Returns the new position.
    pub fn apply_spinner(&self, spinner: Spinner, delta: i16) -> Result<i32, ShmemError> {
        let mut guard = self.region.lock(Role::Writer);
        let position = guard
            .read_i32(spinner.position_offset())?
            .wrapping_add(i32::from(delta));
        guard.write_i16(spinner.delta_offset(), delta)?;
        guard.write_i32(spinner.position_offset(), position)?;
        Ok(position)
    }

    /// Apply one channel message.
    pub fn apply(&self, message: &InputMessage) -> Result<(), ShmemError> {
        match *message {
            InputMessage::Button {
                player,
                button,
                pressed,
            } => self.write(Field::button(player, button), pressed),
            InputMessage::System { button, pressed, .. } => {
                self.write(Field::system(button), pressed)
            }
            InputMessage::Spinners {
                spinner1_step_delta,
                spinner2_step_delta,
            } => {
                for (spinner, delta) in [
                    (Spinner::One, spinner1_step_delta),
                    (Spinner::Two, spinner2_step_delta),
                ] {
                    if delta != 0 {
                        self.apply_spinner(spinner, clamp_delta(delta))?;
                    }
                }
                Ok(())
            }
        }
    }
}

fn clamp_delta(delta: i32) -> i16 {
    delta.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// Plugin-client side of the region.
#[derive(Clone)]
pub struct InputStateReader {
    region: Arc<SharedRegion>,
}

impl InputStateReader {
    pub fn new(region: Arc<SharedRegion>) -> Self {
        Self { region }
    }

    pub fn read(&self, field: Field) -> Result<bool, ShmemError> {
        self.region.lock(Role::Reader).read_bool(field.offset())
    }

    pub fn snapshot(&self) -> ControllerState {
        let guard = self.region.lock(Role::Reader);
        ControllerState::from_bytes(guard.data())
    }

    /// Non-blocking snapshot; `None` if the writer holds the lock.
    pub fn try_snapshot(&self) -> Option<ControllerState> {
        self.region
            .try_lock(Role::Reader)
            .map(|guard| ControllerState::from_bytes(guard.data()))
    }

    pub fn spinner(&self, spinner: Spinner) -> Result<SpinnerState, ShmemError> {
        read_spinner(&self.region.lock(Role::Reader), spinner)
    }

    /// Read the pair and reset the delta to zero.
    pub fn drain_spinner(&self, spinner: Spinner) -> Result<SpinnerState, ShmemError> {
        let mut guard = self.region.lock(Role::Reader);
        let state = read_spinner(&guard, spinner)?;
        guard.write_i16(spinner.delta_offset(), 0)?;
        Ok(state)
    }

    pub fn is_connected(&self) -> bool {
        self.read(Field::Connected).unwrap_or(false)
    }

    pub fn pressed(&self, player: Player, button: crate::input::Button) -> bool {
        self.read(Field::button(player, button)).unwrap_or(false)
    }
}
