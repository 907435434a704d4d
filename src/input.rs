//! Input messages carried over plugin channels.
//!
//! These are the JSON payloads input plugins post to games, e.g.
//! `{"type":"button","player":1,"button":"UP","pressed":true}`.

use serde::{Deserialize, Serialize};

/// A player button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
}

impl Button {
    pub const ALL: [Button; 6] = [
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
        Button::A,
        Button::B,
    ];
}

/// A cabinet system button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemButton {
    OnePlayer,
    TwoPlayer,
}

/// One of the two player positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Player {
    One,
    Two,
}

impl TryFrom<u8> for Player {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Player::One),
            2 => Ok(Player::Two),
            other => Err(format!("invalid player {other}")),
        }
    }
}

impl From<Player> for u8 {
    fn from(player: Player) -> u8 {
        match player {
            Player::One => 1,
            Player::Two => 2,
        }
    }
}

/// Message posted by input plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputMessage {
    /// Player button edge
    Button {
        player: Player,
        button: Button,
        pressed: bool,
    },
    /// System button edge (`player` is always 0 on the wire)
    System {
        #[serde(default)]
        player: u8,
        button: SystemButton,
        pressed: bool,
    },
    /// Relative spinner movement since the previous message
    Spinners {
        spinner1_step_delta: i32,
        spinner2_step_delta: i32,
    },
}

impl InputMessage {
    pub fn system(button: SystemButton, pressed: bool) -> Self {
        InputMessage::System {
            player: 0,
            button,
            pressed,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        // Serializing a plain enum of scalars cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
