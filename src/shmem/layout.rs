//! Byte layout of the shared input region.
//!
//! ```text
//! [0..4)  lock word (u32, native atomic)
//! [4..)   data region, offsets below are relative to DATA_OFFSET
//!
//!  00     connected
//!  01     system: one player
//!  02     system: two player
//!  03-08  player 1: up, down, left, right, a, b
//!  09-14  player 2: up, down, left, right, a, b
//!  15     padding
//!  16-17  spinner 1 delta     (i16 LE)
//!  18-21  spinner 1 position  (i32 LE)
//!  22-23  spinner 2 delta     (i16 LE)
//!  24-27  spinner 2 position  (i32 LE)
//! ```
//!
//! Plugin clients outside this crate read these offsets directly; they must
//! never move.

use crate::input::{Button, Player, SystemButton};

pub const LOCK_OFFSET: usize = 0;
pub const DATA_OFFSET: usize = 4;

// Same values as the SDK's worker runtime: 1 is the reading client, 2 the
// side that writes input state.
pub const UNLOCKED: u32 = 0;
pub const LOCKED_BY_READER: u32 = 1;
pub const LOCKED_BY_WRITER: u32 = 2;

/// Data bytes needed for the button fields only.
pub const CLASSIC_DATA_LEN: usize = 15;
/// Data bytes needed for buttons plus both spinners.
pub const SPINNER_DATA_LEN: usize = 28;

/// Single-byte boolean fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Field {
    Connected = 0,
    SystemOnePlayer = 1,
    SystemTwoPlayer = 2,
    Player1Up = 3,
    Player1Down = 4,
    Player1Left = 5,
    Player1Right = 6,
    Player1A = 7,
    Player1B = 8,
    Player2Up = 9,
    Player2Down = 10,
    Player2Left = 11,
    Player2Right = 12,
    Player2A = 13,
    Player2B = 14,
}

impl Field {
    pub const fn offset(self) -> usize {
        self as usize
    }

    /// Field for a player button.
    pub fn button(player: Player, button: Button) -> Field {
        use Button::*;
        match (player, button) {
            (Player::One, Up) => Field::Player1Up,
            (Player::One, Down) => Field::Player1Down,
            (Player::One, Left) => Field::Player1Left,
            (Player::One, Right) => Field::Player1Right,
            (Player::One, A) => Field::Player1A,
            (Player::One, B) => Field::Player1B,
            (Player::Two, Up) => Field::Player2Up,
            (Player::Two, Down) => Field::Player2Down,
            (Player::Two, Left) => Field::Player2Left,
            (Player::Two, Right) => Field::Player2Right,
            (Player::Two, A) => Field::Player2A,
            (Player::Two, B) => Field::Player2B,
        }
    }

    pub fn system(button: SystemButton) -> Field {
        match button {
            SystemButton::OnePlayer => Field::SystemOnePlayer,
            SystemButton::TwoPlayer => Field::SystemTwoPlayer,
        }
    }

    pub fn from_offset(offset: usize) -> Option<Field> {
        use Field::*;
        const FIELDS: [Field; CLASSIC_DATA_LEN] = [
            Connected,
            SystemOnePlayer,
            SystemTwoPlayer,
            Player1Up,
            Player1Down,
            Player1Left,
            Player1Right,
            Player1A,
            Player1B,
            Player2Up,
            Player2Down,
            Player2Left,
            Player2Right,
            Player2A,
            Player2B,
        ];
        FIELDS.get(offset).copied()
    }
}

/// One of the two spinner channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Spinner {
    One,
    Two,
}

impl Spinner {
    pub const fn delta_offset(self) -> usize {
        match self {
            Spinner::One => 16,
            Spinner::Two => 22,
        }
    }

    pub const fn position_offset(self) -> usize {
        match self {
            Spinner::One => 18,
            Spinner::Two => 24,
        }
    }
}
