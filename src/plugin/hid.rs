//! Raw HID reports from the cabinet controller board.
//!
//! Each report is 8 bytes:
//! `[spin1_lo, spin1_hi, spin2_lo, spin2_hi, p1, p2, system, 0]`.
//! Spinner values are signed deltas since the previous report. Player bytes
//! use bits 0..=5 for up, down, left, right, A, B; the system byte uses bit 0
//! for 1P start and bit 1 for 2P start.

use std::path::Path;

use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::input::{Button, InputMessage, Player, SystemButton};

pub const REPORT_LEN: usize = 8;

const SYS_1P_START: u8 = 1 << 0;
const SYS_2P_START: u8 = 1 << 1;

/// One decoded report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HidReport {
    pub spinner1: i16,
    pub spinner2: i16,
    pub p1: u8,
    pub p2: u8,
    pub system: u8,
}

impl HidReport {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < REPORT_LEN {
            return None;
        }
        Some(Self {
            spinner1: i16::from_le_bytes([bytes[0], bytes[1]]),
            spinner2: i16::from_le_bytes([bytes[2], bytes[3]]),
            p1: bytes[4],
            p2: bytes[5],
            system: bytes[6],
        })
    }

    fn button_bit(button: Button) -> u8 {
        match button {
            Button::Up => 1 << 0,
            Button::Down => 1 << 1,
            Button::Left => 1 << 2,
            Button::Right => 1 << 3,
            Button::A => 1 << 4,
            Button::B => 1 << 5,
        }
    }

    pub fn pressed(&self, player: Player, button: Button) -> bool {
        let byte = match player {
            Player::One => self.p1,
            Player::Two => self.p2,
        };
        byte & Self::button_bit(button) != 0
    }

    pub fn system_pressed(&self, button: SystemButton) -> bool {
        let bit = match button {
            SystemButton::OnePlayer => SYS_1P_START,
            SystemButton::TwoPlayer => SYS_2P_START,
        };
        self.system & bit != 0
    }

    /// Button edges between `previous` and this report.
    pub fn changes_since(&self, previous: &HidReport) -> Vec<InputMessage> {
        let mut changes = Vec::new();
        for player in [Player::One, Player::Two] {
            for button in Button::ALL {
                let now = self.pressed(player, button);
                if now != previous.pressed(player, button) {
                    changes.push(InputMessage::Button {
                        player,
                        button,
                        pressed: now,
                    });
                }
            }
        }
        for button in [SystemButton::OnePlayer, SystemButton::TwoPlayer] {
            let now = self.system_pressed(button);
            if now != previous.system_pressed(button) {
                changes.push(InputMessage::system(button, now));
            }
        }
        changes
    }

    /// Spinner movement carried by this report, if any.
    pub fn spinner_message(&self) -> Option<InputMessage> {
        (self.spinner1 != 0 || self.spinner2 != 0).then(|| InputMessage::Spinners {
            spinner1_step_delta: i32::from(self.spinner1),
            spinner2_step_delta: i32::from(self.spinner2),
        })
    }
}

/// Read reports from `path` until `cancel` fires or the device goes away.
///
/// Returns `None` if the device cannot be opened or there is no runtime;
/// callers carry on with keyboard input only.
pub fn spawn_reader<F>(path: &Path, cancel: CancellationToken, mut on_report: F) -> Option<JoinHandle<()>>
where
    F: FnMut(&HidReport, &HidReport) + Send + 'static,
{
    let handle = tokio::runtime::Handle::try_current().ok()?;
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(
                device = %path.display(),
                error = %e,
                "HID device not available, using keyboard input only"
            );
            return None;
        }
    };
    let device = path.display().to_string();
    tracing::info!(%device, "Reading cabinet controller");

    Some(handle.spawn(async move {
        let mut file = tokio::fs::File::from_std(file);
        let mut previous = HidReport::default();
        let mut buf = [0u8; REPORT_LEN];
        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = file.read_exact(&mut buf) => read,
            };
            if let Err(e) = read {
                tracing::warn!(%device, error = %e, "HID device read failed, stopping reader");
                break;
            }
            if let Some(report) = HidReport::parse(&buf) {
                on_report(&report, &previous);
                previous = report;
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_parse_report() {
        let report = HidReport::parse(&[0xFE, 0xFF, 0x03, 0x00, 0b0001_0001, 0b0000_0100, 0b10, 0]).unwrap();
        assert_eq!(report.spinner1, -2);
        assert_eq!(report.spinner2, 3);
        assert!(report.pressed(Player::One, Button::Up));
        assert!(report.pressed(Player::One, Button::A));
        assert!(!report.pressed(Player::One, Button::B));
        assert!(report.pressed(Player::Two, Button::Left));
        assert!(report.system_pressed(SystemButton::TwoPlayer));
        assert!(!report.system_pressed(SystemButton::OnePlayer));
        assert!(HidReport::parse(&[0; 7]).is_none());
    }

    #[test]
    fn test_changes_since_reports_edges_only() {
        let before = HidReport {
            p1: 0b0000_0001,
            ..Default::default()
        };
        let after = HidReport {
            p1: 0b0000_0010,
            system: SYS_1P_START,
            ..Default::default()
        };
        let changes = after.changes_since(&before);
        assert_eq!(
            changes,
            vec![
                InputMessage::Button {
                    player: Player::One,
                    button: Button::Up,
                    pressed: false
                },
                InputMessage::Button {
                    player: Player::One,
                    button: Button::Down,
                    pressed: true
                },
                InputMessage::system(SystemButton::OnePlayer, true),
            ]
        );
        assert!(after.changes_since(&after).is_empty());
        assert!(after.spinner_message().is_none());
    }

    #[tokio::test]
    async fn test_missing_device_degrades() {
        let got = spawn_reader(
            Path::new("/nonexistent/hidraw-test"),
            CancellationToken::new(),
            |_, _| {},
        );
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_reader_decodes_file_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hidraw");
        std::fs::write(&path, [5, 0, 0, 0, 0b10_0000, 0, 0, 0]).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let task = {
            let seen = seen.clone();
            spawn_reader(&path, CancellationToken::new(), move |report, previous| {
                seen.lock().unwrap().push((*report, *previous));
            })
            .unwrap()
        };
        // End of file stops the reader.
        task.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.spinner1, 5);
        assert!(seen[0].0.pressed(Player::One, Button::B));
        assert_eq!(seen[0].1, HidReport::default());
    }
}
