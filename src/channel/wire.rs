//! Wire shapes of the plugin-channel handshake.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::port::ChannelEnd;

/// Single-use correlation token for one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(Uuid);

impl Nonce {
    pub fn generate() -> Self {
        Nonce(Uuid::new_v4())
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The capability being asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    /// Semver range, e.g. `^1.0.0` or `1.0.0`
    pub version: String,
}

/// Messages a sandboxed context sends up its control link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    AcquirePluginChannel { nonce: Nonce, channel: ChannelSpec },
}

/// Header that travels with a delivery. Serializes to either
/// `{nonce, name, version}` or `{nonce, error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeliveryHeader {
    Granted {
        nonce: Nonce,
        name: String,
        version: String,
    },
    Denied {
        nonce: Nonce,
        error: String,
    },
}

/// Outcome of an acquisition as handed to the requester.
#[derive(Debug)]
pub enum Delivery {
    Granted {
        nonce: Nonce,
        name: String,
        /// The concrete version that satisfied the request
        version: String,
        port: ChannelEnd,
    },
    Denied {
        nonce: Nonce,
        error: String,
    },
}

impl Delivery {
    pub fn nonce(&self) -> Nonce {
        match self {
            Delivery::Granted { nonce, .. } | Delivery::Denied { nonce, .. } => *nonce,
        }
    }

    pub fn header(&self) -> DeliveryHeader {
        match self {
            Delivery::Granted {
                nonce,
                name,
                version,
                ..
            } => DeliveryHeader::Granted {
                nonce: *nonce,
                name: name.clone(),
                version: version.clone(),
            },
            Delivery::Denied { nonce, error } => DeliveryHeader::Denied {
                nonce: *nonce,
                error: error.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_acquire_request_shape() {
        let nonce = Nonce::generate();
        let msg = ControlMessage::AcquirePluginChannel {
            nonce,
            channel: ChannelSpec {
                name: "@host/input-classic".into(),
                version: "^1.0.0".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "acquire_plugin_channel",
                "nonce": nonce.to_string(),
                "channel": {"name": "@host/input-classic", "version": "^1.0.0"}
            })
        );
    }

    #[test]
    fn test_denied_header_shape() {
        let nonce = Nonce::generate();
        let header = Delivery::Denied {
            nonce,
            error: "Unknown plugin: nope".into(),
        }
        .header();
        assert_eq!(
            serde_json::to_value(&header).unwrap(),
            json!({"nonce": nonce.to_string(), "error": "Unknown plugin: nope"})
        );
    }

    #[test]
    fn test_parses_request_from_game() {
        let raw = json!({
            "type": "acquire_plugin_channel",
            "nonce": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "channel": {"name": "@host/input-spinners", "version": "^1.0.0"}
        });
        let ControlMessage::AcquirePluginChannel { channel, .. } =
            serde_json::from_value(raw).unwrap();
        assert_eq!(channel.name, "@host/input-spinners");
    }
}
