//! Requester side of the plugin-channel handshake.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use super::port::ChannelEnd;
use super::rendezvous::{Claim, Rendezvous};
use super::wire::{ChannelSpec, ControlMessage, Delivery, Nonce};
use crate::error::PluginError;

/// How long a requester waits for its channel by default.
pub const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(5);

/// A granted capability channel.
#[derive(Debug)]
pub struct PluginChannel {
    pub port: ChannelEnd,
    pub name: String,
    /// Concrete version that satisfied the request
    pub version: String,
}

/// Handle a sandboxed context uses to acquire plugin channels from its host.
#[derive(Clone)]
pub struct ChannelClient {
    control: mpsc::UnboundedSender<Value>,
    rendezvous: Arc<Rendezvous>,
    timeout: Duration,
}

impl ChannelClient {
    pub(crate) fn new(
        control: mpsc::UnboundedSender<Value>,
        rendezvous: Arc<Rendezvous>,
        timeout: Duration,
    ) -> Self {
        Self {
            control,
            rendezvous,
            timeout,
        }
    }

    /// Override the acquisition timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Post a raw control message as a game frame would.
    pub fn post_raw(&self, message: Value) -> Result<(), PluginError> {
        self.control.send(message).map_err(|_| PluginError::ChannelClosed)
    }

    /// Acquire a private channel to `name` at a version satisfying `version`.
    ///
    /// Fails with `ChannelDenied` when the host refuses, `ChannelTimeout`
    /// when nothing arrives in time and `ChannelClosed` when the session is
    /// gone.
    pub async fn acquire(&self, name: &str, version: &str) -> Result<PluginChannel, PluginError> {
        let nonce = Nonce::generate();
        let request = ControlMessage::AcquirePluginChannel {
            nonce,
            channel: ChannelSpec {
                name: name.to_string(),
                version: version.to_string(),
            },
        };
        let request = serde_json::to_value(&request).map_err(|_| PluginError::ChannelClosed)?;
        self.post_raw(request)?;
        tracing::debug!(plugin = %name, %version, %nonce, "Requested plugin channel");

        let delivery = match self.rendezvous.claim(nonce) {
            Claim::Ready(delivery) => delivery,
            Claim::Pending(rx) => match tokio::time::timeout(self.timeout, rx).await {
                Ok(Ok(delivery)) => delivery,
                Ok(Err(_)) => return Err(PluginError::ChannelClosed),
                Err(_) => {
                    self.rendezvous.abandon(nonce);
                    tracing::warn!(plugin = %name, %version, %nonce, "Timed out waiting for plugin channel");
                    return Err(PluginError::ChannelTimeout {
                        name: name.to_string(),
                        version: version.to_string(),
                        nonce: nonce.to_string(),
                    });
                }
            },
            // A fresh nonce cannot collide unless the table was misused.
            Claim::Duplicate => return Err(PluginError::ChannelClosed),
        };

        match delivery {
            Delivery::Granted {
                name, version, port, ..
            } => Ok(PluginChannel {
                port,
                name,
                version,
            }),
            Delivery::Denied { error, .. } => Err(PluginError::ChannelDenied(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_nobody_answers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let rendezvous = Arc::new(Rendezvous::new());
        let client = ChannelClient::new(tx, rendezvous.clone(), DEFAULT_CHANNEL_TIMEOUT);

        let err = client.acquire("@host/input-classic", "^1.0.0").await.unwrap_err();
        assert!(matches!(err, PluginError::ChannelTimeout { .. }));
        assert_eq!(rendezvous.pending(), 0);

        // The request did go out on the control link.
        let sent = rx.recv().await.unwrap();
        assert_eq!(sent["type"], "acquire_plugin_channel");
        assert_eq!(sent["channel"]["version"], "^1.0.0");
    }

    #[tokio::test]
    async fn test_closed_control_link() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let client = ChannelClient::new(tx, Arc::new(Rendezvous::new()), DEFAULT_CHANNEL_TIMEOUT);
        assert!(matches!(
            client.acquire("@host/input-classic", "^1.0.0").await,
            Err(PluginError::ChannelClosed)
        ));
    }
}
