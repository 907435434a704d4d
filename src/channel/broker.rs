//! Host side of the plugin-channel handshake.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::ChannelClient;
use super::rendezvous::{DeliverOutcome, Rendezvous};
use super::wire::{ControlMessage, Delivery};
use crate::plugin::PluginManager;

/// Create a session's control link: the client half goes to the game, the
/// broker half to the host.
pub fn link(timeout: Duration) -> (ChannelClient, ChannelBroker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let rendezvous = Arc::new(Rendezvous::new());
    (
        ChannelClient::new(tx, rendezvous.clone(), timeout),
        ChannelBroker {
            requests: rx,
            rendezvous,
        },
    )
}

/// Answers acquisition requests from one session's control link.
pub struct ChannelBroker {
    requests: mpsc::UnboundedReceiver<Value>,
    rendezvous: Arc<Rendezvous>,
}

impl ChannelBroker {
    /// Resolve one control message and deliver the outcome.
    ///
    /// Returns `None` for messages that are not acquisition requests.
    pub fn handle(&self, manager: &PluginManager, message: Value) -> Option<DeliverOutcome> {
        let request = match serde_json::from_value::<ControlMessage>(message) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed control message");
                return None;
            }
        };
        let ControlMessage::AcquirePluginChannel { nonce, channel } = request;
        if self.rendezvous.is_answered(nonce) {
            tracing::warn!(plugin = %channel.name, %nonce, "Ignoring replayed plugin channel request");
            return Some(DeliverOutcome::Dropped);
        }

        let delivery = match manager.start(&channel.name, &channel.version) {
            Ok((port, version)) => {
                tracing::info!(plugin = %channel.name, %version, %nonce, "Granted plugin channel");
                Delivery::Granted {
                    nonce,
                    name: channel.name,
                    version: version.to_string(),
                    port,
                }
            }
            Err(e) => {
                tracing::warn!(plugin = %channel.name, range = %channel.version, %nonce, error = %e, "Denied plugin channel");
                Delivery::Denied {
                    nonce,
                    error: e.to_string(),
                }
            }
        };
        Some(self.rendezvous.deliver(delivery))
    }

    /// Serve requests until `cancel` fires or every client is gone, then
    /// prune whatever is still parked.
    pub fn spawn(mut self, manager: Arc<PluginManager>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = self.requests.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                self.handle(&manager, message);
            }
            let abandoned = self.rendezvous.pending();
            self.rendezvous.clear();
            tracing::debug!(abandoned, "Plugin channel broker stopped");
        })
    }
}
