//! Bidirectional in-process message ports.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::PluginError;

/// Create a connected pair of channel ends.
pub fn pair() -> (ChannelEnd, ChannelEnd) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        ChannelEnd {
            tx: PortSender(b_tx),
            rx: PortReceiver(a_rx),
        },
        ChannelEnd {
            tx: PortSender(a_tx),
            rx: PortReceiver(b_rx),
        },
    )
}

/// One end of a private channel. Whoever holds it owns it.
#[derive(Debug)]
pub struct ChannelEnd {
    tx: PortSender,
    rx: PortReceiver,
}

impl ChannelEnd {
    pub fn send(&self, message: Value) -> Result<(), PluginError> {
        self.tx.send(message)
    }

    pub fn post<T: Serialize>(&self, message: &T) -> Result<(), PluginError> {
        self.tx.post(message)
    }

    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv()
    }

    pub fn sender(&self) -> PortSender {
        self.tx.clone()
    }

    pub fn split(self) -> (PortSender, PortReceiver) {
        (self.tx, self.rx)
    }
}

/// Cloneable sending half.
#[derive(Debug, Clone)]
pub struct PortSender(mpsc::UnboundedSender<Value>);

impl PortSender {
    pub fn send(&self, message: Value) -> Result<(), PluginError> {
        self.0.send(message).map_err(|_| PluginError::ChannelClosed)
    }

    pub fn post<T: Serialize>(&self, message: &T) -> Result<(), PluginError> {
        let value = serde_json::to_value(message).map_err(|_| PluginError::ChannelClosed)?;
        self.send(value)
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Receiving half.
#[derive(Debug)]
pub struct PortReceiver(mpsc::UnboundedReceiver<Value>);

impl PortReceiver {
    pub async fn recv(&mut self) -> Option<Value> {
        self.0.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.0.try_recv().ok()
    }
}
