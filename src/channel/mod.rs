//! Plugin channels: private message ports between a sandboxed game and a
//! host plugin, plus the nonce-correlated handshake that hands them out.
//!
//! A game asks for a capability with
//! `{"type":"acquire_plugin_channel","nonce":…,"channel":{"name":…,"version":…}}`.
//! The host answers with the same nonce and either a port or an error.

mod broker;
mod client;
pub(crate) mod port;
mod rendezvous;
mod wire;

pub use broker::{link, ChannelBroker};
pub use client::{ChannelClient, PluginChannel, DEFAULT_CHANNEL_TIMEOUT};
pub use port::{pair, ChannelEnd, PortReceiver, PortSender};
pub use rendezvous::{Claim, DeliverOutcome, Rendezvous};
pub use wire::{ChannelSpec, ControlMessage, Delivery, DeliveryHeader, Nonce};
