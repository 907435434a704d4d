//! Nonce-keyed meeting point between a delivery and its requester.
//!
//! Either side may arrive first. The first one parks in the slot; the
//! second removes the slot and completes the hand-off. A nonce is consumed
//! at most once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::oneshot;

use super::wire::{Delivery, Nonce};

enum Slot {
    Awaiting(oneshot::Sender<Delivery>),
    Ready(Delivery),
}

/// Consumed nonces remembered for replay detection, oldest evicted first.
const CONSUMED_CAPACITY: usize = 1024;

#[derive(Default)]
struct Slots {
    open: HashMap<Nonce, Slot>,
    consumed: HashSet<Nonce>,
    consumed_order: VecDeque<Nonce>,
}

impl Slots {
    fn consume(&mut self, nonce: Nonce) {
        if !self.consumed.insert(nonce) {
            return;
        }
        self.consumed_order.push_back(nonce);
        while self.consumed_order.len() > CONSUMED_CAPACITY {
            if let Some(oldest) = self.consumed_order.pop_front() {
                self.consumed.remove(&oldest);
            }
        }
    }
}

/// What happened to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverOutcome {
    /// A requester was already waiting and got it
    Handed,
    /// Nobody waiting yet; stored until claimed
    Parked,
    /// Nonce already consumed, parked, or its requester gave up
    Dropped,
}

/// Result of claiming a nonce.
pub enum Claim {
    /// The delivery had already arrived
    Ready(Delivery),
    /// Wait on this for the delivery
    Pending(oneshot::Receiver<Delivery>),
    /// Nonce was already claimed or consumed
    Duplicate,
}

/// Thread-safe rendezvous table shared by a session's broker and clients.
#[derive(Default)]
pub struct Rendezvous {
    slots: Mutex<Slots>,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Slots> {
        // A panic while holding this lock cannot leave the maps half-updated.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Host side: hand over or park a delivery.
    pub fn deliver(&self, delivery: Delivery) -> DeliverOutcome {
        let nonce = delivery.nonce();
        let mut slots = self.slots();

        if slots.consumed.contains(&nonce) {
            tracing::warn!(%nonce, "Dropping duplicate plugin channel delivery");
            return DeliverOutcome::Dropped;
        }

        match slots.open.remove(&nonce) {
            Some(Slot::Awaiting(tx)) => {
                slots.consume(nonce);
                match tx.send(delivery) {
                    Ok(()) => DeliverOutcome::Handed,
                    Err(_) => {
                        tracing::debug!(%nonce, "Requester stopped waiting before delivery");
                        DeliverOutcome::Dropped
                    }
                }
            }
            Some(ready @ Slot::Ready(_)) => {
                slots.open.insert(nonce, ready);
                tracing::warn!(%nonce, "Dropping duplicate plugin channel delivery");
                DeliverOutcome::Dropped
            }
            None => {
                slots.open.insert(nonce, Slot::Ready(delivery));
                DeliverOutcome::Parked
            }
        }
    }

    /// Requester side: take a parked delivery or register to wait for one.
    pub fn claim(&self, nonce: Nonce) -> Claim {
        let mut slots = self.slots();

        if slots.consumed.contains(&nonce) {
            return Claim::Duplicate;
        }

        match slots.open.remove(&nonce) {
            Some(Slot::Ready(delivery)) => {
                slots.consume(nonce);
                Claim::Ready(delivery)
            }
            Some(awaiting @ Slot::Awaiting(_)) => {
                slots.open.insert(nonce, awaiting);
                Claim::Duplicate
            }
            None => {
                let (tx, rx) = oneshot::channel();
                slots.open.insert(nonce, Slot::Awaiting(tx));
                Claim::Pending(rx)
            }
        }
    }

    /// Requester gave up (timeout); forget its waiting slot.
    pub fn abandon(&self, nonce: Nonce) {
        let mut slots = self.slots();
        if matches!(slots.open.get(&nonce), Some(Slot::Awaiting(_))) {
            slots.open.remove(&nonce);
            slots.consume(nonce);
        }
    }

    /// Whether `nonce` already has an answer, parked or consumed. A new
    /// delivery for it would be dropped.
    pub fn is_answered(&self, nonce: Nonce) -> bool {
        let slots = self.slots();
        slots.consumed.contains(&nonce) || matches!(slots.open.get(&nonce), Some(Slot::Ready(_)))
    }

    /// Number of parked or waiting entries.
    pub fn pending(&self) -> usize {
        self.slots().open.len()
    }

    /// Drop every open entry. Waiting requesters see their sender vanish.
    pub fn clear(&self) {
        let mut slots = self.slots();
        slots.open.clear();
        slots.consumed.clear();
        slots.consumed_order.clear();
    }
}
