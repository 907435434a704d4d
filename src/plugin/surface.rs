//! The host-side view of an untrusted render surface.
//!
//! Raw key events reach the host here (the game itself never sees them).
//! Plugins subscribe in `start` and must unsubscribe in `stop`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Key transition kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Down,
    Up,
}

/// A raw keyboard event, identified by physical key code (`ArrowUp`, `KeyR`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInput {
    pub code: String,
    pub kind: KeyKind,
}

impl KeyInput {
    pub fn down(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            kind: KeyKind::Down,
        }
    }

    pub fn up(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            kind: KeyKind::Up,
        }
    }

    pub fn pressed(&self) -> bool {
        self.kind == KeyKind::Down
    }
}

/// Token returned by [`RenderSurface::on_input`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&KeyInput) + Send + Sync>;

/// Input hook registry for one game surface.
#[derive(Default)]
pub struct RenderSurface {
    label: String,
    listeners: RwLock<HashMap<ListenerId, Listener>>,
    next_id: AtomicU64,
}

impl RenderSurface {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Register a raw input hook.
    pub fn on_input(&self, listener: impl Fn(&KeyInput) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.insert(id, Arc::new(listener));
        }
        id
    }

    /// Remove a hook. Returns false if it was not registered.
    pub fn off_input(&self, id: ListenerId) -> bool {
        self.listeners
            .write()
            .map(|mut listeners| listeners.remove(&id).is_some())
            .unwrap_or(false)
    }

    /// Feed a raw event to every hook. Returns how many hooks saw it.
    pub fn dispatch(&self, input: &KeyInput) -> usize {
        // Snapshot so hooks may (un)register without deadlocking.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .map(|l| l.values().cloned().collect())
            .unwrap_or_default();
        for listener in &listeners {
            listener(input);
        }
        listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_register_dispatch_unregister() {
        let surface = RenderSurface::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let id = {
            let seen = seen.clone();
            surface.on_input(move |input| seen.lock().unwrap().push(input.clone()))
        };
        assert_eq!(surface.listener_count(), 1);

        assert_eq!(surface.dispatch(&KeyInput::down("ArrowUp")), 1);
        assert!(surface.off_input(id));
        assert!(!surface.off_input(id));
        assert_eq!(surface.dispatch(&KeyInput::up("ArrowUp")), 0);

        assert_eq!(*seen.lock().unwrap(), vec![KeyInput::down("ArrowUp")]);
    }
}
