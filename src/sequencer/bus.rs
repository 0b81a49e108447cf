//! Named fan-out of unit signals (play, stop, clock pulse)

use crossbeam::channel::{Sender, TrySendError};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Subscribers that are not ready when a signal is published miss it.
#[derive(Debug, Default)]
pub struct Bus {
    subscribers: Mutex<HashMap<String, Sender<()>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any subscriber already registered under `name`
    pub fn sub(&self, name: impl Into<String>, sender: Sender<()>) {
        self.lock().insert(name.into(), sender);
    }

    pub fn unsub(&self, name: &str) {
        self.lock().remove(name);
    }

    /// Offers one signal to every subscriber without blocking; subscribers
    /// whose receiver is gone are dropped
    pub fn publish(&self) {
        self.lock().retain(|_, sender| {
            !matches!(sender.try_send(()), Err(TrySendError::Disconnected(_)))
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Sender<()>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
