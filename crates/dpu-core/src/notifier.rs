//! Notifier chains
//!
//! Fan-out of LCD power status and refresh-rate changes to interested parts of
//! the system. Callbacks run synchronously on the caller's thread, in the order
//! they were registered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Handle returned by [`NotifierChain::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifierHandle(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered list of callbacks for one event type
pub struct NotifierChain<E> {
    name: &'static str,
    next_id: AtomicU64,
    callbacks: RwLock<Vec<(NotifierHandle, Callback<E>)>>,
}

impl<E> NotifierChain<E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(0),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn register<F>(&self, callback: F) -> NotifierHandle
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let handle = NotifierHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut callbacks = self
            .callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        callbacks.push((handle, Arc::new(callback)));
        debug!("{}: registered notifier {:?}", self.name, handle);
        handle
    }

    /// Returns false if the handle was not registered
    pub fn unregister(&self, handle: NotifierHandle) -> bool {
        let mut callbacks = self
            .callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = callbacks.len();
        callbacks.retain(|(h, _)| *h != handle);
        let removed = callbacks.len() != before;
        if !removed {
            warn!("{}: notifier {:?} was not registered", self.name, handle);
        }
        removed
    }

    /// Invoke every callback, returns how many ran
    pub fn call(&self, event: &E) -> usize {
        // Snapshot so callbacks may register or unregister without deadlocking
        let snapshot: Vec<Callback<E>> = self
            .callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for cb in &snapshot {
            cb(event);
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> std::fmt::Debug for NotifierChain<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierChain")
            .field("name", &self.name)
            .field("callbacks", &self.len())
            .finish()
    }
}

/// LCD power status as published to listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum LcdStatus {
    On = 0,
    Off = 1,
}

/// Refresh rate change in frames per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpsChange(pub u32);

/// Process-wide LCD status chain
pub struct LcdStatusNotifier {
    chain: NotifierChain<LcdStatus>,
}

impl LcdStatusNotifier {
    pub fn new() -> Self {
        Self {
            chain: NotifierChain::new("lcd_status"),
        }
    }

    pub fn register<F>(&self, callback: F) -> NotifierHandle
    where
        F: Fn(&LcdStatus) + Send + Sync + 'static,
    {
        self.chain.register(callback)
    }

    pub fn unregister(&self, handle: NotifierHandle) -> bool {
        self.chain.unregister(handle)
    }

    pub fn notify(&self, status: LcdStatus) -> usize {
        debug!("lcd status -> {:?}", status);
        self.chain.call(&status)
    }
}

impl Default for LcdStatusNotifier {
    fn default() -> Self {
        Self::new()
    }
}
