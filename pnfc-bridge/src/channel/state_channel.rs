//! State channel listener multiplexing
//!
//! A [`StateChannel`] is one server-pushed event connection shared by several
//! independently removable listeners. Listeners register against an event
//! name and are identified by the [`ListenerId`] returned on registration.
//!
//! Dispatch rules:
//! - One-shot listeners are unregistered before any callback of the batch
//!   runs, so a re-fire can never reach them twice.
//! - A listener removed by an earlier callback of the same batch does not
//!   fire.
//! - Nothing fires once the channel is closed or failed; closing is
//!   idempotent and drops every registered callback.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::ChannelError;

/// Listener callback
pub type ListenerCallback = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// One event received on the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub name: String,
    pub data: String,
}

impl ChannelEvent {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Whether a listener survives its first firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerMode {
    Once,
    Persistent,
}

/// Registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, transport not yet confirmed
    Connecting,
    Open,
    /// Transport failed; unusable until a new channel is opened
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

struct Listener {
    id: ListenerId,
    mode: ListenerMode,
    callback: ListenerCallback,
}

struct Registry {
    state: ConnectionState,
    next_id: u64,
    by_event: HashMap<String, Vec<Listener>>,
}

impl Registry {
    fn contains(&self, event: &str, id: ListenerId) -> bool {
        self.by_event
            .get(event)
            .is_some_and(|listeners| listeners.iter().any(|l| l.id == id))
    }
}

struct Inner {
    endpoint: Url,
    registry: Mutex<Registry>,
    shutdown: CancellationToken,
}

/// Shared handle to one event connection
#[derive(Clone)]
pub struct StateChannel {
    inner: Arc<Inner>,
}

impl fmt::Debug for StateChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateChannel")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl StateChannel {
    /// Create a channel in the `Connecting` state with no listeners
    pub fn new(endpoint: Url) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint,
                registry: Mutex::new(Registry {
                    state: ConnectionState::Connecting,
                    next_id: 0,
                    by_event: HashMap::new(),
                }),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.registry.lock().state
    }

    pub fn is_live(&self) -> bool {
        self.state().is_live()
    }

    /// Cancelled when the channel closes or fails; transports select on it
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Register a listener
    ///
    /// Returns `None` if the channel is no longer live.
    pub fn add_listener<F>(&self, event: &str, mode: ListenerMode, callback: F) -> Option<ListenerId>
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let mut registry = self.inner.registry.lock();
        if !registry.state.is_live() {
            return None;
        }

        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry
            .by_event
            .entry(event.to_string())
            .or_default()
            .push(Listener {
                id,
                mode,
                callback: Arc::new(callback),
            });
        debug!(endpoint = %self.inner.endpoint, event, ?id, ?mode, "Listener added");
        Some(id)
    }

    /// Unregister a listener; `false` if it was not registered
    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        let mut registry = self.inner.registry.lock();
        let Some(listeners) = registry.by_event.get_mut(event) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            registry.by_event.remove(event);
        }
        if removed {
            debug!(endpoint = %self.inner.endpoint, event, ?id, "Listener removed");
        }
        removed
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .registry
            .lock()
            .by_event
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Deliver an event to its listeners; returns how many fired
    pub fn dispatch(&self, event: &ChannelEvent) -> usize {
        let batch: Vec<(ListenerId, ListenerMode, ListenerCallback)> = {
            let mut registry = self.inner.registry.lock();
            if !registry.state.is_live() {
                return 0;
            }
            let Some(listeners) = registry.by_event.get_mut(&event.name) else {
                return 0;
            };
            let batch = listeners
                .iter()
                .map(|l| (l.id, l.mode, Arc::clone(&l.callback)))
                .collect();
            listeners.retain(|l| l.mode == ListenerMode::Persistent);
            if listeners.is_empty() {
                registry.by_event.remove(&event.name);
            }
            batch
        };

        let mut fired = 0;
        for (id, mode, callback) in batch {
            {
                let registry = self.inner.registry.lock();
                if !registry.state.is_live() {
                    break;
                }
                if mode == ListenerMode::Persistent && !registry.contains(&event.name, id) {
                    continue;
                }
            }
            callback(event);
            fired += 1;
        }
        fired
    }

    /// Mark the transport as connected
    pub fn mark_open(&self) {
        let mut registry = self.inner.registry.lock();
        if registry.state == ConnectionState::Connecting {
            registry.state = ConnectionState::Open;
            debug!(endpoint = %self.inner.endpoint, "State channel open");
        }
    }

    /// Mark the transport as failed; listeners are dropped
    ///
    /// Returns `false` if the channel was already closed or failed.
    pub fn mark_failed(&self, error: &ChannelError) -> bool {
        let listeners = {
            let mut registry = self.inner.registry.lock();
            if !registry.state.is_live() {
                return false;
            }
            registry.state = ConnectionState::Failed;
            std::mem::take(&mut registry.by_event)
        };
        self.inner.shutdown.cancel();
        warn!(endpoint = %self.inner.endpoint, error = %error, "State channel failed");
        drop(listeners);
        true
    }

    /// Close the channel
    ///
    /// Idempotent: returns `true` only for the call that moved the channel to
    /// `Closed`.
    pub fn close(&self) -> bool {
        let listeners = {
            let mut registry = self.inner.registry.lock();
            if registry.state == ConnectionState::Closed {
                return false;
            }
            registry.state = ConnectionState::Closed;
            std::mem::take(&mut registry.by_event)
        };
        self.inner.shutdown.cancel();
        debug!(endpoint = %self.inner.endpoint, "State channel closed");
        // Callbacks may own resources that must not drop under the lock
        drop(listeners);
        true
    }
}
