// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Online/offline signal.
//!
//! The platform owns connectivity detection (and debouncing of flapping
//! radios). The engine only needs [`Connectivity::is_online`] and change
//! notifications. [`WatchConnectivity`] is a ready-made implementation the
//! host feeds from its platform events.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::listeners::{ListenerSet, Subscription};

/// Handle for a connectivity listener; dropping it unsubscribes.
pub type ConnectivitySubscription = Subscription;

pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    /// Register `callback` for online/offline transitions. The callback
    /// receives the new state and must not block.
    fn on_change(&self, callback: Box<dyn Fn(bool) + Send + Sync>) -> ConnectivitySubscription;
}

/// Connectivity state pushed by the host.
///
/// # Example
///
/// ```
/// use lead_sync::{Connectivity, WatchConnectivity};
///
/// let net = WatchConnectivity::new(true);
/// assert!(net.is_online());
///
/// net.set_online(false);
/// assert!(!net.is_online());
/// ```
pub struct WatchConnectivity {
    state: watch::Sender<bool>,
    listeners: Arc<ListenerSet<bool>>,
}

impl WatchConnectivity {
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            state,
            listeners: ListenerSet::new(),
        }
    }

    /// Update the state. Listeners run only on an actual transition.
    pub fn set_online(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!(online, "Connectivity changed");
            self.listeners.notify(&online);
        }
    }

    /// Async view of the same state.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

impl Default for WatchConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for WatchConnectivity {
    fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    fn on_change(&self, callback: Box<dyn Fn(bool) + Send + Sync>) -> ConnectivitySubscription {
        self.listeners.subscribe(move |online: &bool| callback(*online))
    }
}
