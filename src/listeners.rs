// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Listener registry shared by the cache and connectivity notifications.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub(crate) struct ListenerSet<T> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
}

impl<T: 'static> ListenerSet<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));

        let weak: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(set) = weak.upgrade() {
                set.listeners.lock().retain(|(lid, _)| *lid != id);
            }
        })
    }

    /// Invoke every listener. The registry lock is released first so a
    /// listener may subscribe or unsubscribe without deadlocking.
    pub(crate) fn notify(&self, value: &T) {
        let listeners: Vec<Listener<T>> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(value);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.lock().len()
    }
}

/// Handle returned by `subscribe`/`on_change`. Dropping it (or calling
/// [`Subscription::unsubscribe`]) removes the listener.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self { cancel: Some(Box::new(cancel)) }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keep the listener registered for the lifetime of the source.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_and_unsubscribe() {
        let set = ListenerSet::<u32>::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let s = seen.clone();
        let sub = set.subscribe(move |v| { s.fetch_add(*v as usize, Ordering::SeqCst); });
        set.notify(&2);
        set.notify(&3);
        assert_eq!(seen.load(Ordering::SeqCst), 5);

        sub.unsubscribe();
        set.notify(&10);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_drop_unsubscribes_and_detach_keeps() {
        let set = ListenerSet::<()>::new();
        {
            let _sub = set.subscribe(|_| {});
            assert_eq!(set.len(), 1);
        }
        assert_eq!(set.len(), 0);

        set.subscribe(|_| {}).detach();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_subscription_outliving_set_is_harmless() {
        let set = ListenerSet::<()>::new();
        let sub = set.subscribe(|_| {});
        drop(set);
        sub.unsubscribe();
    }
}
