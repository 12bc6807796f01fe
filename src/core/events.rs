/*
 * A small callback registry used as the notification channel between the
 * classification components and their consumers. Each subscriber is keyed by a
 * `SubscriptionId` so it can be removed again without affecting the others.
 * The registry is cheap to clone; clones share the same set of subscribers.
 */
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub struct Subscribers<E> {
    callbacks: Arc<Mutex<BTreeMap<SubscriptionId, Callback<E>>>>,
}

impl<E> Clone for Subscribers<E> {
    fn clone(&self) -> Self {
        Subscribers {
            callbacks: Arc::clone(&self.callbacks),
        }
    }
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Subscribers<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Subscribers({})", self.len())
    }
}

impl<E> Subscribers<E> {
    pub fn new() -> Self {
        Subscribers {
            callbacks: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<SubscriptionId, Callback<E>>> {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, Arc::new(callback));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /*
     * Delivers `event` to every subscriber in subscription order. The callbacks are
     * collected before invocation so a subscriber may subscribe or unsubscribe from
     * inside its own callback without deadlocking.
     */
    pub fn notify(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self.lock().values().cloned().collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
