//! Subscriber registry: kind -> ordered list of handlers.
//!
//! Dispatch never runs handlers under the lock. A worker clones the list for
//! one kind (`snapshot`) and works on that copy, so subscribe/unsubscribe calls
//! made after the snapshot never affect a job already being dispatched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::subscription::Handler;
use crate::types::{EventKind, SubscriberId};

/// A registered handler
pub(crate) struct Subscriber {
    pub(crate) id: SubscriberId,
    pub(crate) kind: EventKind,
    pub(crate) handler: Arc<dyn Handler>,
}

pub(crate) struct Registry {
    subscribers: RwLock<HashMap<EventKind, Vec<Arc<Subscriber>>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn insert(&self, kind: EventKind, handler: Arc<dyn Handler>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber = Arc::new(Subscriber { id, kind, handler });
        self.write().entry(kind).or_default().push(subscriber);
        id
    }

    /// Returns `false` if the subscriber was already gone.
    pub(crate) fn remove(&self, kind: EventKind, id: SubscriberId) -> bool {
        let mut subscribers = self.write();
        let Some(list) = subscribers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(&kind);
        }
        removed
    }

    pub(crate) fn snapshot(&self, kind: EventKind) -> Vec<Arc<Subscriber>> {
        self.read().get(&kind).cloned().unwrap_or_default()
    }

    pub(crate) fn len(&self, kind: EventKind) -> usize {
        self.read().get(&kind).map_or(0, Vec::len)
    }

    // A panicking handler never holds this lock, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<EventKind, Vec<Arc<Subscriber>>>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EventKind, Vec<Arc<Subscriber>>>> {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
