//! Keyed observer registry.
//!
//! Maps a topic key to an ordered list of callbacks. `emit` invokes the
//! callbacks registered for a key synchronously, in registration order. The
//! lock is released before any callback runs, so callbacks may register or
//! remove listeners (including themselves) without deadlocking.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

/// A registered callback.
pub type Listener<V> = Arc<dyn Fn(&V) + Send + Sync>;

/// Identifies one registration for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Inner<K, V> {
    next_id: u64,
    topics: HashMap<K, Vec<(ListenerId, Listener<V>)>>,
}

/// Topic key → callbacks.
pub struct Subject<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> Default for Subject<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Subject<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                topics: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        // Callbacks never run under the lock, so a poisoned lock only means a
        // panic elsewhere; the map itself is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `listener` for `key`.
    pub fn listen(&self, key: K, listener: impl Fn(&V) + Send + Sync + 'static) -> ListenerId {
        let mut inner = self.lock();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner
            .topics
            .entry(key)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove one registration. Returns whether it was present.
    pub fn remove(&self, key: &K, id: ListenerId) -> bool {
        let mut inner = self.lock();
        let Some(listeners) = inner.topics.get_mut(key) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            inner.topics.remove(key);
        }
        removed
    }

    /// Invoke every listener of `key` with `value`. Returns how many ran.
    pub fn emit(&self, key: &K, value: &V) -> usize {
        let listeners: Vec<Listener<V>> = match self.lock().topics.get(key) {
            Some(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            None => return 0,
        };
        for listener in &listeners {
            listener(value);
        }
        listeners.len()
    }

    /// Number of listeners registered for `key`.
    pub fn listener_count(&self, key: &K) -> usize {
        self.lock().topics.get(key).map_or(0, Vec::len)
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.lock().topics.clear();
    }
}
