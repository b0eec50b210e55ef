//! Listener registry
//!
//! Listeners are callbacks keyed by an opaque [`ListenerHandle`]. Dispatch
//! takes a snapshot of the subscribers for the event's kind and invokes them
//! without holding the registry lock, so a listener may subscribe or
//! unsubscribe from inside its own callback.

use super::{EventKind, ServerEvent};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Callback invoked for each matching event
pub type Listener = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Opaque subscription handle returned by [`ListenerRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerHandle(u64);

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

#[derive(Default)]
struct Inner {
    listeners: BTreeMap<ListenerHandle, Listener>,
    by_kind: HashMap<EventKind, BTreeSet<ListenerHandle>>,
}

/// Event kind to ordered listener set
#[derive(Default)]
pub struct ListenerRegistry {
    inner: RwLock<Inner>,
    next_handle: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for each kind in `kinds`
    ///
    /// # Arguments
    /// * `kinds` - Event kinds the listener receives
    /// * `listener` - Callback, invoked once per matching event
    ///
    /// # Returns
    /// Handle used to unsubscribe
    pub fn subscribe(&self, kinds: &[EventKind], listener: Listener) -> ListenerHandle {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));

        let mut inner = self.inner.write();
        inner.listeners.insert(handle, listener);
        for kind in kinds {
            inner.by_kind.entry(*kind).or_default().insert(handle);
        }

        trace!(handle = %handle, kinds = kinds.len(), "Listener subscribed");
        handle
    }

    pub fn subscribe_all(&self, listener: Listener) -> ListenerHandle {
        self.subscribe(&EventKind::ALL, listener)
    }

    /// Remove a listener from every kind; returns false for an unknown handle
    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        let mut inner = self.inner.write();
        if inner.listeners.remove(&handle).is_none() {
            return false;
        }
        for set in inner.by_kind.values_mut() {
            set.remove(&handle);
        }
        inner.by_kind.retain(|_, set| !set.is_empty());

        trace!(handle = %handle, "Listener unsubscribed");
        true
    }

    /// Invoke every current subscriber of `event.kind()` once, in subscription order
    ///
    /// # Returns
    /// Number of listeners invoked
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let snapshot: Vec<Listener> = {
            let inner = self.inner.read();
            match inner.by_kind.get(&event.kind()) {
                Some(handles) => handles
                    .iter()
                    .filter_map(|h| inner.listeners.get(h).cloned())
                    .collect(),
                None => return 0,
            }
        };

        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().listeners.is_empty()
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner.read().by_kind.get(&kind).map_or(0, |s| s.len())
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
