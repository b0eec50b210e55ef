//! Memoized permission results
//!
//! Entries are stamped with the server's ACL generation. Any ACL-relevant
//! mutation bumps the generation, which makes every stamped entry stale on its
//! next lookup. Temporary group reassignment drops the affected session's
//! entry eagerly instead.

use super::Permissions;
use crate::metrics;
use crate::types::{ChannelId, SessionId};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct CacheEntry {
    generation: u64,
    permissions: HashMap<ChannelId, Permissions>,
}

/// Per-session permission cache.
///
/// Interior mutability lets permission checks fill the cache while the server
/// state is only read-locked.
#[derive(Debug, Default)]
pub struct AclCache {
    entries: Mutex<HashMap<SessionId, CacheEntry>>,
}

impl AclCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached result for `(session, channel)` or compute and store it
    pub fn get_or_compute(
        &self,
        session: SessionId,
        channel: ChannelId,
        generation: u64,
        compute: impl FnOnce() -> Permissions,
    ) -> Permissions {
        let mut entries = self.entries.lock();
        let entry = entries.entry(session).or_default();

        if entry.generation != generation {
            entry.permissions.clear();
            entry.generation = generation;
        }

        if let Some(p) = entry.permissions.get(&channel) {
            metrics::record_counter(metrics::ACL_CACHE_HITS, 1);
            return *p;
        }

        metrics::record_counter(metrics::ACL_CACHE_MISSES, 1);
        let p = compute();
        entry.permissions.insert(channel, p);
        p
    }

    /// Drop everything cached for `session`; returns whether anything was cached
    pub fn invalidate(&self, session: SessionId) -> bool {
        self.entries.lock().remove(&session).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.entries.lock().contains_key(&session)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_hit_skips_compute() {
        let cache = AclCache::new();
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Permissions::DEFAULT
        };

        cache.get_or_compute(SessionId(1), ChannelId::ROOT, 0, compute);
        cache.get_or_compute(SessionId(1), ChannelId::ROOT, 0, compute);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_generation_bump_recomputes() {
        let cache = AclCache::new();
        cache.get_or_compute(SessionId(1), ChannelId::ROOT, 0, || Permissions::DEFAULT);

        let p = cache.get_or_compute(SessionId(1), ChannelId::ROOT, 1, || Permissions::ALL);
        assert_eq!(p, Permissions::ALL);
    }

    #[test]
    fn test_invalidate() {
        let cache = AclCache::new();
        cache.get_or_compute(SessionId(1), ChannelId::ROOT, 0, || Permissions::DEFAULT);
        cache.get_or_compute(SessionId(2), ChannelId::ROOT, 0, || Permissions::DEFAULT);

        assert!(cache.invalidate(SessionId(1)));
        assert!(!cache.invalidate(SessionId(1)));
        assert!(!cache.contains(SessionId(1)));
        assert!(cache.contains(SessionId(2)));
        assert_eq!(cache.len(), 1);
    }
}
