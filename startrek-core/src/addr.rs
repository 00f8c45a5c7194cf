//! Socket addressing and the wildcard-aware `AddressPair` lookup map.
//!
//! ## Intent (Why)
//! - Every owner in this workspace (channels, connections, dockers) is keyed
//!   by a `(remote?, local?)` pair rather than a single address, because a
//!   bound-but-unconnected UDP channel has a local address and no fixed
//!   remote peer, while a connected TCP channel has both.
//! - `ANY_ADDRESS` lets a wildcard registration ("any remote on this local
//!   port") coexist with exact registrations without a separate map shape.
//!
//! ## Contract (What)
//! - `get` probes `(remote, local)`, then `(remote, ANY)`, then `(ANY, local)`,
//!   returning the first hit.
//! - `put` stores under exactly the key given and refreshes the direct cache.
//! - `values` returns an owned snapshot so callers may mutate the map while
//!   iterating the snapshot (spec.md §4.1, §5).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// A `(host, port)` pair. Two addresses are equal iff both fields match.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SocketAddress {
    host: String,
    port: u16,
}

impl SocketAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The process-wide wildcard sentinel. Distinct from "no address" —
    /// callers represent "missing" with `Option::None`, never with `ANY`.
    pub fn any() -> Self {
        Self::new("*", 0)
    }

    pub fn is_any(&self) -> bool {
        self.host == "*" && self.port == 0
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<std::net::SocketAddr> for SocketAddress {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

type Key = (Option<SocketAddress>, Option<SocketAddress>);

struct Inner<V> {
    map: HashMap<Key, V>,
    /// Last `put` key/value, checked before the hashmap on repeat lookups.
    direct_cache: Option<(Key, V)>,
}

/// A mapping from `(remote?, local?)` to `V`, with wildcard fallback lookup.
///
/// `V` must be `Clone` because both the direct cache and `values()` hand out
/// owned copies; every implementation in this workspace stores `Arc<T>`
/// here, so cloning is a refcount bump.
pub struct AddressPair<V> {
    inner: Mutex<Inner<V>>,
}

impl<V> Default for AddressPair<V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                direct_cache: None,
            }),
        }
    }
}

impl<V: Clone> AddressPair<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `(remote, local)`, falling back to `(remote, ANY)` then
    /// `(ANY, local)`.
    pub fn get(&self, remote: Option<&SocketAddress>, local: Option<&SocketAddress>) -> Option<V> {
        let inner = self.inner.lock();
        let key = (remote.cloned(), local.cloned());

        if let Some((cached_key, value)) = &inner.direct_cache {
            if cached_key == &key {
                return Some(value.clone());
            }
        }

        if let Some(value) = inner.map.get(&key) {
            return Some(value.clone());
        }
        if remote.is_some() {
            let wildcard_local = (remote.cloned(), Some(SocketAddress::any()));
            if let Some(value) = inner.map.get(&wildcard_local) {
                return Some(value.clone());
            }
        }
        if local.is_some() {
            let wildcard_remote = (Some(SocketAddress::any()), local.cloned());
            if let Some(value) = inner.map.get(&wildcard_remote) {
                return Some(value.clone());
            }
        }
        None
    }

    /// Stores `value` under exactly `(remote, local)` and refreshes the
    /// direct cache.
    pub fn put(&self, remote: Option<SocketAddress>, local: Option<SocketAddress>, value: V) {
        let mut inner = self.inner.lock();
        let key = (remote, local);
        inner.map.insert(key.clone(), value.clone());
        inner.direct_cache = Some((key, value));
    }

    /// Removes the entry stored under exactly `(remote, local)`. If `expect`
    /// is given, the removal only proceeds when the stored value is the one
    /// expected (guards against removing a value that was since replaced).
    pub fn remove(
        &self,
        remote: Option<&SocketAddress>,
        local: Option<&SocketAddress>,
        expect: Option<&V>,
    ) -> Option<V>
    where
        V: PartialEq,
    {
        let mut inner = self.inner.lock();
        let key = (remote.cloned(), local.cloned());
        let should_remove = match (&expect, inner.map.get(&key)) {
            (Some(expected), Some(stored)) => *expected == stored,
            (None, Some(_)) => true,
            _ => false,
        };
        if !should_remove {
            return None;
        }
        let removed = inner.map.remove(&key);
        if let Some((cached_key, _)) = &inner.direct_cache {
            if cached_key == &key {
                inner.direct_cache = None;
            }
        }
        removed
    }

    /// An owned snapshot of every stored value, safe to iterate while the
    /// caller (or another thread) mutates the map concurrently.
    pub fn values(&self) -> Vec<V> {
        let inner = self.inner.lock();
        inner.map.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    /// Drops every entry for which `keep` returns `false`, used by the Hub
    /// and Gate's periodic cleanup of Error-state channels/connections/
    /// dockers (spec.md §4.7, §4.8). Invalidates the direct cache if it
    /// pointed at a dropped entry.
    pub fn retain(&self, mut keep: impl FnMut(&V) -> bool) {
        let mut inner = self.inner.lock();
        inner.map.retain(|_, v| keep(v));
        if let Some((_, value)) = &inner.direct_cache {
            if !keep(value) {
                inner.direct_cache = None;
            }
        }
    }
}

/// Convenience alias for the common case of sharing the map across threads.
pub type SharedAddressPair<V> = Arc<AddressPair<V>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn r(host: &str, port: u16) -> SocketAddress {
        SocketAddress::new(host, port)
    }

    #[test]
    fn lookup_order_prefers_exact_then_remote_any_then_any_local() {
        let map: AddressPair<&'static str> = AddressPair::new();
        let remote = r("203.0.113.1", 9000);
        let local = r("127.0.0.1", 4000);

        map.put(Some(remote.clone()), Some(local.clone()), "exact");
        assert_eq!(map.get(Some(&remote), Some(&local)), Some("exact"));

        assert!(
            map.remove(Some(&remote), Some(&local), Some(&"exact"))
                .is_some()
        );
        assert_eq!(map.get(Some(&remote), Some(&local)), None);

        map.put(Some(remote.clone()), Some(SocketAddress::any()), "remote-any");
        assert_eq!(map.get(Some(&remote), Some(&local)), Some("remote-any"));

        assert!(
            map.remove(Some(&remote), Some(&SocketAddress::any()), Some(&"remote-any"))
                .is_some()
        );
        assert_eq!(map.get(Some(&remote), Some(&local)), None);

        map.put(Some(SocketAddress::any()), Some(local.clone()), "any-local");
        assert_eq!(map.get(Some(&remote), Some(&local)), Some("any-local"));
    }

    #[test]
    fn values_is_a_snapshot() {
        let map: AddressPair<i32> = AddressPair::new();
        map.put(Some(r("a", 1)), None, 1);
        map.put(Some(r("b", 2)), None, 2);
        let mut snapshot = map.values();
        snapshot.sort_unstable();
        assert_eq!(snapshot, vec![1, 2]);
    }

    #[test]
    fn direct_cache_serves_repeat_lookup() {
        let map: AddressPair<&'static str> = AddressPair::new();
        let remote = r("198.51.100.7", 53);
        map.put(Some(remote.clone()), None, "first");
        assert_eq!(map.get(Some(&remote), None), Some("first"));
        assert_eq!(map.get(Some(&remote), None), Some("first"));
    }
}
