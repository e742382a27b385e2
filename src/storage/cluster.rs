//! In-process memcached cluster state
//!
//! One [`Node`] per server address, each a hash map of items with memcached's
//! storage, CAS and TTL semantics. Expired items are removed lazily on access.

use crate::backend::StoreMode;
use crate::error::ReturnCode;
use crate::storage::value::{Item, unix_now};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// Largest item a node accepts (memcached's default `-I 1m`)
pub const MAX_ITEM_SIZE: usize = 1024 * 1024;

/// Shared cluster state; clones share the same nodes
#[derive(Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<Mutex<ClusterState>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `key` fail with `code` until cleared
    pub fn inject_fault(&self, key: impl AsRef<[u8]>, code: ReturnCode) {
        self.inner.lock().faults.insert(key.as_ref().to_vec(), code);
    }

    pub fn clear_faults(&self) {
        self.inner.lock().faults.clear();
    }

    /// Number of live items across all nodes
    pub fn item_count(&self) -> usize {
        let mut state = self.inner.lock();
        let now = unix_now();
        state
            .nodes
            .values_mut()
            .map(|node| {
                node.items.retain(|_, v| !v.is_expired_at(now));
                node.items.len()
            })
            .sum()
    }

    /// Raw flags of a stored item, for inspecting what went over the wire
    pub fn raw_flags(&self, key: &[u8]) -> Option<u32> {
        let state = self.inner.lock();
        state
            .nodes
            .values()
            .find_map(|node| node.items.get(key).filter(|v| !v.is_expired()))
            .map(|v| v.flags)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.inner.lock()
    }
}

#[derive(Default)]
pub(crate) struct ClusterState {
    nodes: HashMap<String, Node>,
    faults: HashMap<Vec<u8>, ReturnCode>,
    last_cas: u64,
}

impl ClusterState {
    pub(crate) fn node(&mut self, address: &str) -> &mut Node {
        self.nodes
            .entry(address.to_string())
            .or_insert_with(Node::new)
    }

    pub(crate) fn fault(&self, key: &[u8]) -> Option<ReturnCode> {
        self.faults.get(key).copied()
    }

    pub(crate) fn next_cas(&mut self) -> u64 {
        self.last_cas += 1;
        self.last_cas
    }
}

#[derive(Debug, Default, Clone)]
struct NodeStats {
    cmd_get: u64,
    cmd_set: u64,
    cmd_touch: u64,
    cmd_flush: u64,
    get_hits: u64,
    get_misses: u64,
    delete_hits: u64,
    delete_misses: u64,
    incr_hits: u64,
    incr_misses: u64,
    decr_hits: u64,
    decr_misses: u64,
    cas_hits: u64,
    cas_misses: u64,
    cas_badval: u64,
    touch_hits: u64,
    touch_misses: u64,
    total_items: u64,
}

/// One emulated server
pub(crate) struct Node {
    items: HashMap<Vec<u8>, Item>,
    stats: NodeStats,
    started: Instant,
}

impl Node {
    fn new() -> Self {
        Self {
            items: HashMap::new(),
            stats: NodeStats::default(),
            started: Instant::now(),
        }
    }

    /// Drop `key` if it has expired; true if a live item remains
    fn live(&mut self, key: &[u8]) -> bool {
        if self.items.get(key).is_some_and(Item::is_expired) {
            self.items.remove(key);
        }
        self.items.contains_key(key)
    }

    pub(crate) fn get(&mut self, key: &[u8]) -> Option<&Item> {
        self.stats.cmd_get += 1;
        if self.live(key) {
            self.stats.get_hits += 1;
            self.items.get(key)
        } else {
            self.stats.get_misses += 1;
            None
        }
    }

    fn insert(&mut self, key: &[u8], data: &[u8], flags: u32, exptime: u32, cas: u64) {
        self.stats.total_items += 1;
        self.items.insert(
            key.to_vec(),
            Item::new(data.to_vec(), flags, exptime, cas),
        );
    }

    pub(crate) fn store(
        &mut self,
        mode: StoreMode,
        key: &[u8],
        data: &[u8],
        flags: u32,
        exptime: u32,
        cas: u64,
    ) -> ReturnCode {
        self.stats.cmd_set += 1;
        if data.len() > MAX_ITEM_SIZE {
            return ReturnCode::E2Big;
        }

        let present = self.live(key);
        match mode {
            StoreMode::Set => {}
            StoreMode::Add if present => return ReturnCode::NotStored,
            StoreMode::Add => {}
            StoreMode::Replace | StoreMode::Append | StoreMode::Prepend if !present => {
                return ReturnCode::NotStored;
            }
            StoreMode::Replace => {}
            StoreMode::Append | StoreMode::Prepend => {
                let Some(item) = self.items.get_mut(key) else {
                    return ReturnCode::NotStored;
                };
                if item.data.len() + data.len() > MAX_ITEM_SIZE {
                    return ReturnCode::E2Big;
                }
                if mode == StoreMode::Append {
                    item.data.extend_from_slice(data);
                } else {
                    item.data.splice(0..0, data.iter().copied());
                }
                item.cas = cas;
                return ReturnCode::Success;
            }
        }

        self.insert(key, data, flags, exptime, cas);
        ReturnCode::Success
    }

    pub(crate) fn compare_and_swap(
        &mut self,
        key: &[u8],
        data: &[u8],
        flags: u32,
        exptime: u32,
        expected: u64,
        cas: u64,
    ) -> ReturnCode {
        self.stats.cmd_set += 1;
        if data.len() > MAX_ITEM_SIZE {
            return ReturnCode::E2Big;
        }
        if !self.live(key) {
            self.stats.cas_misses += 1;
            return ReturnCode::NotFound;
        }
        if self.items.get(key).map(|item| item.cas) != Some(expected) {
            self.stats.cas_badval += 1;
            return ReturnCode::DataExists;
        }
        self.stats.cas_hits += 1;
        self.insert(key, data, flags, exptime, cas);
        ReturnCode::Success
    }

    pub(crate) fn delete(&mut self, key: &[u8]) -> ReturnCode {
        if self.live(key) {
            self.items.remove(key);
            self.stats.delete_hits += 1;
            ReturnCode::Success
        } else {
            self.stats.delete_misses += 1;
            ReturnCode::NotFound
        }
    }

    /// incr wraps at 2^64, decr stops at zero
    pub(crate) fn arithmetic(
        &mut self,
        key: &[u8],
        increment: bool,
        delta: u64,
        cas: u64,
    ) -> Result<u64, ReturnCode> {
        if !self.live(key) {
            if increment {
                self.stats.incr_misses += 1;
            } else {
                self.stats.decr_misses += 1;
            }
            return Err(ReturnCode::NotFound);
        }

        let item = self.items.get_mut(key).ok_or(ReturnCode::NotFound)?;
        let current = item.counter().ok_or(ReturnCode::ClientError)?;
        let updated = if increment {
            self.stats.incr_hits += 1;
            current.wrapping_add(delta)
        } else {
            self.stats.decr_hits += 1;
            current.saturating_sub(delta)
        };
        item.set_counter(updated);
        item.cas = cas;
        Ok(updated)
    }

    pub(crate) fn touch(&mut self, key: &[u8], exptime: u32) -> ReturnCode {
        self.stats.cmd_touch += 1;
        if !self.live(key) {
            self.stats.touch_misses += 1;
            return ReturnCode::NotFound;
        }
        if let Some(item) = self.items.get_mut(key) {
            item.touch(exptime);
        }
        self.stats.touch_hits += 1;
        ReturnCode::Success
    }

    /// Invalidate everything now, or `delay` seconds from now
    pub(crate) fn flush(&mut self, delay: u32) {
        self.stats.cmd_flush += 1;
        if delay == 0 {
            self.items.clear();
            return;
        }
        let deadline = unix_now() + u64::from(delay);
        for item in self.items.values_mut() {
            item.expire_by(deadline);
        }
    }

    pub(crate) fn stats(&mut self) -> BTreeMap<String, String> {
        let now = unix_now();
        self.items.retain(|_, v| !v.is_expired_at(now));

        let s = &self.stats;
        let bytes: usize = self.items.iter().map(|(k, v)| k.len() + v.data.len()).sum();
        let entries = [
            ("pid", std::process::id().to_string()),
            ("uptime", self.started.elapsed().as_secs().to_string()),
            ("time", now.to_string()),
            ("version", env!("CARGO_PKG_VERSION").to_string()),
            ("curr_items", self.items.len().to_string()),
            ("total_items", s.total_items.to_string()),
            ("bytes", bytes.to_string()),
            ("cmd_get", s.cmd_get.to_string()),
            ("cmd_set", s.cmd_set.to_string()),
            ("cmd_touch", s.cmd_touch.to_string()),
            ("cmd_flush", s.cmd_flush.to_string()),
            ("get_hits", s.get_hits.to_string()),
            ("get_misses", s.get_misses.to_string()),
            ("delete_hits", s.delete_hits.to_string()),
            ("delete_misses", s.delete_misses.to_string()),
            ("incr_hits", s.incr_hits.to_string()),
            ("incr_misses", s.incr_misses.to_string()),
            ("decr_hits", s.decr_hits.to_string()),
            ("decr_misses", s.decr_misses.to_string()),
            ("cas_hits", s.cas_hits.to_string()),
            ("cas_misses", s.cas_misses.to_string()),
            ("cas_badval", s.cas_badval.to_string()),
            ("touch_hits", s.touch_hits.to_string()),
            ("touch_misses", s.touch_misses.to_string()),
        ];
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new()
    }

    #[test]
    fn test_storage_modes() {
        let mut n = node();
        assert_eq!(n.store(StoreMode::Replace, b"k", b"v", 0, 0, 1), ReturnCode::NotStored);
        assert_eq!(n.store(StoreMode::Add, b"k", b"v", 0, 0, 2), ReturnCode::Success);
        assert_eq!(n.store(StoreMode::Add, b"k", b"w", 0, 0, 3), ReturnCode::NotStored);
        assert_eq!(n.store(StoreMode::Append, b"k", b"!", 0, 0, 4), ReturnCode::Success);
        assert_eq!(n.store(StoreMode::Prepend, b"k", b"<", 0, 0, 5), ReturnCode::Success);
        assert_eq!(n.get(b"k").unwrap().data, b"<v!");
        assert_eq!(n.store(StoreMode::Append, b"x", b"!", 0, 0, 6), ReturnCode::NotStored);
    }

    #[test]
    fn test_append_keeps_flags() {
        let mut n = node();
        n.store(StoreMode::Set, b"k", b"a", 16, 0, 1);
        n.store(StoreMode::Append, b"k", b"b", 0, 0, 2);
        let item = n.get(b"k").unwrap();
        assert_eq!(item.flags, 16);
        assert_eq!(item.cas, 2);
    }

    #[test]
    fn test_compare_and_swap() {
        let mut n = node();
        assert_eq!(n.compare_and_swap(b"k", b"v", 0, 0, 1, 2), ReturnCode::NotFound);
        n.store(StoreMode::Set, b"k", b"v", 0, 0, 10);
        assert_eq!(n.compare_and_swap(b"k", b"w", 0, 0, 9, 11), ReturnCode::DataExists);
        assert_eq!(n.compare_and_swap(b"k", b"w", 0, 0, 10, 12), ReturnCode::Success);
        assert_eq!(n.get(b"k").unwrap().data, b"w");
    }

    #[test]
    fn test_arithmetic() {
        let mut n = node();
        assert_eq!(n.arithmetic(b"c", true, 1, 1), Err(ReturnCode::NotFound));

        n.store(StoreMode::Set, b"c", b"10", 0, 0, 1);
        assert_eq!(n.arithmetic(b"c", true, 5, 2), Ok(15));
        assert_eq!(n.arithmetic(b"c", false, 20, 3), Ok(0));

        n.store(StoreMode::Set, b"c", u64::MAX.to_string().as_bytes(), 0, 0, 4);
        assert_eq!(n.arithmetic(b"c", true, 2, 5), Ok(1));

        n.store(StoreMode::Set, b"t", b"text", 0, 0, 6);
        assert_eq!(n.arithmetic(b"t", true, 1, 7), Err(ReturnCode::ClientError));
    }

    #[test]
    fn test_delete_and_touch() {
        let mut n = node();
        assert_eq!(n.delete(b"k"), ReturnCode::NotFound);
        assert_eq!(n.touch(b"k", 10), ReturnCode::NotFound);
        n.store(StoreMode::Set, b"k", b"v", 0, 0, 1);
        assert_eq!(n.touch(b"k", 10), ReturnCode::Success);
        assert!(n.get(b"k").unwrap().deadline.is_some());
        assert_eq!(n.delete(b"k"), ReturnCode::Success);
        assert!(n.get(b"k").is_none());
    }

    #[test]
    fn test_too_big() {
        let mut n = node();
        let big = vec![0u8; MAX_ITEM_SIZE + 1];
        assert_eq!(n.store(StoreMode::Set, b"k", &big, 0, 0, 1), ReturnCode::E2Big);
    }

    #[test]
    fn test_expired_items_are_misses() {
        let mut n = node();
        // An absolute timestamp in the past
        n.store(StoreMode::Set, b"k", b"v", 0, 2_592_001, 1);
        assert!(n.get(b"k").is_none());
        assert_eq!(n.store(StoreMode::Add, b"k", b"v", 0, 0, 2), ReturnCode::Success);
    }

    #[test]
    fn test_flush() {
        let mut n = node();
        n.store(StoreMode::Set, b"a", b"1", 0, 0, 1);
        n.store(StoreMode::Set, b"b", b"2", 0, 0, 2);
        n.flush(60);
        assert!(n.get(b"a").is_some());
        n.flush(0);
        assert!(n.get(b"a").is_none());
    }

    #[test]
    fn test_stats() {
        let mut n = node();
        n.store(StoreMode::Set, b"a", b"1", 0, 0, 1);
        n.get(b"a");
        n.get(b"missing");
        let stats = n.stats();
        assert_eq!(stats["curr_items"], "1");
        assert_eq!(stats["get_hits"], "1");
        assert_eq!(stats["get_misses"], "1");
        assert_eq!(stats["cmd_set"], "1");
    }

    #[test]
    fn test_cluster_faults() {
        let cluster = MemoryCluster::new();
        cluster.inject_fault("k", ReturnCode::ConnectionFailure);
        assert_eq!(cluster.lock().fault(b"k"), Some(ReturnCode::ConnectionFailure));
        cluster.clear_faults();
        assert_eq!(cluster.lock().fault(b"k"), None);
    }
}
