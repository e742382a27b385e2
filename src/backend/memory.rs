//! In-process collaborator backed by a [`MemoryCluster`]

use crate::backend::{FetchResult, Memcached, Router, ServerSpec, ServerStats, StoreMode};
use crate::behavior::{Behavior, BehaviorSet};
use crate::error::ReturnCode;
use crate::protocol::{MAX_KEY_LENGTH, is_printable_key};
use crate::storage::{ClusterState, MemoryCluster};
use parking_lot::MutexGuard;
use std::collections::VecDeque;
use tracing::trace;

/// A handle on an in-process cluster.
///
/// Every server address names one node of the shared [`MemoryCluster`];
/// handles cloned from each other, or built over the same cluster, see the
/// same items.
pub struct MemoryBackend {
    cluster: MemoryCluster,
    servers: Vec<ServerSpec>,
    behaviors: BehaviorSet,
    router: Router,
    cursor: VecDeque<Result<FetchResult, ReturnCode>>,
}

impl MemoryBackend {
    /// A handle on a fresh cluster
    pub fn new() -> Self {
        Self::with_cluster(MemoryCluster::new())
    }

    pub fn with_cluster(cluster: MemoryCluster) -> Self {
        Self {
            cluster,
            servers: Vec::new(),
            behaviors: BehaviorSet::new(),
            router: Router::empty(),
            cursor: VecDeque::new(),
        }
    }

    pub fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }

    /// Validate `key` and pick its server
    fn locate(&self, key: &[u8]) -> Result<String, ReturnCode> {
        if key.is_empty() {
            return Err(ReturnCode::NoKeyProvided);
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(ReturnCode::BadKeyProvided);
        }
        if self.behaviors.is_set(Behavior::VerifyKeys) && !is_printable_key(key) {
            return Err(ReturnCode::BadKeyProvided);
        }
        let index = self.router.route(key).ok_or(ReturnCode::NoServers)?;
        Ok(self.servers[index].address())
    }

    /// Lock the cluster for an operation on `key`, honoring injected faults
    fn open(&self, key: &[u8]) -> Result<(MutexGuard<'_, ClusterState>, String), ReturnCode> {
        let address = self.locate(key)?;
        let state = self.cluster.lock();
        if let Some(code) = state.fault(key) {
            trace!(key = %String::from_utf8_lossy(key), ?code, "injected fault");
            return Err(code);
        }
        Ok((state, address))
    }

    fn cas_enabled(&self) -> bool {
        self.behaviors.is_set(Behavior::SupportCas)
    }

    fn rebuild_router(&mut self) -> ReturnCode {
        match Router::build(&self.servers, &self.behaviors) {
            Ok(router) => {
                self.router = router;
                ReturnCode::Success
            }
            Err(code) => code,
        }
    }

    fn arithmetic(&mut self, key: &[u8], increment: bool, delta: u64) -> Result<u64, ReturnCode> {
        let (mut state, address) = self.open(key)?;
        let cas = state.next_cas();
        state.node(&address).arithmetic(key, increment, delta, cas)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Memcached for MemoryBackend {
    fn clone_handle(&self) -> Box<dyn Memcached> {
        Box::new(Self {
            cluster: self.cluster.clone(),
            servers: self.servers.clone(),
            behaviors: self.behaviors.clone(),
            router: self.router.clone(),
            cursor: VecDeque::new(),
        })
    }

    fn add_server(&mut self, server: ServerSpec) -> ReturnCode {
        self.servers.push(server);
        let rc = self.rebuild_router();
        if !rc.is_success() {
            self.servers.pop();
        }
        rc
    }

    fn servers(&self) -> &[ServerSpec] {
        &self.servers
    }

    fn set_behavior(&mut self, behavior: Behavior, value: u64) -> ReturnCode {
        let previous = self.behaviors.clone();
        let rc = self.behaviors.apply(behavior, value);
        if !rc.is_success() {
            return rc;
        }
        let rc = self.rebuild_router();
        if !rc.is_success() {
            self.behaviors = previous;
        }
        rc
    }

    fn get_behavior(&self, behavior: Behavior) -> u64 {
        self.behaviors.get(behavior)
    }

    fn store(&mut self, mode: StoreMode, key: &[u8], value: &[u8], ttl: u32, flags: u32) -> ReturnCode {
        let (mut state, address) = match self.open(key) {
            Ok(open) => open,
            Err(code) => return code,
        };
        let cas = state.next_cas();
        state.node(&address).store(mode, key, value, flags, ttl, cas)
    }

    fn store_cas(&mut self, key: &[u8], value: &[u8], ttl: u32, flags: u32, cas: u64) -> ReturnCode {
        let (mut state, address) = match self.open(key) {
            Ok(open) => open,
            Err(code) => return code,
        };
        let next = state.next_cas();
        state
            .node(&address)
            .compare_and_swap(key, value, flags, ttl, cas, next)
    }

    fn fetch_one(&mut self, key: &[u8]) -> Result<FetchResult, ReturnCode> {
        let with_cas = self.cas_enabled();
        let (mut state, address) = self.open(key)?;
        let item = state.node(&address).get(key).ok_or(ReturnCode::NotFound)?;
        Ok(FetchResult {
            key: key.to_vec(),
            value: item.data.clone(),
            flags: item.flags,
            cas: with_cas.then_some(item.cas),
        })
    }

    fn mget(&mut self, keys: &[Vec<u8>]) -> ReturnCode {
        self.cursor.clear();
        if self.router.is_empty() {
            return ReturnCode::NoServers;
        }

        let with_cas = self.cas_enabled();
        let mut cursor = VecDeque::with_capacity(keys.len());
        for key in keys {
            match self.open(key) {
                Ok((mut state, address)) => {
                    if let Some(item) = state.node(&address).get(key) {
                        cursor.push_back(Ok(FetchResult {
                            key: key.clone(),
                            value: item.data.clone(),
                            flags: item.flags,
                            cas: with_cas.then_some(item.cas),
                        }));
                    }
                }
                Err(code) => cursor.push_back(Err(code)),
            }
        }
        self.cursor = cursor;
        ReturnCode::Success
    }

    fn fetch_result(&mut self) -> Result<FetchResult, ReturnCode> {
        self.cursor.pop_front().unwrap_or(Err(ReturnCode::End))
    }

    fn delete(&mut self, key: &[u8], _ttl: u32) -> ReturnCode {
        match self.open(key) {
            Ok((mut state, address)) => state.node(&address).delete(key),
            Err(code) => code,
        }
    }

    fn increment(&mut self, key: &[u8], delta: u64) -> Result<u64, ReturnCode> {
        self.arithmetic(key, true, delta)
    }

    fn decrement(&mut self, key: &[u8], delta: u64) -> Result<u64, ReturnCode> {
        self.arithmetic(key, false, delta)
    }

    fn touch(&mut self, key: &[u8], ttl: u32) -> ReturnCode {
        match self.open(key) {
            Ok((mut state, address)) => state.node(&address).touch(key, ttl),
            Err(code) => code,
        }
    }

    fn flush(&mut self, expire: u32) -> ReturnCode {
        if self.servers.is_empty() {
            return ReturnCode::NoServers;
        }
        let mut state = self.cluster.lock();
        for server in &self.servers {
            state.node(&server.address()).flush(expire);
        }
        ReturnCode::Success
    }

    fn quit(&mut self) {
        self.cursor.clear();
    }

    fn stat(&mut self, args: Option<&str>) -> Result<Vec<ServerStats>, ReturnCode> {
        if self.servers.is_empty() {
            return Err(ReturnCode::NoServers);
        }
        // Only the general group is emulated
        if args.is_some_and(|a| !a.is_empty()) {
            return Err(ReturnCode::NotSupported);
        }

        let mut state = self.cluster.lock();
        Ok(self
            .servers
            .iter()
            .enumerate()
            .map(|(index, server)| {
                let address = server.address();
                let stats = state.node(&address).stats();
                ServerStats {
                    address,
                    index,
                    stats,
                }
            })
            .collect())
    }

    fn generate_hash(&self, key: &[u8]) -> u32 {
        self.behaviors.hash_algorithm().hash(key).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        backend.add_server(ServerSpec::tcp("a", 11211));
        backend.add_server(ServerSpec::tcp("b", 11211));
        backend
    }

    #[test]
    fn test_no_servers() {
        let mut backend = MemoryBackend::new();
        assert_eq!(
            backend.store(StoreMode::Set, b"k", b"v", 0, 0),
            ReturnCode::NoServers
        );
        assert_eq!(backend.mget(&[b"k".to_vec()]), ReturnCode::NoServers);
        assert_eq!(backend.flush(0), ReturnCode::NoServers);
    }

    #[test]
    fn test_store_and_fetch() {
        let mut backend = backend();
        assert_eq!(
            backend.store(StoreMode::Set, b"k", b"v", 0, 16),
            ReturnCode::Success
        );
        let item = backend.fetch_one(b"k").unwrap();
        assert_eq!(item.value, b"v");
        assert_eq!(item.flags, 16);
        assert_eq!(item.cas, None);
        assert_eq!(backend.fetch_one(b"missing"), Err(ReturnCode::NotFound));
    }

    #[test]
    fn test_bad_keys() {
        let mut backend = backend();
        let long = vec![b'x'; MAX_KEY_LENGTH + 1];
        assert_eq!(
            backend.store(StoreMode::Set, &long, b"v", 0, 0),
            ReturnCode::BadKeyProvided
        );
        assert_eq!(
            backend.store(StoreMode::Set, b"", b"v", 0, 0),
            ReturnCode::NoKeyProvided
        );

        assert_eq!(
            backend.store(StoreMode::Set, b"with space", b"v", 0, 0),
            ReturnCode::Success
        );
        assert_eq!(
            backend.store(StoreMode::Set, "café".as_bytes(), b"v", 0, 0),
            ReturnCode::Success
        );
        backend.set_behavior(Behavior::VerifyKeys, 1);
        assert_eq!(
            backend.store(StoreMode::Set, b"with space", b"v", 0, 0),
            ReturnCode::BadKeyProvided
        );
        assert_eq!(
            backend.store(StoreMode::Set, "café".as_bytes(), b"v", 0, 0),
            ReturnCode::BadKeyProvided
        );
    }

    #[test]
    fn test_mget_cursor() {
        let mut backend = backend();
        backend.store(StoreMode::Set, b"a", b"1", 0, 0);
        backend.store(StoreMode::Set, b"c", b"3", 0, 0);

        let keys = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), Vec::new()];
        assert_eq!(backend.mget(&keys), ReturnCode::Success);

        let mut found = Vec::new();
        let mut errors = Vec::new();
        loop {
            match backend.fetch_result() {
                Ok(item) => found.push(item.key),
                Err(ReturnCode::End) => break,
                Err(code) => errors.push(code),
            }
        }
        assert_eq!(found, vec![b"a".to_vec(), b"c".to_vec()]);
        assert_eq!(errors, vec![ReturnCode::NoKeyProvided]);
    }

    #[test]
    fn test_cas_tokens() {
        let mut backend = backend();
        backend.set_behavior(Behavior::SupportCas, 1);
        backend.store(StoreMode::Set, b"k", b"v", 0, 0);

        let cas = backend.fetch_one(b"k").unwrap().cas.unwrap();
        assert_eq!(backend.store_cas(b"k", b"w", 0, 0, cas), ReturnCode::Success);
        assert_eq!(backend.store_cas(b"k", b"x", 0, 0, cas), ReturnCode::DataExists);
        assert_eq!(backend.store_cas(b"gone", b"x", 0, 0, cas), ReturnCode::NotFound);
    }

    #[test]
    fn test_clones_share_cluster() {
        let mut backend = backend();
        let mut other = backend.clone_handle();
        backend.store(StoreMode::Set, b"k", b"v", 0, 0);
        assert_eq!(other.fetch_one(b"k").unwrap().value, b"v");
    }

    #[test]
    fn test_faults() {
        let mut backend = backend();
        backend
            .cluster()
            .inject_fault("k", ReturnCode::ConnectionFailure);
        assert_eq!(
            backend.store(StoreMode::Set, b"k", b"v", 0, 0),
            ReturnCode::ConnectionFailure
        );
        assert_eq!(backend.fetch_one(b"k"), Err(ReturnCode::ConnectionFailure));
    }

    #[test]
    fn test_rejected_behavior_keeps_previous() {
        let mut backend = backend();
        assert_eq!(
            backend.set_behavior(Behavior::Distribution, 2),
            ReturnCode::NotSupported
        );
        assert_eq!(backend.get_behavior(Behavior::Distribution), 0);
    }

    #[test]
    fn test_stats_per_server() {
        let mut backend = backend();
        let stats = backend.stat(None).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[1].label(), "b:11211 (1)");
        assert!(stats[0].stats.contains_key("curr_items"));
    }
}
