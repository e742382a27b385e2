//! Blocking memcached ASCII protocol collaborator
//!
//! One lazily opened connection per server. Keys are routed with the
//! configured distribution; multi-key fetches are grouped per server and sent
//! as `get`/`gets` requests of up to [`MGET_CHUNK`] keys.

mod connection;

use crate::backend::{FetchResult, Memcached, Router, ServerSpec, ServerStats, StoreMode, Transport};
use crate::behavior::{Behavior, BehaviorSet};
use crate::error::ReturnCode;
use crate::protocol::{MAX_KEY_LENGTH, Reply, RequestWriter, is_printable_key, is_valid_key};
use connection::{Connection, Failure, Timeouts};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace};

/// Most keys sent in one retrieval request
pub const MGET_CHUNK: usize = 100;

pub struct AsciiBackend {
    servers: Vec<ServerSpec>,
    connections: Vec<Connection>,
    behaviors: BehaviorSet,
    router: Router,
    cursor: VecDeque<Result<FetchResult, ReturnCode>>,
    last_failure: Option<Failure>,
}

impl AsciiBackend {
    pub fn new() -> Self {
        Self {
            servers: Vec::new(),
            connections: Vec::new(),
            behaviors: BehaviorSet::new(),
            router: Router::empty(),
            cursor: VecDeque::new(),
            last_failure: None,
        }
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::from_behaviors(&self.behaviors)
    }

    fn with_cas(&self) -> bool {
        self.behaviors.is_set(Behavior::SupportCas)
    }

    /// Validate `key` and pick its server
    fn locate(&self, key: &[u8]) -> Result<usize, ReturnCode> {
        if key.is_empty() {
            return Err(ReturnCode::NoKeyProvided);
        }
        // The text protocol cannot carry keys with spaces or control bytes
        if key.len() > MAX_KEY_LENGTH || !is_valid_key(key) {
            return Err(ReturnCode::BadKeyProvided);
        }
        if self.behaviors.is_set(Behavior::VerifyKeys) && !is_printable_key(key) {
            return Err(ReturnCode::BadKeyProvided);
        }
        self.router.route(key).ok_or(ReturnCode::NoServers)
    }

    /// Remember a failure for [`Memcached::error_message`] and return its code
    fn fail(&mut self, failure: Failure) -> ReturnCode {
        debug!(code = ?failure.code, message = %failure.message, "Request failed");
        let code = failure.code;
        self.last_failure = Some(failure);
        code
    }

    /// One request/reply exchange with the server owning `key`
    fn exchange(
        &mut self,
        key: &[u8],
        write: impl FnOnce(&mut RequestWriter),
    ) -> Result<Reply, ReturnCode> {
        let index = self.locate(key)?;
        let timeouts = self.timeouts();
        match self.connections[index].request(&timeouts, write) {
            Ok(reply) => Ok(reply),
            Err(failure) => Err(self.fail(failure)),
        }
    }

    fn status(&mut self, reply: Result<Reply, ReturnCode>) -> ReturnCode {
        match reply {
            Ok(Reply::Stored | Reply::Deleted | Reply::Touched | Reply::Ok) => ReturnCode::Success,
            Ok(Reply::NotStored) => ReturnCode::NotStored,
            Ok(Reply::Exists) => ReturnCode::DataExists,
            Ok(Reply::NotFound) => ReturnCode::NotFound,
            Ok(other) => self.fail(Failure::from_reply(other)),
            Err(code) => code,
        }
    }

    /// Read VALUE replies up to END
    fn read_values(
        connection: &mut Connection,
        out: &mut VecDeque<Result<FetchResult, ReturnCode>>,
    ) -> Result<(), Failure> {
        loop {
            match connection.read_reply()? {
                Reply::Value {
                    key,
                    flags,
                    data,
                    cas,
                } => out.push_back(Ok(FetchResult {
                    key,
                    value: data,
                    flags,
                    cas,
                })),
                Reply::End => return Ok(()),
                other => return Err(Failure::from_reply(other)),
            }
        }
    }

    fn arithmetic(&mut self, key: &[u8], increment: bool, delta: u64) -> Result<u64, ReturnCode> {
        match self.exchange(key, |w| w.arithmetic(increment, key, delta))? {
            Reply::Number(n) => Ok(n),
            Reply::NotFound => Err(ReturnCode::NotFound),
            other => Err(self.fail(Failure::from_reply(other))),
        }
    }

    fn close_all(&mut self) {
        for connection in &mut self.connections {
            connection.close();
        }
    }
}

impl Default for AsciiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Memcached for AsciiBackend {
    fn clone_handle(&self) -> Box<dyn Memcached> {
        Box::new(Self {
            servers: self.servers.clone(),
            connections: self.servers.iter().cloned().map(Connection::new).collect(),
            behaviors: self.behaviors.clone(),
            router: self.router.clone(),
            cursor: VecDeque::new(),
            last_failure: None,
        })
    }

    fn add_server(&mut self, server: ServerSpec) -> ReturnCode {
        if server.transport == Transport::Udp {
            return ReturnCode::NotSupported;
        }

        self.servers.push(server.clone());
        match Router::build(&self.servers, &self.behaviors) {
            Ok(router) => {
                self.router = router;
                self.connections.push(Connection::new(server));
                ReturnCode::Success
            }
            Err(code) => {
                self.servers.pop();
                code
            }
        }
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

        match Router::build(&self.servers, &self.behaviors) {
            Ok(router) => self.router = router,
            Err(code) => {
                self.behaviors = previous;
                return code;
            }
        }
        // Socket options are applied when connecting
        self.close_all();
        ReturnCode::Success
    }

    fn get_behavior(&self, behavior: Behavior) -> u64 {
        self.behaviors.get(behavior)
    }

    fn store(&mut self, mode: StoreMode, key: &[u8], value: &[u8], ttl: u32, flags: u32) -> ReturnCode {
        let reply = self.exchange(key, |w| {
            w.storage(mode.as_str(), key, flags, ttl, value, None);
        });
        self.status(reply)
    }

    fn store_cas(&mut self, key: &[u8], value: &[u8], ttl: u32, flags: u32, cas: u64) -> ReturnCode {
        let reply = self.exchange(key, |w| w.storage("cas", key, flags, ttl, value, Some(cas)));
        self.status(reply)
    }

    fn fetch_one(&mut self, key: &[u8]) -> Result<FetchResult, ReturnCode> {
        let index = self.locate(key)?;
        let timeouts = self.timeouts();
        let with_cas = self.with_cas();

        let connection = &mut self.connections[index];
        let mut found = VecDeque::with_capacity(1);
        let result = connection
            .send(&timeouts, |w| w.retrieval(with_cas, &[key]))
            .and_then(|()| Self::read_values(connection, &mut found));

        match result {
            Ok(()) => found.pop_front().unwrap_or(Err(ReturnCode::NotFound)),
            Err(failure) => Err(self.fail(failure)),
        }
    }

    fn mget(&mut self, keys: &[Vec<u8>]) -> ReturnCode {
        self.cursor.clear();
        if self.router.is_empty() {
            return ReturnCode::NoServers;
        }

        let mut by_server: BTreeMap<usize, Vec<&[u8]>> = BTreeMap::new();
        for key in keys {
            match self.locate(key) {
                Ok(index) => by_server.entry(index).or_default().push(key),
                Err(code) => self.cursor.push_back(Err(code)),
            }
        }

        let timeouts = self.timeouts();
        let with_cas = self.with_cas();
        let mut failures = Vec::new();
        for (index, keys) in by_server {
            let connection = &mut self.connections[index];
            for chunk in keys.chunks(MGET_CHUNK) {
                trace!(server = index, keys = chunk.len(), "mget");
                let result = connection
                    .send(&timeouts, |w| w.retrieval(with_cas, chunk))
                    .and_then(|()| Self::read_values(connection, &mut self.cursor));
                if let Err(failure) = result {
                    failures.push(failure);
                    break;
                }
            }
        }

        for failure in failures {
            let code = self.fail(failure);
            self.cursor.push_back(Err(code));
        }
        ReturnCode::Success
    }

    fn fetch_result(&mut self) -> Result<FetchResult, ReturnCode> {
        self.cursor.pop_front().unwrap_or(Err(ReturnCode::End))
    }

    fn delete(&mut self, key: &[u8], _ttl: u32) -> ReturnCode {
        let reply = self.exchange(key, |w| w.delete(key));
        self.status(reply)
    }

    fn increment(&mut self, key: &[u8], delta: u64) -> Result<u64, ReturnCode> {
        self.arithmetic(key, true, delta)
    }

    fn decrement(&mut self, key: &[u8], delta: u64) -> Result<u64, ReturnCode> {
        self.arithmetic(key, false, delta)
    }

    fn touch(&mut self, key: &[u8], ttl: u32) -> ReturnCode {
        let reply = self.exchange(key, |w| w.touch(key, ttl));
        self.status(reply)
    }

    fn flush(&mut self, expire: u32) -> ReturnCode {
        if self.servers.is_empty() {
            return ReturnCode::NoServers;
        }

        let timeouts = self.timeouts();
        let mut rc = ReturnCode::Success;
        for index in 0..self.connections.len() {
            let reply = self.connections[index]
                .request(&timeouts, |w| w.flush_all(expire))
                .map_err(|failure| self.fail(failure));
            let status = self.status(reply);
            if !status.is_success() {
                rc = status;
            }
        }
        rc
    }

    fn quit(&mut self) {
        let timeouts = self.timeouts();
        for connection in &mut self.connections {
            if connection.is_connected() {
                // Best effort; the socket is closed either way
                let _ = connection.send(&timeouts, |w| w.quit());
            }
            connection.close();
        }
        self.cursor.clear();
    }

    fn stat(&mut self, args: Option<&str>) -> Result<Vec<ServerStats>, ReturnCode> {
        if self.servers.is_empty() {
            return Err(ReturnCode::NoServers);
        }

        let timeouts = self.timeouts();
        let mut all = Vec::with_capacity(self.servers.len());
        for (index, server) in self.servers.iter().enumerate() {
            let connection = &mut self.connections[index];
            let mut stats = BTreeMap::new();
            let mut reply = connection.request(&timeouts, |w| w.stats(args));
            loop {
                match reply {
                    Ok(Reply::Stat { name, value }) => {
                        stats.insert(name, value);
                    }
                    Ok(Reply::End) => break,
                    Ok(other) => {
                        let failure = Failure::from_reply(other);
                        let code = failure.code;
                        self.last_failure = Some(failure);
                        return Err(code);
                    }
                    Err(failure) => {
                        let code = failure.code;
                        self.last_failure = Some(failure);
                        return Err(code);
                    }
                }
                reply = connection.read_reply();
            }
            all.push(ServerStats {
                address: server.address(),
                index,
                stats,
            });
        }
        Ok(all)
    }

    fn error_message(&self, code: ReturnCode) -> String {
        match &self.last_failure {
            Some(failure) if failure.code == code => failure.message.clone(),
            _ => code.description().to_string(),
        }
    }

    fn generate_hash(&self, key: &[u8]) -> u32 {
        self.behaviors.hash_algorithm().hash(key).unwrap_or(0)
    }
}
