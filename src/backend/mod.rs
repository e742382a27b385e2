//! Cache-protocol collaborators
//!
//! The pipeline talks to the cache through the [`Memcached`] trait, a
//! libmemcached-shaped handle: every call reports a [`ReturnCode`] and
//! multi-key fetches are read back through a cursor ending in
//! [`ReturnCode::End`].
//!
//! Two implementations ship with the crate:
//! - [`MemoryBackend`]: an in-process cluster with memcached's semantics
//! - [`AsciiBackend`]: a blocking client for the memcached ASCII protocol

pub mod ascii;
pub mod memory;
pub mod router;

pub use ascii::AsciiBackend;
pub use memory::MemoryBackend;
pub use router::Router;

use crate::behavior::Behavior;
use crate::error::{Error, Result, ReturnCode};
use std::collections::BTreeMap;
use std::fmt;

/// Default memcached port
pub const DEFAULT_PORT: u16 = 11211;

/// Storage commands sharing the store path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreMode {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
}

impl StoreMode {
    /// ASCII protocol verb, also used as the operation name in errors
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Append => "append",
            Self::Prepend => "prepend",
        }
    }

    /// Append and prepend concatenate raw bytes, so values are never compressed
    pub fn allows_compression(self) -> bool {
        !matches!(self, Self::Append | Self::Prepend)
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item read back from the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub flags: u32,
    pub cas: Option<u64>,
}

/// Statistics reported by one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStats {
    /// `host:port` or socket path
    pub address: String,
    /// Position in the server list
    pub index: usize,
    pub stats: BTreeMap<String, String>,
}

impl ServerStats {
    /// `host:port (index)`, the label stats are reported under
    pub fn label(&self) -> String {
        format!("{} ({})", self.address, self.index)
    }
}

/// Server transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
    Unix,
}

/// A parsed server address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerSpec {
    pub transport: Transport,
    /// Hostname, or socket path for UNIX servers
    pub host: String,
    pub port: u16,
    pub weight: u32,
}

impl ServerSpec {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: Transport::Tcp,
            host: host.into(),
            port,
            weight: 1,
        }
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            transport: Transport::Unix,
            host: path.into(),
            port: 0,
            weight: 1,
        }
    }

    /// Parse a server string.
    ///
    /// - `udp:host[:port]` is a UDP server
    /// - `host:port` is a TCP server (`[v6addr]:port` for IPv6)
    /// - anything containing `/` is a UNIX socket path
    /// - a bare host is TCP on the default port
    pub fn parse(server: &str) -> Result<Self> {
        let server = server.trim();
        if server.is_empty() {
            return Err(Error::Value("empty server address".to_string()));
        }

        if let Some(rest) = server.strip_prefix("udp:") {
            let (host, port) = split_host_port(rest)?;
            return Ok(Self {
                transport: Transport::Udp,
                host,
                port,
                weight: 1,
            });
        }

        if server.contains(':') {
            let (host, port) = split_host_port(server)?;
            return Ok(Self::tcp(host, port));
        }

        if server.contains('/') {
            return Ok(Self::unix(server));
        }

        Ok(Self::tcp(server, DEFAULT_PORT))
    }

    /// Identity used for hashing and stats: `host:port` or the socket path
    pub fn address(&self) -> String {
        match self.transport {
            Transport::Unix => self.host.clone(),
            _ if self.host.contains(':') => format!("[{}]:{}", self.host, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

impl fmt::Display for ServerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transport {
            Transport::Udp => write!(f, "udp:{}", self.address()),
            _ => f.write_str(&self.address()),
        }
    }
}

fn split_host_port(s: &str) -> Result<(String, u16)> {
    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        match rest.split_once(']') {
            Some((host, tail)) => (host, tail.strip_prefix(':')),
            None => return Err(Error::Value(format!("unterminated IPv6 address {s:?}"))),
        }
    } else {
        match s.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (s, None),
        }
    };

    if host.is_empty() {
        return Err(Error::Value(format!("missing host in {s:?}")));
    }

    let port = match port {
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| Error::Value(format!("invalid port {p:?} in {s:?}")))?,
        None => DEFAULT_PORT,
    };
    Ok((host.to_string(), port))
}

/// Parse a server list; all servers must share one transport
pub fn parse_servers<S: AsRef<str>>(servers: &[S]) -> Result<Vec<ServerSpec>> {
    if servers.is_empty() {
        return Err(Error::Config("at least one server is required".to_string()));
    }

    let specs = servers
        .iter()
        .map(|s| ServerSpec::parse(s.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    let transport = specs[0].transport;
    if specs.iter().any(|s| s.transport != transport) {
        return Err(Error::Value("can't mix transport types".to_string()));
    }
    Ok(specs)
}

/// A handle on a memcached cluster.
///
/// Handles are exclusively owned; [`Memcached::clone_handle`] produces an
/// independent handle with the same servers and behaviors but its own
/// connections.
pub trait Memcached: Send {
    fn clone_handle(&self) -> Box<dyn Memcached>;

    fn add_server(&mut self, server: ServerSpec) -> ReturnCode;

    fn servers(&self) -> &[ServerSpec];

    fn set_behavior(&mut self, behavior: Behavior, value: u64) -> ReturnCode;

    fn get_behavior(&self, behavior: Behavior) -> u64;

    fn store(&mut self, mode: StoreMode, key: &[u8], value: &[u8], ttl: u32, flags: u32)
    -> ReturnCode;

    fn store_cas(&mut self, key: &[u8], value: &[u8], ttl: u32, flags: u32, cas: u64)
    -> ReturnCode;

    /// Fetch a single key; `Err(NotFound)` on a miss
    fn fetch_one(&mut self, key: &[u8]) -> std::result::Result<FetchResult, ReturnCode>;

    /// Start a multi-key fetch; results are read with [`Memcached::fetch_result`]
    fn mget(&mut self, keys: &[Vec<u8>]) -> ReturnCode;

    /// Next result of the last `mget`; `Err(End)` once drained
    fn fetch_result(&mut self) -> std::result::Result<FetchResult, ReturnCode>;

    fn delete(&mut self, key: &[u8], ttl: u32) -> ReturnCode;

    fn increment(&mut self, key: &[u8], delta: u64) -> std::result::Result<u64, ReturnCode>;

    fn decrement(&mut self, key: &[u8], delta: u64) -> std::result::Result<u64, ReturnCode>;

    fn touch(&mut self, key: &[u8], ttl: u32) -> ReturnCode;

    fn flush(&mut self, expire: u32) -> ReturnCode;

    /// Close all connections
    fn quit(&mut self);

    fn stat(&mut self, args: Option<&str>) -> std::result::Result<Vec<ServerStats>, ReturnCode>;

    /// Detail for the last failure with `code`
    fn error_message(&self, code: ReturnCode) -> String {
        code.description().to_string()
    }

    /// Hash `key` with the configured `hash` behavior
    fn generate_hash(&self, key: &[u8]) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp() {
        let spec = ServerSpec::parse("cache1:11212").unwrap();
        assert_eq!(spec, ServerSpec::tcp("cache1", 11212));

        let spec = ServerSpec::parse("cache1").unwrap();
        assert_eq!(spec, ServerSpec::tcp("cache1", DEFAULT_PORT));

        let spec = ServerSpec::parse("[::1]:11213").unwrap();
        assert_eq!(spec.host, "::1");
        assert_eq!(spec.port, 11213);
        assert_eq!(spec.address(), "[::1]:11213");
    }

    #[test]
    fn test_parse_udp_and_unix() {
        let spec = ServerSpec::parse("udp:cache1").unwrap();
        assert_eq!(spec.transport, Transport::Udp);
        assert_eq!(spec.port, DEFAULT_PORT);
        assert_eq!(spec.to_string(), "udp:cache1:11211");

        let spec = ServerSpec::parse("udp:cache1:9999").unwrap();
        assert_eq!(spec.port, 9999);

        let spec = ServerSpec::parse("/var/run/memcached.sock").unwrap();
        assert_eq!(spec.transport, Transport::Unix);
        assert_eq!(spec.address(), "/var/run/memcached.sock");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(ServerSpec::parse("host:notaport"), Err(Error::Value(_))));
        assert!(matches!(ServerSpec::parse(":11211"), Err(Error::Value(_))));
        assert!(matches!(ServerSpec::parse(""), Err(Error::Value(_))));
    }

    #[test]
    fn test_parse_servers() {
        let specs = parse_servers(&["a:1", "b:2"]).unwrap();
        assert_eq!(specs.len(), 2);

        assert!(matches!(
            parse_servers(&["a:1", "udp:b:2"]),
            Err(Error::Value(msg)) if msg.contains("mix")
        ));
        assert!(matches!(
            parse_servers::<&str>(&[]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_store_mode() {
        assert_eq!(StoreMode::Prepend.as_str(), "prepend");
        assert!(StoreMode::Set.allows_compression());
        assert!(!StoreMode::Append.allows_compression());
    }

    #[test]
    fn test_stats_label() {
        let stats = ServerStats {
            address: "127.0.0.1:11211".to_string(),
            index: 0,
            stats: BTreeMap::new(),
        };
        assert_eq!(stats.label(), "127.0.0.1:11211 (0)");
    }
}
