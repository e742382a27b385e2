//! Named client tunables ("behaviors")
//!
//! Names follow libmemcached's behavior table. Values are numeric on the
//! collaborator side; `hash`, `ketama_hash` and `distribution` also accept the
//! algorithm names.

use crate::error::{Error, Result, ReturnCode};
use crate::hash::HashAlgorithm;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Client-side behavior selecting the structured serialization protocol
pub const SERIALIZATION_PROTOCOL: &str = "serialization_protocol";

/// Collaborator behaviors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Behavior {
    NoBlock,
    TcpNodelay,
    TcpKeepalive,
    Hash,
    KetamaHash,
    Ketama,
    KetamaWeighted,
    Distribution,
    SupportCas,
    BufferRequests,
    VerifyKeys,
    ConnectTimeout,
    SendTimeout,
    ReceiveTimeout,
    NumReplicas,
    AutoEject,
    RetryTimeout,
    RemoveFailed,
    FailureLimit,
    IoMsgWatermark,
    IoBytesWatermark,
    IoKeyPrefetch,
    HashWithPrefixKey,
    Noreply,
    SortHosts,
    PollTimeout,
    SocketSendSize,
    SocketRecvSize,
    DeadTimeout,
    /// Set at construction, not by name
    BinaryProtocol,
    /// Set at construction for `udp:` servers
    UseUdp,
}

const NAMED: [(Behavior, &str); 29] = [
    (Behavior::NoBlock, "no_block"),
    (Behavior::TcpNodelay, "tcp_nodelay"),
    (Behavior::TcpKeepalive, "tcp_keepalive"),
    (Behavior::Hash, "hash"),
    (Behavior::KetamaHash, "ketama_hash"),
    (Behavior::Ketama, "ketama"),
    (Behavior::KetamaWeighted, "ketama_weighted"),
    (Behavior::Distribution, "distribution"),
    (Behavior::SupportCas, "cas"),
    (Behavior::BufferRequests, "buffer_requests"),
    (Behavior::VerifyKeys, "verify_keys"),
    (Behavior::ConnectTimeout, "connect_timeout"),
    (Behavior::SendTimeout, "send_timeout"),
    (Behavior::ReceiveTimeout, "receive_timeout"),
    (Behavior::NumReplicas, "num_replicas"),
    (Behavior::AutoEject, "auto_eject"),
    (Behavior::RetryTimeout, "retry_timeout"),
    (Behavior::RemoveFailed, "remove_failed"),
    (Behavior::FailureLimit, "failure_limit"),
    (Behavior::IoMsgWatermark, "_io_msg_watermark"),
    (Behavior::IoBytesWatermark, "_io_bytes_watermark"),
    (Behavior::IoKeyPrefetch, "_io_key_prefetch"),
    (Behavior::HashWithPrefixKey, "_hash_with_prefix_key"),
    (Behavior::Noreply, "_noreply"),
    (Behavior::SortHosts, "_sort_hosts"),
    (Behavior::PollTimeout, "_poll_timeout"),
    (Behavior::SocketSendSize, "_socket_send_size"),
    (Behavior::SocketRecvSize, "_socket_recv_size"),
    (Behavior::DeadTimeout, "dead_timeout"),
];

impl Behavior {
    /// Public name, `None` for construction-only behaviors
    pub fn name(self) -> Option<&'static str> {
        NAMED.iter().find(|(b, _)| *b == self).map(|(_, n)| *n)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        NAMED.iter().find(|(_, n)| *n == name).map(|(b, _)| *b)
    }

    /// All named behaviors, in table order
    pub fn named() -> impl Iterator<Item = (Behavior, &'static str)> {
        NAMED.into_iter()
    }

    /// libmemcached's default value
    pub fn default_value(self) -> u64 {
        match self {
            Self::KetamaHash => HashAlgorithm::Md5.id(),
            Self::ConnectTimeout => 4000,
            Self::PollTimeout => 5000,
            Self::RetryTimeout => 2,
            Self::FailureLimit => 5,
            Self::IoMsgWatermark => 500,
            Self::IoBytesWatermark => 65536,
            Self::IoKeyPrefetch => 1,
            _ => 0,
        }
    }
}

/// Server selection strategies, numbered like `memcached_server_distribution_t`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Distribution {
    Modula,
    Consistent,
    Random,
    ConsistentKetama,
    ConsistentKetamaSpy,
    ConsistentWeighted,
    VirtualBucket,
}

impl Distribution {
    const ALL: [Distribution; 7] = [
        Self::Modula,
        Self::Consistent,
        Self::Random,
        Self::ConsistentKetama,
        Self::ConsistentKetamaSpy,
        Self::ConsistentWeighted,
        Self::VirtualBucket,
    ];

    pub fn from_id(id: u64) -> Option<Self> {
        usize::try_from(id).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn id(self) -> u64 {
        self as u64
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Modula => "modula",
            Self::Consistent => "consistent",
            Self::Random => "random",
            Self::ConsistentKetama => "consistent_ketama",
            Self::ConsistentKetamaSpy => "consistent_ketama_spy",
            Self::ConsistentWeighted => "consistent_weighted",
            Self::VirtualBucket => "virtual_bucket",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.name() == name)
    }

    /// Whether the shipped router can place keys this way
    pub fn is_supported(self) -> bool {
        !matches!(self, Self::Random | Self::VirtualBucket)
    }

    pub fn is_consistent(self) -> bool {
        !matches!(self, Self::Modula | Self::Random | Self::VirtualBucket)
    }
}

/// A behavior value as configured by the application
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum BehaviorValue {
    Bool(bool),
    Int(i64),
    Name(String),
}

impl fmt::Display for BehaviorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Name(s) => f.write_str(s),
        }
    }
}

impl From<bool> for BehaviorValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for BehaviorValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for BehaviorValue {
    fn from(s: &str) -> Self {
        Self::Name(s.to_string())
    }
}

/// Behaviors by name, as accepted by `set_behaviors` and returned by `get_behaviors`
pub type Behaviors = BTreeMap<String, BehaviorValue>;

/// Turn a configured value into the collaborator's numeric form
pub fn resolve(behavior: Behavior, value: &BehaviorValue) -> Result<u64> {
    let name = behavior.name().unwrap_or("?");
    match value {
        BehaviorValue::Bool(b) => Ok(u64::from(*b)),
        BehaviorValue::Int(i) => u64::try_from(*i)
            .map_err(|_| Error::Value(format!("behavior {name} must not be negative, got {i}"))),
        BehaviorValue::Name(s) => match behavior {
            Behavior::Hash | Behavior::KetamaHash => HashAlgorithm::from_name(s)
                .map(HashAlgorithm::id)
                .ok_or_else(|| Error::Value(format!("unknown {name} algorithm {s:?}"))),
            Behavior::Distribution => Distribution::from_name(s)
                .map(Distribution::id)
                .ok_or_else(|| Error::Value(format!("unknown distribution {s:?}"))),
            _ => Err(Error::Value(format!("behavior {name} takes a number, got {s:?}"))),
        },
    }
}

/// Value reported back for a behavior: names where a name exists
pub fn describe(behavior: Behavior, raw: u64) -> BehaviorValue {
    let named = match behavior {
        Behavior::Hash => HashAlgorithm::from_id(raw).map(HashAlgorithm::name),
        Behavior::Distribution => Distribution::from_id(raw).map(Distribution::name),
        _ => None,
    };
    match named {
        Some(name) => BehaviorValue::Name(name.to_string()),
        None => BehaviorValue::Int(i64::try_from(raw).unwrap_or(i64::MAX)),
    }
}

/// Behavior values held by a collaborator handle
#[derive(Debug, Clone)]
pub struct BehaviorSet {
    values: HashMap<Behavior, u64>,
}

impl BehaviorSet {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn get(&self, behavior: Behavior) -> u64 {
        self.values
            .get(&behavior)
            .copied()
            .unwrap_or_else(|| behavior.default_value())
    }

    /// Validate and store a value, applying libmemcached's side effects
    pub fn apply(&mut self, behavior: Behavior, value: u64) -> ReturnCode {
        match behavior {
            Behavior::Hash | Behavior::KetamaHash => match HashAlgorithm::from_id(value) {
                None => return ReturnCode::InvalidArguments,
                Some(algo) if !algo.is_supported() => return ReturnCode::NotSupported,
                Some(_) => {}
            },
            Behavior::Distribution => match Distribution::from_id(value) {
                None => return ReturnCode::InvalidArguments,
                Some(dist) if !dist.is_supported() => return ReturnCode::NotSupported,
                Some(_) => {}
            },
            Behavior::Ketama => {
                let dist = if value == 0 {
                    Distribution::Modula
                } else {
                    self.values.insert(Behavior::Hash, HashAlgorithm::Md5.id());
                    self.values.insert(Behavior::KetamaHash, HashAlgorithm::Md5.id());
                    Distribution::ConsistentKetama
                };
                self.values.insert(Behavior::Distribution, dist.id());
            }
            Behavior::KetamaWeighted => {
                if value != 0 {
                    self.values.insert(Behavior::KetamaHash, HashAlgorithm::Md5.id());
                    self.values
                        .insert(Behavior::Distribution, Distribution::ConsistentKetama.id());
                }
            }
            Behavior::BinaryProtocol | Behavior::UseUdp => {
                if value != 0 {
                    return ReturnCode::NotSupported;
                }
            }
            _ => {}
        }
        self.values.insert(behavior, value);
        ReturnCode::Success
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::from_id(self.get(Behavior::Hash)).unwrap_or(HashAlgorithm::Default)
    }

    pub fn ketama_hash(&self) -> HashAlgorithm {
        HashAlgorithm::from_id(self.get(Behavior::KetamaHash)).unwrap_or(HashAlgorithm::Md5)
    }

    pub fn distribution(&self) -> Distribution {
        Distribution::from_id(self.get(Behavior::Distribution)).unwrap_or(Distribution::Modula)
    }

    pub fn is_set(&self, behavior: Behavior) -> bool {
        self.get(behavior) != 0
    }
}

impl Default for BehaviorSet {
    fn default() -> Self {
        Self::new()
    }
}
