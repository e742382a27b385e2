//! The client façade
//!
//! [`Client`] owns one collaborator handle and runs every public operation
//! through the same pipeline:
//!
//! ```text
//! key normalizer + batch builder ──▶ executor ──▶ Memcached handle
//!                                        │
//!              typed result ◀── unmarshaler / error mapper
//! ```
//!
//! A client is used by one caller at a time. Fan-out goes through
//! [`Client::clone`], which gives the clone its own connections.

use crate::backend::{
    AsciiBackend, FetchResult, Memcached, MemoryBackend, ServerSpec, ServerStats, StoreMode,
    parse_servers,
};
use crate::batch::BatchRequest;
use crate::behavior::{
    Behavior, BehaviorValue, Behaviors, SERIALIZATION_PROTOCOL, describe, resolve,
};
use crate::codec::{Codec, FLAG_ZLIB, NativeCodec, Value};
use crate::compression::{CompressionOptions, decompress};
use crate::config::Config;
use crate::error::{DecodeError, Error, KeyError, Result, ReturnCode};
use crate::executor::Executor;
use crate::key::{AppKey, normalize, normalize_prefixed};
use crate::metrics::ClientMetrics;
use crate::storage::MemoryCluster;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-call store settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Expiration in seconds; 0 never expires
    pub ttl: u32,
    /// Prepended to every key of the call
    pub key_prefix: Option<Vec<u8>>,
    /// Overrides the client's default compression
    pub compression: Option<CompressionOptions>,
}

impl StoreOptions {
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_compression(mut self, compression: CompressionOptions) -> Self {
        self.compression = Some(compression);
        self
    }

    fn prefix(&self) -> Option<&[u8]> {
        self.key_prefix.as_deref()
    }
}

/// A memcached client
pub struct Client {
    handle: Box<dyn Memcached>,
    native: NativeCodec,
    custom: Option<Arc<dyn Codec>>,
    compression: CompressionOptions,
    metrics: Option<Arc<ClientMetrics>>,
}

impl Client {
    /// Wrap `handle` and add `servers` to it.
    ///
    /// Server strings are parsed with [`ServerSpec::parse`]; all of them must
    /// share one transport.
    pub fn new<S: AsRef<str>>(
        mut handle: Box<dyn Memcached>,
        servers: &[S],
        binary: bool,
    ) -> Result<Self> {
        for server in parse_servers(servers)? {
            let rc = handle.add_server(server.clone());
            if !rc.is_success() {
                let detail = handle.error_message(rc);
                return Err(Error::from_return(
                    rc,
                    "add_server",
                    Some(server.address().as_bytes()),
                    &detail,
                ));
            }
        }

        if binary {
            let rc = handle.set_behavior(Behavior::BinaryProtocol, 1);
            if !rc.is_success() {
                let detail = handle.error_message(rc);
                return Err(Error::from_return(rc, "set_behavior(binary_protocol)", None, &detail));
            }
        }

        debug!(servers = handle.servers().len(), binary, "client created");
        Ok(Self {
            handle,
            native: NativeCodec::default(),
            custom: None,
            compression: CompressionOptions::disabled(),
            metrics: None,
        })
    }

    /// Client speaking the ASCII protocol to `servers`
    pub fn connect<S: AsRef<str>>(servers: &[S]) -> Result<Self> {
        Self::new(Box::new(AsciiBackend::new()), servers, false)
    }

    /// Client on a fresh in-process cluster with one server
    pub fn in_memory() -> Result<Self> {
        Self::with_cluster(MemoryCluster::new())
    }

    /// Client on an existing in-process cluster
    pub fn with_cluster(cluster: MemoryCluster) -> Result<Self> {
        Self::new(
            Box::new(MemoryBackend::with_cluster(cluster)),
            &["127.0.0.1:11211"],
            false,
        )
    }

    /// Build an ASCII client from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.client.username.is_some() || config.client.password.is_some() {
            return Err(Error::from_return(
                ReturnCode::NotSupported,
                "sasl",
                None,
                "SASL authentication is not supported",
            ));
        }

        let mut client = Self::new(
            Box::new(AsciiBackend::new()),
            &config.client.servers,
            config.client.binary,
        )?
        .with_compression(config.compression.options())?;

        client.set_behaviors(&config.behaviors)?;
        if config.metrics.enabled {
            client = client.with_metrics(Arc::new(ClientMetrics::new()));
        }
        Ok(client)
    }

    /// Route every value through `codec` instead of the native codec
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.custom = Some(codec);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Default compression for stores that do not override it
    pub fn with_compression(mut self, compression: CompressionOptions) -> Result<Self> {
        compression.validate()?;
        self.compression = compression;
        Ok(self)
    }

    pub fn servers(&self) -> &[ServerSpec] {
        self.handle.servers()
    }

    pub fn metrics(&self) -> Option<&ClientMetrics> {
        self.metrics.as_deref()
    }

    fn codec(&self) -> &dyn Codec {
        match &self.custom {
            Some(codec) => codec.as_ref(),
            None => &self.native,
        }
    }

    fn executor(&mut self) -> Executor<'_> {
        Executor::new(self.handle.as_mut(), self.metrics.as_deref())
    }

    fn require_cas(&self, op: &str) -> Result<()> {
        if self.handle.get_behavior(Behavior::SupportCas) == 0 {
            return Err(Error::Value(format!("{op} requires the cas behavior")));
        }
        Ok(())
    }

    /// Turn a fetched item into a value; `None` when the codec reports a miss
    pub fn unmarshal(&self, result: &FetchResult) -> Result<Option<Value>> {
        let inflated;
        let payload = if result.flags & FLAG_ZLIB != 0 {
            inflated = decompress(&result.value).map_err(DecodeError::from)?;
            if let Some(metrics) = &self.metrics {
                metrics.values_decompressed.inc();
            }
            &inflated[..]
        } else {
            &result.value[..]
        };

        match self.codec().deserialize(payload, result.flags) {
            Ok(value) => Ok(Some(value)),
            Err(Error::CacheMiss) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Encode a value with the active codec
    pub fn serialize(&self, value: &Value) -> Result<(Vec<u8>, u32)> {
        self.codec().serialize(value)
    }

    /// Decode a payload with the active codec
    pub fn deserialize(&self, payload: &[u8], flags: u32) -> Result<Value> {
        self.codec().deserialize(payload, flags)
    }

    pub fn get(&mut self, key: impl Into<AppKey>) -> Result<Option<Value>> {
        let _timer = self.metrics.as_ref().map(|m| m.start("get"));
        let key = normalize(&key.into())?;
        if key.is_empty() {
            return Ok(None);
        }

        let fetched = self.executor().fetch_one(&key, "get")?;
        match fetched {
            Some(result) => self.unmarshal(&result),
            None => Ok(None),
        }
    }

    /// [`Client::get`] with a fallback for misses
    pub fn get_or(&mut self, key: impl Into<AppKey>, default: Value) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Fetch a value with its CAS token
    pub fn gets(&mut self, key: impl Into<AppKey>) -> Result<Option<(Value, u64)>> {
        self.require_cas("gets")?;
        let _timer = self.metrics.as_ref().map(|m| m.start("gets"));
        let key = normalize(&key.into())?;
        if key.is_empty() {
            return Ok(None);
        }

        let Some(result) = self.executor().fetch_one(&key, "gets")? else {
            return Ok(None);
        };
        let cas = result.cas.unwrap_or_default();
        Ok(self.unmarshal(&result)?.map(|value| (value, cas)))
    }

    pub fn set(&mut self, key: impl Into<AppKey>, value: impl Into<Value>) -> Result<bool> {
        self.store(StoreMode::Set, key, value)
    }

    pub fn add(&mut self, key: impl Into<AppKey>, value: impl Into<Value>) -> Result<bool> {
        self.store(StoreMode::Add, key, value)
    }

    pub fn replace(&mut self, key: impl Into<AppKey>, value: impl Into<Value>) -> Result<bool> {
        self.store(StoreMode::Replace, key, value)
    }

    pub fn append(&mut self, key: impl Into<AppKey>, value: impl Into<Value>) -> Result<bool> {
        self.store(StoreMode::Append, key, value)
    }

    pub fn prepend(&mut self, key: impl Into<AppKey>, value: impl Into<Value>) -> Result<bool> {
        self.store(StoreMode::Prepend, key, value)
    }

    /// Store with default options
    pub fn store(
        &mut self,
        mode: StoreMode,
        key: impl Into<AppKey>,
        value: impl Into<Value>,
    ) -> Result<bool> {
        self.store_with(mode, key, value, &StoreOptions::default())
    }

    /// Store one value.
    ///
    /// `Ok(false)` means the cache declined the store (for example `add` of
    /// an existing key). A key too long for the wire is a [`KeyError`].
    pub fn store_with(
        &mut self,
        mode: StoreMode,
        key: impl Into<AppKey>,
        value: impl Into<Value>,
        options: &StoreOptions,
    ) -> Result<bool> {
        let _timer = self.metrics.as_ref().map(|m| m.start(mode.as_str()));
        let key = key.into();
        normalize_prefixed(options.prefix(), &key)?;
        let compression = self.store_compression(mode, options)?;

        let mut batch = BatchRequest::for_store(
            &[(key, value.into())],
            options.prefix(),
            options.ttl,
            self.codec(),
            &compression,
            self.metrics.as_deref(),
        )?;

        let mut exec = self.executor();
        let mut stored = true;
        for record in batch.records_mut() {
            stored &= exec.store(mode, record, mode.as_str())?;
        }
        Ok(stored)
    }

    fn store_compression(&self, mode: StoreMode, options: &StoreOptions) -> Result<CompressionOptions> {
        if !mode.allows_compression() {
            return Ok(CompressionOptions::disabled());
        }
        let compression = options.compression.unwrap_or(self.compression);
        compression.validate()?;
        Ok(compression)
    }

    /// Store `value` only if the item still carries `cas`.
    ///
    /// `Ok(false)` means another writer got there first, or the key is gone.
    pub fn cas(
        &mut self,
        key: impl Into<AppKey>,
        value: impl Into<Value>,
        cas: u64,
        ttl: u32,
    ) -> Result<bool> {
        self.require_cas("cas")?;
        let _timer = self.metrics.as_ref().map(|m| m.start("cas"));
        let key = key.into();
        normalize(&key)?;
        if key.is_empty() {
            return Ok(false);
        }

        let mut batch = BatchRequest::for_store(
            &[(key, value.into())],
            None,
            ttl,
            self.codec(),
            &CompressionOptions::disabled(),
            self.metrics.as_deref(),
        )?;

        let mut exec = self.executor();
        let mut swapped = true;
        for record in batch.records_mut() {
            swapped &= exec.store_cas(record, cas)?;
        }
        Ok(swapped)
    }

    /// Delete a key; `Ok(false)` when it was not there
    pub fn delete(&mut self, key: impl Into<AppKey>) -> Result<bool> {
        let _timer = self.metrics.as_ref().map(|m| m.start("delete"));
        let key = normalize(&key.into())?;
        self.executor().delete(&key)
    }

    /// Update a key's expiration; `Ok(false)` when it was not there
    pub fn touch(&mut self, key: impl Into<AppKey>, ttl: u32) -> Result<bool> {
        let _timer = self.metrics.as_ref().map(|m| m.start("touch"));
        let key = normalize(&key.into())?;
        self.executor().touch(&key, ttl)
    }

    pub fn incr(&mut self, key: impl Into<AppKey>, delta: i64) -> Result<u64> {
        self.counter(key.into(), true, delta)
    }

    pub fn decr(&mut self, key: impl Into<AppKey>, delta: i64) -> Result<u64> {
        self.counter(key.into(), false, delta)
    }

    fn counter(&mut self, key: AppKey, increment: bool, delta: i64) -> Result<u64> {
        let op = if increment { "incr" } else { "decr" };
        let _timer = self.metrics.as_ref().map(|m| m.start(op));
        let delta = u64::try_from(delta)
            .map_err(|_| Error::Value(format!("{op} delta must be positive, got {delta}")))?;
        let key = normalize(&key)?;
        if key.is_empty() {
            return Err(KeyError::Empty.into());
        }
        self.executor().counter(&key, increment, delta)
    }

    /// Fetch many keys in one round.
    ///
    /// The map is keyed by the caller's keys. Misses, empty keys and keys the
    /// codec reports as missing are left out. A value that fails to decode
    /// fails the whole call.
    pub fn get_multi<K: Into<AppKey>>(
        &mut self,
        keys: impl IntoIterator<Item = K>,
        key_prefix: Option<&[u8]>,
    ) -> Result<HashMap<AppKey, Value>> {
        let _timer = self.metrics.as_ref().map(|m| m.start("get_multi"));
        let keys: Vec<AppKey> = keys.into_iter().map(Into::into).collect();
        let batch = BatchRequest::for_keys(&keys, key_prefix, true)?;
        let results = self.executor().fetch_many(&batch)?;

        let mut values = HashMap::with_capacity(results.len());
        for result in &results {
            let origins = batch.origins(&result.key);
            if origins.is_empty() {
                warn!(key = %String::from_utf8_lossy(&result.key), "dropping unrequested key");
                continue;
            }
            if let Some(value) = self.unmarshal(result)? {
                for origin in origins {
                    values.insert(origin.clone(), value.clone());
                }
            }
        }
        Ok(values)
    }

    /// Store many values; returns the keys that were not stored
    pub fn set_multi<K, V>(
        &mut self,
        items: impl IntoIterator<Item = (K, V)>,
        options: &StoreOptions,
    ) -> Result<Vec<AppKey>>
    where
        K: Into<AppKey>,
        V: Into<Value>,
    {
        self.store_multi(StoreMode::Set, items, options)
    }

    /// Add many values; returns the keys that were not stored
    pub fn add_multi<K, V>(
        &mut self,
        items: impl IntoIterator<Item = (K, V)>,
        options: &StoreOptions,
    ) -> Result<Vec<AppKey>>
    where
        K: Into<AppKey>,
        V: Into<Value>,
    {
        self.store_multi(StoreMode::Add, items, options)
    }

    fn store_multi<K, V>(
        &mut self,
        mode: StoreMode,
        items: impl IntoIterator<Item = (K, V)>,
        options: &StoreOptions,
    ) -> Result<Vec<AppKey>>
    where
        K: Into<AppKey>,
        V: Into<Value>,
    {
        let op = match mode {
            StoreMode::Add => "add_multi",
            _ => "set_multi",
        };
        let _timer = self.metrics.as_ref().map(|m| m.start(op));
        let compression = self.store_compression(mode, options)?;
        let items: Vec<(AppKey, Value)> = items
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut batch = BatchRequest::for_store(
            &items,
            options.prefix(),
            options.ttl,
            self.codec(),
            &compression,
            self.metrics.as_deref(),
        )?;
        self.executor().store_records(mode, &mut batch, op)?;
        Ok(batch.failed_keys())
    }

    /// Delete many keys; true only if every key was deleted
    pub fn delete_multi<K: Into<AppKey>>(
        &mut self,
        keys: impl IntoIterator<Item = K>,
        key_prefix: Option<&[u8]>,
    ) -> Result<bool> {
        let _timer = self.metrics.as_ref().map(|m| m.start("delete_multi"));
        let keys: Vec<AppKey> = keys.into_iter().map(Into::into).collect();
        let mut batch = BatchRequest::for_keys(&keys, key_prefix, false)?;
        self.executor()
            .run_each(&mut batch, |exec, record| exec.delete(&record.key))
    }

    /// Increment many counters by `delta`.
    ///
    /// Every key is attempted; failures are reported together afterwards.
    pub fn incr_multi<K: Into<AppKey>>(
        &mut self,
        keys: impl IntoIterator<Item = K>,
        key_prefix: Option<&[u8]>,
        delta: u64,
    ) -> Result<()> {
        let _timer = self.metrics.as_ref().map(|m| m.start("incr_multi"));
        let keys: Vec<AppKey> = keys.into_iter().map(Into::into).collect();
        let mut batch = BatchRequest::for_keys(&keys, key_prefix, false)?;
        self.executor().apply_counters(&mut batch, delta)
    }

    /// Current behaviors by name, including `serialization_protocol`
    pub fn get_behaviors(&self) -> Behaviors {
        let mut behaviors: Behaviors = Behavior::named()
            .map(|(behavior, name)| {
                let raw = self.handle.get_behavior(behavior);
                (name.to_string(), describe(behavior, raw))
            })
            .collect();
        behaviors.insert(
            SERIALIZATION_PROTOCOL.to_string(),
            BehaviorValue::Int(i64::from(self.native.protocol())),
        );
        behaviors
    }

    /// Apply behaviors by name.
    ///
    /// Unknown names and malformed values are [`Error::Value`]; values the
    /// collaborator refuses are cache errors.
    pub fn set_behaviors(&mut self, behaviors: &Behaviors) -> Result<()> {
        for (name, value) in behaviors {
            if name == SERIALIZATION_PROTOCOL {
                self.native = NativeCodec::new(protocol_number(value)?)?;
                continue;
            }

            let behavior = Behavior::from_name(name)
                .ok_or_else(|| Error::Value(format!("unknown behavior {name:?}")))?;
            let raw = resolve(behavior, value)?;
            let rc = self.handle.set_behavior(behavior, raw);
            if !rc.is_success() {
                return Err(self.executor().error(rc, &format!("set_behavior({name})"), None));
            }
            debug!(behavior = %name, %value, "behavior set");
        }
        Ok(())
    }

    /// Statistics from every server
    pub fn get_stats(&mut self, args: Option<&str>) -> Result<Vec<ServerStats>> {
        let _timer = self.metrics.as_ref().map(|m| m.start("get_stats"));
        match self.handle.stat(args) {
            Ok(stats) => Ok(stats),
            Err(rc) => Err(self.executor().error(rc, "get_stats", None)),
        }
    }

    /// Invalidate every item on every server, after `delay` seconds
    pub fn flush_all(&mut self, delay: u32) -> Result<bool> {
        let _timer = self.metrics.as_ref().map(|m| m.start("flush_all"));
        let rc = self.handle.flush(delay);
        if !rc.is_success() {
            return Err(self.executor().error(rc, "flush_all", None));
        }
        Ok(true)
    }

    /// Close every connection; the next operation reconnects
    pub fn disconnect_all(&mut self) {
        self.handle.quit();
    }

    /// Hash of `key` under the configured `hash` behavior
    pub fn hash(&self, key: impl Into<AppKey>) -> Result<u32> {
        let key = normalize(&key.into())?;
        Ok(self.handle.generate_hash(&key))
    }
}

impl Clone for Client {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone_handle(),
            native: self.native,
            custom: self.custom.clone(),
            compression: self.compression,
            metrics: self.metrics.clone(),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("servers", &self.handle.servers())
            .field("custom_codec", &self.custom.is_some())
            .field("compression", &self.compression)
            .finish()
    }
}

fn protocol_number(value: &BehaviorValue) -> Result<i32> {
    match value {
        BehaviorValue::Int(i) => i32::try_from(*i)
            .map_err(|_| Error::Value(format!("{SERIALIZATION_PROTOCOL} out of range: {i}"))),
        other => Err(Error::Value(format!(
            "{SERIALIZATION_PROTOCOL} takes a number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FLAG_INTEGER, FLAG_TEXT};
    use crate::error::ErrorKind;

    fn client() -> Client {
        Client::in_memory().unwrap()
    }

    fn cas_client() -> Client {
        let mut client = client();
        let mut behaviors = Behaviors::new();
        behaviors.insert("cas".to_string(), true.into());
        client.set_behaviors(&behaviors).unwrap();
        client
    }

    #[test]
    fn test_set_get() {
        let mut client = client();
        assert!(client.set("foo", "bar").unwrap());
        assert_eq!(client.get("foo").unwrap(), Some(Value::from("bar")));
        assert_eq!(client.get("missing").unwrap(), None);
        assert_eq!(
            client.get_or("missing", Value::Int(7)).unwrap(),
            Value::Int(7)
        );
    }

    #[test]
    fn test_empty_value_is_a_hit() {
        let mut client = client();
        client.set("empty", b"").unwrap();
        assert_eq!(client.get("empty").unwrap(), Some(Value::Bytes(Vec::new())));
    }

    #[test]
    fn test_empty_key() {
        let mut client = client();
        assert_eq!(client.get("").unwrap(), None);
        assert!(!client.set("", "x").unwrap());
        assert!(!client.delete("").unwrap());
        assert!(matches!(client.incr("", 1), Err(Error::Key(KeyError::Empty))));
    }

    #[test]
    fn test_long_key_raises() {
        let mut client = client();
        let long = "k".repeat(251);
        assert!(matches!(client.set(long.as_str(), 1), Err(Error::Key(_))));
        assert!(matches!(client.get(long.as_str()), Err(Error::Key(_))));

        let options = StoreOptions::default().with_prefix("pp");
        let key = "k".repeat(249);
        assert!(matches!(
            client.store_with(StoreMode::Set, key.as_str(), 1, &options),
            Err(Error::Key(_))
        ));
    }

    #[test]
    fn test_store_modes() {
        let mut client = client();
        assert!(!client.replace("k", "a").unwrap());
        assert!(client.add("k", "a").unwrap());
        assert!(!client.add("k", "b").unwrap());
        assert!(client.append("k", "c").unwrap());
        assert!(client.prepend("k", "z").unwrap());
        assert_eq!(client.get("k").unwrap(), Some(Value::from("zac")));
    }

    #[test]
    fn test_prefixed_store() {
        let mut client = client();
        let options = StoreOptions::default().with_prefix("ns:").with_ttl(60);
        assert!(client.store_with(StoreMode::Set, "k", 5, &options).unwrap());
        assert_eq!(client.get("ns:k").unwrap(), Some(Value::Int(5)));
        assert_eq!(client.get("k").unwrap(), None);
    }

    #[test]
    fn test_gets_requires_cas() {
        let mut client = client();
        assert!(matches!(client.gets("k"), Err(Error::Value(_))));
        assert!(matches!(client.cas("k", 1, 1, 0), Err(Error::Value(_))));
    }

    #[test]
    fn test_cas_round() {
        let mut client = cas_client();
        assert_eq!(client.gets("k").unwrap(), None);
        client.set("k", 1).unwrap();

        let (value, token) = client.gets("k").unwrap().unwrap();
        assert_eq!(value, Value::Int(1));
        assert!(client.cas("k", 2, token, 0).unwrap());
        assert!(!client.cas("k", 3, token, 0).unwrap());
        assert!(!client.cas("gone", 3, token, 0).unwrap());
        assert!(!client.cas("", 3, token, 0).unwrap());
        assert_eq!(client.get("k").unwrap(), Some(Value::Int(2)));
    }

    #[test]
    fn test_counters() {
        let mut client = client();
        client.set("n", 10).unwrap();
        assert_eq!(client.incr("n", 5).unwrap(), 15);
        assert_eq!(client.decr("n", 20).unwrap(), 0);
        assert!(matches!(client.incr("n", -1), Err(Error::Value(_))));
        assert!(client.incr("missing", 1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_touch() {
        let mut client = client();
        assert!(!client.touch("k", 10).unwrap());
        client.set("k", 1).unwrap();
        assert!(client.touch("k", 10).unwrap());
    }

    #[test]
    fn test_get_multi_maps_origins() {
        let mut client = client();
        client.set("p:a", 1).unwrap();
        client.set(b"p:b", "two").unwrap();

        let found = client
            .get_multi(
                [AppKey::from("a"), AppKey::from(b"b"), AppKey::from("c"), AppKey::from("")],
                Some(&b"p:"[..]),
            )
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&AppKey::from("a")], Value::Int(1));
        assert_eq!(found[&AppKey::from(b"b")], Value::from("two"));
    }

    #[test]
    fn test_get_multi_same_bytes_as_text_and_bytes() {
        let mut client = client();
        client.set("a", 1).unwrap();

        let found = client
            .get_multi([AppKey::from("a"), AppKey::from(b"a")], None)
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&AppKey::from("a")], Value::Int(1));
        assert_eq!(found[&AppKey::from(b"a")], Value::Int(1));
    }

    #[test]
    fn test_delete_multi() {
        let mut client = client();
        client.set_multi([("a", 1), ("b", 2)], &StoreOptions::default()).unwrap();
        assert!(client.delete_multi(["a", "b"], None).unwrap());
        client.set("a", 1).unwrap();
        assert!(!client.delete_multi(["a", "b"], None).unwrap());
        assert_eq!(client.get("a").unwrap(), None);
    }

    #[test]
    fn test_incr_multi() {
        let mut client = client();
        client.set_multi([("a", 1), ("b", 2)], &StoreOptions::default()).unwrap();
        client.incr_multi(["a", "b"], None, 3).unwrap();
        assert_eq!(client.get("b").unwrap(), Some(Value::Int(5)));

        let err = client.incr_multi(["a", "x", "y"], None, 1).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
        assert!(err.to_string().contains("2 keys not found"));
        assert_eq!(client.get("a").unwrap(), Some(Value::Int(5)));
    }

    #[test]
    fn test_behaviors_round_trip() {
        let mut client = client();
        let mut behaviors = Behaviors::new();
        behaviors.insert("hash".to_string(), "fnv1a_32".into());
        behaviors.insert("distribution".to_string(), "consistent".into());
        behaviors.insert("connect_timeout".to_string(), BehaviorValue::Int(250));
        behaviors.insert(SERIALIZATION_PROTOCOL.to_string(), BehaviorValue::Int(0));
        client.set_behaviors(&behaviors).unwrap();

        let current = client.get_behaviors();
        assert_eq!(current["hash"], BehaviorValue::from("fnv1a_32"));
        assert_eq!(current["distribution"], BehaviorValue::from("consistent"));
        assert_eq!(current["connect_timeout"], BehaviorValue::Int(250));
        assert_eq!(current[SERIALIZATION_PROTOCOL], BehaviorValue::Int(0));
    }

    #[test]
    fn test_behavior_errors() {
        let mut client = client();
        let mut behaviors = Behaviors::new();
        behaviors.insert("no_such_thing".to_string(), true.into());
        assert!(matches!(client.set_behaviors(&behaviors), Err(Error::Value(_))));

        let mut behaviors = Behaviors::new();
        behaviors.insert(SERIALIZATION_PROTOCOL.to_string(), BehaviorValue::Int(7));
        assert!(matches!(client.set_behaviors(&behaviors), Err(Error::Value(_))));

        let mut behaviors = Behaviors::new();
        behaviors.insert("hash".to_string(), "hsieh".into());
        let err = client.set_behaviors(&behaviors).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotSupported));
        assert!(err.to_string().contains("set_behavior(hash)"));
    }

    #[test]
    fn test_clone_shares_cluster() {
        let mut client = client();
        let mut other = client.clone();
        other.set("k", "v").unwrap();
        assert_eq!(client.get("k").unwrap(), Some(Value::from("v")));
    }

    #[test]
    fn test_serialize_passthrough() {
        let client = client();
        let (payload, flags) = client.serialize(&Value::Int(42)).unwrap();
        assert_eq!(payload, b"42");
        assert_eq!(flags, FLAG_INTEGER);
        assert_eq!(
            client.deserialize(b"hi", FLAG_TEXT).unwrap(),
            Value::from("hi")
        );
    }

    #[test]
    fn test_hash_follows_behavior() {
        let mut client = client();
        let default = client.hash("key").unwrap();

        let mut behaviors = Behaviors::new();
        behaviors.insert("hash".to_string(), "fnv1a_32".into());
        client.set_behaviors(&behaviors).unwrap();
        assert_eq!(client.hash("key").unwrap(), crate::hash::fnv1a_32(b"key"));
        assert_ne!(client.hash("key").unwrap(), default);
    }

    #[test]
    fn test_flush_and_stats() {
        let mut client = client();
        client.set("k", 1).unwrap();
        assert!(client.flush_all(0).unwrap());
        assert_eq!(client.get("k").unwrap(), None);

        let stats = client.get_stats(None).unwrap();
        assert_eq!(stats.len(), 1);
        assert!(stats[0].stats.contains_key("curr_items"));
    }

    #[test]
    fn test_sasl_rejected() {
        let mut config = Config::default();
        config.client.username = Some("user".to_string());
        let err = Client::from_config(&config).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotSupported));
    }

    #[test]
    fn test_metrics_counted() {
        let metrics = Arc::new(ClientMetrics::new());
        let mut client = client().with_metrics(metrics.clone());
        client.set("k", 1).unwrap();
        client.get("k").unwrap();
        client.get("missing").unwrap();
        assert_eq!(metrics.get_hits.get(), 1);
        assert_eq!(metrics.get_misses.get(), 1);
        assert_eq!(metrics.operations.with_label_values(&["set"]).get(), 1);
    }
}
