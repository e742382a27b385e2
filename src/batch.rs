//! Batch request construction
//!
//! A [`BatchRequest`] is built fresh for every multi-key call: its records
//! carry the encoded payloads and its origin map translates wire keys back to
//! the keys the caller passed in.

use crate::codec::{Codec, FLAG_ZLIB, Value};
use crate::compression::{CompressionOptions, maybe_compress};
use crate::error::{ReturnCode, Result};
use crate::key::{AppKey, normalize_prefixed};
use crate::metrics::ClientMetrics;
use std::collections::HashMap;
use tracing::trace;

/// One key's worth of work for the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRecord {
    /// Wire key, prefix included
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub flags: u32,
    pub ttl: u32,
    pub cas: Option<u64>,
    /// Set by the executor once the record has run
    pub success: bool,
    /// Outcome decided at build time; such records are never sent
    pub rejected: Option<ReturnCode>,
    /// The caller's key
    pub origin: AppKey,
}

impl PayloadRecord {
    fn rejected(origin: AppKey, key: Vec<u8>, code: ReturnCode) -> Self {
        Self {
            key,
            value: Vec::new(),
            flags: 0,
            ttl: 0,
            cas: None,
            success: false,
            rejected: Some(code),
            origin,
        }
    }
}

/// Serialize a value and compress it when the options ask for it
pub fn marshal(
    codec: &dyn Codec,
    value: &Value,
    compression: &CompressionOptions,
    metrics: Option<&ClientMetrics>,
) -> Result<(Vec<u8>, u32)> {
    let (payload, flags) = codec.serialize(value)?;
    match maybe_compress(&payload, compression) {
        Some(compressed) => {
            trace!(
                original = payload.len(),
                compressed = compressed.len(),
                "value compressed"
            );
            if let Some(metrics) = metrics {
                metrics.compressed(payload.len(), compressed.len());
            }
            Ok((compressed, flags | FLAG_ZLIB))
        }
        None => Ok((payload, flags)),
    }
}

/// Records of one multi-key call, in request order
#[derive(Debug, Default)]
pub struct BatchRequest {
    records: Vec<PayloadRecord>,
    origins: HashMap<Vec<u8>, Vec<AppKey>>,
}

impl BatchRequest {
    /// Build store records.
    ///
    /// Keys that cannot go on the wire (empty, or too long once prefixed)
    /// become rejected records and are reported as not stored. A value that
    /// fails to serialize aborts the whole build.
    pub fn for_store(
        items: &[(AppKey, Value)],
        prefix: Option<&[u8]>,
        ttl: u32,
        codec: &dyn Codec,
        compression: &CompressionOptions,
        metrics: Option<&ClientMetrics>,
    ) -> Result<Self> {
        let mut batch = Self::with_capacity(items.len());

        for (origin, value) in items {
            let key = match normalize_prefixed(prefix, origin) {
                Ok(key) => key,
                Err(e) => {
                    trace!(key = %origin, error = %e, "rejecting key");
                    let mut wire = prefix.unwrap_or_default().to_vec();
                    wire.extend_from_slice(origin.as_bytes());
                    batch.push(PayloadRecord::rejected(
                        origin.clone(),
                        wire,
                        ReturnCode::BadKeyProvided,
                    ));
                    continue;
                }
            };
            if origin.is_empty() {
                batch.push(PayloadRecord::rejected(
                    origin.clone(),
                    key,
                    ReturnCode::NoKeyProvided,
                ));
                continue;
            }

            let (payload, flags) = marshal(codec, value, compression, metrics)?;
            batch.push(PayloadRecord {
                key,
                value: payload,
                flags,
                ttl,
                cas: None,
                success: false,
                rejected: None,
                origin: origin.clone(),
            });
        }

        Ok(batch)
    }

    /// Build key-only records for fetch, delete and counter batches.
    ///
    /// With `skip_empty`, empty keys are dropped instead of becoming
    /// records. A key too long for the wire aborts the build.
    pub fn for_keys(keys: &[AppKey], prefix: Option<&[u8]>, skip_empty: bool) -> Result<Self> {
        let mut batch = Self::with_capacity(keys.len());

        for origin in keys {
            if skip_empty && origin.is_empty() {
                continue;
            }
            let key = normalize_prefixed(prefix, origin)?;
            batch.push(PayloadRecord {
                key,
                value: Vec::new(),
                flags: 0,
                ttl: 0,
                cas: None,
                success: false,
                rejected: None,
                origin: origin.clone(),
            });
        }

        Ok(batch)
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            origins: HashMap::with_capacity(capacity),
        }
    }

    fn push(&mut self, record: PayloadRecord) {
        let origins = self.origins.entry(record.key.clone()).or_default();
        if !origins.contains(&record.origin) {
            origins.push(record.origin.clone());
        }
        self.records.push(record);
    }

    pub fn records(&self) -> &[PayloadRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [PayloadRecord] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The caller's keys for a wire key.
    ///
    /// Several keys share one wire key when, say, a text key and a byte key
    /// spell the same bytes.
    pub fn origins(&self, wire_key: &[u8]) -> &[AppKey] {
        self.origins.get(wire_key).map_or(&[], Vec::as_slice)
    }

    /// Wire keys, in request order
    pub fn wire_keys(&self) -> Vec<Vec<u8>> {
        self.records.iter().map(|r| r.key.clone()).collect()
    }

    /// Caller keys of records that ran and failed, or were rejected
    pub fn failed_keys(&self) -> Vec<AppKey> {
        self.records
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.origin.clone())
            .collect()
    }

    /// Caller keys of records that succeeded
    pub fn succeeded_keys(&self) -> Vec<AppKey> {
        self.records
            .iter()
            .filter(|r| r.success)
            .map(|r| r.origin.clone())
            .collect()
    }
}
