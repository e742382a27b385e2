//! Runs records against a collaborator handle and classifies the outcomes
//!
//! Every return code lands in one of three buckets:
//! - success
//! - soft failure: the cache declined this key; reported as a value
//! - hard failure: raised as an error and, in a batch, stops the batch

use crate::backend::{FetchResult, Memcached, StoreMode};
use crate::batch::{BatchRequest, PayloadRecord};
use crate::error::{CacheError, Error, ErrorKind, Result, ReturnCode};
use crate::metrics::ClientMetrics;
use tracing::{debug, trace};

/// Classified return code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Soft(ReturnCode),
    Hard(ReturnCode),
}

impl Outcome {
    /// Buckets for set/add/replace/append/prepend
    pub fn of_store(rc: ReturnCode) -> Self {
        match rc {
            ReturnCode::Success => Self::Success,
            ReturnCode::Failure
            | ReturnCode::NoKeyProvided
            | ReturnCode::BadKeyProvided
            | ReturnCode::MemoryAllocationFailure
            | ReturnCode::DataExists
            | ReturnCode::NotStored => Self::Soft(rc),
            _ => Self::Hard(rc),
        }
    }

    /// Buckets for delete
    pub fn of_delete(rc: ReturnCode) -> Self {
        match rc {
            ReturnCode::Success => Self::Success,
            ReturnCode::Failure
            | ReturnCode::NotFound
            | ReturnCode::NoKeyProvided
            | ReturnCode::BadKeyProvided => Self::Soft(rc),
            _ => Self::Hard(rc),
        }
    }

    /// Buckets for touch; a server may answer STORED
    pub fn of_touch(rc: ReturnCode) -> Self {
        match rc {
            ReturnCode::Stored => Self::Success,
            _ => Self::of_delete(rc),
        }
    }

    /// Buckets for cas
    pub fn of_cas(rc: ReturnCode) -> Self {
        match rc {
            ReturnCode::Success => Self::Success,
            ReturnCode::DataExists | ReturnCode::NotFound => Self::Soft(rc),
            _ => Self::Hard(rc),
        }
    }
}

/// Executes operations on one borrowed handle
pub struct Executor<'a> {
    handle: &'a mut dyn Memcached,
    metrics: Option<&'a ClientMetrics>,
}

impl<'a> Executor<'a> {
    pub fn new(handle: &'a mut dyn Memcached, metrics: Option<&'a ClientMetrics>) -> Self {
        Self { handle, metrics }
    }

    /// Error for a hard failure, with the collaborator's detail message
    pub fn error(&self, rc: ReturnCode, op: &str, key: Option<&[u8]>) -> Error {
        if let Some(metrics) = self.metrics {
            metrics.hard_failure(op);
        }
        let detail = self.handle.error_message(rc);
        debug!(op, code = rc.as_raw(), %detail, "cache operation failed");
        Error::from_return(rc, op, key, &detail)
    }

    /// Turn an outcome into `Ok(success)` or the hard error
    fn settle(&self, outcome: Outcome, op: &str, key: &[u8]) -> Result<bool> {
        match outcome {
            Outcome::Success => Ok(true),
            Outcome::Soft(rc) => {
                trace!(op, key = %String::from_utf8_lossy(key), ?rc, "soft failure");
                if let Some(metrics) = self.metrics {
                    metrics.soft_failure(op);
                }
                Ok(false)
            }
            Outcome::Hard(rc) => Err(self.error(rc, op, Some(key))),
        }
    }

    /// Store one record; rejected records are settled without a call
    pub fn store(&mut self, mode: StoreMode, record: &mut PayloadRecord, op: &str) -> Result<bool> {
        let rc = match record.rejected {
            Some(rc) => rc,
            None => self
                .handle
                .store(mode, &record.key, &record.value, record.ttl, record.flags),
        };
        let stored = self.settle(Outcome::of_store(rc), op, &record.key)?;
        record.success = stored;
        Ok(stored)
    }

    /// Store every record in order, stopping at the first hard failure.
    ///
    /// A hard failure is returned as [`Error::BatchAborted`] listing the keys
    /// stored before it.
    pub fn store_records(&mut self, mode: StoreMode, batch: &mut BatchRequest, op: &str) -> Result<()> {
        let mut failure = None;
        for record in batch.records_mut() {
            if let Err(e) = self.store(mode, record, op) {
                failure = Some(e);
                break;
            }
        }

        match failure {
            Some(source) => Err(Error::BatchAborted {
                stored: batch.succeeded_keys(),
                source: Box::new(source),
            }),
            None => Ok(()),
        }
    }

    /// Compare-and-swap one record against `cas`
    pub fn store_cas(&mut self, record: &mut PayloadRecord, cas: u64) -> Result<bool> {
        let rc = match record.rejected {
            Some(rc) => rc,
            None => self
                .handle
                .store_cas(&record.key, &record.value, record.ttl, record.flags, cas),
        };
        let swapped = self.settle(Outcome::of_cas(rc), "cas", &record.key)?;
        record.success = swapped;
        Ok(swapped)
    }

    /// Fetch one key; `None` on a miss
    pub fn fetch_one(&mut self, key: &[u8], op: &str) -> Result<Option<FetchResult>> {
        match self.handle.fetch_one(key) {
            Ok(result) => {
                self.hit(1);
                Ok(Some(result))
            }
            Err(ReturnCode::NotFound) => {
                self.miss(1);
                Ok(None)
            }
            Err(rc) => Err(self.error(rc, op, Some(key))),
        }
    }

    /// One batched fetch, drained until the end of the cursor.
    ///
    /// Keys the collaborator refuses as bad are skipped; any other cursor
    /// error ends the fetch, closes the connections and is raised.
    pub fn fetch_many(&mut self, batch: &BatchRequest) -> Result<Vec<FetchResult>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let rc = self.handle.mget(&batch.wire_keys());
        if !rc.is_success() {
            return Err(self.error(rc, "get_multi", None));
        }

        let mut results = Vec::with_capacity(batch.len());
        loop {
            match self.handle.fetch_result() {
                Ok(result) => results.push(result),
                Err(ReturnCode::End) => break,
                Err(ReturnCode::BadKeyProvided | ReturnCode::NoKeyProvided) => {}
                Err(rc) => {
                    let err = self.error(rc, "get_multi", None);
                    self.handle.quit();
                    return Err(err);
                }
            }
        }

        self.hit(results.len());
        self.miss(batch.len().saturating_sub(results.len()));
        Ok(results)
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let rc = self.handle.delete(key, 0);
        self.settle(Outcome::of_delete(rc), "delete", key)
    }

    pub fn touch(&mut self, key: &[u8], ttl: u32) -> Result<bool> {
        let rc = self.handle.touch(key, ttl);
        self.settle(Outcome::of_touch(rc), "touch", key)
    }

    /// incr or decr one counter; a missing key is a NotFound error
    pub fn counter(&mut self, key: &[u8], increment: bool, delta: u64) -> Result<u64> {
        let result = if increment {
            self.handle.increment(key, delta)
        } else {
            self.handle.decrement(key, delta)
        };
        result.map_err(|rc| self.error(rc, if increment { "incr" } else { "decr" }, Some(key)))
    }

    /// Increment every record's key by `delta`.
    ///
    /// All keys are attempted. Failures are reported together as one error
    /// reading "N keys not found" when only misses occurred, otherwise
    /// "N keys failed".
    pub fn apply_counters(&mut self, batch: &mut BatchRequest, delta: u64) -> Result<()> {
        let mut not_found = 0usize;
        let mut failed = Vec::new();

        for record in batch.records_mut() {
            match self.handle.increment(&record.key, delta) {
                Ok(_) => record.success = true,
                Err(ReturnCode::NotFound) => not_found += 1,
                Err(rc) => failed.push(rc),
            }
        }

        if not_found == 0 && failed.is_empty() {
            return Ok(());
        }
        if let Some(metrics) = self.metrics {
            metrics.hard_failure("incr_multi");
        }

        let total = not_found + failed.len();
        let (kind, code, what) = match failed.as_slice() {
            [] => (ErrorKind::NotFound, ReturnCode::NotFound, "not found"),
            [rc] => (ErrorKind::from_code(*rc)?, *rc, "failed"),
            [.., last] => (ErrorKind::Generic, *last, "failed"),
        };
        Err(Error::Cache(CacheError {
            kind,
            code,
            message: format!("{total} keys {what}"),
        }))
    }

    /// Run `f` on every record; true if it succeeded for all of them
    pub fn run_each<F>(&mut self, batch: &mut BatchRequest, mut f: F) -> Result<bool>
    where
        F: FnMut(&mut Self, &PayloadRecord) -> Result<bool>,
    {
        let mut all = true;
        for record in batch.records_mut() {
            let ok = f(self, record)?;
            record.success = ok;
            all &= ok;
        }
        Ok(all)
    }

    fn hit(&self, n: usize) {
        if let Some(metrics) = self.metrics {
            metrics.get_hits.inc_by(n as u64);
        }
    }

    fn miss(&self, n: usize) {
        if let Some(metrics) = self.metrics {
            metrics.get_misses.inc_by(n as u64);
        }
    }
}
