//! Items held by the in-process cluster
//!
//! Expiration times follow memcached: 0 never expires, up to 30 days is an
//! offset from now, anything larger is an absolute Unix time.

use std::time::{SystemTime, UNIX_EPOCH};

/// Largest exptime still read as an offset (30 days)
pub const MAX_RELATIVE_EXPTIME: u32 = 60 * 60 * 24 * 30;

/// One cached item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub data: Vec<u8>,
    pub flags: u32,
    /// Bumped by every modification
    pub cas: u64,
    /// Unix time the item dies at; `None` lives until flushed
    pub deadline: Option<u64>,
}

impl Item {
    pub fn new(data: Vec<u8>, flags: u32, exptime: u32, cas: u64) -> Self {
        Self {
            data,
            flags,
            cas,
            deadline: deadline(exptime, unix_now()),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        self.deadline.is_some_and(|at| now >= at)
    }

    /// Replace the expiration time
    pub fn touch(&mut self, exptime: u32) {
        self.deadline = deadline(exptime, unix_now());
    }

    /// Die no later than `at` (delayed flush_all)
    pub fn expire_by(&mut self, at: u64) {
        self.deadline = Some(self.deadline.map_or(at, |d| d.min(at)));
    }

    /// The data read as an incr/decr counter
    pub fn counter(&self) -> Option<u64> {
        std::str::from_utf8(&self.data).ok()?.trim().parse().ok()
    }

    pub fn set_counter(&mut self, value: u64) {
        self.data.clear();
        self.data
            .extend_from_slice(itoa::Buffer::new().format(value).as_bytes());
    }
}

/// Absolute deadline for a memcached exptime
pub fn deadline(exptime: u32, now: u64) -> Option<u64> {
    match exptime {
        0 => None,
        offset if offset <= MAX_RELATIVE_EXPTIME => Some(now + u64::from(offset)),
        absolute => Some(u64::from(absolute)),
    }
}

/// Seconds since the Unix epoch
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
