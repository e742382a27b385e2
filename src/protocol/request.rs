//! Memcached ASCII protocol request builder

use bytes::BytesMut;
use itoa::Buffer;

/// Request writer for memcached ASCII protocol
pub struct RequestWriter {
    buf: BytesMut,
}

impl RequestWriter {
    /// Create a new request writer with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Get the internal buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Take the buffer, leaving an empty buffer in its place
    pub fn take(&mut self) -> BytesMut {
        std::mem::take(&mut self.buf)
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Returns true if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn number(&mut self, n: impl itoa::Integer) {
        let mut itoa_buf = Buffer::new();
        self.buf.extend_from_slice(itoa_buf.format(n).as_bytes());
    }

    /// Write a storage command
    /// Format: <command> <key> <flags> <exptime> <bytes> [<cas unique>]\r\n<data>\r\n
    pub fn storage(
        &mut self,
        command: &str,
        key: &[u8],
        flags: u32,
        exptime: u32,
        data: &[u8],
        cas: Option<u64>,
    ) {
        self.buf.extend_from_slice(command.as_bytes());
        self.buf.extend_from_slice(b" ");
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(b" ");
        self.number(flags);
        self.buf.extend_from_slice(b" ");
        self.number(exptime);
        self.buf.extend_from_slice(b" ");
        self.number(data.len());
        if let Some(cas) = cas {
            self.buf.extend_from_slice(b" ");
            self.number(cas);
        }
        self.buf.extend_from_slice(b"\r\n");
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write a retrieval command for one or more keys
    /// Format: get|gets <key>*\r\n
    pub fn retrieval<K: AsRef<[u8]>>(&mut self, with_cas: bool, keys: &[K]) {
        self.buf
            .extend_from_slice(if with_cas { &b"gets"[..] } else { &b"get"[..] });
        for key in keys {
            self.buf.extend_from_slice(b" ");
            self.buf.extend_from_slice(key.as_ref());
        }
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write delete
    pub fn delete(&mut self, key: &[u8]) {
        self.buf.extend_from_slice(b"delete ");
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write incr or decr
    pub fn arithmetic(&mut self, increment: bool, key: &[u8], delta: u64) {
        self.buf
            .extend_from_slice(if increment { b"incr " } else { b"decr " });
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(b" ");
        self.number(delta);
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write touch
    pub fn touch(&mut self, key: &[u8], exptime: u32) {
        self.buf.extend_from_slice(b"touch ");
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(b" ");
        self.number(exptime);
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write flush_all, with an optional delay in seconds
    pub fn flush_all(&mut self, delay: u32) {
        self.buf.extend_from_slice(b"flush_all");
        if delay > 0 {
            self.buf.extend_from_slice(b" ");
            self.number(delay);
        }
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write stats, with optional sub-command arguments
    pub fn stats(&mut self, args: Option<&str>) {
        self.buf.extend_from_slice(b"stats");
        if let Some(args) = args.filter(|a| !a.is_empty()) {
            self.buf.extend_from_slice(b" ");
            self.buf.extend_from_slice(args.as_bytes());
        }
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write quit
    pub fn quit(&mut self) {
        self.buf.extend_from_slice(b"quit\r\n");
    }
}

impl Default for RequestWriter {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage() {
        let mut writer = RequestWriter::new(256);
        writer.storage("set", b"mykey", 42, 3600, b"hello", None);
        assert_eq!(writer.buffer(), b"set mykey 42 3600 5\r\nhello\r\n");
        writer.clear();

        writer.storage("cas", b"k", 0, 0, b"", Some(77));
        assert_eq!(writer.take().as_ref(), b"cas k 0 0 0 77\r\n\r\n");
        assert!(writer.is_empty());
    }

    #[test]
    fn test_retrieval() {
        let mut writer = RequestWriter::new(256);
        writer.retrieval(false, &[&b"key1"[..], &b"key2"[..]]);
        assert_eq!(writer.take().as_ref(), b"get key1 key2\r\n");

        writer.retrieval(true, &[b"k".to_vec()]);
        assert_eq!(writer.take().as_ref(), b"gets k\r\n");
    }

    #[test]
    fn test_simple_requests() {
        let mut writer = RequestWriter::new(256);

        writer.delete(b"k");
        assert_eq!(writer.take().as_ref(), b"delete k\r\n");

        writer.arithmetic(true, b"n", 5);
        assert_eq!(writer.take().as_ref(), b"incr n 5\r\n");

        writer.arithmetic(false, b"n", 1);
        assert_eq!(writer.take().as_ref(), b"decr n 1\r\n");

        writer.touch(b"k", 30);
        assert_eq!(writer.take().as_ref(), b"touch k 30\r\n");

        writer.flush_all(0);
        assert_eq!(writer.take().as_ref(), b"flush_all\r\n");

        writer.flush_all(10);
        assert_eq!(writer.take().as_ref(), b"flush_all 10\r\n");

        writer.stats(None);
        assert_eq!(writer.take().as_ref(), b"stats\r\n");

        writer.stats(Some("slabs"));
        assert_eq!(writer.take().as_ref(), b"stats slabs\r\n");

        writer.quit();
        assert_eq!(writer.take().as_ref(), b"quit\r\n");
    }
}
