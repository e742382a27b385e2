//! Hand-written memcached ASCII reply parser
//!
//! Two-phase parsing, mirroring the request side:
//! 1. Parse the reply line (up to \r\n)
//! 2. For VALUE lines, wait for the data block

use crate::ProtocolError;
use crate::protocol::command::{MAX_KEY_LENGTH, Reply};

/// Largest data block a VALUE line may announce (64 MiB)
pub const MAX_VALUE_LENGTH: usize = 64 * 1024 * 1024;

/// Result of parsing
#[derive(Debug)]
pub enum ParseResult {
    /// Reply fully parsed, with the number of bytes it used
    Complete(Reply, usize),
    /// Need more data to complete parsing
    NeedMoreData,
    /// Parse error
    Error(ProtocolError),
}

/// Parse one reply from the front of `buf`
pub fn parse_reply(buf: &[u8]) -> ParseResult {
    let line_end = match find_crlf(buf) {
        Some(pos) => pos,
        None => return ParseResult::NeedMoreData,
    };

    let line = &buf[..line_end];
    let consumed = line_end + 2;

    let (word, rest) = match memchr::memchr(b' ', line) {
        Some(sp) => (&line[..sp], &line[sp + 1..]),
        None => (line, &b""[..]),
    };

    let reply = match word {
        b"VALUE" => return parse_value(rest, buf, line_end),
        b"END" => Reply::End,
        b"STORED" => Reply::Stored,
        b"NOT_STORED" => Reply::NotStored,
        b"EXISTS" => Reply::Exists,
        b"NOT_FOUND" => Reply::NotFound,
        b"DELETED" => Reply::Deleted,
        b"TOUCHED" => Reply::Touched,
        b"OK" => Reply::Ok,
        b"ERROR" => Reply::Error,
        b"CLIENT_ERROR" => Reply::ClientError(lossy(rest)),
        b"SERVER_ERROR" => Reply::ServerError(lossy(rest)),
        b"VERSION" => Reply::Version(lossy(rest)),
        b"STAT" => {
            let (name, value) = match memchr::memchr(b' ', rest) {
                Some(sp) => (&rest[..sp], &rest[sp + 1..]),
                None => (rest, &b""[..]),
            };
            Reply::Stat {
                name: lossy(name),
                value: lossy(value),
            }
        }
        _ if !word.is_empty() && word.iter().all(u8::is_ascii_digit) && rest.iter().all(|&b| b == b' ') => {
            match parse_u64(word) {
                Some(n) => Reply::Number(n),
                None => return ParseResult::Error(ProtocolError::InvalidNumericValue),
            }
        }
        _ => return ParseResult::Error(ProtocolError::InvalidResponse(lossy(line))),
    };

    ParseResult::Complete(reply, consumed)
}

/// Parse `<key> <flags> <bytes> [<cas unique>]` and its data block
fn parse_value(rest: &[u8], buf: &[u8], line_end: usize) -> ParseResult {
    let mut parts = rest.split(|&b| b == b' ').filter(|p| !p.is_empty());

    let key = match parts.next() {
        Some(k) if k.len() <= MAX_KEY_LENGTH => k,
        Some(k) => return ParseResult::Error(ProtocolError::InvalidKey(lossy(k))),
        None => {
            return ParseResult::Error(ProtocolError::InvalidResponse(
                "VALUE without key".to_string(),
            ));
        }
    };

    let flags = match parts.next().and_then(parse_u32) {
        Some(f) => f,
        None => return ParseResult::Error(ProtocolError::InvalidFlags),
    };

    let bytes = match parts.next().and_then(parse_usize) {
        Some(b) if b <= MAX_VALUE_LENGTH => b,
        _ => return ParseResult::Error(ProtocolError::InvalidBytesLength),
    };

    let cas = match parts.next() {
        Some(c) => match parse_u64(c) {
            Some(c) => Some(c),
            None => return ParseResult::Error(ProtocolError::InvalidCas),
        },
        None => None,
    };

    // Check if we have enough data for the data block
    let data_start = line_end + 2;
    let Some((data_end, total_needed)) = data_start
        .checked_add(bytes)
        .and_then(|end| Some((end, end.checked_add(2)?)))
    else {
        return ParseResult::Error(ProtocolError::InvalidBytesLength);
    };

    if buf.len() < total_needed {
        return ParseResult::NeedMoreData;
    }

    // Verify trailing \r\n
    if buf[data_end] != b'\r' || buf[data_end + 1] != b'\n' {
        return ParseResult::Error(ProtocolError::UnexpectedData);
    }

    let reply = Reply::Value {
        key: key.to_vec(),
        flags,
        data: buf[data_start..data_end].to_vec(),
        cas,
    };

    ParseResult::Complete(reply, total_needed)
}

/// Find \r\n in buffer
#[inline]
pub fn find_crlf(buf: &[u8]) -> Option<usize> {
    memchr::memmem::find(buf, b"\r\n")
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parse bytes as u32
fn parse_u32(bytes: &[u8]) -> Option<u32> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Parse bytes as u64
fn parse_u64(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Parse bytes as usize
fn parse_usize(bytes: &[u8]) -> Option<usize> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
