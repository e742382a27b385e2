//! Memcached ASCII protocol reply types

/// Maximum key length accepted by memcached
pub const MAX_KEY_LENGTH: usize = 250;

/// A parsed server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// VALUE <key> <flags> <bytes> [<cas unique>]
    Value {
        key: Vec<u8>,
        flags: u32,
        data: Vec<u8>,
        cas: Option<u64>,
    },

    /// END (terminates retrieval and stats replies)
    End,

    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
    Touched,

    /// OK (flush_all)
    Ok,

    /// STAT <name> <value>
    Stat { name: String, value: String },

    /// Bare number (incr/decr result)
    Number(u64),

    /// VERSION <version>
    Version(String),

    /// ERROR (unknown command)
    Error,

    /// CLIENT_ERROR <message>
    ClientError(String),

    /// SERVER_ERROR <message>
    ServerError(String),
}

impl Reply {
    /// Returns true for ERROR, CLIENT_ERROR and SERVER_ERROR
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Reply::Error | Reply::ClientError(_) | Reply::ServerError(_)
        )
    }
}

/// Check if a key can travel in a text protocol request line.
///
/// Only space, control bytes and DEL are excluded, so UTF-8 text keys pass.
pub fn is_valid_key(key: &[u8]) -> bool {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return false;
    }
    key.iter().all(|&b| b > 32 && b != 127)
}

/// Stricter check applied under `verify_keys`: printable ASCII only
pub fn is_printable_key(key: &[u8]) -> bool {
    is_valid_key(key) && key.iter().all(u8::is_ascii_graphic)
}
