//! Error types for mcpipe
//!
//! Cache-level failures carry the raw collaborator [`ReturnCode`] together with
//! the [`ErrorKind`] it maps to, so callers can match on either.

use crate::key::AppKey;
use std::fmt;
use thiserror::Error;

/// Main error type for mcpipe
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Invalid value: {0}")]
    Value(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Returned by a custom deserializer to turn a hit into a miss
    #[error("Cache miss")]
    CacheMiss,

    #[error("Batch aborted after storing {} keys: {}", .stored.len(), .source)]
    BatchAborted {
        /// Keys stored before the hard failure, in request order
        stored: Vec<AppKey>,
        source: Box<Error>,
    },

    #[error("No client available in pool after {0:?}")]
    PoolTimeout(std::time::Duration),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build the error for a collaborator return code.
    ///
    /// The message reads `error <code> from <operation>(<key>): <detail>`.
    /// Mapping [`ReturnCode::Success`] is a bug in the caller and yields
    /// [`Error::Internal`].
    pub fn from_return(code: ReturnCode, operation: &str, key: Option<&[u8]>, detail: &str) -> Self {
        let kind = match ErrorKind::from_code(code) {
            Ok(kind) => kind,
            Err(e) => return e,
        };

        let mut message = format!("error {} from {operation}", code.as_raw());
        if let Some(key) = key {
            message.push('(');
            message.push_str(&String::from_utf8_lossy(key));
            message.push(')');
        }
        if !detail.is_empty() {
            message.push_str(": ");
            message.push_str(detail);
        }

        Self::Cache(CacheError {
            kind,
            code,
            message,
        })
    }

    /// The cache error kind, if this is a cache error
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Cache(e) => Some(e.kind),
            Self::BatchAborted { source, .. } => source.kind(),
            _ => None,
        }
    }

    /// The collaborator return code, if this is a cache error
    pub fn code(&self) -> Option<ReturnCode> {
        match self {
            Self::Cache(e) => Some(e.code),
            Self::BatchAborted { source, .. } => source.code(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == Some(ErrorKind::NotFound)
    }
}

/// A failure reported by the cache collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CacheError {
    pub kind: ErrorKind,
    pub code: ReturnCode,
    pub message: String,
}

/// Key normalization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("key length {len} too long, max is {max}")]
    TooLong { len: usize, max: usize },

    #[error("key must not be empty")]
    Empty,
}

/// Errors turning a fetched payload back into a value
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unknown value flags {0:#x}")]
    UnknownFlags(u32),

    #[error("invalid integer payload: {0}")]
    InvalidInteger(String),

    #[error("invalid text payload: {0}")]
    InvalidText(#[from] std::str::Utf8Error),

    #[error("malformed serialized value: {0}")]
    Generic(String),

    #[error(transparent)]
    Decompress(#[from] DecompressError),
}

/// zlib inflate failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecompressError {
    #[error("malformed compressed value: {0}")]
    Malformed(String),

    #[error("decompressed value exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("value is compressed but zlib support is not compiled in")]
    Unsupported,
}

/// ASCII protocol reply parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid flags")]
    InvalidFlags,

    #[error("Invalid bytes length")]
    InvalidBytesLength,

    #[error("Invalid numeric value")]
    InvalidNumericValue,

    #[error("Invalid cas unique")]
    InvalidCas,

    #[error("Unexpected data")]
    UnexpectedData,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Collaborator return codes, numbered like libmemcached 1.0's `memcached_return_t`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ReturnCode {
    Success = 0,
    Failure = 1,
    HostLookupFailure = 2,
    ConnectionFailure = 3,
    ConnectionBindFailure = 4,
    WriteFailure = 5,
    ReadFailure = 6,
    UnknownReadFailure = 7,
    ProtocolError = 8,
    ClientError = 9,
    ServerError = 10,
    ConnectionSocketCreateFailure = 11,
    DataExists = 12,
    DataDoesNotExist = 13,
    NotStored = 14,
    Stored = 15,
    NotFound = 16,
    MemoryAllocationFailure = 17,
    PartialRead = 18,
    SomeErrors = 19,
    NoServers = 20,
    End = 21,
    Deleted = 22,
    Value = 23,
    Stat = 24,
    Item = 25,
    Errno = 26,
    FailUnixSocket = 27,
    NotSupported = 28,
    NoKeyProvided = 29,
    FetchNotFinished = 30,
    Timeout = 31,
    Buffered = 32,
    BadKeyProvided = 33,
    InvalidHostProtocol = 34,
    ServerMarkedDead = 35,
    UnknownStatKey = 36,
    E2Big = 37,
    InvalidArguments = 38,
    KeyTooBig = 39,
    AuthProblem = 40,
    AuthFailure = 41,
    AuthContinue = 42,
    ParseError = 43,
    ParseUserError = 44,
    Deprecated = 45,
    InProgress = 46,
    ServerTemporarilyDisabled = 47,
    ServerMemoryAllocationFailure = 48,
}

impl ReturnCode {
    const ALL: [ReturnCode; 49] = [
        Self::Success,
        Self::Failure,
        Self::HostLookupFailure,
        Self::ConnectionFailure,
        Self::ConnectionBindFailure,
        Self::WriteFailure,
        Self::ReadFailure,
        Self::UnknownReadFailure,
        Self::ProtocolError,
        Self::ClientError,
        Self::ServerError,
        Self::ConnectionSocketCreateFailure,
        Self::DataExists,
        Self::DataDoesNotExist,
        Self::NotStored,
        Self::Stored,
        Self::NotFound,
        Self::MemoryAllocationFailure,
        Self::PartialRead,
        Self::SomeErrors,
        Self::NoServers,
        Self::End,
        Self::Deleted,
        Self::Value,
        Self::Stat,
        Self::Item,
        Self::Errno,
        Self::FailUnixSocket,
        Self::NotSupported,
        Self::NoKeyProvided,
        Self::FetchNotFinished,
        Self::Timeout,
        Self::Buffered,
        Self::BadKeyProvided,
        Self::InvalidHostProtocol,
        Self::ServerMarkedDead,
        Self::UnknownStatKey,
        Self::E2Big,
        Self::InvalidArguments,
        Self::KeyTooBig,
        Self::AuthProblem,
        Self::AuthFailure,
        Self::AuthContinue,
        Self::ParseError,
        Self::ParseUserError,
        Self::Deprecated,
        Self::InProgress,
        Self::ServerTemporarilyDisabled,
        Self::ServerMemoryAllocationFailure,
    ];

    /// Look up a code by its numeric value
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Human readable description, worded like libmemcached's `memcached_strerror`
    pub fn description(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::HostLookupFailure => "getaddrinfo() or getnameinfo() HOSTNAME LOOKUP FAILURE",
            Self::ConnectionFailure => "CONNECTION FAILURE",
            Self::ConnectionBindFailure => "CONNECTION BIND FAILURE",
            Self::WriteFailure => "WRITE FAILURE",
            Self::ReadFailure => "READ FAILURE",
            Self::UnknownReadFailure => "UNKNOWN READ FAILURE",
            Self::ProtocolError => "PROTOCOL ERROR",
            Self::ClientError => "CLIENT ERROR",
            Self::ServerError => "SERVER ERROR",
            Self::ConnectionSocketCreateFailure => "CONNECTION SOCKET CREATE FAILURE",
            Self::DataExists => "CONNECTION DATA EXISTS",
            Self::DataDoesNotExist => "CONNECTION DATA DOES NOT EXIST",
            Self::NotStored => "NOT STORED",
            Self::Stored => "STORED",
            Self::NotFound => "NOT FOUND",
            Self::MemoryAllocationFailure => "MEMORY ALLOCATION FAILURE",
            Self::PartialRead => "PARTIAL READ",
            Self::SomeErrors => "SOME ERRORS WERE REPORTED",
            Self::NoServers => "NO SERVERS DEFINED",
            Self::End => "SERVER END",
            Self::Deleted => "SERVER DELETE",
            Self::Value => "SERVER VALUE",
            Self::Stat => "STAT VALUE",
            Self::Item => "ITEM VALUE",
            Self::Errno => "SYSTEM ERROR",
            Self::FailUnixSocket => "COULD NOT OPEN UNIX SOCKET",
            Self::NotSupported => "ACTION NOT SUPPORTED",
            Self::NoKeyProvided => "A KEY LENGTH OF ZERO WAS PROVIDED",
            Self::FetchNotFinished => "FETCH WAS NOT COMPLETED",
            Self::Timeout => "A TIMEOUT OCCURRED",
            Self::Buffered => "ACTION QUEUED",
            Self::BadKeyProvided => "A BAD KEY WAS PROVIDED/CHARACTERS OUT OF RANGE",
            Self::InvalidHostProtocol => "THE HOST TRANSPORT PROTOCOL DOES NOT MATCH THAT OF THE CLIENT",
            Self::ServerMarkedDead => "SERVER IS MARKED DEAD",
            Self::UnknownStatKey => "ENCOUNTERED AN UNKNOWN STAT KEY",
            Self::E2Big => "ITEM TOO BIG",
            Self::InvalidArguments => "INVALID ARGUMENTS",
            Self::KeyTooBig => "KEY RETURNED FROM SERVER WAS TOO LARGE",
            Self::AuthProblem => "FAILED TO SEND AUTHENTICATION TO SERVER",
            Self::AuthFailure => "AUTHENTICATION FAILURE",
            Self::AuthContinue => "CONTINUE AUTHENTICATION",
            Self::ParseError => "ERROR OCCURED WHILE PARSING",
            Self::ParseUserError => "USER INITIATED ERROR OCCURED WHILE PARSING",
            Self::Deprecated => "DEPRECATED",
            Self::InProgress => "OPERATION IN PROCESS",
            Self::ServerTemporarilyDisabled => "SERVER HAS FAILED AND IS DISABLED UNTIL TIMED RETRY",
            Self::ServerMemoryAllocationFailure => "SERVER FAILED TO ALLOCATE OBJECT",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Error categories callers can match on, one per distinct failure family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Failure,
    HostLookup,
    Connection,
    ConnectionBind,
    Write,
    Read,
    UnknownReadFailure,
    Protocol,
    Client,
    Server,
    SocketCreate,
    DataExists,
    DataDoesNotExist,
    NotFound,
    Allocation,
    SomeErrors,
    NoServers,
    UnixSocket,
    NotSupported,
    FetchNotFinished,
    BadKeyProvided,
    InvalidHostProtocol,
    ServerDead,
    ServerDown,
    TooBig,
    UnknownStatKey,
    /// Any code without a dedicated kind
    Generic,
}

impl ErrorKind {
    /// Map a non-success return code to its kind
    pub fn from_code(code: ReturnCode) -> Result<Self> {
        let kind = match code {
            ReturnCode::Success => {
                return Err(Error::Internal("error == SUCCESS".to_string()));
            }
            ReturnCode::Failure => Self::Failure,
            ReturnCode::HostLookupFailure => Self::HostLookup,
            ReturnCode::ConnectionFailure => Self::Connection,
            ReturnCode::ConnectionBindFailure => Self::ConnectionBind,
            ReturnCode::WriteFailure => Self::Write,
            ReturnCode::ReadFailure => Self::Read,
            ReturnCode::UnknownReadFailure => Self::UnknownReadFailure,
            ReturnCode::ProtocolError => Self::Protocol,
            ReturnCode::ClientError => Self::Client,
            ReturnCode::ServerError => Self::Server,
            ReturnCode::ConnectionSocketCreateFailure => Self::SocketCreate,
            ReturnCode::DataExists => Self::DataExists,
            ReturnCode::DataDoesNotExist => Self::DataDoesNotExist,
            ReturnCode::NotFound => Self::NotFound,
            ReturnCode::MemoryAllocationFailure => Self::Allocation,
            ReturnCode::SomeErrors => Self::SomeErrors,
            ReturnCode::NoServers => Self::NoServers,
            ReturnCode::FailUnixSocket => Self::UnixSocket,
            ReturnCode::NotSupported => Self::NotSupported,
            ReturnCode::FetchNotFinished => Self::FetchNotFinished,
            ReturnCode::BadKeyProvided => Self::BadKeyProvided,
            ReturnCode::InvalidHostProtocol => Self::InvalidHostProtocol,
            ReturnCode::ServerMarkedDead => Self::ServerDead,
            ReturnCode::ServerTemporarilyDisabled => Self::ServerDown,
            ReturnCode::E2Big => Self::TooBig,
            ReturnCode::UnknownStatKey => Self::UnknownStatKey,
            _ => Self::Generic,
        };
        Ok(kind)
    }

    /// Exception-style name of the kind
    pub fn name(self) -> &'static str {
        match self {
            Self::Failure => "Failure",
            Self::HostLookup => "HostLookupError",
            Self::Connection => "ConnectionError",
            Self::ConnectionBind => "ConnectionBindError",
            Self::Write => "WriteError",
            Self::Read => "ReadError",
            Self::UnknownReadFailure => "UnknownReadFailure",
            Self::Protocol => "ProtocolError",
            Self::Client => "ClientError",
            Self::Server => "ServerError",
            Self::SocketCreate => "SocketCreateError",
            Self::DataExists => "DataExists",
            Self::DataDoesNotExist => "DataDoesNotExist",
            Self::NotFound => "NotFound",
            Self::Allocation => "AllocationError",
            Self::SomeErrors => "SomeErrors",
            Self::NoServers => "NoServers",
            Self::UnixSocket => "UnixSocketError",
            Self::NotSupported => "NotSupportedError",
            Self::FetchNotFinished => "FetchNotFinished",
            Self::BadKeyProvided => "BadKeyProvided",
            Self::InvalidHostProtocol => "InvalidHostProtocolError",
            Self::ServerDead => "ServerDead",
            Self::ServerDown => "ServerDown",
            Self::TooBig => "TooBig",
            Self::UnknownStatKey => "UnknownStatKey",
            Self::Generic => "Error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Public numeric lookup: the kind for a raw return code.
///
/// Unknown codes map to [`ErrorKind::Generic`]; `0` (success) is an error.
pub fn error_kind_for_raw(raw: u32) -> Result<ErrorKind> {
    match ReturnCode::from_raw(raw) {
        Some(code) => ErrorKind::from_code(code),
        None => Ok(ErrorKind::Generic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_code_numbering() {
        assert_eq!(ReturnCode::from_raw(0), Some(ReturnCode::Success));
        assert_eq!(ReturnCode::from_raw(16), Some(ReturnCode::NotFound));
        assert_eq!(ReturnCode::from_raw(21), Some(ReturnCode::End));
        assert_eq!(ReturnCode::from_raw(48), Some(ReturnCode::ServerMemoryAllocationFailure));
        assert_eq!(ReturnCode::from_raw(49), None);

        for raw in 0..49 {
            assert_eq!(ReturnCode::from_raw(raw).map(ReturnCode::as_raw), Some(raw));
        }
    }

    #[test]
    fn test_kind_table() {
        assert_eq!(ErrorKind::from_code(ReturnCode::NotFound).unwrap(), ErrorKind::NotFound);
        assert_eq!(
            ErrorKind::from_code(ReturnCode::ServerMarkedDead).unwrap(),
            ErrorKind::ServerDead
        );
        assert_eq!(
            ErrorKind::from_code(ReturnCode::ServerTemporarilyDisabled).unwrap(),
            ErrorKind::ServerDown
        );
        assert_eq!(ErrorKind::from_code(ReturnCode::E2Big).unwrap(), ErrorKind::TooBig);
        assert_eq!(ErrorKind::from_code(ReturnCode::Timeout).unwrap(), ErrorKind::Generic);
        assert!(matches!(
            ErrorKind::from_code(ReturnCode::Success),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_error_kind_for_raw() {
        assert_eq!(error_kind_for_raw(3).unwrap(), ErrorKind::Connection);
        assert_eq!(error_kind_for_raw(1000).unwrap(), ErrorKind::Generic);
        assert!(error_kind_for_raw(0).is_err());
    }

    #[test]
    fn test_from_return_message() {
        let err = Error::from_return(
            ReturnCode::ConnectionFailure,
            "get",
            Some(b"foo"),
            "connection refused",
        );
        assert_eq!(err.kind(), Some(ErrorKind::Connection));
        assert_eq!(err.code(), Some(ReturnCode::ConnectionFailure));
        assert_eq!(
            err.to_string(),
            "ConnectionError: error 3 from get(foo): connection refused"
        );

        let err = Error::from_return(ReturnCode::NoServers, "flush_all", None, "");
        assert_eq!(err.to_string(), "NoServers: error 20 from flush_all");
    }

    #[test]
    fn test_batch_aborted_reports_source_kind() {
        let err = Error::BatchAborted {
            stored: vec![AppKey::from("a")],
            source: Box::new(Error::from_return(ReturnCode::WriteFailure, "set", None, "")),
        };
        assert_eq!(err.kind(), Some(ErrorKind::Write));
        assert!(err.to_string().starts_with("Batch aborted after storing 1 keys"));
    }
}
