//! Application keys and their normalization into wire keys

use crate::error::KeyError;
use crate::protocol::MAX_KEY_LENGTH;
use std::fmt;

/// A key as the application supplied it.
///
/// Results and failure lists are reported with the caller's own variant, so a
/// key given as text comes back as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AppKey {
    Bytes(Vec<u8>),
    Text(String),
}

impl AppKey {
    /// Wire representation (text is UTF-8 encoded)
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Bytes(b) => b,
            Self::Text(s) => s.as_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AppKey {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AppKey {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&String> for AppKey {
    fn from(s: &String) -> Self {
        Self::Text(s.clone())
    }
}

impl From<Vec<u8>> for AppKey {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<&[u8]> for AppKey {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for AppKey {
    fn from(b: &[u8; N]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl From<&AppKey> for AppKey {
    fn from(k: &AppKey) -> Self {
        k.clone()
    }
}

/// Check a wire key against the length bound. Empty keys pass.
pub fn check_length(key: &[u8]) -> Result<(), KeyError> {
    if key.len() > MAX_KEY_LENGTH {
        return Err(KeyError::TooLong {
            len: key.len(),
            max: MAX_KEY_LENGTH,
        });
    }
    Ok(())
}

/// Normalize an application key into its wire form
pub fn normalize(key: &AppKey) -> Result<Vec<u8>, KeyError> {
    let bytes = key.as_bytes();
    check_length(bytes)?;
    Ok(bytes.to_vec())
}

/// Normalize a key with an optional prefix in front of it.
///
/// An empty prefix is ignored. Both the prefix and the combined key must fit
/// within [`MAX_KEY_LENGTH`].
pub fn normalize_prefixed(prefix: Option<&[u8]>, key: &AppKey) -> Result<Vec<u8>, KeyError> {
    let prefix = match prefix {
        Some(p) if !p.is_empty() => p,
        _ => return normalize(key),
    };
    check_length(prefix)?;

    let mut wire = Vec::with_capacity(prefix.len() + key.len());
    wire.extend_from_slice(prefix);
    wire.extend_from_slice(key.as_bytes());
    check_length(&wire)?;
    Ok(wire)
}
