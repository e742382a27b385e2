//! Key hash functions selectable through the `hash` and `ketama_hash` behaviors
//!
//! Numbering and output match libmemcached's hashkit so keys land on the same
//! servers as other clients sharing the cluster.

use md5::{Digest, Md5};

const FNV_64_INIT: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_64_PRIME: u64 = 0x0000_0100_0000_01b3;
const FNV_32_INIT: u32 = 0x811c_9dc5;
const FNV_32_PRIME: u32 = 0x0100_0193;

/// Hash algorithms, numbered like `memcached_hash_t`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Default,
    Md5,
    Crc,
    Fnv1_64,
    Fnv1a64,
    Fnv1_32,
    Fnv1a32,
    Hsieh,
    Murmur,
    Jenkins,
}

impl HashAlgorithm {
    const ALL: [HashAlgorithm; 10] = [
        Self::Default,
        Self::Md5,
        Self::Crc,
        Self::Fnv1_64,
        Self::Fnv1a64,
        Self::Fnv1_32,
        Self::Fnv1a32,
        Self::Hsieh,
        Self::Murmur,
        Self::Jenkins,
    ];

    pub fn from_id(id: u64) -> Option<Self> {
        usize::try_from(id).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn id(self) -> u64 {
        self as u64
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Md5 => "md5",
            Self::Crc => "crc",
            Self::Fnv1_64 => "fnv1_64",
            Self::Fnv1a64 => "fnv1a_64",
            Self::Fnv1_32 => "fnv1_32",
            Self::Fnv1a32 => "fnv1a_32",
            Self::Hsieh => "hsieh",
            Self::Murmur => "murmur",
            Self::Jenkins => "jenkins",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.name() == name)
    }

    /// Whether this build can compute the hash
    pub fn is_supported(self) -> bool {
        !matches!(self, Self::Hsieh | Self::Jenkins)
    }

    /// Hash `key`, or `None` for algorithms not built in
    pub fn hash(self, key: &[u8]) -> Option<u32> {
        let value = match self {
            Self::Default => one_at_a_time(key),
            Self::Md5 => md5_hash(key),
            Self::Crc => crc_hash(key),
            Self::Fnv1_64 => fnv1_64(key),
            Self::Fnv1a64 => fnv1a_64(key),
            Self::Fnv1_32 => fnv1_32(key),
            Self::Fnv1a32 => fnv1a_32(key),
            Self::Murmur => murmur(key),
            Self::Hsieh | Self::Jenkins => return None,
        };
        Some(value)
    }
}

/// Bob Jenkins' one-at-a-time hash
pub fn one_at_a_time(key: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &b in key {
        // Sign-extended, as a C `char` on x86
        hash = hash.wrapping_add(b as i8 as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}

/// First four digest bytes, little-endian
pub fn md5_hash(key: &[u8]) -> u32 {
    let digest = Md5::digest(key);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

pub fn crc_hash(key: &[u8]) -> u32 {
    (crc32fast::hash(key) >> 16) & 0x7fff
}

pub fn fnv1_64(key: &[u8]) -> u32 {
    let hash = key.iter().fold(FNV_64_INIT, |hash, &b| {
        hash.wrapping_mul(FNV_64_PRIME) ^ u64::from(b)
    });
    hash as u32
}

pub fn fnv1a_64(key: &[u8]) -> u32 {
    let hash = key.iter().fold(FNV_64_INIT, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_64_PRIME)
    });
    hash as u32
}

pub fn fnv1_32(key: &[u8]) -> u32 {
    key.iter().fold(FNV_32_INIT, |hash, &b| {
        hash.wrapping_mul(FNV_32_PRIME) ^ u32::from(b)
    })
}

pub fn fnv1a_32(key: &[u8]) -> u32 {
    key.iter().fold(FNV_32_INIT, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV_32_PRIME)
    })
}

/// MurmurHash2 with hashkit's length-derived seed
pub fn murmur(key: &[u8]) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let len = key.len() as u32;
    let seed = 0xdead_beef_u32.wrapping_mul(len);
    let mut h = seed ^ len;

    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        if tail.len() >= 3 {
            h ^= u32::from(tail[2]) << 16;
        }
        if tail.len() >= 2 {
            h ^= u32::from(tail[1]) << 8;
        }
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^ (h >> 15)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_and_names() {
        assert_eq!(HashAlgorithm::from_id(0), Some(HashAlgorithm::Default));
        assert_eq!(HashAlgorithm::from_id(8), Some(HashAlgorithm::Murmur));
        assert_eq!(HashAlgorithm::from_id(10), None);
        assert_eq!(HashAlgorithm::from_name("fnv1a_32"), Some(HashAlgorithm::Fnv1a32));
        assert_eq!(HashAlgorithm::Crc.id(), 2);
        assert_eq!(HashAlgorithm::from_name("sha1"), None);
    }

    #[test]
    fn test_fnv_reference_values() {
        // Published FNV test vectors
        assert_eq!(fnv1_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1_32(b"a"), 0x050c_5d7e);
        assert_eq!(fnv1_64(b"a"), 0x8601_b7be);
        assert_eq!(fnv1a_64(b"a"), 0x8601_ec8c);
    }

    #[test]
    fn test_md5_matches_digest_prefix() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(md5_hash(b""), u32::from_le_bytes([0xd4, 0x1d, 0x8c, 0xd9]));
    }

    #[test]
    fn test_crc_is_15_bits() {
        for key in [&b"foo"[..], b"bar", b"a much longer key than the others"] {
            assert!(crc_hash(key) <= 0x7fff);
        }
        assert_eq!(crc_hash(b"123456789"), (0xcbf4_3926_u32 >> 16) & 0x7fff);
    }

    #[test]
    fn test_unsupported() {
        assert_eq!(HashAlgorithm::Hsieh.hash(b"key"), None);
        assert_eq!(HashAlgorithm::Jenkins.hash(b"key"), None);
        assert!(!HashAlgorithm::Jenkins.is_supported());
    }

    #[test]
    fn test_deterministic() {
        for algo in HashAlgorithm::ALL.into_iter().filter(|h| h.is_supported()) {
            assert_eq!(algo.hash(b"some-key"), algo.hash(b"some-key"));
            assert_ne!(algo.hash(b"some-key"), algo.hash(b"other-key"), "{algo:?}");
        }
    }

    #[test]
    fn test_murmur_tail_lengths() {
        let values: Vec<u32> = (0..8).map(|n| murmur(&b"abcdefgh"[..n])).collect();
        for (i, a) in values.iter().enumerate() {
            for b in &values[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
